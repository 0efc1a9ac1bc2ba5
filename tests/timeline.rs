//! End-to-end tests: trace files in, timeline and trace exports out.

use std::fs;

use tf_timeline::backend::{trace_viewer, visualize};
use tf_timeline::capture::StepProfiler;
use tf_timeline::serialize::{self, DeviceStepStats, NodeExecStats, RunMetadata, StepStats};
use tf_timeline::state::{Config, State, Timestamp};

fn node(name: &str, label: &str, start: i64, rel: i64) -> NodeExecStats {
    NodeExecStats {
        node_name: name.to_owned(),
        timeline_label: label.to_owned(),
        all_start_micros: start,
        all_end_rel_micros: rel,
    }
}

fn two_devices() -> RunMetadata {
    RunMetadata {
        step_stats: StepStats {
            dev_stats: vec![
                DeviceStepStats {
                    device: "/job:worker/device:GPU:0".to_owned(),
                    node_stats: vec![node("mm", "mm = MatMul(a, b)", 1_000_000, 400)],
                },
                DeviceStepStats {
                    device: "/job:worker/device:GPU:1".to_owned(),
                    node_stats: vec![node("conv", "conv = Conv2D(x, w)", 1_000_200, 900)],
                },
            ],
        },
    }
}

#[test]
fn test_one_chart_per_device() {
    let state = State::from_run_metadata(&two_devices(), &Config::default());
    assert_eq!(state.devices.len(), 2);
    assert!(state.devices.iter().all(|d| !d.is_all_reduce()));
    assert_eq!(state.max_time(), Timestamp(1100));

    let html = visualize::render_timeline(&state).unwrap();
    assert!(html.contains("\"name\":\"/job:worker/device:GPU:0\""));
    assert!(html.contains("\"name\":\"/job:worker/device:GPU:1\""));
    assert!(html.contains("\"max_x\":1.1"));
}

#[test]
fn test_all_reduce_pseudo_device() {
    let mut metadata = two_devices();
    metadata.step_stats.dev_stats[0]
        .node_stats
        .push(node("AR_sum", "AR_sum = CollectiveReduce(mm)", 1_000_500, 100));
    let state = State::from_run_metadata(&metadata, &Config::default());

    let names: Vec<_> = state.devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "/job:worker/device:GPU:0",
            "/job:worker/device:GPU:0 (All Reduce)",
            "/job:worker/device:GPU:1",
        ]
    );
    let all_reduce = state.find_device("/job:worker/device:GPU:0 (All Reduce)").unwrap();
    assert_eq!(all_reduce.events.len(), 1);
    assert_eq!(all_reduce.events[0].op, "CollectiveReduce");
}

#[test]
fn test_blob_files_merge_and_render() {
    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("step.pb.gz");
    let json = dir.path().join("step.json");

    let metadata = two_devices();
    serialize::serialize(&blob, &metadata).unwrap();
    fs::write(&json, serde_json::to_vec(&metadata).unwrap()).unwrap();

    let from_blob = serialize::deserialize(&blob).unwrap();
    assert_eq!(from_blob, metadata);

    let mut merged = from_blob;
    merged.merge(serialize::deserialize(&json).unwrap());
    assert_eq!(merged.step_stats.dev_stats.len(), 4);

    let profiler = StepProfiler::from_run_metadata(Config::default(), merged);
    let output = dir.path().join("timeline.html");
    profiler.emit_html(&output, false).unwrap();
    profiler.emit_html(&output, false).unwrap();
    assert!(output.exists());
    assert!(dir.path().join("timeline.1.html").exists());

    let html = fs::read_to_string(&output).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("TensorFlow Timeline"));
}

#[test]
fn test_profiler_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.gz");

    let profiler = StepProfiler::from_run_metadata(Config::default(), two_devices());
    profiler.save(&path).unwrap();
    let loaded = StepProfiler::load(Config::default(), &path).unwrap();
    assert_eq!(loaded.run_metadata().unwrap(), profiler.run_metadata().unwrap());
    assert_eq!(
        loaded.iteration_time().unwrap(),
        profiler.iteration_time().unwrap()
    );
    assert_eq!(loaded.iteration_time().unwrap(), Timestamp(1100));
}

#[test]
fn test_trace_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.json");
    let state = State::from_run_metadata(&two_devices(), &Config::default());
    trace_viewer::emit_trace(&state, &path, false).unwrap();

    let trace: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let events = trace.as_array().unwrap();
    assert_eq!(events.iter().filter(|e| e["ph"] == "M").count(), 2);
    let conv = events.iter().find(|e| e["name"] == "conv").unwrap();
    assert_eq!(conv["cat"], "Conv2D");
    assert_eq!(conv["pid"], 1);
    assert_eq!(conv["ts"], 200.0);
}
