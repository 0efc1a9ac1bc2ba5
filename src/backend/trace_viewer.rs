use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::state::State;

#[derive(Serialize, Copy, Clone)]
struct Event<'a> {
    name: &'a str,
    #[serde(rename = "cat")]
    category: &'a str,
    #[serde(rename = "ph")]
    phase: &'a str,
    #[serde(rename = "ts")]
    timestamp: f64,
    #[serde(rename = "dur")]
    duration: f64,
    pid: u64,
    tid: u64,
}

#[derive(Serialize, Copy, Clone)]
struct NameArgs<'a> {
    name: &'a str,
}

#[derive(Serialize, Copy, Clone)]
struct Metadata<'a> {
    name: &'a str,
    #[serde(rename = "ph")]
    phase: &'a str,
    pid: u64,
    args: NameArgs<'a>,
}

/// Writes the events of `state` in the Chrome trace event format: one
/// process per device, one thread per packed row.
pub fn write_trace<W: Write>(state: &State, mut out: W) -> Result<()> {
    write!(out, "[")?;

    let mut first = true;
    for (pid, device) in state.devices.iter().enumerate() {
        let pid = pid as u64;
        if !first {
            write!(out, ",")?;
        }
        first = false;
        serde_json::to_writer(
            &mut out,
            &Metadata {
                name: "process_name",
                phase: "M",
                pid,
                args: NameArgs { name: &device.name },
            },
        )?;

        for event in &device.events {
            write!(out, ",")?;
            serde_json::to_writer(
                &mut out,
                &Event {
                    name: &event.name,
                    category: &event.op,
                    phase: "X",
                    timestamp: event.start.to_us(),
                    duration: event.duration.to_us(),
                    pid,
                    tid: event.row as u64,
                },
            )?;
        }
    }

    writeln!(out, "]")?;
    out.flush()?;
    Ok(())
}

pub fn emit_trace<P: AsRef<Path>>(state: &State, path: P, force: bool) -> Result<()> {
    info!("Generating trace file {:?}", path.as_ref());

    let file = OpenOptions::new()
        .write(true)
        // If force is set, create and truncate.
        .create(true)
        .truncate(true)
        // If force is not set, create only if it does not exist.
        .create_new(!force)
        .open(path)?;
    write_trace(state, BufWriter::new(file))
}
