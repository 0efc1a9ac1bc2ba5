use std::cmp::{max, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::hash::Hasher;

use derive_more::{Add, Sub};
use fnv::FnvHasher;
use log::{debug, info};

use crate::label;
use crate::num_util::Postincrement;
use crate::serialize::{NodeExecStats, RunMetadata};

pub const DEFAULT_COMM_OP: &str = "RecvTensor";
pub const DEFAULT_COLLECTIVE_MARKER: &str = "CollectiveReduce";
pub const DEFAULT_COLLECTIVE_PREFIX: &str = "AR";
pub const ALL_REDUCE_SUFFIX: &str = " (All Reduce)";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Add, Sub)]
pub struct Timestamp(pub u64 /* us */);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_us(microseconds: u64) -> Timestamp {
        Timestamp(microseconds)
    }
    pub fn to_us(&self) -> f64 {
        self.0 as f64
    }
    pub fn to_ms(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Time is stored in microseconds. But it is displayed in milliseconds.
        let microseconds = self.0;
        let divisor = 1000;
        let milliseconds = microseconds / divisor;
        let remainder = microseconds % divisor;
        write!(f, "{}.{:0>3}", milliseconds, remainder)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Color(pub u32);

impl Color {
    /// Color for an op type. Each channel comes from a generator seeded
    /// with its own slice of the op name's hash, so every occurrence of an
    /// op gets the same color.
    pub fn for_op(op: &str) -> Color {
        let mut hasher = FnvHasher::default();
        hasher.write(op.as_bytes());
        let hash = hasher.finish();
        let channel = |i: u32| LFSR::seeded((hash >> (16 * i)) as u16).next_byte();
        Color((channel(0) << 16) | (channel(1) << 8) | channel(2))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

#[derive(Debug)]
struct LFSR {
    register: u32,
    bits: u32,
    taps: [u32; 4],
}

impl LFSR {
    const BITS: u32 = 16;

    fn seeded(seed: u16) -> Self {
        LFSR {
            // All-zero is a fixed point.
            register: if seed == 0 { 0b1010010011110011 } else { seed as u32 },
            bits: Self::BITS,
            taps: [16, 14, 13, 11],
        }
    }
    fn next(&mut self) -> u32 {
        let mut xor = 0;
        for t in &self.taps {
            xor += (self.register >> (self.bits - t)) & 1;
        }
        xor = xor & 1;
        self.register = ((self.register >> 1) | (xor << (self.bits - 1))) & ((1 << self.bits) - 1);
        self.register
    }
    /// Shifts eight fresh feedback bits in and returns them.
    fn next_byte(&mut self) -> u32 {
        for _ in 0..8 {
            self.next();
        }
        self.register >> (self.bits - 8)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RowStrategy {
    /// Scan rows in creation order and take the first one that is free.
    #[default]
    FirstFit,
    /// Reuse the row that frees up earliest. Uses the minimum number of rows.
    EarliestFree,
}

/// Assigns a row to every `(start, end)` span such that spans on the same
/// row never overlap. Returns the row of each span, in input order, and the
/// number of rows used.
pub fn pack_rows(spans: &[(Timestamp, Timestamp)], strategy: RowStrategy) -> (Vec<u32>, u32) {
    // Stable, so spans starting together keep their input order.
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.sort_by_key(|&i| spans[i].0);

    let mut rows = vec![0; spans.len()];
    let mut num_rows = 0;
    match strategy {
        RowStrategy::FirstFit => {
            let mut row_ends: Vec<Timestamp> = Vec::new();
            for i in order {
                let (start, end) = spans[i];
                rows[i] = match row_ends.iter().position(|&row_end| row_end <= start) {
                    Some(row) => {
                        row_ends[row] = end;
                        row as u32
                    }
                    None => {
                        row_ends.push(end);
                        num_rows.postincrement()
                    }
                };
            }
        }
        RowStrategy::EarliestFree => {
            // Hack: This is a max heap so reverse the values as they go in.
            let mut free_rows = BinaryHeap::<Reverse<(Timestamp, u32)>>::new();
            for i in order {
                let (start, end) = spans[i];
                let row = match free_rows.peek() {
                    Some(&Reverse((free_at, row))) if free_at <= start => {
                        free_rows.pop();
                        row
                    }
                    _ => num_rows.postincrement(),
                };
                free_rows.push(Reverse((end, row)));
                rows[i] = row;
            }
        }
    }
    (rows, num_rows)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Node name of point-to-point communication ops.
    pub comm_op: String,
    /// Classify communication by the collective marker instead of `comm_op`.
    pub collective: bool,
    pub collective_marker: String,
    /// Nodes whose name starts with this go to the "(All Reduce)" device.
    pub collective_prefix: String,
    pub device_filter: Option<String>,
    pub exclude: Option<String>,
    pub row_strategy: RowStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            comm_op: DEFAULT_COMM_OP.to_owned(),
            collective: false,
            collective_marker: DEFAULT_COLLECTIVE_MARKER.to_owned(),
            collective_prefix: DEFAULT_COLLECTIVE_PREFIX.to_owned(),
            device_filter: None,
            exclude: None,
            row_strategy: RowStrategy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub label: String,
    pub op: String,
    pub inputs: Vec<String>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub duration: Timestamp,
    pub row: u32,
    pub color: Color,
}

impl Event {
    fn new(node: &NodeExecStats, base_time: i64) -> Self {
        let start = Timestamp::from_us(node.all_start_micros.saturating_sub(base_time).max(0) as u64);
        // Zero-length ops are stretched so they stay visible.
        let end = start + Timestamp::from_us(max(node.all_end_rel_micros, 1) as u64);
        let duration = Timestamp::from_us(node.all_end_rel_micros.max(0) as u64);
        let (op, inputs) = label::op_and_inputs(&node.node_name, &node.timeline_label);
        let color = Color::for_op(&op);
        Event {
            name: node.node_name.clone(),
            label: node.timeline_label.clone(),
            op,
            inputs,
            start,
            end,
            duration,
            row: 0,
            color,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub events: Vec<Event>,
    pub num_rows: u32,
}

impl Device {
    fn new<'a>(
        name: String,
        nodes: impl Iterator<Item = &'a NodeExecStats>,
        base_time: i64,
        strategy: RowStrategy,
    ) -> Self {
        let mut events: Vec<_> = nodes.map(|node| Event::new(node, base_time)).collect();
        let spans: Vec<_> = events.iter().map(|e| (e.start, e.end)).collect();
        let (rows, num_rows) = pack_rows(&spans, strategy);
        for (event, row) in events.iter_mut().zip(rows) {
            event.row = row;
        }
        debug!(
            "Device {} has {} events on {} rows",
            name,
            events.len(),
            num_rows
        );
        Device {
            name,
            events,
            num_rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_all_reduce(&self) -> bool {
        self.name.ends_with(ALL_REDUCE_SUFFIX)
    }

    pub fn max_time(&self) -> Timestamp {
        self.events
            .iter()
            .map(|e| e.end)
            .max()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct State {
    /// Earliest start in the source trace, in absolute microseconds.
    pub base_time: i64,
    /// Sorted by name.
    pub devices: Vec<Device>,
}

impl State {
    pub fn from_run_metadata(metadata: &RunMetadata, config: &Config) -> Self {
        let dev_stats = &metadata.step_stats.dev_stats;
        let base_time = dev_stats
            .iter()
            .flat_map(|dev| &dev.node_stats)
            .map(|node| node.all_start_micros)
            .min()
            .unwrap_or(0);

        let prefix = config.collective_prefix.as_str();
        let mut devices = Vec::new();
        for dev in dev_stats {
            let is_collective = |node: &&NodeExecStats| node.node_name.starts_with(prefix);
            devices.push(Device::new(
                dev.device.clone(),
                dev.node_stats.iter().filter(|n| !is_collective(n)),
                base_time,
                config.row_strategy,
            ));
            let all_reduce = Device::new(
                format!("{}{}", dev.device, ALL_REDUCE_SUFFIX),
                dev.node_stats.iter().filter(is_collective),
                base_time,
                config.row_strategy,
            );
            if !all_reduce.is_empty() {
                devices.push(all_reduce);
            }
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));

        let state = State { base_time, devices };
        info!(
            "Processed {} devices, timeline ends at {} ms",
            state.devices.len(),
            state.max_time()
        );
        state
    }

    pub fn is_empty(&self) -> bool {
        self.devices.iter().all(|d| d.is_empty())
    }

    pub fn find_device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Latest event end over all devices, the shared time-axis bound.
    pub fn max_time(&self) -> Timestamp {
        self.devices
            .iter()
            .map(|d| d.max_time())
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{DeviceStepStats, StepStats};

    fn ts(us: u64) -> Timestamp {
        Timestamp::from_us(us)
    }

    fn spans(v: &[(u64, u64)]) -> Vec<(Timestamp, Timestamp)> {
        v.iter().map(|&(s, e)| (ts(s), ts(e))).collect()
    }

    fn node(name: &str, label: &str, start: i64, rel: i64) -> NodeExecStats {
        NodeExecStats {
            node_name: name.to_owned(),
            timeline_label: label.to_owned(),
            all_start_micros: start,
            all_end_rel_micros: rel,
        }
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(ts(12345).to_string(), "12.345");
        assert_eq!(ts(7).to_string(), "0.007");
        assert_eq!(ts(1500).to_ms(), 1.5);
        assert_eq!(ts(30) + ts(12) - ts(2), ts(40));
    }

    #[test]
    fn test_pack_empty() {
        for strategy in [RowStrategy::FirstFit, RowStrategy::EarliestFree] {
            assert_eq!(pack_rows(&[], strategy), (vec![], 0));
        }
    }

    #[test]
    fn test_pack_disjoint() {
        let s = spans(&[(20, 30), (0, 10), (10, 20)]);
        for strategy in [RowStrategy::FirstFit, RowStrategy::EarliestFree] {
            assert_eq!(pack_rows(&s, strategy), (vec![0, 0, 0], 1));
        }
    }

    #[test]
    fn test_pack_shared_point() {
        let s = spans(&[(0, 10), (5, 15), (2, 8), (4, 6)]);
        for strategy in [RowStrategy::FirstFit, RowStrategy::EarliestFree] {
            let (rows, num_rows) = pack_rows(&s, strategy);
            assert_eq!(num_rows, 4);
            let mut sorted = rows.clone();
            sorted.sort();
            assert_eq!(sorted, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_pack_first_fit_order() {
        // Sorted by start: [0,10] r0, [1,3] r1, [4,6] r1, [11,12] r0.
        let s = spans(&[(4, 6), (0, 10), (11, 12), (1, 3)]);
        assert_eq!(pack_rows(&s, RowStrategy::FirstFit), (vec![1, 0, 0, 1], 2));
    }

    #[test]
    fn test_pack_earliest_free_reuses_earliest_row() {
        // When [5,6] starts row 1 has been free since 2, row 0 since 4.
        let s = spans(&[(0, 4), (1, 2), (5, 6)]);
        assert_eq!(pack_rows(&s, RowStrategy::FirstFit), (vec![0, 1, 0], 2));
        assert_eq!(pack_rows(&s, RowStrategy::EarliestFree), (vec![0, 1, 1], 2));
    }

    #[test]
    fn test_color_per_op() {
        assert_eq!(Color::for_op("MatMul"), Color::for_op("MatMul"));
        assert_ne!(Color::for_op("MatMul"), Color::for_op("Conv2D"));
        assert_eq!(Color::for_op("Add"), Color(0xa207a4));
        assert_ne!(Color::for_op("Tile"), Color::for_op("Split"));
        assert!(Color::for_op("").0 <= 0xffffff);
        assert_eq!(Color(0xff0000).to_string(), "#ff0000");
        assert_eq!(Color(0x00ff).to_string(), "#0000ff");
    }

    #[test]
    fn test_lfsr_seed_never_zero() {
        let mut lfsr = LFSR::seeded(0);
        assert_ne!(lfsr.register, 0);
        assert!(lfsr.next() < 1 << LFSR::BITS);
        assert!(lfsr.next_byte() <= 0xff);
        assert_ne!(lfsr.register, 0);
    }

    #[test]
    fn test_color_common_ops_distinct() {
        let ops = [
            "Add", "AddN", "AddV2", "ApplyAdam", "ApplyGradientDescent", "ArgMax",
            "Assign", "AssignAdd", "AvgPool", "BiasAdd", "BiasAddGrad", "Cast",
            "Concat", "ConcatV2", "Const", "Conv2D", "Conv2DBackpropFilter",
            "Conv2DBackpropInput", "Equal", "Exp", "ExpandDims", "Fill",
            "FusedBatchNorm", "FusedBatchNormGrad", "Gather", "GatherV2", "Identity",
            "L2Loss", "Log", "MatMul", "Max", "MaxPool", "MaxPoolGrad", "Maximum",
            "Mean", "Minimum", "Mul", "Neg", "NoOp", "OneHot", "Pack", "Pad", "Pow",
            "RealDiv", "RecvTensor", "Relu", "Relu6", "ReluGrad", "Reshape", "Rsqrt",
            "Select", "Shape", "Sigmoid", "Slice", "Softmax",
            "SparseSoftmaxCrossEntropyWithLogits", "Split", "Sqrt", "Square",
            "Squeeze", "StridedSlice", "Sub", "Sum", "Tanh", "Tile", "Transpose",
            "Unpack", "VariableV2", "ZerosLike", "CollectiveReduce",
        ];
        let colors: std::collections::BTreeSet<_> =
            ops.iter().map(|op| Color::for_op(op)).collect();
        assert_eq!(colors.len(), ops.len());

        let synthetic: std::collections::BTreeSet<_> =
            (0..1000).map(|i| Color::for_op(&format!("op{}", i))).collect();
        assert_eq!(synthetic.len(), 1000);
    }

    #[test]
    fn test_event_fields() {
        let e = Event::new(&node("foo", "foo = Add(x, y)", 1100, 0), 1000);
        assert_eq!(e.start, ts(100));
        assert_eq!(e.end, ts(101));
        assert_eq!(e.duration, ts(0));
        assert_eq!(e.op, "Add");
        assert_eq!(e.inputs, vec!["x".to_owned(), "y".to_owned()]);
        assert_eq!(e.color, Color::for_op("Add"));

        let e = Event::new(&node("RecvTensor", "garbage", 1000, 40), 1000);
        assert_eq!(e.op, "RecvTensor");
        assert!(e.inputs.is_empty());
        assert_eq!(e.end, ts(40));
    }

    #[test]
    fn test_state_devices() {
        let metadata = RunMetadata {
            step_stats: StepStats {
                dev_stats: vec![
                    DeviceStepStats {
                        device: "gpu:0".to_owned(),
                        node_stats: vec![
                            node("ARReduce", "ARReduce = AllReduce(g)", 500, 100),
                            node("a", "a = Add(x, y)", 200, 100),
                            node("b", "b = Mul(x, y)", 250, 100),
                        ],
                    },
                    DeviceStepStats {
                        device: "cpu:0".to_owned(),
                        node_stats: vec![node("c", "c = Sub(x, y)", 100, 50)],
                    },
                ],
            },
        };
        let state = State::from_run_metadata(&metadata, &Config::default());
        assert_eq!(state.base_time, 100);
        let names: Vec<_> = state.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["cpu:0", "gpu:0", "gpu:0 (All Reduce)"]);

        let gpu = state.find_device("gpu:0").unwrap();
        assert_eq!(gpu.events.len(), 2);
        assert_eq!(gpu.num_rows, 2);
        assert!(!gpu.is_all_reduce());
        let ar = state.find_device("gpu:0 (All Reduce)").unwrap();
        assert!(ar.is_all_reduce());
        assert_eq!(ar.num_rows, 1);
        assert_eq!(state.max_time(), ts(500));
    }

    #[test]
    fn test_state_empty() {
        let state = State::from_run_metadata(&RunMetadata::default(), &Config::default());
        assert!(state.is_empty());
        assert_eq!(state.max_time(), Timestamp::ZERO);
    }
}
