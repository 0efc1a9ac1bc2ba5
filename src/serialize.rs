use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// First two bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Per-node execution record, as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeExecStats {
    pub node_name: String,
    pub timeline_label: String,
    pub all_start_micros: i64,
    pub all_end_rel_micros: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceStepStats {
    pub device: String,
    pub node_stats: Vec<NodeExecStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepStats {
    pub dev_stats: Vec<DeviceStepStats>,
}

/// Trace metadata for one executed step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetadata {
    pub step_stats: StepStats,
}

impl RunMetadata {
    pub fn is_empty(&self) -> bool {
        self.step_stats
            .dev_stats
            .iter()
            .all(|dev| dev.node_stats.is_empty())
    }

    /// Appends the devices of `other`, used when several trace files are
    /// viewed together.
    pub fn merge(&mut self, other: RunMetadata) {
        self.step_stats
            .dev_stats
            .extend(other.step_stats.dev_stats);
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.starts_with(&GZIP_MAGIC) {
            let mut gz = GzDecoder::new(blob);
            let mut s = Vec::<u8>::new();
            gz.read_to_end(&mut s)?;
            Ok(serde_json::from_slice(&s)?)
        } else {
            Ok(serde_json::from_slice(blob)?)
        }
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut gz, self)?;
        Ok(gz.finish()?)
    }
}

/// Reads a trace file, either plain JSON or a blob written by [`serialize`].
pub fn deserialize<P: AsRef<Path>>(path: P) -> Result<RunMetadata> {
    let mut s = Vec::<u8>::new();
    BufReader::new(File::open(path)?).read_to_end(&mut s)?;
    RunMetadata::from_blob(&s)
}

pub fn serialize<P: AsRef<Path>>(path: P, metadata: &RunMetadata) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&metadata.to_blob()?)?;
    file.flush()?;
    Ok(())
}
