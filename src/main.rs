use std::ffi::OsString;

use clap::Parser;
use log::info;

use tf_timeline::backend::{analyze, trace_viewer, visualize};
use tf_timeline::error::Error;
use tf_timeline::serialize::{self, RunMetadata};
use tf_timeline::state::{Config, DEFAULT_COMM_OP, RowStrategy, State};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(required = true, help = "input trace filenames (JSON or gzip blob)")]
    filenames: Vec<OsString>,

    #[arg(
        short,
        long,
        default_value = "timeline.html",
        help = "output file pathname"
    )]
    output: OsString,

    #[arg(short, long, help = "overwrite output file if it exists")]
    force: bool,

    #[arg(short, long, conflicts_with = "trace", help = "print statistics")]
    statistics: bool,

    #[arg(short, long, help = "emit JSON for Google Trace Viewer")]
    trace: bool,

    #[arg(long = "save-blob", help = "write the merged input as a gzip blob")]
    save_blob: Option<OsString>,

    #[arg(long, help = "only count events on devices whose name contains this")]
    device: Option<String>,

    #[arg(long, help = "skip communication events whose label contains this")]
    exclude: Option<String>,

    #[arg(
        long = "comm-op",
        default_value = DEFAULT_COMM_OP,
        help = "node name of communication ops"
    )]
    comm_op: String,

    #[arg(long, help = "classify communication by the collective marker")]
    collective: bool,

    #[arg(
        long = "min-rows",
        help = "pack each device into the minimum number of rows"
    )]
    min_rows: bool,

    #[arg(short, long, help = "print verbose profiling information")]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            comm_op: self.comm_op.clone(),
            collective: self.collective,
            device_filter: self.device.clone(),
            exclude: self.exclude.clone(),
            row_strategy: if self.min_rows {
                RowStrategy::EarliestFree
            } else {
                RowStrategy::FirstFit
            },
            ..Config::default()
        }
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut metadata = RunMetadata::default();
    for filename in &cli.filenames {
        info!("Reading trace file {:?}...", filename);
        metadata.merge(serialize::deserialize(filename)?);
    }

    if let Some(path) = &cli.save_blob {
        info!("Saving merged trace to {:?}", path);
        serialize::serialize(path, &metadata)?;
    }

    if metadata.is_empty() {
        info!("Nothing to do");
        return Ok(());
    }

    let config = cli.config();
    let state = State::from_run_metadata(&metadata, &config);
    if cli.statistics {
        analyze::print_statistics(&state, &config);
    } else if cli.trace {
        trace_viewer::emit_trace(&state, &cli.output, cli.force)?;
    } else {
        let path = visualize::emit_timeline(&state, &cli.output, cli.force)?;
        info!("Wrote {:?}", path);
    }

    Ok(())
}
