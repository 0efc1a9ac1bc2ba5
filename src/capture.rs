//! Capturing a traced step and the metrics derived from it.
//!
//! A [`StepProfiler`] runs one step of an external runtime with tracing
//! requested, timing it with a [`Measurement`]. The captured (or loaded)
//! trace is kept as an optional field; every accessor that needs it fails
//! with [`Error::NoData`] while it is absent, or with
//! [`Error::CaptureUnavailable`] when the runtime can't trace at all.

use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::backend::analyze::{self, TimeSummary};
use crate::backend::visualize;
use crate::error::{Error, Result};
use crate::serialize::{self, RunMetadata};
use crate::state::{Config, State, Timestamp};

/// The runtime whose steps get traced.
pub trait TraceRuntime {
    fn supports_tracing(&self) -> bool {
        true
    }

    /// Runs one step. With `trace` set the runtime returns the trace
    /// metadata it collected for the step.
    fn run_step(&mut self, trace: bool) -> Result<Option<RunMetadata>>;
}

/// Stores the time elapsed since its creation into `slot` when dropped, so
/// the measurement is recorded however the measured scope is left.
pub struct Measurement<'a> {
    start: Instant,
    slot: &'a mut Option<Duration>,
}

impl<'a> Measurement<'a> {
    pub fn start(slot: &'a mut Option<Duration>) -> Self {
        Measurement {
            start: Instant::now(),
            slot,
        }
    }
}

impl Drop for Measurement<'_> {
    fn drop(&mut self) {
        *self.slot = Some(self.start.elapsed());
    }
}

/// Runs `f`, storing its wall time into `slot`.
pub fn measure<T>(slot: &mut Option<Duration>, f: impl FnOnce() -> T) -> T {
    let _measurement = Measurement::start(slot);
    f()
}

#[derive(Debug, Default)]
pub struct StepProfiler {
    config: Config,
    run_metadata: Option<RunMetadata>,
    wall_time: Option<Duration>,
    unavailable: bool,
}

impl StepProfiler {
    pub fn new(config: Config) -> Self {
        StepProfiler {
            config,
            ..Default::default()
        }
    }

    /// A profiler over an already captured trace.
    pub fn from_run_metadata(config: Config, run_metadata: RunMetadata) -> Self {
        StepProfiler {
            config,
            run_metadata: Some(run_metadata),
            ..Default::default()
        }
    }

    /// A profiler over a trace previously written by [`StepProfiler::save`].
    pub fn load<P: AsRef<Path>>(config: Config, path: P) -> Result<Self> {
        info!("Loading trace {:?}", path.as_ref());
        Ok(Self::from_run_metadata(config, serialize::deserialize(path)?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one traced step of `runtime`. The wall time is recorded even if
    /// the step fails.
    pub fn capture<R: TraceRuntime + ?Sized>(&mut self, runtime: &mut R) -> Result<()> {
        let trace = runtime.supports_tracing();
        self.unavailable = !trace;
        self.run_metadata = None;

        let result = measure(&mut self.wall_time, || runtime.run_step(trace));
        debug!("Step finished in {:?}", self.wall_time);

        let run_metadata = result?;
        if trace {
            self.run_metadata = run_metadata;
        }
        Ok(())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(Error::CaptureUnavailable)
        } else {
            Ok(())
        }
    }

    pub fn run_metadata(&self) -> Result<&RunMetadata> {
        self.check_available()?;
        self.run_metadata.as_ref().ok_or(Error::NoData)
    }

    /// Wall time of the last captured step.
    pub fn wall_time(&self) -> Result<Duration> {
        self.wall_time.ok_or(Error::NoData)
    }

    pub fn state(&self) -> Result<State> {
        Ok(State::from_run_metadata(self.run_metadata()?, &self.config))
    }

    pub fn summary(&self) -> Result<TimeSummary> {
        Ok(TimeSummary::new(&self.state()?, &self.config))
    }

    pub fn iteration_time(&self) -> Result<Timestamp> {
        Ok(analyze::iteration_time(&self.state()?, &self.config))
    }

    pub fn communication_time(&self) -> Result<Timestamp> {
        Ok(analyze::communication_time(&self.state()?, &self.config))
    }

    pub fn computation_time(&self) -> Result<Timestamp> {
        Ok(analyze::computation_time(&self.state()?, &self.config))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let run_metadata = self.run_metadata()?;
        info!("Saving trace to {:?}", path.as_ref());
        serialize::serialize(path, run_metadata)
    }

    pub fn render_html(&self) -> Result<String> {
        visualize::render_timeline(&self.state()?)
    }

    pub fn emit_html<P: AsRef<Path>>(&self, path: P, force: bool) -> Result<()> {
        visualize::emit_timeline(&self.state()?, path, force)?;
        Ok(())
    }
}
