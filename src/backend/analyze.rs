use std::cmp::{max, min, Reverse};
use std::collections::BTreeMap;

use crate::state::{Config, Device, Event, State, Timestamp};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Interval {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Interval { start, end }
    }

    pub fn duration(&self) -> Timestamp {
        Timestamp(self.end.0.saturating_sub(self.start.0))
    }
}

impl From<&Event> for Interval {
    // The raw extent, not the widened one used for drawing.
    fn from(event: &Event) -> Self {
        Interval::new(event.start, event.start + event.duration)
    }
}

/// Measure of the union of `intervals`: overlapping time is counted once.
pub fn covered_duration<I>(intervals: I) -> Timestamp
where
    I: IntoIterator<Item = Interval>,
{
    let mut intervals: Vec<_> = intervals.into_iter().collect();
    intervals.sort_by_key(|i| i.start);

    // None stands for negative infinity.
    let mut last_end: Option<Timestamp> = None;
    let mut total = Timestamp::ZERO;
    for interval in intervals {
        match last_end {
            Some(last) if interval.start <= last => {
                if interval.end > last {
                    total = total + (interval.end - last);
                }
            }
            _ => total = total + interval.duration(),
        }
        last_end = max(last_end, Some(interval.end));
    }
    total
}

/// Time from the earliest start to the latest end, zero if there are no
/// intervals.
pub fn span<I>(intervals: I) -> Timestamp
where
    I: IntoIterator<Item = Interval>,
{
    let mut bounds: Option<(Timestamp, Timestamp)> = None;
    for i in intervals {
        bounds = Some(match bounds {
            None => (i.start, i.end),
            Some((start, end)) => (min(start, i.start), max(end, i.end)),
        });
    }
    bounds.map_or(Timestamp::ZERO, |(start, end)| {
        Interval::new(start, end).duration()
    })
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommClassifier<'a> {
    /// Communication ops are the nodes with exactly this name.
    Sentinel(&'a str),
    /// Communication ops have this marker in their label.
    Collective(&'a str),
}

impl<'a> CommClassifier<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        if config.collective {
            CommClassifier::Collective(&config.collective_marker)
        } else {
            CommClassifier::Sentinel(&config.comm_op)
        }
    }

    pub fn is_communication(&self, event: &Event) -> bool {
        match self {
            CommClassifier::Sentinel(name) => event.name == *name,
            CommClassifier::Collective(marker) => event.label.contains(marker),
        }
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct EventFilter<'a> {
    /// Only devices whose name contains this.
    pub device: Option<&'a str>,
    /// Communication events whose label contains this are skipped.
    pub exclude: Option<&'a str>,
}

impl<'a> EventFilter<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        EventFilter {
            device: config.device_filter.as_deref(),
            exclude: config.exclude.as_deref(),
        }
    }

    fn matches_device(&self, device: &Device) -> bool {
        self.device.is_none_or(|f| device.name.contains(f))
    }

    fn is_excluded(&self, event: &Event) -> bool {
        self.exclude.is_some_and(|x| event.label.contains(x))
    }

    pub fn events<'s>(&self, state: &'s State) -> impl Iterator<Item = &'s Event> + use<'s, 'a> {
        let filter = *self;
        state
            .devices
            .iter()
            .filter(move |d| filter.matches_device(d))
            .flat_map(|d| &d.events)
    }

    pub fn comm_events<'s>(
        &self,
        state: &'s State,
        classifier: CommClassifier<'a>,
    ) -> impl Iterator<Item = &'s Event> + use<'s, 'a> {
        let filter = *self;
        self.events(state)
            .filter(move |e| classifier.is_communication(e) && !filter.is_excluded(e))
    }
}

/// Wall time covered by the selected devices.
pub fn iteration_time(state: &State, config: &Config) -> Timestamp {
    let filter = EventFilter::from_config(config);
    span(filter.events(state).map(Interval::from))
}

pub fn communication_time(state: &State, config: &Config) -> Timestamp {
    let filter = EventFilter::from_config(config);
    let classifier = CommClassifier::from_config(config);
    covered_duration(filter.comm_events(state, classifier).map(Interval::from))
}

pub fn communication_span(state: &State, config: &Config) -> Timestamp {
    let filter = EventFilter::from_config(config);
    let classifier = CommClassifier::from_config(config);
    span(filter.comm_events(state, classifier).map(Interval::from))
}

pub fn computation_time(state: &State, config: &Config) -> Timestamp {
    let filter = EventFilter::from_config(config);
    let classifier = CommClassifier::from_config(config);
    covered_duration(
        filter
            .events(state)
            .filter(|e| !classifier.is_communication(e))
            .map(Interval::from),
    )
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeSummary {
    pub iteration_time: Timestamp,
    pub communication_time: Timestamp,
    pub communication_span: Timestamp,
    pub computation_time: Timestamp,
}

impl TimeSummary {
    pub fn new(state: &State, config: &Config) -> Self {
        TimeSummary {
            iteration_time: iteration_time(state, config),
            communication_time: communication_time(state, config),
            communication_span: communication_span(state, config),
            computation_time: computation_time(state, config),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct OpStats {
    pub invocations: u64,
    pub total_time: Timestamp,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub mean: f64,
    // Running sum of squared differences from the mean (Welford).
    m2: f64,
}

impl OpStats {
    fn new() -> Self {
        OpStats {
            invocations: 0,
            total_time: Timestamp::ZERO,
            min_time: Timestamp(u64::MAX),
            max_time: Timestamp::ZERO,
            mean: 0.0,
            m2: 0.0,
        }
    }

    fn add(&mut self, duration: Timestamp) {
        self.invocations += 1;
        self.total_time = self.total_time + duration;
        self.min_time = min(self.min_time, duration);
        self.max_time = max(self.max_time, duration);
        let value = duration.to_us();
        let delta = value - self.mean;
        self.mean += delta / self.invocations as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Sample standard deviation in microseconds.
    pub fn stddev(&self) -> f64 {
        if self.invocations > 1 {
            (self.m2 / ((self.invocations - 1) as f64)).sqrt()
        } else {
            0.0
        }
    }
}

pub fn accumulate_statistics(state: &State, config: &Config) -> BTreeMap<String, OpStats> {
    let mut statistics = BTreeMap::new();
    for event in EventFilter::from_config(config).events(state) {
        statistics
            .entry(event.op.clone())
            .or_insert_with(OpStats::new)
            .add(event.duration);
    }
    statistics
}

fn print_time(name: &str, us: f64) {
    let threshold = 1000000.0;
    if us < threshold {
        println!("          {}: {:.3} us", name, us);
    } else {
        println!("          {}: {:.3e} us", name, us);
    }
}

fn print_summary(summary: &TimeSummary) {
    println!("");
    println!("  -------------------------");
    println!("  Time Summary");
    println!("  -------------------------");
    println!("");
    print_time("Iteration time", summary.iteration_time.to_us());
    print_time("Computation time", summary.computation_time.to_us());
    print_time("Communication time", summary.communication_time.to_us());
    print_time("Communication span", summary.communication_span.to_us());
}

fn print_op_statistics(statistics: &BTreeMap<String, OpStats>) {
    // Order by total time, longest first. Ties keep op name order.
    let mut ordering = BTreeMap::<Reverse<Timestamp>, Vec<&str>>::new();
    for (op, stats) in statistics {
        ordering
            .entry(Reverse(stats.total_time))
            .or_default()
            .push(op);
    }

    println!("");
    println!("  -------------------------");
    println!("  Op Statistics");
    println!("  -------------------------");
    for ops in ordering.values() {
        for op in ops {
            let stats = &statistics[*op];
            println!("");
            println!("      Op {}", op);
            println!("          Invocations: {}", stats.invocations);
            print_time("Total time", stats.total_time.to_us());
            print_time("Average time", stats.mean);
            print_time("Std Dev", stats.stddev());
            print_time("Min time", stats.min_time.to_us());
            print_time("Max time", stats.max_time.to_us());
        }
    }
}

pub fn print_statistics(state: &State, config: &Config) {
    print_summary(&TimeSummary::new(state, config));
    print_op_statistics(&accumulate_statistics(state, config));
}
