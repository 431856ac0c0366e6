use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Named cumulative wall-clock timers.
///
/// A timer accumulates across start/stop pairs; `elapsed` drains the
/// accumulated total (stopping a running timer first and restarting it
/// after, so an interval timer can be read repeatedly mid-run).
#[derive(Debug, Default)]
pub struct Timers {
    timers: HashMap<&'static str, Stopwatch>,
}

#[derive(Debug, Default)]
struct Stopwatch {
    total: Duration,
    started: Option<Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, name: &'static str) {
        let watch = self.timers.entry(name).or_default();
        if watch.started.is_none() {
            watch.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self, name: &'static str) {
        if let Some(watch) = self.timers.get_mut(name) {
            if let Some(at) = watch.started.take() {
                watch.total += at.elapsed();
            }
        }
    }

    /// Drains and returns the accumulated time for `name`.
    pub fn elapsed(&mut self, name: &'static str) -> Duration {
        let watch = self.timers.entry(name).or_default();
        let mut total = std::mem::take(&mut watch.total);
        if let Some(at) = watch.started.take() {
            total += at.elapsed();
            watch.started = Some(Instant::now());
        }
        total
    }
}
