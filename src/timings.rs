// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-path request timings.
//!
//! [`RequestTimings`] is constructed once by the host and shared by
//! reference; there is no process-wide table. Each path tracks runs,
//! total/min/max duration and how many of its responses were full renders
//! (as opposed to served from a cache), so a report shows the cached share.
//!
//! Only one run per path is timed at a time. Overlapping requests for a path
//! already being timed are not counted.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::metrics;

#[derive(Debug, Clone, Default)]
struct PathTiming {
    runs: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    full_renders: u64,
    in_progress: bool,
}

/// One path's line in a [`TimingReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStats {
    pub path: String,
    pub runs: u64,
    pub total_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub avg_secs: f64,
    pub full_renders: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingReport {
    /// Paths with at least one completed run, sorted by path
    pub paths: Vec<PathStats>,
    pub total_secs: f64,
    pub total_runs: u64,
    pub avg_secs: f64,
    pub total_full_renders: u64,
}

#[derive(Debug, Default)]
pub struct RequestTimings {
    paths: DashMap<String, PathTiming>,
}

impl RequestTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin timing a request for `url` (query and fragment are ignored).
    ///
    /// `None` if a run for the same path is already being timed. The run
    /// is recorded when the guard drops.
    pub fn start(&self, url: &str) -> Option<RunGuard<'_>> {
        let path = request_path(url).to_string();
        {
            let mut timing = self.paths.entry(path.clone()).or_default();
            if timing.in_progress {
                return None;
            }
            timing.in_progress = true;
        }
        Some(RunGuard {
            timings: self,
            path,
            started: Instant::now(),
        })
    }

    /// Record a completed run of `path` that took `elapsed`.
    pub fn record(&self, path: &str, elapsed: Duration) {
        let mut timing = self.paths.entry(path.to_string()).or_default();
        timing.runs += 1;
        timing.total += elapsed;
        timing.min = Some(timing.min.map_or(elapsed, |m| m.min(elapsed)));
        timing.max = Some(timing.max.map_or(elapsed, |m| m.max(elapsed)));
        timing.in_progress = false;
        drop(timing);

        metrics::record_request(path, elapsed);
        debug!(path, elapsed_ms = elapsed.as_millis() as u64, "Request timed");
    }

    /// Count a response for `url` that was rendered rather than served cached.
    pub fn record_full_render(&self, url: &str) {
        self.paths
            .entry(request_path(url).to_string())
            .or_default()
            .full_renders += 1;
    }

    pub fn report(&self) -> TimingReport {
        let mut by_path = BTreeMap::new();
        for entry in self.paths.iter() {
            by_path.insert(entry.key().clone(), entry.value().clone());
        }

        let mut report = TimingReport {
            paths: Vec::new(),
            total_secs: 0.0,
            total_runs: 0,
            avg_secs: 0.0,
            total_full_renders: 0,
        };
        for (path, timing) in by_path {
            report.total_full_renders += timing.full_renders;
            if timing.runs == 0 {
                continue;
            }
            let total_secs = timing.total.as_secs_f64();
            report.total_secs += total_secs;
            report.total_runs += timing.runs;
            report.paths.push(PathStats {
                path,
                runs: timing.runs,
                total_secs,
                min_secs: timing.min.unwrap_or_default().as_secs_f64(),
                max_secs: timing.max.unwrap_or_default().as_secs_f64(),
                avg_secs: total_secs / timing.runs as f64,
                full_renders: timing.full_renders,
            });
        }
        if report.total_runs > 0 {
            report.avg_secs = report.total_secs / report.total_runs as f64;
        }
        report
    }

    /// Forget every path.
    pub fn reset(&self) {
        self.paths.clear();
    }
}

/// Records its run on drop.
pub struct RunGuard<'a> {
    timings: &'a RequestTimings,
    path: String,
    started: Instant,
}

impl RunGuard<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.timings.record(&self.path, self.started.elapsed());
    }
}

/// Path component of a request URL.
fn request_path(url: &str) -> &str {
    let without_scheme = match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => url,
    };
    let end = without_scheme.find(['?', '#']).unwrap_or(without_scheme.len());
    &without_scheme[..end]
}
