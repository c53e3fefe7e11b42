/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Phase timing for mixed build cycles.
//!
//! Each phase of a cycle (the whole bazel invocation, cquery, aquery, the symlink forest and
//! translation) is timed with an RAII guard. Timings are process global since a cycle may hop
//! between runtime threads.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;

/// File name the metrics table is written to inside the metrics directory.
pub const METRICS_FILE_NAME: &str = "mixed_builds_metrics.txt";

#[derive(Debug, Default, Clone)]
struct Metric {
    name: &'static str,
    count: usize,
    sum: u128,
}

impl Metric {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.sum += elapsed.as_micros();
    }
}

pub struct ScopedMetric {
    name: &'static str,
    start: Instant,
}

impl ScopedMetric {
    pub fn new(name: &'static str) -> Self {
        tracing::trace!(phase = name, "begin");
        ScopedMetric {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedMetric {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        tracing::trace!(phase = self.name, elapsed_us = elapsed.as_micros() as u64, "end");
        if let Ok(mut m) = METRICS.lock() {
            m.record(self.name, elapsed);
        }
    }
}

#[derive(Debug, Default)]
struct Metrics {
    metrics: Vec<Metric>,
}

impl Metrics {
    // Phases are few, a linear scan keeps first-seen order for the report.
    fn record(&mut self, name: &'static str, elapsed: Duration) {
        match self.metrics.iter_mut().find(|m| m.name == name) {
            Some(metric) => metric.record(elapsed),
            None => {
                let mut metric = Metric {
                    name,
                    ..Default::default()
                };
                metric.record(elapsed);
                self.metrics.push(metric);
            }
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = &self.metrics;

        let mut name_width = 7; // To fit "metric ".
        for metric in metrics {
            name_width = std::cmp::max(name_width, metric.name.len());
        }
        writeln!(
            f,
            "{:name_width$} {:>6} {:>9} {:>11}",
            "metric ",
            "count",
            "avg (us)",
            "total (us)",
            name_width = name_width
        )?;
        writeln!(
            f,
            "{:-<name_width$} {:-^6} {:-^9} {:-^11}",
            "",
            "",
            "",
            "",
            name_width = name_width
        )?;
        for metric in metrics {
            writeln!(
                f,
                "{:name_width$} {: >6} {:>9.3} {:>11}",
                metric.name,
                metric.count,
                metric.sum as f64 / metric.count as f64,
                metric.sum,
                name_width = name_width
            )?;
        }
        Ok(())
    }
}

/// Times the rest of the enclosing scope under `$name` when metrics are enabled.
#[macro_export]
macro_rules! scoped_metric {
    ($name:literal) => {
        let _scoped_metric = if $crate::is_enabled() {
            ::core::option::Option::Some($crate::ScopedMetric::new($name))
        } else {
            ::core::option::Option::None
        };
    };
}

static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::default()));
static ENABLED: AtomicBool = AtomicBool::new(false);

pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Renders the current table.
pub fn report() -> String {
    match METRICS.lock() {
        Ok(m) => m.to_string(),
        Err(poisoned) => poisoned.into_inner().to_string(),
    }
}

pub fn dump() {
    eprintln!("{}", report());
}

/// Writes the table to `<dir>/mixed_builds_metrics.txt`, returning the written path.
pub fn write_to(dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(METRICS_FILE_NAME);
    fs::write(&path, report())?;
    Ok(path)
}
