use std::collections::HashMap;
use std::time::Instant;

/// Run-level logging for the clustering engine.
///
/// The engine reports what it did through this trait so the CLI can print
/// timings and a summary while a GUI or a test stays silent.
pub trait ClusteringLogger: Send {
    /// Called before every run so per-run figures start from zero.
    /// Default: no-op.
    fn begin_run(&mut self) {}

    /// Batch-level progress.
    fn progress(&mut self, completed: usize, total: usize);

    /// How long a named stage (`match`, `merge`, ...) took for one batch.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Point-in-time metric, e.g. merges in a batch.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// End-of-run summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullClusteringLogger;

impl ClusteringLogger for NullClusteringLogger {
    fn progress(&mut self, _completed: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Logger backed by the `log` facade.
///
/// Keeps every timing and metric sample for the summary. Progress lines are
/// emitted every `throttle_batches` batches and on the last one.
pub struct LogClusteringLogger {
    throttle_batches: usize,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    total_batches: usize,
    face_count: usize,
}

impl LogClusteringLogger {
    pub fn new(throttle_batches: usize) -> Self {
        Self {
            throttle_batches: throttle_batches.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            total_batches: 0,
            face_count: 0,
        }
    }

    /// Returns the formatted summary of the current run, or `None` if
    /// nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Clustering summary ({} batches, {:.1}s total):",
            self.total_batches,
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = mean(durations);
            lines.push(format!(
                "  {stage:12}: avg {avg_ms:8.1}ms  total {total_ms:9.0}ms"
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            let values = &self.metrics[name];
            let total: f64 = values.iter().sum();
            lines.push(format!("  {name}: total {total:.0}  avg {:.1}", mean(values)));
        }

        if self.face_count > 0 && elapsed_ms > 0.0 {
            let rate = self.face_count as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {rate:.0} faces/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

impl Default for LogClusteringLogger {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ClusteringLogger for LogClusteringLogger {
    fn begin_run(&mut self) {
        self.timings.clear();
        self.metrics.clear();
        self.start_time = Instant::now();
        self.total_batches = 0;
        self.face_count = 0;
    }

    fn progress(&mut self, completed: usize, total: usize) {
        self.total_batches = total;
        if total > 0 && (completed % self.throttle_batches == 0 || completed == total) {
            let pct = completed as f64 / total as f64 * 100.0;
            log::info!("Clustering: {completed}/{total} batches ({pct:.1}%)");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        if name == "faces" {
            self.face_count += value as usize;
        }
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
