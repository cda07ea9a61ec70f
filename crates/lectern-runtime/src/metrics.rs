//! Per-task-type operational metrics.
//!
//! Counts successes, failures by reason, retries and cache hits, keeps a
//! bounded window of latency samples, and totals token usage. All updates go
//! through one lock so each recording is atomic with respect to others.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Write as _};
use std::time::Duration;

use crate::providers::TokenUsage;

/// Why a run failed, as counted in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Caller error: unknown task type, bad context, unknown provider
    Usage,
    /// Circuit was open, backend not called
    CircuitBreaker,
    /// Backend failed or returned unparsable output after every retry
    Provider,
    /// Response failed schema validation
    Validation,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Usage => "usage",
            FailureReason::CircuitBreaker => "circuit_breaker",
            FailureReason::Provider => "provider",
            FailureReason::Validation => "validation",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics recorder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Latency samples kept per task type
    pub latency_samples: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_samples: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct TaskMetrics {
    successes: u64,
    failures: BTreeMap<FailureReason, u64>,
    retries: u64,
    cache_hits: u64,
    latencies: VecDeque<Duration>,
    usage: UsageTotals,
}

/// Token usage totals for one task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub llm_calls: u64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Latency summary in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_samples(samples: &VecDeque<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut millis: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        millis.sort_by(|a, b| a.total_cmp(b));

        Self {
            samples: millis.len(),
            mean_ms: millis.iter().sum::<f64>() / millis.len() as f64,
            p50_ms: percentile(&millis, 0.50),
            p95_ms: percentile(&millis, 0.95),
            max_ms: millis[millis.len() - 1],
        }
    }
}

// Nearest-rank percentile over sorted, non-empty input.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Point-in-time metrics for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetricsSnapshot {
    pub success_count: u64,
    pub failure_counts: BTreeMap<FailureReason, u64>,
    pub retry_count: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub latency: LatencySummary,
    pub usage: UsageTotals,
}

impl TaskMetricsSnapshot {
    pub fn failure_count(&self, reason: FailureReason) -> u64 {
        self.failure_counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> u64 {
        self.failure_counts.values().sum()
    }
}

/// Metrics for every task type that has seen traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks: BTreeMap<String, TaskMetricsSnapshot>,
}

impl MetricsSnapshot {
    pub fn task(&self, task_type: &str) -> Option<&TaskMetricsSnapshot> {
        self.tasks.get(task_type)
    }
}

/// Shared metrics recorder.
pub struct MetricsRecorder {
    tasks: RwLock<BTreeMap<String, TaskMetrics>>,
    config: MetricsConfig,
}

impl MetricsRecorder {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    fn update(&self, task_type: &str, f: impl FnOnce(&mut TaskMetrics)) {
        let mut tasks = self.tasks.write();
        f(tasks.entry(task_type.to_string()).or_default());
    }

    /// Record a completed run. Cache hits count as successes too.
    pub fn record_success(&self, task_type: &str, latency: Duration, cache_hit: bool) {
        let capacity = self.config.latency_samples.max(1);
        self.update(task_type, |m| {
            m.successes += 1;
            if cache_hit {
                m.cache_hits += 1;
            }
            if m.latencies.len() == capacity {
                m.latencies.pop_front();
            }
            m.latencies.push_back(latency);
        });
    }

    pub fn record_failure(&self, task_type: &str, reason: FailureReason) {
        self.update(task_type, |m| {
            *m.failures.entry(reason).or_insert(0) += 1;
        });
    }

    /// Record one retry attempt (every attempt after the first).
    pub fn record_retry(&self, task_type: &str) {
        self.update(task_type, |m| m.retries += 1);
    }

    /// Record token usage of one backend call.
    pub fn record_usage(&self, task_type: &str, usage: &TokenUsage) {
        self.update(task_type, |m| {
            m.usage.prompt_tokens += u64::from(usage.prompt_tokens);
            m.usage.completion_tokens += u64::from(usage.completion_tokens);
            m.usage.llm_calls += 1;
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let tasks = self.tasks.read();
        MetricsSnapshot {
            tasks: tasks
                .iter()
                .map(|(task_type, m)| {
                    let snapshot = TaskMetricsSnapshot {
                        success_count: m.successes,
                        failure_counts: m.failures.clone(),
                        retry_count: m.retries,
                        cache_hits: m.cache_hits,
                        cache_hit_rate: if m.successes == 0 {
                            0.0
                        } else {
                            m.cache_hits as f64 / m.successes as f64
                        },
                        latency: LatencySummary::from_samples(&m.latencies),
                        usage: m.usage,
                    };
                    (task_type.clone(), snapshot)
                })
                .collect(),
        }
    }

    /// Human-readable report, one block per task type.
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::from("Task metrics\n");
        if snapshot.tasks.is_empty() {
            out.push_str("  (no runs recorded)\n");
            return out;
        }

        for (task_type, m) in &snapshot.tasks {
            let _ = writeln!(out, "  {task_type}");
            let _ = writeln!(
                out,
                "    successes: {} (cache hits: {}, {:.1}%)",
                m.success_count,
                m.cache_hits,
                m.cache_hit_rate * 100.0
            );
            if m.failure_counts.is_empty() {
                let _ = writeln!(out, "    failures:  0");
            } else {
                let parts: Vec<String> = m
                    .failure_counts
                    .iter()
                    .map(|(reason, count)| format!("{reason}={count}"))
                    .collect();
                let _ = writeln!(out, "    failures:  {}", parts.join(", "));
            }
            let _ = writeln!(out, "    retries:   {}", m.retry_count);
            let _ = writeln!(
                out,
                "    latency:   n={} mean={:.1}ms p50={:.1}ms p95={:.1}ms max={:.1}ms",
                m.latency.samples, m.latency.mean_ms, m.latency.p50_ms, m.latency.p95_ms, m.latency.max_ms
            );
            let _ = writeln!(
                out,
                "    tokens:    {} in / {} out over {} calls",
                m.usage.prompt_tokens, m.usage.completion_tokens, m.usage.llm_calls
            );
        }
        out
    }

    /// Print [`report`](Self::report) to stdout.
    pub fn print_report(&self) {
        print!("{}", self.report());
    }

    pub fn reset(&self) {
        self.tasks.write().clear();
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_task_type() {
        let metrics = MetricsRecorder::default();
        metrics.record_success("eli5", Duration::from_millis(10), false);
        metrics.record_success("eli5", Duration::from_millis(1), true);
        metrics.record_failure("eli5", FailureReason::Provider);
        metrics.record_failure("hint", FailureReason::Usage);
        metrics.record_retry("eli5");
        metrics.record_retry("eli5");

        let snapshot = metrics.snapshot();
        let eli5 = snapshot.task("eli5").unwrap();
        assert_eq!(eli5.success_count, 2);
        assert_eq!(eli5.cache_hits, 1);
        assert_eq!(eli5.cache_hit_rate, 0.5);
        assert_eq!(eli5.retry_count, 2);
        assert_eq!(eli5.failure_count(FailureReason::Provider), 1);
        assert_eq!(eli5.failure_count(FailureReason::Validation), 0);

        let hint = snapshot.task("hint").unwrap();
        assert_eq!(hint.success_count, 0);
        assert_eq!(hint.total_failures(), 1);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = MetricsRecorder::new(MetricsConfig { latency_samples: 4 });
        for ms in 1..=10 {
            metrics.record_success("quiz", Duration::from_millis(ms), false);
        }

        let latency = metrics.snapshot().task("quiz").unwrap().latency;
        assert_eq!(latency.samples, 4);
        // Only 7, 8, 9, 10 remain
        assert!((latency.mean_ms - 8.5).abs() < 1e-6);
        assert!((latency.max_ms - 10.0).abs() < 1e-6);
        assert!((latency.p50_ms - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.50), 10.0);
        assert_eq!(percentile(&sorted, 0.95), 19.0);
        assert_eq!(percentile(&[3.0], 0.95), 3.0);
    }

    #[test]
    fn test_usage_totals() {
        let metrics = MetricsRecorder::default();
        let usage = TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
        };
        metrics.record_usage("summary", &usage);
        metrics.record_usage("summary", &usage);

        let totals = metrics.snapshot().task("summary").unwrap().usage;
        assert_eq!(totals.llm_calls, 2);
        assert_eq!(totals.total_tokens(), 300);
    }

    #[test]
    fn test_report_and_reset() {
        let metrics = MetricsRecorder::default();
        assert!(metrics.report().contains("no runs recorded"));

        metrics.record_success("eli5", Duration::from_millis(5), false);
        metrics.record_failure("eli5", FailureReason::CircuitBreaker);
        let report = metrics.report();
        assert!(report.contains("eli5"));
        assert!(report.contains("circuit_breaker=1"));

        metrics.reset();
        assert!(metrics.snapshot().tasks.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_reason_keys() {
        let metrics = MetricsRecorder::default();
        metrics.record_failure("eli5", FailureReason::Validation);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["tasks"]["eli5"]["failure_counts"]["validation"], 1);
    }
}
