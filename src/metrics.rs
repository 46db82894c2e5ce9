//! Request and prediction metrics for the churn prediction service.
//!
//! Counters are exposed in the Prometheus text exposition format on
//! `/metrics` and summarized periodically in the logs.

use crate::types::prediction::ChurnLabel;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Upper bounds of the churn probability histogram buckets
const PROBABILITY_BUCKETS: [f64; 10] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Latency samples kept for quantile estimation
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector shared by all request handlers
pub struct ServiceMetrics {
    /// Successful predictions
    pub predictions_total: AtomicU64,
    /// Failed predictions
    pub prediction_errors_total: AtomicU64,
    /// Predictions by label
    predictions_by_label: RwLock<HashMap<ChurnLabel, u64>>,
    /// Failures by error kind
    errors_by_kind: RwLock<HashMap<&'static str, u64>>,
    /// HTTP requests by (route, status)
    requests: RwLock<BTreeMap<(String, u16), u64>>,
    /// Prediction latency samples (in microseconds)
    prediction_times: RwLock<Vec<u64>>,
    /// Total prediction latency over all predictions (in microseconds)
    latency_sum_us: AtomicU64,
    /// Churn probability distribution buckets
    probability_buckets: RwLock<[u64; 10]>,
    probability_sum: RwLock<f64>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            predictions_total: AtomicU64::new(0),
            prediction_errors_total: AtomicU64::new(0),
            predictions_by_label: RwLock::new(HashMap::new()),
            errors_by_kind: RwLock::new(HashMap::new()),
            requests: RwLock::new(BTreeMap::new()),
            prediction_times: RwLock::new(Vec::with_capacity(1000)),
            latency_sum_us: AtomicU64::new(0),
            probability_buckets: RwLock::new([0; 10]),
            probability_sum: RwLock::new(0.0),
            start_time: Instant::now(),
        }
    }

    /// Record a completed HTTP request
    pub fn record_request(&self, route: &str, status: u16) {
        if let Ok(mut requests) = self.requests.write() {
            *requests.entry((route.to_string(), status)).or_insert(0) += 1;
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(&self, latency: Duration, probability: f64, label: ChurnLabel) {
        self.predictions_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_label) = self.predictions_by_label.write() {
            *by_label.entry(label).or_insert(0) += 1;
        }

        let latency_us = latency.as_micros() as u64;
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        if let Ok(mut times) = self.prediction_times.write() {
            times.push(latency_us);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        let bucket = ((probability * 10.0).ceil() as usize).clamp(1, 10) - 1;
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }
        if let Ok(mut sum) = self.probability_sum.write() {
            *sum += probability;
        }
    }

    /// Record a failed prediction
    pub fn record_error(&self, kind: &'static str) {
        self.prediction_errors_total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.errors_by_kind.write() {
            *by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    /// Get prediction latency statistics
    pub fn get_latency_stats(&self) -> LatencyStats {
        let Ok(times) = self.prediction_times.read() else {
            return LatencyStats::default();
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (predictions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_total.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_predictions_by_label(&self) -> HashMap<ChurnLabel, u64> {
        self.predictions_by_label
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_probability_distribution(&self) -> [u64; 10] {
        self.probability_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render_prometheus(&self, model_loaded: bool) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP churn_http_requests_total HTTP requests by route and status");
        let _ = writeln!(out, "# TYPE churn_http_requests_total counter");
        if let Ok(requests) = self.requests.read() {
            for ((route, status), count) in requests.iter() {
                let _ = writeln!(
                    out,
                    "churn_http_requests_total{{handler=\"{}\",status=\"{}\"}} {}",
                    route, status, count
                );
            }
        }

        let _ = writeln!(out, "# HELP churn_predictions_total Successful predictions by label");
        let _ = writeln!(out, "# TYPE churn_predictions_total counter");
        let by_label = self.get_predictions_by_label();
        for label in [ChurnLabel::Churn, ChurnLabel::NoChurn] {
            let _ = writeln!(
                out,
                "churn_predictions_total{{label=\"{}\"}} {}",
                label,
                by_label.get(&label).copied().unwrap_or(0)
            );
        }

        let _ = writeln!(out, "# HELP churn_prediction_errors_total Failed predictions by kind");
        let _ = writeln!(out, "# TYPE churn_prediction_errors_total counter");
        if let Ok(by_kind) = self.errors_by_kind.read() {
            let mut kinds: Vec<_> = by_kind.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                let _ = writeln!(out, "churn_prediction_errors_total{{kind=\"{}\"}} {}", kind, count);
            }
        }

        let _ = writeln!(out, "# HELP churn_probability Distribution of predicted churn probabilities");
        let _ = writeln!(out, "# TYPE churn_probability histogram");
        let buckets = self.get_probability_distribution();
        let mut cumulative = 0;
        for (upper, count) in PROBABILITY_BUCKETS.iter().zip(buckets.iter()) {
            cumulative += count;
            let _ = writeln!(out, "churn_probability_bucket{{le=\"{:.1}\"}} {}", upper, cumulative);
        }
        let _ = writeln!(out, "churn_probability_bucket{{le=\"+Inf\"}} {}", cumulative);
        let sum = self.probability_sum.read().map(|s| *s).unwrap_or(0.0);
        let _ = writeln!(out, "churn_probability_sum {}", sum);
        let _ = writeln!(out, "churn_probability_count {}", cumulative);

        let latency = self.get_latency_stats();
        let _ = writeln!(out, "# HELP churn_prediction_latency_seconds Prediction latency");
        let _ = writeln!(out, "# TYPE churn_prediction_latency_seconds summary");
        for (quantile, value) in [("0.5", latency.p50_us), ("0.95", latency.p95_us), ("0.99", latency.p99_us)] {
            let _ = writeln!(
                out,
                "churn_prediction_latency_seconds{{quantile=\"{}\"}} {}",
                quantile,
                value as f64 / 1e6
            );
        }
        // Sum and count cover every prediction, not just the sample window.
        let _ = writeln!(
            out,
            "churn_prediction_latency_seconds_sum {}",
            self.latency_sum_us.load(Ordering::Relaxed) as f64 / 1e6
        );
        let _ = writeln!(
            out,
            "churn_prediction_latency_seconds_count {}",
            self.predictions_total.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP churn_model_loaded Whether the model artifact loaded");
        let _ = writeln!(out, "# TYPE churn_model_loaded gauge");
        let _ = writeln!(out, "churn_model_loaded {}", u8::from(model_loaded));

        let _ = writeln!(out, "# HELP churn_uptime_seconds Seconds since process start");
        let _ = writeln!(out, "# TYPE churn_uptime_seconds gauge");
        let _ = writeln!(out, "churn_uptime_seconds {:.3}", self.uptime().as_secs_f64());

        out
    }

    /// Log a summary of the metrics collected so far
    pub fn print_summary(&self) {
        let predictions = self.predictions_total.load(Ordering::Relaxed);
        let errors = self.prediction_errors_total.load(Ordering::Relaxed);
        let by_label = self.get_predictions_by_label();
        let churn = by_label.get(&ChurnLabel::Churn).copied().unwrap_or(0);
        let churn_rate = if predictions > 0 {
            (churn as f64 / predictions as f64) * 100.0
        } else {
            0.0
        };
        let latency = self.get_latency_stats();

        info!(
            predictions = predictions,
            errors = errors,
            churn_rate = format!("{:.1}%", churn_rate),
            throughput = format!("{:.2} pred/s", self.get_throughput()),
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            "Metrics summary"
        );
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prediction latency statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodic metrics summary logger
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_prediction(Duration::from_micros(100), 0.73, ChurnLabel::Churn);
        metrics.record_prediction(Duration::from_micros(300), 0.05, ChurnLabel::NoChurn);
        metrics.record_prediction(Duration::from_micros(200), 0.0, ChurnLabel::NoChurn);
        metrics.record_error("encoding");

        assert_eq!(metrics.predictions_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.prediction_errors_total.load(Ordering::Relaxed), 1);

        let by_label = metrics.get_predictions_by_label();
        assert_eq!(by_label.get(&ChurnLabel::Churn), Some(&1));
        assert_eq!(by_label.get(&ChurnLabel::NoChurn), Some(&2));

        let dist = metrics.get_probability_distribution();
        assert_eq!(dist[0], 2);
        assert_eq!(dist[7], 1);

        let latency = metrics.get_latency_stats();
        assert_eq!(latency.count, 3);
        assert_eq!(latency.mean_us, 200);
        assert_eq!(latency.max_us, 300);
    }

    #[test]
    fn test_probability_bucket_edges() {
        let metrics = ServiceMetrics::new();
        metrics.record_prediction(Duration::ZERO, 1.0, ChurnLabel::Churn);
        metrics.record_prediction(Duration::ZERO, 0.5, ChurnLabel::Churn);
        let dist = metrics.get_probability_distribution();
        assert_eq!(dist[9], 1);
        assert_eq!(dist[4], 1);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = ServiceMetrics::new();
        metrics.record_request("/predict", 200);
        metrics.record_request("/predict", 200);
        metrics.record_request("/health", 503);
        metrics.record_prediction(Duration::from_micros(150), 0.42, ChurnLabel::NoChurn);
        metrics.record_error("model");

        let text = metrics.render_prometheus(true);
        assert!(text.contains("churn_http_requests_total{handler=\"/predict\",status=\"200\"} 2"));
        assert!(text.contains("churn_http_requests_total{handler=\"/health\",status=\"503\"} 1"));
        assert!(text.contains("churn_predictions_total{label=\"No Churn\"} 1"));
        assert!(text.contains("churn_predictions_total{label=\"Churn\"} 0"));
        assert!(text.contains("churn_prediction_errors_total{kind=\"model\"} 1"));
        assert!(text.contains("churn_probability_bucket{le=\"0.4\"} 0"));
        assert!(text.contains("churn_probability_bucket{le=\"0.5\"} 1"));
        assert!(text.contains("churn_probability_count 1"));
        assert!(text.contains("churn_model_loaded 1"));
    }

    #[test]
    fn test_latency_sum_is_exact() {
        let metrics = ServiceMetrics::new();
        for us in [100, 300, 201] {
            metrics.record_prediction(Duration::from_micros(us), 0.3, ChurnLabel::NoChurn);
        }

        let text = metrics.render_prometheus(true);
        assert!(text.contains("churn_prediction_latency_seconds_sum 0.000601\n"));
        assert!(text.contains("churn_prediction_latency_seconds_count 3\n"));
    }
}
