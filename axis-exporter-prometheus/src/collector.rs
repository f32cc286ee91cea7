//! Metric collector that stores device gauges and renders them for Prometheus.
//!
//! One collector is created at startup and shared by every scrape. Each
//! scrape overwrites the gauges for its own label sets and then renders
//! the full state.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::mapping::{MetricKind, MetricObservation, REQUEST_PROCESSING_SECONDS, describe};

/// A unique identifier for a metric time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// The full Prometheus metric name.
    pub name: String,
    /// Label key-value pairs, in declared order.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Create a series key from an observation.
    pub fn from_observation(observation: &MetricObservation) -> Self {
        Self {
            name: observation.name.clone(),
            labels: observation.labels.clone(),
        }
    }

    /// Format labels for Prometheus exposition format.
    pub fn format_labels(&self) -> String {
        format_labels(&self.labels)
    }
}

/// Running count and sum of an unlabeled summary.
#[derive(Debug, Clone, Copy, Default)]
struct SummaryState {
    count: u64,
    sum: f64,
}

/// Collector statistics.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Scrapes that produced a metrics response.
    pub scrapes_served: u64,
    /// Scrapes that failed while talking to the device.
    pub scrapes_failed: u64,
    /// Requests rejected during parameter validation.
    pub requests_rejected: u64,
}

/// Thread-safe metric collector.
///
/// Series are never expired: a camera that is no longer scraped keeps its
/// last values in the output until the process restarts.
pub struct MetricCollector {
    /// Gauge values indexed by series key.
    gauges: RwLock<HashMap<SeriesKey, f64>>,
    /// Scrape duration summary.
    request_duration: Mutex<SummaryState>,
    /// Statistics.
    stats: RwLock<CollectorStats>,
}

impl MetricCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            gauges: RwLock::new(HashMap::new()),
            request_duration: Mutex::new(SummaryState::default()),
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    /// Set a gauge to the observed value, replacing any previous value.
    pub fn set_gauge(&self, observation: &MetricObservation) {
        let key = SeriesKey::from_observation(observation);
        trace!(
            metric = %key.name,
            labels = %key.format_labels(),
            value = observation.value,
            "Setting gauge"
        );
        self.gauges.write().insert(key, observation.value);
    }

    /// Record every observation of one scrape.
    pub fn record(&self, observations: &[MetricObservation]) {
        let mut gauges = self.gauges.write();
        for observation in observations {
            gauges.insert(SeriesKey::from_observation(observation), observation.value);
        }
        drop(gauges);

        self.stats.write().scrapes_served += 1;
    }

    /// Add one scrape duration to the request summary.
    pub fn observe_request_duration(&self, elapsed: Duration) {
        let mut summary = self.request_duration.lock();
        summary.count += 1;
        summary.sum += elapsed.as_secs_f64();
    }

    /// Count a scrape that failed while talking to the device.
    pub fn record_failure(&self) {
        self.stats.write().scrapes_failed += 1;
    }

    /// Count a request rejected during parameter validation.
    pub fn record_rejection(&self) {
        self.stats.write().requests_rejected += 1;
    }

    /// Current value of a gauge series.
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.gauges.read().get(&key).copied()
    }

    /// Number of recorded request durations.
    pub fn request_count(&self) -> u64 {
        self.request_duration.lock().count
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.gauges.read().len()
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let gauges = self.gauges.read();
        let mut output = Vec::with_capacity(gauges.len() * 100 + 256);

        // Group series by name for HELP/TYPE comments
        let mut by_name: HashMap<&str, Vec<(&SeriesKey, f64)>> = HashMap::new();
        for (key, value) in gauges.iter() {
            by_name.entry(&key.name).or_default().push((key, *value));
        }

        // Sort by metric name for consistent output
        let mut names: Vec<_> = by_name.keys().copied().collect();
        names.sort_unstable();

        for name in names {
            let mut series = by_name.remove(name).unwrap_or_default();
            series.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

            let kind = match describe(name) {
                Some(descriptor) => {
                    writeln!(output, "# HELP {} {}", name, escape_help(descriptor.help)).ok();
                    descriptor.kind
                }
                None => MetricKind::Gauge,
            };
            writeln!(output, "# TYPE {} {}", name, kind.as_str()).ok();

            for (key, value) in series {
                writeln!(
                    output,
                    "{}{} {}",
                    key.name,
                    key.format_labels(),
                    format_value(value)
                )
                .ok();
            }
        }
        drop(gauges);

        let summary = *self.request_duration.lock();
        let name = REQUEST_PROCESSING_SECONDS.name;
        writeln!(
            output,
            "# HELP {} {}",
            name,
            escape_help(REQUEST_PROCESSING_SECONDS.help)
        )
        .ok();
        writeln!(
            output,
            "# TYPE {} {}",
            name,
            REQUEST_PROCESSING_SECONDS.kind.as_str()
        )
        .ok();
        writeln!(output, "{}_count {}", name, summary.count).ok();
        writeln!(output, "{}_sum {}", name, format_value(summary.sum)).ok();

        String::from_utf8(output).unwrap_or_default()
    }
}

impl Default for MetricCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<MetricCollector>;

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(host: &str, sensor: &str, value: f64) -> MetricObservation {
        MetricObservation {
            name: "axis_temp".to_string(),
            labels: vec![
                ("product_name".to_string(), "Q6075-E".to_string()),
                ("node".to_string(), host.to_string()),
                ("sensor_name".to_string(), sensor.to_string()),
            ],
            value,
        }
    }

    #[test]
    fn test_series_key_format_labels() {
        let key = SeriesKey {
            name: "test_metric".to_string(),
            labels: vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        };

        assert_eq!(key.format_labels(), "{a=\"1\",b=\"2\"}");
    }

    #[test]
    fn test_set_gauge_overwrites() {
        let collector = MetricCollector::new();

        collector.set_gauge(&temp("cam1", "Main", 100.0));
        collector.set_gauge(&temp("cam1", "Main", 98.5));

        assert_eq!(collector.series_count(), 1);
        assert_eq!(
            collector.gauge(
                "axis_temp",
                &[
                    ("product_name", "Q6075-E"),
                    ("node", "cam1"),
                    ("sensor_name", "Main")
                ]
            ),
            Some(98.5)
        );
    }

    #[test]
    fn test_distinct_label_sets() {
        let collector = MetricCollector::new();

        collector.record(&[temp("cam1", "Main", 100.0), temp("cam2", "Main", 80.0)]);

        assert_eq!(collector.series_count(), 2);
        assert_eq!(collector.stats().scrapes_served, 1);
    }

    #[test]
    fn test_render_families() {
        let collector = MetricCollector::new();
        collector.record(&[temp("cam1", "Main", 101.3), temp("cam1", "CPU", 123.0)]);
        collector.observe_request_duration(Duration::from_millis(250));

        let output = collector.render();

        assert!(output.contains("# HELP axis_temp Axis Communications camera temperature reading"));
        assert!(output.contains("# TYPE axis_temp gauge"));
        assert!(output.contains(
            "axis_temp{product_name=\"Q6075-E\",node=\"cam1\",sensor_name=\"Main\"} 101.3"
        ));
        assert!(output.contains(
            "axis_temp{product_name=\"Q6075-E\",node=\"cam1\",sensor_name=\"CPU\"} 123"
        ));
        assert!(output.contains("# TYPE request_processing_seconds summary"));
        assert!(output.contains("request_processing_seconds_count 1"));
        assert!(output.contains("request_processing_seconds_sum 0.25"));

        // HELP/TYPE emitted once per family
        assert_eq!(output.matches("# TYPE axis_temp").count(), 1);
    }

    #[test]
    fn test_render_empty_collector() {
        let output = MetricCollector::new().render();

        assert!(!output.contains("axis_temp"));
        assert!(output.contains("request_processing_seconds_count 0"));
        assert!(output.contains("request_processing_seconds_sum 0"));
    }

    #[test]
    fn test_render_sorted() {
        let collector = MetricCollector::new();
        collector.record(&[
            temp("cam1", "Zeta", 1.0),
            temp("cam1", "Alpha", 2.0),
            MetricObservation {
                name: "axis_heater_status".to_string(),
                labels: vec![
                    ("product_name".to_string(), "Q6075-E".to_string()),
                    ("node".to_string(), "cam1".to_string()),
                    ("heater_id".to_string(), "H0".to_string()),
                ],
                value: 1.0,
            },
        ]);

        let output = collector.render();
        let heater = output.find("# TYPE axis_heater_status").unwrap();
        let temp_pos = output.find("# TYPE axis_temp").unwrap();
        let summary = output.find("# TYPE request_processing_seconds").unwrap();
        assert!(heater < temp_pos && temp_pos < summary);

        let alpha = output.find("sensor_name=\"Alpha\"").unwrap();
        let zeta = output.find("sensor_name=\"Zeta\"").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_unknown_family_renders_as_gauge() {
        let collector = MetricCollector::new();
        collector.set_gauge(&MetricObservation {
            name: "custom_metric".to_string(),
            labels: Vec::new(),
            value: 7.0,
        });

        let output = collector.render();
        assert!(output.contains("# TYPE custom_metric gauge"));
        assert!(output.contains("custom_metric 7"));
        assert!(!output.contains("# HELP custom_metric"));
    }

    #[test]
    fn test_stats_counters() {
        let collector = MetricCollector::new();
        collector.record_failure();
        collector.record_rejection();
        collector.record_rejection();

        let stats = collector.stats();
        assert_eq!(stats.scrapes_served, 0);
        assert_eq!(stats.scrapes_failed, 1);
        assert_eq!(stats.requests_rejected, 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let collector = Arc::new(MetricCollector::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    let host = format!("cam{}", i);
                    for n in 0..100 {
                        collector.set_gauge(&temp(&host, "Main", (i * 1000 + n) as f64));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.series_count(), 8);
        for i in 0..8 {
            let host = format!("cam{}", i);
            assert_eq!(
                collector.gauge(
                    "axis_temp",
                    &[
                        ("product_name", "Q6075-E"),
                        ("node", host.as_str()),
                        ("sensor_name", "Main")
                    ]
                ),
                Some((i * 1000 + 99) as f64)
            );
        }
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(101.3), "101.3");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
