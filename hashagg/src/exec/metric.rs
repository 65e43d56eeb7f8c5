//! Metrics for physical operator
//!
//! Metrics are atomics such that they can be read through `&self` while the operator is
//! not running, for example when the plan is explained after execution

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

/// Measure a potentially non contiguous duration of time, in nanoseconds
#[derive(Debug, Default)]
pub struct Time(AtomicU64);

impl Time {
    /// Add duration to the time metric
    #[inline]
    pub fn add_duration(&self, duration: Duration) {
        self.0.fetch_add(duration.as_nanos() as _, Relaxed);
    }

    /// Get the accumulated duration
    #[inline]
    pub fn value(&self) -> Duration {
        Duration::from_nanos(self.0.load(Relaxed))
    }

    /// Clear the time
    #[inline]
    pub fn reset(&self) {
        self.0.store(0, Relaxed);
    }
}

/// Count of something
#[derive(Debug, Default)]
pub struct Count(AtomicU64);

impl Count {
    /// Add n to the count
    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Relaxed);
    }

    /// Overwrite the count
    #[inline]
    pub fn set(&self, n: u64) {
        self.0.store(n, Relaxed);
    }

    /// Get the count
    #[inline]
    pub fn value(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

/// A float number that is overwritten, for example a ratio
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Set the value of the gauge
    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Relaxed);
    }

    /// Get the value of the gauge
    #[inline]
    pub fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Relaxed))
    }
}

/// Value of the metric in the snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Snapshot of [`Count`]
    Count(u64),
    /// Snapshot of [`Time`]
    Time(Duration),
    /// Snapshot of [`Gauge`]
    Gauge(f64),
}

impl Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{}", count),
            Self::Time(time) => write!(f, "{:?}", time),
            Self::Gauge(gauge) => write!(f, "{:.3}", gauge),
        }
    }
}

/// Snapshot of the metrics of an operator, derived with `MetricsSetBuilder`
#[derive(Debug, Clone)]
pub struct MetricsSet {
    /// Name of the metrics struct
    pub name: &'static str,
    /// Metric name to its value, ordered by name
    pub metrics: BTreeMap<&'static str, MetricValue>,
}

impl MetricsSet {
    /// Get the metric with given name
    #[inline]
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Get the count with given name, returns `None` if the metric is not a count
    pub fn count(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            MetricValue::Count(count) => Some(count),
            _ => None,
        }
    }
}

impl Display for MetricsSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {{", self.name)?;
        let mut iter = self.metrics.iter();
        if let Some((name, value)) = iter.next() {
            write!(f, "{}: {}", name, value)?;
            iter.try_for_each(|(name, value)| write!(f, ", {}: {}", name, value))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let time = Time::default();
        time.add_duration(Duration::from_micros(3));
        time.add_duration(Duration::from_micros(4));
        assert_eq!(time.value(), Duration::from_micros(7));

        let gauge = Gauge::default();
        gauge.set(0.5);
        assert_eq!(gauge.value(), 0.5);

        let count = Count::default();
        count.add(3);
        count.add(4);
        assert_eq!(count.value(), 7);
    }

    #[test]
    fn test_display_metrics_set() {
        let metrics_set = MetricsSet {
            name: "AggregationNodeMetrics",
            metrics: [
                ("num_groups", MetricValue::Count(2)),
                ("load_factor", MetricValue::Gauge(0.25)),
            ]
            .into_iter()
            .collect(),
        };
        assert_eq!(
            metrics_set.to_string(),
            "AggregationNodeMetrics: {load_factor: 0.250, num_groups: 2}"
        );
        assert_eq!(metrics_set.count("num_groups"), Some(2));
        assert_eq!(metrics_set.count("load_factor"), None);
    }
}
