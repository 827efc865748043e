//! Read-side view of a metrics registry.
//!
//! The reporter never updates metrics.  It asks a [`MetricRegistry`] for the current set of
//! metrics of each kind, keyed and sorted by name, and then reads each handle through one of the
//! per-kind traits: [`Gauge`], [`Counter`], [`Histogram`], [`Meter`] and [`Timer`].
//!
//! How metrics are updated (atomics, reservoirs, exponentially-weighted moving averages) is up to
//! the registry.  [`MetricSet`] is a small index of caller-owned handles for applications that
//! do not already have a registry of their own.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{error::ReadError, kind::MetricKind};

/// Value of a gauge.
///
/// Gauges may report any scalar, not just numbers.
#[derive(Clone, Debug, PartialEq)]
pub enum GaugeValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating-point number.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Text.
    Text(String),
}

impl From<i64> for GaugeValue {
    fn from(v: i64) -> Self {
        GaugeValue::Int(v)
    }
}

impl From<i32> for GaugeValue {
    fn from(v: i32) -> Self {
        GaugeValue::Int(v.into())
    }
}

impl From<u64> for GaugeValue {
    fn from(v: u64) -> Self {
        GaugeValue::UInt(v)
    }
}

impl From<usize> for GaugeValue {
    fn from(v: usize) -> Self {
        GaugeValue::UInt(v as u64)
    }
}

impl From<f64> for GaugeValue {
    fn from(v: f64) -> Self {
        GaugeValue::Float(v)
    }
}

impl From<bool> for GaugeValue {
    fn from(v: bool) -> Self {
        GaugeValue::Bool(v)
    }
}

impl From<&str> for GaugeValue {
    fn from(v: &str) -> Self {
        GaugeValue::Text(v.to_string())
    }
}

impl From<String> for GaugeValue {
    fn from(v: String) -> Self {
        GaugeValue::Text(v)
    }
}

/// Statistical summary of a set of samples.
///
/// For timers, every value is in nanoseconds.  For histograms, values are in whatever unit the
/// samples were recorded in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Distribution {
    /// Smallest sample.
    pub min: i64,
    /// Largest sample.
    pub max: i64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub stddev: f64,
    /// 50th percentile.
    pub median: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 98th percentile.
    pub p98: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
}

impl Distribution {
    /// Summarizes a set of raw samples.
    ///
    /// Quantiles are interpolated linearly between the two closest ranks, with the rank of
    /// quantile `q` taken as `q * (n + 1)`.  An empty set of samples summarizes to all zeroes.
    pub fn from_values<I>(values: I) -> Distribution
    where
        I: IntoIterator<Item = i64>,
    {
        let mut values = values.into_iter().collect::<Vec<_>>();
        if values.is_empty() {
            return Distribution::default();
        }
        values.sort_unstable();

        let n = values.len() as f64;
        let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
        let stddev = if values.len() > 1 {
            let sum_sq = values.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>();
            (sum_sq / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        Distribution {
            min: values[0],
            max: values[values.len() - 1],
            mean,
            stddev,
            median: quantile(&values, 0.5),
            p75: quantile(&values, 0.75),
            p95: quantile(&values, 0.95),
            p98: quantile(&values, 0.98),
            p99: quantile(&values, 0.99),
            p999: quantile(&values, 0.999),
        }
    }
}

fn quantile(sorted: &[i64], q: f64) -> f64 {
    let pos = q * (sorted.len() as f64 + 1.0);
    let index = pos as usize;

    if index < 1 {
        return sorted[0] as f64;
    }
    if index >= sorted.len() {
        return sorted[sorted.len() - 1] as f64;
    }

    let lower = sorted[index - 1] as f64;
    let upper = sorted[index] as f64;
    lower + (pos - pos.floor()) * (upper - lower)
}

/// Point-in-time state of a histogram.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of samples ever recorded.
    pub count: u64,
    /// Summary of the retained samples.
    pub distribution: Distribution,
}

/// Point-in-time state of a meter.
///
/// All rates are in events per second.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Number of events ever marked.
    pub count: u64,
    /// Mean rate since the meter was created.
    pub mean_rate: f64,
    /// One-minute exponentially-weighted moving average rate.
    pub one_minute_rate: f64,
    /// Five-minute exponentially-weighted moving average rate.
    pub five_minute_rate: f64,
    /// Fifteen-minute exponentially-weighted moving average rate.
    pub fifteen_minute_rate: f64,
}

/// Point-in-time state of a timer: a meter of calls plus a distribution of their durations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimerSnapshot {
    /// Call count and rates, in events per second.
    pub rates: MeterSnapshot,
    /// Call durations, in nanoseconds.
    pub durations: Distribution,
}

/// A gauge: an instantaneous value.
pub trait Gauge: Send + Sync {
    /// Reads the current value.
    fn value(&self) -> Result<GaugeValue, ReadError>;
}

/// A counter: a signed count.
pub trait Counter: Send + Sync {
    /// Reads the current count.
    fn count(&self) -> Result<i64, ReadError>;
}

/// A histogram: a distribution of arbitrary values.
pub trait Histogram: Send + Sync {
    /// Takes a snapshot of the histogram.
    fn snapshot(&self) -> Result<HistogramSnapshot, ReadError>;
}

/// A meter: a rate of events.
pub trait Meter: Send + Sync {
    /// Takes a snapshot of the meter.
    fn snapshot(&self) -> Result<MeterSnapshot, ReadError>;
}

/// A timer: a rate of calls and a distribution of their durations.
pub trait Timer: Send + Sync {
    /// Takes a snapshot of the timer.
    fn snapshot(&self) -> Result<TimerSnapshot, ReadError>;
}

impl<F> Gauge for F
where
    F: Fn() -> GaugeValue + Send + Sync,
{
    fn value(&self) -> Result<GaugeValue, ReadError> {
        Ok(self())
    }
}

impl Counter for AtomicI64 {
    fn count(&self) -> Result<i64, ReadError> {
        Ok(self.load(Ordering::Relaxed))
    }
}

impl Counter for AtomicU64 {
    fn count(&self) -> Result<i64, ReadError> {
        let count = self.load(Ordering::Relaxed);
        i64::try_from(count).map_err(|_| ReadError::OutOfRange(count.to_string()))
    }
}

impl Histogram for HistogramSnapshot {
    fn snapshot(&self) -> Result<HistogramSnapshot, ReadError> {
        Ok(self.clone())
    }
}

impl Meter for MeterSnapshot {
    fn snapshot(&self) -> Result<MeterSnapshot, ReadError> {
        Ok(self.clone())
    }
}

impl Timer for TimerSnapshot {
    fn snapshot(&self) -> Result<TimerSnapshot, ReadError> {
        Ok(self.clone())
    }
}

/// Read API of a metrics registry.
///
/// Every method returns the metrics of one kind, sorted by name.  The five calls made in a report
/// cycle are not expected to be consistent with each other: the registry may be updated
/// concurrently between them.
pub trait MetricRegistry: Send + Sync {
    /// All gauges.
    fn gauges(&self) -> BTreeMap<String, Arc<dyn Gauge>>;

    /// All counters.
    fn counters(&self) -> BTreeMap<String, Arc<dyn Counter>>;

    /// All histograms.
    fn histograms(&self) -> BTreeMap<String, Arc<dyn Histogram>>;

    /// All meters.
    fn meters(&self) -> BTreeMap<String, Arc<dyn Meter>>;

    /// All timers.
    fn timers(&self) -> BTreeMap<String, Arc<dyn Timer>>;
}

/// Errors that could occur while registering a metric with a [`MetricSet`].
#[derive(Debug, Error)]
pub enum RegisterError {
    /// A metric of the same kind is already registered under this name.
    #[error("{kind} `{name}` is already registered")]
    Duplicate {
        /// Kind of the rejected metric.
        kind: MetricKind,
        /// Name of the rejected metric.
        name: String,
    },
}

struct Family<T: ?Sized> {
    kind: MetricKind,
    handles: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: ?Sized> Family<T> {
    fn new(kind: MetricKind) -> Self {
        Family { kind, handles: RwLock::new(BTreeMap::new()) }
    }

    fn register(&self, name: String, handle: Arc<T>) -> Result<(), RegisterError> {
        let mut handles = self.handles.write();
        if handles.contains_key(&name) {
            return Err(RegisterError::Duplicate { kind: self.kind, name });
        }
        handles.insert(name, handle);
        Ok(())
    }

    fn remove(&self, name: &str) -> bool {
        self.handles.write().remove(name).is_some()
    }

    fn snapshot(&self) -> BTreeMap<String, Arc<T>> {
        self.handles.read().clone()
    }
}

/// An index of named metric handles.
///
/// Callers keep their own reference to each handle and update it however they like; the set only
/// hands the handles out to the reporter.  Names are unique within a kind.
pub struct MetricSet {
    gauges: Family<dyn Gauge>,
    counters: Family<dyn Counter>,
    histograms: Family<dyn Histogram>,
    meters: Family<dyn Meter>,
    timers: Family<dyn Timer>,
}

impl MetricSet {
    /// Creates an empty `MetricSet`.
    pub fn new() -> MetricSet {
        MetricSet {
            gauges: Family::new(MetricKind::Gauge),
            counters: Family::new(MetricKind::Counter),
            histograms: Family::new(MetricKind::Histogram),
            meters: Family::new(MetricKind::Meter),
            timers: Family::new(MetricKind::Timer),
        }
    }

    /// Registers a gauge.
    ///
    /// # Errors
    ///
    /// If a gauge is already registered under `name`, an error is returned.
    pub fn register_gauge<N>(&self, name: N, gauge: Arc<dyn Gauge>) -> Result<(), RegisterError>
    where
        N: Into<String>,
    {
        self.gauges.register(name.into(), gauge)
    }

    /// Registers a counter.
    ///
    /// # Errors
    ///
    /// If a counter is already registered under `name`, an error is returned.
    pub fn register_counter<N>(
        &self,
        name: N,
        counter: Arc<dyn Counter>,
    ) -> Result<(), RegisterError>
    where
        N: Into<String>,
    {
        self.counters.register(name.into(), counter)
    }

    /// Registers a histogram.
    ///
    /// # Errors
    ///
    /// If a histogram is already registered under `name`, an error is returned.
    pub fn register_histogram<N>(
        &self,
        name: N,
        histogram: Arc<dyn Histogram>,
    ) -> Result<(), RegisterError>
    where
        N: Into<String>,
    {
        self.histograms.register(name.into(), histogram)
    }

    /// Registers a meter.
    ///
    /// # Errors
    ///
    /// If a meter is already registered under `name`, an error is returned.
    pub fn register_meter<N>(&self, name: N, meter: Arc<dyn Meter>) -> Result<(), RegisterError>
    where
        N: Into<String>,
    {
        self.meters.register(name.into(), meter)
    }

    /// Registers a timer.
    ///
    /// # Errors
    ///
    /// If a timer is already registered under `name`, an error is returned.
    pub fn register_timer<N>(&self, name: N, timer: Arc<dyn Timer>) -> Result<(), RegisterError>
    where
        N: Into<String>,
    {
        self.timers.register(name.into(), timer)
    }

    /// Removes every metric registered under `name`, whatever its kind.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove(&self, name: &str) -> bool {
        // Non-short-circuiting so that every kind is visited.
        self.gauges.remove(name)
            | self.counters.remove(name)
            | self.histograms.remove(name)
            | self.meters.remove(name)
            | self.timers.remove(name)
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        MetricSet::new()
    }
}

impl MetricRegistry for MetricSet {
    fn gauges(&self) -> BTreeMap<String, Arc<dyn Gauge>> {
        self.gauges.snapshot()
    }

    fn counters(&self) -> BTreeMap<String, Arc<dyn Counter>> {
        self.counters.snapshot()
    }

    fn histograms(&self) -> BTreeMap<String, Arc<dyn Histogram>> {
        self.histograms.snapshot()
    }

    fn meters(&self) -> BTreeMap<String, Arc<dyn Meter>> {
        self.meters.snapshot()
    }

    fn timers(&self) -> BTreeMap<String, Arc<dyn Timer>> {
        self.timers.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distribution_from_values() {
        let dist = Distribution::from_values([5, 1, 4, 2, 3]);

        assert_eq!(dist.min, 1);
        assert_eq!(dist.max, 5);
        assert_relative_eq!(dist.mean, 3.0);
        assert_relative_eq!(dist.stddev, 2.5f64.sqrt());
        assert_relative_eq!(dist.median, 3.0);
        assert_relative_eq!(dist.p75, 4.5);
        assert_relative_eq!(dist.p95, 5.0);
        assert_relative_eq!(dist.p999, 5.0);
    }

    #[test]
    fn test_distribution_edge_cases() {
        assert_eq!(Distribution::from_values(Vec::new()), Distribution::default());

        let single = Distribution::from_values([7]);
        assert_eq!(single.min, 7);
        assert_eq!(single.max, 7);
        assert_relative_eq!(single.stddev, 0.0);
        assert_relative_eq!(single.median, 7.0);
        assert_relative_eq!(single.p99, 7.0);
    }

    #[test]
    fn test_atomic_counters() {
        let signed = AtomicI64::new(-3);
        assert_eq!(signed.count().unwrap(), -3);

        let unsigned = AtomicU64::new(42);
        assert_eq!(unsigned.count().unwrap(), 42);

        let overflowing = AtomicU64::new(u64::MAX);
        assert!(matches!(overflowing.count(), Err(ReadError::OutOfRange(_))));
    }

    #[test]
    fn test_metric_set_sorted_by_name() {
        let set = MetricSet::new();
        for name in ["zeta", "alpha", "mu"] {
            set.register_counter(name, Arc::new(AtomicI64::new(0))).unwrap();
        }

        let names = set.counters().into_keys().collect::<Vec<_>>();
        assert_eq!(names, ["alpha", "mu", "zeta"]);
    }

    #[test]
    fn test_metric_set_names_unique_per_kind() {
        let set = MetricSet::new();
        set.register_counter("requests", Arc::new(AtomicI64::new(0))).unwrap();
        set.register_gauge("requests", Arc::new(|| GaugeValue::from(1))).unwrap();

        let err = set.register_counter("requests", Arc::new(AtomicI64::new(1))).unwrap_err();
        assert!(matches!(
            err,
            RegisterError::Duplicate { kind: MetricKind::Counter, ref name } if name == "requests"
        ));

        assert!(set.remove("requests"));
        assert!(set.counters().is_empty());
        assert!(set.gauges().is_empty());
        assert!(!set.remove("requests"));
    }

    #[test]
    fn test_handles_are_shared() {
        let set = MetricSet::new();
        let counter = Arc::new(AtomicI64::new(0));
        set.register_counter("hits", counter.clone()).unwrap();

        counter.fetch_add(5, Ordering::Relaxed);

        let counters = set.counters();
        assert_eq!(counters["hits"].count().unwrap(), 5);
    }
}
