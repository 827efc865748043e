use std::{fmt, ops::BitOr};

/// Metric kind.
///
/// Defines the kind, or type, of a metric.  The reporter understands five kinds:
/// - gauges
/// - counters
/// - histograms
/// - meters
/// - timers
///
/// Kinds are reported in that order within a cycle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricKind {
    /// Gauge type.
    Gauge,
    /// Counter type.
    Counter,
    /// Histogram type.
    Histogram,
    /// Meter type.
    Meter,
    /// Timer type.
    Timer,
}

impl MetricKind {
    /// The `type` discriminator written as the first field of every record.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "GAUGE",
            MetricKind::Counter => "COUNTER",
            MetricKind::Histogram => "HISTOGRAM",
            MetricKind::Meter => "METER",
            MetricKind::Timer => "TIMER",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric kind mask.
///
/// Useful for matching against a kind, or kinds, of metrics.  Masks combine with bitwise OR:
///
/// ```rust
/// # use metrics_log_reporter::{MetricKind, MetricKindMask};
/// let mask = MetricKindMask::COUNTER | MetricKindMask::TIMER;
///
/// assert!(mask.matches(MetricKind::Counter));
/// assert!(mask.matches(MetricKind::Timer));
/// assert!(!mask.matches(MetricKind::Gauge));
/// ```
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Ord, PartialOrd)]
pub struct MetricKindMask(u8);

impl MetricKindMask {
    /// No metric kinds.
    pub const NONE: MetricKindMask = MetricKindMask(0);

    /// The gauge kind.
    pub const GAUGE: MetricKindMask = MetricKindMask(1);

    /// The counter kind.
    pub const COUNTER: MetricKindMask = MetricKindMask(2);

    /// The histogram kind.
    pub const HISTOGRAM: MetricKindMask = MetricKindMask(4);

    /// The meter kind.
    pub const METER: MetricKindMask = MetricKindMask(8);

    /// The timer kind.
    pub const TIMER: MetricKindMask = MetricKindMask(16);

    /// All metric kinds.
    pub const ALL: MetricKindMask = MetricKindMask(31);

    #[inline]
    fn value(&self) -> u8 {
        self.0
    }

    /// Whether or not this mask contains the specified kind.
    pub fn matches(&self, kind: MetricKind) -> bool {
        self.0 & MetricKindMask::from(kind).value() != 0
    }
}

impl BitOr for MetricKindMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<MetricKind> for MetricKindMask {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Gauge => MetricKindMask::GAUGE,
            MetricKind::Counter => MetricKindMask::COUNTER,
            MetricKind::Histogram => MetricKindMask::HISTOGRAM,
            MetricKind::Meter => MetricKindMask::METER,
            MetricKind::Timer => MetricKindMask::TIMER,
        }
    }
}
