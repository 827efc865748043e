//! A periodic reporter that logs every metric of a registry as a structured record.
//!
//! On every tick, [`LogReporter`] reads the metrics of a [`MetricRegistry`] and emits one record
//! per metric through the [`log`] facade.  Each record carries a human-readable message, e.g.
//!
//! ```text
//! COUNTER: type=COUNTER, name=app.requests, count=42
//! ```
//!
//! plus the same fields attached as key/value pairs, so that structured logging backends can index
//! them directly.
//!
//! # Record schemas
//!
//! Fields appear in this order, always starting with `type` and `name`:
//!
//! - **gauge**: `value`
//! - **counter**: `count`
//! - **histogram**: `count`, `min`, `max`, `mean`, `stddev`, `median`, `p75`, `p95`, `p98`,
//!   `p99`, `p999`
//! - **meter**: `count`, `mean_rate`, `m1`, `m5`, `m15`, `rate_unit`
//! - **timer**: `count`, `min`, `max`, `mean`, `stddev`, `median`, `p75`, `p95`, `p98`, `p99`,
//!   `p999`, `mean_rate`, `m1`, `m5`, `m15`, `rate_unit`, `duration_unit`
//!
//! Rates are converted to events per the configured rate unit, and timer durations are converted
//! from nanoseconds to the configured duration unit.  Histogram values are reported as-is.
//!
//! # Usage
//!
//! ```no_run
//! use std::{
//!     sync::{atomic::AtomicI64, Arc},
//!     time::Duration,
//! };
//!
//! use metrics_log_reporter::{LogReporter, MetricSet, ReporterBuilder, Severity, TimeUnit};
//!
//! let registry = Arc::new(MetricSet::new());
//! let requests = Arc::new(AtomicI64::new(0));
//! registry.register_counter("requests", requests.clone()).expect("fresh registry");
//!
//! let config = ReporterBuilder::for_registry(registry)
//!     .prefixed_with("greeter")
//!     .convert_rates_to(TimeUnit::Minutes)
//!     .with_logging_level(Severity::Debug)
//!     .build();
//!
//! let reporter = LogReporter::new(config);
//! reporter.start(Duration::from_secs(10)).expect("failed to start reporter");
//! ```
//!
//! Faults raised while reporting never stop the reporter.  These include a metric that cannot be
//! read, a record the transport refuses, and a cycle that panics.  They are logged through
//! `tracing` by default, or handed to a callback set with [`ReporterBuilder::on_fault`].
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{ReporterBuilder, ReporterConfig};

mod error;
pub use self::error::{FaultHandler, ReadError, ReportError, SinkError, StartError};

mod filter;
pub use self::filter::{
    AllMetrics, FilterError, MetricFilter, PatternFilter, PatternFilterBuilder,
};

mod format;
pub use self::format::{Field, FieldValue, MetricRecord, ReportFormatter};

mod kind;
pub use self::kind::{MetricKind, MetricKindMask};

mod registry;
pub use self::registry::{
    Counter, Distribution, Gauge, GaugeValue, Histogram, HistogramSnapshot, Meter, MeterSnapshot,
    MetricRegistry, MetricSet, RegisterError, Timer, TimerSnapshot,
};

mod reporter;
pub use self::reporter::{CycleOutcome, LogReporter};

mod sink;
pub use self::sink::{
    LogSink, LogTransport, Marker, ParseSeverityError, Severity, Transport, DEFAULT_TARGET,
};

mod units;
pub use self::units::{ParseUnitError, TimeUnit};
