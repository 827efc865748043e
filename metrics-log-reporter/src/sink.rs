//! Where records go.
//!
//! A [`LogSink`] is fixed to one [`Severity`] for its whole life and forwards every record at that
//! severity to a [`Transport`].  The default transport, [`LogTransport`], hands records to the
//! [`log`] facade with every field attached as a structured key/value, so the same call serves
//! plain-text and structured (e.g. JSON) logging backends.
use std::{fmt, str::FromStr, sync::Arc};

use log::kv::{self, Key, Source, ToValue, Value, VisitSource};
use thiserror::Error;

use crate::{
    error::SinkError,
    format::{FieldValue, MetricRecord},
};

/// Logger name used when none is configured.
pub const DEFAULT_TARGET: &str = "metrics";

/// Error returned when a string does not name a [`Severity`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown severity `{0}`")]
pub struct ParseSeverityError(String);

/// Severity at which records are logged.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Severity {
    /// Trace.
    Trace,
    /// Debug.
    Debug,
    /// Info.
    #[default]
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

impl Severity {
    /// The `log` level this severity maps to.
    pub const fn as_level(self) -> log::Level {
        match self {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

impl From<Severity> for log::Level {
    fn from(severity: Severity) -> Self {
        severity.as_level()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_level(), f)
    }
}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let severity = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warn,
            "error" => Severity::Error,
            _ => return Err(ParseSeverityError(s.to_string())),
        };
        Ok(severity)
    }
}

/// A context token attached to every record.
///
/// Markers let log backends route or filter metric records apart from the rest of an
/// application's output.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Marker(String);

impl Marker {
    /// Creates a new `Marker`.
    pub fn new(name: impl Into<String>) -> Self {
        Marker(name.into())
    }

    /// Name of the marker.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for formatted records.
///
/// The level is decided by the [`LogSink`] calling the transport; the transport only needs to
/// deliver records and report whether a level is currently enabled.
pub trait Transport: Send + Sync {
    /// Whether records at `level` for `target` would currently be logged.
    fn enabled(&self, level: log::Level, target: &str, marker: Option<&Marker>) -> bool;

    /// Delivers a single record.
    fn log(
        &self,
        level: log::Level,
        target: &str,
        marker: Option<&Marker>,
        record: &MetricRecord,
    ) -> Result<(), SinkError>;
}

/// Transport writing to the global [`log`] logger.
///
/// The message is the record's rendered template.  Each field is attached as a key/value pair in
/// schema order, followed by a `marker` pair when a marker is configured.  The `log` facade has no
/// notion of markers, so they do not take part in [`Transport::enabled`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn enabled(&self, level: log::Level, target: &str, _marker: Option<&Marker>) -> bool {
        level <= log::max_level()
            && log::logger().enabled(&log::Metadata::builder().level(level).target(target).build())
    }

    fn log(
        &self,
        level: log::Level,
        target: &str,
        marker: Option<&Marker>,
        record: &MetricRecord,
    ) -> Result<(), SinkError> {
        let key_values = KeyValues { record, marker };
        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", record))
                .level(level)
                .target(target)
                .key_values(&key_values)
                .build(),
        );
        Ok(())
    }
}

struct KeyValues<'a> {
    record: &'a MetricRecord,
    marker: Option<&'a Marker>,
}

impl Source for KeyValues<'_> {
    fn visit<'kvs>(&'kvs self, visitor: &mut dyn VisitSource<'kvs>) -> Result<(), kv::Error> {
        for field in self.record.fields() {
            visitor.visit_pair(Key::from_str(field.key()), field.value().to_value())?;
        }
        if let Some(marker) = self.marker {
            visitor.visit_pair(Key::from_str("marker"), marker.name().to_value())?;
        }
        Ok(())
    }
}

impl ToValue for FieldValue {
    fn to_value(&self) -> Value<'_> {
        match self {
            FieldValue::Int(v) => v.to_value(),
            FieldValue::UInt(v) => v.to_value(),
            FieldValue::Float(v) => v.to_value(),
            FieldValue::Bool(v) => v.to_value(),
            FieldValue::Text(v) => v.as_str().to_value(),
        }
    }
}

/// A transport bound to a logger name and a fixed severity.
#[derive(Clone)]
pub struct LogSink {
    level: log::Level,
    target: String,
    transport: Arc<dyn Transport>,
}

impl LogSink {
    /// Creates a new `LogSink`.
    pub fn new(
        severity: Severity,
        target: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        LogSink { level: severity.as_level(), target: target.into(), transport }
    }

    /// Level every record is emitted at.
    pub fn level(&self) -> log::Level {
        self.level
    }

    /// Logger name every record is emitted under.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the transport currently accepts records at this sink's level.
    pub fn is_enabled(&self, marker: Option<&Marker>) -> bool {
        self.transport.enabled(self.level, &self.target, marker)
    }

    /// Emits a record at this sink's level.
    pub fn emit(&self, marker: Option<&Marker>, record: &MetricRecord) -> Result<(), SinkError> {
        self.transport.log(self.level, &self.target, marker, record)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").field("level", &self.level).field("target", &self.target).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format::ReportFormatter, units::TimeUnit};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI64;

    #[derive(Default)]
    struct Recording {
        threshold: Option<log::LevelFilter>,
        calls: Mutex<Vec<(log::Level, String, Option<Marker>, String)>>,
    }

    impl Transport for Recording {
        fn enabled(&self, level: log::Level, _target: &str, _marker: Option<&Marker>) -> bool {
            self.threshold.map_or(true, |threshold| level <= threshold)
        }

        fn log(
            &self,
            level: log::Level,
            target: &str,
            marker: Option<&Marker>,
            record: &MetricRecord,
        ) -> Result<(), SinkError> {
            let call = (level, target.to_string(), marker.cloned(), record.to_string());
            self.calls.lock().push(call);
            Ok(())
        }
    }

    #[test]
    fn test_severity_levels() {
        let cases = [
            (Severity::Trace, log::Level::Trace),
            (Severity::Debug, log::Level::Debug),
            (Severity::Info, log::Level::Info),
            (Severity::Warn, log::Level::Warn),
            (Severity::Error, log::Level::Error),
        ];

        for (severity, level) in cases {
            let transport = Arc::new(Recording::default());
            let sink = LogSink::new(severity, DEFAULT_TARGET, transport.clone());
            let record = ReportFormatter::default().counter("c", &AtomicI64::new(1)).unwrap();

            sink.emit(None, &record).unwrap();

            let calls = transport.calls.lock();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].0, level);
            assert_eq!(calls[0].1, "metrics");
        }
    }

    #[test]
    fn test_is_enabled_follows_threshold() {
        let transport = Arc::new(Recording {
            threshold: Some(log::LevelFilter::Warn),
            ..Default::default()
        });

        let info = LogSink::new(Severity::Info, "metrics", transport.clone());
        let error = LogSink::new(Severity::Error, "metrics", transport);

        assert!(!info.is_enabled(None));
        assert!(error.is_enabled(None));
    }

    #[test]
    fn test_marker_is_forwarded() {
        let transport = Arc::new(Recording::default());
        let sink = LogSink::new(Severity::Debug, "app.metrics", transport.clone());
        let formatter = ReportFormatter::new("svc", TimeUnit::Seconds, TimeUnit::Milliseconds);
        let record = formatter.counter("hits", &AtomicI64::new(3)).unwrap();
        let marker = Marker::new("METRICS");

        sink.emit(Some(&marker), &record).unwrap();

        let calls = transport.calls.lock();
        assert_eq!(calls[0].1, "app.metrics");
        assert_eq!(calls[0].2.as_ref().map(Marker::name), Some("METRICS"));
        assert_eq!(calls[0].3, "COUNTER: type=COUNTER, name=svc.hits, count=3");
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!("INFO".parse::<Severity>(), Ok(Severity::Info));
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warn));
        assert_eq!(" trace ".parse::<Severity>(), Ok(Severity::Trace));
        assert!("fatal".parse::<Severity>().is_err());
        assert_eq!(Severity::default(), Severity::Info);
        assert_eq!(Severity::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_key_values_in_schema_order() {
        struct Collect(Vec<(String, String)>);

        impl<'kvs> VisitSource<'kvs> for Collect {
            fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
                self.0.push((key.to_string(), value.to_string()));
                Ok(())
            }
        }

        let formatter = ReportFormatter::new("app", TimeUnit::Seconds, TimeUnit::Milliseconds);
        let record = formatter.counter("requests", &AtomicI64::new(42)).unwrap();
        let marker = Marker::new("METRICS");
        let key_values = KeyValues { record: &record, marker: Some(&marker) };

        let mut collect = Collect(Vec::new());
        key_values.visit(&mut collect).unwrap();

        let pairs = collect.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>();
        assert_eq!(
            pairs,
            [("type", "COUNTER"), ("name", "app.requests"), ("count", "42"), ("marker", "METRICS")]
        );
    }
}
