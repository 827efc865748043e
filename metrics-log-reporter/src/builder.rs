use std::{fmt, sync::Arc};

use crate::{
    error::{default_fault_handler, FaultHandler, ReportError},
    filter::{AllMetrics, MetricFilter},
    registry::MetricRegistry,
    sink::{LogTransport, Marker, Severity, Transport, DEFAULT_TARGET},
    units::TimeUnit,
};

const DEFAULT_THREAD_NAME: &str = "metrics-log-reporter";

/// Builder for a [`ReporterConfig`].
///
/// Defaults to logging through the [`log`] facade under the `metrics` logger at `INFO`, without a
/// marker or prefix, converting rates to events per second and durations to milliseconds, and
/// reporting every metric.
pub struct ReporterBuilder {
    registry: Arc<dyn MetricRegistry>,
    target: String,
    severity: Severity,
    transport: Arc<dyn Transport>,
    marker: Option<Marker>,
    prefix: String,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
    filter: Arc<dyn MetricFilter>,
    fault_handler: FaultHandler,
    thread_name: String,
}

impl ReporterBuilder {
    /// Creates a new `ReporterBuilder` that reports the given registry.
    pub fn for_registry(registry: Arc<dyn MetricRegistry>) -> Self {
        ReporterBuilder {
            registry,
            target: DEFAULT_TARGET.to_string(),
            severity: Severity::default(),
            transport: Arc::new(LogTransport),
            marker: None,
            prefix: String::new(),
            rate_unit: TimeUnit::Seconds,
            duration_unit: TimeUnit::Milliseconds,
            filter: Arc::new(AllMetrics),
            fault_handler: default_fault_handler(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Logs metrics under the given logger name.
    ///
    /// Defaults to `metrics`.
    #[must_use]
    pub fn output_to(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sends records to the given transport instead of the [`log`] facade.
    #[must_use]
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Arc::new(transport);
        self
    }

    /// Marks every record with the given marker.
    ///
    /// Defaults to no marker.
    #[must_use]
    pub fn mark_with(mut self, marker: Marker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Prefixes every metric name with the given string, separated by a `.`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn prefixed_with(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Converts rates to events per the given unit.
    ///
    /// Defaults to [`TimeUnit::Seconds`].
    #[must_use]
    pub fn convert_rates_to(mut self, unit: TimeUnit) -> Self {
        self.rate_unit = unit;
        self
    }

    /// Converts durations to the given unit.
    ///
    /// Defaults to [`TimeUnit::Milliseconds`].
    #[must_use]
    pub fn convert_durations_to(mut self, unit: TimeUnit) -> Self {
        self.duration_unit = unit;
        self
    }

    /// Only reports metrics accepted by the given filter.
    ///
    /// Defaults to [`AllMetrics`].
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: MetricFilter + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Logs records at the given severity.
    ///
    /// Defaults to [`Severity::Info`].
    #[must_use]
    pub fn with_logging_level(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Hands every report fault to the given callback.
    ///
    /// Faults include metrics that could not be read, records the transport refused, and report
    /// cycles that panicked.  The callback runs on the thread running the report cycle.
    ///
    /// Defaults to logging the fault with `tracing` at `WARN`.
    #[must_use]
    pub fn on_fault<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReportError) + Send + Sync + 'static,
    {
        self.fault_handler = Arc::new(handler);
        self
    }

    /// Sets the name of the scheduling thread.
    ///
    /// Defaults to `metrics-log-reporter`.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Builds the configuration.
    ///
    /// Every combination of settings is accepted.
    pub fn build(self) -> ReporterConfig {
        ReporterConfig {
            registry: self.registry,
            target: self.target,
            severity: self.severity,
            transport: self.transport,
            marker: self.marker,
            prefix: self.prefix,
            rate_unit: self.rate_unit,
            duration_unit: self.duration_unit,
            filter: self.filter,
            fault_handler: self.fault_handler,
            thread_name: self.thread_name,
        }
    }
}

/// Immutable reporter configuration.
///
/// Created by [`ReporterBuilder::build`] and consumed by
/// [`LogReporter::new`][crate::LogReporter::new].
#[derive(Clone)]
pub struct ReporterConfig {
    registry: Arc<dyn MetricRegistry>,
    target: String,
    severity: Severity,
    transport: Arc<dyn Transport>,
    marker: Option<Marker>,
    prefix: String,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
    filter: Arc<dyn MetricFilter>,
    fault_handler: FaultHandler,
    thread_name: String,
}

impl ReporterConfig {
    /// Registry being reported.
    pub fn registry(&self) -> &Arc<dyn MetricRegistry> {
        &self.registry
    }

    /// Logger name records are emitted under.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Severity records are emitted at.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Transport records are handed to.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Marker attached to every record, if any.
    pub fn marker(&self) -> Option<&Marker> {
        self.marker.as_ref()
    }

    /// Prefix applied to every metric name.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Unit rates are converted to.
    pub fn rate_unit(&self) -> TimeUnit {
        self.rate_unit
    }

    /// Unit durations are converted to.
    pub fn duration_unit(&self) -> TimeUnit {
        self.duration_unit
    }

    /// Filter deciding which metrics are reported.
    pub fn filter(&self) -> &Arc<dyn MetricFilter> {
        &self.filter
    }

    /// Callback receiving report faults.
    pub fn fault_handler(&self) -> &FaultHandler {
        &self.fault_handler
    }

    /// Name of the scheduling thread.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("target", &self.target)
            .field("severity", &self.severity)
            .field("marker", &self.marker)
            .field("prefix", &self.prefix)
            .field("rate_unit", &self.rate_unit)
            .field("duration_unit", &self.duration_unit)
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}
