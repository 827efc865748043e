use std::{io, sync::Arc};

use thiserror::Error;

use crate::kind::MetricKind;

/// A metric handle could not be read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The value is not available right now.
    #[error("value unavailable: {0}")]
    Unavailable(String),

    /// The value does not fit into the reported representation.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// A transport rejected a record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the record failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The transport refused the record, e.g. due to backpressure.
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// A fault observed while running a report cycle.
///
/// Faults never stop the reporter.  They are handed to the configured [`FaultHandler`] and the
/// cycle carries on with the next metric.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A metric could not be formatted, and was skipped.
    #[error("failed to format {kind} `{name}`: {source}")]
    Format {
        /// Kind of the skipped metric.
        kind: MetricKind,
        /// Registry name of the skipped metric.
        name: String,
        /// Underlying read failure.
        #[source]
        source: ReadError,
    },

    /// The transport failed to accept a formatted record.
    #[error("failed to emit {kind} `{name}`: {source}")]
    Transport {
        /// Kind of the metric whose record was lost.
        kind: MetricKind,
        /// Registry name of the metric whose record was lost.
        name: String,
        /// Underlying transport failure.
        #[source]
        source: SinkError,
    },

    /// A report cycle panicked, and was abandoned.
    #[error("report cycle panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Errors that could occur while starting a reporter.
#[derive(Debug, Error)]
pub enum StartError {
    /// The reporter already has a live scheduling thread.
    #[error("reporter is already running")]
    AlreadyRunning,

    /// A zero reporting period was requested.
    #[error("reporting period must be non-zero")]
    ZeroPeriod,

    /// Failed to spawn the scheduling thread.
    #[error("failed to spawn reporter thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Callback receiving every [`ReportError`] raised while reporting.
pub type FaultHandler = Arc<dyn Fn(&ReportError) + Send + Sync>;

pub(crate) fn default_fault_handler() -> FaultHandler {
    Arc::new(|error: &ReportError| {
        tracing::warn!(error = %error, "Metrics report fault.");
    })
}
