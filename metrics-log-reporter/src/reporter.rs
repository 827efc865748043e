use std::{
    any::Any,
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use crossbeam_channel::{after, bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{
    builder::ReporterConfig,
    error::{ReadError, ReportError, StartError},
    format::{MetricRecord, ReportFormatter},
    kind::MetricKind,
    sink::LogSink,
};

/// Result of a single report cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// The cycle ran to completion.
    Completed {
        /// Number of records handed to the transport.
        emitted: usize,
        /// Number of metrics that were skipped or lost due to a fault.
        faults: usize,
    },

    /// The transport does not currently accept records at the configured severity, so nothing was
    /// formatted.
    Disabled,

    /// Another cycle was still running, so this one was skipped.
    Busy,
}

#[derive(Default)]
struct Tally {
    emitted: usize,
    faults: usize,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    config: ReporterConfig,
    formatter: ReportFormatter,
    sink: LogSink,
    busy: AtomicBool,
    running: AtomicBool,
    cancelled: AtomicBool,
    worker_thread: Mutex<Option<ThreadId>>,
}

impl Inner {
    fn report(&self) -> CycleOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            trace!("Report cycle already in progress, skipping.");
            return CycleOutcome::Busy;
        };

        let registry = self.config.registry();
        let gauges = registry.gauges();
        let counters = registry.counters();
        let histograms = registry.histograms();
        let meters = registry.meters();
        let timers = registry.timers();

        if !self.sink.is_enabled(self.config.marker()) {
            trace!(level = %self.sink.level(), "Metrics logger disabled, skipping report cycle.");
            return CycleOutcome::Disabled;
        }

        let formatter = &self.formatter;
        let mut tally = Tally::default();
        self.emit_kind(MetricKind::Gauge, &gauges, &mut tally, |n, m| formatter.gauge(n, m));
        self.emit_kind(MetricKind::Counter, &counters, &mut tally, |n, m| formatter.counter(n, m));
        self.emit_kind(MetricKind::Histogram, &histograms, &mut tally, |n, m| {
            formatter.histogram(n, m)
        });
        self.emit_kind(MetricKind::Meter, &meters, &mut tally, |n, m| formatter.meter(n, m));
        self.emit_kind(MetricKind::Timer, &timers, &mut tally, |n, m| formatter.timer(n, m));

        CycleOutcome::Completed { emitted: tally.emitted, faults: tally.faults }
    }

    fn emit_kind<T, F>(
        &self,
        kind: MetricKind,
        metrics: &BTreeMap<String, Arc<T>>,
        tally: &mut Tally,
        format: F,
    ) where
        T: ?Sized,
        F: Fn(&str, &T) -> Result<MetricRecord, ReadError>,
    {
        let filter = self.config.filter();
        let marker = self.config.marker();

        for (name, metric) in metrics {
            if !filter.matches(name, kind) {
                continue;
            }

            let record = match format(name, metric.as_ref()) {
                Ok(record) => record,
                Err(source) => {
                    tally.faults += 1;
                    self.fault(&ReportError::Format { kind, name: name.clone(), source });
                    continue;
                }
            };

            match self.sink.emit(marker, &record) {
                Ok(()) => tally.emitted += 1,
                Err(source) => {
                    tally.faults += 1;
                    self.fault(&ReportError::Transport { kind, name: name.clone(), source });
                }
            }
        }
    }

    fn fault(&self, error: &ReportError) {
        (self.config.fault_handler())(error);
    }

    fn run_scheduled(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.report())) {
            Ok(outcome) => trace!(?outcome, "Finished report cycle."),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "Report cycle panicked.");

                // The handler may be what panicked in the first place.
                let fault = ReportError::Panicked { message };
                if panic::catch_unwind(AssertUnwindSafe(|| self.fault(&fault))).is_err() {
                    error!("Fault handler panicked while reporting a panicked cycle.");
                }
            }
        }
    }

    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_thread.lock().map_or(false, |id| id == current)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run(inner: Arc<Inner>, initial_delay: Duration, period: Duration, shutdown: Receiver<()>) {
    *inner.worker_thread.lock() = Some(thread::current().id());
    debug!(?initial_delay, ?period, logger = inner.sink.target(), "Metrics reporter started.");

    let mut stopped = false;
    select! {
        recv(shutdown) -> _ => stopped = true,
        recv(after(initial_delay)) -> _ => {},
    }

    if !stopped {
        let ticker = tick(period);
        loop {
            if inner.cancelled.load(Ordering::Acquire) {
                break;
            }

            inner.run_scheduled();

            if inner.cancelled.load(Ordering::Acquire) {
                break;
            }

            // A tick that came due while the cycle was running is dropped, not run late.
            let _ = ticker.try_recv();

            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {},
            }
        }
    }

    *inner.worker_thread.lock() = None;
    inner.running.store(false, Ordering::Release);
    debug!("Metrics reporter stopped.");
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically logs every metric of a registry.
///
/// Each report cycle reads the five kinds of metrics from the registry, in the order gauges,
/// counters, histograms, meters and timers, and within a kind in ascending name order.  Every
/// metric accepted by the configured filter becomes one record, emitted through the configured
/// transport at the configured severity.  If the transport does not accept that severity, the
/// whole cycle is skipped before any metric is read.
///
/// # Scheduling
///
/// [`start`](LogReporter::start) spawns a single background thread that runs a cycle every period.
/// Cycles never overlap: a tick that falls while a cycle is still running is skipped.  Faults are
/// handed to the configured fault handler and never stop the thread, including a cycle that
/// panics.
///
/// The reporter stops when [`stop`](LogReporter::stop) is called or when it is dropped.
pub struct LogReporter {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl LogReporter {
    /// Creates a new `LogReporter` from the given configuration.
    ///
    /// The reporter does nothing until it is started.
    pub fn new(config: ReporterConfig) -> Self {
        let formatter =
            ReportFormatter::new(config.prefix(), config.rate_unit(), config.duration_unit());
        let sink =
            LogSink::new(config.severity(), config.target(), Arc::clone(config.transport()));

        LogReporter {
            inner: Arc::new(Inner {
                config,
                formatter,
                sink,
                busy: AtomicBool::new(false),
                running: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                worker_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Configuration of this reporter.
    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Starts reporting every `period`, beginning one period from now.
    ///
    /// # Errors
    ///
    /// If the reporter is already running, if `period` is zero, or if the scheduling thread cannot
    /// be spawned, an error is returned.
    pub fn start(&self, period: Duration) -> Result<(), StartError> {
        self.start_with_initial_delay(period, period)
    }

    /// Starts reporting every `period`, beginning after `initial_delay`.
    ///
    /// A reporter that was stopped can be started again.
    ///
    /// # Errors
    ///
    /// If the reporter is already running, if `period` is zero, or if the scheduling thread cannot
    /// be spawned, an error is returned.
    pub fn start_with_initial_delay(
        &self,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<(), StartError> {
        if period.is_zero() {
            return Err(StartError::ZeroPeriod);
        }

        // The worker mutex may be held by a `stop` that is joining this very thread.
        if self.inner.is_worker_thread() {
            return Err(StartError::AlreadyRunning);
        }

        let mut worker = self.worker.lock();
        if let Some(existing) = worker.take() {
            let stopping = self.inner.cancelled.load(Ordering::Acquire);
            let own_thread = existing.handle.thread().id() == thread::current().id();
            if own_thread || !(stopping || existing.handle.is_finished()) {
                *worker = Some(existing);
                return Err(StartError::AlreadyRunning);
            }

            // Stopped from inside its own cycle: wait for that cycle to wind down.
            drop(existing.shutdown);
            if existing.handle.join().is_err() {
                error!("Metrics reporter thread panicked.");
            }
        }

        self.inner.cancelled.store(false, Ordering::Release);
        self.inner.running.store(true, Ordering::Release);

        let (shutdown_tx, shutdown_rx) = bounded(0);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(self.inner.config.thread_name().to_string())
            .spawn(move || run(inner, initial_delay, period, shutdown_rx));

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { shutdown: shutdown_tx, handle });
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                Err(StartError::Spawn(e))
            }
        }
    }

    /// Stops reporting.
    ///
    /// Waits for an in-flight cycle to finish, after which no further cycles run.  Calling `stop`
    /// on a reporter that is not running does nothing.
    ///
    /// When called from inside a report cycle (from a gauge, transport, or fault handler), the
    /// reporter stops once that cycle returns, without waiting for it.
    pub fn stop(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        if self.inner.is_worker_thread() {
            return;
        }

        let mut worker = self.worker.lock();
        if let Some(Worker { shutdown, handle }) = worker.take() {
            drop(shutdown);
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Metrics reporter thread panicked.");
            }
        }
        self.inner.running.store(false, Ordering::Release);
    }

    /// Whether the scheduling thread is running and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && !self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Runs a single report cycle on the calling thread.
    ///
    /// Shares the no-overlap guard with the scheduling thread: if a cycle is already running, this
    /// returns [`CycleOutcome::Busy`] without doing anything.  Faults go to the fault handler as
    /// usual; a panic inside the cycle is not caught.
    pub fn report(&self) -> CycleOutcome {
        self.inner.report()
    }
}

impl Drop for LogReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::ReporterBuilder,
        error::SinkError,
        registry::{Gauge, GaugeValue, MetricSet},
        sink::{Marker, Transport},
    };
    use std::sync::atomic::{AtomicI64, AtomicUsize};

    #[derive(Default)]
    struct Capture {
        disabled: bool,
        fail_on: Option<&'static str>,
        records: Mutex<Vec<MetricRecord>>,
    }

    impl Transport for Capture {
        fn enabled(&self, _level: log::Level, _target: &str, _marker: Option<&Marker>) -> bool {
            !self.disabled
        }

        fn log(
            &self,
            _level: log::Level,
            _target: &str,
            _marker: Option<&Marker>,
            record: &MetricRecord,
        ) -> Result<(), SinkError> {
            if self.fail_on == Some(record.name()) {
                return Err(SinkError::Rejected("queue full".into()));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    struct Shared(Arc<Capture>);

    impl Transport for Shared {
        fn enabled(&self, level: log::Level, target: &str, marker: Option<&Marker>) -> bool {
            self.0.enabled(level, target, marker)
        }

        fn log(
            &self,
            level: log::Level,
            target: &str,
            marker: Option<&Marker>,
            record: &MetricRecord,
        ) -> Result<(), SinkError> {
            self.0.log(level, target, marker, record)
        }
    }

    struct Unreadable;

    impl Gauge for Unreadable {
        fn value(&self) -> Result<GaugeValue, ReadError> {
            Err(ReadError::Unavailable("sensor offline".into()))
        }
    }

    fn names(capture: &Capture) -> Vec<String> {
        capture.records.lock().iter().map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn test_kinds_reported_in_order() {
        let set = Arc::new(MetricSet::new());
        set.register_timer("t", Arc::new(crate::registry::TimerSnapshot::default())).unwrap();
        set.register_counter("c", Arc::new(AtomicI64::new(1))).unwrap();
        set.register_gauge("g", Arc::new(|| GaugeValue::from(1))).unwrap();
        set.register_meter("m", Arc::new(crate::registry::MeterSnapshot::default())).unwrap();
        set.register_histogram("h", Arc::new(crate::registry::HistogramSnapshot::default()))
            .unwrap();

        let capture = Arc::new(Capture::default());
        let reporter = LogReporter::new(
            ReporterBuilder::for_registry(set).with_transport(Shared(capture.clone())).build(),
        );

        assert_eq!(reporter.report(), CycleOutcome::Completed { emitted: 5, faults: 0 });
        assert_eq!(names(&capture), ["g", "c", "h", "m", "t"]);
    }

    #[test]
    fn test_unreadable_metric_is_skipped() {
        let set = Arc::new(MetricSet::new());
        set.register_gauge("a", Arc::new(|| GaugeValue::from(1))).unwrap();
        set.register_gauge("b", Arc::new(Unreadable)).unwrap();
        set.register_gauge("c", Arc::new(|| GaugeValue::from(3))).unwrap();

        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = faults.clone();
        let capture = Arc::new(Capture::default());
        let reporter = LogReporter::new(
            ReporterBuilder::for_registry(set)
                .with_transport(Shared(capture.clone()))
                .on_fault(move |e| seen.lock().push(e.to_string()))
                .build(),
        );

        assert_eq!(reporter.report(), CycleOutcome::Completed { emitted: 2, faults: 1 });
        assert_eq!(names(&capture), ["a", "c"]);

        let faults = faults.lock();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].contains("GAUGE `b`"), "unexpected fault: {}", faults[0]);
    }

    #[test]
    fn test_transport_failure_does_not_stop_cycle() {
        let set = Arc::new(MetricSet::new());
        for name in ["a", "b", "c"] {
            set.register_counter(name, Arc::new(AtomicI64::new(0))).unwrap();
        }

        let faults = Arc::new(AtomicUsize::new(0));
        let seen = faults.clone();
        let capture = Arc::new(Capture { fail_on: Some("b"), ..Default::default() });
        let reporter = LogReporter::new(
            ReporterBuilder::for_registry(set)
                .with_transport(Shared(capture.clone()))
                .on_fault(move |e| {
                    assert!(matches!(e, ReportError::Transport { .. }));
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .build(),
        );

        assert_eq!(reporter.report(), CycleOutcome::Completed { emitted: 2, faults: 1 });
        assert_eq!(names(&capture), ["a", "c"]);
        assert_eq!(faults.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_guard_skips_nested_cycle() {
        let busy = AtomicBool::new(false);
        let guard = BusyGuard::acquire(&busy).unwrap();
        assert!(BusyGuard::acquire(&busy).is_none());
        drop(guard);
        assert!(BusyGuard::acquire(&busy).is_some());
    }

    #[test]
    fn test_panicking_cycle_is_reported() {
        struct Exploding;

        impl Gauge for Exploding {
            fn value(&self) -> Result<GaugeValue, ReadError> {
                panic!("gauge exploded");
            }
        }

        let set = Arc::new(MetricSet::new());
        set.register_gauge("boom", Arc::new(Exploding)).unwrap();

        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = faults.clone();
        let reporter = LogReporter::new(
            ReporterBuilder::for_registry(set)
                .with_transport(Capture::default())
                .on_fault(move |e| seen.lock().push(e.to_string()))
                .build(),
        );

        reporter.inner.run_scheduled();
        reporter.inner.run_scheduled();

        let faults = faults.lock();
        assert_eq!(faults.len(), 2);
        assert!(faults[0].contains("gauge exploded"));

        // The guard was released while unwinding.
        assert!(!reporter.inner.busy.load(Ordering::SeqCst));
    }

    #[test]
    fn test_start_rejects_zero_period_and_double_start() {
        let reporter = LogReporter::new(
            ReporterBuilder::for_registry(Arc::new(MetricSet::new()))
                .with_transport(Capture::default())
                .build(),
        );

        assert!(matches!(reporter.start(Duration::ZERO), Err(StartError::ZeroPeriod)));
        assert!(!reporter.is_running());

        reporter.start(Duration::from_secs(60)).unwrap();
        assert!(reporter.is_running());
        assert!(matches!(reporter.start(Duration::from_secs(60)), Err(StartError::AlreadyRunning)));

        reporter.stop();
        assert!(!reporter.is_running());
        reporter.stop();

        reporter.start(Duration::from_secs(60)).unwrap();
        assert!(reporter.is_running());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
