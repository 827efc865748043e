//! A small "greeting service" that is timed and counted while a reporter logs its metrics.
//!
//! Worker threads play the role of request handlers: each request gets an id from a shared issuer,
//! bumps a request counter, and is timed twice: once as a whole under its path, and once around the
//! service call under `"<path>#<operation>"`.  Every second, the reporter writes one record per
//! metric to stderr through a minimal `log` backend that renders the fields as JSON.
//!
//! Run with `cargo run --example greeting_service`.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{kv, LevelFilter, Log, Metadata, Record};
use metrics_log_reporter::{
    Distribution, GaugeValue, LogReporter, Marker, MeterSnapshot, MetricSet, ReadError,
    ReporterBuilder, Severity, Timer, TimerSnapshot,
};
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as Json;

/// Key/value pairs of a log record, in the order they were attached.
#[derive(Default)]
struct Fields(Vec<(String, Json)>);

impl<'kvs> kv::VisitSource<'kvs> for Fields {
    fn visit_pair(&mut self, key: kv::Key<'kvs>, value: kv::Value<'kvs>) -> Result<(), kv::Error> {
        let json = if let Some(v) = value.to_bool() {
            Json::from(v)
        } else if let Some(v) = value.to_i64() {
            Json::from(v)
        } else if let Some(v) = value.to_u64() {
            Json::from(v)
        } else if let Some(v) = value.to_f64() {
            Json::from(v)
        } else if let Some(v) = value.to_borrowed_str() {
            Json::from(v)
        } else {
            Json::from(value.to_string())
        };
        self.0.push((key.to_string(), json));
        Ok(())
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn render_json(record: &Record<'_>) -> Result<String, String> {
    let mut fields = Fields::default();
    record.key_values().visit(&mut fields).map_err(|e| e.to_string())?;
    serde_json::to_string(&fields).map_err(|e| e.to_string())
}

/// Writes each record to stderr, followed by its fields as a JSON object.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.target() == "metrics"
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        eprintln!("{:<5} [{}] {}", record.level(), record.target(), record.args());
        match render_json(record) {
            Ok(json) => eprintln!("      {}", json),
            Err(e) => eprintln!("      <unrenderable fields: {}>", e),
        }
    }

    fn flush(&self) {}
}

/// Hands out request ids.
#[derive(Clone, Default)]
struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Records call durations, in nanoseconds.
struct CallTimer {
    clock: Clock,
    started: Instant,
    count: AtomicU64,
    samples: Mutex<Vec<i64>>,
}

impl CallTimer {
    fn new(clock: Clock) -> Self {
        let started = clock.now();
        CallTimer { clock, started, count: AtomicU64::new(0), samples: Mutex::new(Vec::new()) }
    }

    fn record(&self, nanos: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.samples.lock().push(i64::try_from(nanos).unwrap_or(i64::MAX));
    }
}

impl Timer for CallTimer {
    fn snapshot(&self) -> Result<TimerSnapshot, ReadError> {
        let count = self.count.load(Ordering::Relaxed);
        let elapsed = self.clock.now().duration_since(self.started).as_secs_f64();
        let mean_rate = if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };
        let durations = Distribution::from_values(self.samples.lock().iter().copied());

        // No moving averages here, so the windowed rates all report the mean rate.
        Ok(TimerSnapshot {
            rates: MeterSnapshot {
                count,
                mean_rate,
                one_minute_rate: mean_rate,
                five_minute_rate: mean_rate,
                fifteen_minute_rate: mean_rate,
            },
            durations,
        })
    }
}

/// Times requests per path, and calls into the service per path and operation.
struct Interceptor {
    clock: Clock,
    registry: Arc<MetricSet>,
    timers: Mutex<HashMap<String, Arc<CallTimer>>>,
}

impl Interceptor {
    fn request<T>(&self, path: &str, f: impl FnOnce() -> T) -> T {
        self.time(path.to_string(), f)
    }

    fn call<T>(&self, path: &str, operation: &str, f: impl FnOnce() -> T) -> T {
        self.time(format!("{}#{}", path, operation), f)
    }

    fn time<T>(&self, name: String, f: impl FnOnce() -> T) -> T {
        let timer = self.timer(name);
        let start = self.clock.now();
        let result = f();
        let elapsed = self.clock.now().duration_since(start);
        timer.record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        result
    }

    fn timer(&self, name: String) -> Arc<CallTimer> {
        let mut timers = self.timers.lock();
        if let Some(timer) = timers.get(&name) {
            return timer.clone();
        }

        let timer = Arc::new(CallTimer::new(self.clock.clone()));
        self.registry
            .register_timer(name.clone(), timer.clone())
            .expect("timer registered outside of the interceptor");
        timers.insert(name, timer.clone());
        timer
    }
}

fn greet(id: u64) -> String {
    thread::sleep(Duration::from_millis(id * 7919 % 50));
    format!("hi #{}", id)
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();
    log::set_logger(&StderrLogger).expect("logger already installed");
    log::set_max_level(LevelFilter::Info);

    let registry = Arc::new(MetricSet::new());
    let requests = Arc::new(AtomicI64::new(0));
    registry.register_counter("requests", requests.clone()).expect("fresh registry");

    let workers = Arc::new(AtomicU64::new(0));
    let active = workers.clone();
    let gauge = move || GaugeValue::from(active.load(Ordering::Relaxed));
    registry.register_gauge("workers", Arc::new(gauge)).expect("fresh registry");

    let interceptor = Arc::new(Interceptor {
        clock: Clock::new(),
        registry: registry.clone(),
        timers: Mutex::new(HashMap::new()),
    });

    let config = ReporterBuilder::for_registry(registry)
        .prefixed_with("greeter")
        .mark_with(Marker::new("METRICS"))
        .with_logging_level(Severity::Info)
        .build();
    let reporter = LogReporter::new(config);
    reporter.start(Duration::from_secs(1)).expect("failed to start reporter");

    let ids = RequestIds::default();
    let handles = (0..4)
        .map(|_| {
            let ids = ids.clone();
            let requests = requests.clone();
            let interceptor = interceptor.clone();
            let workers = workers.clone();
            thread::spawn(move || {
                workers.fetch_add(1, Ordering::Relaxed);
                for _ in 0..50 {
                    let id = ids.next();
                    requests.fetch_add(1, Ordering::Relaxed);
                    let path = if id % 3 == 0 { "/hello" } else { "/hi" };
                    let _ = interceptor.request(path, || {
                        interceptor.call(path, "greet", || greet(id))
                    });
                }
                workers.fetch_sub(1, Ordering::Relaxed);
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    // Final report with everything the workers did, then shut down.
    reporter.report();
    reporter.stop();
}

#[cfg(test)]
mod tests {
    use super::render_json;
    use log::kv::{Key, ToValue, Value};

    #[test]
    fn test_fields_render_as_typed_json() {
        let pairs: Vec<(Key<'_>, Value<'_>)> = vec![
            (Key::from_str("type"), "GAUGE".to_value()),
            (Key::from_str("name"), "greeter.motd".to_value()),
            (Key::from_str("value"), "say \"hi\"".to_value()),
            (Key::from_str("count"), 42i64.to_value()),
            (Key::from_str("mean"), 2.5f64.to_value()),
        ];
        let record = log::Record::builder().target("metrics").key_values(&pairs).build();

        let json = render_json(&record).unwrap();
        assert_eq!(
            json,
            r#"{"type":"GAUGE","name":"greeter.motd","value":"say \"hi\"","count":42,"mean":2.5}"#
        );

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["value"], "say \"hi\"");
    }
}
