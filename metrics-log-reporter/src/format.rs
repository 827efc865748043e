//! Turning metrics into records.
//!
//! Every record is a fixed, ordered list of key/value fields.  The first field is always `type`
//! and the second is always `name`, so consumers of structured logs can dispatch on `type` before
//! looking at anything else.  Each record also carries a human-readable template with one `{}`
//! placeholder per field, which plain-text backends render as `key=value`.
use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::{
    error::ReadError,
    kind::MetricKind,
    registry::{Counter, Distribution, Gauge, GaugeValue, Histogram, Meter, MeterSnapshot, Timer},
    units::TimeUnit,
};

const GAUGE_TEMPLATE: &str = "GAUGE: {}, {}, {}";
const COUNTER_TEMPLATE: &str = "COUNTER: {}, {}, {}";
const HISTOGRAM_TEMPLATE: &str = "HISTOGRAM: {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}";
const METER_TEMPLATE: &str = "METER: {}, {}, {}, {}, {}, {}, {}, {}";
const TIMER_TEMPLATE: &str =
    "TIMER: {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}";

const PLACEHOLDER: &str = "{}";

/// Value of a single record field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
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

impl FieldValue {
    /// Returns the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(_) | FieldValue::Text(_) => None,
        }
    }

    /// Returns the value as a string slice, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<GaugeValue> for FieldValue {
    fn from(value: GaugeValue) -> Self {
        match value {
            GaugeValue::Int(v) => FieldValue::Int(v),
            GaugeValue::UInt(v) => FieldValue::UInt(v),
            GaugeValue::Float(v) => FieldValue::Float(v),
            GaugeValue::Bool(v) => FieldValue::Bool(v),
            GaugeValue::Text(v) => FieldValue::Text(v),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::UInt(v) => serializer.serialize_u64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
            FieldValue::Text(v) => serializer.serialize_str(v),
        }
    }
}

/// A named record field.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    key: &'static str,
    value: FieldValue,
}

impl Field {
    /// Machine-readable key of the field.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Value of the field.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

/// One formatted metric, ready to be emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    kind: MetricKind,
    template: &'static str,
    fields: Vec<Field>,
}

impl MetricRecord {
    fn new(kind: MetricKind, template: &'static str, name: String) -> Self {
        let mut record = MetricRecord { kind, template, fields: Vec::with_capacity(19) };
        record.push("type", FieldValue::Text(kind.as_str().to_string()));
        record.push("name", FieldValue::Text(name));
        record
    }

    fn push(&mut self, key: &'static str, value: FieldValue) -> &mut Self {
        self.fields.push(Field { key, value });
        self
    }

    fn push_f64(&mut self, key: &'static str, value: f64) -> &mut Self {
        self.push(key, FieldValue::Float(value))
    }

    /// Kind of the metric this record describes.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Human-readable template, with one `{}` per field.
    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Fields in schema order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Reported (prefixed) name of the metric.
    pub fn name(&self) -> &str {
        self.get("name").and_then(FieldValue::as_str).unwrap_or_default()
    }

    /// Looks up a field by key.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = self.fields.iter();
        let mut pieces = self.template.split(PLACEHOLDER).peekable();
        while let Some(piece) = pieces.next() {
            f.write_str(piece)?;
            if pieces.peek().is_some() {
                match fields.next() {
                    Some(field) => write!(f, "{}={}", field.key, field.value)?,
                    None => f.write_str(PLACEHOLDER)?,
                }
            }
        }
        Ok(())
    }
}

impl Serialize for MetricRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field.key, &field.value)?;
        }
        map.end()
    }
}

/// Formats metrics into [`MetricRecord`]s.
///
/// Applies the name prefix, converts rates and durations into the configured units, and lays the
/// fields out in schema order.  Formatting only reads from metric handles.
#[derive(Clone, Debug)]
pub struct ReportFormatter {
    prefix: String,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
    rate_label: String,
}

impl ReportFormatter {
    /// Creates a new `ReportFormatter`.
    pub fn new(prefix: impl Into<String>, rate_unit: TimeUnit, duration_unit: TimeUnit) -> Self {
        ReportFormatter {
            prefix: prefix.into(),
            rate_unit,
            duration_unit,
            rate_label: rate_unit.rate_label(),
        }
    }

    /// Joins the prefix and `name` with a `.`, skipping whichever is empty.
    pub fn prefixed_name(&self, name: &str) -> String {
        match (self.prefix.is_empty(), name.is_empty()) {
            (true, _) => name.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => {
                let mut prefixed = String::with_capacity(self.prefix.len() + 1 + name.len());
                prefixed.push_str(&self.prefix);
                prefixed.push('.');
                prefixed.push_str(name);
                prefixed
            }
        }
    }

    /// Formats a gauge.
    pub fn gauge(&self, name: &str, gauge: &dyn Gauge) -> Result<MetricRecord, ReadError> {
        let value = gauge.value()?;

        let mut record =
            MetricRecord::new(MetricKind::Gauge, GAUGE_TEMPLATE, self.prefixed_name(name));
        record.push("value", value.into());
        Ok(record)
    }

    /// Formats a counter.
    pub fn counter(&self, name: &str, counter: &dyn Counter) -> Result<MetricRecord, ReadError> {
        let count = counter.count()?;

        let mut record =
            MetricRecord::new(MetricKind::Counter, COUNTER_TEMPLATE, self.prefixed_name(name));
        record.push("count", FieldValue::Int(count));
        Ok(record)
    }

    /// Formats a histogram.  Values are reported as recorded, without conversion.
    pub fn histogram(
        &self,
        name: &str,
        histogram: &dyn Histogram,
    ) -> Result<MetricRecord, ReadError> {
        let snapshot = histogram.snapshot()?;
        let d = &snapshot.distribution;

        let mut record =
            MetricRecord::new(MetricKind::Histogram, HISTOGRAM_TEMPLATE, self.prefixed_name(name));
        record
            .push("count", FieldValue::UInt(snapshot.count))
            .push("min", FieldValue::Int(d.min))
            .push("max", FieldValue::Int(d.max))
            .push_f64("mean", d.mean)
            .push_f64("stddev", d.stddev)
            .push_f64("median", d.median)
            .push_f64("p75", d.p75)
            .push_f64("p95", d.p95)
            .push_f64("p98", d.p98)
            .push_f64("p99", d.p99)
            .push_f64("p999", d.p999);
        Ok(record)
    }

    /// Formats a meter.
    pub fn meter(&self, name: &str, meter: &dyn Meter) -> Result<MetricRecord, ReadError> {
        let snapshot = meter.snapshot()?;

        let mut record =
            MetricRecord::new(MetricKind::Meter, METER_TEMPLATE, self.prefixed_name(name));
        record.push("count", FieldValue::UInt(snapshot.count));
        self.push_rates(&mut record, &snapshot);
        Ok(record)
    }

    /// Formats a timer.
    pub fn timer(&self, name: &str, timer: &dyn Timer) -> Result<MetricRecord, ReadError> {
        let snapshot = timer.snapshot()?;

        let mut record =
            MetricRecord::new(MetricKind::Timer, TIMER_TEMPLATE, self.prefixed_name(name));
        record.push("count", FieldValue::UInt(snapshot.rates.count));
        self.push_durations(&mut record, &snapshot.durations);
        self.push_rates(&mut record, &snapshot.rates);
        record.push("duration_unit", FieldValue::Text(self.duration_unit.as_str().to_string()));
        Ok(record)
    }

    fn push_rates(&self, record: &mut MetricRecord, rates: &MeterSnapshot) {
        let unit = self.rate_unit;
        record
            .push_f64("mean_rate", unit.convert_rate(rates.mean_rate))
            .push_f64("m1", unit.convert_rate(rates.one_minute_rate))
            .push_f64("m5", unit.convert_rate(rates.five_minute_rate))
            .push_f64("m15", unit.convert_rate(rates.fifteen_minute_rate))
            .push("rate_unit", FieldValue::Text(self.rate_label.clone()));
    }

    fn push_durations(&self, record: &mut MetricRecord, d: &Distribution) {
        let unit = self.duration_unit;
        record
            .push_f64("min", unit.convert_duration(d.min as f64))
            .push_f64("max", unit.convert_duration(d.max as f64))
            .push_f64("mean", unit.convert_duration(d.mean))
            .push_f64("stddev", unit.convert_duration(d.stddev))
            .push_f64("median", unit.convert_duration(d.median))
            .push_f64("p75", unit.convert_duration(d.p75))
            .push_f64("p95", unit.convert_duration(d.p95))
            .push_f64("p98", unit.convert_duration(d.p98))
            .push_f64("p99", unit.convert_duration(d.p99))
            .push_f64("p999", unit.convert_duration(d.p999));
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        ReportFormatter::new("", TimeUnit::Seconds, TimeUnit::Milliseconds)
    }
}
