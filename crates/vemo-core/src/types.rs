//! Core data types for vemo

use crate::error::{CoreError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Column holding the vehicle identity in datasets and telemetry messages
pub const DEVICE_ID_FIELD: &str = "vehicle_id";

/// Column holding the CO2 reading in datasets and telemetry messages
pub const CO2_FIELD: &str = "vehicle_CO2";

/// Prefix of every provisioned device name
pub const DEVICE_NAME_PREFIX: &str = "device_";

/// Stable name of a simulated device.
///
/// Provisioned devices derive their name from a numeric index, so the same
/// index always maps to the same identity across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Identity for a device index (`device_<index>`)
    pub fn from_index(index: u32) -> Self {
        Self(format!("{}{}", DEVICE_NAME_PREFIX, index))
    }

    /// Wrap an arbitrary name (e.g. a dataset file stem such as `vehicle3`)
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the index of a `device_<index>` identity
    pub fn index(&self) -> Option<u32> {
        self.0.strip_prefix(DEVICE_NAME_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Value of one telemetry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric cell (serialized as a JSON number)
    Number(f64),
    /// Anything that does not parse as a finite number, kept verbatim (trimmed)
    Text(String),
}

impl FieldValue {
    /// Coerce a raw dataset cell.
    ///
    /// Blank cells become `0.0`, parseable finite numbers become `Number`,
    /// everything else is kept as trimmed text.
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return FieldValue::Number(0.0);
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Number(v),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    /// Apply coercion to an already materialized value. Numbers are left untouched.
    pub fn recoerce(self) -> Self {
        match self {
            FieldValue::Number(v) => FieldValue::Number(v),
            FieldValue::Text(s) => Self::coerce(&s),
        }
    }

    /// Convert a JSON value received off the wire
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => FieldValue::Number(v),
                None => FieldValue::Text(n.to_string()),
            },
            Value::String(s) => Self::coerce(s),
            other => FieldValue::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Number(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// A named value inside a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One row of a per-device timeseries.
///
/// Field order follows the dataset's column order and is kept when the
/// record is serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    fields: Vec<Field>,
}

impl TelemetryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field. An existing key keeps its position and gets the new value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(existing) => existing.value = value,
            None => self.fields.push(Field { key, value }),
        }
    }

    /// Build a record from raw `(column, cell)` pairs, coercing every cell
    pub fn from_cells<'a, I, K>(cells: I) -> Self
    where
        I: IntoIterator<Item = (K, &'a str)>,
        K: Into<String>,
    {
        let mut record = Self::new();
        for (key, raw) in cells {
            record.insert(key, FieldValue::coerce(raw));
        }
        record
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|f| (f.key.as_str(), &f.value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a JSON object, coercing string values the same way dataset cells are
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        let mut record = Self::with_capacity(map.len());
        for (key, value) in map {
            record.insert(key.clone(), FieldValue::from_json(value));
        }
        record
    }

    /// Parse any JSON value. Only objects yield a record.
    pub fn from_json_value(value: &Value) -> Option<Self> {
        value.as_object().map(Self::from_json_map)
    }

    /// Parse a wire payload
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_json_value(&value).ok_or_else(|| {
            CoreError::InvalidRecord(format!("expected a JSON object, got {}", json_kind(&value)))
        })
    }

    /// Flat JSON object mirroring the record's fields
    pub fn to_json_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            map.insert(field.key.clone(), field.value.to_json());
        }
        Value::Object(map)
    }

    /// Wire payload for this record
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.key, &field.value.to_json())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TelemetryRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_json_map(&map))
    }
}

/// Short name of a JSON value's kind, for log and error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_is_deterministic() {
        for i in [0u32, 1, 7, 42, 99_999] {
            assert_eq!(DeviceId::from_index(i), DeviceId::from_index(i));
            assert_eq!(DeviceId::from_index(i).index(), Some(i));
        }
        assert_eq!(DeviceId::from_index(3).as_str(), "device_3");
        assert_eq!(DeviceId::new("vehicle3").index(), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(FieldValue::coerce(""), FieldValue::Number(0.0));
        assert_eq!(FieldValue::coerce("   "), FieldValue::Number(0.0));
        assert_eq!(FieldValue::coerce("12.5"), FieldValue::Number(12.5));
        assert_eq!(FieldValue::coerce(" 7 "), FieldValue::Number(7.0));
        assert_eq!(FieldValue::coerce("veh0"), FieldValue::Text("veh0".to_string()));
        assert_eq!(FieldValue::coerce(" veh0 "), FieldValue::Text("veh0".to_string()));
        assert_eq!(FieldValue::coerce("NaN"), FieldValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_recoerce_is_idempotent() {
        for raw in ["", "12.5", "veh0", "-3", "1e3"] {
            let once = FieldValue::coerce(raw);
            assert_eq!(once.clone().recoerce(), once);
        }
    }

    #[test]
    fn test_record_insert_keeps_position() {
        let mut record = TelemetryRecord::new()
            .field("a", 1.0)
            .field("b", "x");
        record.insert("a", 2.0);

        let keys: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&FieldValue::Number(2.0)));
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = TelemetryRecord::from_cells([
            ("timestep_time", "0.00"),
            ("vehicle_CO2", ""),
            ("vehicle_id", "veh0"),
            ("vehicle_speed", "13.9"),
        ]);

        let payload = record.to_json().unwrap();
        assert_eq!(
            payload,
            r#"{"timestep_time":0.0,"vehicle_CO2":0.0,"vehicle_id":"veh0","vehicle_speed":13.9}"#
        );

        let parsed = TelemetryRecord::from_json_str(&payload).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_wire_strings_are_coerced() {
        let parsed =
            TelemetryRecord::from_json_str(r#"{"vehicle_id":"v1","vehicle_CO2":"30.5"}"#).unwrap();
        assert_eq!(parsed.get(CO2_FIELD), Some(&FieldValue::Number(30.5)));
        assert_eq!(parsed.get(DEVICE_ID_FIELD), Some(&FieldValue::Text("v1".into())));
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        assert!(TelemetryRecord::from_json_str("[1, 2]").is_err());
        assert!(TelemetryRecord::from_json_str("not json").is_err());
    }
}
