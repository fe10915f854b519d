//! Sensor readings and their assessment.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::{RangeTable, StatusLabel};
use super::timestamp::{normalize, Timestamp};
use crate::error::{Result, TransportError};

/// Field holding the reading's timestamp, if the device sends one.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// One snapshot of sensor data: field name to raw JSON value.
///
/// No schema is enforced; numeric access goes through [`Reading::value`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    fields: Map<String, Value>,
}

impl Reading {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Interpret a snapshot payload.
    ///
    /// Null means "no data" and yields `Ok(None)`. Anything other than an
    /// object is rejected.
    pub fn from_payload(payload: Value) -> Result<Option<Self>, TransportError> {
        match payload {
            Value::Null => Ok(None),
            Value::Object(fields) => Ok(Some(Self { fields })),
            other => Err(TransportError::Payload(kind_of(&other).to_string())),
        }
    }

    /// Numeric value of a field, if present and numeric.
    pub fn value(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Iterate over every numeric field, skipping the timestamp.
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .filter(|(name, _)| name.as_str() != TIMESTAMP_FIELD)
            .filter_map(|(name, v)| v.as_f64().map(|n| (name.as_str(), n)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// When the reading was taken.
    ///
    /// Falls back to the current time when the payload has no usable
    /// `timestamp` field.
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        let raw = match self.fields.get(TIMESTAMP_FIELD) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Timestamp::Millis),
            Some(Value::String(s)) => Some(Timestamp::Text(s.clone())),
            _ => None,
        };
        normalize(raw.as_ref())
    }

    /// Classify every numeric field against `ranges`.
    pub fn assess(&self, ranges: &RangeTable) -> Assessment {
        let statuses: BTreeMap<String, FieldStatus> = self
            .numeric_fields()
            .map(|(name, value)| {
                let status = ranges.classify(name, value);
                (name.to_string(), FieldStatus { value, status })
            })
            .collect();

        // Overall status is the worst known field
        let overall = statuses
            .values()
            .map(|f| f.status)
            .filter(|s| *s != StatusLabel::Unknown)
            .max()
            .unwrap_or(StatusLabel::Unknown);

        Assessment { statuses, overall }
    }
}

impl From<Map<String, Value>> for Reading {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A classified numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStatus {
    pub value: f64,
    pub status: StatusLabel,
}

/// Per-field statuses of a reading plus the worst of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub statuses: BTreeMap<String, FieldStatus>,
    pub overall: StatusLabel,
}

impl Assessment {
    /// Fields whose status is warning or danger, worst first.
    pub fn alerts(&self) -> Vec<(&str, &FieldStatus)> {
        let mut result: Vec<_> = self
            .statuses
            .iter()
            .filter(|(_, f)| matches!(f.status, StatusLabel::Warning | StatusLabel::Danger))
            .map(|(name, f)| (name.as_str(), f))
            .collect();
        result.sort_by(|a, b| b.1.status.cmp(&a.1.status).then_with(|| a.0.cmp(b.0)));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Reading {
        Reading::from_payload(json!({
            "TDS": 450,
            "Temperature": 22.5,
            "Turbidity": 12.0,
            "pH": 7.1,
            "Salinity": 3.0,
            "timestamp": 1_700_000_000_000i64,
            "device": "tank-1"
        }))
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_from_payload_null_and_object() {
        assert_eq!(Reading::from_payload(Value::Null).unwrap(), None);
        let reading = Reading::from_payload(json!({})).unwrap().unwrap();
        assert!(reading.is_empty());
    }

    #[test]
    fn test_from_payload_rejects_scalar() {
        let err = Reading::from_payload(json!(42)).unwrap_err();
        assert_eq!(err, TransportError::Payload("number".to_string()));
    }

    #[test]
    fn test_numeric_access() {
        let reading = sample();
        assert_eq!(reading.value("TDS"), Some(450.0));
        assert_eq!(reading.value("device"), None);
        assert_eq!(reading.value("missing"), None);

        let names: Vec<&str> = reading.numeric_fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Salinity", "TDS", "Temperature", "Turbidity", "pH"]);
    }

    #[test]
    fn test_assess() {
        let assessment = sample().assess(&RangeTable::default());
        assert_eq!(assessment.statuses["TDS"].status, StatusLabel::Good);
        assert_eq!(assessment.statuses["Temperature"].status, StatusLabel::Excellent);
        assert_eq!(assessment.statuses["Turbidity"].status, StatusLabel::Danger);
        assert_eq!(assessment.statuses["Salinity"].status, StatusLabel::Unknown);
        assert_eq!(assessment.overall, StatusLabel::Danger);

        let alerts = assessment.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "Turbidity");
    }

    #[test]
    fn test_assess_only_unknown() {
        let reading = Reading::from_payload(json!({ "Salinity": 1 })).unwrap().unwrap();
        assert_eq!(reading.assess(&RangeTable::default()).overall, StatusLabel::Unknown);
    }

    #[test]
    fn test_timestamp() {
        let reading = sample();
        assert_eq!(reading.timestamp().unwrap().timestamp_millis(), 1_700_000_000_000);

        let without = Reading::from_payload(json!({ "pH": 7 })).unwrap().unwrap();
        let now = Utc::now();
        let ts = without.timestamp().unwrap();
        assert!((ts - now).num_seconds().abs() < 2);
    }
}
