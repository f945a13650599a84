use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Outcome of looking up a metered value in a reading's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Number(f64),
    Malformed(Value),
}

impl SensorReading {
    /// Numbers and numeric strings are accepted. Non-finite values are malformed.
    pub fn field(&self, field: &str) -> FieldValue {
        let Some(value) = self.payload.get(field) else {
            return FieldValue::Missing;
        };

        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        match number {
            Some(n) if n.is_finite() => FieldValue::Number(n),
            _ => FieldValue::Malformed(value.clone()),
        }
    }

    /// Returns the numeric value of `field`, logging and skipping malformed ones.
    pub fn metered(&self, field: &str) -> Option<f64> {
        match self.field(field) {
            FieldValue::Number(n) => Some(n),
            FieldValue::Missing => None,
            FieldValue::Malformed(value) => {
                log::warn!(
                    "Skipping malformed value {value} for {field:?} on device {} at {}",
                    self.device_id,
                    self.timestamp.to_rfc3339()
                );
                None
            }
        }
    }
}
