// Inbound sensor readings and payload validation
use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::StreamError;

/// One BLE device seen by a radio sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub signal: f64,
}

/// A single live or historical message, classified by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Scalar { time: String, value: f64 },
    Matrix { time: String, value: Vec<Vec<f64>> },
    Devices { time: String, devices: Vec<Device> },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReading {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    time_of_reading: Option<String>,
    #[serde(default)]
    time_of_create: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    reading: Option<Value>,
    #[serde(default)]
    devices: Option<Value>,
}

impl Reading {
    pub fn from_json(payload: &str) -> Result<Reading, StreamError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| StreamError::MalformedPayload(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(payload: Value) -> Result<Reading, StreamError> {
        if !payload.is_object() {
            return Err(StreamError::MalformedPayload("payload is not an object".to_string()));
        }
        let raw: RawReading = serde_json::from_value(payload)
            .map_err(|e| StreamError::MalformedPayload(e.to_string()))?;

        let time = raw
            .time
            .or(raw.time_of_reading)
            .or(raw.time_of_create)
            .unwrap_or_default();

        if let Some(devices) = raw.devices {
            let Value::Array(entries) = devices else {
                return Err(StreamError::MalformedPayload("devices is not a list".to_string()));
            };
            let devices = entries.iter().filter_map(parse_device).collect();
            return Ok(Reading::Devices { time, devices });
        }

        match raw.value.or(raw.reading) {
            Some(Value::Number(n)) => n
                .as_f64()
                .map(|value| Reading::Scalar { time, value })
                .ok_or_else(|| StreamError::MalformedPayload("value out of range".to_string())),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(|value| Reading::Scalar { time, value })
                .map_err(|_| StreamError::MalformedPayload(format!("non-numeric value: {}", s))),
            Some(Value::Array(rows)) => parse_matrix(&rows)
                .map(|value| Reading::Matrix { time, value })
                .ok_or_else(|| StreamError::MalformedPayload("value is not a matrix".to_string())),
            Some(other) => Err(StreamError::MalformedPayload(format!(
                "unsupported value: {}",
                other
            ))),
            None => Err(StreamError::MalformedPayload("missing value and devices".to_string())),
        }
    }

    /// Builds a scalar reading stamped with an RFC 3339 UTC time.
    #[cfg(test)]
    pub fn scalar_at(time_ms: i64, value: f64) -> Reading {
        let time = DateTime::from_timestamp_millis(time_ms)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        Reading::Scalar { time, value }
    }

    pub fn time(&self) -> &str {
        match self {
            Reading::Scalar { time, .. }
            | Reading::Matrix { time, .. }
            | Reading::Devices { time, .. } => time,
        }
    }

    /// Milliseconds since the epoch, or `None` when the time does not parse.
    pub fn timestamp_ms(&self) -> Option<i64> {
        parse_timestamp_ms(self.time())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reading::Scalar { .. } => "scalar",
            Reading::Matrix { .. } => "matrix",
            Reading::Devices { .. } => "devices",
        }
    }
}

/// Accepts RFC 3339 and zone-less ISO 8601 (read as UTC).
pub fn parse_timestamp_ms(time: &str) -> Option<i64> {
    let time = time.trim();
    if time.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(time) {
        return Some(parsed.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(time, format).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn parse_matrix(rows: &[Value]) -> Option<Vec<Vec<f64>>> {
    if rows.is_empty() {
        return None;
    }
    rows.iter()
        .map(|row| {
            row.as_array()?
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<f64>>>()
        })
        .collect()
}

fn parse_device(entry: &Value) -> Option<Device> {
    let id = match entry.get("id").or_else(|| entry.get("imei"))? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let signal = match entry.get("signal").or_else(|| entry.get("rssi"))? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(Device { id, signal })
}
