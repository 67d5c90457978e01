//! Field-sparse sensor readings.
//!
//! A [`PartialReading`] carries only the channels a given fetch returned.
//! Merge semantics are "present overrides, absent preserves": `None` always
//! means "not in this update", never "clear the value".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// A 3-axis sensor sample (accelerometer or gyroscope).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A partial update for an entity's current readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialReading {
    pub heart_rate: Option<f64>,
    pub temperature: Option<f64>,
    pub fall_detected: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub steps: Option<u32>,
    pub acceleration: Option<Vector3>,
    pub gyroscope: Option<Vector3>,
    pub battery: Option<f64>,
}

impl PartialReading {
    /// A reading that only carries heart rate and temperature.
    pub fn vitals(heart_rate: f64, temperature: f64) -> Self {
        Self {
            heart_rate: Some(heart_rate),
            temperature: Some(temperature),
            ..Self::default()
        }
    }

    /// `true` when no channel is present.
    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.temperature.is_none()
            && self.fall_detected.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.steps.is_none()
            && self.acceleration.is_none()
            && self.gyroscope.is_none()
            && self.battery.is_none()
    }

    /// Overwrite every channel present in `update`, keeping the rest.
    pub fn overlay(&mut self, update: &PartialReading) {
        fn set<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut self.heart_rate, update.heart_rate);
        set(&mut self.temperature, update.temperature);
        set(&mut self.fall_detected, update.fall_detected);
        set(&mut self.latitude, update.latitude);
        set(&mut self.longitude, update.longitude);
        set(&mut self.steps, update.steps);
        set(&mut self.acceleration, update.acceleration);
        set(&mut self.gyroscope, update.gyroscope);
        set(&mut self.battery, update.battery);
    }

    /// Extract a reading from a feed response body.
    ///
    /// The body must be a JSON object. Individual fields of unexpected
    /// shape are dropped from this update instead of failing it, so one
    /// misbehaving sensor channel does not block the others.
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        let obj = value.as_object().ok_or_else(|| {
            CoreError::Validation(format!("expected a JSON object, got {}", kind_of(value)))
        })?;

        Ok(Self {
            heart_rate: number(obj, "heartRate"),
            temperature: number(obj, "temperature"),
            fall_detected: obj.get("fallDetected").and_then(Value::as_bool),
            latitude: number(obj, "latitude"),
            longitude: number(obj, "longitude"),
            steps: obj
                .get("steps")
                .and_then(Value::as_u64)
                .and_then(|s| u32::try_from(s).ok()),
            acceleration: vector(obj, "acceleration"),
            gyroscope: vector(obj, "gyroscope"),
            battery: number(obj, "battery"),
        })
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn vector(obj: &Map<String, Value>, key: &str) -> Option<Vector3> {
    let inner = obj.get(key)?.as_object()?;
    Some(Vector3 {
        x: number(inner, "x")?,
        y: number(inner, "y")?,
        z: number(inner, "z")?,
    })
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
