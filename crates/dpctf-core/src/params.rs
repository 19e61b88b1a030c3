use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DpctfError, Result};

/// Flat key/value parameter map resolved for one test.
///
/// Values stay as raw JSON until read; typed accessors validate on access, so
/// an absent or mistyped key surfaces as [`DpctfError::Config`] at the point
/// an observation actually needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParametersDict {
    values: BTreeMap<String, Value>,
}

impl ParametersDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.into(), value);
        Ok(())
    }

    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn raw(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| DpctfError::Config(format!("Missing parameter '{key}'")))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.raw(key)?
            .as_f64()
            .ok_or_else(|| DpctfError::Config(format!("Parameter '{key}' is not a number")))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        let value = self.raw(key)?;
        if let Some(v) = value.as_i64() {
            return Ok(v);
        }
        // Test runner JSON sometimes writes integral values as 2.0
        match value.as_f64() {
            Some(v) if v.fract() == 0.0 => Ok(v as i64),
            _ => Err(DpctfError::Config(format!(
                "Parameter '{key}' is not an integer"
            ))),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.raw(key)?
            .as_str()
            .ok_or_else(|| DpctfError::Config(format!("Parameter '{key}' is not a string")))
    }

    /// Deserialize a structured parameter such as a playout list.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.raw(key)?.clone();
        serde_json::from_value(value)
            .map_err(|e| DpctfError::Config(format!("Parameter '{key}' has wrong shape: {e}")))
    }

    /// Numeric parameter that defaults to 0 when absent.
    pub fn f64_or_zero(&self, key: &str) -> Result<f64> {
        if self.contains(key) {
            self.get_f64(key)
        } else {
            Ok(0.0)
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
