//! Named-parameter bag passed through to clustering strategies
//!
//! The bag is a JSON object. Strategies pull the keys they recognize and
//! ignore everything else. A JSON `null` counts as "not supplied", so callers
//! can send `{"random_state": null}` and get the default.

use biocluster_common::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBag(Map<String, Value>);

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from an arbitrary JSON value (`null` yields an empty bag)
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map)),
            other => Err(AnalysisError::InvalidInput(format!(
                "Parameters must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Whether `key` is present with a non-null value
    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .filter(|x| x.is_finite())
                .map(Some)
                .ok_or_else(|| type_error(key, "a finite number", v)),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => as_whole_number(v)
                .map(Some)
                .ok_or_else(|| type_error(key, "a non-negative integer", v)),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        Ok(self.get_u64(key)?.map(|v| v as usize))
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.raw(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| type_error(key, "an integer", v)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(v) => match v.as_u64() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                _ => Err(type_error(key, "a boolean", v)),
            },
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.raw(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(v) => Err(type_error(key, "a string", v)),
        }
    }
}

impl From<Map<String, Value>> for ParamBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Accept `3` and `3.0`, reject `3.5` and negatives
fn as_whole_number(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| {
        v.as_f64()
            .filter(|x| x.is_finite() && *x >= 0.0 && x.fract() == 0.0 && *x <= u64::MAX as f64)
            .map(|x| x as u64)
    })
}

fn type_error(key: &str, expected: &str, got: &Value) -> AnalysisError {
    AnalysisError::InvalidInput(format!("Parameter `{key}` must be {expected}, got {got}"))
}

/// Error for a recognized key carrying a value outside its domain
pub(crate) fn invalid_value(
    key: &str,
    got: impl std::fmt::Display,
    allowed: &str,
) -> AnalysisError {
    AnalysisError::InvalidInput(format!(
        "Parameter `{key}` has unsupported value {got} (expected {allowed})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocluster_common::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_null_means_default() {
        let bag = ParamBag::from_value(json!({"random_state": null, "tol": 0.5})).unwrap();
        assert_eq!(bag.get_u64("random_state").unwrap(), None);
        assert!(!bag.contains("random_state"));
        assert_eq!(bag.get_f64("tol").unwrap(), Some(0.5));
        assert_eq!(bag.get_f64("missing").unwrap(), None);
    }

    #[test]
    fn test_whole_numbers() {
        let bag = ParamBag::new()
            .with("a", 3)
            .with("b", 3.0)
            .with("c", 3.5)
            .with("d", -1);
        assert_eq!(bag.get_usize("a").unwrap(), Some(3));
        assert_eq!(bag.get_usize("b").unwrap(), Some(3));
        assert_eq!(bag.get_usize("c").unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(bag.get_usize("d").is_err());
        assert_eq!(bag.get_i64("d").unwrap(), Some(-1));
    }

    #[test]
    fn test_bool_accepts_zero_one() {
        let bag = ParamBag::new().with("x", 1).with("y", false).with("z", "yes");
        assert_eq!(bag.get_bool("x").unwrap(), Some(true));
        assert_eq!(bag.get_bool("y").unwrap(), Some(false));
        assert!(bag.get_bool("z").is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(ParamBag::from_value(json!([1, 2])).is_err());
        assert_eq!(ParamBag::from_value(Value::Null).unwrap(), ParamBag::new());
    }
}
