//! Variable values reported by, and seeded into, ValStep.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of a planning variable: a predicate truth value or a function value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

/// A variable value without a timestamp, as decoded from ValStep output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub name: String,
    pub value: Value,
}

impl VariableValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A variable value together with the time it was last set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedVariableValue {
    pub time: f64,
    pub name: String,
    pub value: Value,
}

impl TimedVariableValue {
    pub fn new(time: f64, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            time,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Timestamps a decoded value.
    pub fn from_value(time: f64, value: VariableValue) -> Self {
        Self {
            time,
            name: value.name,
            value: value.value,
        }
    }

    /// Returns true if `name` refers to this variable, ignoring case.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }

    /// Same variable (case-insensitive) holding an equal value. Time is ignored.
    pub fn same_value(&self, other: &TimedVariableValue) -> bool {
        self.is_named(&other.name) && self.value == other.value
    }

    /// Replaces the value and timestamp in place.
    pub fn update(&mut self, time: f64, value: &VariableValue) {
        self.time = time;
        self.value = value.value;
    }
}

impl fmt::Display for TimedVariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.time, self.name, self.value)
    }
}
