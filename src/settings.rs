use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A single configuration value, either already typed or still raw text as
/// it arrived from the command line or the environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:e}"),
            Value::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Where a layer of settings came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsOrigin {
    Defaults,
    Environment,
    ConfigFile,
    CommandLine,
}

impl fmt::Display for SettingsOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsOrigin::Defaults => write!(f, "built-in defaults"),
            SettingsOrigin::Environment => write!(f, "environment defaults"),
            SettingsOrigin::ConfigFile => write!(f, "config file"),
            SettingsOrigin::CommandLine => write!(f, "command line"),
        }
    }
}

/// Key/value settings produced by one source. Tool sections are kept apart
/// from the top-level pipeline options.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSettings {
    pub origin: SettingsOrigin,
    pub options: BTreeMap<String, Value>,
    pub tools: BTreeMap<String, BTreeMap<String, Value>>,
}

impl RawSettings {
    pub fn new(origin: SettingsOrigin) -> Self {
        Self {
            origin,
            options: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_tool(mut self, tool: &str, key: &str, value: impl Into<Value>) -> Self {
        self.set_tool(tool, key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.options.insert(key.to_string(), value.into());
    }

    pub fn set_tool(&mut self, tool: &str, key: &str, value: impl Into<Value>) {
        self.tools
            .entry(tool.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty() && self.tools.is_empty()
    }
}
