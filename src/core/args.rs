//! Argument decoding.
//!
//! Requests carry their arguments in one of three shapes, depending on the
//! protocol version of the caller:
//!
//! - nothing at all,
//! - a legacy whitespace-separated string, matched positionally against the
//!   command's declared parameters,
//! - a keyed mapping, where every declared parameter must be present and
//!   unknown keys pass through for forward compatibility.
//!
//! Decoding normalizes all three into [`DecodedArgs`]. The literal `"none"`
//! (any case) in a string position is the null sentinel.

use crate::core::error::RunnerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Arguments exactly as they arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArgs {
    Absent,
    Legacy(String),
    Keyed(Map<String, Value>),
    /// Any other JSON shape; rejected at decode time.
    Other(Value),
}

impl RawArgs {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => RawArgs::Absent,
            Value::String(s) => RawArgs::Legacy(s),
            Value::Object(map) => RawArgs::Keyed(map),
            other => RawArgs::Other(other),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RawArgs::Absent => Value::Null,
            RawArgs::Legacy(s) => Value::String(s.clone()),
            RawArgs::Keyed(map) => Value::Object(map.clone()),
            RawArgs::Other(v) => v.clone(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            RawArgs::Absent => "null",
            RawArgs::Legacy(_) => "string",
            RawArgs::Keyed(_) => "object",
            RawArgs::Other(Value::Bool(_)) => "bool",
            RawArgs::Other(Value::Number(_)) => "number",
            RawArgs::Other(Value::Array(_)) => "array",
            RawArgs::Other(_) => "unknown",
        }
    }
}

/// Canonical parameter mapping handed to a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedArgs(BTreeMap<String, Value>);

impl DecodedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_null(&self, key: &str) -> bool {
        matches!(self.0.get(key), None | Some(Value::Null))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Value as text; numbers and booleans are rendered, null is `None`.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Value split on `sep`, empty items dropped.
    pub fn list(&self, key: &str, sep: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(_) => self
                .text(key)
                .map(|s| {
                    s.split(sep)
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DecodedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                Value::Null => write!(f, "{k}: None")?,
                Value::String(s) => write!(f, "{k}: {s}")?,
                other => write!(f, "{k}: {other}")?,
            }
        }
        write!(f, "}}")
    }
}

fn is_null_token(s: &str) -> bool {
    s.eq_ignore_ascii_case("none")
}

fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) if is_null_token(&s) => Value::Null,
        other => other,
    }
}

/// Normalizes `raw` against the declared parameter list of `command`.
pub fn decode(command: &str, raw: &RawArgs, expected: &[&str]) -> Result<DecodedArgs, RunnerError> {
    let mut out = DecodedArgs::new();
    match raw {
        RawArgs::Absent => {
            for key in expected {
                out.insert(*key, Value::Null);
            }
        }
        RawArgs::Legacy(text) => {
            let values: Vec<&str> = text.split_whitespace().collect();
            if values.len() > expected.len() {
                return Err(RunnerError::ArgDecode(format!(
                    "{command} too many arguments: expected {} got {}",
                    expected.len(),
                    values.len()
                )));
            }
            for (i, key) in expected.iter().enumerate() {
                let value = match values.get(i) {
                    Some(v) if !is_null_token(v) => Value::String((*v).to_string()),
                    _ => Value::Null,
                };
                out.insert(*key, value);
            }
        }
        RawArgs::Keyed(map) => {
            if let Some(missing) = expected.iter().find(|k| !map.contains_key(**k)) {
                return Err(RunnerError::ArgDecode(format!(
                    "{command} missing argument {missing}"
                )));
            }
            for (key, value) in map {
                out.insert(key.clone(), normalize(value.clone()));
            }
        }
        RawArgs::Other(_) => {
            return Err(RunnerError::ArgDecode(format!(
                "args data type {} not supported",
                raw.shape()
            )));
        }
    }
    Ok(out)
}
