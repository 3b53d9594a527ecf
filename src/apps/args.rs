//! Call arguments passed to task functions.
//!
//! Caller-supplied values are JSON. Adapters append capability handles
//! (a model client, a SQL client, an object store) after them.

use serde_json::{Map, Value};
use std::fmt;

use crate::adapters::{ModelHandle, SqlHandle, StoreHandle};

/// One positional argument
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Store(StoreHandle),
    Model(ModelHandle),
    Sql(SqlHandle),
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }

    fn describe(&self) -> Value {
        match self {
            Arg::Value(v) => v.clone(),
            Arg::Store(_) => Value::String("<store>".into()),
            Arg::Model(m) => Value::String(format!("<model:{}>", m.model())),
            Arg::Sql(_) => Value::String("<sql>".into()),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "Value({v})"),
            Arg::Store(_) => f.write_str("Store"),
            Arg::Model(m) => write!(f, "Model({})", m.model()),
            Arg::Sql(_) => f.write_str("Sql"),
        }
    }
}

/// Positional and named arguments of a task call
#[derive(Clone, Debug, Default)]
pub struct Args {
    positional: Vec<Arg>,
    named: Map<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a positional JSON argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(Arg::Value(value.into()));
        self
    }

    /// Add a named JSON argument
    pub fn named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(key.into(), value.into());
        self
    }

    /// Append a positional argument after everything already present
    pub fn push(&mut self, arg: Arg) {
        self.positional.push(arg);
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn positional(&self) -> &[Arg] {
        &self.positional
    }

    pub fn named_args(&self) -> &Map<String, Value> {
        &self.named
    }

    /// JSON value at position `index`, if that argument is a value
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.positional.get(index).and_then(Arg::as_value)
    }

    /// All positional JSON values, in order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().filter_map(Arg::as_value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.named.get(key)
    }

    /// The store handle appended for vectordb tasks
    pub fn store(&self) -> Option<&StoreHandle> {
        self.positional.iter().rev().find_map(|a| match a {
            Arg::Store(s) => Some(s),
            _ => None,
        })
    }

    /// The model client appended for inference tasks
    pub fn model(&self) -> Option<&ModelHandle> {
        self.positional.iter().rev().find_map(|a| match a {
            Arg::Model(m) => Some(m),
            _ => None,
        })
    }

    /// The SQL client appended for sql tasks
    pub fn sql(&self) -> Option<&SqlHandle> {
        self.positional.iter().rev().find_map(|a| match a {
            Arg::Sql(s) => Some(s),
            _ => None,
        })
    }

    /// Every top-level string argument, positional first, then named
    pub fn string_values(&self) -> Vec<String> {
        self.values()
            .chain(self.named.values())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// JSON rendering used for event payloads; handles show as placeholders
    pub fn to_json(&self) -> Value {
        let positional: Vec<Value> = self.positional.iter().map(Arg::describe).collect();
        if self.named.is_empty() {
            Value::Array(positional)
        } else {
            serde_json::json!({ "args": positional, "kwargs": self.named })
        }
    }
}

impl From<Value> for Args {
    fn from(value: Value) -> Self {
        Args::new().arg(value)
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        values.into_iter().fold(Args::new(), Args::arg)
    }
}

impl From<&str> for Args {
    fn from(value: &str) -> Self {
        Args::new().arg(value)
    }
}

impl From<()> for Args {
    fn from(_: ()) -> Self {
        Args::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_values_skip_non_strings() {
        let args = Args::new()
            .arg("to_int")
            .arg(3)
            .named("prompt", "multiply")
            .named("limit", 10);
        assert_eq!(args.string_values(), vec!["to_int", "multiply"]);
    }

    #[test]
    fn test_json_rendering() {
        let args = Args::from(vec![json!(1), json!("a")]);
        assert_eq!(args.to_json(), json!([1, "a"]));

        let args = Args::from(json!("x")).named("k", true);
        assert_eq!(args.to_json(), json!({"args": ["x"], "kwargs": {"k": true}}));
    }
}
