//! Values, result sets and per-call options shared by every driver layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// =============================================================================
// VALUE
// =============================================================================

/// A bound argument or a column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// JSON rendering used when handing rows to API layers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Rows returned by a read statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Value::to_json))
                    .collect()
            })
            .collect()
    }
}

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Per-call options threaded through every driver layer.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Skip the read cache for this call. Only the caching layer reads it.
    pub bypass_cache: bool,
    /// Caller cancellation signal
    pub cancel: Option<CancellationToken>,
    /// Upper bound on the call, including pool acquisition
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a call that must reach the datastore.
    pub fn bypass() -> Self {
        Self {
            bypass_cache: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from("1"), Value::Text("1".into()));
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Text("a".into()).as_str(), Some("a"));
    }

    #[test]
    fn test_result_set_lookup() {
        let rows = ResultSet::new(["id", "name"])
            .with_row(vec!["1".into(), "buy milk".into()])
            .with_row(vec!["2".into(), "new".into()]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows.value(1, "name"), Some(&Value::Text("new".into())));
        assert_eq!(rows.value(0, "missing"), None);
        assert_eq!(rows.value(5, "id"), None);
    }

    #[test]
    fn test_json_rows() {
        let rows = ResultSet::new(["name"]).with_row(vec!["buy milk".into()]);
        let json = rows.to_json_rows();
        assert_eq!(
            serde_json::Value::Object(json[0].clone()),
            serde_json::json!({"name": "buy milk"})
        );
    }

    #[test]
    fn test_result_set_serde_is_lossless() {
        let rows = ResultSet::new(["a", "b", "c", "d"]).with_row(vec![
            Value::Null,
            Value::Float(0.1 + 0.2),
            Value::Bytes(vec![0, 255]),
            Value::Bool(true),
        ]);
        let bytes = serde_json::to_vec(&rows).unwrap();
        let back: ResultSet = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_bypass_options() {
        let opts = QueryOptions::bypass().with_timeout(Duration::from_secs(1));
        assert!(opts.bypass_cache);
        assert_eq!(opts.timeout, Some(Duration::from_secs(1)));
        assert!(!QueryOptions::new().bypass_cache);
    }
}
