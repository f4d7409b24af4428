use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Upper bound of commands sent in one bulk request by `delete_everything`.
pub(crate) const BULK_CHUNK: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Collection(&'static str),
    Index(String),
}

impl Source {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Collection(name) => name,
            Self::Index(name) => name,
        }
    }

    pub(crate) fn rql(&self) -> String {
        match self {
            Self::Collection(name) => format!("from {name}"),
            Self::Index(name) => format!("from index '{}'", quote(name)),
        }
    }
}

// Body of a single-quoted RQL literal.
fn quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(name) => write!(f, "collection {name}"),
            Self::Index(name) => write!(f, "index {name}"),
        }
    }
}

/// Statistics reported by the server for one executed query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_results: i64,
    pub skipped_results: i64,
    pub is_stale: bool,
    pub duration_ms: i64,
    pub index_name: String,
}

/// Counter value as returned inside counter includes and counter reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct CounterDetail {
    pub document_id: String,
    pub counter_name: String,
    pub total_value: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct QueryResponse {
    pub results: Vec<Value>,
    pub includes: Map<String, Value>,
    pub counter_includes: Map<String, Value>,
    pub total_results: i64,
    pub skipped_results: i64,
    pub is_stale: bool,
    pub duration_in_ms: i64,
    pub index_name: String,
}

impl QueryResponse {
    pub(crate) fn stats(&self) -> QueryStats {
        QueryStats {
            total_results: self.total_results,
            skipped_results: self.skipped_results,
            is_stale: self.is_stale,
            duration_ms: self.duration_in_ms,
            index_name: self.index_name.clone(),
        }
    }

    /// Flattens `{docId: [detail, ...]}` into counter details. Null entries are skipped.
    pub(crate) fn counters(&self) -> Vec<CounterDetail> {
        self.counter_includes
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|v| serde_json::from_value::<CounterDetail>(v.clone()).ok())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct OperationIdResponse {
    pub operation_id: i64,
}
