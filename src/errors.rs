use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Server-side error payload returned with 400 and 500 responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdvancedError {
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Error")]
    pub error: String,
}

#[derive(Debug, Error)]
#[error("unexpected status {status} for {method} {url}{}", .advanced.as_ref().map(|a| format!(": {}: {}", a.kind, a.message)).unwrap_or_default())]
pub struct UnexpectedStatusError {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub advanced: Option<AdvancedError>,
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("No such entity: {0}")]
    NoSuchEntity(String),

    #[error("Concurrent transaction: the document changed after it was loaded")]
    ConcurrentTransaction,

    #[error("Database does not exist: {0}")]
    DatabaseDoesNotExist(String),

    #[error(transparent)]
    UnexpectedStatus(Box<UnexpectedStatusError>),

    #[error(transparent)]
    Multi(MultiError),

    #[error("HTTP transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Collection mismatch for {id}: expected {expected}, found {actual}")]
    CollectionMismatch { id: String, expected: String, actual: String },

    #[error("Operation {id} failed: {message}")]
    Operation { id: i64, message: String },

    #[error("{at}: {source}")]
    Traced {
        at: &'static str,
        #[source]
        source: Box<DbError>,
    },
}

impl DbError {
    /// The innermost error, skipping every `Traced` layer.
    #[must_use]
    pub fn root(&self) -> &DbError {
        let mut err = self;
        while let DbError::Traced { source, .. } = err {
            err = source;
        }
        err
    }

    #[must_use]
    pub fn is_no_such_entity(&self) -> bool {
        matches!(self.root(), DbError::NoSuchEntity(_))
    }

    #[must_use]
    pub fn is_concurrent_transaction(&self) -> bool {
        matches!(self.root(), DbError::ConcurrentTransaction)
    }

    #[must_use]
    pub fn is_database_does_not_exist(&self) -> bool {
        matches!(self.root(), DbError::DatabaseDoesNotExist(_))
    }

    /// Status carried by an `UnexpectedStatus` root, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            DbError::UnexpectedStatus(e) => Some(e.status),
            _ => None,
        }
    }
}

impl From<UnexpectedStatusError> for DbError {
    fn from(e: UnexpectedStatusError) -> Self {
        DbError::UnexpectedStatus(Box::new(e))
    }
}

impl From<MultiError> for DbError {
    fn from(e: MultiError) -> Self {
        DbError::Multi(e)
    }
}

/// Adds call-site context to an error as it crosses a function boundary.
pub trait Trace<T> {
    fn trace(self, at: &'static str) -> Result<T, DbError>;
}

impl<T, E: Into<DbError>> Trace<T> for Result<T, E> {
    fn trace(self, at: &'static str) -> Result<T, DbError> {
        self.map_err(|e| DbError::Traced { at, source: Box::new(e.into()) })
    }
}

/// Positional errors of a batch operation. A slot is `None` when that item succeeded.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<Option<DbError>>);

impl MultiError {
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self((0..len).map(|_| None).collect())
    }

    pub fn set(&mut self, index: usize, err: DbError) {
        if index >= self.0.len() {
            self.0.resize_with(index + 1, || None);
        }
        self.0[index] = Some(err);
    }

    pub fn push(&mut self, err: Option<DbError>) {
        self.0.push(err);
    }

    /// True when at least one slot holds an error. An empty `MultiError` has none.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.0.iter().any(Option::is_some)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DbError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(())` when no slot holds an error.
    pub fn into_result(self) -> Result<(), DbError> {
        if self.has_error() { Err(DbError::Multi(self)) } else { Ok(()) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&DbError> = self.0.iter().flatten().collect();
        match failed.as_slice() {
            [] => write!(f, "no errors"),
            [only] => write!(f, "{only}"),
            [first, rest @ ..] => write!(f, "{first} (and {} other errors)", rest.len()),
        }
    }
}

impl std::error::Error for MultiError {}
