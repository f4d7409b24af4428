//! Long-running server operations (patches, deletions by query).

use crate::connection::Request;
use crate::database::Database;
use crate::errors::{DbError, Trace};
use log::trace;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Completed,
    Faulted,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationState {
    pub status: OperationStatus,
    #[serde(default)]
    pub result: Option<Value>,
}

impl OperationState {
    fn fault_message(&self) -> String {
        self.result
            .as_ref()
            .and_then(|r| r.get("Message").or_else(|| r.get("Error")))
            .and_then(Value::as_str)
            .unwrap_or("operation faulted")
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    db: Database,
    id: i64,
    poll_interval: Duration,
}

impl Operation {
    pub(crate) fn new(db: Database, id: i64) -> Self {
        Self { db, id, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// # Errors
    /// `NoSuchEntity` when the server does not know the operation.
    pub async fn status(&self) -> Result<OperationState, DbError> {
        let request = Request::get("/operations/state").query("id", self.id.to_string());
        let resp = self.db.send(request).await.trace("operation.status")?;
        match resp.status {
            StatusCode::OK => resp.json(),
            StatusCode::NOT_FOUND => Err(DbError::NoSuchEntity(format!("operation {}", self.id))),
            _ => Err(resp.unexpected()),
        }
    }

    /// Polls until the operation finishes and returns its result. There is no retry cap; bound
    /// the wait with `tokio::time::timeout` if needed.
    ///
    /// # Errors
    /// `Operation` when the server reports a fault or a cancellation.
    pub async fn wait(&self) -> Result<Value, DbError> {
        loop {
            let state = self.status().await.trace("operation.wait")?;
            match state.status {
                OperationStatus::Completed => return Ok(state.result.unwrap_or(Value::Null)),
                OperationStatus::Faulted => {
                    return Err(DbError::Operation { id: self.id, message: state.fault_message() });
                }
                OperationStatus::Canceled => {
                    return Err(DbError::Operation { id: self.id, message: "operation canceled".into() });
                }
                OperationStatus::InProgress => {
                    trace!("operation {} still in progress", self.id);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
