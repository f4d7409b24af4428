//! Document counters.

use crate::connection::Request;
use crate::database::Database;
use crate::errors::{DbError, Trace};
use crate::query::CounterDetail;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counter {
    pub document_id: String,
    pub name: String,
    pub value: i64,
}

impl From<CounterDetail> for Counter {
    fn from(d: CounterDetail) -> Self {
        Self { document_id: d.document_id, name: d.counter_name, value: d.total_value }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CountersResponse {
    counters: Vec<Option<CounterDetail>>,
}

/// Reads and writes counters of one database.
#[derive(Debug, Clone)]
pub struct Counters {
    db: Database,
}

impl Counters {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds `delta` (possibly negative) to a counter, creating it at zero first.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn increment(&self, document_id: &str, name: &str, delta: i64) -> Result<(), DbError> {
        self.batch(document_id, json!({"Type": "Increment", "CounterName": name, "Delta": delta}))
            .await
            .trace("counters.increment")
    }

    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn delete(&self, document_id: &str, name: &str) -> Result<(), DbError> {
        self.batch(document_id, json!({"Type": "Delete", "CounterName": name})).await.trace("counters.delete")
    }

    async fn batch(&self, document_id: &str, operation: Value) -> Result<(), DbError> {
        let body = json!({"Documents": [{"DocumentId": document_id, "Operations": [operation]}]});
        let resp = self.db.send(Request::post("/counters").json(&body)?).await?;
        match resp.status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(DbError::NoSuchEntity(document_id.to_string())),
            _ => Err(resp.unexpected()),
        }
    }

    /// Reads the named counters. Missing counters are left out of the result.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn get(&self, document_id: &str, names: &[&str]) -> Result<Vec<Counter>, DbError> {
        let mut request = Request::get("/counters").query("docId", document_id);
        for name in names {
            request = request.query("counter", *name);
        }
        self.read(request).await.trace("counters.get")
    }

    /// Reads every counter of a document.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn get_all(&self, document_id: &str) -> Result<Vec<Counter>, DbError> {
        self.read(Request::get("/counters").query("docId", document_id)).await.trace("counters.get_all")
    }

    async fn read(&self, request: Request) -> Result<Vec<Counter>, DbError> {
        let resp = self.db.send(request).await?;
        match resp.status {
            StatusCode::OK => {
                let body: CountersResponse = resp.json()?;
                Ok(body.counters.into_iter().flatten().map(Counter::from).collect())
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(resp.unexpected()),
        }
    }
}
