//! Unit of work: pending writes, included documents and cached counters.
//!
//! A session borrows the models it stores or deletes until it is dropped, so the server-assigned
//! ids and change vectors are written straight back into them by `save_changes`.

use crate::connection::Request;
use crate::counter::{Counter, Counters};
use crate::database::Database;
use crate::errors::{DbError, Trace};
use crate::model::{META_CHANGE_VECTOR, META_ID, Model, Tracked, decode};
use crate::query::CounterDetail;
use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

enum Action<'a> {
    Store(&'a mut dyn Tracked),
    Delete(&'a mut dyn Tracked),
    DeleteId(String),
    DeletePrefix(String),
}

impl Action<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Store(m) => format!("store {}", target_id(&**m)),
            Self::Delete(m) => format!("delete {}", m.state().id),
            Self::DeleteId(id) => format!("delete {id}"),
            Self::DeletePrefix(prefix) => format!("delete prefix {prefix}"),
        }
    }

    fn command(&self) -> Result<Value, DbError> {
        Ok(match self {
            Self::Store(m) => json!({
                "Type": "PUT",
                "Id": target_id(&**m),
                "ChangeVector": non_empty(&m.state().change_vector),
                "Document": m.encode_document()?,
            }),
            Self::Delete(m) => json!({
                "Type": "DELETE",
                "Id": m.state().id,
                "ChangeVector": non_empty(&m.state().change_vector),
            }),
            Self::DeleteId(id) => json!({"Type": "DELETE", "Id": id, "ChangeVector": null}),
            Self::DeletePrefix(prefix) => json!({"Type": "DELETE", "Id": prefix, "IdPrefixed": true}),
        })
    }
}

/// Id used when writing a model. New models get `<collection>/` and a server-assigned id.
fn target_id(model: &dyn Tracked) -> String {
    let id = &model.state().id;
    if id.is_empty() { format!("{}/", model.collection_name()) } else { id.clone() }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PutResult {
    id: String,
    change_vector: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct BulkResponse {
    results: Vec<Value>,
}

pub struct Session<'a> {
    db: Database,
    actions: Vec<Action<'a>>,
    includes: HashMap<String, Value>,
    counters: HashMap<(String, String), i64>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(db: Database) -> Self {
        Self { db, actions: Vec::new(), includes: HashMap::new(), counters: HashMap::new() }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueues a store. Nothing is sent until `save_changes`.
    pub fn store<M: Model>(&mut self, model: &'a mut M) {
        self.actions.push(Action::Store(model));
    }

    /// Enqueues the deletion of a loaded model. The model must carry a change vector.
    pub fn delete<M: Model>(&mut self, model: &'a mut M) {
        self.actions.push(Action::Delete(model));
    }

    /// Enqueues an unconditional deletion by id.
    pub fn delete_id(&mut self, id: impl Into<String>) {
        self.actions.push(Action::DeleteId(id.into()));
    }

    /// Enqueues the deletion of every document whose id starts with `prefix`.
    pub fn delete_prefix(&mut self, prefix: impl Into<String>) {
        self.actions.push(Action::DeletePrefix(prefix.into()));
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Drops pending actions and both caches.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.includes.clear();
        self.counters.clear();
    }

    /// Sends every pending action. One store or delete goes as a direct request; anything else
    /// goes as one bulk request applied atomically by the server. The queue is emptied even when
    /// the save fails.
    ///
    /// # Errors
    /// `ConcurrentTransaction` when a change vector is stale; a model error when deleting a model
    /// that was never loaded.
    pub async fn save_changes(&mut self) -> Result<(), DbError> {
        let mut actions = std::mem::take(&mut self.actions);
        if actions.is_empty() {
            return Ok(());
        }
        for action in &actions {
            if let Action::Delete(m) = action {
                if m.state().change_vector.is_empty() {
                    return Err(DbError::Model(format!(
                        "retrieve the model before deleting it: {:?} has no change vector",
                        m.state().id
                    )));
                }
            }
        }
        if actions.len() == 1 && !matches!(actions[0], Action::DeletePrefix(_)) {
            if let Some(action) = actions.pop() {
                return self.save_single(action).await.trace("session.save_single");
            }
        }
        self.save_bulk(actions).await.trace("session.save_bulk")
    }

    async fn save_single(&self, action: Action<'a>) -> Result<(), DbError> {
        debug!("session on {}: {}", self.db.name(), action.describe());
        match action {
            Action::Store(model) => {
                let request = Request::put("/docs")
                    .query("id", target_id(&*model))
                    .if_match(&model.state().change_vector)
                    .json(&model.encode_document()?)?;
                let resp = self.db.send(request).await?;
                match resp.status {
                    StatusCode::OK | StatusCode::CREATED => {
                        let result: PutResult = resp.json()?;
                        let state = model.state_mut();
                        state.id = result.id;
                        state.change_vector = result.change_vector;
                        Ok(())
                    }
                    StatusCode::CONFLICT => Err(DbError::ConcurrentTransaction),
                    _ => Err(resp.unexpected()),
                }
            }
            Action::Delete(model) => {
                let request = Request::delete("/docs")
                    .query("id", model.state().id.clone())
                    .if_match(&model.state().change_vector);
                Self::expect_deleted(self.db.send(request).await?)?;
                model.state_mut().change_vector.clear();
                Ok(())
            }
            Action::DeleteId(id) => {
                Self::expect_deleted(self.db.send(Request::delete("/docs").query("id", id)).await?)
            }
            Action::DeletePrefix(_) => Err(DbError::Model("prefix deletions are only sent in bulk".into())),
        }
    }

    fn expect_deleted(resp: crate::connection::Response) -> Result<(), DbError> {
        match resp.status {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(DbError::ConcurrentTransaction),
            _ => Err(resp.unexpected()),
        }
    }

    async fn save_bulk(&self, mut actions: Vec<Action<'a>>) -> Result<(), DbError> {
        let commands = actions.iter().map(Action::command).collect::<Result<Vec<_>, _>>()?;
        debug!("session on {}: bulk write of {} commands", self.db.name(), commands.len());
        let resp = self.db.send(Request::post("/bulk_docs").json(&json!({ "Commands": commands }))?).await?;
        let body: BulkResponse = match resp.status {
            StatusCode::OK | StatusCode::CREATED => resp.json()?,
            StatusCode::CONFLICT => return Err(DbError::ConcurrentTransaction),
            _ => return Err(resp.unexpected()),
        };
        for (action, result) in actions.iter_mut().zip(&body.results) {
            let text = |key: &str| result.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            match action {
                Action::Store(model) => {
                    let state = model.state_mut();
                    state.id = text(META_ID);
                    state.change_vector = text(META_CHANGE_VECTOR);
                }
                Action::Delete(model) => model.state_mut().change_vector.clear(),
                Action::DeleteId(_) | Action::DeletePrefix(_) => {}
            }
        }
        Ok(())
    }

    /// Decodes a document downloaded as an include of an earlier query or get.
    ///
    /// # Errors
    /// `NoSuchEntity` when the id was not included.
    pub fn load<M: Model>(&self, id: &str) -> Result<M, DbError> {
        match self.includes.get(id) {
            Some(doc) if !doc.is_null() => decode::<M>(doc.clone()).trace("session.load"),
            _ => Err(DbError::NoSuchEntity(id.to_string())),
        }
    }

    /// Cached counter value, zero when it was never fetched.
    #[must_use]
    pub fn counter(&self, document_id: &str, name: &str) -> Counter {
        let value = self.counters.get(&(document_id.to_string(), name.to_string())).copied().unwrap_or(0);
        Counter { document_id: document_id.to_string(), name: name.to_string(), value }
    }

    /// Downloads every counter of a document into the cache.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn fetch_counters(&mut self, document_id: &str) -> Result<Vec<Counter>, DbError> {
        let counters = Counters::new(self.db.clone()).get_all(document_id).await.trace("session.fetch_counters")?;
        for c in &counters {
            self.counters.insert((c.document_id.clone(), c.name.clone()), c.value);
        }
        Ok(counters)
    }

    pub(crate) fn merge_includes(&mut self, includes: Map<String, Value>) {
        self.includes.extend(includes);
    }

    pub(crate) fn merge_counters(&mut self, counters: Vec<CounterDetail>) {
        for c in counters {
            self.counters.insert((c.document_id, c.counter_name), c.total_value);
        }
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.db.name())
            .field("pending", &self.actions.iter().map(Action::describe).collect::<Vec<_>>())
            .field("includes", &self.includes.len())
            .field("counters", &self.counters.len())
            .finish()
    }
}
