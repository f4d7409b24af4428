//! Typed CRUD surface over one collection.

use crate::connection::Request;
use crate::database::Database;
use crate::enforcer::Enforcer;
use crate::errors::{DbError, MultiError, Trace};
use crate::model::{Model, check_fields, decode};
use crate::query::Query;
use crate::session::Session;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Ids of this length or longer are rejected by the server; they are reported missing locally.
pub const MAX_ID_LEN: usize = 510;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DocsResponse {
    results: Vec<Value>,
}

/// Result of `Collection::get_multi`: one slot per requested id, in request order.
#[derive(Debug)]
pub struct MultiGet<M> {
    pub models: Vec<Option<M>>,
    pub errors: MultiError,
}

impl<M> MultiGet<M> {
    /// The models when every id was found, otherwise the positional errors.
    ///
    /// # Errors
    /// `Multi` when at least one id is missing or enforced out.
    pub fn into_result(self) -> Result<Vec<Option<M>>, DbError> {
        if self.errors.has_error() { Err(DbError::Multi(self.errors)) } else { Ok(self.models) }
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() < MAX_ID_LEN
}

pub struct Collection<M: Model> {
    db: Database,
    enforcers: Vec<Arc<dyn Enforcer<M>>>,
    include_counters: bool,
}

impl<M: Model> Clone for Collection<M> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), enforcers: self.enforcers.clone(), include_counters: self.include_counters }
    }
}

impl<M: Model> Collection<M> {
    /// # Panics
    /// When the model declares a raw time field.
    #[must_use]
    pub fn new(db: Database) -> Self {
        check_fields(M::collection(), M::fields());
        Self { db, enforcers: Vec::new(), include_counters: false }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Installs an enforcer for every read and query of this collection. Enforcers are AND-ed in
    /// installation order.
    #[must_use]
    pub fn enforce(mut self, enforcer: impl Enforcer<M> + 'static) -> Self {
        self.enforcers.push(Arc::new(enforcer));
        self
    }

    /// Makes `get_in` also download every counter of the document into the session.
    #[must_use]
    pub fn include_all_counters(mut self) -> Self {
        self.include_counters = true;
        self
    }

    #[must_use]
    pub fn query(&self) -> Query<M> {
        Query::collection(self.db.clone(), self.enforcers.clone())
    }

    fn allows(&self, model: &M) -> bool {
        self.enforcers.iter().all(|e| e.allows(model))
    }

    /// Stores a model immediately. Use `Session::store` to batch writes.
    ///
    /// # Errors
    /// `ConcurrentTransaction` when the model's change vector is stale.
    pub async fn put(&self, model: &mut M) -> Result<(), DbError> {
        let mut session = self.db.session();
        session.store(model);
        session.save_changes().await.trace("collection.put")
    }

    /// Deletes a loaded model immediately. Use `Session::delete` to batch writes.
    ///
    /// # Errors
    /// `ConcurrentTransaction` when the model's change vector is stale; a model error when the
    /// model was never loaded.
    pub async fn delete(&self, model: &mut M) -> Result<(), DbError> {
        let mut session = self.db.session();
        session.delete(model);
        session.save_changes().await.trace("collection.delete")
    }

    async fn fetch(&self, id: &str) -> Result<M, DbError> {
        if !valid_id(id) {
            return Err(DbError::NoSuchEntity(id.to_string()));
        }
        let resp = self.db.send(Request::get("/docs").query("id", id)).await?;
        let body: DocsResponse = match resp.status {
            StatusCode::OK => resp.json()?,
            StatusCode::NOT_FOUND => return Err(DbError::NoSuchEntity(id.to_string())),
            _ => return Err(resp.unexpected()),
        };
        let doc = body
            .results
            .into_iter()
            .next()
            .filter(|d| !d.is_null())
            .ok_or_else(|| DbError::NoSuchEntity(id.to_string()))?;
        let model = decode::<M>(doc)?;
        if !self.allows(&model) {
            return Err(DbError::NoSuchEntity(id.to_string()));
        }
        Ok(model)
    }

    /// # Errors
    /// `NoSuchEntity` when the document is missing, enforced out or the id is invalid.
    pub async fn get(&self, id: &str) -> Result<M, DbError> {
        self.fetch(id).await.trace("collection.get")
    }

    /// Like `get`, mapping `NoSuchEntity` to `None`.
    ///
    /// # Errors
    /// Transport and decoding failures.
    pub async fn try_get(&self, id: &str) -> Result<Option<M>, DbError> {
        match self.fetch(id).await {
            Ok(model) => Ok(Some(model)),
            Err(e) if e.is_no_such_entity() => Ok(None),
            Err(e) => Err(e).trace("collection.try_get"),
        }
    }

    /// Reads into a caller-owned slot within a session. The slot is reset to `None` when the
    /// document is missing or enforced out, so filtered data never lingers in it.
    ///
    /// # Errors
    /// `NoSuchEntity` when the document is missing, enforced out or the id is invalid.
    pub async fn get_in(&self, session: &mut Session<'_>, id: &str, slot: &mut Option<M>) -> Result<(), DbError> {
        match self.fetch(id).await {
            Ok(model) => {
                *slot = Some(model);
            }
            Err(e) => {
                *slot = None;
                return Err(e).trace("collection.get_in");
            }
        }
        if self.include_counters {
            session.fetch_counters(id).await.trace("collection.get_in")?;
        }
        Ok(())
    }

    /// Fetches many documents in one request. The output has one slot per id in input order;
    /// missing, invalid or enforced-out ids leave `None` and a positional `NoSuchEntity`.
    ///
    /// # Errors
    /// Transport and decoding failures. Missing documents are reported in `MultiGet::errors`.
    pub async fn get_multi(&self, ids: &[&str]) -> Result<MultiGet<M>, DbError> {
        let mut models: Vec<Option<M>> = ids.iter().map(|_| None).collect();
        let mut errors = MultiError::with_len(ids.len());
        let wanted: Vec<(usize, &str)> = ids.iter().copied().enumerate().filter(|(_, id)| valid_id(id)).collect();

        if !wanted.is_empty() {
            let body = json!({"Ids": wanted.iter().map(|(_, id)| *id).collect::<Vec<_>>()});
            let resp = self.db.send(Request::post("/docs").json(&body)?).await.trace("collection.get_multi")?;
            let docs: DocsResponse = match resp.status {
                StatusCode::OK => resp.json()?,
                StatusCode::NOT_FOUND => DocsResponse::default(),
                _ => return Err(resp.unexpected()).trace("collection.get_multi"),
            };
            for ((index, _), doc) in wanted.iter().zip(docs.results) {
                if doc.is_null() {
                    continue;
                }
                let model = decode::<M>(doc).trace("collection.get_multi")?;
                if self.allows(&model) {
                    models[*index] = Some(model);
                }
            }
        }

        for (index, id) in ids.iter().enumerate() {
            if models[index].is_none() {
                errors.set(index, DbError::NoSuchEntity((*id).to_string()));
            }
        }
        Ok(MultiGet { models, errors })
    }

    /// Checks existence without downloading the document. Enforcers are not evaluated.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn exists(&self, id: &str) -> Result<bool, DbError> {
        if !valid_id(id) {
            return Ok(false);
        }
        let resp = self.db.send(Request::head("/docs").query("id", id)).await.trace("collection.exists")?;
        match resp.status {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(resp.unexpected()),
        }
    }
}
