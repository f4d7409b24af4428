//! Per-database configuration: revisions and document expiration.

use crate::collection::Collection;
use crate::connection::Request;
use crate::database::Database;
use crate::dates::format_timespan;
use crate::errors::{DbError, Trace};
use crate::model::Model;
use log::info;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Revision retention of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionsConfig {
    pub minimum_revisions_to_keep: Option<u64>,
    pub minimum_revision_age_to_keep: Option<Duration>,
    pub purge_on_delete: bool,
    pub disabled: bool,
}

impl RevisionsConfig {
    fn to_wire(&self) -> Value {
        json!({
            "Disabled": self.disabled,
            "MinimumRevisionsToKeep": self.minimum_revisions_to_keep,
            "MinimumRevisionAgeToKeep": self.minimum_revision_age_to_keep.map(format_timespan),
            "PurgeOnDelete": self.purge_on_delete,
        })
    }
}

/// Background deletion of documents whose `@expires` has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationConfig {
    pub disabled: bool,
    pub delete_frequency_secs: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self { disabled: false, delete_frequency_secs: 60 }
    }
}

async fn post_config(db: &Database, path: &str, body: &Value) -> Result<(), DbError> {
    let resp = db.send(Request::post(path).json(body)?).await?;
    match resp.status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
        _ => Err(resp.unexpected()),
    }
}

impl Database {
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn configure_expiration(&self, cfg: &ExpirationConfig) -> Result<(), DbError> {
        let body = json!({"Disabled": cfg.disabled, "DeleteFrequencyInSec": cfg.delete_frequency_secs});
        post_config(self, "/admin/expiration/config", &body).await.trace("database.configure_expiration")?;
        info!("expiration on {}: disabled={} every {}s", self.name(), cfg.disabled, cfg.delete_frequency_secs);
        Ok(())
    }

    /// Sets the revisions config of a single collection by name.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn configure_revisions(&self, collection: &str, cfg: &RevisionsConfig) -> Result<(), DbError> {
        let mut collections = Map::new();
        collections.insert(collection.to_string(), cfg.to_wire());
        let body = json!({"Default": null, "Collections": collections});
        post_config(self, "/admin/revisions/config", &body).await.trace("database.configure_revisions")?;
        info!("revisions on {}/{collection}: {cfg:?}", self.name());
        Ok(())
    }
}

impl<M: Model> Collection<M> {
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn configure_revisions(&self, cfg: &RevisionsConfig) -> Result<(), DbError> {
        self.database().configure_revisions(M::collection(), cfg).await.trace("collection.configure_revisions")
    }
}
