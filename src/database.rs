//! Database handle: the entry point for collections, sessions, queries and admin calls.

use crate::collection::Collection;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, Request, Response};
use crate::counter::Counters;
use crate::errors::{DbError, Trace};
use crate::model::Model;
use crate::operation::Operation;
use crate::query::Query;
use crate::session::Session;
use log::info;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Server-side description of a database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatabaseDescriptor {
    pub database_name: String,
    pub disabled: bool,
    pub settings: Map<String, Value>,
}

/// Cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Connection>,
    name: String,
    non_stale_timeout: Option<Duration>,
}

impl Database {
    /// Binds a database name to a connection. No network call is made.
    #[must_use]
    pub fn open(conn: Arc<Connection>, name: impl Into<String>) -> Self {
        Self { conn, name: name.into(), non_stale_timeout: None }
    }

    /// Connects with a resolved configuration, creating the database when `create_database` is set.
    ///
    /// # Errors
    /// Returns an error when the transport cannot be built or the database cannot be created.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<Self, DbError> {
        if cfg.database.is_empty() {
            return Err(DbError::Config("database name is required".into()));
        }
        let conn = Arc::new(Connection::from_config(cfg)?);
        let mut db = Self::open(conn, cfg.database.clone());
        db.non_stale_timeout = cfg.non_stale_timeout();
        if cfg.create_database {
            db.ensure_exists().await.trace("database.connect")?;
        }
        Ok(db)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Timeout sent with queries that wait for non-stale results.
    #[must_use]
    pub fn with_non_stale_timeout(mut self, timeout: Duration) -> Self {
        self.non_stale_timeout = Some(timeout);
        self
    }

    pub(crate) fn non_stale_timeout(&self) -> Option<Duration> {
        self.non_stale_timeout
    }

    /// Sends a request scoped to this database (`/databases/{name}{path}`).
    pub(crate) async fn send(&self, mut request: Request) -> Result<Response, DbError> {
        request.path = format!("/databases/{}{}", self.name, request.path);
        self.conn.send(request).await
    }

    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn exists(&self) -> Result<bool, DbError> {
        let resp = self.conn.send(Request::get("/admin/databases").query("name", &self.name)).await?;
        match resp.status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(resp.unexpected()),
        }
    }

    /// # Errors
    /// `DatabaseDoesNotExist` when the server does not know this database.
    pub async fn descriptor(&self) -> Result<DatabaseDescriptor, DbError> {
        let resp = self.conn.send(Request::get("/admin/databases").query("name", &self.name)).await?;
        match resp.status {
            StatusCode::OK => resp.json(),
            StatusCode::NOT_FOUND => Err(DbError::DatabaseDoesNotExist(self.name.clone())),
            _ => Err(resp.unexpected()),
        }
    }

    /// # Errors
    /// Transport failures and unexpected statuses, including a conflict when it already exists.
    pub async fn create(&self) -> Result<(), DbError> {
        let body = json!({"DatabaseName": self.name, "Settings": {}, "Disabled": false});
        let resp = self.conn.send(Request::put("/admin/databases").json(&body)?).await?;
        match resp.status {
            StatusCode::OK | StatusCode::CREATED => {
                info!("created database {}", self.name);
                Ok(())
            }
            _ => Err(resp.unexpected()),
        }
    }

    /// Creates the database unless it already exists.
    ///
    /// # Errors
    /// Transport failures and unexpected statuses.
    pub async fn ensure_exists(&self) -> Result<(), DbError> {
        if self.exists().await.trace("database.ensure_exists")? {
            return Ok(());
        }
        self.create().await.trace("database.ensure_exists")
    }

    /// Registers a collection for `M`.
    ///
    /// # Panics
    /// When the model declares a raw time field.
    #[must_use]
    pub fn collection<M: Model>(&self) -> Collection<M> {
        Collection::new(self.clone())
    }

    #[must_use]
    pub fn session<'a>(&self) -> Session<'a> {
        Session::new(self.clone())
    }

    /// Query against a named index, decoding rows as `M`.
    #[must_use]
    pub fn index_query<M: Model>(&self, index: impl Into<String>) -> Query<M> {
        Query::index(self.clone(), index.into())
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters::new(self.clone())
    }

    /// Handle to a server operation started earlier.
    #[must_use]
    pub fn operation(&self, id: i64) -> Operation {
        Operation::new(self.clone(), id)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("address", &self.conn.address())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
