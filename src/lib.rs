//! Client for a RavenDB-style HTTP document database.
//!
//! ```no_run
//! # async fn demo() -> Result<(), rdb::DbError> {
//! use rdb::{ConnectionConfig, Database};
//! let db = Database::connect(&ConnectionConfig::new("http://localhost:8080", "shop")).await?;
//! # let _ = db;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod collection;
pub mod config;
pub mod connection;
pub mod counter;
pub mod database;
pub mod dates;
pub mod enforcer;
pub mod errors;
pub mod filter;
pub mod logger;
pub mod model;
pub mod operation;
pub mod query;
pub mod session;
pub mod utils;

pub use admin::{ExpirationConfig, RevisionsConfig};
pub use collection::{Collection, MultiGet};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use counter::{Counter, Counters};
pub use database::{Database, DatabaseDescriptor};
pub use dates::{Date, DateTime};
pub use enforcer::{Enforcer, FieldEquals};
pub use errors::{AdvancedError, DbError, MultiError, Trace, UnexpectedStatusError};
pub use filter::{Filter, Params, ToParam};
pub use model::{FieldDescriptor, FieldKind, Model, ModelMetadata, ModelTracking};
pub use operation::{Operation, OperationState, OperationStatus};
pub use query::{Query, QueryStats};
pub use session::Session;
