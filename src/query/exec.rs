use super::{BULK_CHUNK, OperationIdResponse, Query, QueryResponse, QueryStats};
use crate::connection::Request;
use crate::dates::format_timespan;
use crate::errors::{DbError, MultiError, Trace};
use crate::model::{Model, ModelMetadata, decode};
use crate::operation::Operation;
use crate::session::Session;
use crate::utils::querylog::QueryLine;
use log::debug;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Instant;

impl<M: Model> Query<M> {
    async fn execute(&self, op: &'static str, metadata_only: bool) -> Result<QueryResponse, DbError> {
        let started = Instant::now();
        let (rql, params) = self.rql();
        let timeout = if self.non_stale { self.db.non_stale_timeout().map(format_timespan) } else { None };
        let body = json!({
            "Query": rql,
            "QueryParameters": params,
            "WaitForNonStaleResults": self.non_stale,
            "WaitForNonStaleResultsTimeout": timeout,
        });
        let mut request = Request::post("/queries").json(&body)?;
        if metadata_only {
            request = request.query("metadataOnly", "true");
        }
        let resp = self.db.send(request).await?;
        let parsed: QueryResponse = match resp.status {
            StatusCode::OK => resp.json()?,
            StatusCode::NOT_FOUND => return Err(DbError::NoSuchEntity(self.source.to_string())),
            _ => return Err(resp.unexpected()),
        };
        QueryLine {
            op,
            collection: self.source.name().to_string(),
            duration_ms: started.elapsed().as_millis(),
            results: parsed.results.len(),
        }
        .emit();
        Ok(parsed)
    }

    fn decode_rows(&self, rows: Vec<Value>) -> Result<Vec<M>, DbError> {
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            let model = decode::<M>(row)?;
            if self.allows(&model) {
                models.push(model);
            }
        }
        Ok(models)
    }

    /// Runs the query and decodes every row. Rows rejected by a model enforcer are dropped.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport and decoding failures.
    pub async fn get_all(&self) -> Result<Vec<M>, DbError> {
        let resp = self.execute("get_all", false).await.trace("query.get_all")?;
        self.decode_rows(resp.results).trace("query.get_all")
    }

    /// Like `get_all`, merging included documents and counters into `session`.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport and decoding failures.
    pub async fn get_all_in(&self, session: &mut Session<'_>) -> Result<Vec<M>, DbError> {
        let mut resp = self.execute("get_all", false).await.trace("query.get_all_in")?;
        let counters = resp.counters();
        session.merge_includes(std::mem::take(&mut resp.includes));
        session.merge_counters(counters);
        self.decode_rows(resp.results).trace("query.get_all_in")
    }

    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport and decoding failures.
    pub async fn get_all_with_stats(&self) -> Result<(Vec<M>, QueryStats), DbError> {
        let resp = self.execute("get_all", false).await.trace("query.get_all_with_stats")?;
        let stats = resp.stats();
        let models = self.decode_rows(resp.results).trace("query.get_all_with_stats")?;
        Ok((models, stats))
    }

    /// First matching model.
    ///
    /// # Errors
    /// `NoSuchEntity` when nothing matches.
    pub async fn first(&self) -> Result<M, DbError> {
        let query = self.clone().limit(1);
        let resp = query.execute("first", false).await.trace("query.first")?;
        query
            .decode_rows(resp.results)
            .trace("query.first")?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NoSuchEntity(format!("first result of {}", self.source)))
    }

    /// Number of matching documents, read from the total of a zero-row query.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn count(&self) -> Result<usize, DbError> {
        let resp = self.clone().limit(0).execute("count", false).await.trace("query.count")?;
        Ok(usize::try_from(resp.total_results).unwrap_or(0))
    }

    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn has_results(&self) -> Result<bool, DbError> {
        Ok(self.count().await.trace("query.has_results")? > 0)
    }

    /// Metadata of every matching document, without downloading the bodies.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn get_all_metadata(&self) -> Result<Vec<ModelMetadata>, DbError> {
        let resp = self.execute("get_all_metadata", true).await.trace("query.get_all_metadata")?;
        Ok(resp.results.iter().map(ModelMetadata::read).collect())
    }

    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn get_all_ids(&self) -> Result<Vec<String>, DbError> {
        let metadata = self.get_all_metadata().await.trace("query.get_all_ids")?;
        Ok(metadata.into_iter().map(|m| m.id).collect())
    }

    /// Deletes every matching document in bulk requests of at most 1000 commands.
    ///
    /// # Errors
    /// A `MultiError` with one slot per bulk request when any of them fails.
    pub async fn delete_everything(&self) -> Result<(), DbError> {
        let ids = self.get_all_ids().await.trace("query.delete_everything")?;
        let mut errors = MultiError::default();
        for chunk in ids.chunks(BULK_CHUNK) {
            let commands: Vec<Value> =
                chunk.iter().map(|id| json!({"Type": "DELETE", "Id": id, "ChangeVector": null})).collect();
            debug!("deleting {} documents from {}", commands.len(), self.source);
            let request = Request::post("/bulk_docs").json(&json!({ "Commands": commands }))?;
            let result = match self.db.send(request).await {
                Ok(resp) if resp.status == StatusCode::CREATED => Ok(()),
                Ok(resp) if resp.status == StatusCode::CONFLICT => Err(DbError::ConcurrentTransaction),
                Ok(resp) => Err(resp.unexpected()),
                Err(e) => Err(e),
            };
            errors.push(result.err());
        }
        errors.into_result()
    }

    /// Starts a server-side patch of every matching document with a JavaScript `script`.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn patch(&self, script: &str) -> Result<Operation, DbError> {
        let (rql, params) = self.rql();
        let body = json!({
            "Query": {"Query": format!("{rql} update {{ {script} }}"), "QueryParameters": params},
        });
        let request = Request::patch("/queries").json(&body)?;
        self.start_operation(request).await.trace("query.patch")
    }

    /// Starts a server-side deletion of every matching document.
    ///
    /// # Errors
    /// `NoSuchEntity` when the index does not exist; transport failures.
    pub async fn delete_by_query(&self) -> Result<Operation, DbError> {
        let (rql, params) = self.rql();
        let request = Request::delete("/queries").json(&json!({"Query": rql, "QueryParameters": params}))?;
        self.start_operation(request).await.trace("query.delete_by_query")
    }

    async fn start_operation(&self, request: Request) -> Result<Operation, DbError> {
        let resp = self.db.send(request).await?;
        match resp.status {
            StatusCode::OK | StatusCode::CREATED => {
                let started: OperationIdResponse = resp.json()?;
                debug!("operation {} started on {}", started.operation_id, self.source);
                Ok(self.db.operation(started.operation_id))
            }
            StatusCode::NOT_FOUND => Err(DbError::NoSuchEntity(self.source.to_string())),
            _ => Err(resp.unexpected()),
        }
    }
}
