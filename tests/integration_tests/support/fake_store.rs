//! In-process document store speaking the HTTP contract the client uses.
//!
//! Documents live in a `BTreeMap` keyed by id, so unordered query results come back in id order.
//! Queries are evaluated by a small parser for the RQL subset the client emits.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::rql::{self, Include, ParsedQuery, QuerySource};

#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub body: Value,
    pub collection: String,
    pub change_vector: String,
    pub expires: Option<String>,
}

/// One request as seen by the server. `path` is relative to the database for database routes.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub if_match: Option<String>,
    pub body: Value,
}

impl Recorded {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
struct OperationEntry {
    polls_in_progress: u32,
    status: &'static str,
    result: Value,
}

#[derive(Default)]
struct StoreState {
    databases: HashSet<String>,
    docs: BTreeMap<String, StoredDoc>,
    counters: BTreeMap<(String, String), i64>,
    indexes: HashMap<String, String>,
    next_id: u64,
    etag: u64,
    operations: HashMap<i64, OperationEntry>,
    next_operation: i64,
    requests: Vec<Recorded>,
    fail_next: Option<(u16, Value)>,
    configs: HashMap<String, Value>,
}

impl StoreState {
    fn next_change_vector(&mut self) -> String {
        self.etag += 1;
        format!("A:{}-fakestore", self.etag)
    }

    fn view(&self, id: &str) -> Option<Value> {
        self.docs.get(id).map(|d| document_view(id, d))
    }
}

fn document_view(id: &str, doc: &StoredDoc) -> Value {
    let mut body = doc.body.clone();
    let mut meta = Map::new();
    meta.insert("@id".into(), json!(id));
    meta.insert("@change-vector".into(), json!(doc.change_vector));
    meta.insert("@collection".into(), json!(doc.collection));
    if let Some(expires) = &doc.expires {
        meta.insert("@expires".into(), json!(expires));
    }
    if let Value::Object(obj) = &mut body {
        obj.insert("@metadata".into(), Value::Object(meta));
    }
    body
}

fn metadata_view(id: &str, doc: &StoredDoc) -> Value {
    json!({"@metadata": {"@id": id, "@change-vector": doc.change_vector, "@collection": doc.collection}})
}

#[derive(Clone, Default)]
pub struct FakeStore {
    inner: Arc<Mutex<StoreState>>,
}

impl FakeStore {
    /// Starts the server on an ephemeral port and returns its base address.
    pub async fn start(&self) -> String {
        let app = Router::new().fallback(handle).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub fn create_database(&self, name: &str) {
        self.inner.lock().databases.insert(name.to_string());
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.inner.lock().databases.contains(name)
    }

    /// Registers an index that answers queries over one collection.
    pub fn define_index(&self, name: &str, collection: &str) {
        self.inner.lock().indexes.insert(name.to_string(), collection.to_string());
    }

    /// Stores a document directly, bypassing the HTTP layer.
    pub fn insert(&self, id: &str, collection: &str, body: Value) -> String {
        let mut state = self.inner.lock();
        let change_vector = state.next_change_vector();
        state.docs.insert(
            id.to_string(),
            StoredDoc { body, collection: collection.to_string(), change_vector: change_vector.clone(), expires: None },
        );
        change_vector
    }

    pub fn doc(&self, id: &str) -> Option<StoredDoc> {
        self.inner.lock().docs.get(id).cloned()
    }

    pub fn doc_count(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn counter(&self, doc: &str, name: &str) -> Option<i64> {
        self.inner.lock().counters.get(&(doc.to_string(), name.to_string())).copied()
    }

    pub fn set_counter(&self, doc: &str, name: &str, value: i64) {
        self.inner.lock().counters.insert((doc.to_string(), name.to_string()), value);
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.inner.lock().configs.get(key).cloned()
    }

    /// Makes the next database request fail with `status` and `body`.
    pub fn fail_next(&self, status: u16, body: Value) {
        self.inner.lock().fail_next = Some((status, body));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.inner.lock().requests.clear();
    }

    /// Requests matching a method and a path, in arrival order.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.method == method && r.path == path).collect()
    }
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    reqwest::Url::parse(&format!("http://fake{uri}"))
        .map(|u| u.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect())
        .unwrap_or_default()
}

async fn handle(State(store): State<FakeStore>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let body: Value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap_or(Value::Null) };
    let query = query_pairs(&uri);
    let if_match = headers
        .get("If-Match")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string());
    let full_path = uri.path().to_string();

    let mut state = store.inner.lock();
    let (db, path) = match full_path.strip_prefix("/databases/").and_then(|rest| rest.split_once('/')) {
        Some((db, rest)) => (Some(db.to_string()), format!("/{rest}")),
        None => (None, full_path.clone()),
    };
    state.requests.push(Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: query.clone(),
        if_match: if_match.clone(),
        body: body.clone(),
    });
    let req = Req { method, path, query, if_match, body };

    let Some(db) = db else {
        return handle_server(&mut state, &req);
    };
    if !state.databases.contains(&db) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Database-Missing", db.clone())],
            Json(json!({"Message": format!("database {db} does not exist")})),
        )
            .into_response();
    }
    if let Some((status, body)) = state.fail_next.take() {
        return reply(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body);
    }
    handle_database(&mut state, &req)
}

struct Req {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    if_match: Option<String>,
    body: Value,
}

impl Req {
    fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn params(&self, key: &str) -> Vec<String> {
        self.query.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect()
    }
}

fn handle_server(state: &mut StoreState, req: &Req) -> Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/admin/databases") => {
            let name = req.param("name").unwrap_or_default().to_string();
            if state.databases.contains(&name) {
                reply(StatusCode::OK, json!({"DatabaseName": name, "Disabled": false, "Settings": {}}))
            } else {
                reply(StatusCode::NOT_FOUND, Value::Null)
            }
        }
        ("PUT", "/admin/databases") => {
            let name = req.body["DatabaseName"].as_str().unwrap_or_default().to_string();
            if name.is_empty() {
                return reply(StatusCode::BAD_REQUEST, json!({"Type": "ArgumentException", "Message": "name"}));
            }
            if !state.databases.insert(name.clone()) {
                return reply(StatusCode::CONFLICT, json!({"Message": "exists"}));
            }
            reply(StatusCode::CREATED, json!({"Name": name}))
        }
        _ => reply(StatusCode::BAD_REQUEST, json!({"Message": "unknown route"})),
    }
}

fn handle_database(state: &mut StoreState, req: &Req) -> Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET" | "HEAD", "/docs") => get_doc(state, req),
        ("POST", "/docs") => get_docs(state, req),
        ("PUT", "/docs") => put_doc(state, req),
        ("DELETE", "/docs") => delete_doc(state, req),
        ("POST", "/bulk_docs") => bulk(state, req),
        ("POST", "/queries") => run_query(state, req),
        ("PATCH", "/queries") => patch_query(state, req),
        ("DELETE", "/queries") => delete_query(state, req),
        ("GET", "/operations/state") => operation_state(state, req),
        ("POST", "/counters") => counters_batch(state, req),
        ("GET", "/counters") => counters_get(state, req),
        ("POST", "/admin/revisions/config") | ("POST", "/admin/expiration/config") => {
            state.configs.insert(req.path.clone(), req.body.clone());
            reply(StatusCode::OK, json!({"RaftCommandIndex": 1}))
        }
        _ => reply(StatusCode::BAD_REQUEST, json!({"Message": format!("unknown route {} {}", req.method, req.path)})),
    }
}

fn get_doc(state: &StoreState, req: &Req) -> Response {
    let id = req.param("id").unwrap_or_default();
    match state.view(id) {
        Some(doc) => reply(StatusCode::OK, json!({"Results": [doc], "Includes": {}})),
        None => reply(StatusCode::NOT_FOUND, Value::Null),
    }
}

fn get_docs(state: &StoreState, req: &Req) -> Response {
    let ids: Vec<&str> = req.body["Ids"].as_array().map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();
    let results: Vec<Value> = ids.iter().map(|id| state.view(id).unwrap_or(Value::Null)).collect();
    reply(StatusCode::OK, json!({"Results": results, "Includes": {}}))
}

/// Splits the metadata off an uploaded document.
fn split_document(mut doc: Value) -> (Value, String, Option<String>) {
    let meta = doc.as_object_mut().and_then(|o| o.remove("@metadata")).unwrap_or(Value::Null);
    let collection = meta["@collection"].as_str().unwrap_or_default().to_string();
    let expires = meta["@expires"].as_str().map(str::to_string);
    (doc, collection, expires)
}

fn resolve_id(state: &mut StoreState, id: &str) -> String {
    if id.ends_with('/') {
        state.next_id += 1;
        format!("{id}{:019}-A", state.next_id)
    } else {
        id.to_string()
    }
}

fn conflicts(state: &StoreState, id: &str, expected: Option<&str>) -> bool {
    match expected {
        None => false,
        Some(cv) => state.docs.get(id).is_none_or(|d| d.change_vector != cv),
    }
}

fn store_doc(state: &mut StoreState, id: &str, document: Value) -> (String, String, String) {
    let id = resolve_id(state, id);
    let (body, collection, expires) = split_document(document);
    let change_vector = state.next_change_vector();
    state.docs.insert(id.clone(), StoredDoc { body, collection: collection.clone(), change_vector: change_vector.clone(), expires });
    (id, change_vector, collection)
}

fn put_doc(state: &mut StoreState, req: &Req) -> Response {
    let id = req.param("id").unwrap_or_default().to_string();
    if conflicts(state, &id, req.if_match.as_deref()) {
        return reply(StatusCode::CONFLICT, json!({"Type": "ConcurrencyException", "Message": "change vector mismatch"}));
    }
    let (id, change_vector, _) = store_doc(state, &id, req.body.clone());
    reply(StatusCode::CREATED, json!({"Id": id, "ChangeVector": change_vector}))
}

fn delete_doc(state: &mut StoreState, req: &Req) -> Response {
    let id = req.param("id").unwrap_or_default().to_string();
    if conflicts(state, &id, req.if_match.as_deref()) {
        return reply(StatusCode::CONFLICT, json!({"Type": "ConcurrencyException", "Message": "change vector mismatch"}));
    }
    state.docs.remove(&id);
    StatusCode::NO_CONTENT.into_response()
}

fn bulk(state: &mut StoreState, req: &Req) -> Response {
    let commands = req.body["Commands"].as_array().cloned().unwrap_or_default();
    for cmd in &commands {
        let id = cmd["Id"].as_str().unwrap_or_default();
        if cmd["IdPrefixed"].as_bool().unwrap_or(false) {
            continue;
        }
        if conflicts(state, id, cmd["ChangeVector"].as_str()) {
            return reply(StatusCode::CONFLICT, json!({"Type": "ConcurrencyException", "Message": format!("conflict on {id}")}));
        }
    }
    let mut results = Vec::with_capacity(commands.len());
    for cmd in commands {
        let id = cmd["Id"].as_str().unwrap_or_default().to_string();
        match cmd["Type"].as_str() {
            Some("PUT") => {
                let (id, change_vector, collection) = store_doc(state, &id, cmd["Document"].clone());
                results.push(json!({"Type": "PUT", "@id": id, "@change-vector": change_vector, "@collection": collection}));
            }
            Some("DELETE") if cmd["IdPrefixed"].as_bool().unwrap_or(false) => {
                let prefix = id.to_lowercase();
                state.docs.retain(|k, _| !k.to_lowercase().starts_with(&prefix));
                results.push(json!({"Type": "DELETE", "@id": id, "Deleted": true}));
            }
            Some("DELETE") => {
                let deleted = state.docs.remove(&id).is_some();
                results.push(json!({"Type": "DELETE", "@id": id, "Deleted": deleted}));
            }
            _ => return reply(StatusCode::BAD_REQUEST, json!({"Message": "unknown command"})),
        }
    }
    reply(StatusCode::CREATED, json!({"Results": results}))
}

fn matching(state: &StoreState, parsed: &ParsedQuery, params: &Value) -> Result<Vec<String>, Response> {
    let collection = match &parsed.source {
        QuerySource::Collection(c) => c.clone(),
        QuerySource::Index(name) => match state.indexes.get(name) {
            Some(c) => c.clone(),
            None => return Err(reply(StatusCode::NOT_FOUND, json!({"Message": format!("index {name} not found")}))),
        },
    };
    let mut ids: Vec<String> = state
        .docs
        .iter()
        .filter(|(_, d)| d.collection.eq_ignore_ascii_case(&collection))
        .filter(|(_, d)| parsed.filter.as_ref().is_none_or(|f| rql::eval(f, &d.body, params)))
        .map(|(id, _)| id.clone())
        .collect();
    if !parsed.random {
        ids.sort_by(|a, b| {
            for order in &parsed.order {
                let ord = rql::compare_field(&state.docs[a].body, &state.docs[b].body, &order.field, order.kind);
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    Ok(ids)
}

fn parse_request_query(text: &str) -> Result<ParsedQuery, Response> {
    rql::parse(text).map_err(|e| reply(StatusCode::BAD_REQUEST, json!({"Type": "InvalidQueryException", "Message": e, "Url": "/queries"})))
}

fn run_query(state: &mut StoreState, req: &Req) -> Response {
    let text = req.body["Query"].as_str().unwrap_or_default();
    let params = req.body["QueryParameters"].clone();
    let parsed = match parse_request_query(text) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let ids = match matching(state, &parsed, &params) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };
    let total = ids.len();
    let page: Vec<String> = ids
        .into_iter()
        .skip(parsed.offset.unwrap_or(0))
        .take(parsed.limit.unwrap_or(usize::MAX))
        .collect();

    let metadata_only = req.param("metadataOnly") == Some("true");
    let mut results = Vec::with_capacity(page.len());
    let mut includes = Map::new();
    let mut counter_includes = Map::new();
    for id in &page {
        let doc = &state.docs[id];
        let row = if metadata_only {
            metadata_view(id, doc)
        } else if let Some(fields) = &parsed.select {
            let mut projected = Map::new();
            for field in fields {
                if let Some(v) = rql::lookup(&doc.body, field) {
                    projected.insert(field.clone(), v.clone());
                }
            }
            projected.insert(
                "@metadata".into(),
                json!({"@id": id, "@change-vector": doc.change_vector, "@projection": true}),
            );
            Value::Object(projected)
        } else {
            document_view(id, doc)
        };
        results.push(row);

        for include in &parsed.includes {
            match include {
                Include::Path(path) => {
                    let refs: Vec<String> = match rql::lookup(&doc.body, path) {
                        Some(Value::String(s)) => vec![s.clone()],
                        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                        _ => Vec::new(),
                    };
                    for r in refs {
                        includes.insert(r.clone(), state.view(&r).unwrap_or(Value::Null));
                    }
                }
                Include::AllCounters | Include::Counter(_) => {
                    let wanted = match include {
                        Include::Counter(p) => params[p.as_str()].as_str().map(str::to_string),
                        _ => None,
                    };
                    let entry = counter_includes.entry(id.clone()).or_insert_with(|| json!([]));
                    for ((doc_id, name), value) in &state.counters {
                        if doc_id == id && wanted.as_ref().is_none_or(|w| w == name) {
                            if let Value::Array(items) = entry {
                                items.push(json!({"DocumentId": doc_id, "CounterName": name, "TotalValue": value}));
                            }
                        }
                    }
                }
            }
        }
    }
    let index_name = match &parsed.source {
        QuerySource::Collection(c) => format!("Auto/{c}"),
        QuerySource::Index(name) => name.clone(),
    };
    reply(
        StatusCode::OK,
        json!({
            "Results": results,
            "Includes": includes,
            "CounterIncludes": counter_includes,
            "TotalResults": total,
            "SkippedResults": 0,
            "IsStale": false,
            "DurationInMs": 1,
            "IndexName": index_name,
        }),
    )
}

fn start_operation(state: &mut StoreState, status: &'static str, result: Value) -> Response {
    state.next_operation += 1;
    let id = state.next_operation;
    state.operations.insert(id, OperationEntry { polls_in_progress: 1, status, result });
    reply(StatusCode::OK, json!({"OperationId": id, "OperationNodeTag": "A"}))
}

fn patch_query(state: &mut StoreState, req: &Req) -> Response {
    let text = req.body["Query"]["Query"].as_str().unwrap_or_default();
    let params = req.body["Query"]["QueryParameters"].clone();
    let Some((query_text, script)) = text.rsplit_once(" update {") else {
        return reply(StatusCode::BAD_REQUEST, json!({"Message": "missing update clause"}));
    };
    let script = script.trim().trim_end_matches('}').trim();
    let parsed = match parse_request_query(query_text) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let ids = match matching(state, &parsed, &params) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };
    let Some(assignments) = rql::parse_assignments(script) else {
        return start_operation(state, "Faulted", json!({"Message": format!("unsupported script: {script}"), "Error": "ScriptException"}));
    };
    for id in &ids {
        let change_vector = state.next_change_vector();
        if let Some(doc) = state.docs.get_mut(id) {
            for (field, value) in &assignments {
                if let Value::Object(obj) = &mut doc.body {
                    obj.insert(field.clone(), value.clone());
                }
            }
            doc.change_vector = change_vector;
        }
    }
    start_operation(state, "Completed", json!({"Total": ids.len()}))
}

fn delete_query(state: &mut StoreState, req: &Req) -> Response {
    let text = req.body["Query"].as_str().unwrap_or_default();
    let params = req.body["QueryParameters"].clone();
    let parsed = match parse_request_query(text) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let ids = match matching(state, &parsed, &params) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };
    for id in &ids {
        state.docs.remove(id);
    }
    start_operation(state, "Completed", json!({"Total": ids.len()}))
}

fn operation_state(state: &mut StoreState, req: &Req) -> Response {
    let id: i64 = req.param("id").and_then(|s| s.parse().ok()).unwrap_or_default();
    let Some(entry) = state.operations.get_mut(&id) else {
        return reply(StatusCode::NOT_FOUND, Value::Null);
    };
    if entry.polls_in_progress > 0 {
        entry.polls_in_progress -= 1;
        return reply(StatusCode::OK, json!({"Status": "InProgress"}));
    }
    reply(StatusCode::OK, json!({"Status": entry.status, "Result": entry.result}))
}

fn counters_batch(state: &mut StoreState, req: &Req) -> Response {
    let documents = req.body["Documents"].as_array().cloned().unwrap_or_default();
    let mut out = Vec::new();
    for doc in documents {
        let doc_id = doc["DocumentId"].as_str().unwrap_or_default().to_string();
        if !state.docs.contains_key(&doc_id) {
            return reply(StatusCode::NOT_FOUND, json!({"Message": format!("document {doc_id} not found")}));
        }
        for op in doc["Operations"].as_array().cloned().unwrap_or_default() {
            let name = op["CounterName"].as_str().unwrap_or_default().to_string();
            let key = (doc_id.clone(), name.clone());
            match op["Type"].as_str() {
                Some("Increment") => {
                    let value = state.counters.entry(key).or_insert(0);
                    *value += op["Delta"].as_i64().unwrap_or(0);
                    out.push(json!({"DocumentId": doc_id, "CounterName": name, "TotalValue": *value}));
                }
                Some("Delete") => {
                    state.counters.remove(&key);
                }
                _ => return reply(StatusCode::BAD_REQUEST, json!({"Message": "unknown counter operation"})),
            }
        }
    }
    reply(StatusCode::OK, json!({"Counters": out}))
}

fn counters_get(state: &StoreState, req: &Req) -> Response {
    let doc_id = req.param("docId").unwrap_or_default().to_string();
    if !state.docs.contains_key(&doc_id) {
        return reply(StatusCode::NOT_FOUND, Value::Null);
    }
    let names = req.params("counter");
    let detail = |name: &str, value: i64| json!({"DocumentId": doc_id, "CounterName": name, "TotalValue": value});
    let counters: Vec<Value> = if names.is_empty() {
        state
            .counters
            .iter()
            .filter(|((d, _), _)| *d == doc_id)
            .map(|((_, name), value)| detail(name, *value))
            .collect()
    } else {
        names
            .iter()
            .map(|name| {
                state
                    .counters
                    .get(&(doc_id.clone(), name.clone()))
                    .map_or(Value::Null, |value| detail(name, *value))
            })
            .collect()
    };
    reply(StatusCode::OK, json!({"Counters": counters}))
}
