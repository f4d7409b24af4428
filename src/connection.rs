//! HTTP transport to the document store.

use crate::config::ConnectionConfig;
use crate::errors::{AdvancedError, DbError, UnexpectedStatusError};
use log::debug;
use parking_lot::RwLock;
use reqwest::header::HeaderMap;
use reqwest::{Certificate, Identity, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Header set by the server when a request targets a database that does not exist.
pub const DATABASE_MISSING_HEADER: &str = "Database-Missing";

/// A request relative to the server address (e.g. `/admin/databases`).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), headers: Vec::new(), body: None }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Optimistic concurrency guard. An empty change vector sends no header.
    #[must_use]
    pub fn if_match(mut self, change_vector: &str) -> Self {
        if !change_vector.is_empty() {
            self.headers.push(("If-Match", format!("\"{change_vector}\"")));
        }
        self
    }

    /// # Errors
    /// Returns an error when the body cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, DbError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// A fully read response with a status the caller is expected to handle.
#[derive(Debug)]
pub struct Response {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// # Errors
    /// Returns an error when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DbError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Converts this response into the catch-all status error.
    #[must_use]
    pub fn unexpected(&self) -> DbError {
        let advanced = match self.status {
            StatusCode::BAD_REQUEST | StatusCode::INTERNAL_SERVER_ERROR => {
                serde_json::from_slice::<AdvancedError>(&self.body).ok()
            }
            _ => None,
        };
        DbError::from(UnexpectedStatusError {
            method: self.method.clone(),
            url: self.url.clone(),
            status: self.status,
            advanced,
        })
    }
}

/// Shared transport. Security swaps take the write lock; requests only clone the client.
pub struct Connection {
    address: String,
    timeout: Duration,
    client: RwLock<reqwest::Client>,
}

impl Connection {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(address: impl Into<String>) -> Result<Self, DbError> {
        Self::with_timeout(address, Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS))
    }

    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn with_timeout(address: impl Into<String>, timeout: Duration) -> Result<Self, DbError> {
        let address = address.into().trim_end_matches('/').to_string();
        let client = build_client(timeout, None, None)?;
        Ok(Self { address, timeout, client: RwLock::new(client) })
    }

    /// Builds a connection and enables client-certificate security when configured.
    ///
    /// # Errors
    /// Returns an error when a certificate file cannot be read or the client cannot be built.
    pub fn from_config(cfg: &ConnectionConfig) -> Result<Self, DbError> {
        let conn = Self::with_timeout(cfg.address.clone(), cfg.request_timeout())?;
        if let Some(cert) = &cfg.client_cert {
            let identity = std::fs::read(cert)
                .map_err(|e| DbError::Io(format!("{}: {e}", cert.display())))?;
            let ca = match &cfg.ca_cert {
                Some(path) => Some(
                    std::fs::read(path).map_err(|e| DbError::Io(format!("{}: {e}", path.display())))?,
                ),
                None => None,
            };
            conn.enable_security(&identity, ca.as_deref())?;
        }
        Ok(conn)
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Switches to TLS with a client identity (PEM certificate plus key) and an optional CA.
    ///
    /// # Errors
    /// Returns an error when the PEM data is invalid.
    pub fn enable_security(&self, identity_pem: &[u8], ca_pem: Option<&[u8]>) -> Result<(), DbError> {
        let client = build_client(self.timeout, Some(identity_pem), ca_pem)?;
        *self.client.write() = client;
        debug!("client certificate security enabled for {}", self.address);
        Ok(())
    }

    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn disable_security(&self) -> Result<(), DbError> {
        let client = build_client(self.timeout, None, None)?;
        *self.client.write() = client;
        debug!("client certificate security disabled for {}", self.address);
        Ok(())
    }

    /// Sends a request and reads the whole response.
    ///
    /// 200, 201, 204, 404 and 409 are returned to the caller. A 503 flagged with
    /// `Database-Missing` becomes `DatabaseDoesNotExist`; every other status is an
    /// `UnexpectedStatus` error.
    ///
    /// # Errors
    /// Transport failures and statuses outside the handled set.
    pub async fn send(&self, request: Request) -> Result<Response, DbError> {
        let client = self.client.read().clone();
        let url = format!("{}{}", self.address, request.path);
        let mut builder = client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        debug!("{} {} -> {}", request.method, url, status.as_u16());

        let response = Response { method: request.method, url, status, headers, body };
        match status.as_u16() {
            200 | 201 | 204 | 404 | 409 => Ok(response),
            503 if response.headers.contains_key(DATABASE_MISSING_HEADER) => {
                let name = response
                    .headers
                    .get(DATABASE_MISSING_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Err(DbError::DatabaseDoesNotExist(name))
            }
            _ => Err(response.unexpected()),
        }
    }
}

fn build_client(
    timeout: Duration,
    identity_pem: Option<&[u8]>,
    ca_pem: Option<&[u8]>,
) -> Result<reqwest::Client, DbError> {
    let mut builder = reqwest::ClientBuilder::new().timeout(timeout);
    if let Some(pem) = identity_pem {
        builder = builder.use_rustls_tls().identity(Identity::from_pem(pem)?);
    }
    if let Some(pem) = ca_pem {
        builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
    }
    Ok(builder.build()?)
}
