//! Credentialed JSON client for the MetaRec backend.
//!
//! Every request goes through one cookie-carrying `reqwest` client, so a
//! debug session established by `login` is reused by later calls. Non-2xx
//! responses become [`ClientError::Http`] with the backend's `detail` field.

use std::io::BufReader;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ConsoleConfig;
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    http: Client,
}

impl BackendClient {
    pub fn new(config: &ConsoleConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.http_timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self::with_http(config.base_url.clone(), http))
    }

    /// Wrap an existing client. It should have a cookie store enabled for
    /// debug-session calls to work.
    pub fn with_http(base_url: impl Into<String>, http: Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.get_with_query(path, &[])
    }

    pub fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ClientError> {
        let value = self.send("GET", path, query, None)?;
        decode(path, value)
    }

    pub fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let req = self.http.post(self.url(path)).json(body);
        tracing::debug!(method = "POST", path, "backend request");
        let value = send_request(req)?;
        decode(path, value)
    }

    pub fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let req = self.http.put(self.url(path)).json(body);
        tracing::debug!(method = "PUT", path, "backend request");
        let value = send_request(req)?;
        decode(path, value)
    }

    pub fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let value = self.send("DELETE", path, &[], None)?;
        decode(path, value)
    }

    /// POST without a body.
    pub fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let value = self.send("POST", path, &[], None)?;
        decode(path, value)
    }

    /// Send an arbitrary request and return the body as JSON, or as a JSON
    /// string when the body is not JSON.
    pub fn send(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let method: Method =
            method
                .to_uppercase()
                .parse()
                .map_err(|_| ClientError::UnsupportedMethod {
                    method: method.to_string(),
                })?;

        tracing::debug!(%method, path, query_len = query.len(), "backend request");
        let mut req = self.http.request(method, self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        send_request(req)
    }

    /// POST and hand back the raw response body for incremental reading.
    pub fn post_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<BufReader<Response>, ClientError> {
        tracing::debug!(method = "POST", path, "backend stream request");
        let resp = self
            .http
            .post(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .map_err(ClientError::RequestFailed)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().map_err(ClientError::ResponseRead)?;
            return Err(ClientError::Http {
                status,
                detail: extract_detail(&text),
            });
        }
        Ok(BufReader::new(resp))
    }
}

fn send_request(req: RequestBuilder) -> Result<Value, ClientError> {
    let resp = req.send().map_err(ClientError::RequestFailed)?;
    let status = resp.status();
    let text = resp.text().map_err(ClientError::ResponseRead)?;

    if !status.is_success() {
        tracing::debug!(status = status.as_u16(), "backend error response");
        return Err(ClientError::Http {
            status,
            detail: extract_detail(&text),
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode {
        path: path.to_string(),
        source,
    })
}

/// Pull the `detail` field out of an error body.
///
/// String details are used verbatim; structured ones (validation error
/// lists) are rendered as JSON. Bodies without `detail` are returned as-is.
pub fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}
