use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value as Json;
use tracing::debug;

use super::{Backend, BackendError, BulkResponse, DeleteOutcome, ItemFailure};
use crate::config::BackendConfig;

/// Backend speaking the Elasticsearch REST API.
pub struct HttpBackend {
    client: Client,
    base: String,
    credentials: Option<(String, String)>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
            credentials: config.credentials(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn send(&self, method: &'static str, url: String, request: RequestBuilder) -> Result<Response, BackendError> {
        debug!(method, url = %url, "backend request");
        Ok(self.authorize(request).send().await?)
    }
}

async fn status_error(method: &'static str, url: String, response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    BackendError::Status {
        method,
        url,
        status,
        body,
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn label(&self) -> String {
        self.base.clone()
    }

    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome, BackendError> {
        let url = self.url(collection);
        let response = self.send("DELETE", url.clone(), self.client.delete(&url)).await?;
        match response.status().as_u16() {
            200..=299 => Ok(DeleteOutcome::Deleted),
            404 => Ok(DeleteOutcome::Missing),
            _ => Err(status_error("DELETE", url, response).await),
        }
    }

    async fn create_collection(&self, collection: &str) -> Result<(), BackendError> {
        let url = self.url(collection);
        let response = self.send("PUT", url.clone(), self.client.put(&url)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error = status_error("PUT", url, response).await;
        match &error {
            BackendError::Status { status: 400, body, .. } if is_already_exists(body) => {
                debug!(collection, "collection already exists");
                Ok(())
            }
            _ => Err(error),
        }
    }

    async fn put_mapping(&self, collection: &str, doc_type: &str, mapping: &Json) -> Result<(), BackendError> {
        let url = self.url(&format!("{}/_mapping/{}", collection, doc_type));
        let response = self
            .send("PUT", url.clone(), self.client.put(&url).json(mapping))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("PUT", url, response).await)
        }
    }

    async fn bulk(&self, body: String) -> Result<BulkResponse, BackendError> {
        let url = self.url("_bulk");
        let request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = self.send("PUT", url.clone(), request).await?;
        if !response.status().is_success() {
            return Err(status_error("PUT", url, response).await);
        }
        let text = response.text().await?;
        Ok(parse_bulk_response(&text))
    }
}

fn is_already_exists(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("already_exists") || lower.contains("alreadyexists")
}

/// Read per-item outcomes from a bulk response. Anything unparseable is
/// treated as an empty, successful response.
pub(crate) fn parse_bulk_response(text: &str) -> BulkResponse {
    let json: Json = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            debug!(error = %e, "bulk response is not JSON");
            return BulkResponse::default();
        }
    };
    let items = json
        .get("items")
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let failures = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .filter_map(|outcome| {
            let status = outcome.get("status").and_then(Json::as_u64).unwrap_or(0) as u16;
            let reason = match outcome.get("error") {
                None | Some(Json::Null) if status < 300 => return None,
                None | Some(Json::Null) => format!("status {}", status),
                Some(Json::String(s)) => s.clone(),
                Some(other) => other
                    .get("reason")
                    .and_then(Json::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            };
            Some(ItemFailure {
                doc_type: text_field(outcome, "_type"),
                id: text_field(outcome, "_id"),
                status,
                reason,
            })
        })
        .collect();

    BulkResponse {
        items: items.len(),
        failures,
    }
}

fn text_field(outcome: &Json, key: &str) -> String {
    match outcome.get(key) {
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
