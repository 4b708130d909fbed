//! REST client for the managed document database.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `PUT    /collections/{c}/documents/{id}` upsert
//! - `POST   /collections/{c}/documents` append, answers `{"id": ...}`
//! - `POST   /collections/{c}/documents:delete` delete by field equality,
//!   answers `{"deleted": n}`
//! - `GET    /collections/{c}/documents` read all, answers `{"documents": [...]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Document, DocumentStore, RemoteError, StoredDocument};

/// Header carrying the client-held API key.
const API_KEY_HEADER: &str = "x-api-key";

/// HTTP request timeout in seconds.
/// Field connections are slow; 20s still fails fast enough to fall back to the local log.
const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct AppendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    deleted: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<StoredDocument>,
}

/// Document store client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestDocumentStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestDocumentStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn documents_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/documents", self.base_url, collection)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, RemoteError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::from_status(status, &body))
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .header(API_KEY_HEADER, &self.api_key);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(RemoteError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, RemoteError> {
        response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Document) -> Result<(), RemoteError> {
        let url = format!("{}/{}", self.documents_url(collection), id);
        self.send(Method::PUT, &url, Some(&Value::Object(doc))).await?;
        debug!(collection, id, "Document upserted");
        Ok(())
    }

    async fn append(&self, collection: &str, doc: Document) -> Result<String, RemoteError> {
        let url = self.documents_url(collection);
        let response = self.send(Method::POST, &url, Some(&Value::Object(doc))).await?;
        let appended: AppendResponse = Self::parse(response, "append response").await?;
        debug!(collection, id = %appended.id, "Document appended");
        Ok(appended.id)
    }

    async fn delete_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<usize, RemoteError> {
        let url = format!("{}:delete", self.documents_url(collection));
        let body = json!({ "where": { "field": field, "equals": value } });
        let response = self.send(Method::POST, &url, Some(&body)).await?;
        let deleted: DeleteResponse = Self::parse(response, "delete response").await?;
        debug!(collection, field, count = deleted.deleted, "Documents deleted");
        Ok(deleted.deleted)
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<StoredDocument>, RemoteError> {
        let url = self.documents_url(collection);
        let response = self.send(Method::GET, &url, None).await?;
        let list: ListResponse = Self::parse(response, "document list").await?;
        Ok(list.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_url_trims_trailing_slash() {
        let store = RestDocumentStore::new("https://db.example.org/v1/", "key").unwrap();
        assert_eq!(
            store.documents_url("locations"),
            "https://db.example.org/v1/collections/locations/documents"
        );
    }

    #[test]
    fn test_list_response_parses_camel_case() {
        let body = r#"{"documents":[{"id":"a1","fields":{"who":"Kim"},"writtenAt":"2026-05-01T10:00:00Z"}]}"#;
        let list: ListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(list.documents.len(), 1);
        assert_eq!(list.documents[0].field("who"), Some(&Value::from("Kim")));
    }
}
