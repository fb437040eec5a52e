//! Document store backends.
//!
//! A [`Backend`] is the write side of an Elasticsearch-style store: it
//! knows how to drop and create a collection, install a per-type field
//! mapping, and accept a newline-delimited bulk body. Two implementations
//! ship with devdash:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`HttpBackend`] | a real cluster over HTTP |
//! | [`MemoryBackend`] | tests and dry runs |
//!
//! Bulk bodies are built by [`crate::bulk`]; the backend only transports
//! them and reports per-item failures.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::{MemoryBackend, StoredCall};

use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;

/// Failure talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed bulk request: {0}")]
    MalformedBulk(String),
}

/// Outcome of deleting a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// There was nothing to delete.
    Missing,
}

/// One rejected item of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub doc_type: String,
    pub id: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub items: usize,
    pub failures: Vec<ItemFailure>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short description for logs.
    fn label(&self) -> String;

    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome, BackendError>;

    /// Create `collection`. An existing collection is not an error.
    async fn create_collection(&self, collection: &str) -> Result<(), BackendError>;

    async fn put_mapping(&self, collection: &str, doc_type: &str, mapping: &Json) -> Result<(), BackendError>;

    /// Send one bulk body. Items are upserted by `(type, id)`; sending the
    /// same body twice leaves the store unchanged.
    async fn bulk(&self, body: String) -> Result<BulkResponse, BackendError>;
}
