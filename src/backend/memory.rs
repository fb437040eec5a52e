use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as Json;

use super::{Backend, BackendError, BulkResponse, DeleteOutcome, ItemFailure};

/// A call received by a [`MemoryBackend`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredCall {
    Delete(String),
    Create(String),
    Mapping { collection: String, doc_type: String },
    Bulk { items: usize },
}

type DocKey = (String, String, String);

#[derive(Default)]
struct State {
    collections: HashSet<String>,
    mappings: BTreeMap<(String, String), Json>,
    documents: BTreeMap<DocKey, Json>,
    calls: Vec<StoredCall>,
}

/// In-process backend holding documents in a map keyed by
/// `(collection, type, id)`.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    rejected: HashSet<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every bulk item with this id.
    pub fn rejecting(mut self, id: &str) -> Self {
        self.rejected.insert(id.to_string());
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<StoredCall> {
        self.state().calls.clone()
    }

    pub fn document(&self, collection: &str, doc_type: &str, id: &str) -> Option<Json> {
        self.state()
            .documents
            .get(&(collection.to_string(), doc_type.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored documents in `collection`, optionally of one type.
    pub fn count(&self, collection: &str, doc_type: Option<&str>) -> usize {
        self.state()
            .documents
            .keys()
            .filter(|(c, t, _)| c == collection && doc_type.map_or(true, |d| d == t))
            .count()
    }

    pub fn mapping(&self, collection: &str, doc_type: &str) -> Option<Json> {
        self.state()
            .mappings
            .get(&(collection.to_string(), doc_type.to_string()))
            .cloned()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.state().collections.contains(collection)
    }
}

fn action_target(action: &Json) -> Option<DocKey> {
    let index = action.get("index")?;
    let field = |key: &str| index.get(key).and_then(Json::as_str).map(str::to_string);
    Some((field("_index")?, field("_type")?, field("_id")?))
}

#[async_trait]
impl Backend for MemoryBackend {
    fn label(&self) -> String {
        "memory".to_string()
    }

    async fn delete_collection(&self, collection: &str) -> Result<DeleteOutcome, BackendError> {
        let mut state = self.state();
        state.calls.push(StoredCall::Delete(collection.to_string()));
        if !state.collections.remove(collection) {
            return Ok(DeleteOutcome::Missing);
        }
        state.documents.retain(|(c, _, _), _| c != collection);
        state.mappings.retain(|(c, _), _| c != collection);
        Ok(DeleteOutcome::Deleted)
    }

    async fn create_collection(&self, collection: &str) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(StoredCall::Create(collection.to_string()));
        state.collections.insert(collection.to_string());
        Ok(())
    }

    async fn put_mapping(&self, collection: &str, doc_type: &str, mapping: &Json) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(StoredCall::Mapping {
            collection: collection.to_string(),
            doc_type: doc_type.to_string(),
        });
        state
            .mappings
            .insert((collection.to_string(), doc_type.to_string()), mapping.clone());
        Ok(())
    }

    async fn bulk(&self, body: String) -> Result<BulkResponse, BackendError> {
        let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() % 2 != 0 {
            return Err(BackendError::MalformedBulk(format!(
                "{} lines, expected action/document pairs",
                lines.len()
            )));
        }

        let mut parsed = Vec::with_capacity(lines.len() / 2);
        for pair in lines.chunks(2) {
            let action: Json = serde_json::from_str(pair[0])
                .map_err(|e| BackendError::MalformedBulk(format!("action line: {}", e)))?;
            let target = action_target(&action)
                .ok_or_else(|| BackendError::MalformedBulk(format!("unsupported action: {}", pair[0])))?;
            let document: Json = serde_json::from_str(pair[1])
                .map_err(|e| BackendError::MalformedBulk(format!("document line: {}", e)))?;
            parsed.push((target, document));
        }

        let mut state = self.state();
        state.calls.push(StoredCall::Bulk { items: parsed.len() });
        let mut response = BulkResponse {
            items: parsed.len(),
            failures: Vec::new(),
        };
        for ((collection, doc_type, id), document) in parsed {
            if self.rejected.contains(&id) {
                response.failures.push(ItemFailure {
                    doc_type,
                    id,
                    status: 400,
                    reason: "rejected".to_string(),
                });
                continue;
            }
            state.collections.insert(collection.clone());
            state.documents.insert((collection, doc_type, id), document);
        }
        Ok(response)
    }
}
