//! Batched, idempotent upload of documents to a [`Backend`].
//!
//! Publishing one dashboard's documents runs in a fixed order:
//!
//! 1. drop the collection (full refresh only; a missing one is fine)
//! 2. create the collection
//! 3. install the mapping of every document type present
//! 4. send each type's documents in batches of at most `batch_size`
//!
//! Every document is serialized before the first request is made, so a
//! value that cannot be encoded fails the upload without touching the
//! backend. Items are addressed by their external id: publishing the same
//! documents twice leaves one copy of each.

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{info, warn};

use crate::backend::{Backend, DeleteOutcome, ItemFailure};
use crate::mapping;
use crate::models::{DocType, Document};
use crate::serialize::{document_to_json, DateMode};

/// Upload settings for one collection.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub collection: String,
    pub batch_size: usize,
    pub full_refresh: bool,
}

/// What one publish did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishReport {
    pub batches: usize,
    pub items: usize,
    pub failures: Vec<ItemFailure>,
}

/// Action line naming the destination of the document that follows it.
pub fn action_line(collection: &str, doc_type: DocType, id: &str) -> String {
    json!({"index": {"_index": collection, "_type": doc_type.as_str(), "_id": id}}).to_string()
}

/// Encode `documents` (all of one type) into bulk bodies of at most
/// `batch_size` items each.
pub fn encode_batches(collection: &str, documents: &[&Document], batch_size: usize) -> Result<Vec<(usize, String)>> {
    if batch_size == 0 {
        bail!("batch size must be at least 1");
    }
    let mut pairs = Vec::with_capacity(documents.len());
    for doc in documents {
        let id = doc.external_id().with_context(|| {
            format!(
                "{} document has no usable '{}'",
                doc.doc_type,
                doc.doc_type.id_field()
            )
        })?;
        let body = document_to_json(doc, DateMode::Iso)
            .with_context(|| format!("serializing {} {}", doc.doc_type, id))?;
        pairs.push(format!(
            "{}\n{}\n",
            action_line(collection, doc.doc_type, &id),
            body
        ));
    }

    Ok(pairs
        .chunks(batch_size)
        .map(|chunk| (chunk.len(), chunk.concat()))
        .collect())
}

/// Publish `documents` into `options.collection`.
pub async fn publish(backend: &dyn Backend, options: &PublishOptions, documents: &[Document]) -> Result<PublishReport> {
    let collection = options.collection.as_str();

    let mut encoded = Vec::new();
    for doc_type in DocType::ALL {
        let of_type: Vec<&Document> = documents.iter().filter(|d| d.doc_type == doc_type).collect();
        if of_type.is_empty() {
            continue;
        }
        encoded.push((doc_type, encode_batches(collection, &of_type, options.batch_size)?));
    }

    if options.full_refresh {
        match backend.delete_collection(collection).await? {
            DeleteOutcome::Deleted => info!(collection, "deleted collection"),
            DeleteOutcome::Missing => info!(collection, "collection did not exist, nothing to delete"),
        }
    }
    backend.create_collection(collection).await?;
    for (doc_type, _) in &encoded {
        backend
            .put_mapping(collection, doc_type.as_str(), &mapping::schema(*doc_type))
            .await?;
    }

    let mut report = PublishReport::default();
    for (doc_type, batches) in encoded {
        let total = batches.len();
        for (n, (items, body)) in batches.into_iter().enumerate() {
            let bytes = body.len();
            let response = backend.bulk(body).await?;
            info!(
                collection,
                doc_type = %doc_type,
                batch = n + 1,
                of = total,
                items,
                bytes,
                "uploaded batch"
            );
            for failure in &response.failures {
                warn!(
                    doc_type = %failure.doc_type,
                    id = %failure.id,
                    status = failure.status,
                    reason = %failure.reason,
                    "backend rejected document"
                );
            }
            report.batches += 1;
            report.items += items;
            report.failures.extend(response.failures);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, StoredCall};
    use crate::models::Value;

    fn commit(id: i64) -> Document {
        Document {
            doc_type: DocType::Commit,
            fields: vec![
                ("id".into(), Value::Int(id)),
                ("hash".into(), format!("h{}", id).into()),
            ],
        }
    }

    fn options(batch_size: usize, full_refresh: bool) -> PublishOptions {
        PublishOptions {
            collection: "acme-activity".into(),
            batch_size,
            full_refresh,
        }
    }

    #[test]
    fn test_action_line() {
        assert_eq!(
            action_line("acme", DocType::Repo, "7"),
            r#"{"index":{"_index":"acme","_type":"repo","_id":"7"}}"#
        );
    }

    #[test]
    fn test_batch_sizes() {
        let docs: Vec<Document> = (1..=25).map(commit).collect();
        let refs: Vec<&Document> = docs.iter().collect();
        let batches = encode_batches("acme", &refs, 10).unwrap();
        let sizes: Vec<usize> = batches.iter().map(|(n, _)| *n).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(batches[2].1.lines().count(), 10);
        assert!(batches[0].1.ends_with('\n'));

        let exact = encode_batches("acme", &refs[..20], 10).unwrap();
        assert_eq!(exact.len(), 2);
        assert_eq!(exact[1].0, 10);
    }

    #[test]
    fn test_missing_id_fails_before_sending() {
        let doc = Document {
            doc_type: DocType::Commit,
            fields: vec![("id".into(), Value::Null)],
        };
        assert!(encode_batches("acme", &[&doc], 10).is_err());
    }

    #[tokio::test]
    async fn test_unencodable_document_touches_nothing() {
        let backend = MemoryBackend::new();
        let bad = Document {
            doc_type: DocType::Commit,
            fields: vec![("id".into(), Value::Int(1)), ("raw".into(), Value::Bytes(vec![1]))],
        };
        let err = publish(&backend, &options(10, true), &[commit(2), bad]).await;
        assert!(err.is_err());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_call_order() {
        let backend = MemoryBackend::new();
        let mut docs: Vec<Document> = (1..=3).map(commit).collect();
        docs.push(Document {
            doc_type: DocType::Repo,
            fields: vec![("repo_id".into(), Value::Int(10))],
        });
        let report = publish(&backend, &options(2, true), &docs).await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.items, 4);
        assert_eq!(
            backend.calls(),
            vec![
                StoredCall::Delete("acme-activity".into()),
                StoredCall::Create("acme-activity".into()),
                StoredCall::Mapping {
                    collection: "acme-activity".into(),
                    doc_type: "repo".into()
                },
                StoredCall::Mapping {
                    collection: "acme-activity".into(),
                    doc_type: "commit".into()
                },
                StoredCall::Bulk { items: 1 },
                StoredCall::Bulk { items: 2 },
                StoredCall::Bulk { items: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let backend = MemoryBackend::new();
        let docs: Vec<Document> = (1..=5).map(commit).collect();
        publish(&backend, &options(2, false), &docs).await.unwrap();
        publish(&backend, &options(2, false), &docs).await.unwrap();
        assert_eq!(backend.count("acme-activity", Some("commit")), 5);
    }

    #[tokio::test]
    async fn test_item_failures_are_collected() {
        let backend = MemoryBackend::new().rejecting("2");
        let docs: Vec<Document> = (1..=3).map(commit).collect();
        let report = publish(&backend, &options(10, false), &docs).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "2");
        assert_eq!(backend.count("acme-activity", None), 2);
    }
}
