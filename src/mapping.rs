//! Field-type schemas applied to the backend before documents are written.
//!
//! Rendered in the legacy typed-mapping layout:
//!
//! ```json
//! {"repo": {"properties": {"repo_id": {"type": "long"}, ...}}}
//! ```

use serde_json::{json, Map, Value as Json};

use crate::models::DocType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Long,
    Integer,
    /// Analyzed free text.
    Text,
    /// Exact-match string.
    Keyword,
    Date,
}

impl FieldType {
    fn to_json(self) -> Json {
        match self {
            FieldType::Long => json!({"type": "long"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Text => json!({"type": "string"}),
            FieldType::Keyword => json!({"type": "string", "index": "not_analyzed"}),
            FieldType::Date => json!({"type": "date", "format": "dateOptionalTime"}),
        }
    }
}

use FieldType::*;

const REPO: &[(&str, FieldType)] = &[
    ("repo_id", Long),
    ("repo_name", Keyword),
    ("project_id", Long),
    ("project_name", Keyword),
    ("dashboard", Keyword),
];

const COMMIT: &[(&str, FieldType)] = &[
    ("id", Long),
    ("author_date", Date),
    ("commit_date", Date),
    ("utc_author", Date),
    ("utc_commit", Date),
    ("message", Text),
    ("hash", Keyword),
    ("tz", Long),
    ("author_uuid", Keyword),
    ("author_name", Keyword),
    ("name", Keyword),
    ("bot", Long),
    ("added", Long),
    ("removed", Long),
    ("org_id", Long),
    ("org_name", Keyword),
    ("repo_id", Long),
    ("repo_name", Keyword),
    ("project_id", Long),
    ("project_name", Keyword),
    ("branch_name", Keyword),
    ("dashboard", Keyword),
];

const REVIEW: &[(&str, FieldType)] = &[
    ("id", Long),
    ("review", Keyword),
    ("summary", Text),
    ("submitter", Long),
    ("status", Keyword),
    ("uuid", Keyword),
    ("branch", Keyword),
    ("url", Keyword),
    ("githash", Keyword),
    ("project", Keyword),
    ("opened", Date),
    ("closed", Date),
    ("timeopen", Long),
    ("patchsets", Long),
    ("name", Keyword),
    ("label", Keyword),
    ("bot", Long),
    ("org_id", Long),
    ("org_name", Keyword),
    ("dashboard", Keyword),
];

const EVENT: &[(&str, FieldType)] = &[
    ("id", Long),
    ("review", Keyword),
    ("uuid", Keyword),
    ("field", Keyword),
    ("patchset", Integer),
    ("tag", Keyword),
    ("event_date", Date),
    ("name", Keyword),
    ("label", Keyword),
    ("bot", Long),
    ("org_id", Long),
    ("org_name", Keyword),
    ("opened", Date),
    ("closed", Date),
    ("branch", Keyword),
    ("project", Keyword),
    ("patchsets", Long),
    ("status", Keyword),
    ("timeopen", Long),
    ("dashboard", Keyword),
];

/// Declared fields of `doc_type`, in document order.
pub fn fields(doc_type: DocType) -> &'static [(&'static str, FieldType)] {
    match doc_type {
        DocType::Repo => REPO,
        DocType::Commit => COMMIT,
        DocType::Review => REVIEW,
        DocType::Event => EVENT,
    }
}

/// Mapping body for `doc_type`.
pub fn schema(doc_type: DocType) -> Json {
    let properties: Map<String, Json> = fields(doc_type)
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.to_json()))
        .collect();
    let mut body = Map::new();
    body.insert("properties".to_string(), Json::Object(properties));
    let mut root = Map::new();
    root.insert(doc_type.as_str().to_string(), Json::Object(body));
    Json::Object(root)
}
