//! # devdash
//!
//! Development activity extraction for search-backed dashboards.
//!
//! devdash reads commit and code-review activity from MySQL databases,
//! attributes every event to a canonical identity and the organization that
//! identity belonged to at the time, flattens the result into documents, and
//! writes them to local JSON reports and an Elasticsearch-style backend
//! through batched, idempotent bulk uploads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │   Sources   │──▶│ Resolve + Merge  │──▶│  Reports  │
//! │ MySQL/Memory│   │ identity, org,   │   │  (JSON)   │
//! └─────────────┘   │ repo, project    │   └───────────┘
//!                   └────────┬─────────┘
//!                            ▼
//!                   ┌──────────────────┐
//!                   │  Bulk upload     │──▶ backend
//!                   │  mapping+batches │
//!                   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Tables, values, documents and sentinels |
//! | [`query`] | Query templates and the source trait |
//! | [`db`] | MySQL source |
//! | [`resolve`] | Identity and time-bounded affiliation lookup |
//! | [`merge`] | Joins, sentinel fill and document projection |
//! | [`scm`] | Version control analysis |
//! | [`scr`] | Code review analysis |
//! | [`serialize`] | Date and duration encoding |
//! | [`mapping`] | Backend field mappings |
//! | [`backend`] | Backend trait, HTTP and in-memory implementations |
//! | [`bulk`] | Batched upload |
//! | [`report`] | Local JSON reports |
//! | [`ingest`] | Run orchestration |
//! | [`check`] | Source consistency checks |
//! | [`sources`] | Dashboard listing |

pub mod backend;
pub mod bulk;
pub mod check;
pub mod config;
pub mod db;
pub mod ingest;
pub mod mapping;
pub mod merge;
pub mod models;
pub mod query;
pub mod report;
pub mod resolve;
pub mod scm;
pub mod scr;
pub mod serialize;
pub mod sources;
