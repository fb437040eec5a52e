//! Source query layer.
//!
//! Every relational read goes through an [`ActivitySource`]: a named
//! [`Query`] goes in, a [`Table`] with exactly the query's declared columns
//! comes out. SQL text is templated with three schema placeholders, filled
//! from [`Schemas`] at execution time:
//!
//! | Placeholder | Schema |
//! |-------------|--------|
//! | `{main_db}` | activity log (version control or review tracker) |
//! | `{sh_db}` | identities, profiles and affiliations |
//! | `{prj_db}` | project grouping of repositories |
//!
//! User-supplied values (dates, branch names) are never spliced into the
//! text; they travel as bound [`Param`]s.
//!
//! ```text
//! ┌──────────────┐  fetch(Query)   ┌────────────────┐
//! │  scm / scr   │ ──────────────▶ │ ActivitySource │ ──▶ MySQL
//! │  pipelines   │ ◀────────────── │ (MySql/Memory) │
//! └──────────────┘      Table      └────────────────┘
//! ```

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::models::Table;

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Timestamp(NaiveDateTime),
}

/// A named, schema-templated SQL query and the columns it yields.
#[derive(Debug, Clone)]
pub struct Query {
    /// Stable name, used for logs and by in-memory sources as the lookup key.
    pub name: &'static str,
    pub sql: String,
    pub columns: &'static [&'static str],
    pub params: Vec<Param>,
}

impl Query {
    pub fn new(name: &'static str, sql: impl Into<String>, columns: &'static [&'static str]) -> Self {
        Self {
            name,
            sql: sql.into(),
            columns,
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

/// Schema names substituted into query templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schemas {
    pub main: String,
    pub identities: String,
    pub projects: String,
}

impl Schemas {
    pub fn render(&self, sql: &str) -> String {
        sql.replace("{main_db}", &self.main)
            .replace("{sh_db}", &self.identities)
            .replace("{prj_db}", &self.projects)
    }
}

/// Optional parts of a source schema, detected at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The project schema has `projects` and `project_repositories` tables.
    ProjectGrouping,
    /// `project_repositories` tags each row with a `data_source`.
    ProjectDataSource,
}

/// Every enrollment of every identity. Interval matching happens in the
/// resolver, not here.
pub fn affiliations_query() -> Query {
    Query::new(
        "affiliations",
        "SELECT enrollments.uuid AS uuid,
  enrollments.organization_id AS org_id,
  organizations.name AS org_name,
  enrollments.start AS start,
  enrollments.end AS end
FROM {sh_db}.enrollments
  JOIN {sh_db}.organizations
    ON organizations.id = enrollments.organization_id
ORDER BY enrollments.uuid, enrollments.start",
        &["uuid", "org_id", "org_name", "start", "end"],
    )
}

// ═══════════════════════════════════════════════════════════════════════
// Source Trait
// ═══════════════════════════════════════════════════════════════════════

/// A relational source of activity data.
///
/// Implementations execute [`Query`]s against one set of [`Schemas`] and
/// return rows as a [`Table`] named after the query, with the query's
/// declared columns in order. Columns the backend returns beyond those are
/// discarded; a declared column the backend does not return is an error.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use devdash::models::Table;
/// use devdash::query::{ActivitySource, Capability, Query};
///
/// struct EmptySource;
///
/// #[async_trait]
/// impl ActivitySource for EmptySource {
///     fn label(&self) -> &str { "empty" }
///
///     async fn fetch(&self, query: &Query) -> Result<Table> {
///         Ok(Table::new(query.name, query.columns))
///     }
///
///     async fn probe(&self, _capability: Capability) -> Result<bool> {
///         Ok(false)
///     }
/// }
/// ```
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Short description for logs (e.g. `"mysql:openstack_scm"`).
    fn label(&self) -> &str;

    /// Run `query` and return its rows.
    async fn fetch(&self, query: &Query) -> Result<Table>;

    /// Report whether an optional part of the schema is present.
    ///
    /// Absence is a normal answer (`Ok(false)`); errors are reserved for
    /// failures of the probe itself.
    async fn probe(&self, capability: Capability) -> Result<bool>;
}

/// In-memory source serving canned tables by query name.
///
/// A query with no canned table yields an empty result. Useful for tests
/// and for replaying captured data.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Table>,
    capabilities: HashSet<Capability>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, query_name: &str, table: Table) -> Self {
        self.tables.insert(query_name.to_string(), table);
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }
}

#[async_trait]
impl ActivitySource for MemorySource {
    fn label(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, query: &Query) -> Result<Table> {
        match self.tables.get(query.name) {
            Some(table) => Ok(table.select(query.columns)?.with_name(query.name)),
            None => Ok(Table::new(query.name, query.columns)),
        }
    }

    async fn probe(&self, capability: Capability) -> Result<bool> {
        Ok(self.capabilities.contains(&capability))
    }
}
