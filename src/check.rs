//! Source consistency checks (`devdash check`).
//!
//! These read the same schemas as a run but produce no documents. A failing
//! check does not stop a run; it points at rows the run will silently drop
//! or classify twice.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::db::{self, MySqlSource};
use crate::models::Key;
use crate::query::{ActivitySource, Capability, Query};

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    /// Human-readable summary line.
    pub summary: String,
    /// Offending keys, if any.
    pub details: Vec<String>,
}

impl CheckResult {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self {
            name,
            passed: true,
            summary: format!("skipped: {}", reason),
            details: Vec::new(),
        }
    }
}

pub fn revisions_query() -> Query {
    Query::new(
        "check_revisions",
        "SELECT DISTINCT scmlog.rev AS rev FROM {main_db}.scmlog",
        &["rev"],
    )
}

pub fn identified_revisions_query() -> Query {
    Query::new(
        "check_identified_revisions",
        "SELECT DISTINCT scmlog.rev AS rev
FROM {main_db}.scmlog
  JOIN {main_db}.people_uidentities
    ON people_uidentities.people_id = scmlog.author_id",
        &["rev"],
    )
}

/// Repositories with more than one `project_repositories` row. Only rows
/// tagged `scm` count when the table carries a `data_source` column.
pub fn repeated_projects_query(scm_only: bool) -> Query {
    let (name, filter) = if scm_only {
        ("check_repeated_scm_projects", "\nWHERE data_source = 'scm'")
    } else {
        ("check_repeated_projects", "")
    };
    Query::new(
        name,
        format!(
            "SELECT repository_name AS repo,
  COUNT(*) AS entries
FROM {{prj_db}}.project_repositories{}
GROUP BY repository_name
HAVING COUNT(*) > 1
ORDER BY repository_name",
            filter
        ),
        &["repo", "entries"],
    )
}

/// Every revision in the log must map to an identity; the ones that do
/// not are dropped from commit documents.
pub async fn identity_join(source: &dyn ActivitySource) -> Result<CheckResult> {
    let all = source.fetch(&revisions_query()).await?;
    let identified: HashSet<Key> = source
        .fetch(&identified_revisions_query())
        .await?
        .records()
        .filter_map(|r| r.get("rev").key())
        .collect();

    let missing: Vec<String> = all
        .records()
        .filter_map(|r| r.get("rev").key())
        .filter(|key| !identified.contains(key))
        .map(|key| key.to_string())
        .collect();

    Ok(CheckResult {
        name: "identity-join",
        passed: missing.is_empty(),
        summary: format!(
            "{} revisions, {} with an identity",
            all.len(),
            all.len() - missing.len()
        ),
        details: missing,
    })
}

/// A repository listed more than once, under one project or several, is
/// counted once per listing.
pub async fn repeated_projects(source: &dyn ActivitySource) -> Result<CheckResult> {
    const NAME: &str = "repeated-projects";
    if !source.probe(Capability::ProjectGrouping).await? {
        return Ok(CheckResult::skipped(NAME, "no project tables"));
    }
    let scm_only = source.probe(Capability::ProjectDataSource).await?;
    let repeated = source.fetch(&repeated_projects_query(scm_only)).await?;
    let details: Vec<String> = repeated
        .records()
        .map(|r| {
            format!(
                "{} ({} entries)",
                r.get("repo").as_str().unwrap_or("?"),
                r.get("entries").as_i64().unwrap_or(0)
            )
        })
        .collect();
    Ok(CheckResult {
        name: NAME,
        passed: details.is_empty(),
        summary: format!("{} repositories listed more than once", details.len()),
        details,
    })
}

/// Run all checks against a version control source.
pub async fn run_checks(source: &dyn ActivitySource) -> Result<Vec<CheckResult>> {
    info!(source = source.label(), "running consistency checks");
    Ok(vec![identity_join(source).await?, repeated_projects(source).await?])
}

/// Check every dashboard with a version control schema and print the
/// results. Returns the number of failed checks.
pub async fn check_dashboards(config: &Config) -> Result<usize> {
    let mut failed = 0usize;
    for dashboard in &config.dashboards {
        let Some(schemas) = dashboard.scm_schemas() else {
            println!("{:<20} skipped (no scm_db)", dashboard.name);
            continue;
        };
        let pool = db::connect(&config.database, dashboard.port(&config.database)).await?;
        let source = MySqlSource::new(pool.clone(), schemas);
        let results = run_checks(&source).await;
        pool.close().await;

        for result in results? {
            let status = if result.passed { "OK" } else { "FAILED" };
            println!("{:<20} {:<18} {:<7} {}", dashboard.name, result.name, status, result.summary);
            for detail in &result.details {
                println!("    {}", detail);
            }
            if !result.passed {
                failed += 1;
            }
        }
    }
    Ok(failed)
}
