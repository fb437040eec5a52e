//! Run orchestration.
//!
//! Coordinates one run over every configured dashboard: source analysis →
//! local reports → bulk upload. Dashboards are processed one after another;
//! a failure aborts only the dashboard it happened in.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::backend::{Backend, HttpBackend};
use crate::bulk::{self, PublishOptions, PublishReport};
use crate::config::{Config, DashboardConfig};
use crate::db::{self, MySqlSource};
use crate::models::{Analysis, DocType};
use crate::query::ActivitySource;
use crate::report;
use crate::scm::{self, ScmOptions};
use crate::scr;
use crate::serialize::DateMode;

/// Command-line adjustments to a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only process the dashboard with this name.
    pub dashboard: Option<String>,
    /// Drop each collection before uploading, overriding the config.
    pub full_refresh: bool,
}

#[derive(Debug, Clone)]
pub struct ReportTarget {
    pub dir: PathBuf,
    pub date_mode: DateMode,
}

/// Where a dashboard's output goes.
pub struct Sinks<'a> {
    pub backend: Option<(&'a dyn Backend, PublishOptions)>,
    pub reports: Option<ReportTarget>,
}

/// Result of processing one dashboard.
#[derive(Debug, Default)]
pub struct DashboardSummary {
    pub name: String,
    pub repos: usize,
    pub commits: usize,
    pub reviews: usize,
    pub events: usize,
    pub reports: Vec<PathBuf>,
    pub published: Option<PublishReport>,
}

impl DashboardSummary {
    fn print(&self) {
        println!("dashboard {}", self.name);
        println!("  repos: {}", self.repos);
        println!("  commits: {}", self.commits);
        println!("  reviews: {}", self.reviews);
        println!("  events: {}", self.events);
        println!("  reports written: {}", self.reports.len());
        if let Some(published) = &self.published {
            println!(
                "  uploaded: {} items in {} batches",
                published.items, published.batches
            );
            if !published.failures.is_empty() {
                println!("  rejected: {} items", published.failures.len());
            }
        }
    }
}

/// Analyze one dashboard's sources and deliver the result to `sinks`.
pub async fn process_dashboard(
    name: &str,
    scm_source: Option<&dyn ActivitySource>,
    scr_source: Option<&dyn ActivitySource>,
    scm_options: &ScmOptions,
    sinks: &Sinks<'_>,
) -> Result<DashboardSummary> {
    let mut analysis = Analysis::default();
    if let Some(source) = scm_source {
        analysis.extend(
            scm::analyze(source, scm_options, name)
                .await
                .with_context(|| format!("version control analysis of {}", source.label()))?,
        );
    }
    if let Some(source) = scr_source {
        analysis.extend(
            scr::analyze(source, name)
                .await
                .with_context(|| format!("code review analysis of {}", source.label()))?,
        );
    }

    let mut summary = DashboardSummary {
        name: name.to_string(),
        repos: analysis.count(DocType::Repo),
        commits: analysis.count(DocType::Commit),
        reviews: analysis.count(DocType::Review),
        events: analysis.count(DocType::Event),
        ..Default::default()
    };

    if let Some(target) = &sinks.reports {
        summary.reports = report::write_reports(&target.dir, name, &analysis.reports, target.date_mode)?;
    }

    if let Some((backend, options)) = &sinks.backend {
        info!(
            dashboard = name,
            backend = %backend.label(),
            collection = %options.collection,
            documents = analysis.documents.len(),
            "publishing"
        );
        summary.published = Some(bulk::publish(*backend, options, &analysis.documents).await?);
    }

    Ok(summary)
}

async fn run_dashboard(
    config: &Config,
    dashboard: &DashboardConfig,
    backend: Option<&HttpBackend>,
    opts: &RunOptions,
) -> Result<DashboardSummary> {
    let scm_options = ScmOptions {
        all_branches: config.scm.all_branches,
        since: config.scm.since_date()?,
    };

    let pool = db::connect(&config.database, dashboard.port(&config.database)).await?;
    let scm_source = dashboard
        .scm_schemas()
        .map(|schemas| MySqlSource::new(pool.clone(), schemas));
    let scr_source = dashboard
        .scr_schemas()
        .map(|schemas| MySqlSource::new(pool.clone(), schemas));

    let sinks = Sinks {
        backend: match (backend, &config.backend) {
            (Some(backend), Some(backend_config)) => Some((
                backend as &dyn Backend,
                PublishOptions {
                    collection: dashboard.collection(backend_config),
                    batch_size: backend_config.batch_size,
                    full_refresh: opts.full_refresh || backend_config.full_refresh,
                },
            )),
            _ => None,
        },
        reports: match &config.output {
            Some(output) => Some(ReportTarget {
                dir: output.dir.clone(),
                date_mode: output.date_mode()?,
            }),
            None => None,
        },
    };

    let result = process_dashboard(
        &dashboard.name,
        scm_source.as_ref().map(|s| s as &dyn ActivitySource),
        scr_source.as_ref().map(|s| s as &dyn ActivitySource),
        &scm_options,
        &sinks,
    )
    .await;

    pool.close().await;
    result
}

/// Process every selected dashboard. Returns the number that failed.
pub async fn run(config: &Config, opts: &RunOptions) -> Result<usize> {
    let selected: Vec<&DashboardConfig> = config
        .dashboards
        .iter()
        .filter(|d| opts.dashboard.as_deref().map_or(true, |name| d.name == name))
        .collect();
    if selected.is_empty() {
        bail!(
            "Unknown dashboard: '{}'",
            opts.dashboard.as_deref().unwrap_or_default()
        );
    }

    if config.backend.is_none() && config.output.is_none() {
        warn!("neither [backend] nor [output] is configured, results will be discarded");
    }

    let backend = match &config.backend {
        Some(backend_config) => Some(HttpBackend::new(backend_config)?),
        None => None,
    };

    let mut failed = 0usize;
    for dashboard in selected {
        info!(dashboard = %dashboard.name, "processing dashboard");
        match run_dashboard(config, dashboard, backend.as_ref(), opts).await {
            Ok(summary) => summary.print(),
            Err(e) => {
                failed += 1;
                error!(dashboard = %dashboard.name, error = %format!("{:#}", e), "dashboard failed");
                println!("dashboard {}", dashboard.name);
                println!("  failed: {:#}", e);
            }
        }
    }

    if failed == 0 {
        println!("ok");
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::query::MemorySource;

    #[tokio::test]
    async fn test_empty_sources_publish_nothing() {
        let source = MemorySource::new();
        let backend = MemoryBackend::new();
        let sinks = Sinks {
            backend: Some((
                &backend as &dyn Backend,
                PublishOptions {
                    collection: "acme-activity".into(),
                    batch_size: 100,
                    full_refresh: false,
                },
            )),
            reports: None,
        };
        let source: &dyn ActivitySource = &source;
        let summary = process_dashboard("Acme", Some(source), Some(source), &ScmOptions::default(), &sinks)
            .await
            .unwrap();
        assert_eq!(summary.commits, 0);
        assert_eq!(summary.events, 0);
        assert_eq!(summary.published, Some(PublishReport::default()));
        assert!(backend.has_collection("acme-activity"));
    }

    #[tokio::test]
    async fn test_reports_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new();
        let sinks = Sinks {
            backend: None,
            reports: Some(ReportTarget {
                dir: dir.path().to_path_buf(),
                date_mode: DateMode::Epoch,
            }),
        };
        let summary = process_dashboard("Acme", None, Some(&source as &dyn ActivitySource), &ScmOptions::default(), &sinks)
            .await
            .unwrap();
        assert_eq!(summary.reports, vec![dir.path().join("acme").join("scr-reviews.json")]);
        assert!(summary.published.is_none());
    }
}
