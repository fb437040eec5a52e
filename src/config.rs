use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::query::Schemas;
use crate::serialize::DateMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub output: Option<OutputConfig>,
    #[serde(default)]
    pub scm: ScmConfig,
    pub dashboards: Vec<DashboardConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3306
}
fn default_max_connections() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
    /// Overrides the per-dashboard collection name.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_bulk_batch_size")]
    pub batch_size: usize,
    /// Delete each collection before writing to it.
    #[serde(default)]
    pub full_refresh: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bulk_batch_size() -> usize {
    10_000
}
fn default_timeout_secs() -> u64 {
    120
}

impl BackendConfig {
    pub fn credentials(&self) -> Option<(String, String)> {
        self.user
            .as_ref()
            .map(|user| (user.clone(), self.password.clone().unwrap_or_default()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_date_mode")]
    pub date_mode: String,
}

fn default_date_mode() -> String {
    "epoch".to_string()
}

impl OutputConfig {
    pub fn date_mode(&self) -> Result<DateMode> {
        Ok(self.date_mode.parse::<DateMode>()?)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScmConfig {
    /// Count commits landed on any branch, not only `master`.
    #[serde(default)]
    pub all_branches: bool,
    /// Only commits authored on or after this date (YYYY-MM-DD).
    #[serde(default)]
    pub since: Option<String>,
}

impl ScmConfig {
    pub fn since_date(&self) -> Result<Option<NaiveDate>> {
        self.since
            .as_deref()
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .with_context(|| format!("scm.since must be YYYY-MM-DD, got '{}'", s))
            })
            .transpose()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub name: String,
    #[serde(default)]
    pub scm_db: Option<String>,
    #[serde(default)]
    pub scr_db: Option<String>,
    pub identity_db: String,
    /// Defaults to `scm_db`.
    #[serde(default)]
    pub projects_db: Option<String>,
    /// Overrides `database.port` for this dashboard.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub collection: Option<String>,
}

impl DashboardConfig {
    fn projects_schema(&self, main: &str) -> String {
        self.projects_db
            .clone()
            .or_else(|| self.scm_db.clone())
            .unwrap_or_else(|| main.to_string())
    }

    pub fn scm_schemas(&self) -> Option<Schemas> {
        self.scm_db.as_ref().map(|main| Schemas {
            main: main.clone(),
            identities: self.identity_db.clone(),
            projects: self.projects_schema(main),
        })
    }

    pub fn scr_schemas(&self) -> Option<Schemas> {
        self.scr_db.as_ref().map(|main| Schemas {
            main: main.clone(),
            identities: self.identity_db.clone(),
            projects: self.projects_schema(main),
        })
    }

    pub fn port(&self, database: &DatabaseConfig) -> u16 {
        self.port.unwrap_or(database.port)
    }

    /// Destination collection: the backend-wide override, the dashboard's
    /// own setting, or `<name>-activity` in lowercase.
    pub fn collection(&self, backend: &BackendConfig) -> String {
        backend
            .collection
            .clone()
            .or_else(|| self.collection.clone())
            .unwrap_or_else(|| format!("{}-activity", self.name.to_lowercase()))
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.dashboards.is_empty() {
        anyhow::bail!("at least one [[dashboards]] entry is required");
    }

    if config.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be > 0");
    }

    if let Some(backend) = &config.backend {
        if backend.batch_size == 0 {
            anyhow::bail!("backend.batch_size must be > 0");
        }
        if !backend.url.starts_with("http://") && !backend.url.starts_with("https://") {
            anyhow::bail!("backend.url must be an http(s) URL, got '{}'", backend.url);
        }
        if backend.password.is_some() && backend.user.is_none() {
            anyhow::bail!("backend.password is set but backend.user is not");
        }
    }

    if let Some(output) = &config.output {
        output.date_mode()?;
    }

    config.scm.since_date()?;

    let mut names = HashSet::new();
    for dashboard in &config.dashboards {
        if !names.insert(dashboard.name.as_str()) {
            anyhow::bail!("duplicate dashboard name: '{}'", dashboard.name);
        }
        if dashboard.scm_db.is_none() && dashboard.scr_db.is_none() {
            anyhow::bail!(
                "dashboard '{}' needs scm_db, scr_db, or both",
                dashboard.name
            );
        }
        let schemas = [
            Some(&dashboard.identity_db),
            dashboard.scm_db.as_ref(),
            dashboard.scr_db.as_ref(),
            dashboard.projects_db.as_ref(),
        ];
        for schema in schemas.into_iter().flatten() {
            if !is_identifier(schema) {
                anyhow::bail!(
                    "dashboard '{}': '{}' is not a valid schema name",
                    dashboard.name,
                    schema
                );
            }
        }
    }

    // Document ids are source row ids, so two dashboards in one collection
    // overwrite each other, and a full refresh of one deletes the other.
    if let Some(backend) = &config.backend {
        let mut owners: HashMap<String, &str> = HashMap::new();
        for dashboard in &config.dashboards {
            let collection = dashboard.collection(backend);
            if let Some(other) = owners.insert(collection.clone(), &dashboard.name) {
                anyhow::bail!(
                    "dashboards '{}' and '{}' both write to collection '{}'; \
                     give each dashboard its own collection",
                    other,
                    dashboard.name,
                    collection
                );
            }
        }
    }

    Ok(())
}
