use crate::config::Config;

/// One row of the dashboard listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRow {
    pub name: String,
    pub scm: String,
    pub scr: String,
    pub identities: String,
    pub projects: String,
    pub collection: String,
}

const NONE: &str = "-";

pub fn dashboard_rows(config: &Config) -> Vec<DashboardRow> {
    config
        .dashboards
        .iter()
        .map(|d| {
            let schemas = d.scm_schemas().or_else(|| d.scr_schemas());
            DashboardRow {
                name: d.name.clone(),
                scm: d.scm_db.clone().unwrap_or_else(|| NONE.to_string()),
                scr: d.scr_db.clone().unwrap_or_else(|| NONE.to_string()),
                identities: d.identity_db.clone(),
                projects: match (&d.scm_db, schemas) {
                    (Some(_), Some(s)) => s.projects,
                    _ => NONE.to_string(),
                },
                collection: match &config.backend {
                    Some(backend) => d.collection(backend),
                    None => NONE.to_string(),
                },
            }
        })
        .collect()
}

pub fn list_sources(config: &Config) {
    println!(
        "{:<16} {:<20} {:<20} {:<20} {:<20} COLLECTION",
        "DASHBOARD", "SCM", "SCR", "IDENTITIES", "PROJECTS"
    );
    for row in dashboard_rows(config) {
        println!(
            "{:<16} {:<20} {:<20} {:<20} {:<20} {}",
            row.name, row.scm, row.scr, row.identities, row.projects, row.collection
        );
    }
}
