//! Local JSON reports.
//!
//! Each report table of a dashboard is written to
//! `<dir>/<dashboard-slug>/<table-name>.json` as
//! `{"names": [...], "values": [[...], ...]}`, with dates encoded in the
//! configured mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::models::Table;
use crate::serialize::{table_to_json, DateMode};

/// Directory-safe form of a dashboard name: lowercase ASCII alphanumerics,
/// everything else collapsed into single dashes.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Write `tables` under `dir` and return the files written.
pub fn write_reports(dir: &Path, dashboard: &str, tables: &[Table], mode: DateMode) -> Result<Vec<PathBuf>> {
    let target = dir.join(slug(dashboard));
    std::fs::create_dir_all(&target)
        .with_context(|| format!("creating report directory {}", target.display()))?;

    let mut written = Vec::with_capacity(tables.len());
    for table in tables {
        let json = table_to_json(table, mode).with_context(|| format!("encoding report {}", table.name()))?;
        let path = target.join(format!("{}.json", table.name()));
        std::fs::write(&path, serde_json::to_string(&json)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(dashboard, path = %path.display(), rows = table.len(), "wrote report");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use chrono::NaiveDate;

    #[test]
    fn test_slug() {
        assert_eq!(slug("OpenStack"), "openstack");
        assert_eq!(slug("  Acme Corp / Core!"), "acme-corp-core");
        assert_eq!(slug("a__b"), "a-b");
    }

    #[test]
    fn test_write_reports_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2015, 9, 18)
            .unwrap()
            .and_hms_opt(23, 56, 4)
            .unwrap();
        let table = Table::from_rows(
            "scm-commits",
            &["id", "date"],
            vec![vec![Value::Int(1), Value::Timestamp(date)]],
        )
        .unwrap();

        let written = write_reports(dir.path(), "Acme Corp", &[table], DateMode::Epoch).unwrap();
        assert_eq!(written, vec![dir.path().join("acme-corp").join("scm-commits.json")]);

        let text = std::fs::read_to_string(&written[0]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["names"], serde_json::json!(["id", "date"]));
        assert_eq!(json["values"][0][1], 1442620564);
    }
}
