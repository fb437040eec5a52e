//! Denormalization of result sets into flat documents.
//!
//! A pipeline declares its joins as a list of [`Join`] steps and folds them
//! over a primary table with [`merge`]. Two kinds of step exist:
//!
//! - **left**: dimension data (repository, project, organization). Every
//!   primary row survives; a missing match, or a null in a matched row,
//!   takes the step's sentinel fill.
//! - **inner**: associations an event cannot exist without (an event and
//!   its parent review). Unmatched rows are dropped and counted.
//!
//! The right side of a step is a dimension keyed by its join column: if it
//! holds the same key twice, the first row is used.
//!
//! [`project`] then maps the merged table through a static, ordered
//! [`Projection`] into [`Document`]s, drops rows missing a required field,
//! and stamps the dashboard label on everything it emits.

use std::collections::HashMap;

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::models::{DocType, Document, Key, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

/// One declared join step.
#[derive(Debug, Clone)]
pub struct Join<'a> {
    right: &'a Table,
    left_on: &'a str,
    right_on: &'a str,
    columns: &'a [&'a str],
    kind: JoinKind,
    fills: Vec<(&'a str, Value)>,
}

impl<'a> Join<'a> {
    /// Left outer join bringing `columns` from `right` where
    /// `left.left_on == right.right_on`.
    pub fn left(right: &'a Table, left_on: &'a str, right_on: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            right,
            left_on,
            right_on,
            columns,
            kind: JoinKind::Left,
            fills: Vec::new(),
        }
    }

    pub fn inner(right: &'a Table, left_on: &'a str, right_on: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            kind: JoinKind::Inner,
            ..Self::left(right, left_on, right_on, columns)
        }
    }

    /// Value used for `column` when the right side has no match or a null.
    pub fn fill(mut self, column: &'a str, value: Value) -> Self {
        self.fills.push((column, value));
        self
    }

    fn fill_for(&self, column: &str) -> Value {
        self.fills
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    }
}

/// Apply one join step to `left`.
pub fn join(left: Table, step: &Join<'_>) -> Result<Table> {
    let left_idx = left.require_column(step.left_on)?;
    step.right.require_column(step.right_on)?;
    let right_cols = step
        .columns
        .iter()
        .map(|c| step.right.require_column(c))
        .collect::<Result<Vec<_>>>()?;
    for column in step.columns {
        if left.column_index(column).is_some() {
            bail!(
                "joining {} into {}: column '{}' exists on both sides",
                step.right.name(),
                left.name(),
                column
            );
        }
    }
    for (column, _) in &step.fills {
        if !step.columns.contains(column) {
            bail!("fill for '{}' names a column the join does not bring", column);
        }
    }

    let mut index: HashMap<Key, usize> = HashMap::with_capacity(step.right.len());
    let mut duplicates = 0usize;
    for (i, record) in step.right.records().enumerate() {
        if let Some(key) = record.get(step.right_on).key() {
            if index.contains_key(&key) {
                duplicates += 1;
            } else {
                index.insert(key, i);
            }
        }
    }
    if duplicates > 0 {
        debug!(table = %step.right.name(), duplicates, "duplicate join keys, first row used");
    }

    let fills: Vec<Value> = step.columns.iter().map(|c| step.fill_for(c)).collect();
    let name = left.name().to_string();
    let mut columns = left.columns().to_vec();
    columns.extend(step.columns.iter().map(|c| c.to_string()));

    let mut rows = Vec::with_capacity(left.len());
    let mut dropped = 0usize;
    for row in left.rows() {
        let matched = row[left_idx]
            .key()
            .and_then(|key| index.get(&key))
            .map(|&i| &step.right.rows()[i]);
        let mut out = row.clone();
        match (matched, step.kind) {
            (Some(right_row), _) => {
                for (&ci, fill) in right_cols.iter().zip(&fills) {
                    let value = &right_row[ci];
                    out.push(if value.is_null() { fill.clone() } else { value.clone() });
                }
            }
            (None, JoinKind::Left) => out.extend(fills.iter().cloned()),
            (None, JoinKind::Inner) => {
                dropped += 1;
                continue;
            }
        }
        rows.push(out);
    }
    if dropped > 0 {
        info!(
            table = %name,
            with = %step.right.name(),
            dropped,
            "dropped rows with no match"
        );
    }

    Ok(Table::from_parts(name, columns, rows))
}

/// Fold `steps` over `primary`, in order.
pub fn merge(primary: Table, steps: &[Join<'_>]) -> Result<Table> {
    steps.iter().try_fold(primary, |table, step| join(table, step))
}

/// Mapping of one source column to one document field.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub source: &'static str,
    pub target: &'static str,
    pub required: bool,
}

pub const fn field(name: &'static str) -> Field {
    Field {
        source: name,
        target: name,
        required: false,
    }
}

pub const fn renamed(source: &'static str, target: &'static str) -> Field {
    Field {
        source,
        target,
        required: false,
    }
}

/// A field whose null value disqualifies the whole row.
pub const fn required(name: &'static str) -> Field {
    Field {
        source: name,
        target: name,
        required: true,
    }
}

/// Ordered field list for one document type.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub doc_type: DocType,
    pub fields: &'static [Field],
}

pub const DASHBOARD_FIELD: &str = "dashboard";

/// Map `table` through `projection`, stamping `dashboard` on every
/// document. Columns not named by the projection are discarded.
pub fn project(table: &Table, projection: &Projection, dashboard: &str) -> Result<Vec<Document>> {
    let indices = projection
        .fields
        .iter()
        .map(|f| table.require_column(f.source))
        .collect::<Result<Vec<_>>>()?;

    let mut documents = Vec::with_capacity(table.len());
    let mut dropped = 0usize;
    for row in table.rows() {
        let missing = projection
            .fields
            .iter()
            .zip(&indices)
            .find(|(f, i)| f.required && row[**i].is_null());
        if let Some((f, _)) = missing {
            dropped += 1;
            debug!(
                doc_type = %projection.doc_type,
                field = f.target,
                "dropping row with missing required field"
            );
            continue;
        }

        let mut fields: Vec<(String, Value)> = projection
            .fields
            .iter()
            .zip(&indices)
            .map(|(f, &i)| (f.target.to_string(), row[i].clone()))
            .collect();
        fields.push((DASHBOARD_FIELD.to_string(), Value::from(dashboard)));
        documents.push(Document {
            doc_type: projection.doc_type,
            fields,
        });
    }
    if dropped > 0 {
        info!(
            doc_type = %projection.doc_type,
            dropped,
            "dropped incomplete rows"
        );
    }

    Ok(documents)
}

/// The projection as a report table named `name`: projected columns under
/// their document names, plus the dashboard column. Rows are not filtered.
pub fn report_table(table: &Table, projection: &Projection, name: &str, dashboard: &str) -> Result<Table> {
    let sources: Vec<&str> = projection.fields.iter().map(|f| f.source).collect();
    let renames: Vec<(&str, &str)> = projection
        .fields
        .iter()
        .filter(|f| f.source != f.target)
        .map(|f| (f.source, f.target))
        .collect();
    table
        .select(&sources)?
        .rename(&renames)?
        .with_constant(DASHBOARD_FIELD, Value::from(dashboard))
        .map(|t| t.with_name(name))
}
