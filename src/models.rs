//! Core data models used throughout devdash.
//!
//! Query results arrive as [`Table`]s of dynamically typed [`Value`]s. Every
//! pipeline stage takes tables by value or reference and returns a new table;
//! nothing is updated in place once fetched. The last stage projects rows
//! into [`Document`]s, which are what reports and the bulk indexer consume.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{NaiveDateTime, TimeDelta};

/// A single cell of a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Duration(TimeDelta),
    /// Raw bytes from binary columns. Not representable in documents.
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value. Floats with no fractional part count, so a
    /// count that went through an aggregate still reads back as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Key used for joins and de-duplication. `Null` never matches anything.
    pub fn key(&self) -> Option<Key> {
        match self {
            Value::Text(s) => Some(Key::Text(s.clone())),
            Value::Timestamp(t) => Some(Key::Text(t.to_string())),
            other => other.as_i64().map(Key::Int),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(_) => "duration",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<TimeDelta> for Value {
    fn from(v: TimeDelta) -> Self {
        Value::Duration(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Hashable form of a join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A named result set: ordered columns and rows of equal width.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of one table row, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    /// Value of `column`, or `Null` when the table has no such column.
    pub fn get(&self, column: &str) -> &'a Value {
        const NULL: &Value = &Value::Null;
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
            .unwrap_or(NULL)
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

impl Table {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows(name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut table = Self::new(name, columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "{}: row has {} values, expected {}",
                self.name,
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn require_column(&self, column: &str) -> Result<usize> {
        match self.column_index(column) {
            Some(i) => Ok(i),
            None => bail!("{}: missing column '{}'", self.name, column),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |values| Record {
            columns: &self.columns,
            values,
        })
    }

    /// Collapse rows sharing the same value in `column`, keeping the first.
    /// Rows with a null key are kept as they are.
    pub fn distinct_on(self, column: &str) -> Result<Table> {
        let idx = self.require_column(column)?;
        let before = self.rows.len();
        let mut seen = HashSet::new();
        let rows: Vec<Vec<Value>> = self
            .rows
            .into_iter()
            .filter(|row| match row[idx].key() {
                Some(key) => seen.insert(key),
                None => true,
            })
            .collect();
        if rows.len() < before {
            tracing::debug!(
                table = %self.name,
                column,
                collapsed = before - rows.len(),
                "collapsed duplicate rows"
            );
        }
        Ok(Table { rows, ..self })
    }

    /// Replace nulls in `column` with `value`.
    pub fn fill_null(mut self, column: &str, value: Value) -> Result<Table> {
        let idx = self.require_column(column)?;
        for row in &mut self.rows {
            if row[idx].is_null() {
                row[idx] = value.clone();
            }
        }
        Ok(self)
    }

    /// Append (or overwrite) `column`, computing each cell from its row.
    pub fn derive<F>(mut self, column: &str, f: F) -> Result<Table>
    where
        F: Fn(Record<'_>) -> Result<Value>,
    {
        let values = self.records().map(f).collect::<Result<Vec<_>>>()?;
        match self.column_index(column) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(self)
    }

    /// Add a column holding the same value on every row.
    pub fn with_constant(self, column: &str, value: Value) -> Result<Table> {
        self.derive(column, |_| Ok(value.clone()))
    }

    /// Keep only `columns`, in the given order.
    pub fn select(&self, columns: &[&str]) -> Result<Table> {
        let indices = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table {
            name: self.name.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    pub fn rename(mut self, renames: &[(&str, &str)]) -> Result<Table> {
        for (from, to) in renames {
            let idx = self.require_column(from)?;
            self.columns[idx] = to.to_string();
        }
        Ok(self)
    }

    pub fn retain<F>(mut self, f: F) -> Table
    where
        F: Fn(Record<'_>) -> bool,
    {
        let columns = &self.columns;
        self.rows.retain(|values| f(Record { columns, values }));
        self
    }

    pub fn with_name(mut self, name: &str) -> Table {
        self.name = name.to_string();
        self
    }

    pub(crate) fn from_parts(name: String, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Table {
        Table {
            name,
            columns,
            rows,
        }
    }
}

/// Kinds of documents written to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocType {
    Repo,
    Commit,
    Review,
    Event,
}

impl DocType {
    pub const ALL: [DocType; 4] = [DocType::Repo, DocType::Commit, DocType::Review, DocType::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Repo => "repo",
            DocType::Commit => "commit",
            DocType::Review => "review",
            DocType::Event => "event",
        }
    }

    /// Field holding the external id used for upserts.
    pub fn id_field(&self) -> &'static str {
        match self {
            DocType::Repo => "repo_id",
            DocType::Commit | DocType::Review | DocType::Event => "id",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "repo" => Ok(DocType::Repo),
            "commit" => Ok(DocType::Commit),
            "review" => Ok(DocType::Review),
            "event" => Ok(DocType::Event),
            other => bail!(
                "Unknown document type: '{}'. Must be repo, commit, review, or event.",
                other
            ),
        }
    }
}

/// A flat record ready for a report or the backend. Field order is the
/// order of the projection that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_type: DocType,
    pub fields: Vec<(String, Value)>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, v)| v)
    }

    /// External id rendered as text, if the id field holds a usable key.
    pub fn external_id(&self) -> Option<String> {
        self.get(self.doc_type.id_field())
            .and_then(Value::key)
            .map(|key| key.to_string())
    }
}

/// A well-known (id, name) pair substituted when a dimension lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub id: i64,
    pub name: &'static str,
}

impl Sentinel {
    pub fn id_value(&self) -> Value {
        Value::Int(self.id)
    }

    pub fn name_value(&self) -> Value {
        Value::Text(self.name.to_string())
    }
}

pub const UNKNOWN_ORGANIZATION: Sentinel = Sentinel {
    id: 0,
    name: "Unknown",
};

/// Commit points at a repository the source does not list.
pub const UNKNOWN_REPOSITORY: Sentinel = Sentinel {
    id: 0,
    name: "Unknown",
};

/// Repository exists but no project lists it.
pub const UNCLASSIFIED_PROJECT: Sentinel = Sentinel {
    id: 0,
    name: "Unclassified",
};

/// The source has no project tables at all.
pub const NO_PROJECT: Sentinel = Sentinel {
    id: 0,
    name: "No project",
};

/// Output of one pipeline over one source: documents for the backend and
/// tables for the local report, each named after its report file.
#[derive(Debug, Default)]
pub struct Analysis {
    pub documents: Vec<Document>,
    pub reports: Vec<Table>,
}

impl Analysis {
    pub fn extend(&mut self, other: Analysis) {
        self.documents.extend(other.documents);
        self.reports.extend(other.reports);
    }

    pub fn count(&self, doc_type: DocType) -> usize {
        self.documents.iter().filter(|d| d.doc_type == doc_type).count()
    }
}
