//! Scalar encoding for reports and bulk bodies.
//!
//! Timestamps have two encodings: ISO-8601 text (no zone, microseconds only
//! when present) and integer seconds since the Unix epoch, reading the
//! stored wall-clock time as UTC. Durations are always whole seconds.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Number, Value as Json};
use thiserror::Error;

use crate::models::{Document, Table, Value};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Error, PartialEq)]
pub enum SerializationError {
    #[error("Unknown date mode: '{0}'. Must be iso or epoch.")]
    UnknownDateMode(String),
    #[error("cannot serialize {kind} value in field '{field}'")]
    Unsupported { field: String, kind: &'static str },
    #[error("cannot serialize non-finite number {value} in field '{field}'")]
    NonFinite { field: String, value: f64 },
}

/// How timestamps are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateMode {
    #[default]
    Iso,
    Epoch,
}

impl FromStr for DateMode {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iso" => Ok(DateMode::Iso),
            // "utime" is accepted for configs written for older tooling.
            "epoch" | "utime" => Ok(DateMode::Epoch),
            other => Err(SerializationError::UnknownDateMode(other.to_string())),
        }
    }
}

impl fmt::Display for DateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateMode::Iso => f.write_str("iso"),
            DateMode::Epoch => f.write_str("epoch"),
        }
    }
}

/// Encode one value. `field` only feeds error messages.
pub fn serialize_value(field: &str, value: &Value, mode: DateMode) -> Result<Json, SerializationError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Int(v) => Json::from(*v),
        Value::Float(v) => match Number::from_f64(*v) {
            Some(n) => Json::Number(n),
            None => {
                return Err(SerializationError::NonFinite {
                    field: field.to_string(),
                    value: *v,
                })
            }
        },
        Value::Text(s) => Json::String(s.clone()),
        Value::Timestamp(t) => match mode {
            DateMode::Iso => Json::String(t.format(ISO_FORMAT).to_string()),
            DateMode::Epoch => Json::from(t.and_utc().timestamp()),
        },
        Value::Duration(d) => Json::from(d.num_seconds()),
        Value::Bytes(_) => {
            return Err(SerializationError::Unsupported {
                field: field.to_string(),
                kind: value.kind(),
            })
        }
    })
}

/// Encode a document as a JSON object, keeping field order.
pub fn document_to_json(doc: &Document, mode: DateMode) -> Result<Json, SerializationError> {
    let mut map = Map::with_capacity(doc.fields.len());
    for (name, value) in &doc.fields {
        map.insert(name.clone(), serialize_value(name, value, mode)?);
    }
    Ok(Json::Object(map))
}

/// Encode a table in the report layout: `{"names": [...], "values": [[...]]}`.
pub fn table_to_json(table: &Table, mode: DateMode) -> Result<Json, SerializationError> {
    let names: Vec<Json> = table
        .columns()
        .iter()
        .map(|c| Json::String(c.clone()))
        .collect();
    let mut values = Vec::with_capacity(table.len());
    for row in table.rows() {
        let encoded = row
            .iter()
            .zip(table.columns())
            .map(|(value, column)| serialize_value(column, value, mode))
            .collect::<Result<Vec<_>, _>>()?;
        values.push(Json::Array(encoded));
    }
    let mut map = Map::new();
    map.insert("names".to_string(), Json::Array(names));
    map.insert("values".to_string(), Json::Array(values));
    Ok(Json::Object(map))
}
