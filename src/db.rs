//! MySQL connection and the [`MySqlSource`] implementation of
//! [`ActivitySource`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::models::{Table, Value};
use crate::query::{ActivitySource, Capability, Param, Query, Schemas};

pub async fn connect(config: &DatabaseConfig, port: u16) -> Result<MySqlPool> {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(port)
        .username(&config.user);
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }

    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to MySQL at {}:{}", config.host, port))?;

    Ok(pool)
}

/// Source reading one activity schema (plus its identity and project
/// schemas) over a shared pool.
pub struct MySqlSource {
    pool: MySqlPool,
    schemas: Schemas,
    label: String,
}

impl MySqlSource {
    pub fn new(pool: MySqlPool, schemas: Schemas) -> Self {
        let label = format!("mysql:{}", schemas.main);
        Self {
            pool,
            schemas,
            label,
        }
    }
}

#[async_trait]
impl ActivitySource for MySqlSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch(&self, query: &Query) -> Result<Table> {
        let sql = self.schemas.render(&query.sql);
        debug!(query = query.name, %sql, "querying");

        let mut q = sqlx::query(&sql);
        for param in &query.params {
            q = match param {
                Param::Text(s) => q.bind(s.clone()),
                Param::Timestamp(t) => q.bind(*t),
            };
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("query '{}' failed on {}", query.name, self.label))?;

        let mut table = Table::new(query.name, query.columns);
        for row in &rows {
            let values = query
                .columns
                .iter()
                .map(|column| decode_cell(row, column))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("query '{}'", query.name))?;
            table.push_row(values)?;
        }
        info!(query = query.name, rows = table.len(), "fetched");
        Ok(table)
    }

    async fn probe(&self, capability: Capability) -> Result<bool> {
        match capability {
            Capability::ProjectGrouping => {
                let found: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM information_schema.tables \
                     WHERE table_schema = ? AND table_name IN ('projects', 'project_repositories')",
                )
                .bind(&self.schemas.projects)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("probing project tables in '{}'", self.schemas.projects))?;
                Ok(found == 2)
            }
            Capability::ProjectDataSource => {
                let found: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM information_schema.columns \
                     WHERE table_schema = ? AND table_name = 'project_repositories' \
                     AND column_name = 'data_source'",
                )
                .bind(&self.schemas.projects)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("probing project_repositories columns in '{}'", self.schemas.projects))?;
                Ok(found > 0)
            }
        }
    }
}

/// Decode one cell by its column's reported SQL type.
fn decode_cell(row: &MySqlRow, column: &str) -> Result<Value> {
    let raw = row.try_get_raw(column)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Int(i64::from(row.try_get::<bool, _>(column)?)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get::<i64, _>(column)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => {
            let v = row.try_get::<u64, _>(column)?;
            Value::Int(i64::try_from(v).with_context(|| format!("{} overflows i64", column))?)
        }
        "FLOAT" => Value::Float(f64::from(row.try_get::<f32, _>(column)?)),
        "DOUBLE" => Value::Float(row.try_get::<f64, _>(column)?),
        "DATETIME" | "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(column)?),
        "DATE" => {
            let date = row.try_get::<NaiveDate, _>(column)?;
            Value::Timestamp(date.and_time(chrono::NaiveTime::MIN))
        }
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
            Value::Text(row.try_get::<String, _>(column)?)
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            Value::Bytes(row.try_get::<Vec<u8>, _>(column)?)
        }
        other => bail!("column '{}' has unsupported type {}", column, other),
    };
    Ok(value)
}
