//! Parameterized query execution for sql-kind tools.
//!
//! Callers pass SQL with positional `?` placeholders and JSON parameters; rows come
//! back as JSON objects keyed by column name. Statement vetting (allow-lists, the
//! read-only guard) is the caller's job.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Column, Row, Sqlite, TypeInfo, ValueRef};

use crate::repositories::RepositoryError;
use crate::DbPool;

pub type JsonRow = Map<String, Value>;

#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<JsonRow>, RepositoryError>;

    /// Runs a statement that returns no rows; yields the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, RepositoryError>;
}

pub struct SqlQueryRunner {
    pool: DbPool,
}

impl SqlQueryRunner {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryRunner for SqlQueryRunner {
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<JsonRow>, RepositoryError> {
        let rows = bind_all(sqlx::query(sql), params).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, RepositoryError> {
        let result = bind_all(sqlx::query(sql), params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(value) => query.bind(*value),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => query.bind(integer),
                None => query.bind(number.as_f64()),
            },
            Value::String(text) => query.bind(text.clone()),
            nested => query.bind(nested.to_string()),
        };
    }
    query
}

fn row_to_json(row: &SqliteRow) -> Result<JsonRow, RepositoryError> {
    let mut object = Map::new();

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" | "INT8" | "BIGINT" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
                    .try_get::<f64, _>(index)
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::String(format!("<{} bytes>", row.try_get::<Vec<u8>, _>(index)?.len())),
                _ => Value::String(row.try_get::<String, _>(index)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }

    Ok(object)
}
