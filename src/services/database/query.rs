use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use super::manager::{DbPool, SqlDatabase};
use super::types::{CellValue, format_rows};

impl SqlDatabase {
    /// Run `sql` and return the decoded rows. Statements that are not
    /// reads return no rows.
    pub async fn fetch_rows(&self, sql: &str) -> Result<Vec<Vec<CellValue>>> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(anyhow::anyhow!("Empty query"));
        }

        let start_time = std::time::Instant::now();
        let rows = match &self.pool {
            DbPool::Postgres(pool) => {
                if is_select_query(sql) {
                    fetch_pg_rows(sql, pool).await?
                } else {
                    let result = sqlx::query(sql).execute(pool).await?;
                    tracing::info!("Statement affected {} rows", result.rows_affected());
                    Vec::new()
                }
            }
            DbPool::Sqlite(pool) => {
                if is_select_query(sql) {
                    fetch_sqlite_rows(sql, pool).await?
                } else {
                    let result = sqlx::query(sql).execute(pool).await?;
                    tracing::info!("Statement affected {} rows", result.rows_affected());
                    Vec::new()
                }
            }
        };

        tracing::debug!(
            rows = rows.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "query finished"
        );
        Ok(rows)
    }

    /// Run `sql` and render the rows as a list of tuples
    pub async fn run(&self, sql: &str) -> Result<String> {
        let rows = self.fetch_rows(sql).await?;
        Ok(format_rows(&rows))
    }
}

// ============================================================================
// Free functions for query processing
// ============================================================================

/// Whether `sql` is a single plain read (`SELECT`, `WITH`, `VALUES`,
/// `PRAGMA`, `EXPLAIN`, `SHOW`). Anything else may change the data store,
/// including a read followed by further statements and a `WITH` or
/// `EXPLAIN` wrapping a write.
pub fn is_select_query(sql: &str) -> bool {
    let masked = mask_literals_and_comments(sql).to_lowercase();

    let mut statements = masked.split(';').filter(|s| !s.trim().is_empty());
    let Some(first) = statements.next() else {
        return false;
    };
    if statements.next().is_some() {
        return false;
    }

    let mut words = first
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    let leading = words.next().unwrap_or_default();
    if !READ_KEYWORDS.contains(&leading) {
        return false;
    }
    if leading == "with" || leading == "explain" {
        return !words.any(|w| WRITE_KEYWORDS.contains(&w));
    }
    true
}

const READ_KEYWORDS: [&str; 6] = ["select", "with", "values", "pragma", "explain", "show"];

const WRITE_KEYWORDS: [&str; 9] = [
    "insert", "update", "delete", "merge", "drop", "alter", "create", "truncate", "upsert",
];

/// `sql` with quoted text and comments replaced by spaces, so `;` and
/// keywords inside them are not seen as code
fn mask_literals_and_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(' ');
                while let Some(next) = chars.next() {
                    if next == c {
                        // doubled quote is an escaped quote
                        if chars.peek() == Some(&c) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

pub(crate) async fn fetch_sqlite_rows(sql: &str, pool: &SqlitePool) -> Result<Vec<Vec<CellValue>>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows.iter().map(convert_sqlite_row).collect())
}

pub(crate) async fn fetch_pg_rows(sql: &str, pool: &PgPool) -> Result<Vec<Vec<CellValue>>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows.iter().map(convert_pg_row).collect())
}

fn convert_sqlite_row(row: &SqliteRow) -> Vec<CellValue> {
    (0..row.columns().len())
        .map(|index| extract_sqlite_cell(row, index))
        .collect()
}

fn extract_sqlite_cell(row: &SqliteRow, index: usize) -> CellValue {
    let type_name = match row.try_get_raw(index) {
        Ok(raw_value) if raw_value.is_null() => return CellValue::Null,
        Ok(raw_value) => raw_value.type_info().name().to_string(),
        Err(_) => return CellValue::Null,
    };

    // SQLite reports the storage class of the value itself
    let decoded = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(CellValue::Int).ok(),
        "REAL" => row.try_get::<f64, _>(index).map(CellValue::Float).ok(),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(CellValue::Bool).ok(),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(CellValue::Bytes).ok(),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get::<String, _>(index).map(CellValue::Text).ok())
        .or_else(|| row.try_get_unchecked::<i64, _>(index).map(CellValue::Int).ok())
        .or_else(|| row.try_get_unchecked::<f64, _>(index).map(CellValue::Float).ok())
        .unwrap_or(CellValue::Null)
}

fn convert_pg_row(row: &PgRow) -> Vec<CellValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| extract_pg_cell(row, column.type_info().name(), index))
        .collect()
}

fn extract_pg_cell(row: &PgRow, type_name: &str, index: usize) -> CellValue {
    match row.try_get_raw(index) {
        Ok(raw_value) if raw_value.is_null() => return CellValue::Null,
        Ok(_) => {}
        Err(_) => return CellValue::Null,
    }

    let decoded = match type_name {
        "BOOL" => row.try_get::<bool, _>(index).map(CellValue::Bool).ok(),
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| CellValue::Int(v as i64))
            .ok(),
        "INT4" => row
            .try_get::<i32, _>(index)
            .map(|v| CellValue::Int(v as i64))
            .ok(),
        "INT8" => row.try_get::<i64, _>(index).map(CellValue::Int).ok(),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| CellValue::Float(v as f64))
            .ok(),
        "FLOAT8" => row.try_get::<f64, _>(index).map(CellValue::Float).ok(),
        "NUMERIC" => row.try_get::<Decimal, _>(index).map(CellValue::Decimal).ok(),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(CellValue::Bytes).ok(),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|v| CellValue::Text(v.to_string()))
            .ok(),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| CellValue::Text(v.to_string()))
            .ok(),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map(|v| CellValue::Text(v.to_string()))
            .ok(),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|v| CellValue::Text(v.to_string()))
            .ok(),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| CellValue::Text(v.to_string()))
            .ok(),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get::<String, _>(index).map(CellValue::Text).ok())
        .unwrap_or_else(|| CellValue::Text(format!("<{}>", type_name)))
}
