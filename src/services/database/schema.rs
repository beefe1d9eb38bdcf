use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sqlx::Row;

use super::backend::SqlBackend;
use super::manager::{DbPool, SqlDatabase};
use super::query::{fetch_pg_rows, fetch_sqlite_rows};
use super::types::{CellValue, ColumnDetail};

/// Rows sampled per table when describing it to the model
const SAMPLE_ROWS_IN_TABLE_INFO: usize = 3;

impl SqlDatabase {
    pub async fn get_tables(&self) -> Result<Vec<String>> {
        let tables = match &self.pool {
            DbPool::Sqlite(pool) => {
                let query = r#"
                    SELECT name
                    FROM sqlite_master
                    WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
                    ORDER BY name
                "#;
                sqlx::query(query)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| row.get::<String, _>("name"))
                    .collect()
            }
            DbPool::Postgres(pool) => {
                let query = r#"
                    SELECT table_name::text AS table_name
                    FROM information_schema.tables
                    WHERE table_schema = current_schema()
                    ORDER BY table_name
                "#;
                sqlx::query(query)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| row.get::<String, _>("table_name"))
                    .collect()
            }
        };

        Ok(tables)
    }

    pub async fn get_table_columns(&self, table_name: &str) -> Result<Vec<ColumnDetail>> {
        match &self.pool {
            DbPool::Sqlite(pool) => {
                let query = format!("PRAGMA table_info({})", quote_identifier(table_name));
                let rows = sqlx::query(&query).fetch_all(pool).await?;

                Ok(rows
                    .into_iter()
                    .map(|row| ColumnDetail {
                        column_name: row.get("name"),
                        data_type: row.get("type"),
                        is_nullable: row.get::<i64, _>("notnull") == 0,
                        column_default: row.get("dflt_value"),
                        is_primary_key: row.get::<i64, _>("pk") > 0,
                    })
                    .collect())
            }
            DbPool::Postgres(pool) => {
                let query = r#"
                    SELECT
                        c.column_name::text AS column_name,
                        c.data_type::text AS data_type,
                        c.is_nullable::text AS is_nullable,
                        c.column_default::text AS column_default,
                        EXISTS (
                            SELECT 1
                            FROM information_schema.table_constraints tc
                            JOIN information_schema.key_column_usage kcu
                                ON tc.constraint_name = kcu.constraint_name
                                AND tc.table_schema = kcu.table_schema
                            WHERE tc.constraint_type = 'PRIMARY KEY'
                                AND tc.table_name = c.table_name
                                AND tc.table_schema = c.table_schema
                                AND kcu.column_name = c.column_name
                        ) AS is_primary_key
                    FROM information_schema.columns c
                    WHERE c.table_name = $1 AND c.table_schema = current_schema()
                    ORDER BY c.ordinal_position
                "#;

                let rows = sqlx::query(query).bind(table_name).fetch_all(pool).await?;

                Ok(rows
                    .into_iter()
                    .map(|row| ColumnDetail {
                        column_name: row.get("column_name"),
                        data_type: row.get::<String, _>("data_type").to_uppercase(),
                        is_nullable: row.get::<String, _>("is_nullable") == "YES",
                        column_default: row.get("column_default"),
                        is_primary_key: row.get("is_primary_key"),
                    })
                    .collect())
            }
        }
    }

    async fn create_table_statement(&self, table_name: &str, columns: &[ColumnDetail]) -> Result<String> {
        if let DbPool::Sqlite(pool) = &self.pool {
            let sql: Option<String> =
                sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE name = ?1")
                    .bind(table_name)
                    .fetch_optional(pool)
                    .await?
                    .flatten();
            if let Some(sql) = sql {
                return Ok(sql);
            }
        }

        Ok(build_create_table(table_name, columns))
    }

    async fn sample_rows(&self, table_name: &str) -> Result<Vec<Vec<CellValue>>> {
        let query = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(table_name),
            SAMPLE_ROWS_IN_TABLE_INFO
        );
        match &self.pool {
            DbPool::Sqlite(pool) => fetch_sqlite_rows(&query, pool).await,
            DbPool::Postgres(pool) => fetch_pg_rows(&query, pool).await,
        }
    }

    async fn describe_table(&self, table_name: &str) -> Result<String> {
        let columns = self.get_table_columns(table_name).await?;
        let create = self.create_table_statement(table_name, &columns).await?;

        let sample = match self.sample_rows(table_name).await {
            Ok(rows) => format_sample(&columns, &rows),
            Err(e) => {
                tracing::warn!("Could not sample rows from {}: {}", table_name, e);
                String::new()
            }
        };

        Ok(format!(
            "\n{}\n\n/*\n{} rows from {} table:\n{}\n*/",
            create.trim(),
            SAMPLE_ROWS_IN_TABLE_INFO,
            table_name,
            sample
        ))
    }
}

#[async_trait]
impl SqlBackend for SqlDatabase {
    fn dialect(&self) -> &str {
        self.dialect.name()
    }

    async fn usable_table_names(&self) -> Result<Vec<String>> {
        self.get_tables().await
    }

    async fn table_info(&self, tables: Option<&[String]>) -> Result<String> {
        let usable = self.get_tables().await?;

        let selected: Vec<String> = match tables {
            Some(requested) => {
                if let Some(missing) = requested.iter().find(|t| !usable.contains(*t)) {
                    return Err(anyhow!("table_names {{{}}} not found in database", missing));
                }
                requested.to_vec()
            }
            None => usable,
        };

        let mut descriptions = Vec::with_capacity(selected.len());
        for table in &selected {
            descriptions.push(self.describe_table(table).await?);
        }

        Ok(descriptions.join("\n\n"))
    }

    async fn execute(&self, sql: &str) -> Result<String> {
        self.run(sql).await
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

/// `CREATE TABLE` text for backends that do not keep the original DDL
fn build_create_table(table_name: &str, columns: &[ColumnDetail]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|col| {
            let mut line = format!("\t{} {}", quote_identifier(&col.column_name), col.data_type);
            if let Some(default) = &col.column_default {
                line.push_str(&format!(" DEFAULT {}", default));
            }
            if !col.is_nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    let primary_keys: Vec<String> = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| quote_identifier(&c.column_name))
        .collect();
    if !primary_keys.is_empty() {
        lines.push(format!("\tPRIMARY KEY ({})", primary_keys.join(", ")));
    }

    format!("CREATE TABLE {} (\n{}\n)", table_name, lines.join(", \n"))
}

fn format_sample(columns: &[ColumnDetail], rows: &[Vec<CellValue>]) -> String {
    let header = columns
        .iter()
        .map(|c| c.column_name.as_str())
        .collect::<Vec<_>>()
        .join("\t");

    let body = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(CellValue::to_plain)
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect::<Vec<_>>();

    if body.is_empty() {
        header
    } else {
        format!("{}\n{}", header, body.join("\n"))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
