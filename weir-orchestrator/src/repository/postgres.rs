//! Postgres Store
//!
//! One table per kind, see `db::run_migrations`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{Kind, Record, Result, Store, StoreError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<Record> {
    Ok(Record {
        namespace: row.try_get("namespace")?,
        name: row.try_get("name")?,
        resource_version: row.try_get("resource_version")?,
        body: row.try_get("body")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Record> {
        let row = sqlx::query(&format!(
            r#"
            SELECT namespace, name, resource_version, body
            FROM {}
            WHERE namespace = $1 AND name = $2
            "#,
            kind.table()
        ))
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::not_found(kind, namespace, name)),
        }
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT namespace, name, resource_version, body
            FROM {}
            WHERE $1::VARCHAR IS NULL OR namespace = $1
            ORDER BY namespace, created_at ASC
            "#,
            kind.table()
        ))
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn create(&self, kind: Kind, record: Record) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (namespace, name, resource_version, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace, name) DO NOTHING
            "#,
            kind.table()
        ))
        .bind(&record.namespace)
        .bind(&record.name)
        .bind(record.resource_version)
        .bind(&record.body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::already_exists(kind, &record.namespace, &record.name));
        }

        Ok(())
    }

    async fn update(&self, kind: Kind, record: Record, expected_version: i64) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET resource_version = $3, body = $4, updated_at = NOW()
            WHERE namespace = $1 AND name = $2 AND resource_version = $5
            "#,
            kind.table()
        ))
        .bind(&record.namespace)
        .bind(&record.name)
        .bind(record.resource_version)
        .bind(&record.body)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a stale version from a missing row
            self.get(kind, &record.namespace, &record.name).await?;
            return Err(StoreError::conflict(kind, &record.namespace, &record.name));
        }

        Ok(())
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE namespace = $1 AND name = $2",
            kind.table()
        ))
        .bind(namespace)
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(kind, namespace, name));
        }

        Ok(())
    }
}
