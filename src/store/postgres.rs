//! PostgreSQL document store. Each collection is a `(id, payload JSONB)` table in the schema named by [`Settings::schema`].

use super::{document_id, Document, DocumentStore, Filter, FindQuery, IndexSpec};
use crate::error::StoreError;
use crate::settings::Settings;
use crate::sql::{self, bind_params, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{ConnectOptions, PgPool, Row};
use std::str::FromStr;

pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
        }
    }

    /// Connect a pool from settings and create the collection schema if missing.
    pub async fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;
        sqlx::query(&sql::create_schema(&settings.schema))
            .execute(&pool)
            .await?;
        Ok(Self::new(pool, settings.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, collection: &str) -> String {
        sql::qualified_table(&self.schema, collection)
    }

    async fn fetch_documents(&self, collection: &str, q: QueryBuf) -> Result<Vec<Document>, StoreError> {
        tracing::debug!(sql = %q.sql, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        rows.iter().map(payload_of).collect()
    }

    async fn fetch_document(&self, collection: &str, q: QueryBuf) -> Result<Option<Document>, StoreError> {
        tracing::debug!(sql = %q.sql, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        row.as_ref().map(payload_of).transpose()
    }
}

fn payload_of(row: &sqlx::postgres::PgRow) -> Result<Document, StoreError> {
    match row.try_get::<Value, _>("payload")? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "payload is not an object: {}",
            other
        ))),
    }
}

/// SQLSTATE 23505 becomes a unique violation carrying the constraint name.
fn map_db_error(collection: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::UniqueViolation {
                collection: collection.to_string(),
                index: db.constraint().unwrap_or("id").to_string(),
            };
        }
    }
    StoreError::Db(e)
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let ddl = sql::create_table(&self.table(collection));
        tracing::debug!(sql = %ddl, "ddl");
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let ddl = sql::create_index(&self.table(collection), index);
        tracing::debug!(sql = %ddl, "ddl");
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        Ok(())
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(sql::LIST_INDEXES)
            .bind(&self.schema)
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let ddl = sql::drop_index(&self.schema, name);
        tracing::debug!(sql = %ddl, %collection, "ddl");
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError> {
        let id = document_id(&doc)
            .ok_or_else(|| StoreError::InvalidDocument("document has no string id".into()))?
            .to_string();
        let q = sql::insert_document(&self.table(collection), &id, Value::Object(doc));
        self.fetch_document(collection, q)
            .await?
            .ok_or_else(|| StoreError::InvalidDocument("insert returned no row".into()))
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        self.fetch_documents(collection, sql::select_documents(&self.table(collection), query))
            .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let q = sql::count_documents(&self.table(collection), filter);
        tracing::debug!(sql = %q.sql, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(collection, e))?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<Option<Document>, StoreError> {
        let q = sql::replace_document(&self.table(collection), id, Value::Object(doc));
        self.fetch_document(collection, q).await
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.fetch_document(collection, sql::delete_document(&self.table(collection), id))
            .await
    }
}

/// Ensures the database in `database_url` exists. Connects to the `postgres` database and runs CREATE DATABASE if missing.
/// No-op if the URL's database name is empty or "postgres".
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::InvalidUrl("no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}
