//! Example consumer: defines a model through a migration, compiles the catalog and serves records.
//!
//! Run from repo root: `cargo run -p example-consumer`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use protean_orm::migration::UnitResult;
use protean_orm::{
    ensure_database_exists, AppError, Catalog, FieldRecord, FieldType, Filter, FindOptions, MigrationContext,
    MigrationUnit, Migrator, ModelRecord, ModelRegistry, PgStore, RunOptions, Settings, StaticModule,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

type AppState = Arc<ModelRegistry>;

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<Value>,
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<u64>,
    skip: Option<u64>,
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn describe(State(registry): State<AppState>, Path(ns): Path<String>) -> Result<Json<Value>, AppError> {
    Ok(Json(registry.model(&ns)?.describe()))
}

async fn list(
    State(registry): State<AppState>,
    Path(ns): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Envelope<Vec<protean_orm::Document>>>, AppError> {
    let mut opts = FindOptions::new();
    if let Some(limit) = params.limit {
        opts = opts.limit(limit);
    }
    if let Some(skip) = params.skip {
        opts = opts.skip(skip);
    }
    let page = registry.model(&ns)?.find(opts).await?;
    let count = page.records.len();
    Ok(Json(Envelope {
        data: page.records,
        meta: Some(json!({"count": count, "total": page.total})),
    }))
}

async fn fetch(
    State(registry): State<AppState>,
    Path((ns, id)): Path<(String, String)>,
) -> Result<Json<Envelope<protean_orm::Document>>, AppError> {
    let record = registry
        .model(&ns)?
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", ns, id)))?;
    Ok(Json(Envelope { data: record, meta: None }))
}

async fn create(
    State(registry): State<AppState>,
    Path(ns): Path<String>,
    Json(body): Json<protean_orm::Document>,
) -> Result<(StatusCode, Json<Envelope<protean_orm::Document>>), AppError> {
    let record = registry.model(&ns)?.create(body).await?;
    Ok((StatusCode::CREATED, Json(Envelope { data: record, meta: None })))
}

async fn compile(State(registry): State<AppState>) -> Result<Json<Envelope<Vec<String>>>, AppError> {
    let compiled = registry.compile(None).await?;
    Ok(Json(Envelope {
        data: compiled.iter().map(|h| h.namespace().to_string()).collect(),
        meta: None,
    }))
}

/// Defines `demo.Note` unless it already exists.
async fn seed_notes(ctx: MigrationContext) -> UnitResult {
    let existing = ctx
        .registry
        .model("protean.orm.model")?
        .find_one(Filter::new().eq("namespace", "demo.Note"))
        .await?;
    if existing.is_some() {
        tracing::info!("demo.Note already defined");
        return Ok(());
    }
    let catalog = Catalog::new(ctx.registry.clone());
    let note = catalog.create_model(ModelRecord::new("demo", "", "Note")).await?.record;
    catalog
        .create_field(FieldRecord::new(&note.id, "title", FieldType::String).required())
        .await?;
    catalog
        .create_field(FieldRecord::new(&note.id, "body", FieldType::String))
        .await?;
    ctx.registry.compile(Some(&[note.id])).await?;
    Ok(())
}

fn router(registry: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/compile", post(compile))
        .route("/models/:namespace/schema", get(describe))
        .route("/models/:namespace/records", get(list).post(create))
        .route("/models/:namespace/records/:id", get(fetch))
        .with_state(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("protean_orm=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env();
    ensure_database_exists(&settings.database_url).await?;
    let store = PgStore::connect(&settings).await?;
    let registry = Arc::new(ModelRegistry::new(Arc::new(store)));
    registry.bootstrap().await?;
    registry.compile(None).await?;

    let migrator = Migrator::new(registry.clone())
        .with_module(
            StaticModule::new("demo")
                .with(MigrationUnit::new("demo", "setup", "notes").describe("Note model").forwards(seed_notes)),
        )
        .with_logging(true);
    let report = migrator.run(RunOptions::forwards(&["demo"])).await?;
    for (unit, err) in &report.errors {
        tracing::error!(%unit, error = %err, "migration failed");
    }

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}
