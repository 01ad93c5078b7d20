//! Typed bind parameters for document queries.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A value bound to a PostgreSQL query: text, a `text[]` JSON path, or JSONB.
#[derive(Clone, Debug, PartialEq)]
pub enum PgParam {
    Text(String),
    Path(Vec<String>),
    Json(Value),
}

/// Bind every parameter in order.
pub fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[PgParam],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p {
            PgParam::Text(s) => query.bind(s.clone()),
            PgParam::Path(segments) => query.bind(segments.clone()),
            PgParam::Json(v) => query.bind(v.clone()),
        };
    }
    query
}
