//! Builds parameterized DDL and document queries over `(id, payload JSONB)` collection tables.

use super::params::PgParam;
use crate::store::{Condition, Filter, FindQuery, IndexSpec, SortOrder};
use serde_json::Value;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Single-quoted string literal.
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `payload -> 'a' ->> 'b'` text extraction for DDL, where parameters are not allowed.
fn text_path_expr(path: &str) -> String {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = String::from("payload");
    for (i, p) in parts.iter().enumerate() {
        let op = if i + 1 == parts.len() { "->>" } else { "->" };
        out.push_str(&format!(" {} {}", op, literal(p)));
    }
    out
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgParam>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgParam) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// `(payload #> $n::text[])` for a dotted path.
    fn path_expr(&mut self, path: &str) -> String {
        let n = self.push_param(PgParam::Path(path_segments(path)));
        format!("(payload #> ${}::text[])", n)
    }
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

pub fn create_table(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"#,
        table
    )
}

/// Expression index over the text value of each path. Partial indexes cover rows where every path is set.
pub fn create_index(table: &str, index: &IndexSpec) -> String {
    let exprs: Vec<String> = index
        .fields
        .iter()
        .map(|f| format!("({})", text_path_expr(f)))
        .collect();
    let unique = if index.unique { "UNIQUE " } else { "" };
    let mut sql = format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        unique,
        quoted(&index.name),
        table,
        exprs.join(", ")
    );
    if index.partial {
        let preds: Vec<String> = index
            .fields
            .iter()
            .map(|f| format!("({}) IS NOT NULL", text_path_expr(f)))
            .collect();
        sql.push_str(&format!(" WHERE {}", preds.join(" AND ")));
    }
    sql
}

pub fn drop_index(schema: &str, name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}.{}", quoted(schema), quoted(name))
}

/// Secondary (non primary key) indexes of one table. Binds schema then table name.
pub const LIST_INDEXES: &str = "SELECT i.relname::text AS name FROM pg_index x \
    JOIN pg_class i ON i.oid = x.indexrelid \
    JOIN pg_class t ON t.oid = x.indrelid \
    JOIN pg_namespace n ON n.oid = t.relnamespace \
    WHERE n.nspname = $1 AND t.relname = $2 AND NOT x.indisprimary \
    ORDER BY i.relname";

fn where_clause(q: &mut QueryBuf, filter: &Filter) -> String {
    let mut parts = Vec::new();
    for c in filter.conditions() {
        match c {
            Condition::Eq { path, value } if value.is_null() => {
                let p = q.path_expr(path);
                parts.push(format!("({} IS NULL OR {} = 'null'::jsonb)", p, p));
            }
            Condition::Eq { path, value } => {
                let p = q.path_expr(path);
                let n = q.push_param(PgParam::Json(value.clone()));
                parts.push(format!("{} = ${}::jsonb", p, n));
            }
            Condition::Ne { path, value } if value.is_null() => {
                let p = q.path_expr(path);
                parts.push(format!("({} IS NOT NULL AND {} <> 'null'::jsonb)", p, p));
            }
            Condition::Ne { path, value } => {
                let p = q.path_expr(path);
                let n = q.push_param(PgParam::Json(value.clone()));
                parts.push(format!("{} IS DISTINCT FROM ${}::jsonb", p, n));
            }
            Condition::In { values, .. } if values.is_empty() => parts.push("1 = 0".into()),
            Condition::In { path, values } => {
                let p = q.path_expr(path);
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| format!("${}::jsonb", q.push_param(PgParam::Json(v.clone()))))
                    .collect();
                parts.push(format!("{} IN ({})", p, placeholders.join(", ")));
            }
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT payload with filter, sort (insertion order when none), LIMIT/OFFSET.
pub fn select_documents(table: &str, query: &FindQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, &query.filter);
    let mut order: Vec<String> = Vec::new();
    for (path, dir) in &query.sort {
        let p = q.path_expr(path);
        let dir = match dir {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        order.push(format!("{} {}", p, dir));
    }
    order.push("created_at".into());
    order.push("id".into());
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.skip.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT payload FROM {}{} ORDER BY {}{}{}",
        table,
        where_sql,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    q
}

pub fn count_documents(table: &str, filter: &Filter) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filter);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", table, where_sql);
    q
}

pub fn insert_document(table: &str, id: &str, payload: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(PgParam::Text(id.to_string()));
    let payload_n = q.push_param(PgParam::Json(payload));
    q.sql = format!(
        "INSERT INTO {} (id, payload) VALUES (${}, ${}) RETURNING payload",
        table, id_n, payload_n
    );
    q
}

pub fn replace_document(table: &str, id: &str, payload: Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(PgParam::Text(id.to_string()));
    let payload_n = q.push_param(PgParam::Json(payload));
    q.sql = format!(
        "UPDATE {} SET payload = ${}, updated_at = NOW() WHERE id = ${} RETURNING payload",
        table, payload_n, id_n
    );
    q
}

pub fn delete_document(table: &str, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(PgParam::Text(id.to_string()));
    q.sql = format!("DELETE FROM {} WHERE id = ${} RETURNING payload", table, id_n);
    q
}
