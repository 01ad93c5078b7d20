//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed schema or association declaration. Raised at declaration time and never recovered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required parameter 'modelName'")]
    MissingModelName,
    #[error("missing required option '{option}' for {relation}")]
    MissingOption {
        option: &'static str,
        relation: &'static str,
    },
    #[error("schema identity must not be empty")]
    EmptyIdentity,
    #[error("duplicate field '{field}' on {schema}")]
    DuplicateField { schema: String, field: String },
    #[error("unknown association type '{tag}' (expected one of: {expected})")]
    UnknownVariant { tag: String, expected: &'static str },
    #[error("junction for {from} <-> {to} needs distinct foreign keys, both resolve to '{key}'")]
    AmbiguousJunctionKeys { from: String, to: String, key: String },
    #[error("invalid {what}: {detail}")]
    Invalid { what: &'static str, detail: String },
}

/// Kind of a single field violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    Required,
    Type,
    Enum,
    Unique,
    Reference,
    Format,
    MinLength,
    MaxLength,
    Pattern,
    Allowed,
    Minimum,
    Maximum,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldViolation {
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

/// Field-level constraint violations collected from one validate/save call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        let mut e = Self::new();
        e.push(path, kind, message);
        e
    }

    pub fn push(&mut self, path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            path: path.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// First violation recorded for `path`, if any.
    pub fn field(&self, path: &str) -> Option<&FieldViolation> {
        self.violations.iter().find(|v| v.path == path)
    }

    pub fn has(&self, path: &str, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.path == path && v.kind == kind)
    }

    /// Ok when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, v.path, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Message used for every uniqueness violation.
pub fn unique_message(path: &str, value: &str) -> String {
    format!("Error, expected `{}` to be unique. Value: `{}`", path, value)
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unique index '{index}' violated in {collection}")]
    UniqueViolation { collection: String, index: String },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("invalid DATABASE_URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("'{0}' is not a registered namespace")]
    Reference(String),
    #[error("'{0}' is not compiled")]
    NotCompiled(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Migration run failure. Unit-level variants are only ever placed in a run report.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("{namespace} failed: {message}")]
    UnitFailed { namespace: String, message: String },
    #[error("{namespace} panicked: {message}")]
    UnitPanicked { namespace: String, message: String },
    #[error("{namespace} ran but its record could not be written: {source}")]
    Tracking { namespace: String, source: AppError },
    #[error("no migration module named '{0}'")]
    UnknownModule(String),
    #[error("duplicate migration namespace '{0}'")]
    DuplicateNamespace(String),
    #[error("{unit} depends on unknown migration '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },
    #[error("dependency cycle among: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error(transparent)]
    Registry(#[from] AppError),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(StoreError::Db(e))
    }
}

impl AppError {
    /// Validation details when this error carries field violations.
    pub fn violations(&self) -> Option<&ValidationError> {
        match self {
            AppError::Validation(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Schema(_) => (StatusCode::INTERNAL_SERVER_ERROR, "schema_error"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::Reference(_) | AppError::NotCompiled(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "registry_error")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Store(StoreError::Db(sqlx::Error::RowNotFound)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        let details = self
            .violations()
            .and_then(|v| serde_json::to_value(&v.violations).ok());
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_path() {
        let mut e = ValidationError::new();
        e.push("name", ViolationKind::Required, "name is required");
        e.push("age", ViolationKind::Minimum, "age must be at least 0");
        assert!(e.has("age", ViolationKind::Minimum));
        assert_eq!(
            e.to_string(),
            "validation failed: name: name is required; age: age must be at least 0"
        );
    }

    #[test]
    fn validation_maps_to_unprocessable_entity() {
        let err = AppError::from(ValidationError::single("x", ViolationKind::Type, "bad"));
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        let err = AppError::NotFound("record".into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
