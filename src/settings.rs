//! Environment-driven settings for the PostgreSQL document store.

/// Connection and layout settings. Collections live in the schema named by `PROTEAN_SCHEMA`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub schema: String,
    pub max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/protean".into(),
            schema: "protean".into(),
            max_connections: 5,
        }
    }
}

impl Settings {
    /// Load `.env` if present, then read `DATABASE_URL`, `PROTEAN_SCHEMA` and `PROTEAN_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Settings::default();
        Settings {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            schema: std::env::var("PROTEAN_SCHEMA").unwrap_or(defaults.schema),
            max_connections: std::env::var("PROTEAN_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
        }
    }
}
