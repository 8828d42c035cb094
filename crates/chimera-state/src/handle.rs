//! SurrealDB connections for the state store and audit ledger.
//!
//! [`StoreLocation`] names where the swarm keeps its state: an in-memory
//! engine, a local or remote URL, or an authenticated cloud endpoint. Every
//! connection selects a namespace/database and runs the schema migrations
//! before it is handed out.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "chimera";
const DEFAULT_DATABASE: &str = "main";

/// Credentials for an authenticated endpoint.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint, e.g. `wss://host.surreal.cloud`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Root user rather than a database-scoped user.
    pub is_root: bool,
}

impl CloudConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }
}

/// Where state lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    Memory,
    /// Any URL the `any` engine accepts (`surrealkv://path`, `ws://host`).
    Url(String),
    Cloud(CloudConfig),
}

impl StoreLocation {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve from `lookup`.
    ///
    /// `SURREALDB_ENDPOINT` selects a cloud endpoint and then requires
    /// `SURREALDB_USERNAME` and `SURREALDB_PASSWORD` (`SURREALDB_NAMESPACE`,
    /// `SURREALDB_DATABASE` and `SURREALDB_ROOT` are optional). Otherwise
    /// `SURREALDB_URL` selects a URL, and with neither set state is kept in
    /// memory.
    pub fn resolve_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("SURREALDB_ENDPOINT") {
            let required = |key: &str| {
                lookup(key).ok_or_else(|| {
                    StateError::Connection(format!("SURREALDB_ENDPOINT is set but {key} is not"))
                })
            };
            let mut config = CloudConfig::new(
                endpoint,
                required("SURREALDB_USERNAME")?,
                required("SURREALDB_PASSWORD")?,
            )
            .with_root(
                lookup("SURREALDB_ROOT")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            );
            if let Some(ns) = lookup("SURREALDB_NAMESPACE") {
                config = config.with_namespace(ns);
            }
            if let Some(db) = lookup("SURREALDB_DATABASE") {
                config = config.with_database(db);
            }
            return Ok(Self::Cloud(config));
        }

        Ok(match lookup("SURREALDB_URL") {
            Some(url) => Self::Url(url),
            None => Self::Memory,
        })
    }

    /// Open a connection with the schema in place.
    #[instrument(skip(self), fields(location = %self.describe()))]
    pub async fn connect(&self) -> Result<Surreal<Any>> {
        let db = match self {
            Self::Memory => open("mem://").await?,
            Self::Url(url) => open(url).await?,
            Self::Cloud(config) => {
                let db = open(&config.endpoint).await?;
                sign_in(&db, config).await?;
                db
            }
        };

        let (ns, name) = match self {
            Self::Cloud(config) => (config.namespace.as_str(), config.database.as_str()),
            _ => (DEFAULT_NAMESPACE, DEFAULT_DATABASE),
        };
        db.use_ns(ns)
            .use_db(name)
            .await
            .map_err(|e| StateError::Connection(format!("select {ns}/{name}: {e}")))?;

        migrations::init_schema(&db).await?;
        info!("state database ready");
        Ok(db)
    }

    /// Location without credentials, for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Memory => "mem://".to_string(),
            Self::Url(url) => url.clone(),
            Self::Cloud(config) => format!("{} ({})", config.endpoint, config.namespace),
        }
    }
}

async fn open(url: &str) -> Result<Surreal<Any>> {
    surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("connect {url}: {e}")))
}

async fn sign_in(db: &Surreal<Any>, config: &CloudConfig) -> Result<()> {
    let outcome = if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map(|_| ())
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map(|_| ())
    };
    outcome.map_err(|e| StateError::Connection(format!("sign-in as {}: {e}", config.username)))
}

/// In-memory database with the schema applied.
pub async fn connect_in_memory() -> Result<Surreal<Any>> {
    StoreLocation::Memory.connect().await
}

/// Database at the location named by the environment.
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    StoreLocation::from_env()?.connect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<StoreLocation> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StoreLocation::resolve_with(|key| vars.get(key).cloned())
    }

    #[test]
    fn nothing_set_means_memory() {
        assert!(matches!(resolve(&[]).unwrap(), StoreLocation::Memory));
    }

    #[test]
    fn url_is_used_when_no_endpoint() {
        let loc = resolve(&[("SURREALDB_URL", "surrealkv://./state")]).unwrap();
        assert!(matches!(loc, StoreLocation::Url(u) if u == "surrealkv://./state"));
    }

    #[test]
    fn endpoint_wins_and_reads_optional_keys() {
        let loc = resolve(&[
            ("SURREALDB_ENDPOINT", "wss://db.example"),
            ("SURREALDB_USERNAME", "swarm"),
            ("SURREALDB_PASSWORD", "secret"),
            ("SURREALDB_NAMESPACE", "prod"),
            ("SURREALDB_ROOT", "TRUE"),
            ("SURREALDB_URL", "ignored://"),
        ])
        .unwrap();
        let StoreLocation::Cloud(config) = loc else {
            panic!("expected cloud location");
        };
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert!(config.is_root);
    }

    #[test]
    fn endpoint_without_credentials_is_an_error() {
        assert!(resolve(&[("SURREALDB_ENDPOINT", "wss://db.example")]).is_err());
    }

    #[test]
    fn describe_hides_credentials() {
        let loc = StoreLocation::Cloud(CloudConfig::new("wss://db.example", "swarm", "secret"));
        assert!(!loc.describe().contains("secret"));
    }
}
