use crate::config::DatabaseConfig;
use crate::error::{CatalogError, Result};
use crate::types::NormalizedRecord;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Column order of the catalog table
pub const COLUMNS: [&str; 12] = [
    "provedor",
    "categoria",
    "titulo",
    "ano",
    "duracao",
    "duracao_minutos",
    "imdb_score",
    "imdb_count",
    "classificacao",
    "sinopse",
    "url",
    "extract_timestamp",
];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Schema-qualified destination table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

impl TableTarget {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        let target = Self {
            schema: schema.into(),
            table: table.into(),
        };
        if !is_identifier(&target.schema) || !is_identifier(&target.table) {
            return Err(CatalogError::Config(format!(
                "'{}' is not a valid schema.table name",
                target
            )));
        }
        Ok(target)
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(config.schema.clone(), config.table.clone())
    }

    /// Quoted `"schema"."table"` for SQL text
    pub fn qualified(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    pub fn is_main_schema(&self) -> bool {
        matches!(self.schema.as_str(), "main" | "temp")
    }

    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                provedor TEXT,
                categoria TEXT,
                titulo TEXT,
                ano INTEGER,
                duracao TEXT,
                duracao_minutos INTEGER,
                imdb_score REAL,
                imdb_count INTEGER,
                classificacao TEXT,
                sinopse TEXT,
                url TEXT,
                extract_timestamp TEXT
            )",
            self.qualified()
        )
    }

    pub fn insert_sql(&self) -> String {
        let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(),
            COLUMNS.join(", "),
            placeholders.join(", ")
        )
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Where a connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
    Remote(String),
}

impl DatabaseLocation {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CatalogError::Config("database url is empty".to_string()));
        }
        if url.starts_with("libsql://") || url.starts_with("https://") || url.starts_with("http://") {
            return Ok(DatabaseLocation::Remote(url.to_string()));
        }

        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        match path {
            "" => Err(CatalogError::Config(format!("database url '{url}' has no path"))),
            ":memory:" => Ok(DatabaseLocation::Memory),
            path => Ok(DatabaseLocation::File(PathBuf::from(path))),
        }
    }
}

/// Append-only destination for normalized batches.
///
/// A batch is written entirely or not at all. Implementations log failures
/// with the table and batch size and return them to the caller.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn write(&self, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize>;

    /// Release the underlying connection. Later writes fail with `SinkClosed`.
    async fn close(&self) -> Result<()>;
}

/// In-memory sink for dry runs and tests
#[derive(Default)]
pub struct InMemorySink {
    tables: Mutex<HashMap<TableTarget, Vec<NormalizedRecord>>>,
    closed: AtomicBool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, target: &TableTarget) -> Vec<NormalizedRecord> {
        self.tables
            .lock()
            .map(|tables| tables.get(target).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn write(&self, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        if self.is_closed() {
            return Err(CatalogError::SinkClosed);
        }
        let mut tables = self.tables.lock().map_err(|_| CatalogError::Persistence {
            table: target.to_string(),
            batch_size: batch.len(),
            message: "in-memory table lock poisoned".to_string(),
        })?;
        tables.entry(target.clone()).or_default().extend_from_slice(batch);
        debug!("Stored {} records in memory for {}", batch.len(), target);
        Ok(batch.len())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Open the sink the connection string points at and prepare the target table.
pub async fn open_sink(config: &DatabaseConfig) -> Result<Arc<dyn PersistenceSink>> {
    let target = TableTarget::from_config(config)?;
    let location = DatabaseLocation::parse(&config.url)?;
    info!("Opening catalog sink for {}", target);

    match location {
        DatabaseLocation::Memory | DatabaseLocation::File(_) => {
            let sink = crate::sqlite::SqliteSink::open(&location, &target)?;
            Ok(Arc::new(sink))
        }
        #[cfg(feature = "db")]
        DatabaseLocation::Remote(url) => {
            let sink = crate::db::RemoteSink::open(&url, config.auth_token.as_deref(), &target).await?;
            Ok(Arc::new(sink))
        }
        #[cfg(not(feature = "db"))]
        DatabaseLocation::Remote(url) => Err(CatalogError::Config(format!(
            "remote database '{url}' requires building with the `db` feature"
        ))),
    }
}
