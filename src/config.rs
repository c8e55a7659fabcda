use crate::constants;
use crate::error::{CatalogError, Result};
use crate::storage::is_identifier;
use crate::types::Category;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "catalog.toml";

/// Run configuration: loaded once, then shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub crawl: CrawlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://path`, `:memory:`, or `libsql://host` (with the `db` feature)
    pub url: String,
    pub auth_token: Option<String>,
    pub table: String,
    pub schema: String,
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://catalog.db".to_string(),
            auth_token: None,
            table: "justwatch_tb".to_string(),
            schema: "main".to_string(),
            batch_size: 100,
        }
    }
}

/// What to do when a batch cannot be persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorHandlingStrategy {
    /// Stop the stream on the first failed batch
    StopOnFirstError,
    /// Keep crawling; the failed batch stays buffered for the next flush
    ContinueOnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub api_url: String,
    pub country: String,
    pub language: String,
    pub page_size: u32,
    /// Hard cap on pages requested per stream
    pub max_pages: u32,
    pub max_item_retries: u32,
    pub max_page_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_concurrent_streams: usize,
    pub providers: Vec<String>,
    pub categories: Vec<Category>,
    pub on_persistence_error: ErrorHandlingStrategy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            api_url: constants::JUSTWATCH_GRAPHQL_URL.to_string(),
            country: "BR".to_string(),
            language: "pt".to_string(),
            page_size: 40,
            max_pages: 150,
            max_item_retries: 3,
            max_page_retries: 3,
            retry_delay_ms: 500,
            request_timeout_secs: 30,
            max_concurrent_streams: 4,
            providers: constants::PROVIDERS.iter().map(|p| p.id.to_string()).collect(),
            categories: vec![Category::Filmes, Category::Series],
            on_persistence_error: ErrorHandlingStrategy::ContinueOnError,
        }
    }
}

impl CrawlConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load from `path` (or `catalog.toml` when present), then apply `CATALOG_*`
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CatalogError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("CATALOG_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(token) = lookup("CATALOG_DATABASE_AUTH_TOKEN") {
            self.database.auth_token = Some(token);
        }
        if let Some(table) = lookup("CATALOG_TABLE") {
            self.database.table = table;
        }
        if let Some(schema) = lookup("CATALOG_SCHEMA") {
            self.database.schema = schema;
        }
        if let Some(size) = lookup("CATALOG_BATCH_SIZE") {
            self.database.batch_size = size.trim().parse().map_err(|_| {
                CatalogError::Config(format!("CATALOG_BATCH_SIZE must be a positive integer, got '{size}'"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.batch_size == 0 {
            return Err(CatalogError::Config("batch_size must be at least 1".to_string()));
        }
        if !is_identifier(&self.database.table) {
            return Err(CatalogError::Config(format!(
                "table '{}' is not a valid identifier",
                self.database.table
            )));
        }
        if !is_identifier(&self.database.schema) {
            return Err(CatalogError::Config(format!(
                "schema '{}' is not a valid identifier",
                self.database.schema
            )));
        }
        if self.crawl.page_size == 0 {
            return Err(CatalogError::Config("page_size must be at least 1".to_string()));
        }
        if self.crawl.max_concurrent_streams == 0 {
            return Err(CatalogError::Config(
                "max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        if self.crawl.providers.is_empty() {
            return Err(CatalogError::Config("at least one provider is required".to_string()));
        }
        if self.crawl.categories.is_empty() {
            return Err(CatalogError::Config("at least one category is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.database.batch_size, 100);
        assert_eq!(config.database.table, "justwatch_tb");
        assert_eq!(config.crawl.page_size, 40);
        assert_eq!(config.crawl.max_item_retries, 3);
        assert_eq!(config.crawl.providers.len(), 7);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"
            batch_size = 25

            [crawl]
            providers = ["nfx"]
            categories = ["series"]
            on_persistence_error = "StopOnFirstError"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.batch_size, 25);
        assert_eq!(config.database.schema, "main");
        assert_eq!(config.crawl.providers, vec!["nfx"]);
        assert_eq!(config.crawl.categories, vec![Category::Series]);
        assert_eq!(config.crawl.on_persistence_error, ErrorHandlingStrategy::StopOnFirstError);
        assert_eq!(config.crawl.max_pages, 150);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CATALOG_DATABASE_URL", "sqlite://override.db"),
            ("CATALOG_SCHEMA", "streaming_s"),
            ("CATALOG_BATCH_SIZE", "7"),
        ]);

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.url, "sqlite://override.db");
        assert_eq!(config.database.schema, "streaming_s");
        assert_eq!(config.database.batch_size, 7);
        assert_eq!(config.database.table, "justwatch_tb");
    }

    #[test]
    fn test_invalid_batch_size_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == "CATALOG_BATCH_SIZE").then(|| "lots".to_string()));
        assert!(matches!(result, Err(CatalogError::Config(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.database.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.database.table = "justwatch tb".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.crawl.providers.clear();
        assert!(config.validate().is_err());
    }
}
