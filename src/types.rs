use crate::error::Result;
use crate::normalize::RecordShape;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Timestamp layout of the `extract_timestamp` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Content type of a catalog stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Filmes,
    Series,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Filmes => "filmes",
            Category::Series => "series",
        }
    }

    /// Object type used by the GraphQL title filter
    pub fn object_type(&self) -> &'static str {
        match self {
            Category::Filmes => "MOVIE",
            Category::Series => "SHOW",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "filmes" | "movies" | "movie" => Some(Category::Filmes),
            "series" | "shows" | "show" => Some(Category::Series),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider x category pagination sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub provider: String,
    pub category: Category,
}

impl StreamKey {
    pub fn new(provider: impl Into<String>, category: Category) -> Self {
        Self {
            provider: provider.into(),
            category,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.category)
    }
}

/// Position of the next page to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub page: u32,
    pub offset: u64,
}

impl Cursor {
    pub fn start() -> Self {
        Self { page: 1, offset: 0 }
    }

    pub fn next(self, page_size: u32) -> Self {
        Self {
            page: self.page + 1,
            offset: self.offset + u64::from(page_size),
        }
    }
}

/// Reference to a single title on a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub path: String,
}

/// Field dictionary exactly as produced by a source, before any typing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Typed catalog row, one per title per stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub provedor: Option<String>,
    pub categoria: Option<String>,
    pub titulo: Option<String>,
    pub ano: Option<i32>,
    pub duracao: Option<String>,
    pub duracao_minutos: Option<u32>,
    pub imdb_score: Option<f64>,
    pub imdb_count: Option<u64>,
    pub classificacao: Option<String>,
    pub sinopse: Option<String>,
    pub url: Option<String>,
    pub extract_timestamp: NaiveDateTime,
}

impl NormalizedRecord {
    pub fn extract_timestamp_text(&self) -> String {
        self.extract_timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Field dictionary view of this record, in the split (API) shape.
    pub fn to_raw(&self) -> RawRecord {
        RawRecord::new()
            .with("provedor", self.provedor.clone())
            .with("categoria", self.categoria.clone())
            .with("titulo", self.titulo.clone())
            .with("ano", self.ano)
            .with("duracao", self.duracao.clone())
            .with("duracao_minutos", self.duracao_minutos)
            .with("imdb_score", self.imdb_score)
            .with("imdb_count", self.imdb_count)
            .with("classificacao", self.classificacao.clone())
            .with("sinopse", self.sinopse.clone())
            .with("url", self.url.clone())
            .with("extract_timestamp", self.extract_timestamp_text())
    }
}

/// Upstream paged catalog. An empty page means the stream is exhausted;
/// an `Err` is a failed fetch and never means "no data".
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    /// Identifier used in logs and metrics
    fn source_name(&self) -> &'static str;

    async fn fetch_page(&self, stream: &StreamKey, cursor: Cursor) -> Result<Vec<ItemRef>>;

    async fn fetch_detail(&self, stream: &StreamKey, item: &ItemRef) -> Result<RawRecord>;

    /// Shape of the records this source produces
    fn record_shape(&self, raw: &RawRecord) -> RecordShape {
        RecordShape::detect(raw)
    }
}
