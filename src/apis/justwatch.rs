use crate::config::CrawlConfig;
use crate::constants::JUSTWATCH_SITE_URL;
use crate::error::{CatalogError, Result};
use crate::normalize::RecordShape;
use crate::types::{Cursor, ItemRef, PageSource, RawRecord, StreamKey};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, instrument};

const POPULAR_TITLES_QUERY: &str = r#"
query GetPopularTitles($country: Country!, $first: Int!, $popularTitlesSortBy: PopularTitlesSorting!,
                       $language: Language!, $sortRandomSeed: Int!, $offset: Int!,
                       $popularTitlesFilter: TitleFilter!) {
  popularTitles(
    country: $country
    sortBy: $popularTitlesSortBy
    first: $first
    sortRandomSeed: $sortRandomSeed
    offset: $offset
    filter: $popularTitlesFilter
  ) {
    edges {
      node {
        id
        content(country: $country, language: $language) {
          title
          fullPath
        }
      }
    }
  }
}
"#;

const TITLE_DETAILS_QUERY: &str = r#"
query GetUrlTitleDetails($fullPath: String!, $country: Country!, $language: Language!) {
  urlV2(fullPath: $fullPath) {
    heading1
    node {
      ... on MovieOrShowOrSeason {
        content(country: $country, language: $language) {
          originalReleaseYear
          runtime
          shortDescription
          scoring {
            imdbScore
            imdbVotes
          }
          ... on MovieOrShowContent {
            ageCertification
          }
        }
      }
    }
  }
}
"#;

/// Popular-titles listing and title details from the JustWatch GraphQL API
pub struct JustWatchSource {
    client: reqwest::Client,
    api_url: String,
    country: String,
    language: String,
    page_size: u32,
}

impl JustWatchSource {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) streaming_catalog"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            country: config.country.clone(),
            language: config.language.clone(),
            page_size: config.page_size,
        })
    }

    pub fn popular_titles_body(&self, stream: &StreamKey, cursor: Cursor) -> Value {
        json!({
            "operationName": "GetPopularTitles",
            "variables": {
                "first": self.page_size,
                "popularTitlesSortBy": "POPULAR",
                "sortRandomSeed": 0,
                "offset": cursor.offset,
                "country": self.country,
                "language": self.language,
                "popularTitlesFilter": {
                    "objectTypes": [stream.category.object_type()],
                    "packages": [stream.provider],
                },
            },
            "query": POPULAR_TITLES_QUERY,
        })
    }

    pub fn title_details_body(&self, path: &str) -> Value {
        json!({
            "operationName": "GetUrlTitleDetails",
            "variables": {
                "fullPath": path,
                "country": self.country,
                "language": self.language,
            },
            "query": TITLE_DETAILS_QUERY,
        })
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let started = Instant::now();
        let response = self.client.post(&self.api_url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::Source {
                message: format!("GraphQL endpoint returned {}: {}", status, truncate(&text, 200)),
            });
        }

        let payload: Value = response.json().await?;
        debug!("GraphQL response in {:.2}s", started.elapsed().as_secs_f64());
        check_graphql_errors(&payload)?;
        Ok(payload)
    }
}

#[async_trait]
impl PageSource for JustWatchSource {
    fn source_name(&self) -> &'static str {
        "justwatch"
    }

    #[instrument(skip(self, stream), fields(stream = %stream))]
    async fn fetch_page(&self, stream: &StreamKey, cursor: Cursor) -> Result<Vec<ItemRef>> {
        let payload = self.post(&self.popular_titles_body(stream, cursor)).await?;
        let items = parse_title_list(&payload)?;
        debug!("Offset {} of {} returned {} titles", cursor.offset, stream, items.len());
        Ok(items)
    }

    #[instrument(skip(self, stream, item), fields(stream = %stream, path = %item.path))]
    async fn fetch_detail(&self, stream: &StreamKey, item: &ItemRef) -> Result<RawRecord> {
        let payload = self.post(&self.title_details_body(&item.path)).await?;
        parse_title_details(&payload, stream, &item.path)
    }

    fn record_shape(&self, _raw: &RawRecord) -> RecordShape {
        RecordShape::SplitShaped
    }
}

/// GraphQL reports failures in-band with a 200 status
fn check_graphql_errors(payload: &Value) -> Result<()> {
    match payload.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            Err(CatalogError::Source {
                message: format!("GraphQL errors: {}", messages.join("; ")),
            })
        }
        _ => Ok(()),
    }
}

/// Title references from a `GetPopularTitles` response, in listing order.
///
/// A response without `popularTitles` is malformed and fails; an empty
/// `edges` list is the end of the stream.
pub fn parse_title_list(payload: &Value) -> Result<Vec<ItemRef>> {
    check_graphql_errors(payload)?;
    let edges = payload
        .pointer("/data/popularTitles/edges")
        .and_then(Value::as_array)
        .ok_or_else(|| CatalogError::MissingField("data.popularTitles.edges".to_string()))?;

    let items = edges
        .iter()
        .filter_map(|edge| {
            let node = edge.get("node")?;
            let path = node.pointer("/content/fullPath").and_then(Value::as_str)?;
            if path.is_empty() {
                return None;
            }
            let id = node
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(path)
                .to_string();
            Some(ItemRef {
                id,
                path: path.to_string(),
            })
        })
        .collect();

    Ok(items)
}

/// Split-shaped raw record from a `GetUrlTitleDetails` response
pub fn parse_title_details(payload: &Value, stream: &StreamKey, path: &str) -> Result<RawRecord> {
    check_graphql_errors(payload)?;
    let url_node = payload
        .pointer("/data/urlV2")
        .filter(|v| v.is_object())
        .ok_or_else(|| CatalogError::MissingField(format!("data.urlV2 for {path}")))?;
    let content = url_node.pointer("/node/content").cloned().unwrap_or(Value::Null);
    let field = |pointer: &str| content.pointer(pointer).cloned().unwrap_or(Value::Null);

    Ok(RawRecord::new()
        .with("provedor", stream.provider.as_str())
        .with("categoria", stream.category.as_str())
        .with("titulo", url_node.get("heading1").cloned().unwrap_or(Value::Null))
        .with("ano", field("/originalReleaseYear"))
        .with("duracao_minutos", field("/runtime"))
        .with("imdb_score", field("/scoring/imdbScore"))
        .with("imdb_count", field("/scoring/imdbVotes"))
        .with("classificacao", field("/ageCertification"))
        .with("sinopse", field("/shortDescription"))
        .with("url", format!("{JUSTWATCH_SITE_URL}{path}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
