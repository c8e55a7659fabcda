use crate::config::DatabaseConfig;
use crate::constants::{self, MIN_IMDB_VOTES};
use crate::error::Result;
use crate::sqlite::open_connection;
use crate::storage::{DatabaseLocation, TableTarget};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use tracing::{info, warn};

/// Release-decade buckets, in the order of `ProviderSummary::decades`
pub const DECADE_LABELS: [&str; 6] = ["pre-1980", "1980s", "1990s", "2000s", "2010s", "2020s"];

/// Titles released within this many years count as recent
pub const RECENT_YEARS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportOrigin {
    /// Aggregated from the catalog table
    Live,
    /// Fixed sample figures, used when the catalog cannot be read
    Demo,
}

/// Catalog aggregates for one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub provider: String,
    pub display_name: String,
    pub color: Option<String>,
    pub monthly_price: Option<f64>,
    pub total_titles: u64,
    pub movies: u64,
    pub series: u64,
    /// Mean IMDb score over titles with more than `MIN_IMDB_VOTES` votes
    pub mean_imdb_score: Option<f64>,
    pub titles_7plus: u64,
    pub titles_8plus: u64,
    pub mean_release_year: Option<f64>,
    pub recent_titles: u64,
    pub decades: [u64; 6],
    pub mean_movie_minutes: Option<f64>,
    /// Titles no other provider carries
    pub exclusive_titles: u64,
}

impl ProviderSummary {
    pub fn cost_per_title(&self) -> Option<f64> {
        per_title(self.monthly_price?, self.total_titles)
    }

    /// Monthly price divided by the number of titles scoring 7 or more
    pub fn cost_per_quality_title(&self) -> Option<f64> {
        per_title(self.monthly_price?, self.titles_7plus)
    }

    pub fn movie_share(&self) -> Option<f64> {
        percentage(self.movies, self.total_titles)
    }

    pub fn exclusive_share(&self) -> Option<f64> {
        percentage(self.exclusive_titles, self.total_titles)
    }
}

fn per_title(price: f64, titles: u64) -> Option<f64> {
    (titles > 0).then(|| price / titles as f64)
}

fn percentage(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 * 100.0 / total as f64)
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogReport {
    pub origin: ReportOrigin,
    pub current_year: i32,
    pub providers: Vec<ProviderSummary>,
    /// Why demo figures are shown, when they are
    pub notice: Option<String>,
}

impl CatalogReport {
    pub fn total_titles(&self) -> u64 {
        self.providers.iter().map(|p| p.total_titles).sum()
    }

    pub fn is_demo(&self) -> bool {
        self.origin == ReportOrigin::Demo
    }
}

/// Per-provider aggregates over the latest snapshot of every title.
///
/// Rows are append-only, so each provider/category/title keeps only its most
/// recent capture before aggregating.
pub fn query_report(conn: &Connection, target: &TableTarget, current_year: i32) -> Result<Vec<ProviderSummary>> {
    let sql = format!(
        "WITH ranked AS (
            SELECT provedor, categoria, ano, duracao_minutos, imdb_score, imdb_count,
                   COALESCE(url, titulo) AS title_key,
                   ROW_NUMBER() OVER (
                       PARTITION BY provedor, categoria, COALESCE(url, titulo)
                       ORDER BY extract_timestamp DESC
                   ) AS rn
            FROM {table}
            WHERE provedor IS NOT NULL
        ),
        titles AS (SELECT * FROM ranked WHERE rn = 1),
        exclusive AS (
            SELECT title_key FROM titles
            WHERE title_key IS NOT NULL
            GROUP BY title_key
            HAVING COUNT(DISTINCT provedor) = 1
        )
        SELECT
            t.provedor,
            COUNT(*),
            COUNT(*) FILTER (WHERE t.categoria = 'filmes'),
            COUNT(*) FILTER (WHERE t.categoria = 'series'),
            AVG(t.imdb_score) FILTER (WHERE t.imdb_count > ?1),
            COUNT(*) FILTER (WHERE t.imdb_score >= 7 AND t.imdb_count > ?1),
            COUNT(*) FILTER (WHERE t.imdb_score >= 8 AND t.imdb_count > ?1),
            AVG(t.ano),
            COUNT(*) FILTER (WHERE t.ano >= ?2),
            COUNT(*) FILTER (WHERE t.ano < 1980),
            COUNT(*) FILTER (WHERE t.ano >= 1980 AND t.ano < 1990),
            COUNT(*) FILTER (WHERE t.ano >= 1990 AND t.ano < 2000),
            COUNT(*) FILTER (WHERE t.ano >= 2000 AND t.ano < 2010),
            COUNT(*) FILTER (WHERE t.ano >= 2010 AND t.ano < 2020),
            COUNT(*) FILTER (WHERE t.ano >= 2020),
            AVG(t.duracao_minutos) FILTER (WHERE t.categoria = 'filmes'),
            COUNT(*) FILTER (WHERE t.title_key IN (SELECT title_key FROM exclusive))
        FROM titles t
        GROUP BY t.provedor
        ORDER BY COUNT(*) DESC, t.provedor",
        table = target.qualified()
    );

    let min_votes = i64::try_from(MIN_IMDB_VOTES).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![min_votes, current_year - RECENT_YEARS], summary_from_row)?;

    let mut summaries = Vec::new();
    for row in rows {
        summaries.push(row?);
    }
    Ok(summaries)
}

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderSummary> {
    let provider: String = row.get(0)?;
    let info = constants::provider(&provider);

    Ok(ProviderSummary {
        display_name: constants::display_name(&provider),
        color: info.map(|p| p.color.to_string()),
        monthly_price: info.map(|p| p.monthly_price),
        provider,
        total_titles: count(row, 1)?,
        movies: count(row, 2)?,
        series: count(row, 3)?,
        mean_imdb_score: row.get(4)?,
        titles_7plus: count(row, 5)?,
        titles_8plus: count(row, 6)?,
        mean_release_year: row.get(7)?,
        recent_titles: count(row, 8)?,
        decades: [
            count(row, 9)?,
            count(row, 10)?,
            count(row, 11)?,
            count(row, 12)?,
            count(row, 13)?,
            count(row, 14)?,
        ],
        mean_movie_minutes: row.get(15)?,
        exclusive_titles: count(row, 16)?,
    })
}

/// Live report from the configured database, or the demo report when it
/// cannot be read. Never fails.
pub fn load_report(config: &DatabaseConfig, current_year: i32) -> CatalogReport {
    match try_load_report(config, current_year) {
        Ok(providers) => {
            info!("📊 Loaded catalog report for {} providers", providers.len());
            CatalogReport {
                origin: ReportOrigin::Live,
                current_year,
                providers,
                notice: None,
            }
        }
        Err(e) => {
            warn!("Catalog unavailable, showing demo data: {}", e);
            let mut report = demo_report(current_year);
            report.notice = Some(format!("Demo data: catalog unavailable ({e})"));
            report
        }
    }
}

fn try_load_report(config: &DatabaseConfig, current_year: i32) -> Result<Vec<ProviderSummary>> {
    let target = TableTarget::from_config(config)?;
    let location = DatabaseLocation::parse(&config.url)?;
    let conn = open_connection(&location, &target.schema, true)?;
    query_report(&conn, &target, current_year)
}

struct DemoRow {
    total: u64,
    movies: u64,
    series: u64,
    score: f64,
    plus7: u64,
    plus8: u64,
    year: f64,
    recent: u64,
    decades: [u64; 6],
    minutes: f64,
    exclusive: u64,
}

/// Rows follow `constants::PROVIDERS` order
const DEMO_ROWS: [DemoRow; 7] = [
    DemoRow { total: 5000, movies: 3500, series: 1500, score: 7.1, plus7: 1800, plus8: 500, year: 2018.5, recent: 2200, decades: [200, 250, 450, 800, 2300, 1000], minutes: 112.0, exclusive: 2500 },
    DemoRow { total: 4200, movies: 3200, series: 1000, score: 6.9, plus7: 1400, plus8: 380, year: 2016.2, recent: 1500, decades: [300, 350, 600, 950, 1400, 600], minutes: 105.0, exclusive: 1800 },
    DemoRow { total: 1800, movies: 1200, series: 600, score: 7.8, plus7: 1200, plus8: 550, year: 2019.8, recent: 1200, decades: [150, 120, 180, 250, 700, 400], minutes: 98.0, exclusive: 1400 },
    DemoRow { total: 2500, movies: 1500, series: 1000, score: 7.6, plus7: 1300, plus8: 480, year: 2020.1, recent: 1600, decades: [100, 150, 200, 450, 900, 700], minutes: 118.0, exclusive: 1200 },
    DemoRow { total: 1600, movies: 1000, series: 600, score: 6.8, plus7: 600, plus8: 180, year: 2017.8, recent: 800, decades: [50, 80, 150, 320, 700, 300], minutes: 110.0, exclusive: 900 },
    DemoRow { total: 1300, movies: 500, series: 800, score: 7.9, plus7: 850, plus8: 320, year: 2019.5, recent: 900, decades: [80, 60, 100, 160, 450, 450], minutes: 95.0, exclusive: 950 },
    DemoRow { total: 2200, movies: 1600, series: 600, score: 7.0, plus7: 900, plus8: 250, year: 2017.2, recent: 950, decades: [120, 180, 250, 400, 850, 400], minutes: 108.0, exclusive: 1100 },
];

/// Fixed sample figures for every known provider
pub fn demo_report(current_year: i32) -> CatalogReport {
    let providers = constants::PROVIDERS
        .iter()
        .zip(DEMO_ROWS.iter())
        .map(|(info, row)| ProviderSummary {
            provider: info.id.to_string(),
            display_name: info.display_name.to_string(),
            color: Some(info.color.to_string()),
            monthly_price: Some(info.monthly_price),
            total_titles: row.total,
            movies: row.movies,
            series: row.series,
            mean_imdb_score: Some(row.score),
            titles_7plus: row.plus7,
            titles_8plus: row.plus8,
            mean_release_year: Some(row.year),
            recent_titles: row.recent,
            decades: row.decades,
            mean_movie_minutes: Some(row.minutes),
            exclusive_titles: row.exclusive,
        })
        .collect();

    CatalogReport {
        origin: ReportOrigin::Demo,
        current_year,
        providers,
        notice: Some("Demo data".to_string()),
    }
}
