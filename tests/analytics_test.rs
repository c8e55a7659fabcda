use chrono::NaiveDate;
use std::sync::Arc;

use streaming_catalog::analytics::{load_report, query_report, ReportOrigin};
use streaming_catalog::config::DatabaseConfig;
use streaming_catalog::sqlite::{open_connection, SqliteSink};
use streaming_catalog::storage::{DatabaseLocation, PersistenceSink, TableTarget};
use streaming_catalog::types::NormalizedRecord;

fn title(provider: &str, category: &str, slug: &str, year: i32, score: f64, votes: u64, day: u32) -> NormalizedRecord {
    NormalizedRecord {
        provedor: Some(provider.to_string()),
        categoria: Some(category.to_string()),
        titulo: Some(slug.to_string()),
        ano: Some(year),
        duracao: None,
        duracao_minutos: (category == "filmes").then_some(120),
        imdb_score: Some(score),
        imdb_count: Some(votes),
        classificacao: None,
        sinopse: None,
        url: Some(format!("https://www.justwatch.com/br/{slug}")),
        extract_timestamp: NaiveDate::from_ymd_opt(2025, 1, day).unwrap().and_hms_opt(10, 0, 0).unwrap(),
    }
}

async fn seed(location: &DatabaseLocation, target: &TableTarget) {
    let sink = SqliteSink::open(location, target).unwrap();
    let batch = vec![
        // Shared by both providers
        title("nfx", "filmes", "duna", 2021, 8.0, 900_000, 1),
        title("prv", "filmes", "duna", 2021, 8.0, 900_000, 1),
        // Earlier capture superseded by a later one
        title("nfx", "series", "dark", 2017, 6.0, 400_000, 1),
        title("nfx", "series", "dark", 2017, 8.7, 450_000, 2),
        // Too few votes to count toward quality
        title("nfx", "filmes", "indie", 1975, 9.5, 120, 1),
        title("prv", "series", "boys", 2019, 8.6, 700_000, 1),
    ];
    let sink: Arc<dyn PersistenceSink> = Arc::new(sink);
    sink.write(&batch, target).await.unwrap();
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_report_aggregates_latest_snapshot_per_title() {
    let dir = tempfile::tempdir().unwrap();
    let location = DatabaseLocation::File(dir.path().join("catalog.db"));
    let target = TableTarget::new("main", "justwatch_tb").unwrap();
    seed(&location, &target).await;

    let conn = open_connection(&location, "main", true).unwrap();
    let report = query_report(&conn, &target, 2025).unwrap();

    assert_eq!(report.len(), 2);
    let nfx = report.iter().find(|p| p.provider == "nfx").unwrap();
    assert_eq!(nfx.display_name, "Netflix");
    assert_eq!(nfx.total_titles, 3);
    assert_eq!(nfx.movies, 2);
    assert_eq!(nfx.series, 1);
    // duna 8.0 and dark 8.7 (latest capture); indie has too few votes
    assert_eq!(nfx.titles_7plus, 2);
    assert_eq!(nfx.titles_8plus, 2);
    assert!((nfx.mean_imdb_score.unwrap() - 8.35).abs() < 1e-9);
    assert_eq!(nfx.recent_titles, 1);
    assert_eq!(nfx.decades[0], 1);
    assert_eq!(nfx.exclusive_titles, 2);
    assert_eq!(nfx.mean_movie_minutes, Some(120.0));

    let prv = report.iter().find(|p| p.provider == "prv").unwrap();
    assert_eq!(prv.total_titles, 2);
    assert_eq!(prv.exclusive_titles, 1);
    assert!((prv.cost_per_title().unwrap() - 19.90 / 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_load_report_reads_named_schema() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");
    let location = DatabaseLocation::File(db_path.clone());
    let target = TableTarget::new("streaming_s", "justwatch_tb").unwrap();
    seed(&location, &target).await;

    let config = DatabaseConfig {
        url: format!("sqlite://{}", db_path.display()),
        schema: "streaming_s".to_string(),
        ..DatabaseConfig::default()
    };
    let report = tokio::task::spawn_blocking(move || load_report(&config, 2025))
        .await
        .unwrap();

    assert_eq!(report.origin, ReportOrigin::Live);
    assert_eq!(report.total_titles(), 5);
    assert!(report.notice.is_none());
}

#[test]
fn test_missing_table_falls_back_to_demo() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("empty.db");
    rusqlite::Connection::open(&db_path).unwrap();

    let config = DatabaseConfig {
        url: format!("sqlite://{}", db_path.display()),
        ..DatabaseConfig::default()
    };
    let report = load_report(&config, 2025);

    assert_eq!(report.origin, ReportOrigin::Demo);
    assert_eq!(report.providers.len(), 7);
}
