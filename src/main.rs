use anyhow::{bail, Context};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streaming_catalog::analytics::{self, CatalogReport};
use streaming_catalog::apis::JustWatchSource;
use streaming_catalog::config::Config;
use streaming_catalog::pipeline::{import_into_sink, run_catalog, RunSummary};
use streaming_catalog::storage::{open_sink, InMemorySink, PersistenceSink, TableTarget};
use streaming_catalog::types::{Category, PageSource};
use streaming_catalog::{constants, logging, metrics};

#[derive(Parser)]
#[command(name = "streaming_catalog")]
#[command(about = "Streaming catalog extraction and normalization pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl provider catalogs into the configured table
    Crawl {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Providers to crawl (comma-separated codes or slugs, e.g. nfx,disney-plus)
        #[arg(long)]
        providers: Option<String>,
        /// Categories to crawl (comma-separated): filmes, series
        #[arg(long)]
        categories: Option<String>,
        /// Page cap per stream
        #[arg(long)]
        max_pages: Option<u32>,
        /// Normalize without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Normalize and persist a JSON-lines dump of raw records
    Import {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Per-provider catalog report (demo data when the database is unavailable)
    Report {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reference year for recency figures (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
}

fn parse_providers(list: &str) -> anyhow::Result<Vec<String>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|key| match constants::provider(key) {
            Some(info) => Ok(info.id.to_string()),
            None => bail!("Unknown provider: {key}"),
        })
        .collect()
}

fn parse_categories(list: &str) -> anyhow::Result<Vec<Category>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|key| Category::parse(key).with_context(|| format!("Unknown category: {key}")))
        .collect()
}

fn print_run_summary(summary: &RunSummary) {
    println!("\n📊 Run {} into {}:", summary.run_id, summary.target);
    for stream in &summary.streams {
        println!(
            "   {:<20} pages {:>4}  normalized {:>6}  persisted {:>6}  dropped {:>4}  ({})",
            stream.stream,
            stream.pages_fetched,
            stream.records_normalized,
            stream.records_persisted,
            stream.items_dropped,
            stream.stop_reason.as_str()
        );
    }
    println!("   Total persisted: {}", summary.records_persisted());
    println!("   Total dropped items: {}", summary.items_dropped());

    let failed = summary.failed_streams();
    if !failed.is_empty() || !summary.errors.is_empty() {
        println!("\n⚠️  Problems encountered:");
        for stream in failed {
            for err in &stream.errors {
                println!("   - {}: {}", stream.stream, err);
            }
            if stream.unpersisted_records > 0 {
                println!("   - {}: {} records not persisted", stream.stream, stream.unpersisted_records);
            }
        }
        for err in &summary.errors {
            println!("   - {}", err);
        }
    }
}

fn print_report(report: &CatalogReport) {
    if report.is_demo() {
        println!("⚠️  {}", report.notice.as_deref().unwrap_or("Demo data"));
    }
    println!("\n📊 Catalog report ({} titles)", report.total_titles());
    for p in &report.providers {
        println!("\n🎬 {}", p.display_name);
        println!("   Titles: {} ({} movies, {} series)", p.total_titles, p.movies, p.series);
        if let Some(score) = p.mean_imdb_score {
            println!(
                "   IMDb mean: {:.2}  (>=7: {}, >=8: {})",
                score, p.titles_7plus, p.titles_8plus
            );
        }
        if let Some(year) = p.mean_release_year {
            println!(
                "   Mean release year: {:.1}  (last {} years: {})",
                year,
                analytics::RECENT_YEARS,
                p.recent_titles
            );
        }
        if let Some(minutes) = p.mean_movie_minutes {
            println!("   Mean movie duration: {:.0} min", minutes);
        }
        println!("   Exclusive titles: {}", p.exclusive_titles);
        if let (Some(price), Some(per_title)) = (p.monthly_price, p.cost_per_title()) {
            let per_quality = p
                .cost_per_quality_title()
                .map(|c| format!("{c:.3}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "   Price R$ {:.2}  per title R$ {:.3}  per >=7 title R$ {}",
                price, per_title, per_quality
            );
        }
    }
}

async fn crawl(
    mut config: Config,
    providers: Option<String>,
    categories: Option<String>,
    max_pages: Option<u32>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if let Some(list) = providers {
        config.crawl.providers = parse_providers(&list)?;
    }
    if let Some(list) = categories {
        config.crawl.categories = parse_categories(&list)?;
    }
    if let Some(pages) = max_pages {
        config.crawl.max_pages = pages;
    }
    config.validate()?;
    let config = Arc::new(config);

    let source: Arc<dyn PageSource> = Arc::new(JustWatchSource::new(&config.crawl)?);
    let sink: Arc<dyn PersistenceSink> = if dry_run {
        println!("🧪 Dry run: records are normalized but not persisted");
        Arc::new(InMemorySink::new())
    } else {
        open_sink(&config.database).await?
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, draining streams...");
            println!("\n🛑 Interrupt received, finishing buffered batches...");
            ctrl_c_token.cancel();
        }
    });

    println!("🔄 Crawling {} providers x {} categories...", config.crawl.providers.len(), config.crawl.categories.len());
    let summary = run_catalog(Arc::clone(&config), source, sink, cancel).await?;
    print_run_summary(&summary);

    if let Err(e) = metrics::push_to_gateway(&summary.run_id.to_string()).await {
        warn!("Failed to push metrics: {}", e);
    }

    if !summary.succeeded() {
        bail!(
            "Run {} finished with {} failed streams and {} errors",
            summary.run_id,
            summary.failed_streams().len(),
            summary.errors.len()
        );
    }
    println!("\n🎉 Crawl complete");
    Ok(())
}

async fn import(config: Config, input: PathBuf) -> anyhow::Result<()> {
    let file = File::open(&input).with_context(|| format!("Failed to open {}", input.display()))?;
    let target = TableTarget::from_config(&config.database)?;
    let sink = open_sink(&config.database).await?;

    println!("📥 Importing {} into {}...", input.display(), target);
    let report = import_into_sink(
        BufReader::new(file),
        sink,
        target,
        config.database.batch_size,
        config.crawl.on_persistence_error,
    )
    .await?;
    println!(
        "✅ Imported {} records ({} persisted, {} lines skipped)",
        report.records_normalized, report.records_persisted, report.items_dropped
    );
    if !report.succeeded() || !report.errors.is_empty() {
        for err in &report.errors {
            println!("   - {}", err);
        }
        bail!(
            "Import finished with {} errors ({} records not persisted)",
            report.errors.len(),
            report.unpersisted_records
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    if let Err(e) = metrics::init() {
        warn!("Metrics disabled: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            config,
            providers,
            categories,
            max_pages,
            dry_run,
        } => {
            let config = Config::load(config.as_deref())?;
            crawl(config, providers, categories, max_pages, dry_run).await?;
        }
        Commands::Import { input, config } => {
            let config = Config::load(config.as_deref())?;
            import(config, input).await?;
        }
        Commands::Report { config, year } => {
            let config = Config::load(config.as_deref())?;
            let year = year.unwrap_or_else(|| chrono::Utc::now().year());
            let database = config.database.clone();
            let report = tokio::task::spawn_blocking(move || analytics::load_report(&database, year)).await?;
            print_report(&report);
        }
    }

    info!("Done");
    Ok(())
}
