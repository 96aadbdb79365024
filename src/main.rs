use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use repodata_query::config::{self, QueryConfig};
use repodata_query::repository::cache::IndexCache;
use repodata_query::repository::clock::SystemClock;
use repodata_query::repository::mirror::HttpMirror;
use repodata_query::repository::releases::{ReleaseApi, VersionResolver};
use repodata_query::search::{SearchEngine, SearchRequest};

#[derive(Parser)]
#[command(name = "repodata-query")]
#[command(version, about = "Search package names across YUM/DNF repository mirrors")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search packages by name
    Search {
        /// Package name or name fragment
        package: String,
        /// Only search this repository
        #[arg(long)]
        repo: Option<String>,
        /// Release version tag (defaults to the current release)
        #[arg(long)]
        release: Option<String>,
        /// Match the full package name only
        #[arg(long)]
        exact: bool,
    },
    /// Print the release version table
    Releases,
}

fn init_logging() -> anyhow::Result<WorkerGuard> {
    let log_path = config::log_path();
    let log_dir = config::data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repodata-query.log".to_string());
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, file_name));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = QueryConfig::load(cli.config.as_deref())?;

    let versions = Arc::new(VersionResolver::new(
        Arc::new(ReleaseApi::new(&config.mirror.release_api_url)),
        Arc::new(SystemClock),
        config.cache.versions_ttl_ms,
    ));

    match cli.command {
        Command::Search {
            package,
            repo,
            release,
            exact,
        } => {
            let store = Arc::new(IndexCache::new(&config::db_path(), config.cache.index_ttl_ms)?);
            let mirror = Arc::new(HttpMirror::new(&config.mirror.base_url));
            let engine = SearchEngine::new(store, mirror, versions, config.repositories);

            let request = SearchRequest {
                package,
                repo,
                version: release,
                exact_match: exact,
            };
            let response = engine.search(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Releases => {
            let table = versions.resolve_versions().await;
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}
