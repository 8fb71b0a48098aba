use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use logdoctor::ai::AiAnalyzer;
use logdoctor::archive::extract_zip;
use logdoctor::catalog::{GitTreeCatalog, IndexCatalog, RemoteSource};
use logdoctor::config::CatalogFlavor;
use logdoctor::plugins::types::Finding;
use logdoctor::remedy::RemedyStore;
use logdoctor::sync::SyncCoordinator;
use logdoctor::{Analyzer, Config};

#[derive(Parser)]
#[command(name = "logdoctor")]
#[command(about = "Log diagnosis engine with remotely synced analysis plugins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the plugin cache against the remote catalog
    Sync,
    /// Analyze a log directory or zip archive
    Analyze {
        /// Path to a log directory or a .zip archive of one
        input: PathBuf,
        /// Use the AI summarizer instead of the plugin batch
        #[arg(long)]
        ai: bool,
    },
    /// List the cached plugins
    Plugins,
    /// Show the remedy document for a finding code
    Remedy {
        /// Finding code, e.g. NET001
        code: String,
    },
    /// Show sync status
    Status,
    /// Show version information
    Version,
}

fn build_source(config: &Config) -> Arc<dyn RemoteSource> {
    match config.catalog {
        CatalogFlavor::GitTree => Arc::new(GitTreeCatalog::new(config.remote.clone())),
        CatalogFlavor::Index => Arc::new(IndexCatalog::new(config.remote.clone())),
    }
}

fn build_coordinator(config: &Config) -> SyncCoordinator {
    SyncCoordinator::new(build_source(config), config.cache_dir(), config.mode)
}

fn print_findings(findings: &[Finding]) {
    for finding in findings {
        let marker = if finding.has_remedy { "*" } else { " " };
        println!("  [{}]{} {}", finding.code, marker, finding.title);
        if !finding.detail.is_empty() {
            println!("        {}", finding.detail);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;
    let timeout = Duration::from_secs(config.timeout_secs);

    match cli.command {
        Some(Commands::Version) | None => {
            println!("logdoctor {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Sync) => {
            let mut coordinator = build_coordinator(&config);
            let refreshed = coordinator.ensure_synced(timeout).await?;
            let status = coordinator.sync_status();
            if refreshed {
                println!("Plugin cache refreshed ({} files)", status.file_count);
            } else {
                println!("Plugin cache already up to date ({} files)", status.file_count);
            }
        }
        Some(Commands::Analyze { input, ai }) => {
            // Zip inputs are extracted to a temp dir that lives until the
            // analysis finishes.
            let bundle;
            let input_dir = if input.extension().and_then(|e| e.to_str()) == Some("zip") {
                bundle = extract_zip(&input)?;
                bundle.path().to_path_buf()
            } else {
                input
            };

            if ai {
                let analyzer = AiAnalyzer::new(config.ai.clone());
                let report = analyzer.summarize(&input_dir).await;
                println!("{}", report.summary);
                print_findings(&report.findings);
            } else {
                let mut analyzer = Analyzer::new(build_coordinator(&config), timeout);
                let report = analyzer.run_all(&input_dir).await?;
                if report.succeeded {
                    println!("No problems found.");
                } else {
                    println!("{} finding(s):", report.findings.len());
                    print_findings(&report.findings);
                }
                if !report.summary.is_empty() {
                    println!("{}", report.summary);
                }
            }
        }
        Some(Commands::Plugins) => {
            let mut coordinator = build_coordinator(&config);
            coordinator.ensure_synced(timeout).await?;
            let identifiers = coordinator.cached_plugin_identifiers()?;
            if identifiers.is_empty() {
                println!("No plugins cached.");
            } else {
                for id in identifiers {
                    println!("{id}");
                }
            }
        }
        Some(Commands::Remedy { code }) => {
            let mut store = RemedyStore::new(config.cache_dir())
                .with_source(build_source(&config), timeout);
            let text = store.fetch(&code).await?;
            println!("{text}");
        }
        Some(Commands::Status) => {
            let coordinator = build_coordinator(&config);
            let status = coordinator.sync_status();
            println!("mode:       {:?}", status.mode);
            println!("cache:      {}", coordinator.cache_dir().display());
            println!("files:      {}", status.file_count);
            match status.last_sync {
                Some(ts) => println!("last sync:  {}", ts.to_rfc3339()),
                None => println!("last sync:  never"),
            }
        }
    }

    Ok(())
}
