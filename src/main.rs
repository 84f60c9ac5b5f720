mod batch;
mod config;
mod convert;
mod fetch;
mod sitemap;
mod vault;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::batch::BatchOptions;
use crate::config::Config;
use crate::fetch::{CdpFetcher, FetchConfig};
use crate::vault::{ReferenceIndex, WriteOutcome};

#[derive(Parser)]
#[command(
    name = "stackdown",
    about = "Convert Substack posts to Markdown notes through your logged-in browser (CDP)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Vault base directory (default: STACKDOWN_BASE_DIR or config file)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Path to config.yaml with publication mappings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overwrite existing notes
    #[arg(long, global = true)]
    overwrite: bool,

    /// Save the raw HTML as a sidecar next to each note
    #[arg(long, global = true)]
    also_save_html: bool,

    /// Browser remote debugging host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    cdp_host: String,

    /// Browser remote debugging port
    #[arg(long, global = true, default_value_t = 9222)]
    cdp_port: u16,

    /// Per-page render timeout in seconds
    #[arg(long, global = true, default_value_t = 45)]
    timeout: u64,

    /// Retries per URL on transient fetch failures
    #[arg(long, global = true, default_value_t = 2)]
    retries: u32,

    /// Politeness delay between fetches in milliseconds
    #[arg(long, global = true, default_value_t = 150)]
    sleep_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more post URLs
    Fetch {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Convert every URL in a list file (one per line, # comments ignored)
    Batch {
        #[arg(long)]
        urls_file: PathBuf,
    },
    /// Print a publication's post URLs (scrolls the archive in the browser)
    Archive {
        /// Publication slug, or any address on the publication
        publication: String,
        /// Read the publication's sitemap instead of rendering the archive
        #[arg(long)]
        sitemap: bool,
    },
    /// Re-clean a previously exported Markdown file without fetching
    Clean {
        #[arg(long)]
        input: PathBuf,
        /// Original post URL, recorded in the cleaned note's metadata
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let base_dir = config.resolve_base_dir(cli.base_dir.as_deref());
    let fetch_config = FetchConfig {
        host: cli.cdp_host.clone(),
        port: cli.cdp_port,
        timeout: Duration::from_secs(cli.timeout),
    };
    let opts = BatchOptions {
        retries: cli.retries,
        sleep: Duration::from_millis(cli.sleep_ms),
        overwrite: cli.overwrite,
        save_html: cli.also_save_html,
    };

    let mut failed = 0usize;
    match &cli.command {
        Commands::Fetch { urls } => {
            failed = run_batch(urls, &fetch_config, &base_dir, &config, &opts).await?;
        }
        Commands::Batch { urls_file } => {
            let urls = batch::read_url_list(urls_file)?;
            if urls.is_empty() {
                println!("No URLs in {}", urls_file.display());
            } else {
                println!("Converting {} posts into {}", urls.len(), base_dir.display());
                failed = run_batch(&urls, &fetch_config, &base_dir, &config, &opts).await?;
            }
        }
        Commands::Archive { publication, sitemap: use_sitemap } => {
            let urls = if *use_sitemap {
                sitemap::fetch_post_urls(publication).await?
            } else {
                let fetcher = CdpFetcher::connect(&fetch_config).await?;
                let archive_url = fetch::archive_url_for(publication);
                let urls = fetcher.archive_post_urls(&archive_url).await?;
                fetcher.close().await;
                urls
            };
            info!("{} posts found", urls.len());
            for url in &urls {
                println!("{}", url);
            }
        }
        Commands::Clean { input, url } => {
            let raw = std::fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let note = convert::reprocess_markdown(&raw, url, Utc::now());
            let path = vault::note_path(&base_dir, &config, &note.meta);
            match vault::write_note(&path, &note.markdown, cli.overwrite)? {
                WriteOutcome::Written(p) => println!("[ok] {} -> {}", url, p.display()),
                WriteOutcome::Skipped(p) => println!("[skip] Exists: {}", p.display()),
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_batch(
    urls: &[String],
    fetch_config: &FetchConfig,
    base_dir: &Path,
    config: &Config,
    opts: &BatchOptions,
) -> Result<usize> {
    let fetcher = CdpFetcher::connect(fetch_config).await?;
    let mut index = ReferenceIndex::scan(base_dir);
    info!("Reference index: {} known notes", index.len());

    let stats = batch::run(&fetcher, urls, base_dir, config, &mut index, opts).await;
    fetcher.close().await;
    stats.print();
    Ok(stats.failed)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
