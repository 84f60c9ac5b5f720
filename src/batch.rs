use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::convert::{self, assemble};
use crate::fetch::{CdpFetcher, FetchError};
use crate::vault::{self, ReferenceIndex, WriteOutcome};

const BASE_BACKOFF_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub retries: u32,
    pub sleep: Duration,
    pub overwrite: bool,
    pub save_html: bool,
}

/// Per-address outcomes for a whole run. Failures are isolated: one bad
/// address never stops the rest of the batch.
#[derive(Debug, Default)]
pub struct BatchStats {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn print(&self) {
        println!(
            "Done: {} converted, {} skipped, {} failed ({} total).",
            self.converted, self.skipped, self.failed, self.total
        );
    }
}

/// Read a URL-list file: one address per line, blank lines and `#` comments
/// ignored.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Convert addresses one at a time, sleeping between fetches. The browser
/// session is the remote service's guest; the delay is a politeness
/// concession, not an optimization target.
pub async fn run(
    fetcher: &CdpFetcher,
    urls: &[String],
    base_dir: &Path,
    config: &Config,
    index: &mut ReferenceIndex,
    opts: &BatchOptions,
) -> BatchStats {
    let mut stats = BatchStats {
        total: urls.len(),
        ..BatchStats::default()
    };

    let pb = if urls.len() > 1 {
        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap()
                .progress_chars("=> "),
        );
        Some(pb)
    } else {
        None
    };

    for (i, url) in urls.iter().enumerate() {
        if !url.contains("substack.com") {
            warn!("Not a substack URL: {}", url);
        }
        match convert_one(fetcher, url, base_dir, config, index, opts).await {
            Ok(WriteOutcome::Written(path)) => {
                stats.converted += 1;
                info!("{} -> {}", url, path.display());
            }
            Ok(WriteOutcome::Skipped(path)) => {
                stats.skipped += 1;
                info!("Exists, skipping: {}", path.display());
            }
            Err(e) => {
                stats.failed += 1;
                warn!("Failed {}: {:#}", url, e);
            }
        }
        if let Some(pb) = &pb {
            pb.inc(1);
        }
        if i + 1 < urls.len() && !opts.sleep.is_zero() {
            sleep(opts.sleep).await;
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    info!(
        "Batch finished: {} converted, {} skipped, {} failed",
        stats.converted, stats.skipped, stats.failed
    );
    stats
}

async fn convert_one(
    fetcher: &CdpFetcher,
    url: &str,
    base_dir: &Path,
    config: &Config,
    index: &mut ReferenceIndex,
    opts: &BatchOptions,
) -> Result<WriteOutcome> {
    let html = fetch_with_retry(fetcher, url, opts.retries).await?;
    let note = convert::convert_post(&html, url, index, Utc::now())?;
    for warning in &note.warnings {
        debug!("{}: {}", url, warning);
    }

    let path = vault::note_path(base_dir, config, &note.meta);
    let outcome = vault::write_note(&path, &note.markdown, opts.overwrite)?;
    if let WriteOutcome::Written(written) = &outcome {
        if opts.save_html {
            vault::write_sidecar_html(written, &html)?;
        }
        // Newly materialized notes become linkable for the rest of the batch.
        index.insert(&note.meta.url, &assemble::note_stem(&note.meta));
    }
    Ok(outcome)
}

/// Fetch failures are the transient kind; back off exponentially up to the
/// configured retry count. Extraction failures are not retried — the page
/// content will not change on a refetch.
async fn fetch_with_retry(
    fetcher: &CdpFetcher,
    url: &str,
    retries: u32,
) -> Result<String, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch_html(url).await {
            Ok(html) => return Ok(html),
            Err(e) if attempt < retries => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Fetch failed for {} (attempt {}/{}): {}; backing off {:.1}s",
                    url,
                    attempt + 1,
                    retries + 1,
                    e,
                    backoff.as_secs_f64()
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        fs::write(
            &path,
            "# reading list\nhttps://a.substack.com/p/one\n\n  https://b.substack.com/p/two  \n#https://c.substack.com/p/three\n",
        )
        .unwrap();
        let urls = read_url_list(&path).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://a.substack.com/p/one".to_string(),
                "https://b.substack.com/p/two".to_string(),
            ]
        );
    }

    #[test]
    fn missing_url_list_is_an_error() {
        assert!(read_url_list(Path::new("/no/such/file.txt")).is_err());
    }
}
