use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::convert::{assemble, clean_url, NoteMeta};

static POST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([a-z0-9-]+)\.substack\.com/p/([A-Za-z0-9][A-Za-z0-9_-]*)/?$").unwrap()
});

#[derive(Debug, Clone, PartialEq)]
enum SlugEntry {
    Unique(String),
    Ambiguous,
}

/// Lookup table from already-materialized notes to their filename stems.
/// Built once per batch from the vault on disk, appended to as the batch
/// writes new notes, and read-only during any single conversion.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    by_url: HashMap<String, String>,
    by_pub_slug: HashMap<(String, String), SlugEntry>,
}

impl ReferenceIndex {
    /// Build the index by reading the frontmatter `url` field of every
    /// Markdown file under `base_dir`. Files are visited in sorted order so
    /// first-seen wins deterministically.
    pub fn scan(base_dir: &Path) -> Self {
        let mut files = Vec::new();
        collect_markdown(base_dir, &mut files);
        files.sort();

        let mut index = Self::default();
        for path in files {
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Some(url) = frontmatter_url(&raw) else {
                continue;
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            index.insert(&url, stem);
        }
        debug!("reference index holds {} notes", index.len());
        index
    }

    pub fn insert(&mut self, url: &str, stem: &str) {
        let cleaned = clean_url(url);
        if let Some((publication, slug)) = post_parts(&cleaned) {
            self.by_pub_slug
                .entry((publication, slug))
                .and_modify(|entry| match entry {
                    SlugEntry::Unique(existing) if existing.as_str() == stem => {}
                    _ => *entry = SlugEntry::Ambiguous,
                })
                .or_insert_with(|| SlugEntry::Unique(stem.to_string()));
        }
        self.by_url.insert(cleaned, stem.to_string());
    }

    /// Exact address match wins; otherwise fall back to the (publication,
    /// slug) pattern. An ambiguous pattern match resolves to nothing — the
    /// caller keeps the link external rather than guessing.
    pub fn resolve(&self, cleaned_url: &str) -> Option<&str> {
        if let Some(stem) = self.by_url.get(cleaned_url) {
            return Some(stem);
        }
        let key = post_parts(cleaned_url)?;
        match self.by_pub_slug.get(&key)? {
            SlugEntry::Unique(stem) => Some(stem),
            SlugEntry::Ambiguous => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

fn post_parts(url: &str) -> Option<(String, String)> {
    let caps = POST_URL_RE.captures(url)?;
    Some((caps[1].to_lowercase(), caps[2].to_string()))
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_markdown(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "md") {
            out.push(path);
        }
    }
}

fn frontmatter_url(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let value: serde_yaml::Value = serde_yaml::from_str(&rest[..end]).ok()?;
    value.get("url")?.as_str().map(str::to_string)
}

#[derive(Debug)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// Target already exists and overwrite was not requested; informational,
    /// not an error.
    Skipped(PathBuf),
}

/// Target location for a note: publication directory (via the configured
/// mapping) plus the `YYYY-MM-DD-slug` filename.
pub fn note_path(base_dir: &Path, config: &Config, meta: &NoteMeta) -> PathBuf {
    base_dir
        .join(config.publication_dir(&meta.publication))
        .join(assemble::note_filename(meta))
}

pub fn write_note(path: &Path, content: &str, overwrite: bool) -> Result<WriteOutcome> {
    if path.exists() && !overwrite {
        return Ok(WriteOutcome::Skipped(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(WriteOutcome::Written(path.to_path_buf()))
}

/// Raw-HTML sidecar next to the note, same stem.
pub fn write_sidecar_html(note_path: &Path, html: &str) -> Result<()> {
    let path = note_path.with_extension("html");
    fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))
}

// ── Tests ──
