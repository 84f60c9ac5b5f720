use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const BASE_DIR_ENV: &str = "STACKDOWN_BASE_DIR";
pub const CONFIG_ENV: &str = "STACKDOWN_CONFIG";
const DEFAULT_BASE_DIR: &str = "~/Documents/substack-notes";

/// User configuration: vault location and publication → directory mappings.
/// Loaded from `config.yaml`; everything else arrives via CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_dir: Option<String>,
    pub publication_mappings: BTreeMap<String, String>,
}

impl Config {
    /// Load from the explicit path, then `STACKDOWN_CONFIG`, then
    /// `./config.yaml`. A missing implicit file is fine; a missing explicit
    /// one is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config.yaml"));
        if !path.exists() {
            if explicit.is_some() {
                bail!("config file not found: {}", path.display());
            }
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// CLI flag beats `STACKDOWN_BASE_DIR` beats the config file beats the
    /// built-in default.
    pub fn resolve_base_dir(&self, cli: Option<&Path>) -> PathBuf {
        if let Some(dir) = cli {
            return expand_tilde(dir);
        }
        if let Ok(dir) = env::var(BASE_DIR_ENV) {
            if !dir.is_empty() {
                return expand_tilde(Path::new(&dir));
            }
        }
        let configured = self.base_dir.as_deref().unwrap_or(DEFAULT_BASE_DIR);
        expand_tilde(Path::new(configured))
    }

    /// Directory name for a publication: the configured mapping, or a
    /// title-cased form of the publication identifier.
    pub fn publication_dir(&self, publication: &str) -> String {
        if let Some(mapped) = self.publication_mappings.get(publication) {
            return mapped.clone();
        }
        title_case(publication).replace(' ', "_")
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_wins_over_title_case() {
        let config = Config {
            base_dir: None,
            publication_mappings: [("daveshap".to_string(), "David_Shapiro".to_string())]
                .into_iter()
                .collect(),
        };
        assert_eq!(config.publication_dir("daveshap"), "David_Shapiro");
    }

    #[test]
    fn unmapped_publication_title_cases() {
        let config = Config::default();
        assert_eq!(config.publication_dir("daveshap"), "Daveshap");
        assert_eq!(config.publication_dir("nate-silver"), "Nate-Silver");
    }

    #[test]
    fn config_parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "base_dir: /tmp/notes\npublication_mappings:\n  daveshap: David_Shapiro\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.base_dir.as_deref(), Some("/tmp/notes"));
        assert_eq!(config.publication_dir("daveshap"), "David_Shapiro");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
    }

    #[test]
    fn cli_base_dir_wins() {
        let config = Config {
            base_dir: Some("/from/config".to_string()),
            publication_mappings: BTreeMap::new(),
        };
        assert_eq!(
            config.resolve_base_dir(Some(Path::new("/from/cli"))),
            PathBuf::from("/from/cli")
        );
    }
}
