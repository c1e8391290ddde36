//! Run configuration, loaded from a single YAML file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

/// Pipeline configuration. Every field has a default so a missing config
/// file yields a fully usable setup rooted in the current directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding historical and normalized store files.
    pub data_dir: PathBuf,
    /// Directory scanned for incoming extract files.
    pub extracts_dir: PathBuf,
    /// Directory for the append-only run summary log.
    pub runs_dir: PathBuf,
    /// Prefer the Parquet format for store files; CSV is the fallback.
    pub prefer_parquet: bool,
    /// Salt for identifier hashing. Absent → built-in default, loudly flagged.
    pub hash_salt: Option<String>,
    /// Hand-curated program-name → code map (YAML), wins over observed data.
    pub authoritative_programs: Option<PathBuf>,
    /// Course identifiers to drop when the exclusion filter is requested,
    /// one per line.
    pub exclusion_list: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            extracts_dir: PathBuf::from("extracts"),
            runs_dir: PathBuf::from("runs"),
            prefer_parquet: true,
            hash_salt: None,
            authoritative_programs: None,
            exclusion_list: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or defaults if the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
