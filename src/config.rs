//! Configuration management for autoblockip.
//!
//! Settings come from an optional YAML file; command-line flags override
//! whatever the file sets.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::{TokenFilter, DEFAULT_MIN_CIDR_PREFIX_V6};
use crate::record::NEVER_EXPIRES;
use crate::store::JournalMode;

/// Default location of the AutoBlock database on DSM 6 and 7.
pub const DEFAULT_DB_LOCATION: &str = "/etc/synoautoblock.db";
pub const DEFAULT_LOCK_FILE: &str = "/var/run/autoblockip.lock";
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
/// Only networks of 256 addresses or less are expanded by default.
pub const DEFAULT_MIN_CIDR_PREFIX: u8 = 24;
/// Lowest accepted thresholds: an admitted network expands to at most
/// 65536 addresses, held in memory while it is written.
pub const LOWEST_MIN_CIDR_PREFIX: u8 = 16;
pub const LOWEST_MIN_CIDR_PREFIX_V6: u8 = 112;

const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Location of the Synology AutoBlock database
    pub db_location: PathBuf,

    /// Lock file held while the database is modified
    pub lock_file: PathBuf,

    /// Maximum rows removed per committed batch
    pub batch_size: usize,

    /// Smallest prefix length expanded into individual addresses
    pub min_cidr_prefix: u8,

    /// Same threshold for IPv6 networks
    pub min_cidr_prefix_v6: u8,

    /// Expiry of added entries in days (0 = never)
    pub expire_in_day: u32,

    /// Token pre-check before parsing
    pub token_filter: TokenFilter,

    /// Journal mode while modifying the database
    pub journal_mode: JournalMode,

    /// Remove expired entries before filling
    pub remove_expired: bool,

    /// Clear every deny entry before filling
    pub clear_db: bool,

    /// Folder receiving a copy of the database before any change
    pub backup_to: Option<PathBuf>,

    /// Local list files
    pub files: Vec<PathBuf>,

    /// Remote list URLs
    pub urls: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_location: PathBuf::from(DEFAULT_DB_LOCATION),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            batch_size: DEFAULT_BATCH_SIZE,
            min_cidr_prefix: DEFAULT_MIN_CIDR_PREFIX,
            min_cidr_prefix_v6: DEFAULT_MIN_CIDR_PREFIX_V6,
            expire_in_day: 0,
            token_filter: TokenFilter::default(),
            journal_mode: JournalMode::default(),
            remove_expired: false,
            clear_db: false,
            backup_to: None,
            files: Vec::new(),
            urls: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() && self.urls.is_empty() {
            anyhow::bail!("At least one source list is mandatory (file or url)");
        }

        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if !(LOWEST_MIN_CIDR_PREFIX..=32).contains(&self.min_cidr_prefix) {
            anyhow::bail!(
                "Invalid min_cidr_prefix {}: must be between {} and 32",
                self.min_cidr_prefix,
                LOWEST_MIN_CIDR_PREFIX
            );
        }

        if !(LOWEST_MIN_CIDR_PREFIX_V6..=128).contains(&self.min_cidr_prefix_v6) {
            anyhow::bail!(
                "Invalid min_cidr_prefix_v6 {}: must be between {} and 128",
                self.min_cidr_prefix_v6,
                LOWEST_MIN_CIDR_PREFIX_V6
            );
        }

        for url in &self.urls {
            validate_url(url)?;
        }

        if self.clear_db && self.backup_to.is_none() {
            anyhow::bail!("A backup folder must be set to clear the database");
        }

        if let Some(ref folder) = self.backup_to {
            validate_backup_folder(folder)?;
        }

        Ok(())
    }

    /// Absolute expiry for records added now (0 when entries never expire).
    pub fn expire_at(&self, now: i64) -> i64 {
        if self.expire_in_day == 0 {
            NEVER_EXPIRES
        } else {
            now.saturating_add(i64::from(self.expire_in_day) * SECONDS_PER_DAY)
        }
    }
}

/// Source URLs must be absolute http(s) URLs with a host.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid list URL: {}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        anyhow::bail!("List URL must use http or https: {}", url);
    }
    Ok(())
}

fn validate_backup_folder(folder: &Path) -> Result<()> {
    let metadata = std::fs::metadata(folder)
        .with_context(|| format!("\"{}\" is not a valid path.", folder.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("\"{}\" is not a valid path.", folder.display());
    }
    if metadata.permissions().readonly() {
        anyhow::bail!("\"{}\" is not writable.", folder.display());
    }
    Ok(())
}
