//! CLI argument parsing with clap.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::classifier::TokenFilter;
use crate::config::Config;
use crate::report::ReportFormat;
use crate::store::JournalMode;

#[derive(Parser, Debug)]
#[command(name = "autoblockip")]
#[command(
    author,
    version,
    about = "Fill the Synology AutoBlock deny-list from IP block-lists"
)]
pub struct Cli {
    /// Local list file(s) containing IPs or CIDR networks
    #[arg(short = 'f', long = "in-file", num_args = 1..)]
    pub in_file: Vec<PathBuf>,

    /// URL(s) of remote lists containing IPs or CIDR networks
    #[arg(short = 'u', long = "in-url", num_args = 1..)]
    pub in_url: Vec<String>,

    /// Number of days before added entries expire (0 = never)
    #[arg(short, long)]
    pub expire_in_day: Option<u32>,

    /// Remove expired entries before filling
    #[arg(long)]
    pub remove_expired: bool,

    /// Folder receiving a copy of the database before any change
    #[arg(short, long)]
    pub backup_to: Option<PathBuf>,

    /// Remove every deny entry before filling (requires --backup-to)
    #[arg(long)]
    pub clear_db: bool,

    /// Parse the lists and report without modifying the database
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum rows removed per committed batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Turn off SQLite journaling (faster, unsafe on crash)
    #[arg(long)]
    pub disable_journaling: bool,

    /// Verbose mode (debug output)
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (for cron/task scheduler)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Location of the Synology AutoBlock database
    #[arg(long)]
    pub db_location: Option<PathBuf>,

    /// Smallest IPv4 prefix expanded into addresses (24 = 256 addresses max)
    #[arg(long, value_parser = clap::value_parser!(u8).range(16..=32))]
    pub min_cidr_prefix: Option<u8>,

    /// Smallest IPv6 prefix expanded into addresses
    #[arg(long, value_parser = clap::value_parser!(u8).range(112..=128))]
    pub min_cidr_prefix_v6: Option<u8>,

    /// Only consider tokens containing a dot (skips IPv6 lists)
    #[arg(long)]
    pub legacy_dot_filter: bool,

    /// Lock file held while the database is modified
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl Cli {
    /// Build the effective configuration: the config file (if any),
    /// overridden by explicit flags.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    fn apply_to(&self, config: &mut Config) {
        config.files.extend(self.in_file.iter().cloned());
        config.urls.extend(self.in_url.iter().cloned());

        if let Some(days) = self.expire_in_day {
            config.expire_in_day = days;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(ref db) = self.db_location {
            config.db_location = db.clone();
        }
        if let Some(prefix) = self.min_cidr_prefix {
            config.min_cidr_prefix = prefix;
        }
        if let Some(prefix) = self.min_cidr_prefix_v6 {
            config.min_cidr_prefix_v6 = prefix;
        }
        if let Some(ref lock) = self.lock_file {
            config.lock_file = lock.clone();
        }
        if let Some(ref folder) = self.backup_to {
            config.backup_to = Some(folder.clone());
        }

        config.remove_expired |= self.remove_expired;
        config.clear_db |= self.clear_db;
        if self.disable_journaling {
            config.journal_mode = JournalMode::Off;
        }
        if self.legacy_dot_filter {
            config.token_filter = TokenFilter::Dotted;
        }
    }

    pub fn report_format(&self) -> Result<ReportFormat> {
        self.format.parse().map_err(|e: String| anyhow::anyhow!(e))
    }
}
