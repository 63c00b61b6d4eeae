//! Fill command: load the lists and reconcile them into the AutoBlock database.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::backup::backup_database;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::lock::LockGuard;
use crate::reconcile::{ReconcileOptions, Reconciler, Summary};
use crate::store::{DenyStore, JournalMode, SqliteStore};

/// Outcome of one fill run
#[derive(Debug)]
pub struct FillOutcome {
    pub summary: Summary,
    pub elapsed_seconds: f64,
}

impl FillOutcome {
    /// Whether the run should end with a failure exit status.
    pub fn is_failure(&self) -> bool {
        self.summary.failure.is_some()
            || (!self.summary.dry_run && !self.summary.store_available)
    }
}

/// Run the fill command
pub async fn run(config: &Config, dry_run: bool) -> Result<FillOutcome> {
    let started = Instant::now();
    config.validate()?;

    // Only one run may modify the database at a time
    let _lock = if dry_run {
        None
    } else {
        Some(LockGuard::acquire(&config.lock_file)?)
    };

    if let Some(ref folder) = config.backup_to {
        if config.db_location.is_file() {
            backup_database(&config.db_location, folder, Local::now())
                .context("Backup failed, database left untouched")?;
        } else {
            warn!(
                "Database {} not found, nothing to back up",
                config.db_location.display()
            );
        }
    }

    let now = Utc::now().timestamp();
    let expire_at = config.expire_at(now);
    debug!("Entries expire at {} (0 = never)", expire_at);

    let fetcher = Fetcher::new()?;
    let lines = fetcher.load_all(&config.files, &config.urls).await?;

    let mut store = open_store(config, dry_run);

    let classifier = Classifier::new(config.min_cidr_prefix, expire_at, config.token_filter)
        .with_min_prefix_v6(config.min_cidr_prefix_v6);
    let reconciler = Reconciler::new(
        classifier,
        ReconcileOptions {
            remove_expired: config.remove_expired,
            clear_all: config.clear_db,
            batch_size: config.batch_size,
            dry_run,
            now,
        },
    );

    let summary = reconciler.run(
        &lines,
        store.as_mut().map(|s| s as &mut dyn DenyStore),
    );

    Ok(FillOutcome {
        summary,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

fn open_store(config: &Config, dry_run: bool) -> Option<SqliteStore> {
    let opened = if dry_run {
        SqliteStore::open_read_only(&config.db_location)
    } else {
        SqliteStore::open(&config.db_location)
    };

    let store = match opened {
        Ok(store) => store,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };

    if !dry_run {
        if config.journal_mode == JournalMode::Off {
            warn!("Journaling disabled: a crash during the update may corrupt the database");
        }
        if let Err(e) = store.set_journal_mode(config.journal_mode) {
            warn!("Unable to set journal mode: {}", e);
        }
    }

    info!("Using AutoBlock database {}", store.path().display());
    Some(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup(dir: &Path, list: &str) -> Config {
        let db = dir.join("synoautoblock.db");
        SqliteStore::create(&db).unwrap();
        let file = dir.join("list.txt");
        std::fs::write(&file, list).unwrap();
        Config {
            db_location: db,
            lock_file: dir.join("autoblockip.lock"),
            files: vec![file],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_fill_writes_database() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), "83.222.191.62\n10.0.0.0/30\n1.10.16.0/16\n");

        let outcome = run(&config, false).await.unwrap();
        assert!(!outcome.is_failure());
        assert_eq!(outcome.summary.applied_addresses, 5);
        assert_eq!(outcome.summary.tally.rejected_networks, 1);
        assert_eq!(outcome.summary.denied_after, Some(5));

        let store = SqliteStore::open(&config.db_location).unwrap();
        assert_eq!(store.count_denied().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fill_dry_run_leaves_database() {
        let dir = TempDir::new().unwrap();
        let config = setup(dir.path(), "83.222.191.62\n");

        let outcome = run(&config, true).await.unwrap();
        assert!(!outcome.is_failure());
        assert_eq!(outcome.summary.single_addresses, 1);
        assert_eq!(outcome.summary.applied_addresses, 0);

        let store = SqliteStore::open(&config.db_location).unwrap();
        assert_eq!(store.count_denied().unwrap(), 0);
        assert!(!config.lock_file.exists());
    }

    #[tokio::test]
    async fn test_fill_missing_database_reports_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), "83.222.191.62\n");
        config.db_location = dir.path().join("missing.db");

        let outcome = run(&config, false).await.unwrap();
        assert!(!outcome.summary.store_available);
        assert_eq!(outcome.summary.single_addresses, 1);
        assert!(outcome.is_failure());
        assert!(!config.db_location.exists());
    }

    #[tokio::test]
    async fn test_fill_backs_up_before_clearing() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), "83.222.191.62\n");
        let backups = dir.path().join("backups");
        std::fs::create_dir(&backups).unwrap();
        config.backup_to = Some(backups.clone());
        config.clear_db = true;

        {
            let store = SqliteStore::open(&config.db_location).unwrap();
            store.insert_raw("1.1.1.1", 0, true).unwrap();
        }

        let outcome = run(&config, false).await.unwrap();
        assert_eq!(outcome.summary.cleared.map(|c| c.rows_deleted), Some(1));
        assert_eq!(outcome.summary.denied_after, Some(1));

        let copies: Vec<_> = std::fs::read_dir(&backups).unwrap().collect();
        assert_eq!(copies.len(), 1);
        let copy = SqliteStore::open(copies[0].as_ref().unwrap().path()).unwrap();
        assert!(copy.get("1.1.1.1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fill_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), "");
        config.files.clear();
        assert!(run(&config, false).await.is_err());
    }

    #[tokio::test]
    async fn test_fill_missing_list_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(dir.path(), "");
        config.files = vec![dir.path().join("nope.txt")];
        assert!(run(&config, false).await.is_err());
    }
}
