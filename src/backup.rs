//! Database backup before modification.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::utils::format_bytes;

const BACKUP_SUFFIX: &str = "_backup_synoautoblock.db";

/// File name of a backup taken at `at`.
pub fn backup_file_name(at: DateTime<Local>) -> String {
    format!("{}{}", at.format("%Y%m%d_%H%M%S"), BACKUP_SUFFIX)
}

/// Copy `db` into `folder`, returning the path of the copy.
pub fn backup_database(db: &Path, folder: &Path, at: DateTime<Local>) -> Result<PathBuf> {
    let target = folder.join(backup_file_name(at));
    let bytes = fs::copy(db, &target).with_context(|| {
        format!(
            "Failed to back up {} to {}",
            db.display(),
            target.display()
        )
    })?;
    info!(
        "Database successfully backed up to {} ({})",
        target.display(),
        format_bytes(bytes)
    );
    Ok(target)
}
