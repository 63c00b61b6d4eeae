//! Reconciliation of classified block-lists with the deny-list store.
//!
//! Order of operations:
//!
//! 1. classify every token of every line
//! 2. optional expire sweep, optional clear-all (batched deletes)
//! 3. count denied rows
//! 4. upsert single addresses as one batch
//! 5. upsert each admitted network as its own batch, smallest first
//! 6. count denied rows again
//!
//! Token-level problems never stop a run. A store failure stops the remaining
//! mutations but the classification counts are still reported.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batch::{delete_where, BatchOutcome};
use crate::cidr::expand;
use crate::classifier::{Classification, ClassificationTally, Classifier};
use crate::error::AutoBlockError;
use crate::store::{DeletePredicate, DenyStore};
use crate::utils::format_count;

/// Knobs for one reconciliation run.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub remove_expired: bool,
    pub clear_all: bool,
    pub batch_size: usize,
    pub dry_run: bool,
    /// Reference time for the expire sweep (epoch seconds)
    pub now: i64,
}

/// Everything a run did, for the final report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub single_addresses: usize,
    pub admitted_networks: usize,
    #[serde(flatten)]
    pub tally: ClassificationTally,
    /// Invalid tokens, sorted
    pub invalid: Vec<String>,
    pub store_available: bool,
    pub dry_run: bool,
    pub expired_removed: Option<BatchOutcome>,
    pub cleared: Option<BatchOutcome>,
    pub denied_before: Option<u64>,
    pub denied_after: Option<u64>,
    pub applied_addresses: u128,
    pub applied_networks: usize,
    pub skipped_networks: usize,
    pub skipped_addresses: u128,
    pub failure: Option<String>,
}

impl Summary {
    fn from_classification(classification: &Classification, dry_run: bool) -> Self {
        Self {
            single_addresses: classification.singles.len(),
            admitted_networks: classification.networks.len(),
            tally: classification.tally.clone(),
            invalid: classification.invalid.iter().cloned().collect(),
            dry_run,
            ..Self::default()
        }
    }

    /// Addresses parsed from the lists that a full run would apply.
    pub fn total_to_apply(&self) -> u128 {
        (self.single_addresses as u128).saturating_add(self.tally.admitted_addresses)
    }

    /// Net change of the denied row count, when both counts are known.
    pub fn net_change(&self) -> Option<i128> {
        match (self.denied_before, self.denied_after) {
            (Some(before), Some(after)) => Some(after as i128 - before as i128),
            _ => None,
        }
    }
}

/// Drives classification and store mutation for one run.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    classifier: Classifier,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(classifier: Classifier, options: ReconcileOptions) -> Self {
        Self {
            classifier,
            options,
        }
    }

    /// Classify `lines` and apply them to `store`.
    ///
    /// With no store (missing or unreadable database) only the classification
    /// is performed and reported.
    pub fn run<I, S>(&self, lines: I, store: Option<&mut dyn DenyStore>) -> Summary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classification = self.classifier.classify(lines);
        self.apply(&classification, store)
    }

    /// Apply an existing classification to `store`.
    pub fn apply(
        &self,
        classification: &Classification,
        store: Option<&mut dyn DenyStore>,
    ) -> Summary {
        let mut summary = Summary::from_classification(classification, self.options.dry_run);
        summary.store_available = store.is_some();
        log_classification(&summary);

        if classification.is_empty() {
            info!("No IP found in list");
            return summary;
        }

        let Some(store) = store else {
            warn!("No database access. No changes were made to the database");
            return summary;
        };

        if let Err(e) = self.mutate(classification, store, &mut summary) {
            error!("{}", e);
            summary.failure = Some(e.to_string());
        }

        match store.count_denied() {
            Ok(after) => {
                summary.denied_after = Some(after);
                if let Some(change) = summary.net_change() {
                    info!(
                        "Total deny IP now in the database: {} ({} added)",
                        format_count(after as u128),
                        change
                    );
                }
            }
            Err(e) => warn!("Unable to count deny entries: {}", e),
        }

        if self.options.dry_run {
            info!("Dry run mode. No changes were made to the database");
        }

        summary
    }

    fn mutate(
        &self,
        classification: &Classification,
        store: &mut dyn DenyStore,
        summary: &mut Summary,
    ) -> Result<(), AutoBlockError> {
        let opts = &self.options;

        if !opts.dry_run {
            let mut swept = 0;

            if opts.remove_expired {
                let outcome = delete_where(
                    store,
                    DeletePredicate::Expired { now: opts.now },
                    opts.batch_size,
                )?;
                info!(
                    "Removed {} expired entries in {} batches",
                    format_count(outcome.rows_deleted as u128),
                    outcome.batches
                );
                swept += outcome.rows_deleted;
                summary.expired_removed = Some(outcome);
            }

            if opts.clear_all {
                let outcome = delete_where(store, DeletePredicate::AllDenied, opts.batch_size)?;
                info!(
                    "Removed all {} deny entries in {} batches",
                    format_count(outcome.rows_deleted as u128),
                    outcome.batches
                );
                swept += outcome.rows_deleted;
                summary.cleared = Some(outcome);
            }

            if swept > 0 {
                debug!("Compacting database after removing {} rows", swept);
                store.compact()?;
            }
        }

        let before = store.count_denied()?;
        summary.denied_before = Some(before);
        info!(
            "Total deny IP currently in the database: {}",
            format_count(before as u128)
        );

        if opts.dry_run {
            return Ok(());
        }

        let singles = classification.single_records();
        if !singles.is_empty() {
            info!(
                "Adding {} IPs to the database from simple IP lists",
                format_count(singles.len() as u128)
            );
            if let Err(e) = store.upsert(&singles) {
                summary.skipped_networks = classification.networks.len();
                summary.skipped_addresses = summary.total_to_apply();
                return Err(AutoBlockError::BatchOperationFailed(format!(
                    "Error adding single IPs to the database: {}",
                    e
                )));
            }
            summary.applied_addresses += singles.len() as u128;
        }

        if !classification.networks.is_empty() {
            info!(
                "Adding {} IPs to the database from {} CIDR networks",
                format_count(classification.tally.admitted_addresses),
                classification.networks.len()
            );
        }

        for (i, entry) in classification.networks.iter().enumerate() {
            // Materialize one network at a time; the admission cutoff bounds its size
            let records: Vec<_> = expand(&entry.network, self.classifier.expire_at).collect();
            if records.is_empty() {
                continue;
            }
            match store.upsert(&records) {
                Ok(applied) => {
                    debug!("Added {} IPs from {}", applied, entry.network);
                    summary.applied_addresses += applied as u128;
                    summary.applied_networks += 1;
                }
                Err(e) => {
                    summary.skipped_networks = classification.networks.len() - i;
                    summary.skipped_addresses = summary
                        .total_to_apply()
                        .saturating_sub(summary.applied_addresses);
                    error!(
                        "Remaining {} CIDR networks and {} IPs will not be added to the database",
                        summary.skipped_networks,
                        format_count(summary.skipped_addresses)
                    );
                    return Err(AutoBlockError::BatchOperationFailed(format!(
                        "Error adding CIDR {} to the database: {}",
                        entry.network, e
                    )));
                }
            }
        }

        Ok(())
    }
}

fn log_classification(summary: &Summary) {
    let tally = &summary.tally;
    info!(
        "IPs parsed from lists to be added: {}",
        format_count(summary.single_addresses as u128)
    );
    info!("Total CIDR networks: {}", summary.admitted_networks);
    info!(
        "Total IP in CIDR networks: {}",
        format_count(tally.admitted_addresses)
    );
    if tally.rejected_networks > 0 {
        info!(
            "Skipped {} CIDR networks with {} IPs due to being too large to process",
            tally.rejected_networks,
            format_count(tally.rejected_addresses)
        );
    }
    info!("Total IP invalid: {}", tally.invalid_tokens);
    info!(
        "Total potential IP: {}",
        format_count(summary.total_to_apply())
    );
}
