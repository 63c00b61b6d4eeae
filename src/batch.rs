//! Bounded-size deletes against the deny-list.
//!
//! A sweep over millions of rows is split into deletes of at most
//! `batch_size` rows, each committed on its own. The sweep ends on the first
//! batch that deletes nothing. An interrupted sweep leaves only whole batches
//! behind, so running it again simply picks up the remaining rows.

use serde::Serialize;
use tracing::debug;

use crate::error::{AutoBlockError, Result};
use crate::store::{DeletePredicate, DenyStore};

/// Result of a completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Batches that deleted at least one row
    pub batches: usize,
    pub rows_deleted: u64,
}

/// Delete every row matching `predicate`, `batch_size` rows at a time.
///
/// A store error aborts the sweep with [`AutoBlockError::BatchOperationFailed`];
/// batches committed before the failure stay deleted.
pub fn delete_where(
    store: &mut dyn DenyStore,
    predicate: DeletePredicate,
    batch_size: usize,
) -> Result<BatchOutcome> {
    let limit = batch_size.max(1);
    let mut outcome = BatchOutcome::default();

    loop {
        let deleted = store.delete_batch(predicate, limit).map_err(|e| {
            AutoBlockError::BatchOperationFailed(format!(
                "delete batch {} ({:?}) after {} rows: {}",
                outcome.batches + 1,
                predicate,
                outcome.rows_deleted,
                e
            ))
        })?;
        if deleted == 0 {
            break;
        }
        outcome.batches += 1;
        outcome.rows_deleted += deleted as u64;
        debug!(
            "Batch {}: deleted {} rows ({} total)",
            outcome.batches, deleted, outcome.rows_deleted
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AddressRecord;
    use crate::store::{MockDenyStore, SqliteStore};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn fill(store: &mut SqliteStore, count: usize) {
        let records: Vec<AddressRecord> = (0..count as u32)
            .map(|i| AddressRecord::from_addr(std::net::Ipv4Addr::from(0x0A00_0000 + i).into(), 0))
            .collect();
        store.upsert(&records).unwrap();
    }

    #[test]
    fn test_delete_where_clears_everything() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        fill(&mut store, 25);

        let outcome = delete_where(&mut store, DeletePredicate::AllDenied, 10).unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.rows_deleted, 25);
        assert_eq!(store.count_denied().unwrap(), 0);
    }

    #[test]
    fn test_delete_where_exact_multiple() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        fill(&mut store, 20);

        let outcome = delete_where(&mut store, DeletePredicate::AllDenied, 10).unwrap();
        assert_eq!(outcome.batches, 2);
        assert_eq!(outcome.rows_deleted, 20);
    }

    #[test]
    fn test_delete_where_nothing_to_do() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let outcome = delete_where(&mut store, DeletePredicate::Expired { now: 100 }, 10).unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[test]
    fn test_delete_where_issues_ceil_plus_one_calls() {
        // 7 rows, batch size 3: 3 + 3 + 1 then a zero batch
        let mut store = MockDenyStore::new();
        let mut seq = Sequence::new();
        for deleted in [3usize, 3, 1, 0] {
            store
                .expect_delete_batch()
                .with(eq(DeletePredicate::AllDenied), eq(3))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(deleted));
        }

        let outcome = delete_where(&mut store, DeletePredicate::AllDenied, 3).unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.rows_deleted, 7);
    }

    #[test]
    fn test_delete_where_zero_batch_size_still_progresses() {
        let mut store = MockDenyStore::new();
        let mut seq = Sequence::new();
        store
            .expect_delete_batch()
            .with(eq(DeletePredicate::AllDenied), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(1));
        store
            .expect_delete_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(0));

        let outcome = delete_where(&mut store, DeletePredicate::AllDenied, 0).unwrap();
        assert_eq!(outcome.rows_deleted, 1);
    }

    #[test]
    fn test_delete_where_failure_keeps_committed_batches() {
        let mut store = MockDenyStore::new();
        let mut seq = Sequence::new();
        store
            .expect_delete_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(5));
        store
            .expect_delete_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(AutoBlockError::Store(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                    Some("database or disk is full".to_string()),
                )))
            });

        let err = delete_where(&mut store, DeletePredicate::Expired { now: 1 }, 5).unwrap_err();
        match err {
            AutoBlockError::BatchOperationFailed(msg) => {
                assert!(msg.contains("after 5 rows"), "unexpected message: {}", msg)
            }
            other => panic!("Expected BatchOperationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_where_resumes_after_interruption() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        fill(&mut store, 12);
        // Simulate a run killed after one batch
        store.delete_batch(DeletePredicate::AllDenied, 5).unwrap();
        assert_eq!(store.count_denied().unwrap(), 7);

        let outcome = delete_where(&mut store, DeletePredicate::AllDenied, 5).unwrap();
        assert_eq!(outcome.rows_deleted, 7);
        assert_eq!(store.count_denied().unwrap(), 0);
    }
}
