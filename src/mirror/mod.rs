//! Tabular → relational subscriber mirror.
//!
//! A run lists the whole tabular subscribers table (bounded), diffs it against
//! the replica by external record id, then applies inserts (one batch, fatal
//! on failure), updates (one by one, failures counted) and deletes (one batch,
//! failure logged). The replica converges to the source within one run.

pub mod poller;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::db::{DbError, ReplicaKey, SharedDb};
use crate::error::SupportError;
use crate::tabular::TabularSource;
use crate::types::Subscriber;

/// Write side of the replica, as seen by the mirror.
pub trait SubscriberReplica: Send + Sync {
    fn replica_keys(&self) -> Result<Vec<ReplicaKey>, DbError>;
    fn insert_batch(&self, batch: &[Subscriber]) -> Result<usize, DbError>;
    fn update_one(&self, subscriber: &Subscriber) -> Result<bool, DbError>;
    fn delete_batch(&self, external_ids: &[String]) -> Result<usize, DbError>;
}

impl SubscriberReplica for SharedDb {
    fn replica_keys(&self) -> Result<Vec<ReplicaKey>, DbError> {
        self.lock().replica_keys()
    }

    fn insert_batch(&self, batch: &[Subscriber]) -> Result<usize, DbError> {
        self.lock().insert_subscribers(batch)
    }

    fn update_one(&self, subscriber: &Subscriber) -> Result<bool, DbError> {
        self.lock().update_subscriber_by_external_id(subscriber)
    }

    fn delete_batch(&self, external_ids: &[String]) -> Result<usize, DbError> {
        self.lock().delete_subscribers_by_external_ids(external_ids)
    }
}

/// Counters reported by a mirror run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total_source: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed_updates: usize,
    /// The source listing hit its page ceiling; deletes were skipped.
    pub truncated: bool,
}

impl SyncStats {
    /// Some updates failed while the run itself completed.
    pub fn partial_failure(&self) -> Option<SupportError> {
        (self.failed_updates > 0).then(|| SupportError::ReconciliationPartialFailure {
            failed: self.failed_updates,
            attempted: self.updated + self.failed_updates,
        })
    }
}

fn source_key(subscriber: &Subscriber) -> &str {
    subscriber
        .external_record_id
        .as_deref()
        .unwrap_or(&subscriber.id)
}

/// What a run will do, computed before any write.
#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    pub to_insert: Vec<Subscriber>,
    pub to_update: Vec<Subscriber>,
    /// External ids present in the replica and absent from the source.
    pub to_delete: Vec<String>,
    pub duplicates: usize,
}

impl ReconciliationPlan {
    /// Partition `source` against the replica keys. Duplicate source ids keep
    /// their first occurrence. Replica rows without an external id are never
    /// scheduled for deletion.
    pub fn compute(source: Vec<Subscriber>, existing: &[ReplicaKey]) -> Self {
        let existing_ids: HashSet<&str> = existing
            .iter()
            .filter_map(|k| k.external_record_id.as_deref())
            .collect();

        let mut plan = ReconciliationPlan::default();
        let mut seen: HashSet<String> = HashSet::new();

        for subscriber in source {
            let key = source_key(&subscriber).to_string();
            if !seen.insert(key.clone()) {
                plan.duplicates += 1;
                continue;
            }
            if existing_ids.contains(key.as_str()) {
                plan.to_update.push(subscriber);
            } else {
                plan.to_insert.push(subscriber);
            }
        }

        let mut to_delete: Vec<String> = existing_ids
            .into_iter()
            .filter(|id| !seen.contains(*id))
            .map(String::from)
            .collect();
        to_delete.sort();
        plan.to_delete = to_delete;

        plan
    }
}

pub struct RelationalMirror {
    source: Arc<dyn TabularSource>,
    replica: Arc<dyn SubscriberReplica>,
    run_lock: tokio::sync::Mutex<()>,
}

impl RelationalMirror {
    pub fn new(source: Arc<dyn TabularSource>, replica: Arc<dyn SubscriberReplica>) -> Self {
        Self {
            source,
            replica,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one reconciliation. Concurrent callers queue behind the running one.
    ///
    /// Errors only when nothing could be applied: the source listing failed,
    /// the replica could not be read, or the insert batch failed.
    pub async fn sync(&self) -> Result<SyncStats, SupportError> {
        let _running = self.run_lock.lock().await;
        log::info!("Mirror: run started");

        let listing = self.source.fetch_subscribers().await.map_err(|e| {
            log::error!("Mirror: source listing failed, replica untouched: {}", e);
            SupportError::from(e)
        })?;
        let total_source = listing.subscribers.len();

        let existing = self.replica.replica_keys()?;
        let plan = ReconciliationPlan::compute(listing.subscribers, &existing);
        if plan.duplicates > 0 {
            log::warn!("Mirror: {} duplicate source records ignored", plan.duplicates);
        }

        let inserted = self.replica.insert_batch(&plan.to_insert).map_err(|e| {
            log::error!("Mirror: insert batch of {} failed: {}", plan.to_insert.len(), e);
            SupportError::from(e)
        })?;

        let mut updated = 0;
        let mut failed_updates = 0;
        for subscriber in &plan.to_update {
            match self.replica.update_one(subscriber) {
                Ok(true) => updated += 1,
                Ok(false) => {
                    failed_updates += 1;
                    log::warn!("Mirror: replica row {} vanished before update", source_key(subscriber));
                }
                Err(e) => {
                    failed_updates += 1;
                    log::warn!("Mirror: update of {} failed: {}", source_key(subscriber), e);
                }
            }
        }

        let deleted = if listing.truncated {
            log::warn!(
                "Mirror: source listing truncated, skipping {} deletes",
                plan.to_delete.len()
            );
            0
        } else {
            match self.replica.delete_batch(&plan.to_delete) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("Mirror: delete batch of {} failed: {}", plan.to_delete.len(), e);
                    0
                }
            }
        };

        let stats = SyncStats {
            total_source,
            inserted,
            updated,
            deleted,
            failed_updates,
            truncated: listing.truncated,
        };
        log::info!(
            "Mirror: run finished ({} in source, {} inserted, {} updated, {} deleted, {} failed updates)",
            stats.total_source,
            stats.inserted,
            stats.updated,
            stats.deleted,
            stats.failed_updates
        );
        Ok(stats)
    }
}
