//! The queue-fetch driver.
//!
//! Pulls change batches from the feed, diffs them against the target, and
//! either delegates the fetches to the worker (remote source) or copies the
//! documents inline (embedded source). Every batch ends with a
//! `report_seq_done` carrying the stats it produced.

use crate::batch::{Append, Batch, BatchPolicy};
use crate::database::{ChangeFeed, Coordinator, Database, DbKind};
use crate::error::WorkerResult;
use crate::reader::fetch_docs;
use crate::worker::WorkerHandle;
use crate::writer::write_docs;
use docrep_protocol::{ChangeBatch, MissingRevs, ReplicationStats};
use tracing::{debug, info};

/// Driver task state for one replication session.
pub(crate) struct Driver<S, T, F, C> {
    source: S,
    target: T,
    feed: F,
    coordinator: C,
    policy: BatchPolicy,
}

impl<S, T, F, C> Driver<S, T, F, C>
where
    S: Database,
    T: Database,
    F: ChangeFeed,
    C: Coordinator,
{
    pub(crate) fn new(source: S, target: T, feed: F, coordinator: C, policy: BatchPolicy) -> Self {
        Self {
            source,
            target,
            feed,
            coordinator,
            policy,
        }
    }

    /// Runs until the feed is exhausted.
    pub(crate) async fn run(mut self, worker: WorkerHandle) -> WorkerResult<()> {
        let source = self.source.open().await?;
        let target = self.target.open().await?;
        let result = self.drive(&source, &target, &worker).await;
        source.close();
        target.close();
        result
    }

    async fn drive(&mut self, source: &S, target: &T, worker: &WorkerHandle) -> WorkerResult<()> {
        let mut batches = 0u64;
        while let Some(batch) = self.feed.next_batch().await? {
            batches += 1;
            debug!(
                token = %batch.token,
                changes = batch.changes.len(),
                "processing change batch"
            );

            let (missing, diff) = find_missing(target, &batch).await?;
            let stats = match source.kind() {
                DbKind::Network => remote_copy(worker, missing, diff).await?,
                DbKind::Embedded => local_copy(&self.policy, source, target, missing, diff).await?,
            };

            debug!(token = %batch.token, stats = ?stats, "change batch done");
            self.coordinator
                .report_seq_done(batch.token, stats)
                .await?;
        }

        info!(
            source_db = self.source.name(),
            target_db = self.target.name(),
            batches,
            "change feed exhausted"
        );
        Ok(())
    }
}

/// Copies the missing revisions inline, batching writes under `policy`.
async fn local_copy<S: Database, T: Database>(
    policy: &BatchPolicy,
    source: &S,
    target: &T,
    missing: Vec<MissingRevs>,
    mut stats: ReplicationStats,
) -> WorkerResult<ReplicationStats> {
    let mut batch = Batch::new(policy.clone());

    for entry in &missing {
        let docs = fetch_docs(source, entry).await?;
        stats += ReplicationStats::read(docs.len() as u64);

        for doc in docs {
            match batch.append(doc)? {
                Append::Buffered => {}
                Append::Flush(docs) => stats += write_docs(target, docs).await?,
                Append::Individual(doc) => stats += write_docs(target, vec![doc]).await?,
            }
        }
    }

    stats += write_docs(target, batch.take()).await?;
    Ok(stats)
}

/// Asks `target` which revisions of `batch` it lacks.
async fn find_missing<T: Database>(
    target: &T,
    batch: &ChangeBatch,
) -> WorkerResult<(Vec<MissingRevs>, ReplicationStats)> {
    if batch.changes.is_empty() {
        return Ok((Vec::new(), ReplicationStats::new()));
    }

    let checked = batch.revision_count() as u64;
    let missing = target.get_missing_revs(batch.revs_by_id()).await?;
    let found = missing.iter().map(|entry| entry.revs.len() as u64).sum();
    Ok((missing, ReplicationStats::missing(checked, found)))
}

/// Hands every missing revision to the worker and waits for the drain.
async fn remote_copy(
    worker: &WorkerHandle,
    missing: Vec<MissingRevs>,
    diff: ReplicationStats,
) -> WorkerResult<ReplicationStats> {
    worker.add_stats(diff).await?;
    for entry in &missing {
        for single in entry.per_revision() {
            worker.fetch(single).await?;
        }
    }
    worker.flush().await
}
