//! In-memory collaborators for testing and embedding.

use crate::database::{
    ChangeFeed, Coordinator, Database, DbKind, DocRejection, OpenDocOptions, OpenRevResult,
    UpdateOptions,
};
use crate::error::{DbError, DbResult, WorkerError, WorkerResult};
use docrep_protocol::{ChangeBatch, Document, MissingRevs, ReplicationStats, ReportToken, Revision};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryInner {
    docs: RwLock<BTreeMap<String, BTreeMap<Revision, Document>>>,
    read_delay: RwLock<Option<Duration>>,
    write_delay: RwLock<Option<Duration>>,
    read_failure: RwLock<Option<String>>,
    write_failure: RwLock<Option<String>>,
    write_rejection: RwLock<Option<String>>,
    rejected_ids: RwLock<HashSet<String>>,
    write_log: Mutex<Vec<usize>>,
    opens: AtomicUsize,
    active_reads: AtomicUsize,
    max_active_reads: AtomicUsize,
}

/// An in-memory database holding every revision it has seen.
///
/// Clones share storage. Failure injection and instrumentation hooks make
/// it usable as a test double for both sources and targets.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    kind: DbKind,
    inner: Arc<MemoryInner>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new(name: impl Into<String>, kind: DbKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inner: Arc::new(MemoryInner::default()),
        }
    }

    /// Stores a document revision.
    pub fn put(&self, doc: Document) {
        self.inner
            .docs
            .write()
            .entry(doc.id.clone())
            .or_default()
            .insert(doc.rev.clone(), doc);
    }

    /// Returns true if the database holds any revision of `id`.
    pub fn has_doc(&self, id: &str) -> bool {
        self.inner.docs.read().contains_key(id)
    }

    /// Returns true if the database holds `rev` of `id`.
    pub fn has_rev(&self, id: &str, rev: &Revision) -> bool {
        self.inner
            .docs
            .read()
            .get(id)
            .map_or(false, |revs| revs.contains_key(rev))
    }

    /// Total number of stored revisions.
    pub fn revision_count(&self) -> usize {
        self.inner.docs.read().values().map(BTreeMap::len).sum()
    }

    /// Delays every read by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.inner.read_delay.write() = Some(delay);
    }

    /// Makes every read fail as unavailable.
    pub fn fail_reads(&self, message: impl Into<String>) {
        *self.inner.read_failure.write() = Some(message.into());
    }

    /// Delays every write by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.inner.write_delay.write() = Some(delay);
    }

    /// Makes every write fail as unavailable.
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.inner.write_failure.write() = Some(message.into());
    }

    /// Answers every write with a structured error for the whole call.
    pub fn reject_writes(&self, reason: impl Into<String>) {
        *self.inner.write_rejection.write() = Some(reason.into());
    }

    /// Refuses writes of the given document while accepting the rest.
    pub fn reject_doc(&self, id: impl Into<String>) {
        self.inner.rejected_ids.write().insert(id.into());
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        *self.inner.read_failure.write() = None;
        *self.inner.write_failure.write() = None;
        *self.inner.write_rejection.write() = None;
        self.inner.rejected_ids.write().clear();
    }

    /// Document count of every write call, in call order.
    pub fn write_log(&self) -> Vec<usize> {
        self.inner.write_log.lock().clone()
    }

    /// Number of handles opened through [`Database::open`].
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Highest number of reads that were in flight at once.
    pub fn max_concurrent_reads(&self) -> usize {
        self.inner.max_active_reads.load(Ordering::SeqCst)
    }
}

struct ReadGuard<'a>(&'a AtomicUsize);

impl<'a> ReadGuard<'a> {
    fn enter(inner: &'a MemoryInner) -> Self {
        let active = inner.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active_reads.fetch_max(active, Ordering::SeqCst);
        Self(&inner.active_reads)
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DbKind {
        self.kind
    }

    async fn open(&self) -> DbResult<Self> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }

    async fn get_missing_revs(
        &self,
        revs: Vec<(String, Vec<Revision>)>,
    ) -> DbResult<Vec<MissingRevs>> {
        let docs = self.inner.docs.read();
        let mut missing = Vec::new();

        for (id, wanted) in revs {
            let known = docs.get(&id);
            let absent: Vec<Revision> = wanted
                .into_iter()
                .filter(|rev| known.map_or(true, |revs| !revs.contains_key(rev)))
                .collect();
            if absent.is_empty() {
                continue;
            }

            let newest = absent.iter().map(|rev| rev.pos).max().unwrap_or(0);
            let ancestors = known
                .map(|revs| revs.keys().filter(|rev| rev.pos < newest).cloned().collect())
                .unwrap_or_default();
            missing.push(MissingRevs::new(id, absent).with_possible_ancestors(ancestors));
        }

        Ok(missing)
    }

    async fn open_doc_revs(
        &self,
        id: &str,
        revs: &[Revision],
        options: &OpenDocOptions,
    ) -> DbResult<Vec<OpenRevResult>> {
        let _guard = ReadGuard::enter(&self.inner);

        let delay = *self.inner.read_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.inner.read_failure.read().clone();
        if let Some(message) = failure {
            return Err(DbError::unavailable(&self.name, message));
        }

        let docs = self.inner.docs.read();
        let stored = docs.get(id);
        Ok(revs
            .iter()
            .map(|rev| match stored.and_then(|revs| revs.get(rev)) {
                Some(doc) if options.include_deleted || !doc.deleted => {
                    OpenRevResult::Found(doc.clone())
                }
                _ => OpenRevResult::Missing(rev.clone()),
            })
            .collect())
    }

    async fn update_docs(
        &self,
        docs: Vec<Document>,
        _options: UpdateOptions,
    ) -> DbResult<Vec<DocRejection>> {
        let delay = *self.inner.write_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.write_log.lock().push(docs.len());

        let failure = self.inner.write_failure.read().clone();
        if let Some(message) = failure {
            return Err(DbError::unavailable(&self.name, message));
        }
        let rejection = self.inner.write_rejection.read().clone();
        if let Some(reason) = rejection {
            return Err(DbError::rejected(&self.name, reason));
        }

        let refused = self.inner.rejected_ids.read().clone();
        let mut rejections = Vec::new();
        for doc in docs {
            if refused.contains(&doc.id) {
                rejections.push(DocRejection {
                    id: doc.id,
                    rev: doc.rev,
                    reason: "forbidden".into(),
                });
            } else {
                self.put(doc);
            }
        }
        Ok(rejections)
    }
}

/// A change feed that replays a fixed list of batches.
#[derive(Debug, Default)]
pub struct VecChangeFeed {
    batches: VecDeque<ChangeBatch>,
    failure: Option<String>,
}

impl VecChangeFeed {
    /// Creates a feed that yields `batches` and then reports exhaustion.
    pub fn new(batches: Vec<ChangeBatch>) -> Self {
        Self {
            batches: batches.into(),
            failure: None,
        }
    }

    /// Fails with `message` instead of reporting exhaustion.
    pub fn fail_when_drained(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Number of batches not yet handed out.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl ChangeFeed for VecChangeFeed {
    async fn next_batch(&mut self) -> WorkerResult<Option<ChangeBatch>> {
        match self.batches.pop_front() {
            Some(batch) => Ok(Some(batch)),
            None => match &self.failure {
                Some(message) => Err(WorkerError::ChangeFeed(message.clone())),
                None => Ok(None),
            },
        }
    }
}

#[derive(Debug, Default)]
struct CoordinatorLog {
    reports: Vec<(ReportToken, ReplicationStats)>,
    pushed: Vec<ReplicationStats>,
}

/// A coordinator that records everything it is told.
#[derive(Debug, Clone, Default)]
pub struct RecordingCoordinator {
    log: Arc<Mutex<CoordinatorLog>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl RecordingCoordinator {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `message`.
    pub fn fail(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Completed batches in report order.
    pub fn reports(&self) -> Vec<(ReportToken, ReplicationStats)> {
        self.log.lock().reports.clone()
    }

    /// Incremental stats pushes in arrival order.
    pub fn pushed_stats(&self) -> Vec<ReplicationStats> {
        self.log.lock().pushed.clone()
    }

    /// Everything the coordinator has learned, reports and pushes combined.
    pub fn total(&self) -> ReplicationStats {
        let log = self.log.lock();
        let reported: ReplicationStats = log.reports.iter().map(|(_, stats)| *stats).sum();
        let pushed: ReplicationStats = log.pushed.iter().copied().sum();
        reported + pushed
    }

    fn check(&self) -> WorkerResult<()> {
        match self.failure.read().as_ref() {
            Some(message) => Err(WorkerError::Coordinator(message.clone())),
            None => Ok(()),
        }
    }
}

impl Coordinator for RecordingCoordinator {
    async fn report_seq_done(&self, token: ReportToken, stats: ReplicationStats) -> WorkerResult<()> {
        self.check()?;
        self.log.lock().reports.push((token, stats));
        Ok(())
    }

    async fn add_stats(&self, delta: ReplicationStats) -> WorkerResult<()> {
        self.check()?;
        self.log.lock().pushed.push(delta);
        Ok(())
    }
}
