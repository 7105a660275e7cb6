//! Collaborator interfaces: databases, the change feed and the coordinator.
//!
//! The worker never talks to a storage engine or an HTTP client directly.
//! Everything it needs from the outside world goes through these traits,
//! which allows different implementations (embedded engine, remote HTTP
//! database, in-memory doubles for testing).

use crate::error::{DbResult, WorkerResult};
use docrep_protocol::{ChangeBatch, Document, MissingRevs, ReplicationStats, ReportToken, Revision};
use std::future::Future;
use tokio::sync::mpsc;

/// Where a database lives relative to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbKind {
    /// In-process database.
    Embedded,
    /// Remote database reached over the network.
    Network,
}

/// Options for reading document revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenDocOptions {
    /// Return deletion tombstones instead of treating them as missing.
    pub include_deleted: bool,
    /// Resolve each requested revision to its latest descendant leaf.
    pub latest: bool,
    /// Only inline attachment bodies changed since these revisions.
    pub atts_since: Vec<Revision>,
}

impl OpenDocOptions {
    /// Options used when reading revisions to replicate.
    pub fn replication(possible_ancestors: Vec<Revision>) -> Self {
        Self {
            include_deleted: true,
            latest: true,
            atts_since: possible_ancestors,
        }
    }
}

/// Outcome of reading one requested revision.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenRevResult {
    /// The revision was found.
    Found(Document),
    /// The source no longer has the revision.
    Missing(Revision),
}

/// Options for writing replicated documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Let the target batch the commit instead of syncing per call.
    pub delay_commit: bool,
    /// Apply revisions as already replicated: no new revisions, no conflicts.
    pub replicated_changes: bool,
}

impl UpdateOptions {
    /// Options used by the worker for every write.
    pub fn replicated() -> Self {
        Self {
            delay_commit: true,
            replicated_changes: true,
        }
    }
}

/// A single document the target refused within an otherwise accepted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRejection {
    /// Document ID.
    pub id: String,
    /// Revision that was refused.
    pub rev: Revision,
    /// Error reason reported by the target.
    pub reason: String,
}

/// A handle to a source or target database.
///
/// Handles are cheap to clone. Every task that talks to a database opens
/// its own handle through [`open`](Self::open); no connection is shared
/// across tasks.
pub trait Database: Clone + Send + Sync + 'static {
    /// Database name, used to match compaction events.
    fn name(&self) -> &str;

    /// Where the database lives.
    fn kind(&self) -> DbKind;

    /// Opens a fresh handle to the same database.
    fn open(&self) -> impl Future<Output = DbResult<Self>> + Send;

    /// Releases the handle.
    fn close(self) {}

    /// Returns the subset of `revs` the database lacks, grouped per document.
    fn get_missing_revs(
        &self,
        revs: Vec<(String, Vec<Revision>)>,
    ) -> impl Future<Output = DbResult<Vec<MissingRevs>>> + Send;

    /// Reads the requested revisions of one document.
    fn open_doc_revs(
        &self,
        id: &str,
        revs: &[Revision],
        options: &OpenDocOptions,
    ) -> impl Future<Output = DbResult<Vec<OpenRevResult>>> + Send;

    /// Writes documents, returning per-document rejections.
    ///
    /// A structured error for the whole call is reported as
    /// [`DbError::Rejected`](crate::DbError::Rejected).
    fn update_docs(
        &self,
        docs: Vec<Document>,
        options: UpdateOptions,
    ) -> impl Future<Output = DbResult<Vec<DocRejection>>> + Send;
}

/// Supplier of change batches for one replication session.
pub trait ChangeFeed: Send + 'static {
    /// Returns the next batch, or `None` once the feed is exhausted.
    fn next_batch(&mut self) -> impl Future<Output = WorkerResult<Option<ChangeBatch>>> + Send;
}

/// Session-level owner of checkpoints and progress.
pub trait Coordinator: Clone + Send + Sync + 'static {
    /// Marks one change batch as fully processed.
    fn report_seq_done(
        &self,
        token: ReportToken,
        stats: ReplicationStats,
    ) -> impl Future<Output = WorkerResult<()>> + Send;

    /// Merges an incremental progress delta.
    fn add_stats(&self, delta: ReplicationStats) -> impl Future<Output = WorkerResult<()>> + Send;
}

/// Notifications about the databases a worker is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEvent {
    /// The named database finished compacting; handles must be reopened.
    Compacted {
        /// Database name.
        db_name: String,
    },
}

/// Sending half of a database event channel.
pub type DbEventSender = mpsc::UnboundedSender<DbEvent>;
/// Receiving half of a database event channel.
pub type DbEventReceiver = mpsc::UnboundedReceiver<DbEvent>;

/// Creates a channel for delivering [`DbEvent`]s to a worker.
pub fn db_event_channel() -> (DbEventSender, DbEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_read_options() {
        let ancestors = vec![Revision::new(1, "a")];
        let options = OpenDocOptions::replication(ancestors.clone());
        assert!(options.include_deleted);
        assert!(options.latest);
        assert_eq!(options.atts_since, ancestors);
    }

    #[test]
    fn replicated_write_options() {
        let options = UpdateOptions::replicated();
        assert!(options.delay_commit);
        assert!(options.replicated_changes);
    }

    #[test]
    fn event_channel_delivers() {
        let (tx, mut rx) = db_event_channel();
        tx.send(DbEvent::Compacted {
            db_name: "source".into(),
        })
        .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            DbEvent::Compacted {
                db_name: "source".into()
            }
        );
    }
}
