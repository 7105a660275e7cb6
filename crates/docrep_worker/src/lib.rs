//! # docrep worker
//!
//! Per-session document replication worker.
//!
//! One worker runs for each (source, target) database pair of a
//! replication session. It is made of:
//! - a **driver** that pulls change batches from a [`ChangeFeed`], asks the
//!   target which revisions it lacks, and either copies them inline
//!   (embedded source) or hands them to the worker (remote source);
//! - a **worker** task owning the batch and the running stats, with a
//!   bounded pool of reader tasks and at most one writer task;
//! - a [`Coordinator`] that receives throttled progress and one
//!   `report_seq_done` per completed change batch.
//!
//! ## Key Invariants
//!
//! - At most `concurrency` readers run at once; a fetch beyond that blocks
//!   its caller until a reader exits.
//! - The writer only starts once every reader has exited, so it never sees
//!   a batch that is still being appended to.
//! - Any child failure terminates the worker; there is no local retry.
//! - The feed may only run dry while the worker is idle.
//!
//! ## Example
//!
//! ```no_run
//! use docrep_worker::{
//!     DbKind, MemoryDatabase, RecordingCoordinator, ReplicationWorker, VecChangeFeed,
//!     WorkerConfig, WorkerParams,
//! };
//!
//! # async fn demo() -> docrep_worker::WorkerResult<()> {
//! let worker = ReplicationWorker::start(WorkerParams {
//!     config: WorkerConfig::new(4),
//!     source: MemoryDatabase::new("source", DbKind::Network),
//!     target: MemoryDatabase::new("target", DbKind::Embedded),
//!     feed: VecChangeFeed::new(Vec::new()),
//!     coordinator: RecordingCoordinator::new(),
//!     db_events: None,
//! });
//! worker.wait().await
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod database;
mod driver;
mod error;
mod memory;
mod reader;
mod report;
mod telemetry;
mod worker;
mod writer;

pub use batch::{Append, Batch, BatchPolicy};
pub use config::{
    WorkerConfig, DEFAULT_CONCURRENCY, DEFAULT_DOC_BUFFER_BYTES, DEFAULT_DOC_BUFFER_LEN,
    DEFAULT_INBOX_CAPACITY, DEFAULT_MAX_BULK_ATTACHMENTS_PER_DOC, DEFAULT_MAX_BULK_ATTACHMENT_SIZE,
    DEFAULT_STATS_REPORT_INTERVAL,
};
pub use database::{
    db_event_channel, ChangeFeed, Coordinator, Database, DbEvent, DbEventReceiver, DbEventSender,
    DbKind, DocRejection, OpenDocOptions, OpenRevResult, UpdateOptions,
};
pub use error::{DbError, DbResult, WorkerError, WorkerResult};
pub use memory::{MemoryDatabase, RecordingCoordinator, VecChangeFeed};
pub use telemetry::init_tracing;
pub use worker::{ReplicationWorker, WorkerHandle, WorkerParams};

pub use docrep_protocol::{
    Attachment, ChangeBatch, ChangeEntry, Document, MissingRevs, ReplicationStats, ReportToken,
    Revision,
};
