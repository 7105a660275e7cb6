//! The replication worker's flow-control state machine.
//!
//! One task owns all mutable worker state: the batch, the stats, the reader
//! pool, the writer slot, the pending-fetch slot and the flush-waiter slot.
//! Everything else talks to it through [`WorkerHandle`] calls, each of which
//! blocks until the worker acknowledges it.
//!
//! ## Flow control
//!
//! - A fetch spawns a reader while fewer than `concurrency` readers are
//!   active. Otherwise the request is parked (one slot) and its caller
//!   stays blocked until a reader exits.
//! - A flush parks its caller and spawns the writer once every reader has
//!   exited, so the writer sees a batch nobody appends to.
//! - Any child failure, or a driver exit with work outstanding, terminates
//!   the worker and aborts its children.

use crate::batch::{Append, Batch, BatchPolicy};
use crate::config::WorkerConfig;
use crate::database::{ChangeFeed, Coordinator, Database, DbEvent, DbEventReceiver};
use crate::driver::Driver;
use crate::error::{WorkerError, WorkerResult};
use crate::reader;
use crate::report::StatsThrottle;
use crate::writer::{self, write_docs};
use docrep_protocol::{Document, MissingRevs, ReplicationStats};
use std::future::{self, Future};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Calls accepted by the worker task.
#[derive(Debug)]
enum Request {
    Fetch {
        missing: MissingRevs,
        reply: oneshot::Sender<()>,
    },
    BatchDoc {
        doc: Document,
        reply: oneshot::Sender<()>,
    },
    AddStats {
        delta: ReplicationStats,
        reply: oneshot::Sender<()>,
    },
    Flush {
        reply: oneshot::Sender<ReplicationStats>,
    },
}

/// Call surface of a running worker.
///
/// Every call waits for the worker's acknowledgment. Callers must keep at
/// most one fetch in flight: a fetch issued while another one is parked is
/// a protocol violation that terminates the worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Request>,
}

impl WorkerHandle {
    async fn call<R>(&self, request: impl FnOnce(oneshot::Sender<R>) -> Request) -> WorkerResult<R> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(request(reply))
            .await
            .map_err(|_| WorkerError::WorkerGone)?;
        response.await.map_err(|_| WorkerError::WorkerGone)
    }

    /// Asks the worker to fetch the given revisions. Returns once a reader
    /// has been started for them, which may require waiting for a free slot.
    pub async fn fetch(&self, missing: MissingRevs) -> WorkerResult<()> {
        self.call(|reply| Request::Fetch { missing, reply }).await
    }

    /// Appends a document to the worker's batch.
    pub async fn batch_doc(&self, doc: Document) -> WorkerResult<()> {
        self.call(|reply| Request::BatchDoc { doc, reply }).await
    }

    /// Merges a stats delta into the worker's running stats.
    pub async fn add_stats(&self, delta: ReplicationStats) -> WorkerResult<()> {
        self.call(|reply| Request::AddStats { delta, reply }).await
    }

    /// Drains every outstanding reader, writes the whole batch, and returns
    /// the stats accumulated since the previous flush.
    pub async fn flush(&self) -> WorkerResult<ReplicationStats> {
        self.call(|reply| Request::Flush { reply }).await
    }
}

enum Event {
    Request(Request),
    Db(Option<DbEvent>),
    ReaderExit(Result<WorkerResult<()>, JoinError>),
    WriterExit(Result<WorkerResult<ReplicationStats>, JoinError>),
    DriverExit(Result<WorkerResult<()>, JoinError>),
}

struct WorkerState<S, T, C> {
    config: WorkerConfig,
    source: S,
    target: T,
    coordinator: C,
    handle: WorkerHandle,
    inbox: mpsc::Receiver<Request>,
    db_events: Option<DbEventReceiver>,
    driver: AbortHandle,
    readers: JoinSet<WorkerResult<()>>,
    writer: Option<JoinHandle<WorkerResult<ReplicationStats>>>,
    pending_fetch: Option<(MissingRevs, oneshot::Sender<()>)>,
    flush_waiter: Option<oneshot::Sender<ReplicationStats>>,
    stats: StatsThrottle,
    batch: Batch,
}

impl<S, T, C> WorkerState<S, T, C>
where
    S: Database,
    T: Database,
    C: Coordinator,
{
    async fn run(mut self, mut driver: JoinHandle<WorkerResult<()>>) -> WorkerResult<()> {
        let result = self.event_loop(&mut driver).await;
        if let Err(err) = &result {
            error!(
                source_db = self.source.name(),
                target_db = self.target.name(),
                error = %err,
                "replication worker terminating"
            );
        } else {
            debug!(source_db = self.source.name(), "replication worker finished");
        }
        result
    }

    async fn event_loop(&mut self, driver: &mut JoinHandle<WorkerResult<()>>) -> WorkerResult<()> {
        loop {
            let event = tokio::select! {
                biased;
                event = next_db_event(&mut self.db_events) => Event::Db(event),
                Some(request) = self.inbox.recv() => Event::Request(request),
                Some(joined) = self.readers.join_next() => Event::ReaderExit(joined),
                joined = join_writer(&mut self.writer) => Event::WriterExit(joined),
                joined = &mut *driver => Event::DriverExit(joined),
            };

            match event {
                Event::Request(request) => self.handle_request(request).await?,
                Event::Db(Some(event)) => self.handle_db_event(event).await?,
                Event::Db(None) => return Err(WorkerError::NotifierDied),
                Event::ReaderExit(joined) => self.reader_exited(joined)?,
                Event::WriterExit(joined) => self.writer_exited(joined)?,
                Event::DriverExit(joined) => return self.driver_exited(joined),
            }
        }
    }

    async fn handle_request(&mut self, request: Request) -> WorkerResult<()> {
        match request {
            Request::Fetch { missing, reply } => {
                if self.readers.len() < self.config.concurrency {
                    self.spawn_reader(missing);
                    let _ = reply.send(());
                } else if self.pending_fetch.is_none() {
                    debug!(doc_id = %missing.id, "reader pool saturated; parking fetch");
                    self.pending_fetch = Some((missing, reply));
                } else {
                    return Err(WorkerError::Protocol(format!(
                        "fetch of {} issued while another fetch is parked",
                        missing.id
                    )));
                }
            }
            Request::BatchDoc { doc, reply } => {
                let _ = reply.send(());
                match self.batch.append(doc)? {
                    Append::Buffered => {}
                    Append::Flush(docs) => {
                        debug!(docs = docs.len(), "batch threshold reached; flushing");
                        let written = write_docs(&self.target, docs).await?;
                        self.add_stats(written).await?;
                    }
                    Append::Individual(doc) => {
                        debug!(doc_id = %doc.id, "flushing document with attachments on its own");
                        let written = write_docs(&self.target, vec![doc]).await?;
                        self.add_stats(written).await?;
                    }
                }
            }
            Request::AddStats { delta, reply } => {
                self.add_stats(delta).await?;
                let _ = reply.send(());
            }
            Request::Flush { reply } => {
                if self.flush_waiter.is_some() || self.writer.is_some() {
                    return Err(WorkerError::Protocol(
                        "flush issued while another flush is in progress".into(),
                    ));
                }
                self.flush_waiter = Some(reply);
                if self.readers.is_empty() {
                    self.spawn_writer();
                } else {
                    debug!(
                        readers = self.readers.len(),
                        "flush waiting for readers to drain"
                    );
                }
            }
        }
        Ok(())
    }

    async fn add_stats(&mut self, delta: ReplicationStats) -> WorkerResult<()> {
        if let Some(report) = self.stats.add(delta, Instant::now()) {
            debug!(stats = ?report, "pushing progress to coordinator");
            self.coordinator.add_stats(report).await?;
        }
        Ok(())
    }

    async fn handle_db_event(&mut self, event: DbEvent) -> WorkerResult<()> {
        let DbEvent::Compacted { db_name } = event;
        if self.source.name() == db_name {
            let reopened = self.source.open().await?;
            std::mem::replace(&mut self.source, reopened).close();
            info!(db = %db_name, "source compacted; handle reopened");
        }
        if self.target.name() == db_name {
            let reopened = self.target.open().await?;
            std::mem::replace(&mut self.target, reopened).close();
            info!(db = %db_name, "target compacted; handle reopened");
        }
        Ok(())
    }

    fn spawn_reader(&mut self, missing: MissingRevs) {
        debug!(
            doc_id = %missing.id,
            revs = missing.revs.len(),
            readers = self.readers.len() + 1,
            "spawning reader"
        );
        let source = self.source.clone();
        let target = self.target.clone();
        let worker = self.handle.clone();
        self.readers
            .spawn(async move { reader::run(source, target, missing, worker).await });
    }

    fn spawn_writer(&mut self) {
        let docs = self.batch.take();
        debug!(docs = docs.len(), "spawning writer");
        let target = self.target.clone();
        self.writer = Some(tokio::spawn(writer::run(target, docs)));
    }

    fn reader_exited(&mut self, joined: Result<WorkerResult<()>, JoinError>) -> WorkerResult<()> {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(WorkerError::ReaderDied(Box::new(err))),
            Err(err) => return Err(task_failed("reader", err)),
        }

        if let Some((missing, reply)) = self.pending_fetch.take() {
            self.spawn_reader(missing);
            let _ = reply.send(());
        } else if self.readers.is_empty() && self.flush_waiter.is_some() && self.writer.is_none()
        {
            self.spawn_writer();
        }
        Ok(())
    }

    fn writer_exited(
        &mut self,
        joined: Result<WorkerResult<ReplicationStats>, JoinError>,
    ) -> WorkerResult<()> {
        self.writer = None;
        let written = match joined {
            Ok(Ok(stats)) => stats,
            Ok(Err(err)) => return Err(WorkerError::WriterDied(Box::new(err))),
            Err(err) => return Err(task_failed("writer", err)),
        };

        self.stats.merge(written);
        let snapshot = self.stats.take();
        if let Some(waiter) = self.flush_waiter.take() {
            let _ = waiter.send(snapshot);
        }
        Ok(())
    }

    fn driver_exited(&mut self, joined: Result<WorkerResult<()>, JoinError>) -> WorkerResult<()> {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(WorkerError::DriverDied(Box::new(err))),
            Err(err) => return Err(task_failed("driver", err)),
        }

        let mut outstanding = Vec::new();
        if !self.batch.is_empty() {
            outstanding.push(format!("batch={}", self.batch.len()));
        }
        if !self.readers.is_empty() {
            outstanding.push(format!("readers={}", self.readers.len()));
        }
        if self.writer.is_some() {
            outstanding.push("writer".to_string());
        }
        if self.pending_fetch.is_some() {
            outstanding.push("pending_fetch".to_string());
        }
        if self.flush_waiter.is_some() {
            outstanding.push("flush_waiter".to_string());
        }

        if outstanding.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::NotIdleAtExit(outstanding.join(", ")))
        }
    }
}

impl<S, T, C> Drop for WorkerState<S, T, C> {
    // Dropping a JoinHandle does not cancel its task.
    fn drop(&mut self) {
        self.driver.abort();
        self.readers.abort_all();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

fn task_failed(task: &'static str, err: JoinError) -> WorkerError {
    WorkerError::TaskFailed {
        task,
        message: err.to_string(),
    }
}

async fn next_db_event(events: &mut Option<DbEventReceiver>) -> Option<DbEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn join_writer(
    writer: &mut Option<JoinHandle<WorkerResult<ReplicationStats>>>,
) -> Result<WorkerResult<ReplicationStats>, JoinError> {
    match writer {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

/// Starts the worker task and a driver produced by `driver`.
///
/// The driver receives the worker's call surface; its completion is
/// observed by the worker like any other child.
pub(crate) fn spawn_with_driver<S, T, C, D, Fut>(
    config: WorkerConfig,
    source: S,
    target: T,
    coordinator: C,
    db_events: Option<DbEventReceiver>,
    driver: D,
) -> JoinHandle<WorkerResult<()>>
where
    S: Database,
    T: Database,
    C: Coordinator,
    D: FnOnce(WorkerHandle) -> Fut,
    Fut: Future<Output = WorkerResult<()>> + Send + 'static,
{
    let (tx, inbox) = mpsc::channel(config.inbox_capacity);
    let handle = WorkerHandle { tx };
    let driver = tokio::spawn(driver(handle.clone()));

    let state = WorkerState {
        stats: StatsThrottle::new(config.stats_report_interval, Instant::now()),
        batch: Batch::new(BatchPolicy::for_target(target.kind(), &config)),
        config,
        source,
        target,
        coordinator,
        handle,
        inbox,
        db_events,
        driver: driver.abort_handle(),
        readers: JoinSet::new(),
        writer: None,
        pending_fetch: None,
        flush_waiter: None,
    };
    tokio::spawn(state.run(driver))
}

/// Everything needed to start a replication worker.
pub struct WorkerParams<S, T, F, C> {
    /// Worker tunables.
    pub config: WorkerConfig,
    /// Database documents are copied from.
    pub source: S,
    /// Database documents are copied to.
    pub target: T,
    /// Supplier of change batches.
    pub feed: F,
    /// Session coordinator receiving progress.
    pub coordinator: C,
    /// Optional compaction notifications for source and target.
    pub db_events: Option<DbEventReceiver>,
}

/// A running replication worker for one (source, target) pair.
#[derive(Debug)]
pub struct ReplicationWorker {
    task: JoinHandle<WorkerResult<()>>,
}

impl ReplicationWorker {
    /// Starts the worker and its queue-fetch driver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<S, T, F, C>(params: WorkerParams<S, T, F, C>) -> Self
    where
        S: Database,
        T: Database,
        F: ChangeFeed,
        C: Coordinator,
    {
        let WorkerParams {
            config,
            source,
            target,
            feed,
            coordinator,
            db_events,
        } = params;

        let policy = BatchPolicy::for_target(target.kind(), &config);
        let driver = Driver::new(
            source.clone(),
            target.clone(),
            feed,
            coordinator.clone(),
            policy,
        );
        let task = spawn_with_driver(config, source, target, coordinator, db_events, |handle| {
            driver.run(handle)
        });
        Self { task }
    }

    /// Waits for the worker to terminate and returns its exit reason.
    pub async fn wait(self) -> WorkerResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(task_failed("worker", err)),
        }
    }

    /// Aborts the worker together with its driver, readers and writer.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Returns true once the worker has terminated.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
