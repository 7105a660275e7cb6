//! Bulk writes of batched documents to the target.

use crate::database::{Database, UpdateOptions};
use crate::error::{DbError, WorkerResult};
use docrep_protocol::{Document, ReplicationStats};
use tracing::{debug, error};

/// Writes `docs` to `target` in one call and attributes the outcome.
///
/// Per-document rejections are counted individually. A structured error for
/// the whole call counts every document as a write failure even if the
/// target applied some of them. Any other failure is returned.
pub(crate) async fn write_docs<T: Database>(
    target: &T,
    docs: Vec<Document>,
) -> WorkerResult<ReplicationStats> {
    if docs.is_empty() {
        return Ok(ReplicationStats::new());
    }

    let count = docs.len() as u64;
    let doc_ids: Vec<String> = docs.iter().map(|doc| doc.id.clone()).collect();
    debug!(target_db = target.name(), docs = count, "writing document batch");

    match target.update_docs(docs, UpdateOptions::replicated()).await {
        Ok(rejections) => {
            for rejection in &rejections {
                error!(
                    target_db = target.name(),
                    doc_id = %rejection.id,
                    rev = %rejection.rev,
                    reason = %rejection.reason,
                    "document could not be replicated"
                );
            }
            let failed = (rejections.len() as u64).min(count);
            Ok(ReplicationStats::written(count - failed, failed))
        }
        Err(DbError::Rejected { db, reason }) => {
            error!(
                target_db = %db,
                reason = %reason,
                doc_ids = ?doc_ids,
                "bulk write rejected; counting whole batch as failed"
            );
            Ok(ReplicationStats::written(0, count))
        }
        Err(err) => Err(err.into()),
    }
}

/// Body of the writer task: opens its own target handle and drains `docs`.
pub(crate) async fn run<T: Database>(target: T, docs: Vec<Document>) -> WorkerResult<ReplicationStats> {
    let target = target.open().await?;
    let result = write_docs(&target, docs).await;
    target.close();
    result
}
