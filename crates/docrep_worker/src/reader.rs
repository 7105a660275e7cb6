//! Document fetches from the source.

use crate::database::{Database, OpenDocOptions, OpenRevResult};
use crate::error::WorkerResult;
use crate::worker::WorkerHandle;
use crate::writer::write_docs;
use docrep_protocol::{Document, MissingRevs, ReplicationStats};
use tracing::debug;

/// Reads the missing revisions of one document, skipping any the source no
/// longer has.
pub(crate) async fn fetch_docs<S: Database>(
    source: &S,
    missing: &MissingRevs,
) -> WorkerResult<Vec<Document>> {
    let options = OpenDocOptions::replication(missing.possible_ancestors.clone());
    let results = source
        .open_doc_revs(&missing.id, &missing.revs, &options)
        .await?;

    Ok(results
        .into_iter()
        .filter_map(|result| match result {
            OpenRevResult::Found(doc) => Some(doc),
            OpenRevResult::Missing(rev) => {
                debug!(doc_id = %missing.id, rev = %rev, "revision not found on source; skipping");
                None
            }
        })
        .collect())
}

/// Body of a reader task.
///
/// Documents without attachments are handed to the worker's batch.
/// Documents with attachments are written straight to the target, since
/// their bodies stream over this reader's source connection.
pub(crate) async fn run<S: Database, T: Database>(
    source: S,
    target: T,
    missing: MissingRevs,
    worker: WorkerHandle,
) -> WorkerResult<()> {
    let source = source.open().await?;
    let docs = fetch_docs(&source, &missing).await;
    source.close();
    let docs = docs?;

    let mut stats = ReplicationStats::read(docs.len() as u64);
    let mut direct_target: Option<T> = None;

    for doc in docs {
        if !doc.has_attachments() {
            worker.batch_doc(doc).await?;
            continue;
        }

        if direct_target.is_none() {
            direct_target = Some(target.open().await?);
        }
        if let Some(handle) = &direct_target {
            debug!(doc_id = %doc.id, "writing document with attachments directly");
            stats += write_docs(handle, vec![doc]).await?;
        }
    }

    if let Some(handle) = direct_target {
        handle.close();
    }

    worker.add_stats(stats).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbKind;
    use crate::memory::MemoryDatabase;
    use docrep_protocol::Revision;

    #[tokio::test]
    async fn fetch_skips_revisions_the_source_lacks() {
        let source = MemoryDatabase::new("source", DbKind::Network);
        source.put(Document::new("a", Revision::new(1, "x")));

        let missing = MissingRevs::new("a", vec![Revision::new(1, "x"), Revision::new(2, "gone")]);
        let docs = fetch_docs(&source, &missing).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].rev, Revision::new(1, "x"));
    }

    #[tokio::test]
    async fn fetch_includes_tombstones() {
        let source = MemoryDatabase::new("source", DbKind::Embedded);
        source.put(Document::tombstone("a", Revision::new(2, "d")));

        let missing = MissingRevs::new("a", vec![Revision::new(2, "d")]);
        let docs = fetch_docs(&source, &missing).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert!(docs[0].deleted);
    }

    #[tokio::test]
    async fn fetch_of_unknown_document_is_empty() {
        let source = MemoryDatabase::new("source", DbKind::Network);
        let missing = MissingRevs::new("nope", vec![Revision::new(1, "x")]);

        assert!(fetch_docs(&source, &missing).await.unwrap().is_empty());
    }
}
