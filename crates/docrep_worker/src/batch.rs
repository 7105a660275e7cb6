//! Pending-write buffer and the flush policy that drains it.

use crate::config::WorkerConfig;
use crate::database::DbKind;
use crate::error::WorkerResult;
use docrep_protocol::Document;

/// Flush thresholds, selected by the kind of the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Remote target: the batch is measured in serialized bytes.
    Network {
        /// Byte budget; exceeding it flushes the batch.
        max_bytes: usize,
        /// Attachments larger than this are written individually.
        max_attachment_size: u64,
        /// Documents with more attachments are written individually.
        max_attachments: usize,
    },
    /// In-process target: the batch is measured in documents.
    Embedded {
        /// Document count that flushes the batch.
        max_docs: usize,
    },
}

impl BatchPolicy {
    /// Chooses the policy for a target of the given kind.
    pub fn for_target(kind: DbKind, config: &WorkerConfig) -> Self {
        match kind {
            DbKind::Network => BatchPolicy::Network {
                max_bytes: config.doc_buffer_bytes,
                max_attachment_size: config.max_bulk_attachment_size,
                max_attachments: config.max_bulk_attachments_per_doc,
            },
            DbKind::Embedded => BatchPolicy::Embedded {
                max_docs: config.doc_buffer_len.max(1),
            },
        }
    }

    /// Returns true if the document may travel inside a bulk write.
    fn accepts_in_bulk(&self, doc: &Document) -> bool {
        match self {
            BatchPolicy::Network {
                max_attachment_size,
                max_attachments,
                ..
            } => {
                doc.attachments.len() <= *max_attachments
                    && doc
                        .attachments
                        .values()
                        .all(|att| att.length <= *max_attachment_size && !att.stub)
            }
            BatchPolicy::Embedded { .. } => true,
        }
    }
}

/// What the caller must do after appending a document.
#[derive(Debug, PartialEq)]
pub enum Append {
    /// The document was buffered; nothing to write yet.
    Buffered,
    /// The threshold was crossed; write these documents (the batch is now empty).
    Flush(Vec<Document>),
    /// The document cannot be bulk-written; write it on its own.
    Individual(Document),
}

/// Ordered buffer of documents awaiting a bulk write.
#[derive(Debug)]
pub struct Batch {
    docs: Vec<Document>,
    size: usize,
    policy: BatchPolicy,
}

impl Batch {
    /// Creates an empty batch governed by `policy`.
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            docs: Vec::new(),
            size: 0,
            policy,
        }
    }

    /// Appends a document, flushing when the policy's threshold is crossed.
    ///
    /// A triggered flush includes the appended document.
    pub fn append(&mut self, doc: Document) -> WorkerResult<Append> {
        if !self.policy.accepts_in_bulk(&doc) {
            return Ok(Append::Individual(doc));
        }

        let (size, limit_reached) = match self.policy {
            BatchPolicy::Network { max_bytes, .. } => {
                let size = self.size + doc.to_json_bytes()?.len();
                (size, size > max_bytes)
            }
            BatchPolicy::Embedded { max_docs } => {
                let size = self.size + 1;
                (size, size >= max_docs)
            }
        };

        self.docs.push(doc);
        if limit_reached {
            Ok(Append::Flush(self.take()))
        } else {
            self.size = size;
            Ok(Append::Buffered)
        }
    }

    /// Removes and returns every buffered document.
    pub fn take(&mut self) -> Vec<Document> {
        self.size = 0;
        std::mem::take(&mut self.docs)
    }

    /// Number of buffered documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Current size in the policy's unit (bytes or documents).
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrep_protocol::{Attachment, Revision};
    use serde_json::json;

    fn doc(i: usize) -> Document {
        Document::new(format!("doc{i:03}"), Revision::new(1, "abc"))
            .with_field("n", json!(i))
    }

    fn network(max_bytes: usize) -> BatchPolicy {
        BatchPolicy::Network {
            max_bytes,
            max_attachment_size: 100,
            max_attachments: 2,
        }
    }

    #[test]
    fn embedded_flushes_at_count() {
        let mut batch = Batch::new(BatchPolicy::Embedded { max_docs: 3 });

        assert_eq!(batch.append(doc(1)).unwrap(), Append::Buffered);
        assert_eq!(batch.append(doc(2)).unwrap(), Append::Buffered);
        assert_eq!(batch.size(), 2);

        match batch.append(doc(3)).unwrap() {
            Append::Flush(docs) => {
                assert_eq!(docs.len(), 3);
                assert_eq!(docs[2].id, "doc003");
            }
            other => panic!("expected flush, got {other:?}"),
        }
        assert!(batch.is_empty());
        assert_eq!(batch.size(), 0);
    }

    #[test]
    fn embedded_twelve_docs_flush_ten_then_leave_two() {
        let config = WorkerConfig::default();
        let mut batch = Batch::new(BatchPolicy::for_target(DbKind::Embedded, &config));

        let mut flushed = Vec::new();
        for i in 0..12 {
            if let Append::Flush(docs) = batch.append(doc(i)).unwrap() {
                flushed.push(docs.len());
            }
        }

        assert_eq!(flushed, vec![10]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.take().len(), 2);
    }

    #[test]
    fn network_flushes_when_bytes_exceeded() {
        let one = doc(1).to_json_bytes().unwrap().len();
        let mut batch = Batch::new(network(one * 2));

        assert_eq!(batch.append(doc(1)).unwrap(), Append::Buffered);
        assert_eq!(batch.append(doc(2)).unwrap(), Append::Buffered);
        assert_eq!(batch.size(), one * 2);

        match batch.append(doc(3)).unwrap() {
            Append::Flush(docs) => assert_eq!(docs.len(), 3),
            other => panic!("expected flush, got {other:?}"),
        }
        assert!(batch.is_empty());
    }

    #[test]
    fn network_writes_heavy_attachments_individually() {
        let mut batch = Batch::new(network(1 << 20));

        let big = doc(1).with_attachment("big.bin", Attachment::new("application/octet-stream", 101));
        assert!(matches!(batch.append(big).unwrap(), Append::Individual(_)));

        let stub = doc(2).with_attachment("s.txt", Attachment::stub("text/plain", 1));
        assert!(matches!(batch.append(stub).unwrap(), Append::Individual(_)));

        let many = doc(3)
            .with_attachment("a", Attachment::new("text/plain", 1))
            .with_attachment("b", Attachment::new("text/plain", 1))
            .with_attachment("c", Attachment::new("text/plain", 1));
        assert!(matches!(batch.append(many).unwrap(), Append::Individual(_)));

        let small = doc(4).with_attachment("a", Attachment::new("text/plain", 10));
        assert_eq!(batch.append(small).unwrap(), Append::Buffered);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn embedded_ignores_attachment_limits() {
        let mut batch = Batch::new(BatchPolicy::Embedded { max_docs: 10 });
        let stub = doc(1).with_attachment("s", Attachment::stub("text/plain", 1 << 30));
        assert_eq!(batch.append(stub).unwrap(), Append::Buffered);
    }

    #[test]
    fn policy_follows_target_kind() {
        let config = WorkerConfig::default().with_doc_buffer_bytes(2048);
        assert_eq!(
            BatchPolicy::for_target(DbKind::Embedded, &config),
            BatchPolicy::Embedded { max_docs: 10 }
        );
        assert!(matches!(
            BatchPolicy::for_target(DbKind::Network, &config),
            BatchPolicy::Network { max_bytes: 2048, .. }
        ));
    }
}
