//! Configuration for the replication worker.

use std::time::Duration;

/// Default number of concurrent document readers.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default byte budget of a batch bound for a network target.
pub const DEFAULT_DOC_BUFFER_BYTES: usize = 512 * 1024;
/// Default document count of a batch bound for an embedded target.
pub const DEFAULT_DOC_BUFFER_LEN: usize = 10;
/// Default largest attachment that may travel inside a bulk write.
pub const DEFAULT_MAX_BULK_ATTACHMENT_SIZE: u64 = 64 * 1024;
/// Default largest number of attachments a bulk-written document may carry.
pub const DEFAULT_MAX_BULK_ATTACHMENTS_PER_DOC: usize = 8;
/// Default interval between progress pushes to the coordinator.
pub const DEFAULT_STATS_REPORT_INTERVAL: Duration = Duration::from_secs(10);
/// Default capacity of the worker's mailbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Configuration for one replication worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of concurrent document readers.
    pub concurrency: usize,
    /// Byte budget of a batch bound for a network target.
    pub doc_buffer_bytes: usize,
    /// Document count of a batch bound for an embedded target.
    pub doc_buffer_len: usize,
    /// Attachments larger than this force an individual write.
    pub max_bulk_attachment_size: u64,
    /// Documents with more attachments than this are written individually.
    pub max_bulk_attachments_per_doc: usize,
    /// Minimum time between progress pushes to the coordinator.
    pub stats_report_interval: Duration,
    /// Capacity of the worker's mailbox.
    pub inbox_capacity: usize,
}

impl WorkerConfig {
    /// Creates a configuration with the given reader concurrency.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            doc_buffer_bytes: DEFAULT_DOC_BUFFER_BYTES,
            doc_buffer_len: DEFAULT_DOC_BUFFER_LEN,
            max_bulk_attachment_size: DEFAULT_MAX_BULK_ATTACHMENT_SIZE,
            max_bulk_attachments_per_doc: DEFAULT_MAX_BULK_ATTACHMENTS_PER_DOC,
            stats_report_interval: DEFAULT_STATS_REPORT_INTERVAL,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }

    /// Sets the reader concurrency (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the network-target batch byte budget.
    pub fn with_doc_buffer_bytes(mut self, bytes: usize) -> Self {
        self.doc_buffer_bytes = bytes;
        self
    }

    /// Sets the embedded-target batch document count.
    pub fn with_doc_buffer_len(mut self, len: usize) -> Self {
        self.doc_buffer_len = len.max(1);
        self
    }

    /// Sets the attachment limits for bulk writes.
    pub fn with_bulk_attachment_limits(mut self, max_size: u64, max_per_doc: usize) -> Self {
        self.max_bulk_attachment_size = max_size;
        self.max_bulk_attachments_per_doc = max_per_doc;
        self
    }

    /// Sets the progress report interval.
    pub fn with_stats_report_interval(mut self, interval: Duration) -> Self {
        self.stats_report_interval = interval;
        self
    }

    /// Sets the mailbox capacity.
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
