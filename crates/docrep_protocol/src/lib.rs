//! # docrep Protocol
//!
//! Replication data types shared by the docrep worker and its collaborators.
//!
//! This crate provides:
//! - `Document`, `Revision` and `Attachment` for document revisions in flight
//! - `ChangeEntry`, `ChangeBatch` and `ReportToken` for change-feed output
//! - `MissingRevs` for the result of a missing-revision diff
//! - `ReplicationStats` for progress accounting
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod document;
mod stats;

pub use change::{ChangeBatch, ChangeEntry, MissingRevs, ReportToken};
pub use document::{Attachment, Document, InvalidRevision, Revision};
pub use stats::ReplicationStats;
