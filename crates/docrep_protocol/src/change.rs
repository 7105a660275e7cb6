//! Change-feed entries and missing-revision sets.

use crate::document::Revision;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque marker of a change batch's position in the source's change feed.
///
/// The worker never interprets a token; it hands it back to the coordinator
/// once every change in the batch has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportToken(String);

impl ReportToken {
    /// Wraps a raw sequence marker.
    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    /// Returns the raw sequence marker.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a change batch: a document revision present on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Document ID.
    pub id: String,
    /// Leaf revision reported by the change feed.
    pub rev: Revision,
    /// Whether the revision is a deletion.
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeEntry {
    /// Creates a change entry for a live revision.
    pub fn new(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: false,
        }
    }

    /// Creates a change entry for a deleted revision.
    pub fn deleted(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            deleted: true,
            ..Self::new(id, rev)
        }
    }
}

/// A unit of replication progress produced by the change-feed supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Position marker reported back to the coordinator when done.
    pub token: ReportToken,
    /// Changes in feed order.
    pub changes: Vec<ChangeEntry>,
}

impl ChangeBatch {
    /// Creates a change batch.
    pub fn new(token: ReportToken, changes: Vec<ChangeEntry>) -> Self {
        Self { token, changes }
    }

    /// Number of revisions in the batch.
    pub fn revision_count(&self) -> usize {
        self.changes.len()
    }

    /// Groups revisions by document ID, preserving first-seen order of IDs
    /// and feed order of revisions within a document.
    pub fn revs_by_id(&self) -> Vec<(String, Vec<Revision>)> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut grouped: Vec<(String, Vec<Revision>)> = Vec::new();

        for change in &self.changes {
            match positions.get(change.id.as_str()) {
                Some(&idx) => grouped[idx].1.push(change.rev.clone()),
                None => {
                    positions.insert(change.id.as_str(), grouped.len());
                    grouped.push((change.id.clone(), vec![change.rev.clone()]));
                }
            }
        }

        grouped
    }
}

/// Revisions of one document that the target lacks, as reported by the
/// target's missing-revision check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRevs {
    /// Document ID.
    pub id: String,
    /// Revisions absent on the target.
    pub revs: Vec<Revision>,
    /// Revisions the target already has that may be ancestors of `revs`.
    #[serde(default)]
    pub possible_ancestors: Vec<Revision>,
}

impl MissingRevs {
    /// Creates a missing-revision set without ancestor hints.
    pub fn new(id: impl Into<String>, revs: Vec<Revision>) -> Self {
        Self {
            id: id.into(),
            revs,
            possible_ancestors: Vec::new(),
        }
    }

    /// Sets the possible ancestors.
    pub fn with_possible_ancestors(mut self, ancestors: Vec<Revision>) -> Self {
        self.possible_ancestors = ancestors;
        self
    }

    /// Splits into one set per revision, each carrying the same ancestors.
    pub fn per_revision(&self) -> impl Iterator<Item = MissingRevs> + '_ {
        self.revs.iter().map(move |rev| MissingRevs {
            id: self.id.clone(),
            revs: vec![rev.clone()],
            possible_ancestors: self.possible_ancestors.clone(),
        })
    }
}
