//! Documents, revisions and attachment metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A document revision identifier of the form `<pos>-<hash>`.
///
/// `pos` is the revision's depth in the revision tree, `hash` is an opaque
/// digest chosen by the database that produced the revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    /// Depth of the revision in the revision tree (starts at 1).
    pub pos: u64,
    /// Opaque revision digest.
    pub hash: String,
}

impl Revision {
    /// Creates a revision from its parts.
    pub fn new(pos: u64, hash: impl Into<String>) -> Self {
        Self {
            pos,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

/// Error returned when a revision string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid revision: {0:?}")]
pub struct InvalidRevision(pub String);

impl FromStr for Revision {
    type Err = InvalidRevision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pos, hash) = s
            .split_once('-')
            .ok_or_else(|| InvalidRevision(s.to_string()))?;
        let pos: u64 = pos.parse().map_err(|_| InvalidRevision(s.to_string()))?;
        if pos == 0 || hash.is_empty() {
            return Err(InvalidRevision(s.to_string()));
        }
        Ok(Self::new(pos, hash))
    }
}

impl TryFrom<String> for Revision {
    type Error = InvalidRevision;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}

/// Attachment metadata carried inline with a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type of the attachment.
    pub content_type: String,
    /// Length of the attachment body in bytes.
    pub length: u64,
    /// Content digest, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// True when only the metadata is present and the body must be streamed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stub: bool,
}

impl Attachment {
    /// Creates attachment metadata with an inline body.
    pub fn new(content_type: impl Into<String>, length: u64) -> Self {
        Self {
            content_type: content_type.into(),
            length,
            digest: None,
            stub: false,
        }
    }

    /// Creates stub attachment metadata (body not inlined).
    pub fn stub(content_type: impl Into<String>, length: u64) -> Self {
        Self {
            stub: true,
            ..Self::new(content_type, length)
        }
    }
}

/// A single revision of a document as it travels between databases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID.
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision of this document body.
    #[serde(rename = "_rev")]
    pub rev: Revision,
    /// Whether this revision is a deletion tombstone.
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Attachments keyed by name.
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, Attachment>,
    /// User fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Creates a document revision with an empty body.
    pub fn new(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: false,
            attachments: BTreeMap::new(),
            body: Map::new(),
        }
    }

    /// Creates a deletion tombstone.
    pub fn tombstone(id: impl Into<String>, rev: Revision) -> Self {
        Self {
            deleted: true,
            ..Self::new(id, rev)
        }
    }

    /// Sets a body field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// Adds an attachment.
    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.attachments.insert(name.into(), attachment);
        self
    }

    /// Returns true if the document carries attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Serializes the document to its JSON wire form.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revision_parse_and_display() {
        let rev: Revision = "3-abc123".parse().unwrap();
        assert_eq!(rev.pos, 3);
        assert_eq!(rev.hash, "abc123");
        assert_eq!(rev.to_string(), "3-abc123");
    }

    #[test]
    fn revision_rejects_malformed() {
        assert!("abc".parse::<Revision>().is_err());
        assert!("0-abc".parse::<Revision>().is_err());
        assert!("x-abc".parse::<Revision>().is_err());
        assert!("2-".parse::<Revision>().is_err());
    }

    #[test]
    fn invalid_revision_is_a_std_error() {
        let err = "nope".parse::<Revision>().unwrap_err();
        assert_eq!(err, InvalidRevision("nope".into()));
        assert_eq!(err.to_string(), "invalid revision: \"nope\"");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn revisions_order_by_position() {
        let older = Revision::new(1, "ff");
        let newer = Revision::new(2, "00");
        assert!(older < newer);
    }

    #[test]
    fn document_json_shape() {
        let doc = Document::new("doc1", Revision::new(1, "a"))
            .with_field("title", json!("hello"))
            .with_attachment("note.txt", Attachment::new("text/plain", 5));

        let value: Value = serde_json::from_slice(&doc.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value["_id"], "doc1");
        assert_eq!(value["_rev"], "1-a");
        assert_eq!(value["title"], "hello");
        assert_eq!(value["_attachments"]["note.txt"]["length"], 5);
        assert!(value.get("_deleted").is_none());
    }

    #[test]
    fn tombstone_serializes_deleted_flag() {
        let doc = Document::tombstone("gone", Revision::new(4, "d"));
        let value: Value = serde_json::from_slice(&doc.to_json_bytes().unwrap()).unwrap();
        assert_eq!(value["_deleted"], true);
        assert!(!doc.has_attachments());
    }

    #[test]
    fn stub_attachment_flag() {
        let att = Attachment::stub("image/png", 1024);
        assert!(att.stub);
        assert_eq!(att.length, 1024);
    }
}
