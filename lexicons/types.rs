use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors raised while constructing record values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("check-in text is too long: {len} graphemes (max {max})")]
    TextTooLong { len: usize, max: usize },
    #[error("latitude out of range: {0}")]
    LatitudeOutOfRange(String),
    #[error("longitude out of range: {0}")]
    LongitudeOutOfRange(String),
    #[error("coordinate is not a finite number")]
    NonFiniteCoordinate,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid at-uri: {0}")]
    InvalidAtUri(String),
}

/// An immutable reference to a specific record: its AT-URI plus the CID of the
/// exact version referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

impl StrongRef {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }

    /// Parse the record address out of the uri component.
    pub fn at_uri(&self) -> Result<AtUri, RecordError> {
        self.uri.parse()
    }
}

/// A CID link as it appears inside blob references (`{"$link": "..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// A reference to an uploaded blob, in the canonical record encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type")]
    pub type_: String,
    #[serde(rename = "ref")]
    pub ref_: CidLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

impl BlobRef {
    pub fn new(cid: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            type_: "blob".to_string(),
            ref_: CidLink { link: cid.into() },
            mime_type: mime_type.into(),
            size,
        }
    }

    pub fn cid(&self) -> &str {
        &self.ref_.link
    }
}

/// A parsed `at://did/collection/rkey` record address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn new(
        did: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Self {
        Self {
            did: did.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }
}

impl FromStr for AtUri {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("at://")
            .ok_or_else(|| RecordError::InvalidAtUri(s.to_string()))?;
        let mut parts = rest.splitn(3, '/');
        let did = parts.next().filter(|p| p.starts_with("did:"));
        let collection = parts.next().filter(|p| !p.is_empty());
        let rkey = parts.next().filter(|p| !p.is_empty());
        match (did, collection, rkey) {
            (Some(did), Some(collection), Some(rkey)) => Ok(AtUri {
                did: did.to_string(),
                collection: collection.to_string(),
                rkey: rkey.to_string(),
            }),
            _ => Err(RecordError::InvalidAtUri(s.to_string())),
        }
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}
