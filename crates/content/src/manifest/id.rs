//! Structured manifest identifiers
//!
//! Every piece of installable content is keyed by a `ManifestId` of the form
//! `{schemaVersion}.{userVersion}.{publisher}.{contentType}.{contentName}`.
//! Publishers, profile content lists, the reference tracker and the
//! reconciliation service all key by this identity, so equality and hashing
//! are case-insensitive everywhere.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Number of dot-separated segments in a well-formed id
pub const MANIFEST_ID_SEGMENTS: usize = 5;

/// Errors raised when parsing a manifest id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestIdError {
    /// The id does not match the 5-segment dotted form
    #[error("invalid manifest id '{value}': {reason}")]
    InvalidFormat { value: String, reason: String },
}

/// A validated, structured content identifier
///
/// The underlying string is preserved exactly as given (including case),
/// but comparison, hashing and ordering ignore ASCII case. Construct with
/// [`ManifestId::create`]; [`ManifestId::new_unchecked`] exists only for
/// deserialization and other trusted paths.
#[derive(Debug, Clone)]
pub struct ManifestId(String);

impl ManifestId {
    /// Parse and validate an id string
    ///
    /// Fails unless the string splits into exactly five non-empty,
    /// non-whitespace segments. A segment can never contain a dot: any
    /// extra dot changes the segment count and is rejected here.
    pub fn create<S: Into<String>>(value: S) -> Result<Self, ManifestIdError> {
        let value = value.into();
        let segments: Vec<&str> = value.split('.').collect();

        if segments.len() != MANIFEST_ID_SEGMENTS {
            return Err(ManifestIdError::InvalidFormat {
                reason: format!(
                    "expected {} dot-separated segments, found {}",
                    MANIFEST_ID_SEGMENTS,
                    segments.len()
                ),
                value,
            });
        }

        if let Some(position) = segments.iter().position(|s| s.trim().is_empty()) {
            return Err(ManifestIdError::InvalidFormat {
                reason: format!("segment {} is empty", position + 1),
                value,
            });
        }

        Ok(Self(value))
    }

    /// Wrap a string without validating it
    ///
    /// Only for deserialization of already-persisted ids and for lookups
    /// against externally-owned id lists (profile content lists may carry
    /// arbitrary strings; wrapping them lets the case-insensitive identity
    /// apply uniformly).
    pub fn new_unchecked<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    /// The id as originally written
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment(&self, index: usize) -> Option<&str> {
        self.0.split('.').nth(index)
    }

    /// Segment 0: the id schema revision
    pub fn schema_version(&self) -> Option<&str> {
        self.segment(0)
    }

    /// Segment 1: the publisher-chosen content version
    pub fn user_version(&self) -> Option<&str> {
        self.segment(1)
    }

    /// Segment 2: the publisher name
    ///
    /// Fixed position: the cross-publisher dependency resolver matches
    /// subscriptions against this segment.
    pub fn publisher(&self) -> Option<&str> {
        self.segment(2)
    }

    /// Segment 3: the content type tag
    pub fn content_type_segment(&self) -> Option<&str> {
        self.segment(3)
    }

    /// Segment 4: the content name
    ///
    /// Fixed position: catalog entries are matched against this segment.
    pub fn content_name(&self) -> Option<&str> {
        self.segment(4)
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ManifestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ManifestId {
    type Err = ManifestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::create(s)
    }
}

impl PartialEq for ManifestId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ManifestId {}

impl Hash for ManifestId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for ManifestId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ManifestId {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.bytes().map(|b| b.to_ascii_lowercase());
        let right = other.0.bytes().map(|b| b.to_ascii_lowercase());
        left.cmp(right)
    }
}

impl Serialize for ManifestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ManifestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Trusted path: persisted ids were validated when first created
        let value = String::deserialize(deserializer)?;
        Ok(Self::new_unchecked(value))
    }
}
