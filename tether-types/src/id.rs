//! Record identifiers.
//!
//! Two identifier spaces coexist: provisional ids minted on this device while
//! offline, and canonical ids assigned by the cloud store. On the wire and in
//! storage both are plain strings, told apart only by [`PROVISIONAL_PREFIX`].
//! Inside the engine they are always carried as a tagged [`RecordId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved prefix marking an identifier as locally originated.
pub const PROVISIONAL_PREFIX: &str = "local_";

/// Errors raised while constructing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("canonical id must not use the reserved prefix: {0}")]
    ReservedPrefix(String),

    #[error("identifier is empty")]
    Empty,
}

/// Identifier of a synchronized record, tagged by origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordId {
    /// Locally generated; always starts with [`PROVISIONAL_PREFIX`].
    Provisional(String),
    /// Assigned by the cloud store.
    Canonical(String),
}

impl RecordId {
    /// Mints a fresh provisional id (time-ordered UUID v7 behind the prefix).
    pub fn new_provisional() -> Self {
        RecordId::Provisional(format!("{PROVISIONAL_PREFIX}{}", uuid::Uuid::now_v7()))
    }

    /// Wraps a server-assigned id, refusing anything that could be mistaken
    /// for a provisional one.
    pub fn canonical(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id.starts_with(PROVISIONAL_PREFIX) {
            return Err(IdError::ReservedPrefix(id));
        }
        Ok(RecordId::Canonical(id))
    }

    /// Classifies a wire-level id string by its prefix.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with(PROVISIONAL_PREFIX) {
            RecordId::Provisional(raw.to_string())
        } else {
            RecordId::Canonical(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Provisional(s) | RecordId::Canonical(s) => s,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, RecordId::Provisional(_))
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, RecordId::Canonical(_))
    }
}

impl From<String> for RecordId {
    fn from(raw: String) -> Self {
        if raw.starts_with(PROVISIONAL_PREFIX) {
            RecordId::Provisional(raw)
        } else {
            RecordId::Canonical(raw)
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::Provisional(s) | RecordId::Canonical(s) => s,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
