//! Profile metadata (kind 0) content.
//!
//! The content of a metadata event is itself a JSON object. Recognized fields
//! are typed; anything else is kept in [`ProfileMetadata::extra`] and written
//! back out unchanged.

use crate::nip01::{Event, KIND_METADATA};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur when reading profile metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("expected kind 0, got kind {0}")]
    WrongKind(u16),

    #[error("invalid metadata content: {0}")]
    InvalidContent(#[from] serde_json::Error),
}

/// Parsed profile metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    /// Bio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// NIP-05 verified identifier (`name@domain`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,

    /// Lightning address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,

    /// Unrecognized fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileMetadata {
    /// Parse the content of a metadata event.
    pub fn from_event(event: &Event) -> Result<Self, MetadataError> {
        if event.kind != KIND_METADATA {
            return Err(MetadataError::WrongKind(event.kind));
        }
        Self::from_content(&event.content)
    }

    /// Parse a metadata JSON object.
    pub fn from_content(content: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Serialize back to event content.
    pub fn to_content(&self) -> String {
        serde_json::Value::Object(self.to_map()).to_string()
    }

    fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Best human-readable label: display name, then name.
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.trim().is_empty()))
    }
}
