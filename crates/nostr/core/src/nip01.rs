//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Event serialization for hashing
//! - Event id computation (sha256 over the canonical serialization)
//!
//! Signing lives behind the [`Signer`](crate::Signer) trait; key material never
//! passes through this crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Iterate over the tags whose first element equals `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }

    /// First value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Strip the signature, keeping the fields covered by the id hash.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signer).
///
/// ```
/// use bookstr_core::EventTemplate;
///
/// let template = EventTemplate {
///     created_at: 1_700_000_000,
///     kind: 1,
///     tags: vec![vec!["p".to_string(), "pubkey_to_mention".to_string()]],
///     content: "Hello Nostr!".to_string(),
/// };
/// assert_eq!(template.kind, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Attach the author key, producing the structure that gets hashed and signed.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;

/// Serialize an unsigned event for hashing.
///
/// Produces the canonical `[0, pubkey, created_at, kind, tags, content]` array.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !validate_unsigned_event(event) {
        return Err(Nip01Error::InvalidEvent(
            "can't serialize event with wrong or missing properties".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Get the event hash (id) from an unsigned event.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// Validate an unsigned event structure.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    // 64 lowercase hex characters
    event.pubkey.len() == 64
        && event
            .pubkey
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Check that an event's id matches its content.
pub fn verify_event_id(event: &Event) -> bool {
    get_event_hash(&event.unsigned())
        .map(|hash| hash == event.id)
        .unwrap_or(false)
}
