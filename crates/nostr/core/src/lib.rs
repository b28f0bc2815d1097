//! Nostr protocol types for bookstr.
//!
//! This crate provides:
//! - NIP-01: Event model, canonical serialization and id hashing
//! - Profile metadata (kind 0 content) with unknown-field passthrough
//! - Book similarity relations (kind 1729): validation, parsing, templates
//! - The [`Signer`] seam for external key management

mod metadata;
mod nip01;
mod signer;
mod similarity;

// NIP-01: Basic protocol
pub use nip01::{
    Event, EventTemplate, KIND_METADATA, KIND_SHORT_TEXT_NOTE, Nip01Error, UnsignedEvent,
    get_event_hash, serialize_event, validate_unsigned_event, verify_event_id,
};

// Profile metadata
pub use metadata::{MetadataError, ProfileMetadata};

// Signing seam
pub use signer::{Signer, SignerError};

// Similarity relations
pub use similarity::{
    ISBN_KIND, ITEM_KIND_TAG, ITEM_TAG, ItemRef, KIND_BOOK_SIMILARITY, SCORE_TAG, Similarity,
    SimilarityError, parse_similarity, similarity_template,
};
