//! Signing capability seam.
//!
//! Key management happens outside this workspace. Anything able to turn an
//! [`EventTemplate`] into a signed [`Event`] implements [`Signer`]; callers ask
//! [`Signer::can_sign`] before publishing so a read-only session fails fast.

use crate::nip01::{Event, EventTemplate};
use thiserror::Error;

/// Errors raised by a signer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("no signing key available")]
    Unavailable,

    #[error("signing failed: {0}")]
    Failed(String),
}

/// Produces signed events on behalf of the current identity.
pub trait Signer: Send + Sync {
    /// Hex public key of the signing identity, if one is loaded.
    fn public_key(&self) -> Option<String>;

    /// Whether [`Signer::sign`] can currently succeed.
    fn can_sign(&self) -> bool;

    /// Compute id and signature for `template`.
    fn sign(&self, template: EventTemplate) -> Result<Event, SignerError>;
}
