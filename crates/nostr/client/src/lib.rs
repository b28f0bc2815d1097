//! Nostr relay WebSocket client for bookstr.
//!
//! This crate provides:
//! - A single-relay connection with shared connect and on-demand reconnect
//! - Message parsing (NIP-01 relay protocol, both directions)
//! - Subscriptions routed by id, with `EOSE`/`CLOSED` handling
//! - Publishing with `OK` acknowledgment and timeout
//! - A batched, coalescing profile (kind 0) cache
//! - A TTL cache over an external metadata source
//! - The book similarity feed (kind 1729)
//!
//! # Example
//!
//! ```rust,no_run
//! use bookstr_client::{Filter, ProfileCache, RelayClient, SubscriptionMessage};
//!
//! #[tokio::main]
//! async fn main() -> bookstr_client::Result<()> {
//!     let client = RelayClient::new("wss://relay.damus.io")?;
//!
//!     // Subscribe to kind 1729 (book similarity)
//!     let filter = Filter::new().kinds(vec![1729]).limit(10);
//!     let mut sub = client.subscribe(vec![filter]).await?;
//!
//!     while let Some(message) = sub.next().await {
//!         match message {
//!             SubscriptionMessage::Event(event) => println!("Received event: {}", event.id),
//!             SubscriptionMessage::Eose => break,
//!             SubscriptionMessage::Closed(reason) => println!("Closed: {reason}"),
//!         }
//!     }
//!
//!     // Look up the author of a post
//!     let profiles = ProfileCache::new(client.clone());
//!     let profile = profiles.fetch_one("npub-hex").await?;
//!     println!("{:?}", profile.and_then(|p| p.name));
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod connection;
mod error;
mod feed;
mod lookup;
mod message;
mod profile;
mod publish;
mod recovery;
mod relay;
mod subscription;

// Re-export main types
pub use cache::{CacheEntry, TtlCache};
pub use client::RelayClient;
pub use config::{
    ClientConfig, DEFAULT_RELAY_URL, LookupCacheConfig, ProfileCacheConfig, RetryConfig,
    load_config,
};
pub use connection::ConnectionManager;
pub use error::{ClientError, Result};
pub use feed::{fetch_similarities, publish_similarity};
pub use lookup::{LookupCache, MetadataSource};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use profile::ProfileCache;
pub use publish::PublishConfirmation;
pub use recovery::{ExponentialBackoff, RetryPolicy};
pub use relay::{ConnectionState, RelayTransport};
pub use subscription::{Subscription, SubscriptionMessage, generate_subscription_id};

// Core types callers need alongside the client
pub use bookstr_core::{Event, EventTemplate, ItemRef, ProfileMetadata, Signer, Similarity};
