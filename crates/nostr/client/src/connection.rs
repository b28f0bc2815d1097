//! Connection lifecycle for a single relay.
//!
//! The manager owns at most one transport. Concurrent `connect` calls while
//! a handshake is running share one future and receive the same transport.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::recovery::RetryPolicy;
use crate::relay::{ConnectionState, RelayTransport};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use url::Url;

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<RelayTransport>>>>;

enum Slot {
    Idle,
    Connecting { attempt: u64, future: ConnectFuture },
    Open(Arc<RelayTransport>),
}

struct SlotState {
    slot: Slot,
    attempts: u64,
}

/// Owns the relay transport and (re)opens it on demand.
pub struct ConnectionManager {
    url: Url,
    config: ClientConfig,
    state: Arc<Mutex<SlotState>>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let url = Url::parse(&config.relay_url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            config,
            state: Arc::new(Mutex::new(SlotState {
                slot: Slot::Idle,
                attempts: 0,
            })),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open transport, joining a handshake already in progress.
    ///
    /// A failed handshake returns the manager to `Idle`; retrying is left to
    /// the caller (see [`Self::connect_with_backoff`]).
    pub async fn connect(&self) -> Result<Arc<RelayTransport>> {
        let future = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match &state.slot {
                Slot::Open(transport) if transport.is_open() => return Ok(transport.clone()),
                Slot::Connecting { future, .. } => future.clone(),
                Slot::Idle | Slot::Open(_) => {
                    state.attempts += 1;
                    let attempt = state.attempts;
                    let future = self.open_future(attempt);
                    state.slot = Slot::Connecting {
                        attempt,
                        future: future.clone(),
                    };
                    future
                }
            }
        };
        future.await
    }

    /// `connect` under a bounded retry policy; the last error is returned
    /// once attempts are exhausted.
    pub async fn connect_with_backoff(&self, policy: &RetryPolicy) -> Result<Arc<RelayTransport>> {
        policy.retry("connect", || self.connect()).await
    }

    fn open_future(&self, attempt: u64) -> ConnectFuture {
        let url = self.url.clone();
        let config = self.config.clone();
        let state: Weak<Mutex<SlotState>> = Arc::downgrade(&self.state);

        async move {
            let result = RelayTransport::open(&url, &config).await;

            let Some(state) = state.upgrade() else {
                return result;
            };
            let mut state = state.lock();
            let current = matches!(
                state.slot,
                Slot::Connecting { attempt: a, .. } if a == attempt
            );
            if !current {
                // disconnect() ran while the handshake was in flight
                if let Ok(transport) = &result {
                    transport.close();
                }
                return Err(ClientError::Connection(
                    "connect cancelled by disconnect".to_string(),
                ));
            }
            state.slot = match &result {
                Ok(transport) => Slot::Open(transport.clone()),
                Err(_) => Slot::Idle,
            };
            result
        }
        .boxed()
        .shared()
    }

    /// The open transport, if any.
    pub fn current(&self) -> Option<Arc<RelayTransport>> {
        match &self.state.lock().slot {
            Slot::Open(transport) if transport.is_open() => Some(transport.clone()),
            _ => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &self.state.lock().slot {
            Slot::Idle => ConnectionState::Idle,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Open(transport) => transport.state(),
        }
    }

    /// Close the socket (if any) and return to `Idle`.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut self.state.lock().slot, Slot::Idle);
        match previous {
            Slot::Open(transport) => transport.close(),
            Slot::Connecting { .. } => {
                debug!(relay = %self.url, "disconnect during handshake");
            }
            Slot::Idle => {}
        }
        info!(relay = %self.url, "connection manager idle");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}
