//! Relay client handle.

use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter};
use crate::publish::{PublishConfirmation, publish_on};
use crate::recovery::RetryPolicy;
use crate::relay::ConnectionState;
use crate::subscription::{Subscription, SubscriptionMessage};
use bookstr_core::{Event, EventTemplate, Signer};
use std::sync::Arc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

struct ClientInner {
    config: ClientConfig,
    manager: ConnectionManager,
    retry: RetryPolicy,
}

/// Cheaply cloneable handle to one relay.
///
/// The connection is opened lazily by the first operation that needs it and
/// reopened on demand after it drops.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

impl RelayClient {
    /// Client for `url` with default settings.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(ClientConfig::new(url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(config.clone())?;
        let retry = RetryPolicy::new(config.retry.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                manager,
                retry,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn url(&self) -> &str {
        self.inner.manager.url().as_str()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Open the connection now instead of on first use.
    pub async fn connect(&self) -> Result<()> {
        self.inner.manager.connect().await.map(|_| ())
    }

    /// Connect, retrying transient failures per the configured policy.
    pub async fn connect_with_backoff(&self) -> Result<()> {
        self.inner
            .manager
            .connect_with_backoff(&self.inner.retry)
            .await
            .map(|_| ())
    }

    pub fn disconnect(&self) {
        self.inner.manager.disconnect();
    }

    /// Subscribe to events matching `filters`.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        self.subscribe_with_prefix(None, filters).await
    }

    /// Subscribe with a readable id prefix (`prefix-xxxxxxxxxxxx`).
    pub async fn subscribe_with_prefix(
        &self,
        prefix: Option<&str>,
        filters: Vec<Filter>,
    ) -> Result<Subscription> {
        if filters.is_empty() {
            return Err(ClientError::InvalidRequest(
                "subscription needs at least one filter".to_string(),
            ));
        }

        let transport = self.inner.manager.connect().await?;
        let (subscription_id, rx) = transport.register_subscription(prefix)?;
        // dropped on error, which removes the routing entry again
        let subscription = Subscription::new(subscription_id.clone(), filters.clone(), &transport, rx);

        transport.send(&ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        })?;
        debug!(relay = %self.url(), subscription_id = %subscription_id, "subscribed");
        Ok(subscription)
    }

    /// Collect stored events until `EOSE` (or the query timeout), then close
    /// the subscription.
    pub async fn query(&self, filters: Vec<Filter>) -> Result<Vec<Event>> {
        let mut subscription = self.subscribe_with_prefix(Some("query"), filters).await?;
        let deadline = Instant::now() + self.inner.config.query_timeout();
        let mut events = Vec::new();

        loop {
            match timeout_at(deadline, subscription.next()).await {
                Ok(Some(SubscriptionMessage::Event(event))) => events.push(event),
                Ok(Some(SubscriptionMessage::Eose)) => break,
                Ok(Some(SubscriptionMessage::Closed(reason))) => {
                    warn!(relay = %self.url(), subscription_id = %subscription.id(), reason = %reason, "query closed by relay");
                    break;
                }
                Ok(None) => {
                    return Err(ClientError::Connection(
                        "connection lost during query".to_string(),
                    ));
                }
                Err(_) => {
                    debug!(relay = %self.url(), subscription_id = %subscription.id(), "query timed out before EOSE");
                    break;
                }
            }
        }

        subscription.unsubscribe();
        Ok(events)
    }

    /// Publish and return the relay's raw answer.
    pub async fn publish_confirmed(&self, event: &Event) -> Result<PublishConfirmation> {
        if event.id.is_empty() {
            return Err(ClientError::InvalidRequest("event has no id".to_string()));
        }
        let transport = self.inner.manager.connect().await?;
        publish_on(&transport, event, self.inner.config.publish_timeout()).await
    }

    /// Publish and wait for acceptance. Returns the event id.
    pub async fn publish(&self, event: &Event) -> Result<String> {
        let event_id = self.publish_confirmed(event).await?.into_result()?;
        info!(relay = %self.url(), event_id = %event_id, "event accepted");
        Ok(event_id)
    }

    /// Sign `template` with `signer` and publish the result.
    pub async fn sign_and_publish(
        &self,
        template: EventTemplate,
        signer: &dyn Signer,
    ) -> Result<String> {
        if !signer.can_sign() {
            return Err(ClientError::Capability(
                "no signer able to sign is available".to_string(),
            ));
        }
        let event = signer
            .sign(template)
            .map_err(|e| ClientError::Capability(e.to_string()))?;
        self.publish(&event).await
    }

    /// Live subscriptions on the current transport.
    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .manager
            .current()
            .map_or(0, |transport| transport.active_subscriptions())
    }

    /// Publishes still waiting on `OK`.
    pub fn pending_publishes(&self) -> usize {
        self.inner
            .manager
            .current()
            .map_or(0, |transport| transport.pending_publishes())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.url())
            .field("state", &self.state())
            .finish()
    }
}
