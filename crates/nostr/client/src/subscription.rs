//! Subscription handles.
//!
//! A [`Subscription`] owns the receiving end of the queue the transport's
//! reader task feeds. Dropping or unsubscribing it removes the routing entry
//! and, if the socket is still open, tells the relay with `CLOSE`.

use crate::message::{ClientMessage, Filter};
use crate::relay::RelayTransport;
use bookstr_core::Event;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Random part of every subscription id.
const SUBSCRIPTION_ID_LEN: usize = 12;

/// Generate a subscription ID: 12 random alphanumerics, optionally
/// `prefix-` first. 62^12 possibilities keeps collisions out of reach for
/// any realistic number of live subscriptions.
pub fn generate_subscription_id(prefix: Option<&str>) -> String {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUBSCRIPTION_ID_LEN)
        .map(char::from)
        .collect();
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}-{random}"),
        _ => random,
    }
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// An event matching the filters
    Event(Event),
    /// Stored events are done; live events may follow
    Eose,
    /// The relay ended the subscription
    Closed(String),
}

/// A live subscription on one relay transport.
pub struct Subscription {
    id: String,
    filters: Vec<Filter>,
    transport: Weak<RelayTransport>,
    /// `None` once the subscription is inert
    rx: Option<mpsc::UnboundedReceiver<SubscriptionMessage>>,
    eose: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        filters: Vec<Filter>,
        transport: &Arc<RelayTransport>,
        rx: mpsc::UnboundedReceiver<SubscriptionMessage>,
    ) -> Self {
        Self {
            id,
            filters,
            transport: Arc::downgrade(transport),
            rx: Some(rx),
            eose: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Whether the relay has signalled end of stored events.
    pub fn has_eose(&self) -> bool {
        self.eose
    }

    /// False after unsubscribe, relay `CLOSED`, or connection loss.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Next message in transport order, or `None` once the subscription is
    /// inert.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Some(message) => {
                match &message {
                    SubscriptionMessage::Eose => self.eose = true,
                    // the transport already dropped the routing entry
                    SubscriptionMessage::Closed(_) => self.rx = None,
                    SubscriptionMessage::Event(_) => {}
                }
                Some(message)
            }
            None => {
                debug!(subscription_id = %self.id, "subscription ended with connection");
                self.rx = None;
                None
            }
        }
    }

    /// Next event, skipping `EOSE`. `None` when the subscription ends.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.next().await? {
                SubscriptionMessage::Event(event) => return Some(event),
                SubscriptionMessage::Eose => continue,
                SubscriptionMessage::Closed(_) => return None,
            }
        }
    }

    /// Stop receiving. Idempotent, and safe after the transport closed.
    pub fn unsubscribe(&mut self) {
        if self.rx.take().is_none() {
            return;
        }
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if transport.remove_subscription(&self.id) && transport.is_open() {
            let close = ClientMessage::Close {
                subscription_id: self.id.clone(),
            };
            if let Err(e) = transport.send(&close) {
                debug!(subscription_id = %self.id, error = %e, "CLOSE not sent");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filters", &self.filters)
            .field("eose", &self.eose)
            .field("active", &self.is_active())
            .finish()
    }
}
