//! Single relay transport
//!
//! One open WebSocket plus its routing tables. A writer task owns the sink
//! (outbound frames and keepalive pings); a reader task owns the stream and
//! dispatches relay frames in arrival order:
//! - `EVENT`/`EOSE` go to the subscription registered under the frame's id
//! - `CLOSED` tears the subscription entry down
//! - `OK` resolves the pending publish registered under the event id
//! - `NOTICE` is logged
//!
//! When the socket closes, every subscription sender and pending publish is
//! dropped so waiters observe the loss instead of hanging.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::publish::PublishConfirmation;
use crate::subscription::{SubscriptionMessage, generate_subscription_id};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no connect in progress
    Idle,
    /// Handshake in progress
    Connecting,
    /// Connected and ready
    Open,
    /// Transport closed; the next connect opens a fresh one
    Closed,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// How long the writer may spend flushing a queued close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Routing tables shared by the transport handle and its reader task.
#[derive(Default)]
struct Routes {
    closed: bool,
    /// subscription_id -> subscription queue
    subscriptions: HashMap<String, mpsc::UnboundedSender<SubscriptionMessage>>,
    /// event_id -> (registration ticket, acknowledgment waiter)
    pending: HashMap<String, (u64, oneshot::Sender<PublishConfirmation>)>,
    next_ticket: u64,
}

struct TransportShared {
    id: u64,
    url: Url,
    routes: Mutex<Routes>,
    state: watch::Sender<ConnectionState>,
}

impl TransportShared {
    fn dispatch(&self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(relay = %self.url, error = %e, "dropping malformed relay frame");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.route(&subscription_id, SubscriptionMessage::Event(event)),
            RelayMessage::Eose { subscription_id } => {
                self.route(&subscription_id, SubscriptionMessage::Eose)
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                let sender = self.routes.lock().subscriptions.remove(&subscription_id);
                match sender {
                    Some(tx) => {
                        debug!(relay = %self.url, subscription_id = %subscription_id, reason = %message, "relay closed subscription");
                        let _ = tx.send(SubscriptionMessage::Closed(message));
                    }
                    None => {
                        debug!(relay = %self.url, subscription_id = %subscription_id, "CLOSED for unknown subscription")
                    }
                }
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                let waiter = self.routes.lock().pending.remove(&event_id);
                match waiter {
                    Some((_, tx)) => {
                        let _ = tx.send(PublishConfirmation {
                            event_id,
                            accepted: success,
                            message,
                        });
                    }
                    None => debug!(relay = %self.url, event_id = %event_id, "OK for unknown event"),
                }
            }
            RelayMessage::Notice { message } => {
                info!(relay = %self.url, notice = %message, "relay notice");
            }
        }
    }

    fn route(&self, subscription_id: &str, message: SubscriptionMessage) {
        let mut routes = self.routes.lock();
        let Some(tx) = routes.subscriptions.get(subscription_id) else {
            debug!(relay = %self.url, subscription_id = %subscription_id, "frame for unknown subscription");
            return;
        };
        if tx.send(message).is_err() {
            debug!(relay = %self.url, subscription_id = %subscription_id, "subscription receiver gone, removing");
            routes.subscriptions.remove(subscription_id);
        }
    }

    /// Flip to `Closed` and drop every route. Idempotent.
    fn mark_closed(&self) {
        let (subscriptions, pending) = {
            let mut routes = self.routes.lock();
            if routes.closed {
                return;
            }
            routes.closed = true;
            (
                std::mem::take(&mut routes.subscriptions),
                std::mem::take(&mut routes.pending),
            )
        };
        self.state.send_replace(ConnectionState::Closed);
        info!(
            relay = %self.url,
            transport = self.id,
            subscriptions = subscriptions.len(),
            pending_publishes = pending.len(),
            "relay connection closed"
        );
    }
}

/// An open connection to one relay.
pub struct RelayTransport {
    shared: Arc<TransportShared>,
    outbound: mpsc::UnboundedSender<Message>,
    /// Set once a close frame is queued; the writer then exits on its own.
    closing: AtomicBool,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl RelayTransport {
    /// Perform the WebSocket handshake (bounded by the connect timeout) and
    /// start the reader and writer tasks.
    pub async fn open(url: &Url, config: &ClientConfig) -> Result<Arc<Self>> {
        info!(relay = %url, "connecting to relay");

        let connect_timeout = config.connect_timeout();
        let ws = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!(relay = %url, error = %e, "relay handshake failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(relay = %url, "relay handshake timed out");
                return Err(ClientError::Timeout(format!(
                    "connect to {url} timed out after {connect_timeout:?}"
                )));
            }
        };

        let id = NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed);
        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(TransportShared {
            id,
            url: url.clone(),
            routes: Mutex::new(Routes::default()),
            state,
        });

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            config.ping_interval(),
            shared.clone(),
        ));
        let reader = tokio::spawn(read_loop(stream, outbound.clone(), shared.clone()));

        info!(relay = %url, transport = id, "connected to relay");
        Ok(Arc::new(Self {
            shared,
            outbound,
            closing: AtomicBool::new(false),
            writer,
            reader,
        }))
    }

    /// Process-unique transport number; a reconnect yields a new one.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Resolves once the transport has closed.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        let json = message.to_json()?;
        debug!(relay = %self.shared.url, frame = %json, "sending frame");
        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Register a fresh subscription id. The entry exists before any `REQ`
    /// is sent, so no early `EVENT` can be missed.
    pub fn register_subscription(
        &self,
        prefix: Option<&str>,
    ) -> Result<(String, mpsc::UnboundedReceiver<SubscriptionMessage>)> {
        let mut routes = self.shared.routes.lock();
        if routes.closed {
            return Err(ClientError::NotConnected);
        }
        let mut id = generate_subscription_id(prefix);
        while routes.subscriptions.contains_key(&id) {
            id = generate_subscription_id(prefix);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.subscriptions.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Returns whether the entry was still registered.
    pub fn remove_subscription(&self, subscription_id: &str) -> bool {
        self.shared
            .routes
            .lock()
            .subscriptions
            .remove(subscription_id)
            .is_some()
    }

    /// Register an acknowledgment waiter for `event_id`. The returned ticket
    /// identifies this registration for [`Self::cancel_publish`].
    pub fn register_publish(
        &self,
        event_id: &str,
    ) -> Result<(u64, oneshot::Receiver<PublishConfirmation>)> {
        let mut routes = self.shared.routes.lock();
        if routes.closed {
            return Err(ClientError::NotConnected);
        }
        if routes.pending.contains_key(event_id) {
            return Err(ClientError::InvalidRequest(format!(
                "event {event_id} is already awaiting acknowledgment"
            )));
        }
        routes.next_ticket += 1;
        let ticket = routes.next_ticket;
        let (tx, rx) = oneshot::channel();
        routes.pending.insert(event_id.to_string(), (ticket, tx));
        Ok((ticket, rx))
    }

    /// Drop the pending entry for `event_id` if it still belongs to `ticket`.
    /// An entry registered by a newer publish of the same id is left alone.
    pub fn cancel_publish(&self, event_id: &str, ticket: u64) {
        let mut routes = self.shared.routes.lock();
        if routes
            .pending
            .get(event_id)
            .is_some_and(|(owner, _)| *owner == ticket)
        {
            routes.pending.remove(event_id);
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.routes.lock().subscriptions.len()
    }

    pub fn pending_publishes(&self) -> usize {
        self.shared.routes.lock().pending.len()
    }

    /// Send a close frame and mark the transport closed.
    pub fn close(&self) {
        if self.is_open() {
            info!(relay = %self.shared.url, transport = self.shared.id, "disconnecting from relay");
            if self.outbound.send(Message::Close(None)).is_ok() {
                self.closing.store(true, Ordering::Release);
            }
        }
        self.shared.mark_closed();
    }
}

impl std::fmt::Debug for RelayTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTransport")
            .field("id", &self.shared.id)
            .field("url", &self.shared.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.shared.mark_closed();
        if !self.closing.load(Ordering::Acquire) {
            self.writer.abort();
        }
        self.reader.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    ping_interval: Option<Duration>,
    shared: Arc<TransportShared>,
) {
    let period = ping_interval.unwrap_or(Duration::from_secs(3600));
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if matches!(message, Message::Close(_)) {
                    match timeout(CLOSE_GRACE, sink.send(message)).await {
                        Ok(Ok(())) => debug!(relay = %shared.url, "close frame sent"),
                        Ok(Err(e)) => debug!(relay = %shared.url, error = %e, "close frame not sent"),
                        Err(_) => debug!(relay = %shared.url, "close frame timed out"),
                    }
                    break;
                }
                if let Err(e) = sink.send(message).await {
                    warn!(relay = %shared.url, error = %e, "websocket write failed");
                    break;
                }
            }
            _ = ping.tick(), if ping_interval.is_some() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    warn!(relay = %shared.url, error = %e, "keepalive ping failed");
                    break;
                }
            }
        }
    }

    shared.mark_closed();
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<TransportShared>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(text.as_str()),
            Ok(Message::Ping(data)) => {
                let _ = outbound.send(Message::Pong(data));
            }
            Ok(Message::Close(frame)) => {
                debug!(relay = %shared.url, ?frame, "relay sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(relay = %shared.url, error = %e, "websocket read failed");
                break;
            }
        }
    }

    shared.mark_closed();
}
