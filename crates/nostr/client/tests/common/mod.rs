//! Shared helpers for client integration tests: an in-process scripted relay,
//! signed-event builders and a test signer.

#![allow(dead_code)]

use bookstr_client::{ClientConfig, ClientMessage, Filter, RelayMessage, RetryConfig};
use bookstr_core::{
    Event, EventTemplate, KIND_METADATA, Signer, SignerError, UnsignedEvent, get_event_hash,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Decides what the relay answers to each client frame.
pub type Handler = Arc<dyn Fn(&ClientMessage) -> Vec<RelayMessage> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Push(RelayMessage),
    Raw(String),
    Ping(Vec<u8>),
    Disconnect,
}

/// Non-text frames the relay saw from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Scripted relay listening on an ephemeral localhost port.
pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<ClientMessage>>>,
    frames: Arc<Mutex<Vec<ControlFrame>>>,
    connections: Arc<AtomicUsize>,
    control: broadcast::Sender<Control>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&ClientMessage) -> Vec<RelayMessage> + Send + Sync + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let received = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (control, _) = broadcast::channel(64);

        let task = {
            let received = received.clone();
            let frames = frames.clone();
            let connections = connections.clone();
            let control = control.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        handler.clone(),
                        received.clone(),
                        frames.clone(),
                        control.subscribe(),
                    ));
                }
            })
        };

        Self {
            addr,
            received,
            frames,
            connections,
            control,
            task,
        }
    }

    /// Relay that never answers.
    pub async fn silent() -> Self {
        Self::start(|_| Vec::new()).await
    }

    /// Relay that answers every REQ with `EOSE` and every EVENT with `OK`.
    pub async fn empty() -> Self {
        Self::start(|msg| match msg {
            ClientMessage::Req {
                subscription_id, ..
            } => vec![eose(subscription_id)],
            ClientMessage::Event(event) => vec![ok(&event.id, true, "")],
            ClientMessage::Close { .. } => Vec::new(),
        })
        .await
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ClientMessage> {
        self.received.lock().clone()
    }

    pub fn control_frames(&self) -> Vec<ControlFrame> {
        self.frames.lock().clone()
    }

    pub fn pings(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|frame| matches!(frame, ControlFrame::Ping(_)))
            .count()
    }

    pub fn reqs(&self) -> Vec<(String, Vec<Filter>)> {
        self.received
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                ClientMessage::Req {
                    subscription_id,
                    filters,
                } => Some((subscription_id.clone(), filters.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                ClientMessage::Close { subscription_id } => Some(subscription_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<Event> {
        self.received
            .lock()
            .iter()
            .filter_map(|msg| match msg {
                ClientMessage::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Send a frame to every connected client.
    pub fn push(&self, message: RelayMessage) {
        let _ = self.control.send(Control::Push(message));
    }

    /// Send raw text to every connected client.
    pub fn push_raw(&self, text: &str) {
        let _ = self.control.send(Control::Raw(text.to_string()));
    }

    /// Send a WebSocket ping to every connected client.
    pub fn ping(&self, payload: &[u8]) {
        let _ = self.control.send(Control::Ping(payload.to_vec()));
    }

    /// Drop every connection without a close handshake.
    pub fn disconnect_all(&self) {
        let _ = self.control.send(Control::Disconnect);
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    handler: Handler,
    received: Arc<Mutex<Vec<ClientMessage>>>,
    frames: Arc<Mutex<Vec<ControlFrame>>>,
    mut control: broadcast::Receiver<Control>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(message) = ClientMessage::from_json(text.as_str()) else {
                        continue;
                    };
                    received.lock().push(message.clone());
                    for reply in handler(&message) {
                        let json = reply.to_json().unwrap();
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    frames.lock().push(ControlFrame::Ping(data.to_vec()));
                }
                Some(Ok(Message::Pong(data))) => {
                    frames.lock().push(ControlFrame::Pong(data.to_vec()));
                }
                Some(Ok(Message::Close(_))) => {
                    frames.lock().push(ControlFrame::Close);
                    return;
                }
                Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            control = control.recv() => match control {
                Ok(Control::Push(message)) => {
                    let json = message.to_json().unwrap();
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Raw(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Ping(payload)) => {
                    if sink.send(Message::Ping(payload.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Disconnect) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Client config tuned for fast tests.
pub fn test_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.connect_timeout_ms = 2_000;
    config.ping_interval_secs = 0;
    config.publish_timeout_ms = 2_000;
    config.query_timeout_ms = 2_000;
    config.profiles.batch_timeout_ms = 2_000;
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 10,
        max_delay_ms: 50,
    };
    config
}

/// Poll `condition` until it holds (5s limit).
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn eose(subscription_id: &str) -> RelayMessage {
    RelayMessage::Eose {
        subscription_id: subscription_id.to_string(),
    }
}

pub fn ok(event_id: &str, success: bool, message: &str) -> RelayMessage {
    RelayMessage::Ok {
        event_id: event_id.to_string(),
        success,
        message: message.to_string(),
    }
}

pub fn deliver(subscription_id: &str, event: Event) -> RelayMessage {
    RelayMessage::Event {
        subscription_id: subscription_id.to_string(),
        event,
    }
}

/// 64-char hex pubkey built from one repeated hex digit.
pub fn pubkey(digit: char) -> String {
    std::iter::repeat_n(digit, 64).collect()
}

/// Event with a correct id and a dummy signature.
pub fn signed_event(
    pubkey: &str,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: &str,
    created_at: u64,
) -> Event {
    let unsigned = UnsignedEvent {
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags,
        content: content.to_string(),
    };
    let id = get_event_hash(&unsigned).unwrap();
    Event {
        id,
        pubkey: unsigned.pubkey,
        created_at,
        kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: "0".repeat(128),
    }
}

pub fn profile_event(pubkey: &str, name: &str, created_at: u64) -> Event {
    signed_event(
        pubkey,
        KIND_METADATA,
        vec![],
        &format!(r#"{{"name":"{name}"}}"#),
        created_at,
    )
}

pub fn text_note(pubkey: &str, content: &str) -> Event {
    signed_event(pubkey, 1, vec![], content, 1_700_000_000)
}

/// Authors requested by a REQ's first filter.
pub fn requested_authors(filters: &[Filter]) -> Vec<String> {
    filters
        .first()
        .and_then(|f| f.authors.clone())
        .unwrap_or_default()
}

/// Signer holding a fixed pubkey; ids are real hashes, signatures are zeros.
pub struct TestSigner {
    pub pubkey: String,
}

impl TestSigner {
    pub fn new() -> Self {
        Self {
            pubkey: pubkey('f'),
        }
    }
}

impl Signer for TestSigner {
    fn public_key(&self) -> Option<String> {
        Some(self.pubkey.clone())
    }

    fn can_sign(&self) -> bool {
        true
    }

    fn sign(&self, template: EventTemplate) -> Result<Event, SignerError> {
        let unsigned = template.into_unsigned(self.pubkey.clone());
        let id = get_event_hash(&unsigned).map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(Event {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: "0".repeat(128),
        })
    }
}
