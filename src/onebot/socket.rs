/// OneBot v11 forward WebSocket link.
///
/// One socket carries both directions: the host pushes events, and we
/// push action requests whose responses come back tagged with our echo.
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use super::event::{self, ApiResponse, ChatTarget, Frame, MessageEvent};
use super::OneBotError;
use crate::config::OneBotConfig;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ApiResponse>>>>;

/// Events emitted by the link to the runtime
#[derive(Debug)]
pub enum LinkEvent {
    /// Lifecycle `connect` received; the host told us who we are.
    Connected { self_id: i64 },
    Message(MessageEvent),
    /// The socket closed or failed. No further events follow.
    Closed(String),
}

/// Cloneable handle to an open link.
#[derive(Clone)]
pub struct OneBotLink {
    frame_tx: mpsc::Sender<String>,
    pending: Pending,
    self_id: Arc<AtomicI64>,
    timeout: Duration,
    url: String,
}

impl OneBotLink {
    /// Sends one action and waits for the response carrying its echo.
    pub async fn call(&self, action: &str, params: Value) -> Result<ApiResponse, OneBotError> {
        let echo = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.register(&echo, tx);

        let frame = event::build_action(action, &params, &echo);
        if self.frame_tx.send(frame).await.is_err() {
            self.forget(&echo);
            return Err(OneBotError::Closed);
        }
        debug!("[onebot] -> {action} (echo {echo})");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(OneBotError::Closed),
            Err(_) => {
                self.forget(&echo);
                Err(OneBotError::Timeout {
                    action: action.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Sends a plain-text reply to where a message came from.
    pub async fn send_reply(&self, target: &ChatTarget, text: &str) -> Result<(), OneBotError> {
        let params = event::build_reply_params(target, text);
        let response = self.call("send_msg", params).await?;
        if !response.is_ok() {
            warn!(
                "[onebot] send_msg failed (retcode {}): {}",
                response.retcode, response.message
            );
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.frame_tx.is_closed()
    }

    /// Whether both handles drive the same socket
    pub fn same_link(&self, other: &OneBotLink) -> bool {
        self.frame_tx.same_channel(&other.frame_tx)
    }

    /// Bot account id announced by the host, 0 until the lifecycle event.
    pub fn self_id(&self) -> i64 {
        self.self_id.load(Ordering::Relaxed)
    }

    /// One-line state used in resolver diagnostics.
    pub fn describe(&self) -> String {
        if self.is_closed() {
            format!("closed ({})", self.url)
        } else {
            format!("connected self_id={} ({})", self.self_id(), self.url)
        }
    }

    fn register(&self, echo: &str, tx: oneshot::Sender<ApiResponse>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(echo.to_string(), tx);
        }
    }

    fn forget(&self, echo: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(echo);
        }
    }
}

/// Opens the socket and spawns its read/write loop.
///
/// The handshake is awaited here so auth and URL problems surface as a
/// `OneBotError` immediately; everything after that arrives as `LinkEvent`s.
pub async fn connect(
    config: &OneBotConfig,
) -> Result<(mpsc::UnboundedReceiver<LinkEvent>, OneBotLink), OneBotError> {
    let mut request = config
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| OneBotError::Config(format!("invalid ws_url {}: {e}", config.ws_url)))?;

    if let Some(token) = config.access_token.as_deref().filter(|t| !t.is_empty()) {
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| OneBotError::Config(format!("invalid access_token: {e}")))?;
        request.headers_mut().insert("Authorization", header);
    }

    info!("[onebot] Connecting to {}...", config.ws_url);
    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_connect_error)?;
    info!("[onebot] WebSocket connected to {}", config.ws_url);

    // Unbounded: the reader also delivers action responses and must never
    // wait on a handler that is itself waiting for one of them
    let (event_tx, event_rx) = mpsc::unbounded_channel::<LinkEvent>();
    let (frame_tx, frame_rx) = mpsc::channel::<String>(100);

    let link = OneBotLink {
        frame_tx,
        pending: Arc::new(Mutex::new(HashMap::new())),
        self_id: Arc::new(AtomicI64::new(0)),
        timeout: Duration::from_secs(config.request_timeout_secs),
        url: config.ws_url.clone(),
    };

    tokio::spawn(run_event_loop(
        stream,
        link.pending.clone(),
        link.self_id.clone(),
        event_tx,
        frame_rx,
    ));

    Ok((event_rx, link))
}

fn classify_connect_error(e: tungstenite::Error) -> OneBotError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                OneBotError::Auth(format!("handshake rejected with {status}"))
            } else {
                OneBotError::Transient(format!("handshake rejected with {status}"))
            }
        }
        tungstenite::Error::Url(e) => OneBotError::Config(format!("invalid ws_url: {e}")),
        other => OneBotError::Transient(format!("WebSocket connect: {other}")),
    }
}

async fn run_event_loop<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    pending: Pending,
    self_id: Arc<AtomicI64>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    mut frame_rx: mpsc::Receiver<String>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();

    let read_pending = pending.clone();
    let read_events = event_tx.clone();
    let mut read_handle = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    return format!("closed by host: {frame:?}");
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("[onebot] WebSocket read error: {e}");
                    return format!("read error: {e}");
                }
            };

            match event::parse_frame(&text) {
                Ok(Frame::Response(response)) => {
                    let waiter = response.echo.as_deref().and_then(|echo| {
                        read_pending.lock().ok().and_then(|mut p| p.remove(echo))
                    });
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!("[onebot] response without waiter: {:?}", response.echo),
                    }
                }
                Ok(Frame::Message(msg)) => {
                    debug!("[onebot] message from {}: {}", msg.user_id, msg.text());
                    if read_events.send(LinkEvent::Message(msg)).is_err() {
                        return "runtime dropped the event channel".to_string();
                    }
                }
                Ok(Frame::Lifecycle { self_id: id }) => {
                    self_id.store(id, Ordering::Relaxed);
                    let _ = read_events.send(LinkEvent::Connected { self_id: id });
                }
                Ok(Frame::Ignored) => {}
                Err(e) => warn!("[onebot] unparseable frame ({e}): {text}"),
            }
        }
        "connection closed".to_string()
    });

    let mut write_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame)).await {
                error!("[onebot] WebSocket write error: {e}");
                return format!("write error: {e}");
            }
        }
        "writer stopped".to_string()
    });

    let (reason, reader_done) = tokio::select! {
        r = &mut read_handle => (r.unwrap_or_else(|e| format!("reader task failed: {e}")), true),
        w = &mut write_handle => (w.unwrap_or_else(|e| format!("writer task failed: {e}")), false),
    };
    // The writer owns the frame receiver; once it is gone every handle
    // reports closed. Wait for the cancelled task so that holds before
    // `Closed` is sent.
    let survivor = if reader_done { write_handle } else { read_handle };
    survivor.abort();
    let _ = survivor.await;

    // Dropping the waiters fails every in-flight call with `Closed`
    if let Ok(mut p) = pending.lock() {
        p.clear();
    }
    warn!("[onebot] Link down: {reason}");
    let _ = event_tx.send(LinkEvent::Closed(reason));
}

#[cfg(test)]
impl OneBotLink {
    /// A link with no socket behind it; the receiver sees outgoing frames.
    pub(crate) fn detached(timeout: Duration) -> (Self, mpsc::Receiver<String>) {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let link = OneBotLink {
            frame_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            self_id: Arc::new(AtomicI64::new(0)),
            timeout,
            url: "ws://test".to_string(),
        };
        (link, frame_rx)
    }
}
