//! Duplex event transport over a WebSocket.
//!
//! [`connect`] splits the socket into an [`EventSender`] (cloneable) and an
//! [`EventReceiver`] that share one connection status. Each event is one JSON
//! text frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{HeaderName, HeaderValue},
    Error as WsError, Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ConnectTarget;
use crate::error::{Result, VoiceError};
use crate::protocol::{InboundEvent, OutboundEvent};

type VoiceSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on delivering the close frame to an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open the connection described by `target`. No retry.
pub async fn connect(target: &ConnectTarget) -> Result<(EventSender, EventReceiver)> {
    let mut request = target.url.as_str().into_client_request().map_err(|error| {
        VoiceError::Configuration(format!("Invalid websocket URL {:?}: {error}", target.url))
    })?;
    for (name, value) in &target.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
            VoiceError::Configuration(format!("Invalid header name {name:?}: {error}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|error| {
            VoiceError::Configuration(format!("Invalid value for header {name}: {error}"))
        })?;
        request.headers_mut().insert(name, value);
    }

    tracing::debug!(url = %target.url, "Connecting websocket");
    let (socket, _) = connect_async(request).await.map_err(map_connect_error)?;
    let (sink, stream) = socket.split();
    let link = Arc::new(Link::new());

    Ok((
        EventSender {
            sink: Arc::new(Mutex::new(sink)),
            link: Arc::clone(&link),
        },
        EventReceiver { stream, link },
    ))
}

/// Connection status shared by both halves.
#[derive(Debug)]
struct Link {
    open: AtomicBool,
    /// The peer closed or the socket dropped, as seen by the receiver.
    peer_ended: AtomicBool,
    end_reason: SyncMutex<Option<String>>,
    sink_closed: AtomicBool,
}

impl Link {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            peer_ended: AtomicBool::new(false),
            end_reason: SyncMutex::new(None),
            sink_closed: AtomicBool::new(false),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn peer_ended(&self) -> bool {
        self.peer_ended.load(Ordering::Acquire)
    }

    fn end(&self, reason: Option<String>) -> VoiceError {
        *self.end_reason.lock() = reason.clone();
        self.peer_ended.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);
        VoiceError::stream_ended(reason)
    }

    /// Why a send found the connection closed.
    fn closed_error(&self, message: String) -> VoiceError {
        if self.peer_ended() {
            VoiceError::stream_ended(self.end_reason.lock().clone())
        } else {
            VoiceError::Send(message)
        }
    }
}

fn map_connect_error(error: WsError) -> VoiceError {
    match error {
        WsError::Http(response) => VoiceError::Connection(format!(
            "Websocket handshake failed with status {}",
            response.status().as_u16()
        )),
        WsError::Url(error) => VoiceError::Configuration(format!("Invalid websocket URL: {error}")),
        other => VoiceError::Connection(format!("Websocket connect failed: {other}")),
    }
}

/// Write half of the connection.
#[derive(Clone)]
pub struct EventSender {
    sink: Arc<Mutex<SplitSink<VoiceSocket, Message>>>,
    link: Arc<Link>,
}

impl EventSender {
    /// Serialize `event` and send it as one text frame.
    ///
    /// A failed write marks the sender closed but does not send a close frame.
    /// After the peer has ended the stream this fails with
    /// [`VoiceError::StreamEnded`] rather than [`VoiceError::Send`].
    pub async fn send(&self, event: &OutboundEvent) -> Result<()> {
        self.send_if(event, || true).await.map(|_| ())
    }

    /// Send `event` only if `allowed()` still holds once the write half is
    /// locked. Returns `Ok(false)` when the event was withheld.
    pub async fn send_if(&self, event: &OutboundEvent, allowed: impl Fn() -> bool) -> Result<bool> {
        if !self.is_open() {
            return Err(self
                .link
                .closed_error(format!("connection is closed; dropped {}", event.kind())));
        }
        let payload = event.to_json()?;
        let mut sink = self.sink.lock().await;
        if !allowed() {
            return Ok(false);
        }
        if !self.is_open() {
            return Err(self
                .link
                .closed_error(format!("connection closed while sending {}", event.kind())));
        }
        sink.send(Message::Text(payload.into()))
            .await
            .map(|()| true)
            .map_err(|error| {
                self.link.open.store(false, Ordering::Release);
                VoiceError::Send(format!("Failed to send {}: {error}", event.kind()))
            })
    }

    /// Close normally.
    pub async fn close(&self) {
        self.close_frame(None).await;
    }

    /// Close with an explicit status, e.g. [`CloseCode::Error`] (1011).
    pub async fn close_with(&self, code: CloseCode, reason: impl Into<String>) {
        let reason: String = reason.into();
        self.close_frame(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
        .await;
    }

    async fn close_frame(&self, frame: Option<CloseFrame<'static>>) {
        let send_frame = self.link.open.swap(false, Ordering::AcqRel);
        // A peer-initiated close still needs the queued reply flushed.
        if !send_frame && !self.link.peer_ended() {
            return;
        }
        if self.link.sink_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let closing = async {
            if send_frame {
                if let Err(error) = sink.send(Message::Close(frame)).await {
                    tracing::debug!(error = %error, "Close frame not delivered");
                }
            }
            if let Err(error) = sink.close().await {
                tracing::debug!(error = %error, "Websocket close failed");
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            tracing::warn!("Timed out closing websocket");
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }
}

/// Read half of the connection.
pub struct EventReceiver {
    stream: SplitStream<VoiceSocket>,
    link: Arc<Link>,
}

impl EventReceiver {
    /// Wait for the next event.
    ///
    /// [`VoiceError::Decode`] leaves the receiver usable.
    /// [`VoiceError::StreamEnded`] is terminal.
    pub async fn receive(&mut self) -> Result<InboundEvent> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Err(self.ended(None));
                }
                Some(Err(error)) => return Err(self.ended(Some(error.to_string()))),
            };

            match message {
                Message::Text(text) => return InboundEvent::from_json(text.as_str()),
                Message::Binary(bytes) => {
                    return match std::str::from_utf8(&bytes) {
                        Ok(text) => InboundEvent::from_json(text),
                        Err(error) => Err(VoiceError::Decode(format!(
                            "binary frame is not UTF-8: {error}"
                        ))),
                    };
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason))
                        .map(|reason| reason.trim().to_string());
                    return Err(self.ended(reason));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    fn ended(&self, reason: Option<String>) -> VoiceError {
        self.link.end(reason)
    }
}
