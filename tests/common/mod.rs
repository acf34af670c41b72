//! Shared test helpers: fake audio devices and an in-process relay.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use bidi_voice::audio::{FrameHandler, InputDevice, OutputDevice};
use bidi_voice::config::{Endpoint, VoiceConfig};
use bidi_voice::error::VoiceError;

pub const WAIT: Duration = Duration::from_secs(3);

/// Microphone whose frames are fired by the test.
pub struct FakeInput {
    state: Arc<Mutex<InputState>>,
}

#[derive(Default)]
struct InputState {
    handler: Option<FrameHandler>,
    opened: usize,
    closed: usize,
    fail_teardown: bool,
}

/// Test-side handle to a [`FakeInput`].
#[derive(Clone)]
pub struct Mic {
    state: Arc<Mutex<InputState>>,
}

pub fn fake_input() -> (FakeInput, Mic) {
    build_input(false)
}

/// A microphone whose `pause` and `close` both fail.
pub fn failing_input() -> (FakeInput, Mic) {
    build_input(true)
}

fn build_input(fail_teardown: bool) -> (FakeInput, Mic) {
    let state = Arc::new(Mutex::new(InputState {
        fail_teardown,
        ..InputState::default()
    }));
    (
        FakeInput {
            state: Arc::clone(&state),
        },
        Mic { state },
    )
}

impl InputDevice for FakeInput {
    fn name(&self) -> String {
        "fake-mic".into()
    }

    fn open(&mut self, handler: FrameHandler) -> Result<(), VoiceError> {
        let mut state = self.state.lock();
        state.handler = Some(handler);
        state.opened += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), VoiceError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), VoiceError> {
        if self.state.lock().fail_teardown {
            return Err(VoiceError::hardware("fake-mic", "pause failed"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        let mut state = self.state.lock();
        state.handler = None;
        state.closed += 1;
        if state.fail_teardown {
            return Err(VoiceError::hardware("fake-mic", "close failed"));
        }
        Ok(())
    }
}

impl Mic {
    /// Deliver one frame as the hardware callback would.
    pub fn speak(&self, frame: &[u8]) {
        let mut state = self.state.lock();
        if let Some(handler) = state.handler.as_mut() {
            handler(frame);
        }
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

/// Speaker that records every write and can hold writes behind a gate.
pub struct FakeOutput {
    state: Arc<OutputState>,
}

struct OutputState {
    inner: Mutex<OutputInner>,
    gate: Condvar,
}

struct OutputInner {
    writes: Vec<Vec<u8>>,
    entered: usize,
    gate_open: bool,
    fail_writes: bool,
    closed: usize,
}

/// Test-side handle to a [`FakeOutput`].
#[derive(Clone)]
pub struct Speaker {
    state: Arc<OutputState>,
}

/// A speaker that accepts writes immediately.
pub fn fake_output() -> (FakeOutput, Speaker) {
    build_output(true, false)
}

/// A speaker whose writes block until [`Speaker::release`].
pub fn gated_output() -> (FakeOutput, Speaker) {
    build_output(false, false)
}

/// A speaker whose every write fails.
pub fn broken_output() -> (FakeOutput, Speaker) {
    build_output(true, true)
}

fn build_output(gate_open: bool, fail_writes: bool) -> (FakeOutput, Speaker) {
    let state = Arc::new(OutputState {
        inner: Mutex::new(OutputInner {
            writes: Vec::new(),
            entered: 0,
            gate_open,
            fail_writes,
            closed: 0,
        }),
        gate: Condvar::new(),
    });
    (
        FakeOutput {
            state: Arc::clone(&state),
        },
        Speaker { state },
    )
}

impl OutputDevice for FakeOutput {
    fn name(&self) -> String {
        "fake-speaker".into()
    }

    fn write(&mut self, pcm: &[u8]) -> Result<(), VoiceError> {
        let mut inner = self.state.inner.lock();
        inner.entered += 1;
        while !inner.gate_open {
            self.state.gate.wait(&mut inner);
        }
        if inner.fail_writes {
            return Err(VoiceError::hardware("fake-speaker", "device unplugged"));
        }
        inner.writes.push(pcm.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        let mut inner = self.state.inner.lock();
        inner.closed += 1;
        inner.gate_open = true;
        self.state.gate.notify_all();
        Ok(())
    }
}

impl Speaker {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.inner.lock().writes.clone()
    }

    /// Writes that have started, including ones still held at the gate.
    pub fn entered(&self) -> usize {
        self.state.inner.lock().entered
    }

    pub fn release(&self) {
        self.state.inner.lock().gate_open = true;
        self.state.gate.notify_all();
    }

    pub fn closed(&self) -> usize {
        self.state.inner.lock().closed
    }
}

pub type ServerSocket = WebSocketStream<TcpStream>;

/// One-connection WebSocket relay bound to an ephemeral local port.
pub struct TestRelay {
    pub url: String,
    accepted: oneshot::Receiver<(ServerSocket, Vec<(String, String)>)>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should be available");
        let (accepted_tx, accepted) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("relay should accept");
            let headers = Arc::new(Mutex::new(Vec::new()));
            let captured = Arc::clone(&headers);
            let socket = accept_hdr_async(stream, move |request: &Request, response: Response| {
                *captured.lock() = request
                    .headers()
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_string(),
                            value.to_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                Ok(response)
            })
            .await
            .expect("handshake should succeed");
            let headers = headers.lock().clone();
            let _ = accepted_tx.send((socket, headers));
        });

        Self {
            url: format!("ws://{address}/ws"),
            accepted,
        }
    }

    /// Config pointing at this relay.
    pub fn config(&self) -> VoiceConfig {
        VoiceConfig::builder()
            .endpoint(Endpoint::Direct {
                url: self.url.clone(),
            })
            .build()
    }

    pub async fn accept(self) -> ServerSocket {
        self.accept_with_headers().await.0
    }

    pub async fn accept_with_headers(self) -> (ServerSocket, Vec<(String, String)>) {
        timeout(WAIT, self.accepted)
            .await
            .expect("client should connect in time")
            .expect("relay task should hand over the socket")
    }
}

/// Send one JSON event to the client.
pub async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("relay send should succeed");
}

/// What the relay observed next.
#[derive(Debug)]
pub enum Observed {
    Event(Value),
    Close(Option<CloseFrame<'static>>),
    Ended,
}

/// Next client event, skipping control frames.
pub async fn observe(socket: &mut ServerSocket) -> Observed {
    loop {
        let next = timeout(WAIT, socket.next())
            .await
            .expect("relay should observe something in time");
        match next {
            Some(Ok(Message::Text(text))) => {
                return Observed::Event(
                    serde_json::from_str(text.as_str()).expect("client sends JSON"),
                )
            }
            Some(Ok(Message::Close(frame))) => return Observed::Close(frame),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return Observed::Ended,
        }
    }
}

/// Everything the client sends until its close frame or the socket ends.
pub async fn observe_until_close(socket: &mut ServerSocket) -> (Vec<Value>, Vec<Option<CloseFrame<'static>>>) {
    let mut events = Vec::new();
    let mut closes = Vec::new();
    loop {
        match observe(socket).await {
            Observed::Event(event) => events.push(event),
            Observed::Close(frame) => closes.push(frame),
            Observed::Ended => return (events, closes),
        }
    }
}

/// Poll `condition` until it holds or the wait budget runs out.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

/// Await `future` within the wait budget.
pub async fn within<F: Future>(future: F) -> F::Output {
    timeout(WAIT, future).await.expect("should finish in time")
}
