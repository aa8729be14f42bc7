//! In-memory live link and audio devices shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use voxbuild_live::codec::{encode_frame, DecodedAudio, MediaBlob};
use voxbuild_live::{
    Agent, AgentTool, AudioBackend, CaptureConfig, CaptureDevice, CaptureFrame, ClientMessage,
    FunctionCall, FunctionResponse, LiveConfig, LiveConnector, LiveError, LiveLink, LiveResult,
    LiveSession, PlaybackDevice, PlaybackId, ServerContent, ServerEvent, SessionEvent,
    SessionSetup,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ---------------------------------------------------------------------------
// Remote side of the live link
// ---------------------------------------------------------------------------

/// The service end of a fake link.
pub struct FakeRemote {
    pub events: mpsc::UnboundedSender<ServerEvent>,
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
}

impl FakeRemote {
    pub fn send(&self, event: ServerEvent) {
        self.events.send(event).expect("session dropped the link");
    }

    pub fn content(&self, content: ServerContent) {
        self.send(ServerEvent::Content(content));
    }

    pub fn tool_call(&self, id: &str, name: &str, args: Value) {
        self.send(ServerEvent::ToolCall(vec![FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }]));
    }

    /// Next non-audio message from the client.
    pub async fn next_control(&mut self) -> Option<ClientMessage> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.outbound.recv()).await {
                Ok(Some(ClientMessage::RealtimeInput(_))) => continue,
                Ok(other) => return other,
                Err(_) => return None,
            }
        }
    }

    pub async fn next_tool_response(&mut self) -> FunctionResponse {
        match self.next_control().await {
            Some(ClientMessage::ToolResponse(resp)) => resp,
            other => panic!("expected tool response, got {:?}", other),
        }
    }

    /// Drain what is buffered right now and return the non-audio messages.
    pub fn drain_control(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            if !matches!(msg, ClientMessage::RealtimeInput(_)) {
                out.push(msg);
            }
        }
        out
    }
}

pub struct FakeConnector {
    remote_tx: Mutex<Option<oneshot::Sender<FakeRemote>>>,
    pub setups: Mutex<Vec<SessionSetup>>,
    fail: bool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<FakeRemote>) {
        let (tx, rx) = oneshot::channel();
        let connector = Arc::new(Self {
            remote_tx: Mutex::new(Some(tx)),
            setups: Mutex::new(Vec::new()),
            fail: false,
        });
        (connector, rx)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            remote_tx: Mutex::new(None),
            setups: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn setup_count(&self) -> usize {
        self.setups.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: SessionSetup) -> LiveResult<LiveLink> {
        self.setups.lock().unwrap().push(setup);
        if self.fail {
            return Err(LiveError::Transport("connection refused".to_string()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        if let Some(tx) = self.remote_tx.lock().unwrap().take() {
            let _ = tx.send(FakeRemote {
                events: in_tx,
                outbound: out_rx,
            });
        }
        Ok(LiveLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Audio devices
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DeviceLog {
    pub capture_opened: usize,
    pub capture_started: usize,
    pub capture_closes: usize,
    pub playback_closes: usize,
    pub clock: f64,
    /// (id, start, duration)
    pub scheduled: Vec<(PlaybackId, f64, f64)>,
    pub stopped: Vec<PlaybackId>,
    pub done_tx: Option<mpsc::UnboundedSender<PlaybackId>>,
}

#[derive(Clone, Default)]
pub struct FakeAudio {
    pub log: Arc<Mutex<DeviceLog>>,
    /// Frames pushed as soon as capture starts.
    pub mic_frames: Vec<Vec<f32>>,
    pub fail_capture: bool,
}

impl FakeAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mic_frames(mut self, frames: Vec<Vec<f32>>) -> Self {
        self.mic_frames = frames;
        self
    }

    pub fn without_microphone(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    pub fn set_clock(&self, t: f64) {
        self.log.lock().unwrap().clock = t;
    }

    pub fn scheduled(&self) -> Vec<(PlaybackId, f64, f64)> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.log.lock().unwrap().stopped.clone()
    }

    /// Report a unit as finished, like the speaker would.
    pub fn complete(&self, id: PlaybackId) {
        if let Some(tx) = self.log.lock().unwrap().done_tx.as_ref() {
            let _ = tx.send(id);
        }
    }
}

impl AudioBackend for FakeAudio {
    fn open_capture(&self, _config: &CaptureConfig) -> LiveResult<Box<dyn CaptureDevice>> {
        if self.fail_capture {
            return Err(LiveError::AudioDevice("No input device available".to_string()));
        }
        self.log.lock().unwrap().capture_opened += 1;
        Ok(Box::new(FakeMic {
            log: Arc::clone(&self.log),
            frames: self.mic_frames.clone(),
            frame_tx: None,
        }))
    }

    fn open_playback(
        &self,
        _sample_rate: u32,
        done_tx: mpsc::UnboundedSender<PlaybackId>,
    ) -> LiveResult<Box<dyn PlaybackDevice>> {
        self.log.lock().unwrap().done_tx = Some(done_tx);
        Ok(Box::new(FakeSpeaker {
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeMic {
    log: Arc<Mutex<DeviceLog>>,
    frames: Vec<Vec<f32>>,
    // held so the pipeline keeps running like a live mic
    frame_tx: Option<mpsc::UnboundedSender<CaptureFrame>>,
}

impl CaptureDevice for FakeMic {
    fn start(&mut self, frame_tx: mpsc::UnboundedSender<CaptureFrame>) -> LiveResult<()> {
        self.log.lock().unwrap().capture_started += 1;
        for samples in self.frames.drain(..) {
            let _ = frame_tx.send(CaptureFrame {
                samples,
                captured_at: Instant::now(),
            });
        }
        self.frame_tx = Some(frame_tx);
        Ok(())
    }

    fn close(&mut self) {
        self.frame_tx = None;
        self.log.lock().unwrap().capture_closes += 1;
    }
}

struct FakeSpeaker {
    log: Arc<Mutex<DeviceLog>>,
}

impl PlaybackDevice for FakeSpeaker {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().clock
    }

    fn schedule(&mut self, id: PlaybackId, audio: DecodedAudio, start_at: f64) -> LiveResult<()> {
        self.log
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, audio.duration_secs()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.playback_closes += 1;
        log.done_tx = None;
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `secs` of model audio at 24 kHz.
pub fn model_audio(secs: f64) -> MediaBlob {
    encode_frame(&vec![0.1; (secs * 24000.0) as usize], 24000)
}

pub fn agent_with_tools() -> Agent {
    let mut agent = Agent::new("agent-1", "Zenith");
    agent.system_instruction = "You are Zenith, a support agent.".to_string();
    agent.tools.upsert(AgentTool::new("lookup order", "Find an order"));
    agent
        .tools
        .upsert(AgentTool::new("issue refund", "Refund an order").with_confirmation(true));
    agent
}

pub fn test_config() -> LiveConfig {
    LiveConfig {
        api_key: Some("test-key".to_string()),
        ..LiveConfig::default()
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn expect_event<F>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pred: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event stream ended"),
            Err(_) => panic!("timed out waiting for session event"),
        }
    }
}

/// A session connected to fake devices and running on its own task.
pub struct Harness {
    pub remote: FakeRemote,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub handle: voxbuild_live::SessionHandle,
    pub audio: FakeAudio,
    pub connector: Arc<FakeConnector>,
    pub task: tokio::task::JoinHandle<LiveSession>,
}

impl Harness {
    /// Connect, deliver the open event and wait until the session is active.
    pub async fn start(agent: Agent, config: LiveConfig, audio: FakeAudio) -> Self {
        init_tracing();
        let (connector, remote_rx) = FakeConnector::new();
        let (mut session, mut events) = LiveSession::new(
            config,
            agent,
            None,
            connector.clone(),
            Arc::new(audio.clone()),
        );
        let handle = session.handle();

        let task = tokio::spawn(async move {
            session.connect().await.expect("connect");
            session.run().await.expect("run");
            session
        });

        let remote = remote_rx.await.expect("connector never called");
        remote.send(ServerEvent::Open);
        expect_event(&mut events, |e| {
            *e == SessionEvent::StateChanged(voxbuild_live::SessionState::Active)
        })
        .await;

        Self {
            remote,
            events,
            handle,
            audio,
            connector,
            task,
        }
    }

    pub async fn next_event<F>(&mut self, pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        expect_event(&mut self.events, pred).await
    }

    /// Close through the handle and get the session back.
    pub async fn close(self) -> (LiveSession, FakeRemote, FakeAudio) {
        self.handle.close().expect("session gone");
        let session = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not stop")
            .expect("session task panicked");
        (session, self.remote, self.audio)
    }
}

// ---------------------------------------------------------------------------
// Webhook server
// ---------------------------------------------------------------------------

pub type Hits = Arc<Mutex<Vec<Value>>>;

async fn hook_ok(State(hits): State<Hits>, Json(body): Json<Value>) -> Json<Value> {
    hits.lock().unwrap().push(body);
    Json(json!({"status": "ok", "ticket": "T-42"}))
}

async fn hook_fail(State(hits): State<Hits>, Json(body): Json<Value>) -> StatusCode {
    hits.lock().unwrap().push(body);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn hook_garbage(State(hits): State<Hits>, Json(body): Json<Value>) -> &'static str {
    hits.lock().unwrap().push(body);
    "not json"
}

/// Local webhook bridge with `/ok`, `/fail` and `/garbage`; records every body.
pub async fn spawn_webhook() -> (SocketAddr, Hits) {
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ok", post(hook_ok))
        .route("/fail", post(hook_fail))
        .route("/garbage", post(hook_garbage))
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}
