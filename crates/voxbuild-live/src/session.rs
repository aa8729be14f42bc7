//! Live session lifecycle.
//!
//! `LiveSession` owns every handle of one conversation: the live link, both
//! audio devices, the capture pipeline, the playback scheduler, the transcript
//! accumulators and the tool orchestrator. A single task drives it; inbound
//! messages, playback completions, tool outcomes and operator commands are
//! processed one at a time.
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──Open──▶ Active ──close()/error/remote close──▶ Closed
//! ```

use crate::agent::{Agent, Incident};
use crate::audio::{AudioBackend, CaptureConfig, CaptureDevice, PlaybackId};
use crate::capture::CapturePipeline;
use crate::codec::decode_audio;
use crate::config::LiveConfig;
use crate::confirmation::{ConfirmationRequest, Decision};
use crate::error::{LiveError, LiveResult};
use crate::playback::PlaybackScheduler;
use crate::tools::{Dispatch, ToolExecutor, ToolOrchestrator, ToolOutcome};
use crate::transcript::{TranscriptAggregator, TranscriptEntry};
use crate::transport::{
    ClientMessage, LiveConnector, LiveLink, ServerContent, ServerEvent, SessionSetup,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shown to the operator when the link fails; the session does not retry.
pub const BRIDGE_ERROR_MESSAGE: &str = "Voice bridge error. Please reconnect.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Everything the UI layer needs to render a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Model started (true) or finished (false) speaking.
    Speaking(bool),
    /// The service cut the model off; playback was flushed.
    Interrupted,
    Transcript(TranscriptEntry),
    /// A new request is at the head of the confirmation queue.
    ConfirmationRequested(ConfirmationRequest),
    /// The confirmation queue is empty.
    ConfirmationCleared,
    /// A tool started running.
    ToolExecuting { name: String },
    /// The executing cue can be cleared.
    ToolSettled,
    Error(String),
}

/// Operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// `call_id: None` answers the head of the queue.
    ResolveConfirmation {
        call_id: Option<String>,
        approved: bool,
    },
    Close,
}

/// Cloneable handle for driving a running session from another task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn approve(&self) -> LiveResult<()> {
        self.send(SessionCommand::ResolveConfirmation {
            call_id: None,
            approved: true,
        })
    }

    pub fn reject(&self) -> LiveResult<()> {
        self.send(SessionCommand::ResolveConfirmation {
            call_id: None,
            approved: false,
        })
    }

    pub fn resolve(&self, call_id: impl Into<String>, approved: bool) -> LiveResult<()> {
        self.send(SessionCommand::ResolveConfirmation {
            call_id: Some(call_id.into()),
            approved,
        })
    }

    pub fn close(&self) -> LiveResult<()> {
        self.send(SessionCommand::Close)
    }

    fn send(&self, cmd: SessionCommand) -> LiveResult<()> {
        self.tx
            .send(cmd)
            .map_err(|_| LiveError::ChannelSend("session has ended".to_string()))
    }
}

/// One live conversation. Not reusable: reconnecting means a new session.
pub struct LiveSession {
    config: LiveConfig,
    agent: Agent,
    incident: Option<Incident>,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioBackend>,

    state: SessionState,
    interrupted: bool,
    error: Option<String>,

    link: Option<LiveLink>,
    capture: Option<Box<dyn CaptureDevice>>,
    pipeline: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
    playback_done: Option<mpsc::UnboundedReceiver<PlaybackId>>,
    transcript: TranscriptAggregator,
    tools: Option<ToolOrchestrator>,
    indicator_deadline: Option<Instant>,

    events: mpsc::UnboundedSender<SessionEvent>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
}

impl LiveSession {
    /// Create an idle session and the stream of events it will publish.
    pub fn new(
        config: LiveConfig,
        agent: Agent,
        incident: Option<Incident>,
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            agent,
            incident,
            connector,
            audio,
            state: SessionState::Idle,
            interrupted: false,
            error: None,
            link: None,
            capture: None,
            pipeline: None,
            playback: None,
            playback_done: None,
            transcript: TranscriptAggregator::new(),
            tools: None,
            indicator_deadline: None,
            events,
            commands_tx,
            commands_rx,
        };
        (session, events_rx)
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_speaking(&self) -> bool {
        self.playback.as_ref().map(|p| p.is_speaking()).unwrap_or(false)
    }

    pub fn pending_confirmation(&self) -> Option<&ConfirmationRequest> {
        self.tools.as_ref().and_then(|t| t.pending_confirmation())
    }

    /// Acquire devices and open the live link. Valid only from `Idle`.
    ///
    /// A failure here leaves the session `Closed` with its error recorded.
    pub async fn connect(&mut self) -> LiveResult<()> {
        if self.state != SessionState::Idle {
            return Err(LiveError::InvalidState(format!(
                "connect() requires IDLE, session is {}",
                self.state
            )));
        }
        self.config.validate()?;
        info!(target: "voxbuild::live", "Connecting agent {} ({})", self.agent.name, self.agent.id);

        if let Err(e) = self.open_devices() {
            self.fail(format!("Audio device unavailable: {}", e));
            return Err(e);
        }

        let executor = match ToolExecutor::new(
            &self.agent,
            self.incident.as_ref(),
            self.config.webhook_timeout(),
        ) {
            Ok(executor) => executor,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e);
            }
        };
        self.tools = Some(ToolOrchestrator::new(
            executor,
            self.agent.tools.clone(),
            self.config.confirmation_timeout(),
        ));

        let setup = SessionSetup::for_agent(&self.agent, self.incident.as_ref(), &self.config.model);
        self.set_state(SessionState::Connecting);

        match self.connector.connect(setup).await {
            Ok(link) => {
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                error!(target: "voxbuild::live", "Live link failed to open: {}", e);
                self.fail(BRIDGE_ERROR_MESSAGE.to_string());
                Err(e)
            }
        }
    }

    fn open_devices(&mut self) -> LiveResult<()> {
        let capture = self.audio.open_capture(&CaptureConfig::from(&self.config))?;
        self.capture = Some(capture);

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let device = self
            .audio
            .open_playback(self.config.playback_sample_rate, done_tx)?;
        self.playback = Some(PlaybackScheduler::new(device));
        self.playback_done = Some(done_rx);
        Ok(())
    }

    /// Process events until the session is closed.
    pub async fn run(&mut self) -> LiveResult<()> {
        if self.state == SessionState::Idle {
            return Err(LiveError::InvalidState("run() before connect()".to_string()));
        }

        while self.state != SessionState::Closed {
            let deadline = self.indicator_deadline;
            tokio::select! {
                Some(cmd) = self.commands_rx.recv() => self.handle_command(cmd),
                event = next_server_event(&mut self.link) => match event {
                    Some(event) => self.handle_server_event(event),
                    None => self.handle_server_event(ServerEvent::Closed { reason: None }),
                },
                Some(id) = next_completion(&mut self.playback_done) => self.on_playback_done(id),
                Some(outcome) = next_tool_outcome(&mut self.tools) => self.on_tool_outcome(outcome),
                _ = indicator_elapsed(deadline) => {
                    self.indicator_deadline = None;
                    self.emit(SessionEvent::ToolSettled);
                }
            }
        }
        Ok(())
    }

    /// Tear everything down. No-op when `Idle` or already `Closed`.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Closed) {
            return;
        }
        self.teardown();
        self.set_state(SessionState::Closed);
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.close();
        }
        if let Some(mut playback) = self.playback.take() {
            if playback.is_speaking() {
                self.emit(SessionEvent::Speaking(false));
            }
            playback.close();
        }
        self.playback_done = None;
        if let Some(mut tools) = self.tools.take() {
            if tools.pending_count() > 0 {
                self.emit(SessionEvent::ConfirmationCleared);
            }
            tools.shutdown();
        }
        if self.indicator_deadline.take().is_some() {
            self.emit(SessionEvent::ToolSettled);
        }
        self.transcript.reset();
        self.interrupted = false;
        info!(target: "voxbuild::live", "Session torn down");
    }

    /// Record a user-facing error and force teardown.
    fn fail(&mut self, message: String) {
        error!(target: "voxbuild::live", "{}", message);
        self.error = Some(message.clone());
        self.emit(SessionEvent::Error(message));
        self.teardown();
        self.set_state(SessionState::Closed);
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Close => self.close(),
            SessionCommand::ResolveConfirmation { call_id, approved } => {
                let head_before = self.head_call_id();
                let resolved = match self.tools.as_mut() {
                    Some(tools) => tools.resolve(call_id.as_deref(), approved),
                    None => None,
                };
                match resolved {
                    Some(request) if approved => self.emit(SessionEvent::ToolExecuting {
                        name: request.tool_name,
                    }),
                    Some(_) => {}
                    None => warn!(target: "voxbuild::live", "No pending confirmation to resolve"),
                }
                self.publish_head_if_changed(head_before);
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Open => self.on_open(),
            ServerEvent::Content(content) => self.on_content(content),
            ServerEvent::ToolCall(calls) => {
                for call in calls {
                    self.on_tool_call(call);
                }
            }
            ServerEvent::ToolCallCancellation(ids) => {
                let head_before = self.head_call_id();
                if let Some(tools) = self.tools.as_mut() {
                    for id in &ids {
                        tools.withdraw(id);
                    }
                }
                self.publish_head_if_changed(head_before);
            }
            ServerEvent::Closed { reason } => {
                info!(
                    target: "voxbuild::live",
                    "Live link closed by remote: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.close();
            }
            ServerEvent::Error(message) => {
                error!(target: "voxbuild::live", "Live link error: {}", message);
                self.fail(BRIDGE_ERROR_MESSAGE.to_string());
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(target: "voxbuild::live", "Ignoring open event in state {}", self.state);
            return;
        }
        self.set_state(SessionState::Active);

        let outbound = match self.link.as_ref() {
            Some(link) => link.outbound.clone(),
            None => return,
        };
        let started = match self.capture.as_mut() {
            Some(capture) => {
                CapturePipeline::start(capture.as_mut(), outbound, self.config.capture_sample_rate)
            }
            None => Err(LiveError::AudioDevice("capture device missing".to_string())),
        };
        match started {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(e) => self.fail(format!("Microphone capture failed: {}", e)),
        }
    }

    fn on_content(&mut self, content: ServerContent) {
        if let Some(ref text) = content.input_transcription {
            self.transcript.push_input(text);
        }
        if let Some(ref text) = content.output_transcription {
            self.transcript.push_output(text);
        }
        if content.turn_complete {
            for entry in self.transcript.complete_turn() {
                self.emit(SessionEvent::Transcript(entry));
            }
        }

        for blob in &content.audio {
            let audio = match decode_audio(&blob.data, self.config.playback_sample_rate, 1) {
                Ok(audio) => audio,
                Err(e) => {
                    warn!(target: "voxbuild::live", "Dropping model audio chunk: {}", e);
                    continue;
                }
            };
            let scheduled = match self.playback.as_mut() {
                Some(playback) => playback.enqueue(audio),
                None => return,
            };
            match scheduled {
                Ok(Some((_, started))) => {
                    self.interrupted = false;
                    if started {
                        self.emit(SessionEvent::Speaking(true));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(target: "voxbuild::live", "Failed to schedule model audio: {}", e),
            }
        }

        if content.interrupted {
            if let Some(playback) = self.playback.as_mut() {
                playback.interrupt();
            }
            self.interrupted = true;
            self.emit(SessionEvent::Interrupted);
            self.emit(SessionEvent::Speaking(false));
        }
    }

    fn on_tool_call(&mut self, call: crate::transport::FunctionCall) {
        let dispatch = match self.tools.as_mut() {
            Some(tools) => tools.dispatch(call),
            None => return,
        };
        match dispatch {
            Dispatch::Ignored => {}
            Dispatch::Executing { name } => self.emit(SessionEvent::ToolExecuting { name }),
            Dispatch::AwaitingConfirmation { shown } => {
                if let Some(request) = shown {
                    self.emit(SessionEvent::ConfirmationRequested(request));
                }
            }
        }
    }

    fn on_playback_done(&mut self, id: PlaybackId) {
        let finished = self
            .playback
            .as_mut()
            .map(|p| p.finish(id))
            .unwrap_or(false);
        if finished {
            self.emit(SessionEvent::Speaking(false));
        }
    }

    fn on_tool_outcome(&mut self, outcome: ToolOutcome) {
        if outcome.decision == Some(Decision::TimedOut) {
            let head_before = self.head_call_id();
            if let Some(tools) = self.tools.as_mut() {
                tools.withdraw(&outcome.call_id);
            }
            self.publish_head_if_changed(head_before);
        }
        if outcome.executed {
            let now = Instant::now();
            let linger = self.config.tool_indicator();
            self.indicator_deadline = Some(now.checked_add(linger).unwrap_or(now));
        }

        let name = outcome.name.clone();
        if let Some(response) = outcome.into_response() {
            let sent = match self.link.as_ref() {
                Some(link) => link.send(ClientMessage::ToolResponse(response)),
                None => Err(LiveError::ChannelSend("live link closed".to_string())),
            };
            match sent {
                Ok(()) => debug!(target: "voxbuild::live", "Tool response sent for {}", name),
                Err(e) => warn!(target: "voxbuild::live", "Tool response for {} not sent: {}", name, e),
            }
        }
    }

    fn head_call_id(&self) -> Option<String> {
        self.pending_confirmation().map(|r| r.call_id.clone())
    }

    fn publish_head_if_changed(&mut self, before: Option<String>) {
        let head = self.pending_confirmation().cloned();
        if head.as_ref().map(|r| &r.call_id) == before.as_ref() {
            return;
        }
        match head {
            Some(request) => self.emit(SessionEvent::ConfirmationRequested(request)),
            None => self.emit(SessionEvent::ConfirmationCleared),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!(target: "voxbuild::live", "Session {} → {}", self.state, state);
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn next_server_event(link: &mut Option<LiveLink>) -> Option<ServerEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_completion(rx: &mut Option<mpsc::UnboundedReceiver<PlaybackId>>) -> Option<PlaybackId> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tool_outcome(tools: &mut Option<ToolOrchestrator>) -> Option<ToolOutcome> {
    match tools {
        Some(tools) => tools.next_outcome().await,
        None => std::future::pending().await,
    }
}

async fn indicator_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
