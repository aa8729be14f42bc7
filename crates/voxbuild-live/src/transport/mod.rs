//! Live model link abstraction.
//!
//! A [`LiveConnector`] opens one bidirectional session and hands back a
//! [`LiveLink`]: an outbound channel of [`ClientMessage`]s and an inbound channel
//! of [`ServerEvent`]s. The session manager only ever talks to these channels,
//! so the websocket binding and in-memory test links are interchangeable.

pub mod gemini;

use crate::agent::{Agent, Incident, ToolParameters, ToolSet, VoiceName};
use crate::codec::MediaBlob;
use crate::error::{LiveError, LiveResult};
use crate::instruction::compose_instruction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use gemini::GeminiLiveConnector;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The result of a tool invocation, keyed by the originating call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Tool declaration in the shape the live service expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Everything the service needs at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice: VoiceName,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// None when the agent declares no tools; the field is then left out of the setup.
    pub tools: Option<Vec<FunctionDeclaration>>,
}

impl SessionSetup {
    /// Audio responses, both transcription channels on, composed instruction.
    pub fn for_agent(agent: &Agent, incident: Option<&Incident>, model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_modality: ResponseModality::Audio,
            voice: agent.voice,
            system_instruction: compose_instruction(agent, incident),
            input_transcription: true,
            output_transcription: true,
            tools: declarations(&agent.tools),
        }
    }
}

/// Translate the agent's tools; `None` for an empty set.
pub fn declarations(tools: &ToolSet) -> Option<Vec<FunctionDeclaration>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect(),
    )
}

/// Content carried by one server message. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
    /// Inline model audio in arrival order.
    pub audio: Vec<MediaBlob>,
}

/// Inbound lifecycle and message events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Setup acknowledged; the session is live.
    Open,
    Content(ServerContent),
    ToolCall(Vec<FunctionCall>),
    /// The service withdrew calls it had requested (e.g. after barge-in).
    ToolCallCancellation(Vec<String>),
    Closed { reason: Option<String> },
    Error(String),
}

/// Outbound messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    RealtimeInput(MediaBlob),
    ToolResponse(FunctionResponse),
    Close,
}

/// An open session: send with `outbound`, receive from `inbound`.
pub struct LiveLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl LiveLink {
    pub fn send(&self, msg: ClientMessage) -> LiveResult<()> {
        self.outbound
            .send(msg)
            .map_err(|_| LiveError::ChannelSend("live link closed".to_string()))
    }

    /// Ask the transport to close; the link is unusable afterwards.
    pub fn close(self) {
        let _ = self.outbound.send(ClientMessage::Close);
    }
}

/// Opens live sessions against a remote model service.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: SessionSetup) -> LiveResult<LiveLink>;
}
