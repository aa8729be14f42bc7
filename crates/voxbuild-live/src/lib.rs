//! # VoxBuild Live - Duplex Voice Session Engine
//!
//! Streams microphone audio to a live conversational model, plays its audio
//! replies back without gaps, finalizes turn transcripts, and runs the tools
//! the model asks for, with an operator confirmation gate for sensitive ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          LiveSession                              │
//! │  ┌──────────────┐  ┌──────────────┐       ┌──────────────────┐   │
//! │  │   Mic In     │→ │   Capture    │──────→│    Live Link     │   │
//! │  │   (cpal)     │  │  (PCM16/b64) │       │ (tungstenite ws) │   │
//! │  └──────────────┘  └──────────────┘       └──────────────────┘   │
//! │                                              │     ↑              │
//! │          ┌───────────────────────────────────┤     │ toolResponse │
//! │          ↓                   ↓               ↓     │              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐        │
//! │  │  Playback    │  │  Transcript  │  │ Tool Orchestrator│        │
//! │  │ Scheduler    │  │  Aggregator  │  │  ↕ Confirmation  │        │
//! │  │  (rodio)     │  │              │  │  → Webhook       │        │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod instruction;
pub mod playback;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod transport;

pub use agent::{
    Agent, AgentTool, Incident, IncidentStatus, ModelProvider, ParameterProperty, Priority,
    ToolParameters, ToolSet, VoiceName,
};
pub use audio::{
    AudioBackend, CaptureConfig, CaptureDevice, CaptureFrame, PlaybackDevice, PlaybackId,
    SystemAudio,
};
pub use capture::CapturePipeline;
pub use config::LiveConfig;
pub use confirmation::{ConfirmationGate, ConfirmationRequest, ConfirmationTicket, Decision};
pub use error::{LiveError, LiveResult};
pub use instruction::compose_instruction;
pub use playback::{PlaybackScheduler, ScheduledUnit};
pub use session::{LiveSession, SessionCommand, SessionEvent, SessionHandle, SessionState};
pub use tools::{Dispatch, ToolExecutor, ToolOrchestrator, ToolOutcome};
pub use transcript::{Role, TranscriptAggregator, TranscriptEntry};
pub use transport::{
    ClientMessage, FunctionCall, FunctionResponse, GeminiLiveConnector, LiveConnector, LiveLink,
    ServerContent, ServerEvent, SessionSetup,
};
