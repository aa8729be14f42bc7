//! Error types for the live session engine

use thiserror::Error;

/// Result type alias for live session operations
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors that can occur while running a live voice session
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Audio codec error: {0}")]
    Codec(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<cpal::DevicesError> for LiveError {
    fn from(err: cpal::DevicesError) -> Self {
        LiveError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for LiveError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        LiveError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for LiveError {
    fn from(err: cpal::BuildStreamError) -> Self {
        LiveError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for LiveError {
    fn from(err: cpal::PlayStreamError) -> Self {
        LiveError::AudioStream(err.to_string())
    }
}

impl From<config::ConfigError> for LiveError {
    fn from(err: config::ConfigError) -> Self {
        LiveError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for LiveError {
    fn from(err: reqwest::Error) -> Self {
        LiveError::Webhook(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LiveError::Transport(err.to_string())
    }
}
