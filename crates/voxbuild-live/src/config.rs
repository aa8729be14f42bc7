//! Live engine configuration.
//!
//! Loaded with the `config` crate: built-in defaults, then an optional TOML file
//! (`VOXBUILD_CONFIG`, default `config/live`), then `VOXBUILD_*` environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | VOXBUILD_ENDPOINT | Gemini Live bidi URL | Websocket endpoint of the live model service. |
//! | VOXBUILD_MODEL | native-audio preview model | Model resource name sent in the setup message. |
//! | VOXBUILD_API_KEY | (GEMINI_API_KEY / API_KEY) | Key appended to the endpoint query string. |
//! | VOXBUILD_CAPTURE_SAMPLE_RATE | 16000 | Microphone rate sent upstream. |
//! | VOXBUILD_CAPTURE_FRAME_SIZE | 4096 | Samples per outbound frame (~256 ms at 16 kHz). |
//! | VOXBUILD_PLAYBACK_SAMPLE_RATE | 24000 | Rate of inbound model audio. |
//! | VOXBUILD_WEBHOOK_TIMEOUT_SECS | 30 | Per-request timeout for the webhook bridge. |
//! | VOXBUILD_TOOL_INDICATOR_MS | 800 | How long the "executing" cue lingers after a tool returns (at most 60000). |
//! | VOXBUILD_CONFIRMATION_TIMEOUT_SECS | unset | Auto-reject a pending confirmation after this long. |

use crate::error::{LiveError, LiveResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Upper bound for `tool_indicator_ms`.
pub const MAX_TOOL_INDICATOR_MS: u64 = 60_000;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_capture_sample_rate() -> u32 {
    16000
}

fn default_capture_frame_size() -> usize {
    4096
}

fn default_playback_sample_rate() -> u32 {
    24000
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_tool_indicator_ms() -> u64 {
    800
}

/// Runtime configuration for one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_capture_sample_rate")]
    pub capture_sample_rate: u32,
    #[serde(default = "default_capture_frame_size")]
    pub capture_frame_size: usize,
    #[serde(default = "default_playback_sample_rate")]
    pub playback_sample_rate: u32,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    #[serde(default = "default_tool_indicator_ms")]
    pub tool_indicator_ms: u64,
    /// None keeps a confirmation open until the operator answers or the session closes.
    #[serde(default)]
    pub confirmation_timeout_secs: Option<u64>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            capture_sample_rate: default_capture_sample_rate(),
            capture_frame_size: default_capture_frame_size(),
            playback_sample_rate: default_playback_sample_rate(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
            tool_indicator_ms: default_tool_indicator_ms(),
            confirmation_timeout_secs: None,
        }
    }
}

impl LiveConfig {
    /// Load config from file and environment. Precedence: env > `VOXBUILD_CONFIG` file > defaults.
    pub fn load() -> LiveResult<Self> {
        let config_path =
            std::env::var("VOXBUILD_CONFIG").unwrap_or_else(|_| "config/live".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`LiveConfig::load`] with an explicit file path (extension optional).
    pub fn load_from(path: &Path) -> LiveResult<Self> {
        let builder = config::Config::builder()
            .set_default("endpoint", DEFAULT_ENDPOINT)?
            .set_default("model", DEFAULT_MODEL)?
            .set_default("capture_sample_rate", 16000_i64)?
            .set_default("capture_frame_size", 4096_i64)?
            .set_default("playback_sample_rate", 24000_i64)?
            .set_default("webhook_timeout_secs", 30_i64)?
            .set_default("tool_indicator_ms", 800_i64)?;

        let builder = builder.add_source(config::File::from(path).required(false));

        let built = builder
            .add_source(
                config::Environment::with_prefix("VOXBUILD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: LiveConfig = built.try_deserialize()?;
        if cfg.api_key.is_none() {
            cfg.api_key = env_opt_string("GEMINI_API_KEY").or_else(|| env_opt_string("API_KEY"));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the audio path cannot run with.
    pub fn validate(&self) -> LiveResult<()> {
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(LiveError::Config("sample rates must be non-zero".to_string()));
        }
        if self.capture_frame_size == 0 {
            return Err(LiveError::Config("capture_frame_size must be non-zero".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(LiveError::Config("endpoint is empty".to_string()));
        }
        if self.tool_indicator_ms > MAX_TOOL_INDICATOR_MS {
            return Err(LiveError::Config(format!(
                "tool_indicator_ms must be at most {}",
                MAX_TOOL_INDICATOR_MS
            )));
        }
        Ok(())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn tool_indicator(&self) -> Duration {
        Duration::from_millis(self.tool_indicator_ms)
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
