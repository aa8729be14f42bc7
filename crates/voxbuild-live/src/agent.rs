//! Agent, tool and incident records as the engine sees them.
//!
//! These are owned by the editor/storage layer and are read-only to a live session.
//! Field names serialize in camelCase so stored agent profiles load unchanged.

use crate::error::{LiveError, LiveResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Prebuilt voice identities offered by the live model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceName {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Zephyr,
}

impl VoiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider shown to the model in the engine line of its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelProvider {
    #[default]
    Gemini,
    OpenAI,
    DeepSeek,
    Anthropic,
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelProvider::Gemini => "Gemini",
            ModelProvider::OpenAI => "OpenAI",
            ModelProvider::DeepSeek => "DeepSeek",
            ModelProvider::Anthropic => "Anthropic",
        };
        f.write_str(s)
    }
}

/// One named property in a tool's parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

/// JSON-Schema-shaped object description of a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "object_kind")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

fn object_kind() -> String {
    "object".to_string()
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            kind: object_kind(),
            properties: BTreeMap::new(),
            required: None,
        }
    }
}

/// A callable tool declared on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ToolParameters,
    /// Execute through the agent's webhook bridge instead of the local stub.
    #[serde(default)]
    pub use_webhook: bool,
    /// Hold the call until a human approves it.
    #[serde(default)]
    pub require_confirmation: bool,
}

impl AgentTool {
    /// New tool with a fresh id; the name is normalized.
    pub fn new(name: &str, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: normalize_tool_name(name),
            description: description.into(),
            parameters: ToolParameters::default(),
            use_webhook: false,
            require_confirmation: false,
        }
    }

    pub fn with_webhook(mut self, use_webhook: bool) -> Self {
        self.use_webhook = use_webhook;
        self
    }

    pub fn with_confirmation(mut self, require_confirmation: bool) -> Self {
        self.require_confirmation = require_confirmation;
        self
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Lowercase the name and collapse each whitespace run into a single `_`.
pub fn normalize_tool_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}

/// Ordered tool list addressed by stable id, never by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSet {
    tools: Vec<AgentTool>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentTool> {
        self.tools.iter()
    }

    pub fn get(&self, id: &str) -> Option<&AgentTool> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// First exact name match. Names are expected to be unique; duplicates route to the earliest.
    pub fn find_by_name(&self, name: &str) -> Option<&AgentTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Replace the tool with the same id in place, or append it.
    pub fn upsert(&mut self, tool: AgentTool) {
        match self.tools.iter_mut().find(|t| t.id == tool.id) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<AgentTool> {
        let idx = self.tools.iter().position(|t| t.id == id)?;
        Some(self.tools.remove(idx))
    }

    /// Names of tools that need human approval, in declaration order.
    pub fn confirmation_required(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.require_confirmation)
            .map(|t| t.name.as_str())
            .collect()
    }
}

impl FromIterator<AgentTool> for ToolSet {
    fn from_iter<I: IntoIterator<Item = AgentTool>>(iter: I) -> Self {
        let mut set = ToolSet::new();
        for tool in iter {
            set.upsert(tool);
        }
        set
    }
}

/// Agent profile handed to a session at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detailed_description: String,
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default)]
    pub voice: VoiceName,
    /// Voice-clone reference sample (data URL or path). Only its presence matters to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_sample: Option<String>,
    #[serde(default)]
    pub tools: ToolSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub provider: ModelProvider,
    #[serde(default)]
    pub model_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            client_name: String::new(),
            icon: String::new(),
            description: String::new(),
            detailed_description: String::new(),
            system_instruction: String::new(),
            voice: VoiceName::default(),
            voice_sample: None,
            tools: ToolSet::new(),
            webhook_url: None,
            provider: ModelProvider::default(),
            model_id: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Webhook URL if one is configured and non-blank.
    pub fn webhook(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    pub fn has_voice_sample(&self) -> bool {
        self.voice_sample
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }

    /// Load a profile from a `.json` or `.toml` file.
    pub fn from_file(path: &Path) -> LiveResult<Self> {
        load_record(path)
    }
}

/// Incident urgency; ordered low < medium < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Active,
    Resolved,
}

/// Incident context injected into the instruction for a dispatch session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    #[serde(default)]
    pub client_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub fn from_file(path: &Path) -> LiveResult<Self> {
        load_record(path)
    }
}

fn load_record<T: serde::de::DeserializeOwned>(path: &Path) -> LiveResult<T> {
    let text = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&text)
            .map_err(|e| LiveError::Config(format!("{}: {}", path.display(), e)))
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}
