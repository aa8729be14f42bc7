//! Gemini Live binding over a websocket (`BidiGenerateContent`).
//!
//! The first client frame is the `setup` message; the server acknowledges with
//! `setupComplete`, which is surfaced as [`ServerEvent::Open`]. After that the
//! client streams `realtimeInput` audio and `toolResponse` frames while the
//! server streams `serverContent`, `toolCall` and `toolCallCancellation`.

use super::{
    ClientMessage, FunctionCall, LiveConnector, LiveLink, ServerContent, ServerEvent,
    SessionSetup,
};
use crate::codec::MediaBlob;
use crate::config::LiveConfig;
use crate::error::{LiveError, LiveResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

/// Opens live sessions against the Gemini Live websocket endpoint.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from config; an API key is required.
    pub fn from_config(config: &LiveConfig) -> LiveResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            LiveError::Config(
                "live session requires VOXBUILD_API_KEY, GEMINI_API_KEY, or API_KEY".to_string(),
            )
        })?;
        Ok(Self::new(config.endpoint.clone(), api_key))
    }

    fn url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, sep, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: SessionSetup) -> LiveResult<LiveLink> {
        info!(target: "voxbuild::live", "Opening live link to {}", self.endpoint);
        let (ws, _response) = connect_async(self.url().as_str()).await?;
        let (mut write, mut read) = ws.split();

        write
            .send(WsMessage::Text(setup_message(&setup).to_string()))
            .await?;
        debug!(target: "voxbuild::live", "Setup sent for {}", setup.model);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match encode_client_message(&msg) {
                    Some(text) => text,
                    None => break,
                };
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    warn!(target: "voxbuild::live", "Live link write failed: {}", e);
                    break;
                }
            }
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
            debug!(target: "voxbuild::live", "Live link writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(t)) => t,
                    Ok(WsMessage::Binary(b)) => match String::from_utf8(b) {
                        Ok(t) => t,
                        Err(_) => {
                            warn!(target: "voxbuild::live", "Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(ServerEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(ServerEvent::Error(e.to_string()));
                        return;
                    }
                };
                match parse_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            if in_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(target: "voxbuild::live", "Unparseable server frame: {}", e),
                }
            }
            let _ = in_tx.send(ServerEvent::Closed { reason: None });
        });

        Ok(LiveLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// The `setup` frame for a session.
pub fn setup_message(setup: &SessionSetup) -> Value {
    let mut body = json!({
        "model": setup.model,
        "generationConfig": {
            "responseModalities": [setup.response_modality],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": setup.voice.as_str() }
                }
            }
        },
        "systemInstruction": {
            "parts": [{ "text": setup.system_instruction }]
        }
    });
    if setup.input_transcription {
        body["inputAudioTranscription"] = json!({});
    }
    if setup.output_transcription {
        body["outputAudioTranscription"] = json!({});
    }
    if let Some(ref decls) = setup.tools {
        body["tools"] = json!([{ "functionDeclarations": decls }]);
    }
    json!({ "setup": body })
}

/// Serialize an outbound message; `None` for [`ClientMessage::Close`].
pub fn encode_client_message(msg: &ClientMessage) -> Option<String> {
    let value = match msg {
        ClientMessage::RealtimeInput(blob) => json!({
            "realtimeInput": { "mediaChunks": [blob] }
        }),
        ClientMessage::ToolResponse(resp) => json!({
            "toolResponse": { "functionResponses": [resp] }
        }),
        ClientMessage::Close => return None,
    };
    Some(value.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<WireServerContent>,
    #[serde(default)]
    tool_call: Option<WireToolCall>,
    #[serde(default)]
    tool_call_cancellation: Option<WireToolCallCancellation>,
    #[serde(default)]
    go_away: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerContent {
    #[serde(default)]
    model_turn: Option<WireContent>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    input_transcription: Option<WireTranscription>,
    #[serde(default)]
    output_transcription: Option<WireTranscription>,
}

#[derive(Debug, Default, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    inline_data: Option<MediaBlob>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTranscription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct WireToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

/// Parse one server frame into zero or more events.
pub fn parse_server_message(text: &str) -> LiveResult<Vec<ServerEvent>> {
    let msg: WireServerMessage = serde_json::from_str(text)
        .map_err(|e| LiveError::Protocol(format!("bad server frame: {}", e)))?;
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(ServerEvent::Open);
    }

    if let Some(content) = msg.server_content {
        let audio = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|blob| blob.mime_type.starts_with("audio/"))
                    .collect()
            })
            .unwrap_or_default();
        events.push(ServerEvent::Content(ServerContent {
            input_transcription: content.input_transcription.and_then(|t| t.text),
            output_transcription: content.output_transcription.and_then(|t| t.text),
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
            audio,
        }));
    }

    if let Some(call) = msg.tool_call {
        if !call.function_calls.is_empty() {
            events.push(ServerEvent::ToolCall(call.function_calls));
        }
    }

    if let Some(cancel) = msg.tool_call_cancellation {
        events.push(ServerEvent::ToolCallCancellation(cancel.ids));
    }

    if let Some(go_away) = msg.go_away {
        info!(target: "voxbuild::live", "Server announced shutdown: {}", go_away);
    }

    Ok(events)
}
