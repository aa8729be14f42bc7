//! Model-initiated tool calls.
//!
//! A call is matched by name against the agent's tools (first match wins;
//! unknown names are dropped without a response). Sensitive tools wait on the
//! [`ConfirmationGate`]. Execution goes to the agent's webhook when the tool
//! is webhook-backed, otherwise a local stub answers. Webhook failures never
//! reach the model: the stub result is sent instead.

use crate::agent::{Agent, AgentTool, Incident, ToolSet};
use crate::confirmation::{ConfirmationGate, ConfirmationRequest, Decision};
use crate::error::{LiveError, LiveResult};
use crate::transport::{FunctionCall, FunctionResponse};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result sent when a tool runs locally or the webhook could not be used.
pub fn default_result() -> Value {
    json!({
        "status": "success",
        "info": "Action performed via SaaS bridge."
    })
}

/// Result sent when the operator says no.
pub fn cancelled_result() -> Value {
    json!({
        "status": "cancelled",
        "message": "User rejected tool execution."
    })
}

/// Result sent when nobody answered within the confirmation timeout.
pub fn timed_out_result() -> Value {
    json!({
        "status": "cancelled",
        "message": "Confirmation timed out."
    })
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs approved calls, either against the webhook bridge or the local stub.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    client: reqwest::Client,
    webhook_url: Option<String>,
    agent_id: String,
    incident_id: Option<String>,
}

impl ToolExecutor {
    pub fn new(agent: &Agent, incident: Option<&Incident>, timeout: Duration) -> LiveResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LiveError::Webhook(e.to_string()))?;
        Ok(Self {
            client,
            webhook_url: agent.webhook().map(str::to_string),
            agent_id: agent.id.clone(),
            incident_id: incident.map(|i| i.id.clone()),
        })
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    /// Always yields a result; webhook failures fall back to [`default_result`].
    pub async fn execute(&self, tool: &AgentTool, call: &FunctionCall) -> Value {
        let url = match (tool.use_webhook, self.webhook_url.as_deref()) {
            (true, Some(url)) => url,
            (true, None) => {
                debug!(target: "voxbuild::live", "{} is webhook-backed but no webhook is configured", tool.name);
                return default_result();
            }
            (false, _) => return default_result(),
        };

        match self.post(url, call).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    target: "voxbuild::live",
                    "Webhook call for {} failed, using default result: {}", call.name, e
                );
                default_result()
            }
        }
    }

    async fn post(&self, url: &str, call: &FunctionCall) -> LiveResult<Value> {
        let mut body = json!({
            "agentId": self.agent_id,
            "tool": call.name,
            "args": call.args,
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Some(ref incident_id) = self.incident_id {
            body["incidentId"] = json!(incident_id);
        }

        let resp = self.client.post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LiveError::Webhook(format!("webhook returned {}", status)));
        }
        Ok(resp.json::<Value>().await?)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// A finished call, ready to go back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    /// None when the call was discarded and nothing should be sent.
    pub response: Option<Value>,
    /// True when the executor actually ran.
    pub executed: bool,
    /// Set for calls that went through the gate.
    pub decision: Option<Decision>,
}

impl ToolOutcome {
    pub fn into_response(self) -> Option<FunctionResponse> {
        let response = self.response?;
        Some(FunctionResponse {
            id: self.call_id,
            name: self.name,
            response,
        })
    }
}

/// What happened to an incoming call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// No tool with that name.
    Ignored,
    /// Running now.
    Executing { name: String },
    /// Queued for the operator. `shown` is set when the request became the head.
    AwaitingConfirmation { shown: Option<ConfirmationRequest> },
}

/// Routes calls, owns the confirmation queue and the running tool tasks.
pub struct ToolOrchestrator {
    executor: Arc<ToolExecutor>,
    tools: ToolSet,
    gate: ConfirmationGate,
    tasks: JoinSet<ToolOutcome>,
    confirmation_timeout: Option<Duration>,
}

impl ToolOrchestrator {
    pub fn new(executor: ToolExecutor, tools: ToolSet, confirmation_timeout: Option<Duration>) -> Self {
        Self {
            executor: Arc::new(executor),
            tools,
            gate: ConfirmationGate::new(),
            tasks: JoinSet::new(),
            confirmation_timeout,
        }
    }

    /// Route one call. Must run inside a tokio runtime.
    pub fn dispatch(&mut self, call: FunctionCall) -> Dispatch {
        let tool = match self.tools.find_by_name(&call.name) {
            Some(tool) => tool.clone(),
            None => {
                warn!(target: "voxbuild::live", "Ignoring call to unknown tool {}", call.name);
                return Dispatch::Ignored;
            }
        };

        let executor = Arc::clone(&self.executor);

        if !tool.require_confirmation {
            info!(target: "voxbuild::live", "Executing {} (call {})", tool.name, call.id);
            let name = call.name.clone();
            self.tasks.spawn(async move {
                let result = executor.execute(&tool, &call).await;
                ToolOutcome {
                    call_id: call.id,
                    name: call.name,
                    response: Some(result),
                    executed: true,
                    decision: None,
                }
            });
            return Dispatch::Executing { name };
        }

        let request = ConfirmationRequest {
            call_id: call.id.clone(),
            tool_id: tool.id.clone(),
            tool_name: tool.name.clone(),
            description: tool.description.clone(),
            args: call.args.clone(),
        };
        let (ticket, at_head) = self.gate.submit(request.clone());
        let timeout = self.confirmation_timeout;

        self.tasks.spawn(async move {
            let decision = ticket.wait(timeout).await;
            let (response, executed) = match decision {
                Decision::Approved => (Some(executor.execute(&tool, &call).await), true),
                Decision::Rejected => (Some(cancelled_result()), false),
                Decision::TimedOut => (Some(timed_out_result()), false),
                Decision::Discarded => (None, false),
            };
            ToolOutcome {
                call_id: call.id,
                name: call.name,
                response,
                executed,
                decision: Some(decision),
            }
        });

        Dispatch::AwaitingConfirmation {
            shown: at_head.then_some(request),
        }
    }

    /// The request the operator should be looking at.
    pub fn pending_confirmation(&self) -> Option<&ConfirmationRequest> {
        self.gate.current()
    }

    pub fn pending_count(&self) -> usize {
        self.gate.len()
    }

    /// Answer the head (or a specific call). `None` when nothing is left waiting on it.
    pub fn resolve(&mut self, call_id: Option<&str>, approved: bool) -> Option<ConfirmationRequest> {
        match call_id {
            Some(id) => self.gate.resolve(id, approved),
            None => self.gate.resolve_current(approved),
        }
    }

    /// Drop a pending request without answering (remote cancellation or timeout).
    pub fn withdraw(&mut self, call_id: &str) -> Option<ConfirmationRequest> {
        self.gate.withdraw(call_id)
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Next finished call. Pending forever when there are no tasks.
    pub async fn next_outcome(&mut self) -> Option<ToolOutcome> {
        loop {
            if self.tasks.is_empty() {
                return std::future::pending().await;
            }
            match self.tasks.join_next().await {
                Some(Ok(outcome)) => return Some(outcome),
                Some(Err(e)) if e.is_cancelled() => continue,
                Some(Err(e)) => {
                    warn!(target: "voxbuild::live", "Tool task failed: {}", e);
                    continue;
                }
                None => return None,
            }
        }
    }

    /// Discard every confirmation and abort running tools.
    pub fn shutdown(&mut self) {
        self.gate.discard_all();
        self.tasks.abort_all();
    }
}
