//! Persona instruction composed for the live model at connect time.

use crate::agent::{Agent, Incident};

const VOICE_CLONE_CLAUSE: &str = "[VOICE CLONE REFERENCE]: A biometric voice sample has been uploaded for this agent. Mimic the tone, pace, and pitch characteristics of that specific audio sample in your output.";

/// Base persona, then incident summary, engine line, voice-clone clause and
/// confirmation rules, each separated by a blank line. Optional clauses are
/// omitted entirely when they do not apply.
pub fn compose_instruction(agent: &Agent, incident: Option<&Incident>) -> String {
    let mut prompt = agent.system_instruction.clone();

    if let Some(incident) = incident {
        prompt.push_str(&format!(
            "\n\n[URGENT INCIDENT]: Priority {}. Handle \"{}\" for {}. {}",
            incident.priority.as_str().to_uppercase(),
            incident.title,
            incident.client_name,
            incident.description
        ));
    }

    prompt.push_str(&format!(
        "\n\n[ENGINE CONFIG]: You are powered by {} {}.",
        agent.provider, agent.model_id
    ));

    if agent.has_voice_sample() {
        prompt.push_str("\n\n");
        prompt.push_str(VOICE_CLONE_CLAUSE);
    }

    let sensitive = agent.tools.confirmation_required();
    if !sensitive.is_empty() {
        prompt.push_str(&format!(
            "\n\n[CONFIRMATION RULES]: You MUST verbally ask the user for confirmation before calling any of the following tools: {}. Do not call them until the user explicitly agrees.",
            sensitive.join(", ")
        ));
    }

    prompt
}
