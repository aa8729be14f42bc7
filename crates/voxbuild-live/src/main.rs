//! VoxBuild Live CLI: talk to an agent through the default mic and speakers.
//!
//! Usage:
//!   voxbuild-live --agent agent.toml [--incident incident.json]
//!   voxbuild-live --list-devices
//!
//! Sensitive tool calls are confirmed on stdin with a [y/N] prompt.
//! Ctrl-C closes the session.

use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxbuild_live::{
    Agent, ConfirmationRequest, GeminiLiveConnector, Incident, LiveConfig, LiveSession, Role,
    SessionEvent, SessionHandle, SessionState, SystemAudio,
};

fn print_usage() {
    eprintln!("VoxBuild Live: real-time voice session with an agent");
    eprintln!("  --agent <file>       Agent profile (TOML or JSON)");
    eprintln!("  --incident <file>    Optional incident to brief the agent with");
    eprintln!("  --list-devices       List audio input/output devices and exit");
    eprintln!();
    eprintln!("Requires VOXBUILD_API_KEY (or GEMINI_API_KEY / API_KEY).");
    eprintln!("Config file: VOXBUILD_CONFIG or ./config/live.toml");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut agent_path: Option<PathBuf> = None;
    let mut incident_path: Option<PathBuf> = None;
    let mut list_devices = false;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--agent" => agent_path = args.next().map(PathBuf::from),
            "--incident" => incident_path = args.next().map(PathBuf::from),
            "--list-devices" => list_devices = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => eprintln!("Ignoring unknown argument: {}", other),
        }
    }

    if list_devices {
        println!("Input devices:");
        for name in SystemAudio::list_input_devices()? {
            println!("  {}", name);
        }
        println!("Output devices:");
        for name in SystemAudio::list_output_devices()? {
            println!("  {}", name);
        }
        return Ok(());
    }

    let agent_path = match agent_path {
        Some(p) => p,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let config = LiveConfig::load()?;
    let agent = Agent::from_file(&agent_path)
        .with_context(|| format!("loading agent {}", agent_path.display()))?;
    let incident = match incident_path {
        Some(p) => Some(
            Incident::from_file(&p).with_context(|| format!("loading incident {}", p.display()))?,
        ),
        None => None,
    };
    let connector = GeminiLiveConnector::from_config(&config)?;

    info!("Starting live session with {}", agent.name);
    let (mut session, mut events) = LiveSession::new(
        config,
        agent,
        incident,
        Arc::new(connector),
        Arc::new(SystemAudio::new()),
    );
    let handle = session.handle();

    let runner = tokio::spawn(async move {
        session.connect().await?;
        session.run().await
    });

    let prompt = Arc::new(OperatorPrompt::default());
    spawn_stdin_reader(Arc::clone(&prompt), handle.clone());

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, closing session");
            let _ = ctrl_c_handle.close();
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged(state) => {
                println!("· session {}", state);
                if state == SessionState::Closed {
                    break;
                }
            }
            SessionEvent::Speaking(true) => println!("· agent speaking"),
            SessionEvent::Speaking(false) => {}
            SessionEvent::Interrupted => println!("· interrupted"),
            SessionEvent::Transcript(entry) => {
                let who = match entry.role {
                    Role::User => "you",
                    Role::Model => "agent",
                };
                println!("[{}] {}: {}", entry.timestamp.format("%H:%M:%S"), who, entry.text);
            }
            SessionEvent::ConfirmationRequested(request) => {
                println!();
                println!(
                    "⚠️  The agent wants to run `{}` with {}",
                    request.tool_name, request.args
                );
                print!("Allow? [y/N] ");
                let _ = io::stdout().flush();
                prompt.show(request);
            }
            SessionEvent::ConfirmationCleared => {
                if prompt.clear() {
                    println!();
                    println!("· confirmation no longer pending");
                }
            }
            SessionEvent::ToolExecuting { name } => println!("· executing {}", name),
            SessionEvent::ToolSettled => {}
            SessionEvent::Error(message) => eprintln!("! {}", message),
        }
    }

    runner.await??;
    Ok(())
}

/// The confirmation currently shown on the terminal.
#[derive(Default)]
struct OperatorPrompt {
    shown: Mutex<Option<ConfirmationRequest>>,
}

impl OperatorPrompt {
    fn show(&self, request: ConfirmationRequest) {
        if let Ok(mut shown) = self.shown.lock() {
            *shown = Some(request);
        }
    }

    /// Forget the shown request. True when one was showing.
    fn clear(&self) -> bool {
        self.shown.lock().map(|mut s| s.take().is_some()).unwrap_or(false)
    }

    /// Turn a typed line into an answer for the shown request, if any.
    fn answer(&self, line: &str) -> Option<(String, bool)> {
        let request = self.shown.lock().ok()?.take()?;
        let approved = matches!(line.trim().to_lowercase().as_str(), "y" | "yes");
        Some((request.call_id, approved))
    }
}

/// One reader for the whole run, so a stale prompt never steals a line.
/// Plain thread: a blocked stdin read must not hold up runtime shutdown.
fn spawn_stdin_reader(prompt: Arc<OperatorPrompt>, handle: SessionHandle) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let Some((call_id, approved)) = prompt.answer(&line) else {
                continue;
            };
            if let Err(e) = handle.resolve(call_id, approved) {
                warn!("Confirmation not delivered: {}", e);
                break;
            }
        }
    });
}
