//! Session lifecycle against an in-memory live link and fake audio devices.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use voxbuild_live::session::BRIDGE_ERROR_MESSAGE;
use voxbuild_live::tools::{cancelled_result, default_result, timed_out_result};
use voxbuild_live::{
    ClientMessage, LiveConfig, LiveError, LiveSession, Role, ServerContent, ServerEvent,
    SessionEvent, SessionState,
};

#[tokio::test]
async fn test_setup_reflects_agent() {
    let h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    let setup = h.connector.setups.lock().unwrap()[0].clone();
    assert_eq!(setup.voice.as_str(), "Puck");
    assert!(setup.input_transcription && setup.output_transcription);
    assert!(setup
        .system_instruction
        .starts_with("You are Zenith, a support agent."));
    assert!(setup
        .system_instruction
        .contains("following tools: issue_refund."));
    let names: Vec<String> = setup.tools.unwrap().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["lookup_order", "issue_refund"]);

    h.close().await;
}

#[tokio::test]
async fn test_microphone_streams_after_open() {
    let audio = FakeAudio::new().with_mic_frames(vec![vec![0.2; 4096], vec![-0.2; 4096]]);
    let mut h = Harness::start(agent_with_tools(), test_config(), audio).await;

    for _ in 0..2 {
        match h.remote.outbound.recv().await {
            Some(ClientMessage::RealtimeInput(blob)) => {
                assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
                // 4096 samples, 2 bytes each, base64 expands by 4/3
                assert_eq!(blob.data.len(), 10924);
            }
            other => panic!("expected audio frame, got {:?}", other),
        }
    }
    assert_eq!(h.audio.log.lock().unwrap().capture_started, 1);
    h.close().await;
}

#[tokio::test]
async fn test_transcripts_finalized_per_turn() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    for (input, output) in [(Some("Hel"), Some("Hi")), (Some("lo"), Some("!"))] {
        h.remote.content(ServerContent {
            input_transcription: input.map(str::to_string),
            output_transcription: output.map(str::to_string),
            ..Default::default()
        });
    }
    h.remote.content(ServerContent {
        turn_complete: true,
        ..Default::default()
    });

    let first = h.next_event(|e| matches!(e, SessionEvent::Transcript(_))).await;
    let second = h.next_event(|e| matches!(e, SessionEvent::Transcript(_))).await;
    match (first, second) {
        (SessionEvent::Transcript(user), SessionEvent::Transcript(model)) => {
            assert_eq!((user.role, user.text.as_str()), (Role::User, "Hello"));
            assert_eq!((model.role, model.text.as_str()), (Role::Model, "Hi!"));
        }
        other => panic!("unexpected events {:?}", other),
    }

    // a model-only turn produces one entry
    h.remote.content(ServerContent {
        output_transcription: Some("Anything else?".to_string()),
        turn_complete: true,
        ..Default::default()
    });
    match h.next_event(|e| matches!(e, SessionEvent::Transcript(_))).await {
        SessionEvent::Transcript(entry) => assert_eq!(entry.role, Role::Model),
        _ => unreachable!(),
    }

    h.close().await;
}

#[tokio::test]
async fn test_model_audio_plays_back_to_back() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;
    h.audio.set_clock(1.0);

    h.remote.content(ServerContent {
        audio: vec![model_audio(0.5), model_audio(0.25)],
        ..Default::default()
    });
    assert_eq!(
        h.next_event(|e| matches!(e, SessionEvent::Speaking(_))).await,
        SessionEvent::Speaking(true)
    );

    let scheduled = h.audio.scheduled();
    assert_eq!(scheduled.len(), 2);
    let (a, a_start, a_len) = scheduled[0];
    let (b, b_start, _) = scheduled[1];
    assert_eq!(a_start, 1.0);
    assert!((b_start - (a_start + a_len)).abs() < 1e-9);

    h.audio.complete(a);
    h.audio.complete(b);
    assert_eq!(
        h.next_event(|e| matches!(e, SessionEvent::Speaking(_))).await,
        SessionEvent::Speaking(false)
    );

    h.close().await;
}

#[tokio::test]
async fn test_interruption_flushes_playback() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;
    h.audio.set_clock(2.0);

    h.remote.content(ServerContent {
        audio: vec![model_audio(1.0), model_audio(1.0)],
        ..Default::default()
    });
    h.next_event(|e| *e == SessionEvent::Speaking(true)).await;

    h.remote.content(ServerContent {
        interrupted: true,
        ..Default::default()
    });
    h.next_event(|e| *e == SessionEvent::Interrupted).await;
    h.next_event(|e| *e == SessionEvent::Speaking(false)).await;
    assert_eq!(h.audio.stopped().len(), 2);

    // late completions of stopped units change nothing; the next chunk starts at the clock
    let first = h.audio.scheduled()[0].0;
    h.audio.complete(first);
    h.audio.set_clock(2.4);
    h.remote.content(ServerContent {
        audio: vec![model_audio(0.1)],
        ..Default::default()
    });
    h.next_event(|e| *e == SessionEvent::Speaking(true)).await;
    assert_eq!(h.audio.scheduled()[2].1, 2.4);

    h.close().await;
}

#[tokio::test]
async fn test_unconfirmed_tool_runs_immediately() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.tool_call("c1", "lookup_order", json!({"order": "A1"}));
    h.next_event(|e| matches!(e, SessionEvent::ToolExecuting { .. })).await;

    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c1");
    assert_eq!(resp.name, "lookup_order");
    assert_eq!(resp.response, default_result());

    h.next_event(|e| *e == SessionEvent::ToolSettled).await;
    h.close().await;
}

#[tokio::test]
async fn test_unknown_tool_gets_no_response() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.tool_call("c1", "format_disk", json!({}));
    h.remote.tool_call("c2", "lookup_order", json!({}));

    // only the known tool answers
    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c2");
    h.close().await;
}

#[tokio::test]
async fn test_confirmation_rejected() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.tool_call("c1", "issue_refund", json!({"amount": 20}));
    match h
        .next_event(|e| matches!(e, SessionEvent::ConfirmationRequested(_)))
        .await
    {
        SessionEvent::ConfirmationRequested(req) => {
            assert_eq!(req.call_id, "c1");
            assert_eq!(req.args["amount"], 20);
        }
        _ => unreachable!(),
    }

    // nothing is sent while the operator is deciding
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.remote.drain_control().is_empty());

    h.handle.reject().unwrap();
    h.next_event(|e| *e == SessionEvent::ConfirmationCleared).await;
    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c1");
    assert_eq!(resp.response, cancelled_result());

    h.close().await;
}

#[tokio::test]
async fn test_confirmations_queue_in_order() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.tool_call("c1", "issue_refund", json!({"amount": 1}));
    h.remote.tool_call("c2", "issue_refund", json!({"amount": 2}));

    let head = |e: &SessionEvent| matches!(e, SessionEvent::ConfirmationRequested(_));
    match h.next_event(head).await {
        SessionEvent::ConfirmationRequested(req) => assert_eq!(req.call_id, "c1"),
        _ => unreachable!(),
    }

    h.handle.approve().unwrap();
    match h.next_event(head).await {
        SessionEvent::ConfirmationRequested(req) => assert_eq!(req.call_id, "c2"),
        _ => unreachable!(),
    }
    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c1");
    assert_eq!(resp.response, default_result());

    h.handle.reject().unwrap();
    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c2");
    assert_eq!(resp.response, cancelled_result());

    h.close().await;
}

#[tokio::test]
async fn test_remote_cancellation_withdraws_confirmation() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.tool_call("c1", "issue_refund", json!({}));
    h.next_event(|e| matches!(e, SessionEvent::ConfirmationRequested(_)))
        .await;

    h.remote
        .send(ServerEvent::ToolCallCancellation(vec!["c1".to_string()]));
    h.next_event(|e| *e == SessionEvent::ConfirmationCleared).await;

    let (session, mut remote, _) = h.close().await;
    assert!(session.pending_confirmation().is_none());
    // no tool response, only the close request
    assert_eq!(remote.drain_control(), vec![ClientMessage::Close]);
}

fn requested(call_id: &'static str) -> impl FnMut(&SessionEvent) -> bool {
    move |e| matches!(e, SessionEvent::ConfirmationRequested(req) if req.call_id == call_id)
}

#[tokio::test]
async fn test_confirmation_timeout_promotes_next() {
    let config = LiveConfig {
        confirmation_timeout_secs: Some(1),
        ..test_config()
    };
    let mut h = Harness::start(agent_with_tools(), config, FakeAudio::new()).await;

    h.remote.tool_call("c1", "issue_refund", json!({"amount": 1}));
    h.next_event(requested("c1")).await;
    // c2 queues later so it is still open when c1 expires
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.remote.tool_call("c2", "issue_refund", json!({"amount": 2}));

    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c1");
    assert_eq!(resp.response, timed_out_result());
    h.next_event(requested("c2")).await;

    h.handle.approve().unwrap();
    let resp = h.remote.next_tool_response().await;
    assert_eq!(resp.id, "c2");
    assert_eq!(resp.response, default_result());

    let (session, _, _) = h.close().await;
    assert!(session.pending_confirmation().is_none());
}

#[tokio::test]
async fn test_approval_after_timeout_does_not_execute() {
    let config = LiveConfig {
        confirmation_timeout_secs: Some(1),
        ..test_config()
    };
    let mut h = Harness::start(agent_with_tools(), config, FakeAudio::new()).await;

    h.remote.tool_call("c1", "issue_refund", json!({}));
    h.next_event(requested("c1")).await;
    h.next_event(|e| *e == SessionEvent::ConfirmationCleared).await;
    assert_eq!(h.remote.next_tool_response().await.response, timed_out_result());

    h.handle.approve().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = h.events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::ToolExecuting { .. }),
            "late approval surfaced {:?}",
            event
        );
    }
    assert!(h.remote.drain_control().is_empty());

    h.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;
    h.remote.tool_call("c1", "issue_refund", json!({}));

    let (mut session, mut remote, audio) = h.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    {
        let log = audio.log.lock().unwrap();
        assert_eq!(log.capture_closes, 1);
        assert_eq!(log.playback_closes, 1);
    }
    assert!(remote.drain_control().contains(&ClientMessage::Close));

    session.close();
    session.close();
    drop(session);

    let log = audio.log.lock().unwrap();
    assert_eq!(log.capture_closes, 1);
    assert_eq!(log.playback_closes, 1);
    assert!(remote.drain_control().is_empty());
}

#[tokio::test]
async fn test_link_error_tears_down() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;

    h.remote.send(ServerEvent::Error("socket reset".to_string()));
    assert_eq!(
        h.next_event(|e| matches!(e, SessionEvent::Error(_))).await,
        SessionEvent::Error(BRIDGE_ERROR_MESSAGE.to_string())
    );
    h.next_event(|e| *e == SessionEvent::StateChanged(SessionState::Closed))
        .await;

    let session = h.task.await.unwrap();
    assert_eq!(session.error(), Some(BRIDGE_ERROR_MESSAGE));
    assert_eq!(h.audio.log.lock().unwrap().capture_closes, 1);
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let mut h = Harness::start(agent_with_tools(), test_config(), FakeAudio::new()).await;
    h.remote.send(ServerEvent::Closed {
        reason: Some("deadline".to_string()),
    });
    h.next_event(|e| *e == SessionEvent::StateChanged(SessionState::Closed))
        .await;
    let session = h.task.await.unwrap();
    assert!(session.error().is_none());
}

#[tokio::test]
async fn test_missing_microphone_never_connects() {
    init_tracing();
    let (connector, _remote) = FakeConnector::new();
    let (mut session, mut events) = LiveSession::new(
        test_config(),
        agent_with_tools(),
        None,
        connector.clone(),
        Arc::new(FakeAudio::new().without_microphone()),
    );

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, LiveError::AudioDevice(_)));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.setup_count(), 0);
    assert!(matches!(
        expect_event(&mut events, |e| matches!(e, SessionEvent::Error(_))).await,
        SessionEvent::Error(_)
    ));
}

#[tokio::test]
async fn test_connect_only_from_idle() {
    init_tracing();
    let (connector, _remote) = FakeConnector::new();
    let (mut session, _events) = LiveSession::new(
        test_config(),
        agent_with_tools(),
        None,
        connector,
        Arc::new(FakeAudio::new()),
    );
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(matches!(
        session.connect().await,
        Err(LiveError::InvalidState(_))
    ));
    session.close();
    assert!(matches!(
        session.connect().await,
        Err(LiveError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_transport_failure_closes_session() {
    init_tracing();
    let audio = FakeAudio::new();
    let (mut session, _events) = LiveSession::new(
        test_config(),
        agent_with_tools(),
        None,
        FakeConnector::failing(),
        Arc::new(audio.clone()),
    );
    assert!(session.connect().await.is_err());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.error(), Some(BRIDGE_ERROR_MESSAGE));
    assert_eq!(audio.log.lock().unwrap().playback_closes, 1);
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    init_tracing();
    let (connector, _remote) = FakeConnector::new();
    let config = LiveConfig {
        tool_indicator_ms: u64::MAX,
        ..test_config()
    };
    let (mut session, _events) = LiveSession::new(
        config,
        agent_with_tools(),
        None,
        connector.clone(),
        Arc::new(FakeAudio::new()),
    );
    assert!(matches!(session.connect().await, Err(LiveError::Config(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(connector.setup_count(), 0);
}
