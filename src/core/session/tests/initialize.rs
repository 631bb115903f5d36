use std::time::Duration;

use super::support::*;
use crate::core::api::{JobStatus, MessageRecord, MessageStatus, Role, StreamRequest};
use crate::core::session::{GenerationOptions, SessionError, StreamOutcome};

fn streaming_answer(content: &str, job_id: &str) -> MessageRecord {
    let mut msg = record(Role::Assistant, content);
    msg.status = MessageStatus::Streaming;
    msg.job_id = Some(job_id.to_string());
    msg
}

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{} was never called: {:?}", call, calls))
}

#[tokio::test]
async fn messages_load_before_jobs_are_queried() {
    let backend = FakeBackend::default();
    backend.set_messages("chat-1", vec![record(Role::User, "hello")]);
    let coordinator = coordinator(&backend);

    let handle = coordinator.initialize_conversation("chat-1").await.unwrap();

    assert!(handle.is_none());
    let calls = backend.calls();
    assert!(position(&calls, "list_messages:chat-1") < position(&calls, "list_jobs:chat-1"));
    let state = coordinator.conversation_state("chat-1").unwrap();
    assert!(state.loaded);
    assert_eq!(state.messages.len(), 1);
    assert!(coordinator.active_jobs().is_empty());
}

#[tokio::test]
async fn running_job_is_resumed_from_its_snapshot() {
    let backend = FakeBackend::default();
    backend.set_messages(
        "chat-1",
        vec![record(Role::User, "summarize"), streaming_answer("The fi", "j9")],
    );
    backend.set_jobs(
        "chat-1",
        vec![
            active_job("j8", "chat-1", JobStatus::Completed),
            active_job("j9", "chat-1", JobStatus::Streaming),
        ],
    );
    let (script, feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);
    coordinator.focus(Some("chat-1"));

    let handle = coordinator
        .initialize_conversation("chat-1")
        .await
        .unwrap()
        .expect("reconnect task");

    assert_eq!(coordinator.active_jobs().get("chat-1"), Some("j9"));
    assert_eq!(coordinator.view().messages.len(), 2);

    feed.frame(r#"{"type":"reconnect","content":"The first part","status":"streaming"}"#);
    assert!(
        eventually(|| {
            coordinator
                .view()
                .messages
                .last()
                .is_some_and(|m| m.content == "The first part")
        })
        .await
    );

    let mut finished = streaming_answer("The first part, and the rest.", "j9");
    finished.status = MessageStatus::Completed;
    backend.set_messages("chat-1", vec![record(Role::User, "summarize"), finished]);
    feed.frame(r#"{"type":"update","content":"The first part, and the rest.","status":"completed"}"#);
    handle.await.unwrap();

    let state = coordinator.conversation_state("chat-1").unwrap();
    assert_eq!(state.messages.len(), 2);
    let last = state.messages.last().unwrap();
    assert_eq!(last.content, "The first part, and the rest.");
    assert_eq!(last.status, MessageStatus::Completed);
    assert!(coordinator.active_jobs().is_empty());
    match backend.requests().last() {
        Some(StreamRequest::Reconnect { job_id }) => assert_eq!(job_id, "j9"),
        other => panic!("expected reconnect request, got {:?}", other),
    }
}

#[tokio::test]
async fn reconnect_without_a_matching_message_appends_one() {
    let backend = FakeBackend::default();
    backend.set_messages("chat-1", vec![record(Role::User, "queued question")]);
    backend.set_jobs("chat-1", vec![active_job("j5", "chat-1", JobStatus::Pending)]);
    let (script, feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);

    let handle = coordinator
        .initialize_conversation("chat-1")
        .await
        .unwrap()
        .expect("reconnect task");
    feed.frame(r#"{"type":"response","token":"x"}"#);
    assert!(
        eventually(|| {
            coordinator.conversation_state("chat-1").is_some_and(|s| {
                s.messages.len() == 2
                    && s.messages[1].job_id.as_deref() == Some("j5")
                    && s.messages[1].content == "x"
            })
        })
        .await
    );

    feed.frame(r#"{"error":"Generation failed on worker"}"#);
    handle.await.unwrap();
    let state = coordinator.conversation_state("chat-1").unwrap();
    let last = state.messages.last().unwrap();
    assert_eq!(last.content, "x");
    assert_eq!(last.status, MessageStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Generation failed on worker"));
    assert!(coordinator.active_jobs().is_empty());
}

#[tokio::test]
async fn reconnect_snapshot_reporting_error_fails_the_message() {
    let backend = FakeBackend::default();
    backend.set_messages(
        "chat-1",
        vec![record(Role::User, "q"), streaming_answer("so far", "j3")],
    );
    let coordinator = coordinator(&backend);
    coordinator.initialize_conversation("chat-1").await.unwrap();
    backend.push_script(body(&[r#"{"type":"reconnect","content":"so far","status":"error"}"#]));

    let outcome = coordinator.reconnect_to_job("j3", "chat-1").await.unwrap();

    assert_eq!(outcome, StreamOutcome::Failed("Generation failed".to_string()));
    let state = coordinator.conversation_state("chat-1").unwrap();
    assert_eq!(state.messages.last().unwrap().content, "so far");
    assert_eq!(state.messages.last().unwrap().status, MessageStatus::Error);
}

#[tokio::test]
async fn job_listing_failure_keeps_loaded_messages() {
    let backend = FakeBackend::default();
    backend.set_messages("chat-1", vec![record(Role::User, "hi")]);
    backend.fail_jobs();
    let coordinator = coordinator(&backend);

    let handle = coordinator.initialize_conversation("chat-1").await.unwrap();

    assert!(handle.is_none());
    let state = coordinator.conversation_state("chat-1").unwrap();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn open_stream_keeps_local_state_over_reload() {
    let backend = FakeBackend::default();
    let (script, feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .send_message(Some("chat-1"), "stream please", GenerationOptions::default())
                .await
        })
    };
    feed.frame(r#"{"type":"response","token":"abc"}"#);
    assert!(
        eventually(|| {
            coordinator
                .conversation_state("chat-1")
                .is_some_and(|s| s.messages.last().is_some_and(|m| m.content == "abc"))
        })
        .await
    );

    let handle = coordinator.initialize_conversation("chat-1").await.unwrap();
    assert!(handle.is_none());
    assert!(!backend.calls().contains(&"list_messages:chat-1".to_string()));
    assert_eq!(
        coordinator
            .conversation_state("chat-1")
            .unwrap()
            .messages
            .last()
            .unwrap()
            .content,
        "abc"
    );

    coordinator.cancel_stream("chat-1");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn send_started_while_messages_load_keeps_its_answer() {
    let backend = FakeBackend::default();
    backend.delay_messages(Duration::from_millis(100));
    let (script, feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);
    coordinator.focus(Some("chat-1"));

    let init = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.initialize_conversation("chat-1").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let send = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .send_message(Some("chat-1"), "hi", GenerationOptions::default())
                .await
        })
    };
    assert!(init.await.unwrap().unwrap().is_none());

    feed.frame(r#"{"type":"job_started","job_id":"j1"}"#);
    feed.frame(r#"{"type":"response","token":"hel"}"#);
    feed.frame(r#"{"type":"response","token":"lo"}"#);
    assert!(
        eventually(|| {
            coordinator
                .conversation_state("chat-1")
                .is_some_and(|s| s.messages.last().is_some_and(|m| m.content == "hello"))
        })
        .await
    );

    feed.frame(r#"{"type":"done"}"#);
    assert_eq!(send.await.unwrap().unwrap(), StreamOutcome::Completed);
    assert_eq!(coordinator.conversation_state("chat-1").unwrap().error, None);
}

#[tokio::test]
async fn second_reconnect_for_same_conversation_is_rejected() {
    let backend = FakeBackend::default();
    let (script, _feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.reconnect_to_job("j1", "chat-1").await })
    };
    assert!(eventually(|| coordinator.is_busy("chat-1")).await);

    let err = coordinator.reconnect_to_job("j1", "chat-1").await.unwrap_err();
    assert!(matches!(err, SessionError::JobActive(_)));
    assert_eq!(coordinator.active_jobs().len(), 1);

    coordinator.cancel_stream("chat-1");
    assert_eq!(task.await.unwrap().unwrap(), StreamOutcome::Cancelled);
}

#[tokio::test]
async fn empty_conversation_id_is_invalid() {
    let coordinator = coordinator(&FakeBackend::default());
    let err = coordinator.initialize_conversation("").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidConversation));
}
