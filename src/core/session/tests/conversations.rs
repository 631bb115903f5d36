use super::support::*;
use crate::core::api::{JobStatus, Role};
use crate::core::session::{
    CoordinatorEvent, DEFAULT_TITLE, GenerationOptions, SessionError, StreamOutcome,
};

#[tokio::test]
async fn bootstrap_creates_a_default_conversation_when_none_exist() {
    let backend = FakeBackend::default();
    let coordinator = coordinator(&backend);

    let (id, _) = coordinator.bootstrap().await.unwrap();

    assert_eq!(coordinator.focused().as_deref(), Some(id.as_str()));
    assert_eq!(coordinator.conversations().len(), 1);
    assert_eq!(coordinator.conversations()[0].title, DEFAULT_TITLE);
    assert!(backend.calls().contains(&format!("create_conversation:{}", DEFAULT_TITLE)));
    assert!(backend.calls().contains(&format!("list_messages:{}", id)));
}

#[tokio::test]
async fn bootstrap_focuses_the_most_recent_conversation() {
    let backend = FakeBackend::default().with_conversations(vec![
        conversation("old", "Old", "2024-01-01T00:00:00Z"),
        conversation("recent", "Recent", "2024-06-01T00:00:00Z"),
    ]);
    backend.set_messages("recent", vec![record(Role::User, "latest")]);
    let coordinator = coordinator(&backend);

    let (id, _) = coordinator.bootstrap().await.unwrap();

    assert_eq!(id, "recent");
    assert_eq!(coordinator.view().conversation_id.as_deref(), Some("recent"));
    assert_eq!(coordinator.view().messages.len(), 1);
    let ids: Vec<String> = coordinator.conversations().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, ["recent", "old"]);
}

#[tokio::test]
async fn bootstrap_hands_back_the_running_job_to_wait_for() {
    let backend = FakeBackend::default().with_conversations(vec![conversation(
        "recent",
        "Recent",
        "2024-06-01T00:00:00Z",
    )]);
    backend.set_jobs("recent", vec![active_job("j7", "recent", JobStatus::Streaming)]);
    backend.push_script(body(&[
        r#"{"type":"update","content":"earlier answer","status":"completed"}"#,
    ]));
    backend.push_script(body(&[
        r#"{"type":"response","token":"next"}"#,
        r#"{"type":"done"}"#,
    ]));
    let coordinator = coordinator(&backend);

    let (id, resumed) = coordinator.bootstrap().await.unwrap();
    assert_eq!(id, "recent");
    resumed.expect("reconnect task").await.unwrap();
    assert!(!coordinator.is_busy("recent"));

    let outcome = coordinator
        .send_message(Some("recent"), "follow up", GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, StreamOutcome::Completed);
}

#[tokio::test]
async fn create_uses_default_title_for_blank_input() {
    let backend = FakeBackend::default();
    let coordinator = coordinator(&backend);
    let mut events = coordinator.subscribe();

    let created = coordinator.create_conversation("   ").await.unwrap();

    assert_eq!(created.title, DEFAULT_TITLE);
    assert_eq!(coordinator.conversations()[0].id, created.id);
    assert!(drain(&mut events).contains(&CoordinatorEvent::ConversationsChanged));
}

#[tokio::test]
async fn rename_updates_locally_and_on_the_server() {
    let backend = FakeBackend::default().with_conversations(vec![conversation(
        "chat-1",
        "Draft",
        "2024-01-01T00:00:00Z",
    )]);
    let coordinator = coordinator(&backend);
    coordinator.load_conversations().await.unwrap();

    coordinator.rename_conversation("chat-1", "  Budget 2025 ").await.unwrap();

    assert_eq!(coordinator.conversations()[0].title, "Budget 2025");
    assert_eq!(backend.titles()[0].1, "Budget 2025");
}

#[tokio::test]
async fn failed_rename_reverts_to_server_titles() {
    let backend = FakeBackend::default().with_conversations(vec![conversation(
        "chat-1",
        "Draft",
        "2024-01-01T00:00:00Z",
    )]);
    backend.fail_rename();
    let coordinator = coordinator(&backend);
    coordinator.load_conversations().await.unwrap();
    let mut events = coordinator.subscribe();

    let err = coordinator
        .rename_conversation("chat-1", "Budget")
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(coordinator.conversations()[0].title, "Draft");
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, CoordinatorEvent::Error { conversation_id, .. } if conversation_id == "chat-1"))
    );
}

#[tokio::test]
async fn rename_rejects_unknown_and_blank() {
    let backend = FakeBackend::default();
    let coordinator = coordinator(&backend);

    let err = coordinator.rename_conversation("ghost", "Name").await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownConversation(_)));
    let err = coordinator.rename_conversation("ghost", " ").await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyInput));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn deleting_the_focused_conversation_moves_focus() {
    let backend = FakeBackend::default().with_conversations(vec![
        conversation("chat-1", "One", "2024-06-01T00:00:00Z"),
        conversation("chat-2", "Two", "2024-05-01T00:00:00Z"),
    ]);
    let coordinator = coordinator(&backend);
    coordinator.bootstrap().await.unwrap();
    assert_eq!(coordinator.focused().as_deref(), Some("chat-1"));

    coordinator.delete_conversation("chat-1").await.unwrap();

    assert_eq!(coordinator.focused().as_deref(), Some("chat-2"));
    assert!(coordinator.conversation_state("chat-1").is_none());
    assert_eq!(coordinator.conversations().len(), 1);
}

#[tokio::test]
async fn deleting_the_last_conversation_bootstraps_a_new_one() {
    let backend = FakeBackend::default().with_conversations(vec![conversation(
        "only",
        "Only",
        "2024-06-01T00:00:00Z",
    )]);
    let coordinator = coordinator(&backend);
    coordinator.bootstrap().await.unwrap();

    coordinator.delete_conversation("only").await.unwrap();

    let focused = coordinator.focused().unwrap();
    assert_ne!(focused, "only");
    assert_eq!(coordinator.conversations().len(), 1);
    assert_eq!(coordinator.conversations()[0].title, DEFAULT_TITLE);
}

#[tokio::test]
async fn deleting_a_streaming_conversation_cancels_it() {
    let backend = FakeBackend::default().with_conversations(vec![
        conversation("chat-1", "One", "2024-06-01T00:00:00Z"),
        conversation("chat-2", "Two", "2024-05-01T00:00:00Z"),
    ]);
    let (script, feed) = live();
    backend.push_script(script);
    let coordinator = coordinator(&backend);
    coordinator.load_conversations().await.unwrap();
    coordinator.focus(Some("chat-2"));

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .send_message(Some("chat-1"), "hello", GenerationOptions::default())
                .await
        })
    };
    feed.frame(r#"{"type":"job_started","job_id":"j1"}"#);
    assert!(eventually(|| coordinator.active_jobs().contains("chat-1")).await);

    coordinator.delete_conversation("chat-1").await.unwrap();
    task.await.unwrap().unwrap();

    assert!(coordinator.active_jobs().is_empty());
    assert!(!coordinator.is_busy("chat-1"));
    assert_eq!(coordinator.focused().as_deref(), Some("chat-2"));
}
