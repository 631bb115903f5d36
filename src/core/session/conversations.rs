use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::api::{Conversation, Role};

use super::state::StreamPhase;
use super::{
    AUTO_TITLE_MAX_CHARS, Coordinator, CoordinatorEvent, DEFAULT_TITLE, SessionError,
    SessionResult,
};

fn sort_by_recency(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Title derived from the first user message.
pub(super) fn auto_title_from(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    line.chars().take(AUTO_TITLE_MAX_CHARS).collect()
}

impl Coordinator {
    pub async fn load_conversations(&self) -> SessionResult<Vec<Conversation>> {
        let mut conversations = self.backend.list_conversations().await?;
        sort_by_recency(&mut conversations);
        debug!("Loaded {} conversations", conversations.len());
        self.store().conversations = conversations.clone();
        self.emit(CoordinatorEvent::ConversationsChanged);
        Ok(conversations)
    }

    /// Load the list, creating a default conversation when there is none, then
    /// focus and initialize the most recent one. Returns its id and the
    /// reconnect task when a job was still running for it.
    pub async fn bootstrap(self: &Arc<Self>) -> SessionResult<(String, Option<JoinHandle<()>>)> {
        let conversations = self.load_conversations().await?;
        let conversation_id = match conversations.first() {
            Some(conversation) => conversation.id.clone(),
            None => {
                info!("No conversations yet, creating \"{}\"", DEFAULT_TITLE);
                self.create_conversation(DEFAULT_TITLE).await?.id
            }
        };
        self.focus(Some(&conversation_id));
        let resumed = self.initialize_conversation(&conversation_id).await?;
        Ok((conversation_id, resumed))
    }

    pub async fn create_conversation(&self, title: &str) -> SessionResult<Conversation> {
        let title = match title.trim() {
            "" => DEFAULT_TITLE,
            t => t,
        };
        let conversation = self.backend.create_conversation(title).await?;
        info!("Created conversation [{}]", conversation.id);
        self.store().conversations.insert(0, conversation.clone());
        self.emit(CoordinatorEvent::ConversationsChanged);
        Ok(conversation)
    }

    /// Optimistic: the cached title changes first. A server failure reloads
    /// the list and surfaces the error.
    pub async fn rename_conversation(&self, conversation_id: &str, title: &str) -> SessionResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        let known = {
            let mut store = self.store();
            match store.conversations.iter_mut().find(|c| c.id == conversation_id) {
                Some(conversation) => {
                    conversation.title = title.to_string();
                    true
                }
                None => false,
            }
        };
        if !known {
            return Err(SessionError::UnknownConversation(conversation_id.to_string()));
        }
        self.emit(CoordinatorEvent::ConversationsChanged);

        if let Err(e) = self.backend.rename_conversation(conversation_id, title).await {
            warn!("Renaming [{}] failed: {}", conversation_id, e);
            if let Err(reload) = self.load_conversations().await {
                debug!("Reloading conversations failed: {}", reload);
            }
            self.surface_error(conversation_id, format!("Failed to rename conversation: {}", e));
            return Err(SessionError::Transport(e));
        }
        Ok(())
    }

    /// Remove a conversation with everything tracked for it. Focus moves to
    /// the most recent remaining conversation, or a fresh one.
    pub async fn delete_conversation(self: &Arc<Self>, conversation_id: &str) -> SessionResult<()> {
        self.cancel_stream(conversation_id);
        self.backend.delete_conversation(conversation_id).await?;
        info!("Deleted conversation [{}]", conversation_id);

        self.registry().remove(conversation_id);
        let next = {
            let mut store = self.store();
            store.states.remove(conversation_id);
            store.conversations.retain(|c| c.id != conversation_id);
            store.conversations.first().map(|c| c.id.clone())
        };
        self.emit(CoordinatorEvent::ConversationsChanged);

        if self.focus.is_focused(conversation_id) {
            match next {
                Some(id) => {
                    self.focus(Some(&id));
                    self.initialize_conversation(&id).await?;
                }
                None => {
                    self.bootstrap().await?;
                }
            }
        }
        Ok(())
    }

    /// Load persisted messages, then look for a job still running for this
    /// conversation and reconnect to it. The reconnect runs as its own task;
    /// its handle is returned.
    pub async fn initialize_conversation(
        self: &Arc<Self>,
        conversation_id: &str,
    ) -> SessionResult<Option<JoinHandle<()>>> {
        if conversation_id.is_empty() {
            return Err(SessionError::InvalidConversation);
        }
        if self.streams.is_open(conversation_id) {
            debug!(
                "Stream already open for [{}], keeping local state",
                conversation_id
            );
            self.publish(conversation_id);
            return Ok(None);
        }

        let records = match self.backend.list_messages(conversation_id).await {
            Ok(records) => records,
            Err(e) => {
                self.surface_error(conversation_id, format!("Failed to load messages: {}", e));
                return Err(SessionError::Transport(e));
            }
        };
        // A send may have opened a stream while the messages loaded. Its
        // placeholder must survive, so the check happens under the state lock.
        let replaced = self.with_state(conversation_id, |s| {
            if self.is_busy(conversation_id) {
                return false;
            }
            s.replace_messages(records);
            s.error = None;
            s.phase = StreamPhase::Idle;
            true
        });
        self.publish(conversation_id);
        if !replaced {
            debug!(
                "Stream opened for [{}] while loading, keeping local state",
                conversation_id
            );
            return Ok(None);
        }

        let jobs = match self.backend.list_jobs(conversation_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Listing jobs of [{}] failed: {}", conversation_id, e);
                return Ok(None);
            }
        };
        let Some(job) = jobs.into_iter().find(|job| job.status.is_active()) else {
            return Ok(None);
        };

        info!(
            "Found {} job [{}] for conversation [{}]",
            job.status.as_str(),
            job.id,
            conversation_id
        );
        self.registry().register(conversation_id, &job.id);

        let coordinator = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = coordinator
                .reconnect_to_job(&job.id, &conversation_id)
                .await
            {
                debug!("Reconnect to [{}] skipped: {}", job.id, e);
            }
        });
        Ok(Some(handle))
    }

    /// Give a conversation still carrying the default title a name taken from
    /// its first user message. Best effort.
    pub(super) async fn auto_title(&self, conversation_id: &str, text: &str) {
        let first_user_message = self.with_state(conversation_id, |s| {
            s.messages.iter().filter(|m| m.role == Role::User).count() == 1
        });
        if !first_user_message {
            return;
        }
        let title = auto_title_from(text);
        if title.is_empty() {
            return;
        }
        let renamed = {
            let mut store = self.store();
            match store
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id && c.title == DEFAULT_TITLE)
            {
                Some(conversation) => {
                    conversation.title = title.clone();
                    true
                }
                None => false,
            }
        };
        if !renamed {
            return;
        }
        self.emit(CoordinatorEvent::ConversationsChanged);
        if let Err(e) = self.backend.rename_conversation(conversation_id, &title).await {
            debug!("Auto-title for [{}] failed: {}", conversation_id, e);
        }
    }
}
