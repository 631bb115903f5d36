use uuid::Uuid;

use crate::core::api::{MatchedSpace, MessageRecord, MessageStatus, Role, Source};

/// Client-side copy of a message, including the display flags a front end
/// needs while the message is still streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Stable handle for locating a placeholder after the list was touched.
    pub local_id: Uuid,
    pub server_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub thinking: String,
    pub has_thinking: bool,
    pub thinking_collapsed: bool,
    pub sources: Vec<Source>,
    pub sources_collapsed: bool,
    pub matched_spaces: Vec<MatchedSpace>,
    pub status: MessageStatus,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content.to_string(), MessageStatus::Completed)
    }

    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    fn new(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            server_id: None,
            role,
            content,
            thinking: String::new(),
            has_thinking: false,
            thinking_collapsed: false,
            sources: Vec::new(),
            sources_collapsed: false,
            matched_spaces: Vec::new(),
            status,
            job_id: None,
            error: None,
        }
    }

    pub fn has_output(&self) -> bool {
        !self.content.is_empty() || !self.thinking.is_empty()
    }
}

impl From<MessageRecord> for ChatMessage {
    fn from(record: MessageRecord) -> Self {
        let thinking = record.thinking.unwrap_or_default();
        let has_thinking = !thinking.is_empty();
        let finished = record.status != MessageStatus::Streaming;
        let sources_collapsed = !record.sources.is_empty();
        Self {
            local_id: Uuid::new_v4(),
            server_id: record.id,
            role: record.role,
            content: record.content,
            thinking,
            has_thinking,
            thinking_collapsed: has_thinking && finished,
            sources: record.sources,
            sources_collapsed,
            matched_spaces: Vec::new(),
            status: record.status,
            job_id: record.job_id,
            error: None,
        }
    }
}

/// Per-conversation stream state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    AwaitingJob,
    Streaming,
    Completed,
    Errored,
}

impl StreamPhase {
    pub fn is_busy(self) -> bool {
        matches!(self, StreamPhase::AwaitingJob | StreamPhase::Streaming)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub phase: StreamPhase,
    /// Last conversation-scoped error shown to the user.
    pub error: Option<String>,
    pub loaded: bool,
}

impl ConversationState {
    pub fn find_local(&mut self, local_id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.local_id == local_id)
    }

    /// Target for a reconnect stream: the message carrying `job_id`, else the
    /// streaming assistant message that started before the id was known.
    pub fn find_job_target(&self, job_id: &str) -> Option<Uuid> {
        if let Some(msg) = self
            .messages
            .iter()
            .find(|m| m.job_id.as_deref() == Some(job_id))
        {
            return Some(msg.local_id);
        }
        self.messages
            .iter()
            .rev()
            .find(|m| {
                m.role == Role::Assistant
                    && m.status == MessageStatus::Streaming
                    && m.job_id.is_none()
            })
            .map(|m| m.local_id)
    }

    pub fn replace_messages(&mut self, records: Vec<MessageRecord>) {
        self.messages = records.into_iter().map(ChatMessage::from).collect();
        self.loaded = true;
    }
}

/// What a front end renders: the focused conversation only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub conversation_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub phase: StreamPhase,
    pub error: Option<String>,
}

impl ViewState {
    pub fn of(conversation_id: &str, state: &ConversationState) -> Self {
        Self {
            conversation_id: Some(conversation_id.to_string()),
            messages: state.messages.clone(),
            phase: state.phase,
            error: state.error.clone(),
        }
    }
}
