use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    #[default]
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSpace {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Message as stored by the backend. Messages of an in-flight job carry the
/// content the backend has buffered so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage<'a> {
    pub role: Role,
    pub content: &'a str,
    pub thinking: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Streaming => "streaming",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" | "queued" => Some(JobStatus::Pending),
            "streaming" | "processing" | "running" => Some(JobStatus::Streaming),
            "completed" | "done" => Some(JobStatus::Completed),
            "error" | "failed" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default, alias = "conversationId")]
    pub conversation_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default, alias = "pendingCount")]
    pub pending_count: u32,
    #[serde(default, alias = "processingJobId")]
    pub processing_job_id: Option<String>,
    #[serde(default)]
    pub queue: Vec<QueueEntry>,
}

impl QueueSnapshot {
    pub fn position_of(&self, job_id: &str) -> Option<u32> {
        self.queue
            .iter()
            .find(|entry| entry.id == job_id)
            .map(|entry| entry.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnMessage {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /llm/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnRequest {
    pub messages: Vec<ChatTurnMessage>,
    pub conversation_id: String,
    pub stream: bool,
    pub thinking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Body of `POST /rag/query`.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_ids: Option<Vec<String>>,
    pub auto_routing: bool,
}

#[derive(Debug, Clone)]
pub enum StreamRequest {
    Chat(ChatTurnRequest),
    Retrieval(RetrievalRequest),
    Reconnect { job_id: String },
}

impl StreamRequest {
    pub fn label(&self) -> &'static str {
        match self {
            StreamRequest::Chat(_) => "chat",
            StreamRequest::Retrieval(_) => "retrieval",
            StreamRequest::Reconnect { .. } => "reconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_accepts_camel_case_timestamps() {
        let raw = r#"{"id":"c1","title":"Hi","createdAt":"2026-01-01","updatedAt":"2026-01-02"}"#;
        let convo: Conversation = serde_json::from_str(raw).unwrap();
        assert_eq!(convo.created_at, "2026-01-01");
        assert_eq!(convo.updated_at, "2026-01-02");
    }

    #[test]
    fn message_record_defaults_missing_fields() {
        let raw = r#"{"role":"assistant","content":"partial","status":"streaming","jobId":"j9"}"#;
        let msg: MessageRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.status, MessageStatus::Streaming);
        assert_eq!(msg.job_id.as_deref(), Some("j9"));
        assert!(msg.sources.is_empty());
        assert!(msg.thinking.is_none());
    }

    #[test]
    fn job_status_activity() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Streaming.is_active());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert_eq!(JobStatus::from_status("processing"), Some(JobStatus::Streaming));
        assert_eq!(JobStatus::from_status("bogus"), None);
    }

    #[test]
    fn chat_request_omits_absent_model() {
        let req = ChatTurnRequest {
            messages: vec![],
            conversation_id: "c1".to_string(),
            stream: true,
            thinking: false,
            model: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("model").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn queue_position_lookup() {
        let snap = QueueSnapshot {
            pending_count: 2,
            processing_job_id: Some("j0".to_string()),
            queue: vec![
                QueueEntry {
                    id: "j1".to_string(),
                    position: 1,
                },
                QueueEntry {
                    id: "j2".to_string(),
                    position: 2,
                },
            ],
        };
        assert_eq!(snap.position_of("j2"), Some(2));
        assert_eq!(snap.position_of("j0"), None);
    }
}
