use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::core::api::{
    ByteStream, ChatBackend, Conversation, Job, JobStatus, MessageRecord, MessageStatus,
    ModelInfo, NewMessage, QueueSnapshot, Role, StreamRequest,
};
use crate::core::session::{Coordinator, CoordinatorEvent, CoordinatorSettings};

/// What `open_stream` hands out next.
pub enum Script {
    /// The whole body at once. `stored` is what the backend keeps for the
    /// assistant turn, visible to the reload after completion.
    Body {
        chunks: Vec<String>,
        stored: Option<MessageRecord>,
    },
    /// Chunks fed by the test through a [`StreamFeed`].
    Live(mpsc::UnboundedReceiver<std::io::Result<Bytes>>),
    Refuse(String),
}

pub struct StreamFeed {
    tx: mpsc::UnboundedSender<std::io::Result<Bytes>>,
}

impl StreamFeed {
    pub fn frame(&self, json: &str) {
        let _ = self.tx.send(Ok(Bytes::from(format!("data: {}\n\n", json))));
    }

    pub fn raw(&self, text: &str) {
        let _ = self.tx.send(Ok(Bytes::from(text.to_string())));
    }

    pub fn bytes(&self, raw: &'static [u8]) {
        let _ = self.tx.send(Ok(Bytes::from_static(raw)));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .tx
            .send(Err(std::io::Error::other(reason.to_string())));
    }
}

pub fn live() -> (Script, StreamFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Script::Live(rx), StreamFeed { tx })
}

pub fn body(frames: &[&str]) -> Script {
    Script::Body {
        chunks: frames
            .iter()
            .map(|f| format!("data: {}\n\n", f))
            .collect(),
        stored: None,
    }
}

pub fn body_storing(frames: &[&str], stored: MessageRecord) -> Script {
    match body(frames) {
        Script::Body { chunks, .. } => Script::Body {
            chunks,
            stored: Some(stored),
        },
        other => other,
    }
}

pub fn record(role: Role, content: &str) -> MessageRecord {
    MessageRecord {
        id: None,
        role,
        content: content.to_string(),
        thinking: None,
        sources: Vec::new(),
        status: MessageStatus::Completed,
        job_id: None,
        created_at: None,
    }
}

pub fn conversation(id: &str, title: &str, updated_at: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        title: title.to_string(),
        created_at: updated_at.to_string(),
        updated_at: updated_at.to_string(),
    }
}

#[derive(Default)]
struct FakeState {
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<MessageRecord>>,
    jobs: HashMap<String, Vec<Job>>,
    scripts: VecDeque<Script>,
    requests: Vec<StreamRequest>,
    calls: Vec<String>,
    queue: QueueSnapshot,
    models: Vec<ModelInfo>,
    next_id: u32,
    messages_delay: Option<Duration>,
    fail_persist: bool,
    fail_rename: bool,
    fail_jobs: bool,
    fail_queue: bool,
}

/// In-memory backend recording every call it receives.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        self.state().conversations = conversations;
        self
    }

    pub fn set_messages(&self, conversation_id: &str, messages: Vec<MessageRecord>) {
        self.state()
            .messages
            .insert(conversation_id.to_string(), messages);
    }

    pub fn set_jobs(&self, conversation_id: &str, jobs: Vec<Job>) {
        self.state().jobs.insert(conversation_id.to_string(), jobs);
    }

    pub fn push_script(&self, script: Script) {
        self.state().scripts.push_back(script);
    }

    pub fn set_queue(&self, queue: QueueSnapshot) {
        self.state().queue = queue;
    }

    pub fn set_models(&self, ids: &[&str]) {
        self.state().models = ids
            .iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                name: id.to_string(),
            })
            .collect();
    }

    /// Every `list_messages` call waits this long before answering.
    pub fn delay_messages(&self, delay: Duration) {
        self.state().messages_delay = Some(delay);
    }

    pub fn fail_persist(&self) {
        self.state().fail_persist = true;
    }

    pub fn fail_rename(&self) {
        self.state().fail_rename = true;
    }

    pub fn fail_jobs(&self) {
        self.state().fail_jobs = true;
    }

    pub fn fail_queue(&self) {
        self.state().fail_queue = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.state().requests.clone()
    }

    pub fn stored_messages(&self, conversation_id: &str) -> Vec<MessageRecord> {
        self.state()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn titles(&self) -> Vec<(String, String)> {
        self.state()
            .conversations
            .iter()
            .map(|c| (c.id.clone(), c.title.clone()))
            .collect()
    }

    fn log(&self, call: String) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.log("list_conversations".to_string());
        Ok(self.state().conversations.clone())
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        self.log(format!("create_conversation:{}", title));
        let mut state = self.state();
        state.next_id += 1;
        let created = conversation(
            &format!("created-{}", state.next_id),
            title,
            "2030-01-01T00:00:00Z",
        );
        state.conversations.insert(0, created.clone());
        Ok(created)
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<()> {
        self.log(format!("rename_conversation:{}:{}", conversation_id, title));
        let mut state = self.state();
        if state.fail_rename {
            return Err(anyhow!("HTTP 500: rename refused"));
        }
        if let Some(c) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            c.title = title.to_string();
        }
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.log(format!("delete_conversation:{}", conversation_id));
        let mut state = self.state();
        state.conversations.retain(|c| c.id != conversation_id);
        state.messages.remove(conversation_id);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.log(format!("list_messages:{}", conversation_id));
        let delay = self.state().messages_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .state()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn persist_message(&self, conversation_id: &str, message: &NewMessage<'_>) -> Result<()> {
        self.log(format!("persist_message:{}", conversation_id));
        let mut state = self.state();
        if state.fail_persist {
            return Err(anyhow!("HTTP 503: backend unavailable"));
        }
        let mut stored = record(message.role, message.content);
        stored.thinking = message.thinking.map(str::to_string);
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(stored);
        Ok(())
    }

    async fn list_jobs(&self, conversation_id: &str) -> Result<Vec<Job>> {
        self.log(format!("list_jobs:{}", conversation_id));
        let state = self.state();
        if state.fail_jobs {
            return Err(anyhow!("HTTP 500: jobs unavailable"));
        }
        Ok(state.jobs.get(conversation_id).cloned().unwrap_or_default())
    }

    async fn queue_status(&self) -> Result<QueueSnapshot> {
        self.log("queue_status".to_string());
        let state = self.state();
        if state.fail_queue {
            return Err(anyhow!("HTTP 502: queue unavailable"));
        }
        Ok(state.queue.clone())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.log("list_models".to_string());
        Ok(self.state().models.clone())
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream> {
        self.log(format!("open_stream:{}", request.label()));
        let mut state = self.state();
        state.requests.push(request.clone());
        let conversation_id = match request {
            StreamRequest::Chat(body) => Some(body.conversation_id.clone()),
            StreamRequest::Retrieval(body) => Some(body.conversation_id.clone()),
            StreamRequest::Reconnect { .. } => None,
        };
        match state.scripts.pop_front() {
            Some(Script::Body { chunks, stored }) => {
                if let (Some(id), Some(stored)) = (conversation_id, stored) {
                    state.messages.entry(id).or_default().push(stored);
                }
                let items: Vec<std::io::Result<Bytes>> =
                    chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
                Ok(Box::pin(tokio_stream::iter(items)))
            }
            Some(Script::Live(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Script::Refuse(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no stream scripted")),
        }
    }
}

pub fn coordinator(backend: &FakeBackend) -> Arc<Coordinator> {
    Coordinator::new(
        Arc::new(backend.clone()),
        CoordinatorSettings {
            poll_interval: Duration::from_millis(20),
        },
    )
}

pub fn active_job(id: &str, conversation_id: &str, status: JobStatus) -> Job {
    Job {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        status,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn drain(rx: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
