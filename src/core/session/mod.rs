//! Conversation stream coordinator.
//!
//! Owns the cached conversation list, per-conversation message state, the
//! ActiveJobRegistry and the cancellation handles of open streams. Front ends
//! drive it through the operations below and render [`ViewState`], which only
//! ever reflects the focused conversation.

mod conversations;
pub mod error;
pub mod focus;
pub mod frames;
pub mod models;
mod queue;
pub mod registry;
pub mod state;
mod stream;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::api::{ChatBackend, Conversation, ModelInfo, QueueSnapshot};

pub use error::{SessionError, SessionResult};
pub use focus::FocusCell;
pub use models::ModelCatalog;
pub use registry::{ActiveJobRegistry, StreamHandles};
pub use state::{ChatMessage, ConversationState, StreamPhase, ViewState};

pub const DEFAULT_TITLE: &str = "New Chat";
const AUTO_TITLE_MAX_CHARS: usize = 50;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalOptions {
    /// Knowledge spaces to search. Empty lets the backend route automatically.
    pub space_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOptions {
    pub thinking: bool,
    pub retrieval: Option<RetrievalOptions>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Backend error frame, or a reconnect snapshot reporting failure.
    Failed(String),
    /// The stream ended without output and without an error frame.
    NoResponse,
    /// Network failure or non-2xx status.
    Disconnected(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    ConversationsChanged,
    ConversationUpdated {
        conversation_id: String,
    },
    Error {
        conversation_id: String,
        message: String,
    },
    /// A send failed before producing output; the text belongs back in the input.
    InputRestored {
        conversation_id: String,
        text: String,
    },
    StreamFinished {
        conversation_id: String,
        outcome: StreamOutcome,
    },
    ModelsRefreshed,
    ModelOverrideReset,
    QueueChanged(Option<QueueSnapshot>),
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub poll_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct SessionStore {
    conversations: Vec<Conversation>,
    states: HashMap<String, ConversationState>,
}

pub struct Coordinator {
    backend: Arc<dyn ChatBackend>,
    settings: CoordinatorSettings,
    store: Mutex<SessionStore>,
    registry: Mutex<ActiveJobRegistry>,
    streams: StreamHandles,
    focus: FocusCell,
    models: Mutex<ModelCatalog>,
    view_tx: watch::Sender<ViewState>,
    queue_tx: watch::Sender<Option<QueueSnapshot>>,
    events: broadcast::Sender<CoordinatorEvent>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: CoordinatorSettings) -> Arc<Self> {
        let (view_tx, _) = watch::channel(ViewState::default());
        let (queue_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            backend,
            settings,
            store: Mutex::new(SessionStore::default()),
            registry: Mutex::new(ActiveJobRegistry::default()),
            streams: StreamHandles::default(),
            focus: FocusCell::new(),
            models: Mutex::new(ModelCatalog::default()),
            view_tx,
            queue_tx,
            events,
            shutdown: CancellationToken::new(),
        })
    }

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, ActiveJobRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn catalog(&self) -> MutexGuard<'_, ModelCatalog> {
        self.models.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn with_state<R>(&self, conversation_id: &str, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        let mut store = self.store();
        let state = store
            .states
            .entry(conversation_id.to_string())
            .or_default();
        f(state)
    }

    /// Announce a state change. The view is only rewritten when the
    /// conversation is focused at this moment.
    fn publish(&self, conversation_id: &str) {
        if self.focus.is_focused(conversation_id) {
            let view = {
                let store = self.store();
                match store.states.get(conversation_id) {
                    Some(state) => ViewState::of(conversation_id, state),
                    None => ViewState {
                        conversation_id: Some(conversation_id.to_string()),
                        ..ViewState::default()
                    },
                }
            };
            self.view_tx.send_replace(view);
        }
        self.emit(CoordinatorEvent::ConversationUpdated {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn surface_error(&self, conversation_id: &str, message: String) {
        debug!("Conversation [{}] error: {}", conversation_id, message);
        self.with_state(conversation_id, |s| s.error = Some(message.clone()));
        self.emit(CoordinatorEvent::Error {
            conversation_id: conversation_id.to_string(),
            message,
        });
        self.publish(conversation_id);
    }

    /// Move focus. Takes effect for every stream handler from its next event on.
    pub fn focus(&self, conversation_id: Option<&str>) {
        self.focus.set(conversation_id);
        match conversation_id {
            Some(id) => self.publish(id),
            None => {
                self.view_tx.send_replace(ViewState::default());
            }
        }
    }

    pub fn focused(&self) -> Option<String> {
        self.focus.current()
    }

    pub fn view(&self) -> ViewState {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store().conversations.clone()
    }

    pub fn conversation_state(&self, conversation_id: &str) -> Option<ConversationState> {
        self.store().states.get(conversation_id).cloned()
    }

    pub fn active_jobs(&self) -> ActiveJobRegistry {
        self.registry().clone()
    }

    /// True while a job is tracked or a stream is open for the conversation.
    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.registry().contains(conversation_id) || self.streams.is_open(conversation_id)
    }

    pub fn queue(&self) -> Option<QueueSnapshot> {
        self.queue_tx.borrow().clone()
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.catalog().models.clone()
    }

    pub fn model_override(&self) -> Option<String> {
        self.catalog().override_model.clone()
    }

    pub fn set_model_override(&self, model_id: Option<String>) {
        info!("Model override set to {:?}", model_id);
        self.catalog().override_model = model_id;
    }

    pub async fn refresh_models(&self) -> SessionResult<Vec<ModelInfo>> {
        let models = self.backend.list_models().await?;
        let dropped = self.catalog().replace(models.clone());
        self.emit(CoordinatorEvent::ModelsRefreshed);
        if dropped {
            self.emit(CoordinatorEvent::ModelOverrideReset);
        }
        Ok(models)
    }

    /// Corrective step after the backend reports the selected model gone.
    async fn recover_from_missing_model(&self) {
        let had_override = self.catalog().override_model.take().is_some();
        if had_override {
            info!("Selected model unavailable, reverting to default model");
            self.emit(CoordinatorEvent::ModelOverrideReset);
        }
        if let Err(e) = self.refresh_models().await {
            debug!("Model list refresh failed: {}", e);
        }
    }

    /// Leave the feature: abort every open stream and stop polling.
    pub fn shutdown(&self) {
        let cancelled = self.streams.cancel_all();
        self.shutdown.cancel();
        info!("Coordinator shut down ({} streams cancelled)", cancelled);
    }
}

#[cfg(test)]
mod tests;
