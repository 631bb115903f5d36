mod commands;
mod events;
mod ui;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::api::QueueSnapshot;
use crate::core::session::{
    Coordinator, CoordinatorEvent, GenerationOptions, RetrievalOptions, SessionError,
};

struct CommandInfo {
    name: &'static str,
    description: &'static str,
}

const COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "/help",
        description: "Show all available commands",
    },
    CommandInfo {
        name: "/chats",
        description: "List conversations",
    },
    CommandInfo {
        name: "/new",
        description: "Start a conversation (/new [title])",
    },
    CommandInfo {
        name: "/switch",
        description: "Focus a conversation (/switch <n|id>)",
    },
    CommandInfo {
        name: "/rename",
        description: "Rename this conversation",
    },
    CommandInfo {
        name: "/delete",
        description: "Delete this conversation",
    },
    CommandInfo {
        name: "/cancel",
        description: "Stop the response in progress",
    },
    CommandInfo {
        name: "/think",
        description: "Toggle thinking mode",
    },
    CommandInfo {
        name: "/rag",
        description: "Answer from documents (/rag [space..|off])",
    },
    CommandInfo {
        name: "/model",
        description: "Pick a model (/model [id|default])",
    },
    CommandInfo {
        name: "/quit",
        description: "Exit the TUI",
    },
    CommandInfo {
        name: "/exit",
        description: "Exit the TUI",
    },
];

/// Commands that take an argument get a trailing space on completion.
fn takes_argument(name: &str) -> bool {
    matches!(name, "/new" | "/switch" | "/rename" | "/rag" | "/model")
}

pub struct CliInterface {
    coordinator: Arc<Coordinator>,
    events_rx: broadcast::Receiver<CoordinatorEvent>,
    log_rx: Option<broadcast::Receiver<String>>,
    options: GenerationOptions,
    queue: Option<QueueSnapshot>,

    // TUI state
    input_buffer: String,
    /// Byte offset into `input_buffer`, always on a char boundary.
    cursor_pos: usize,
    scroll_offset: u16,
    spinner_tick: usize,
    should_quit: bool,

    // Autocomplete state
    autocomplete_visible: bool,
    autocomplete_selected: usize,
    autocomplete_candidates: Vec<usize>, // indices into COMMANDS

    // Command output panel
    cmd_output_lines: Vec<String>,
    cmd_output_visible: bool,
    activity_lines: Vec<String>,
}

impl CliInterface {
    pub fn new(
        coordinator: Arc<Coordinator>,
        log_rx: Option<broadcast::Receiver<String>>,
        default_thinking: bool,
    ) -> Self {
        let events_rx = coordinator.subscribe();
        Self {
            coordinator,
            events_rx,
            log_rx,
            options: GenerationOptions {
                thinking: default_thinking,
                ..GenerationOptions::default()
            },
            queue: None,
            input_buffer: String::new(),
            cursor_pos: 0,
            scroll_offset: 0,
            spinner_tick: 0,
            should_quit: false,
            autocomplete_visible: false,
            autocomplete_selected: 0,
            autocomplete_candidates: vec![],
            cmd_output_lines: vec![],
            cmd_output_visible: false,
            activity_lines: vec![],
        }
    }

    fn update_autocomplete(&mut self) {
        // Only while typing the command word itself
        if self.input_buffer.starts_with('/') && !self.input_buffer.contains(' ') {
            let prefix = &self.input_buffer;
            self.autocomplete_candidates = COMMANDS
                .iter()
                .enumerate()
                .filter(|(_, c)| c.name.starts_with(prefix))
                .map(|(i, _)| i)
                .collect();
            if !self.autocomplete_candidates.is_empty() {
                self.autocomplete_visible = true;
                if self.autocomplete_selected >= self.autocomplete_candidates.len() {
                    self.autocomplete_selected = self.autocomplete_candidates.len() - 1;
                }
            } else {
                self.autocomplete_visible = false;
                self.autocomplete_selected = 0;
            }
        } else {
            self.autocomplete_visible = false;
            self.autocomplete_selected = 0;
            self.autocomplete_candidates.clear();
        }
    }

    fn accept_autocomplete(&mut self) {
        if let Some(&cmd_idx) = self.autocomplete_candidates.get(self.autocomplete_selected) {
            let name = COMMANDS[cmd_idx].name;
            self.input_buffer = name.to_string();
            if takes_argument(name) {
                self.input_buffer.push(' ');
            }
            self.cursor_pos = self.input_buffer.len();
        }
        self.autocomplete_visible = false;
        self.autocomplete_candidates.clear();
    }

    fn push_cmd_output(&mut self, msg: String) {
        self.cmd_output_lines.push(msg);
        self.cmd_output_visible = true;
    }

    fn push_activity(&mut self, line: String) {
        const MAX_ACTIVITY: usize = 200;
        self.activity_lines.push(line);
        if self.activity_lines.len() > MAX_ACTIVITY {
            let excess = self.activity_lines.len() - MAX_ACTIVITY;
            self.activity_lines.drain(..excess);
        }
    }

    fn scroll_to_bottom(&mut self) {
        // Rendering clamps it
        self.scroll_offset = u16::MAX;
    }

    fn focused_title(&self) -> String {
        let focused = self.coordinator.focused();
        self.coordinator
            .conversations()
            .into_iter()
            .find(|c| Some(&c.id) == focused.as_ref())
            .map(|c| c.title)
            .unwrap_or_else(|| "no conversation".to_string())
    }

    /// Send in the background; the coordinator reports back through events
    /// and the view.
    fn submit_chat(&mut self, text: String) {
        let Some(conversation_id) = self.coordinator.focused() else {
            self.push_cmd_output("No conversation selected. Use /new.".to_string());
            return;
        };
        let coordinator = self.coordinator.clone();
        let options = self.options.clone();
        self.scroll_to_bottom();
        tokio::spawn(async move {
            match coordinator
                .send_message(Some(&conversation_id), &text, options)
                .await
            {
                Ok(outcome) => debug!("Send to [{}] ended: {:?}", conversation_id, outcome),
                Err(SessionError::Transport(e)) => {
                    debug!("Send to [{}] failed: {}", conversation_id, e)
                }
                Err(e) => warn!("Send to [{}] rejected: {}", conversation_id, e),
            }
        });
    }

    fn drain_events(&mut self) {
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.apply_event(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!("TUI skipped {} coordinator events", skipped);
                }
                Err(_) => break,
            }
        }
        if let Some(rx) = self.log_rx.as_mut() {
            let mut lines = Vec::new();
            loop {
                match rx.try_recv() {
                    Ok(line) => lines.push(line),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            for line in lines {
                self.push_activity(line);
            }
        }
    }

    fn apply_event(&mut self, event: CoordinatorEvent) {
        let focused = self.coordinator.focused();
        match event {
            CoordinatorEvent::InputRestored {
                conversation_id,
                text,
            } => {
                if focused.as_deref() == Some(conversation_id.as_str())
                    && self.input_buffer.is_empty()
                {
                    self.cursor_pos = text.len();
                    self.input_buffer = text;
                }
            }
            CoordinatorEvent::Error {
                conversation_id,
                message,
            } => {
                if focused.as_deref() != Some(conversation_id.as_str()) {
                    self.push_activity(format!("[{}] {}", conversation_id, message));
                }
            }
            CoordinatorEvent::ModelOverrideReset => {
                self.options.model = None;
                self.push_cmd_output("Selected model is unavailable, using the default.".to_string());
            }
            CoordinatorEvent::QueueChanged(snapshot) => self.queue = snapshot,
            CoordinatorEvent::ConversationUpdated { conversation_id } => {
                if focused.as_deref() == Some(conversation_id.as_str()) {
                    self.scroll_to_bottom();
                }
            }
            CoordinatorEvent::ConversationsChanged
            | CoordinatorEvent::StreamFinished { .. }
            | CoordinatorEvent::ModelsRefreshed => {}
        }
    }

    fn retrieval_label(&self) -> Option<String> {
        self.options.retrieval.as_ref().map(|r: &RetrievalOptions| {
            if r.space_ids.is_empty() {
                "rag:auto".to_string()
            } else {
                format!("rag:{}", r.space_ids.join(","))
            }
        })
    }
}
