use crate::core::session::RetrievalOptions;

use super::{COMMANDS, CliInterface};

impl CliInterface {
    pub(super) async fn handle_command(&mut self, input: &str) {
        let input = input.trim();
        let (cmd, arg) = match input.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (input, ""),
        };
        self.cmd_output_lines.clear();

        match cmd {
            "/help" => {
                self.push_cmd_output("Commands:".to_string());
                for command in COMMANDS {
                    self.push_cmd_output(format!("  {:<10} {}", command.name, command.description));
                }
            }
            "/chats" => {
                if let Err(e) = self.coordinator.load_conversations().await {
                    self.push_cmd_output(format!("Could not load conversations: {}", e));
                    return;
                }
                self.list_conversations();
            }
            "/new" => match self.coordinator.create_conversation(arg).await {
                Ok(conversation) => {
                    self.switch_to(&conversation.id).await;
                    self.push_cmd_output(format!("Started '{}'", conversation.title));
                }
                Err(e) => self.push_cmd_output(format!("Could not create conversation: {}", e)),
            },
            "/switch" => {
                let conversations = self.coordinator.conversations();
                let target = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| conversations.get(i))
                    .or_else(|| conversations.iter().find(|c| c.id == arg));
                match target {
                    Some(conversation) => {
                        let (id, title) = (conversation.id.clone(), conversation.title.clone());
                        self.switch_to(&id).await;
                        self.push_cmd_output(format!("Switched to '{}'", title));
                    }
                    None => {
                        self.push_cmd_output(format!("No conversation '{}'.", arg));
                        self.list_conversations();
                    }
                }
            }
            "/rename" => {
                let Some(id) = self.coordinator.focused() else {
                    self.push_cmd_output("No conversation selected.".to_string());
                    return;
                };
                if arg.is_empty() {
                    self.push_cmd_output("Usage: /rename <title>".to_string());
                    return;
                }
                if let Err(e) = self.coordinator.rename_conversation(&id, arg).await {
                    self.push_cmd_output(format!("Rename failed: {}", e));
                }
            }
            "/delete" => {
                let Some(id) = self.coordinator.focused() else {
                    self.push_cmd_output("No conversation selected.".to_string());
                    return;
                };
                let title = self.focused_title();
                match self.coordinator.delete_conversation(&id).await {
                    Ok(()) => {
                        self.scroll_to_bottom();
                        self.push_cmd_output(format!("Deleted '{}'", title));
                    }
                    Err(e) => self.push_cmd_output(format!("Delete failed: {}", e)),
                }
            }
            "/cancel" => {
                let cancelled = self
                    .coordinator
                    .focused()
                    .is_some_and(|id| self.coordinator.cancel_stream(&id));
                if cancelled {
                    self.cmd_output_visible = false;
                } else {
                    self.push_cmd_output("Nothing is streaming here.".to_string());
                }
            }
            "/think" => {
                self.options.thinking = !self.options.thinking;
                self.push_cmd_output(format!(
                    "Thinking mode {}",
                    if self.options.thinking { "on" } else { "off" }
                ));
            }
            "/rag" => {
                if arg == "off" {
                    self.options.retrieval = None;
                    self.push_cmd_output("Document answers off".to_string());
                } else {
                    let space_ids: Vec<String> =
                        arg.split_whitespace().map(str::to_string).collect();
                    let label = if space_ids.is_empty() {
                        "automatic routing".to_string()
                    } else {
                        space_ids.join(", ")
                    };
                    self.options.retrieval = Some(RetrievalOptions { space_ids });
                    self.push_cmd_output(format!("Document answers on ({})", label));
                }
            }
            "/model" => self.handle_model(arg).await,
            "/quit" | "/exit" => {
                self.should_quit = true;
            }
            _ => {
                self.push_cmd_output(format!("Unknown command: {}. Type /help for a list.", cmd));
            }
        }
    }

    async fn switch_to(&mut self, conversation_id: &str) {
        self.coordinator.focus(Some(conversation_id));
        if let Err(e) = self
            .coordinator
            .initialize_conversation(conversation_id)
            .await
        {
            self.push_cmd_output(format!("Could not load messages: {}", e));
        }
        self.scroll_to_bottom();
    }

    fn list_conversations(&mut self) {
        let focused = self.coordinator.focused();
        let conversations = self.coordinator.conversations();
        if conversations.is_empty() {
            self.push_cmd_output("  (No conversations)".to_string());
            return;
        }
        self.push_cmd_output("Conversations (use /switch <n>):".to_string());
        for (i, conversation) in conversations.iter().enumerate() {
            let marker = if focused.as_deref() == Some(conversation.id.as_str()) {
                " ◀"
            } else {
                ""
            };
            let busy = if self.coordinator.is_busy(&conversation.id) {
                " (streaming)"
            } else {
                ""
            };
            self.push_cmd_output(format!(
                "  {:>2}. {}{}{}",
                i + 1,
                conversation.title,
                busy,
                marker
            ));
        }
    }

    async fn handle_model(&mut self, arg: &str) {
        if arg.is_empty() {
            match self.coordinator.refresh_models().await {
                Ok(models) => {
                    let current = self.coordinator.model_override();
                    self.push_cmd_output(format!(
                        "Models (current: {}):",
                        current.as_deref().unwrap_or("default")
                    ));
                    for model in models {
                        self.push_cmd_output(format!("  {} {}", model.id, model.name));
                    }
                }
                Err(e) => self.push_cmd_output(format!("Could not list models: {}", e)),
            }
            return;
        }
        if arg == "default" {
            self.coordinator.set_model_override(None);
            self.options.model = None;
            self.push_cmd_output("Using the default model".to_string());
            return;
        }
        if self.coordinator.models().is_empty()
            && let Err(e) = self.coordinator.refresh_models().await
        {
            self.push_cmd_output(format!("Could not list models: {}", e));
            return;
        }
        if self.coordinator.models().iter().any(|m| m.id == arg) {
            self.coordinator.set_model_override(Some(arg.to_string()));
            self.push_cmd_output(format!("Using model '{}'", arg));
        } else {
            self.push_cmd_output(format!("Unknown model '{}'. /model lists them.", arg));
        }
    }
}
