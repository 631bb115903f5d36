use std::io::Write;

use anyhow::{Result, anyhow};
use console::style;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::api::Role;
use crate::core::config::ClientConfig;
use crate::core::session::{
    ChatMessage, CoordinatorEvent, GenerationOptions, RetrievalOptions, StreamOutcome,
};
use crate::core::terminal::{print_info, print_queue, print_warn};

use super::{RunCommandArgs, connect};

/// Writes the growing assistant answer to stdout as it streams.
#[derive(Default)]
struct AnswerPrinter {
    printed: String,
}

impl AnswerPrinter {
    /// The unseen tail of `content`, or nothing when `content` no longer
    /// extends what was already printed (a snapshot rewrote it).
    fn delta<'a>(&self, content: &'a str) -> Option<&'a str> {
        content
            .strip_prefix(self.printed.as_str())
            .filter(|rest| !rest.is_empty())
    }

    fn update(&mut self, content: &str) {
        if let Some(rest) = self.delta(content) {
            print!("{}", rest);
            let _ = std::io::stdout().flush();
            self.printed.push_str(rest);
        }
    }
}

/// The newest assistant message after the first `baseline` messages.
fn last_answer(messages: &[ChatMessage], baseline: usize) -> Option<&ChatMessage> {
    messages
        .get(baseline..)?
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
}

/// Let a job that was already running in the conversation finish first.
async fn wait_for_resumed(resumed: Option<JoinHandle<()>>) {
    if let Some(resumed) = resumed {
        print_info("A response is already running in this conversation, waiting for it.");
        if let Err(e) = resumed.await {
            debug!("Resumed stream task ended abnormally: {}", e);
        }
    }
}

pub async fn run_prompt(config: &ClientConfig, args: &RunCommandArgs) -> Result<()> {
    let coordinator = connect(config)?;
    if let Some(model) = &args.model {
        coordinator.set_model_override(Some(model.clone()));
    }

    let conversation_id = if args.new_chat {
        let conversation = coordinator.create_conversation("").await?;
        coordinator.focus(Some(&conversation.id));
        coordinator.initialize_conversation(&conversation.id).await?;
        conversation.id
    } else if let Some(id) = &args.chat {
        coordinator.load_conversations().await?;
        coordinator.focus(Some(id));
        wait_for_resumed(coordinator.initialize_conversation(id).await?).await;
        id.clone()
    } else {
        let (id, resumed) = coordinator.bootstrap().await?;
        wait_for_resumed(resumed).await;
        id
    };
    info!("Sending to [{}]", conversation_id);

    let options = GenerationOptions {
        thinking: args.thinking || config.default_thinking,
        retrieval: args.rag.clone().map(|space_ids| RetrievalOptions { space_ids }),
        model: None,
    };

    // Earlier answers in the conversation are not part of this run.
    let baseline = coordinator.view().messages.len();
    let monitor = coordinator.spawn_queue_monitor();
    let mut view_rx = coordinator.subscribe_view();
    let mut events = coordinator.subscribe();
    let mut printer = AnswerPrinter::default();

    let send = coordinator.send_message(Some(&conversation_id), &args.prompt, options);
    tokio::pin!(send);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Ok(()) = view_rx.changed() => {
                let view = view_rx.borrow_and_update().clone();
                if let Some(answer) = last_answer(&view.messages, baseline) {
                    printer.update(&answer.content);
                }
            }
            event = events.recv() => match event {
                Ok(CoordinatorEvent::QueueChanged(Some(snapshot))) if snapshot.pending_count > 0 => {
                    let position = coordinator
                        .active_jobs()
                        .get(&conversation_id)
                        .and_then(|job| snapshot.position_of(job));
                    print_queue(snapshot.pending_count, position);
                }
                Ok(CoordinatorEvent::ModelOverrideReset) => {
                    print_warn("The selected model is unavailable, switched back to the default.");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} coordinator events", skipped);
                }
                _ => {}
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                coordinator.cancel_stream(&conversation_id);
            }
        }
    };

    // The final reload may carry text the stream never showed.
    if let Some(state) = coordinator.conversation_state(&conversation_id)
        && let Some(answer) = last_answer(&state.messages, baseline)
    {
        printer.update(&answer.content);
        if !printer.printed.is_empty() {
            println!();
        }
        for (i, source) in answer.sources.iter().enumerate() {
            let url = source.url.as_deref().unwrap_or("");
            println!("  [{}] {} {}", i + 1, source.title, style(url).dim());
        }
    }

    coordinator.shutdown();
    let _ = monitor.await;

    match result? {
        StreamOutcome::Completed => Ok(()),
        StreamOutcome::Cancelled => {
            print_warn("Cancelled.");
            Ok(())
        }
        StreamOutcome::Failed(message) => Err(anyhow!("Generation failed: {}", message)),
        StreamOutcome::NoResponse => Err(anyhow!("The model returned no response")),
        StreamOutcome::Disconnected(reason) => Err(anyhow!("Connection error: {}", reason)),
    }
}
