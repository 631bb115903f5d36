use crate::core::api::{JobStatus, MessageStatus};
use crate::core::sse::StreamEvent;

use super::state::ChatMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum FrameEffect {
    /// The message changed.
    Applied,
    JobStarted(String),
    /// Backend-reported failure; the stream stops here.
    Failed(String),
    /// A reconnect snapshot reported the job as finished.
    Finished(JobStatus),
    Ignored,
}

/// Apply one stream event to its target message. Token events append, they
/// never replace.
pub fn apply_event(msg: &mut ChatMessage, event: &StreamEvent) -> FrameEffect {
    match event {
        StreamEvent::JobStarted { job_id } => {
            msg.job_id = Some(job_id.clone());
            FrameEffect::JobStarted(job_id.clone())
        }
        StreamEvent::MatchedSpaces(spaces) => {
            msg.matched_spaces = spaces.clone();
            FrameEffect::Applied
        }
        StreamEvent::Sources(sources) => {
            msg.sources = sources.clone();
            msg.sources_collapsed = !sources.is_empty();
            FrameEffect::Applied
        }
        StreamEvent::Thinking(token) if !token.is_empty() => {
            msg.thinking.push_str(token);
            msg.has_thinking = true;
            FrameEffect::Applied
        }
        StreamEvent::ThinkingEnd => {
            msg.thinking_collapsed = true;
            FrameEffect::Applied
        }
        StreamEvent::Response(token) if !token.is_empty() => {
            msg.content.push_str(token);
            FrameEffect::Applied
        }
        StreamEvent::Snapshot {
            content,
            thinking,
            status,
        } => {
            if let Some(content) = content {
                msg.content = content.clone();
            }
            if let Some(thinking) = thinking {
                msg.thinking = thinking.clone();
                msg.has_thinking = !thinking.is_empty();
            }
            match status {
                Some(JobStatus::Error) => {
                    let reason = "Generation failed".to_string();
                    msg.status = MessageStatus::Error;
                    msg.error = Some(reason.clone());
                    FrameEffect::Failed(reason)
                }
                Some(status) if status.is_terminal() => FrameEffect::Finished(*status),
                _ => FrameEffect::Applied,
            }
        }
        StreamEvent::Error(message) => {
            msg.status = MessageStatus::Error;
            msg.error = Some(message.clone());
            FrameEffect::Failed(message.clone())
        }
        StreamEvent::Thinking(_)
        | StreamEvent::Response(_)
        | StreamEvent::Done
        | StreamEvent::Other(_) => FrameEffect::Ignored,
    }
}
