use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::api::{
    ByteStream, ChatTurnMessage, ChatTurnRequest, MessageStatus, NewMessage, RetrievalRequest,
    Role, StreamRequest,
};
use crate::core::sse::{FrameReader, decode_frame};

use super::frames::{FrameEffect, apply_event};
use super::models::is_model_unavailable;
use super::registry::StreamLease;
use super::state::{ChatMessage, StreamPhase};
use super::{Coordinator, CoordinatorEvent, GenerationOptions, SessionError, SessionResult, StreamOutcome};

const NO_RESPONSE: &str = "No response received";

enum Origin<'a> {
    /// A turn this client sent; carries the text to restore on early failure.
    Send { text: &'a str },
    Reconnect,
}

impl Coordinator {
    /// Send a user turn to `conversation_id` and stream the answer into it.
    ///
    /// The target is fixed for the whole call: switching focus while the
    /// answer streams only changes whether the view is refreshed.
    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        options: GenerationOptions,
    ) -> SessionResult<StreamOutcome> {
        let conversation_id = conversation_id
            .filter(|id| !id.is_empty())
            .ok_or(SessionError::InvalidConversation)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.registry().contains(conversation_id) {
            return Err(SessionError::JobActive(conversation_id.to_string()));
        }
        let lease = self
            .streams
            .acquire(conversation_id)
            .ok_or_else(|| SessionError::JobActive(conversation_id.to_string()))?;

        self.with_state(conversation_id, |s| {
            s.phase = StreamPhase::AwaitingJob;
            s.error = None;
        });
        self.publish(conversation_id);

        let user_message = NewMessage {
            role: Role::User,
            content: text,
            thinking: None,
        };
        if let Err(e) = self.backend.persist_message(conversation_id, &user_message).await {
            warn!("Persisting message for [{}] failed: {}", conversation_id, e);
            self.with_state(conversation_id, |s| s.phase = StreamPhase::Idle);
            self.surface_error(conversation_id, format!("Failed to send message: {}", e));
            self.emit(CoordinatorEvent::InputRestored {
                conversation_id: conversation_id.to_string(),
                text: text.to_string(),
            });
            return Err(SessionError::Transport(e));
        }

        let (history, target) = self.with_state(conversation_id, |s| {
            s.messages.push(ChatMessage::user(text));
            let history: Vec<ChatTurnMessage> = s
                .messages
                .iter()
                .filter(|m| m.status != MessageStatus::Error && !m.content.is_empty())
                .map(|m| ChatTurnMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect();
            let placeholder = ChatMessage::assistant_placeholder();
            let target = placeholder.local_id;
            s.messages.push(placeholder);
            (history, target)
        });
        self.publish(conversation_id);
        self.auto_title(conversation_id, text).await;

        let request = self.build_request(conversation_id, text, history, &options);
        info!(
            "Sending {} turn for conversation [{}]",
            request.label(),
            conversation_id
        );
        let outcome = self.stream_into(&lease, &request, target).await;
        self.finish(&lease, target, &outcome, Origin::Send { text })
            .await;
        Ok(outcome)
    }

    /// Attach to a job that is already running and follow it to the end.
    pub async fn reconnect_to_job(
        &self,
        job_id: &str,
        conversation_id: &str,
    ) -> SessionResult<StreamOutcome> {
        let lease = self
            .streams
            .acquire(conversation_id)
            .ok_or_else(|| SessionError::JobActive(conversation_id.to_string()))?;

        self.registry().register(conversation_id, job_id);
        let target = self.with_state(conversation_id, |s| {
            s.phase = StreamPhase::Streaming;
            s.error = None;
            match s.find_job_target(job_id) {
                Some(local_id) => {
                    if let Some(msg) = s.find_local(local_id) {
                        msg.job_id = Some(job_id.to_string());
                        msg.status = MessageStatus::Streaming;
                    }
                    local_id
                }
                None => {
                    let mut placeholder = ChatMessage::assistant_placeholder();
                    placeholder.job_id = Some(job_id.to_string());
                    let local_id = placeholder.local_id;
                    s.messages.push(placeholder);
                    local_id
                }
            }
        });
        self.publish(conversation_id);
        info!(
            "Reconnecting to job [{}] of conversation [{}]",
            job_id, conversation_id
        );

        let request = StreamRequest::Reconnect {
            job_id: job_id.to_string(),
        };
        let outcome = self.stream_into(&lease, &request, target).await;
        self.finish(&lease, target, &outcome, Origin::Reconnect)
            .await;
        Ok(outcome)
    }

    /// Abort the open stream of one conversation. Returns false when none is open.
    pub fn cancel_stream(&self, conversation_id: &str) -> bool {
        let cancelled = self.streams.cancel(conversation_id);
        if cancelled {
            info!("Cancelling stream of conversation [{}]", conversation_id);
        }
        cancelled
    }

    fn build_request(
        &self,
        conversation_id: &str,
        text: &str,
        history: Vec<ChatTurnMessage>,
        options: &GenerationOptions,
    ) -> StreamRequest {
        match &options.retrieval {
            Some(retrieval) => StreamRequest::Retrieval(RetrievalRequest {
                query: text.to_string(),
                conversation_id: conversation_id.to_string(),
                space_ids: if retrieval.space_ids.is_empty() {
                    None
                } else {
                    Some(retrieval.space_ids.clone())
                },
                auto_routing: retrieval.space_ids.is_empty(),
            }),
            None => StreamRequest::Chat(ChatTurnRequest {
                messages: history,
                conversation_id: conversation_id.to_string(),
                stream: true,
                thinking: options.thinking,
                model: options.model.clone().or_else(|| self.model_override()),
            }),
        }
    }

    async fn stream_into(
        &self,
        lease: &StreamLease,
        request: &StreamRequest,
        target: Uuid,
    ) -> StreamOutcome {
        let token = lease.token();
        let opened = tokio::select! {
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            opened = self.backend.open_stream(request) => opened,
        };
        match opened {
            Ok(body) => {
                self.pump(lease.conversation_id(), token, body, target)
                    .await
            }
            Err(e) => StreamOutcome::Disconnected(e.to_string()),
        }
    }

    /// Read frames until a terminal frame, end of stream, failure or cancellation.
    async fn pump(
        &self,
        conversation_id: &str,
        token: &CancellationToken,
        body: ByteStream,
        target: Uuid,
    ) -> StreamOutcome {
        let mut reader = FrameReader::new(body);
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return StreamOutcome::Cancelled,
                next = reader.next_data() => next,
            };
            let data = match next {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => return StreamOutcome::Disconnected(e.to_string()),
            };
            let frame = match decode_frame(&data) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "Skipping malformed frame in conversation [{}]: {}",
                        conversation_id, e
                    );
                    continue;
                }
            };

            let effect = self.with_state(conversation_id, |s| {
                let effect = match s.find_local(target) {
                    Some(msg) => apply_event(msg, &frame.event),
                    None => FrameEffect::Ignored,
                };
                if s.phase == StreamPhase::AwaitingJob
                    && matches!(effect, FrameEffect::Applied | FrameEffect::JobStarted(_))
                {
                    s.phase = StreamPhase::Streaming;
                }
                effect
            });

            match effect {
                FrameEffect::JobStarted(job_id) => {
                    debug!("Job [{}] started for [{}]", job_id, conversation_id);
                    self.registry().register(conversation_id, &job_id);
                }
                FrameEffect::Failed(message) => {
                    self.publish(conversation_id);
                    return StreamOutcome::Failed(message);
                }
                FrameEffect::Finished(_) => {
                    self.publish(conversation_id);
                    return self.settle_output(conversation_id, target);
                }
                FrameEffect::Applied | FrameEffect::Ignored => {}
            }
            self.publish(conversation_id);

            if frame.done {
                return self.settle_output(conversation_id, target);
            }
        }
        self.settle_output(conversation_id, target)
    }

    fn settle_output(&self, conversation_id: &str, target: Uuid) -> StreamOutcome {
        let has_output = self.with_state(conversation_id, |s| {
            s.find_local(target).is_some_and(|m| m.has_output())
        });
        if has_output {
            StreamOutcome::Completed
        } else {
            StreamOutcome::NoResponse
        }
    }

    /// Bring the conversation back to rest after its stream ended, whatever
    /// the reason. The registry entry is always released.
    async fn finish(
        &self,
        lease: &StreamLease,
        target: Uuid,
        outcome: &StreamOutcome,
        origin: Origin<'_>,
    ) {
        let conversation_id = lease.conversation_id();
        self.registry().remove(conversation_id);

        match outcome {
            StreamOutcome::Completed => {
                self.with_state(conversation_id, |s| {
                    if let Some(msg) = s.find_local(target) {
                        msg.status = MessageStatus::Completed;
                        if msg.has_thinking {
                            msg.thinking_collapsed = true;
                        }
                    }
                    s.phase = StreamPhase::Completed;
                });
                self.publish(conversation_id);
                self.reload_messages(conversation_id).await;
                self.with_state(conversation_id, |s| s.phase = StreamPhase::Idle);
            }
            StreamOutcome::Cancelled => {
                debug!("Stream of [{}] cancelled", conversation_id);
                self.with_state(conversation_id, |s| {
                    let empty = s.find_local(target).map(|m| !m.has_output());
                    match empty {
                        Some(true) => s.messages.retain(|m| m.local_id != target),
                        Some(false) => {
                            if let Some(msg) = s.find_local(target) {
                                msg.status = MessageStatus::Completed;
                            }
                        }
                        None => {}
                    }
                    s.phase = StreamPhase::Idle;
                });
            }
            StreamOutcome::Failed(message) => {
                if is_model_unavailable(message) {
                    self.recover_from_missing_model().await;
                }
                self.mark_failed(conversation_id, target, message.clone());
            }
            StreamOutcome::NoResponse => {
                self.mark_failed(conversation_id, target, NO_RESPONSE.to_string());
            }
            StreamOutcome::Disconnected(reason) => {
                warn!("Stream of [{}] failed: {}", conversation_id, reason);
                let had_output = self.with_state(conversation_id, |s| {
                    s.find_local(target).is_some_and(|m| m.has_output())
                });
                self.mark_failed(conversation_id, target, format!("Connection error: {}", reason));
                if let Origin::Send { text } = origin
                    && !had_output
                {
                    self.emit(CoordinatorEvent::InputRestored {
                        conversation_id: conversation_id.to_string(),
                        text: text.to_string(),
                    });
                }
            }
        }

        self.publish(conversation_id);
        self.emit(CoordinatorEvent::StreamFinished {
            conversation_id: conversation_id.to_string(),
            outcome: outcome.clone(),
        });
    }

    /// Partial output stays visible; the error is attached to the message and
    /// surfaced for this conversation only.
    fn mark_failed(&self, conversation_id: &str, target: Uuid, message: String) {
        self.with_state(conversation_id, |s| {
            if let Some(msg) = s.find_local(target) {
                msg.status = MessageStatus::Error;
                msg.error = Some(message.clone());
            }
            s.phase = StreamPhase::Errored;
        });
        self.surface_error(conversation_id, message);
    }

    /// Overwrite local state with the backend's copy. Failures keep the
    /// local overlay.
    pub(super) async fn reload_messages(&self, conversation_id: &str) -> bool {
        match self.backend.list_messages(conversation_id).await {
            Ok(records) => {
                self.with_state(conversation_id, |s| s.replace_messages(records));
                true
            }
            Err(e) => {
                warn!("Reloading messages of [{}] failed: {}", conversation_id, e);
                false
            }
        }
    }
}
