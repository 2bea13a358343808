use crate::api::{ApiError, Backend, ByteStream, ChatRequest};
use crate::format::format_message;
use crate::sse::{decode_line, Frame, SseDecoder};
use crate::view::{ChatView, MessageId, Notice, Sender};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

pub const WELCOME_MESSAGE: &str = "👋 Hi! I'm your AI assistant. I can help you with:

• **Weather** - ask about the weather in any city
• **Math** - solve calculations
• **Web search** - look things up online
• **General questions** - chat about anything!

What would you like to know today?";

pub const ERROR_REPLY: &str = "❌ Sorry, I ran into an error. Please try again.";
pub const SERVER_ERROR_FALLBACK: &str = "❌ The server failed to process the request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty input, or another turn was still active.
    Ignored,
    Completed(String),
    ServerError(String),
    /// The stream ended before a `done` frame; carries whatever had arrived.
    Incomplete(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Finished,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyEnd {
    Done,
    ServerError,
}

/// Accumulates one assistant reply from decoded frames, in arrival order.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    buffer: String,
    end: Option<ReplyEnd>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, frame: Frame) -> Applied {
        if self.end.is_some() {
            return Applied::Skipped;
        }
        match frame {
            Frame::Chunk(chunk) => {
                self.buffer.push_str(&chunk);
                Applied::Updated
            }
            Frame::Done { full_response } => {
                // the final payload is authoritative over what was accumulated
                if let Some(full) = full_response {
                    self.buffer = full;
                }
                self.end = Some(ReplyEnd::Done);
                Applied::Finished
            }
            Frame::Error(message) => {
                self.buffer = message.unwrap_or_else(|| SERVER_ERROR_FALLBACK.to_string());
                self.end = Some(ReplyEnd::ServerError);
                Applied::Finished
            }
            Frame::Malformed(reason) => {
                tracing::warn!("skipping malformed stream frame: {}", reason);
                Applied::Skipped
            }
            Frame::Ignored => Applied::Skipped,
        }
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    fn outcome(&self) -> TurnOutcome {
        match self.end {
            Some(ReplyEnd::Done) => TurnOutcome::Completed(self.buffer.clone()),
            Some(ReplyEnd::ServerError) => TurnOutcome::ServerError(self.buffer.clone()),
            None => TurnOutcome::Incomplete(self.buffer.clone()),
        }
    }
}

/// Conversation panel: one user turn at a time, reply rendered as it streams.
pub struct ChatController {
    backend: Arc<dyn Backend>,
    view: Arc<dyn ChatView>,
    conversation_id: String,
    state: Mutex<TurnState>,
}

/// Restores the interactive state however the turn ends, including the turn being dropped.
struct TurnGuard<'a> {
    controller: &'a ChatController,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let view = &self.controller.view;
        view.set_typing(false);
        self.controller.set_state(TurnState::Idle);
        view.set_input_enabled(true);
        view.focus_input();
    }
}

impl ChatController {
    pub fn new(backend: Arc<dyn Backend>, view: Arc<dyn ChatView>) -> Self {
        Self {
            backend,
            view,
            conversation_id: format!("conv_{}", uuid::Uuid::new_v4().simple()),
            state: Mutex::new(TurnState::Idle),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> TurnState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: TurnState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn greet(&self) {
        self.view
            .append_message(Sender::Assistant, &format_message(WELCOME_MESSAGE));
    }

    pub async fn send_message(&self, text: &str) -> TurnOutcome {
        let message = text.trim();
        if message.is_empty() {
            return TurnOutcome::Ignored;
        }
        {
            let mut state = self.state.lock().unwrap();
            if *state != TurnState::Idle {
                return TurnOutcome::Ignored;
            }
            *state = TurnState::Sending;
        }
        let _guard = TurnGuard { controller: self };

        let view = &self.view;
        view.append_message(Sender::User, &format_message(message));
        view.clear_input();
        view.set_input_enabled(false);
        view.set_typing(true);

        match self.run_turn(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("chat turn failed: {}", e);
                self.set_state(TurnState::Error);
                view.append_message(Sender::Assistant, &format_message(ERROR_REPLY));
                TurnOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_turn(&self, message: &str) -> Result<TurnOutcome, ApiError> {
        let request = ChatRequest {
            message: message.to_string(),
            conversation_id: self.conversation_id.clone(),
        };
        let stream = self.backend.open_chat(&request).await?;
        self.set_state(TurnState::Streaming);
        self.consume(stream).await
    }

    async fn consume(&self, mut stream: ByteStream) -> Result<TurnOutcome, ApiError> {
        let mut decoder = SseDecoder::new();
        let mut assembler = ReplyAssembler::new();
        let mut reply: Option<MessageId> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                if self.apply_line(&line, &mut assembler, &mut reply) {
                    return Ok(assembler.outcome());
                }
            }
        }
        if let Some(line) = decoder.finish() {
            if self.apply_line(&line, &mut assembler, &mut reply) {
                return Ok(assembler.outcome());
            }
        }

        if assembler.text().is_empty() {
            tracing::warn!(
                "reply stream for {} ended without any content",
                self.conversation_id
            );
            self.render(&mut reply, ERROR_REPLY);
        } else {
            tracing::warn!(
                "reply stream for {} ended without a done frame; keeping partial reply",
                self.conversation_id
            );
        }
        Ok(assembler.outcome())
    }

    /// Returns true once the turn has ended.
    fn apply_line(
        &self,
        line: &str,
        assembler: &mut ReplyAssembler,
        reply: &mut Option<MessageId>,
    ) -> bool {
        match assembler.apply(decode_line(line)) {
            Applied::Updated => {
                self.render(reply, assembler.text());
                false
            }
            Applied::Finished => {
                if reply.is_some() || !assembler.text().is_empty() {
                    self.render(reply, assembler.text());
                }
                true
            }
            Applied::Skipped => false,
        }
    }

    /// Creates the assistant message on first use, then replaces its content.
    fn render(&self, reply: &mut Option<MessageId>, text: &str) {
        let formatted = format_message(text);
        match reply {
            Some(id) => self.view.update_message(*id, &formatted),
            None => *reply = Some(self.view.append_message(Sender::Assistant, &formatted)),
        }
    }

    /// Drops the server-side history of this conversation.
    pub async fn clear_history(&self) -> Result<(), ApiError> {
        match self.backend.clear_conversation(&self.conversation_id).await {
            Ok(()) => {
                self.view.notify(Notice::success("Conversation cleared"));
                Ok(())
            }
            Err(e) => {
                self.view
                    .notify(Notice::error(format!("Failed to clear conversation: {}", e)));
                Err(e)
            }
        }
    }
}
