use crate::api::{DocumentStatus, DocumentSummary};
use crate::format::{Formatted, Highlighted};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    Success,
    Error,
}

/// A transient notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Display key of one progress item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProgressId(pub String);

impl ProgressId {
    pub fn generate() -> Self {
        ProgressId(format!("progress_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ProgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct QueryHitView {
    pub content: Highlighted,
    pub document_name: String,
    /// Similarity scaled to 0–100.
    pub similarity_percent: f32,
    pub chunk_index: u32,
}

#[derive(Debug, Clone)]
pub struct QueryView {
    pub query: String,
    pub total_results: usize,
    pub processing_time_secs: f64,
    pub hits: Vec<QueryHitView>,
}

/// Everything the upload controller draws or asks of the user.
pub trait UploadView: Send + Sync {
    fn notify(&self, notice: Notice);
    fn add_progress(&self, id: &ProgressId, filename: &str, status: DocumentStatus, progress: u8);
    fn update_progress(&self, id: &ProgressId, status: DocumentStatus, progress: u8, message: &str);
    fn remove_progress(&self, id: &ProgressId);
    /// Replaces the whole list. An empty slice renders the "no documents" placeholder.
    fn show_documents(&self, documents: &[DocumentSummary]);
    fn show_query_loading(&self);
    fn show_query_results(&self, results: &QueryView);
    fn show_query_error(&self, message: &str);
    fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub u64);

/// Everything the chat controller draws.
pub trait ChatView: Send + Sync {
    fn append_message(&self, sender: Sender, content: &Formatted) -> MessageId;
    /// Replaces the displayed content of an existing message.
    fn update_message(&self, id: MessageId, content: &Formatted);
    fn set_typing(&self, visible: bool);
    fn set_input_enabled(&self, enabled: bool);
    fn clear_input(&self);
    fn focus_input(&self);
    fn notify(&self, notice: Notice);
}
