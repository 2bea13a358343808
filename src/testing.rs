//! In-memory backend and recording views for controller tests.

use crate::api::{
    ApiError, Backend, ByteStream, ChatRequest, DocumentDetail, DocumentStatus, DocumentSummary,
    HealthStatus, ProcessingInfo, ProcessingStatus, QueryRequest, QueryResponse, RagStats,
    UploadFile, UploadResponse,
};
use crate::format::Formatted;
use crate::view::{
    ChatView, MessageId, Notice, NoticeKind, ProgressId, QueryView, Sender, UploadView,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum StatusStep {
    Ok(DocumentStatus, u8),
    Fail,
}

impl StatusStep {
    pub fn ok(status: DocumentStatus, progress: u8) -> Self {
        StatusStep::Ok(status, progress)
    }
}

#[derive(Debug, Clone)]
pub enum ChatItem {
    Bytes(Vec<u8>),
    Fail,
}

impl ChatItem {
    pub fn line(text: &str) -> Self {
        ChatItem::Bytes(format!("{}\n", text).into_bytes())
    }
}

enum UploadScript {
    Accept,
    Fail,
    Reject(String),
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    uploads: VecDeque<UploadScript>,
    upload_calls: usize,
    statuses: HashMap<String, VecDeque<StatusStep>>,
    status_calls: HashMap<String, usize>,
    documents: Vec<DocumentSummary>,
    documents_calls: usize,
    delete_calls: usize,
    fail_deletes: bool,
    query_requests: Vec<QueryRequest>,
    query_response: Option<QueryResponse>,
    fail_queries: bool,
    chat_requests: Vec<ChatRequest>,
    chat_script: Vec<ChatItem>,
    chat_status: Option<u16>,
    cleared: Vec<String>,
}

/// Scriptable [`Backend`]; every call is recorded.
pub struct FakeBackend {
    state: Mutex<FakeState>,
    /// Delay before each streamed chat item, so a turn stays in flight across awaits.
    chunk_delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            chunk_delay: Duration::from_millis(10),
        })
    }

    pub fn fail_next_upload(&self) {
        self.state.lock().unwrap().uploads.push_back(UploadScript::Fail);
    }

    pub fn reject_next_upload(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .uploads
            .push_back(UploadScript::Reject(message.to_string()));
    }

    /// Steps are consumed in order; the last one repeats.
    pub fn script_status(&self, document_id: &str, steps: Vec<StatusStep>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(document_id.to_string(), steps.into());
    }

    pub fn set_documents(&self, documents: Vec<DocumentSummary>) {
        self.state.lock().unwrap().documents = documents;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    pub fn set_query_response(&self, response: QueryResponse) {
        self.state.lock().unwrap().query_response = Some(response);
    }

    pub fn fail_queries(&self) {
        self.state.lock().unwrap().fail_queries = true;
    }

    pub fn script_chat(&self, items: Vec<ChatItem>) {
        self.state.lock().unwrap().chat_script = items;
    }

    pub fn fail_chat_with_status(&self, status: u16) {
        self.state.lock().unwrap().chat_status = Some(status);
    }

    pub fn upload_calls(&self) -> usize {
        self.state.lock().unwrap().upload_calls
    }

    pub fn status_calls(&self, document_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_calls
            .get(document_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn documents_calls(&self) -> usize {
        self.state.lock().unwrap().documents_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().unwrap().delete_calls
    }

    pub fn query_requests(&self) -> Vec<QueryRequest> {
        self.state.lock().unwrap().query_requests.clone()
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.state.lock().unwrap().chat_requests.clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.state.lock().unwrap().cleared.clone()
    }
}

fn transport_error(what: &str) -> ApiError {
    ApiError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        format!("{} connection reset", what),
    ))
}

#[async_trait]
impl Backend for FakeBackend {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.upload_calls += 1;
        match state.uploads.pop_front().unwrap_or(UploadScript::Accept) {
            UploadScript::Accept => {
                state.next_id += 1;
                Ok(UploadResponse {
                    success: true,
                    document_id: format!("doc-{}", state.next_id),
                    message: Some("accepted".into()),
                    filename: Some(file.filename.clone()),
                })
            }
            UploadScript::Reject(message) => Ok(UploadResponse {
                success: false,
                document_id: String::new(),
                message: Some(message),
                filename: None,
            }),
            UploadScript::Fail => Err(transport_error("upload")),
        }
    }

    async fn status(&self, document_id: &str) -> Result<ProcessingStatus, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.status_calls.entry(document_id.to_string()).or_default() += 1;
        let steps = state.statuses.entry(document_id.to_string()).or_default();
        let step = if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        };
        match step {
            Some(StatusStep::Ok(status, progress)) => Ok(ProcessingStatus {
                status,
                progress,
                message: format!("{}%", progress),
                document_id: Some(document_id.to_string()),
                chunk_count: None,
            }),
            Some(StatusStep::Fail) => Err(transport_error("status")),
            None => Err(ApiError::Api {
                status: 404,
                message: "document not found".into(),
            }),
        }
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.documents_calls += 1;
        Ok(state.documents.clone())
    }

    async fn document(&self, document_id: &str) -> Result<DocumentDetail, ApiError> {
        let state = self.state.lock().unwrap();
        let document = state
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| ApiError::Api {
                status: 404,
                message: "document not found".into(),
            })?;
        Ok(DocumentDetail {
            document,
            processing: ProcessingInfo {
                progress: 100,
                message: String::new(),
            },
            chunks: Vec::new(),
        })
    }

    async fn delete_document(&self, _document_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        if state.fail_deletes {
            return Err(ApiError::Api {
                status: 500,
                message: "delete failed".into(),
            });
        }
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.query_requests.push(request.clone());
        if state.fail_queries {
            return Err(transport_error("query"));
        }
        Ok(state.query_response.clone().unwrap_or(QueryResponse {
            query: request.query.clone(),
            total_results: 0,
            processing_time: 0.0,
            results: Vec::new(),
        }))
    }

    async fn stats(&self) -> Result<RagStats, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(RagStats {
            total_documents: state.documents.len(),
            total_chunks: 0,
            vector_dimension: 384,
            documents: Vec::new(),
        })
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Ok(HealthStatus {
            status: "healthy".into(),
            message: String::new(),
            active_conversations: 0,
            available_agents: Vec::new(),
        })
    }

    async fn open_chat(&self, request: &ChatRequest) -> Result<ByteStream, ApiError> {
        let items = {
            let mut state = self.state.lock().unwrap();
            state.chat_requests.push(request.clone());
            if let Some(status) = state.chat_status {
                return Err(ApiError::Api {
                    status,
                    message: "chat unavailable".into(),
                });
            }
            state.chat_script.clone()
        };
        let delay = self.chunk_delay;
        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                match item {
                    ChatItem::Bytes(bytes) => Ok(bytes),
                    ChatItem::Fail => Err(transport_error("chat")),
                }
            })
            .boxed())
    }

    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.state
            .lock()
            .unwrap()
            .cleared
            .push(conversation_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Notice(Notice),
    Progress(DocumentStatus, u8),
    Removed(ProgressId),
    Documents(usize),
    QueryLoading,
    QueryResults(usize),
    QueryError(String),
    Appended(Sender),
    Updated(MessageId),
    Typing(bool),
    InputEnabled(bool),
    InputCleared,
    Focused,
}

#[derive(Default)]
struct Recorded {
    events: Vec<ViewEvent>,
    live_progress: HashMap<ProgressId, DocumentStatus>,
    removed_at: HashMap<ProgressId, Instant>,
    messages: Vec<(Sender, Formatted)>,
}

/// Implements both views and keeps everything it was asked to draw.
pub struct RecordingView {
    recorded: Mutex<Recorded>,
    confirm: AtomicBool,
}

impl RecordingView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recorded: Mutex::new(Recorded::default()),
            confirm: AtomicBool::new(true),
        })
    }

    pub fn set_confirm(&self, answer: bool) {
        self.confirm.store(answer, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ViewEvent> {
        self.recorded.lock().unwrap().events.clone()
    }

    pub fn error_notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::Notice(n) if n.kind == NoticeKind::Error => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn progress_items(&self) -> usize {
        self.recorded.lock().unwrap().live_progress.len()
    }

    pub fn removed_at(&self, id: &ProgressId) -> Option<Instant> {
        self.recorded.lock().unwrap().removed_at.get(id).copied()
    }

    pub fn messages(&self) -> Vec<(Sender, Formatted)> {
        self.recorded.lock().unwrap().messages.clone()
    }

    fn push(&self, event: ViewEvent) {
        self.recorded.lock().unwrap().events.push(event);
    }
}

impl UploadView for RecordingView {
    fn notify(&self, notice: Notice) {
        self.push(ViewEvent::Notice(notice));
    }

    fn add_progress(&self, id: &ProgressId, _filename: &str, status: DocumentStatus, progress: u8) {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.live_progress.insert(id.clone(), status);
        recorded.events.push(ViewEvent::Progress(status, progress));
    }

    fn update_progress(&self, id: &ProgressId, status: DocumentStatus, progress: u8, _message: &str) {
        let mut recorded = self.recorded.lock().unwrap();
        if let Some(current) = recorded.live_progress.get_mut(id) {
            *current = status;
        }
        recorded.events.push(ViewEvent::Progress(status, progress));
    }

    fn remove_progress(&self, id: &ProgressId) {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.live_progress.remove(id);
        recorded.removed_at.insert(id.clone(), Instant::now());
        recorded.events.push(ViewEvent::Removed(id.clone()));
    }

    fn show_documents(&self, documents: &[DocumentSummary]) {
        self.push(ViewEvent::Documents(documents.len()));
    }

    fn show_query_loading(&self) {
        self.push(ViewEvent::QueryLoading);
    }

    fn show_query_results(&self, results: &QueryView) {
        self.push(ViewEvent::QueryResults(results.hits.len()));
    }

    fn show_query_error(&self, message: &str) {
        self.push(ViewEvent::QueryError(message.to_string()));
    }

    fn confirm(&self, _prompt: &str) -> bool {
        self.confirm.load(Ordering::SeqCst)
    }
}

impl ChatView for RecordingView {
    fn append_message(&self, sender: Sender, content: &Formatted) -> MessageId {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.messages.push((sender, content.clone()));
        recorded.events.push(ViewEvent::Appended(sender));
        MessageId(recorded.messages.len() as u64 - 1)
    }

    fn update_message(&self, id: MessageId, content: &Formatted) {
        let mut recorded = self.recorded.lock().unwrap();
        if let Some(slot) = recorded.messages.get_mut(id.0 as usize) {
            slot.1 = content.clone();
        }
        recorded.events.push(ViewEvent::Updated(id));
    }

    fn set_typing(&self, visible: bool) {
        self.push(ViewEvent::Typing(visible));
    }

    fn set_input_enabled(&self, enabled: bool) {
        self.push(ViewEvent::InputEnabled(enabled));
    }

    fn clear_input(&self) {
        self.push(ViewEvent::InputCleared);
    }

    fn focus_input(&self) {
        self.push(ViewEvent::Focused);
    }

    fn notify(&self, notice: Notice) {
        self.push(ViewEvent::Notice(notice));
    }
}
