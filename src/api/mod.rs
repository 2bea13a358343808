pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use http::HttpBackend;

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// No further transition is expected once a document reaches this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "Uploading",
            DocumentStatus::Processing => "Processing",
            DocumentStatus::Completed => "Completed",
            DocumentStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingStatus {
    pub status: DocumentStatus,
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub file_size: u64,
    pub file_type: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    pub upload_time: String,
    #[serde(default)]
    pub process_time: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress: Option<u8>,
}

impl DocumentSummary {
    /// Upload time as UTC. The backend emits naive ISO timestamps, which are taken as UTC.
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.upload_time)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentList {
    pub documents: Vec<DocumentSummary>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingInfo {
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkPreview {
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub content: String,
    pub chunk_index: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentDetail {
    pub document: DocumentSummary,
    pub processing: ProcessingInfo,
    #[serde(default)]
    pub chunks: Vec<ChunkPreview>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub top_k: usize,
    pub similarity_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryHit {
    pub content: String,
    pub document_name: String,
    pub similarity: f32,
    pub chunk_index: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryResponse {
    pub query: String,
    pub total_results: usize,
    pub processing_time: f64,
    pub results: Vec<QueryHit>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatsDocument {
    pub id: String,
    pub name: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunk_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RagStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub vector_dimension: usize,
    #[serde(default)]
    pub documents: Vec<StatsDocument>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub active_conversations: usize,
    #[serde(default)]
    pub available_agents: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
}

/// Contents of a file picked for upload.
#[derive(Debug, Clone)]
pub enum FileBody {
    Bytes(Vec<u8>),
    /// Streamed from disk when the request is sent.
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub size: u64,
    pub body: FileBody,
}

impl UploadFile {
    /// Reads only the metadata; the contents stay on disk until upload.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self {
            filename,
            size: meta.len(),
            body: FileBody::Path(path),
        })
    }
}

/// Every endpoint of the assistant backend the controllers depend on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, ApiError>;
    async fn status(&self, document_id: &str) -> Result<ProcessingStatus, ApiError>;
    async fn documents(&self) -> Result<Vec<DocumentSummary>, ApiError>;
    async fn document(&self, document_id: &str) -> Result<DocumentDetail, ApiError>;
    async fn delete_document(&self, document_id: &str) -> Result<(), ApiError>;
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError>;
    async fn stats(&self) -> Result<RagStats, ApiError>;
    async fn health(&self) -> Result<HealthStatus, ApiError>;
    async fn open_chat(&self, request: &ChatRequest) -> Result<ByteStream, ApiError>;
    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
