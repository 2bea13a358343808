use crate::api::{
    ApiError, Backend, DocumentDetail, DocumentStatus, QueryRequest, RagStats, UploadFile,
};
use crate::format::highlight_query;
use crate::view::{Notice, ProgressId, QueryHitView, QueryView, UploadView};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md", "html"];
pub const QUERY_TOP_K: usize = 5;
pub const QUERY_SIMILARITY_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("File {filename} exceeds the 10MB size limit")]
    TooLarge { filename: String, size: u64 },
    #[error("Unsupported file type: {filename}")]
    UnsupportedType { filename: String },
}

/// Acceptance policy for uploads. Looks at the name and size only, never at the contents.
pub fn validate(file: &UploadFile) -> Result<(), Rejection> {
    if file.size > MAX_UPLOAD_BYTES {
        return Err(Rejection::TooLarge {
            filename: file.filename.clone(),
            size: file.size,
        });
    }
    let ext = file
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
        .to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Rejection::UnsupportedType {
            filename: file.filename.clone(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    /// How long a finished progress item stays visible.
    pub grace: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            grace: Duration::from_secs(3),
            max_backoff: Duration::from_secs(30),
            max_consecutive_failures: 10,
        }
    }
}

impl PollPolicy {
    /// Delay before the next status request after `failures` failed ones in a row.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures);
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff.max(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub progress_id: ProgressId,
    pub filename: String,
    pub document_id: String,
}

struct Tracked {
    record: UploadRecord,
    last_progress: u8,
    cancel: CancellationToken,
}

enum PollOutcome {
    Pending,
    Finished,
    Failed,
    Untracked,
}

struct Inner {
    backend: Arc<dyn Backend>,
    view: Arc<dyn UploadView>,
    policy: PollPolicy,
    tracked: Mutex<HashMap<String, Tracked>>,
    active: watch::Sender<usize>,
    root: CancellationToken,
}

/// Upload, processing-progress and query panel.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<Inner>,
}

impl UploadController {
    pub fn new(backend: Arc<dyn Backend>, view: Arc<dyn UploadView>, policy: PollPolicy) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                backend,
                view,
                policy,
                tracked: Mutex::new(HashMap::new()),
                active,
                root: CancellationToken::new(),
            }),
        }
    }

    /// Validates every file and submits the accepted ones one after another.
    pub async fn handle_files(&self, files: Vec<UploadFile>) -> Vec<UploadRecord> {
        let mut records = Vec::new();
        for file in files {
            if let Err(rejection) = validate(&file) {
                tracing::info!("rejected {}: {}", file.filename, rejection);
                self.inner.view.notify(Notice::error(rejection.to_string()));
                continue;
            }
            if let Ok(record) = self.submit(&file).await {
                records.push(record);
            }
        }
        records
    }

    pub async fn submit(&self, file: &UploadFile) -> Result<UploadRecord, ApiError> {
        let view = &self.inner.view;
        let progress_id = ProgressId::generate();
        view.add_progress(&progress_id, &file.filename, DocumentStatus::Uploading, 0);

        let result = self.inner.backend.upload(file).await.and_then(|resp| {
            if resp.success {
                Ok(resp)
            } else {
                Err(ApiError::Rejected(
                    resp.message.unwrap_or_else(|| "Upload failed".to_string()),
                ))
            }
        });

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("upload of {} failed: {}", file.filename, e);
                view.remove_progress(&progress_id);
                view.notify(Notice::error(format!(
                    "Failed to upload {}: {}",
                    file.filename, e
                )));
                return Err(e);
            }
        };

        view.update_progress(
            &progress_id,
            DocumentStatus::Processing,
            10,
            "File uploaded, processing...",
        );
        let record = UploadRecord {
            progress_id,
            filename: file.filename.clone(),
            document_id: resp.document_id,
        };
        tracing::info!(
            "uploaded {} as document {}",
            record.filename,
            record.document_id
        );
        self.track(record.clone());
        view.notify(Notice::success(format!("{} uploaded", file.filename)));
        Ok(record)
    }

    fn track(&self, record: UploadRecord) {
        let cancel = self.inner.root.child_token();
        let document_id = record.document_id.clone();
        {
            let mut tracked = self.inner.tracked.lock().unwrap();
            if let Some(previous) = tracked.insert(
                document_id.clone(),
                Tracked {
                    record,
                    last_progress: 10,
                    cancel: cancel.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
            self.inner.active.send_replace(tracked.len());
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.poll_loop(document_id, cancel).await });
    }

    /// One immediate status check of every tracked document, issued concurrently.
    pub async fn poll_all(&self) {
        let ids: Vec<String> = self.inner.tracked.lock().unwrap().keys().cloned().collect();
        join_all(ids.iter().map(|id| self.inner.check(id))).await;
    }

    pub fn tracked(&self) -> Vec<UploadRecord> {
        self.inner
            .tracked
            .lock()
            .unwrap()
            .values()
            .map(|t| t.record.clone())
            .collect()
    }

    /// Resolves once no document is being tracked.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    /// Stops tracking one document and drops its progress item.
    pub fn cancel(&self, document_id: &str) -> bool {
        match self.inner.untrack(document_id) {
            Some(tracked) => {
                self.inner.view.remove_progress(&tracked.record.progress_id);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        self.inner.root.cancel();
        let mut tracked = self.inner.tracked.lock().unwrap();
        tracked.clear();
        self.inner.active.send_replace(0);
    }

    pub async fn refresh_document_list(&self) -> Result<(), ApiError> {
        self.inner.refresh_document_list().await
    }

    pub async fn delete_document(&self, document_id: &str) -> bool {
        let view = &self.inner.view;
        if !view.confirm("Delete this document?") {
            return false;
        }
        match self.inner.backend.delete_document(document_id).await {
            Ok(()) => {
                tracing::info!("deleted document {}", document_id);
                view.notify(Notice::success("Document deleted"));
                let _ = self.refresh_document_list().await;
                true
            }
            Err(e) => {
                view.notify(Notice::error(format!("Failed to delete document: {}", e)));
                false
            }
        }
    }

    pub async fn query(&self, text: &str) -> Option<QueryView> {
        let view = &self.inner.view;
        let query = text.trim();
        if query.is_empty() {
            view.notify(Notice::error("Please enter a query"));
            return None;
        }

        view.show_query_loading();
        let request = QueryRequest {
            query: query.to_string(),
            top_k: QUERY_TOP_K,
            similarity_threshold: QUERY_SIMILARITY_THRESHOLD,
            document_ids: None,
        };
        match self.inner.backend.query(&request).await {
            Ok(resp) => {
                let hits = resp
                    .results
                    .iter()
                    .map(|hit| QueryHitView {
                        content: highlight_query(&hit.content, &resp.query),
                        document_name: hit.document_name.clone(),
                        similarity_percent: hit.similarity * 100.0,
                        chunk_index: hit.chunk_index,
                    })
                    .collect();
                let results = QueryView {
                    query: resp.query,
                    total_results: resp.total_results,
                    processing_time_secs: resp.processing_time,
                    hits,
                };
                view.show_query_results(&results);
                Some(results)
            }
            Err(e) => {
                tracing::warn!("query failed: {}", e);
                view.show_query_error(&format!("Query failed: {}", e));
                None
            }
        }
    }

    pub async fn document_detail(&self, document_id: &str) -> Result<DocumentDetail, ApiError> {
        self.inner.backend.document(document_id).await
    }

    pub async fn stats(&self) -> Result<RagStats, ApiError> {
        self.inner.backend.stats().await
    }
}

impl Inner {
    async fn poll_loop(self: Arc<Self>, document_id: String, cancel: CancellationToken) {
        let mut failures = 0;
        loop {
            let delay = self.policy.delay_after(failures);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.check(&document_id).await {
                PollOutcome::Pending => failures = 0,
                PollOutcome::Finished | PollOutcome::Untracked => return,
                PollOutcome::Failed => {
                    failures += 1;
                    if failures >= self.policy.max_consecutive_failures {
                        self.give_up(&document_id, failures);
                        return;
                    }
                }
            }
        }
    }

    async fn check(&self, document_id: &str) -> PollOutcome {
        if !self.is_tracked(document_id) {
            return PollOutcome::Untracked;
        }
        let status = match self.backend.status(document_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("status poll for {} failed: {}", document_id, e);
                return PollOutcome::Failed;
            }
        };

        if !status.status.is_terminal() {
            // Rendered under the lock so a concurrent terminal render cannot be overwritten.
            let mut tracked = self.tracked.lock().unwrap();
            let Some(entry) = tracked.get_mut(document_id) else {
                return PollOutcome::Untracked;
            };
            entry.last_progress = status.progress;
            self.view.update_progress(
                &entry.record.progress_id,
                status.status,
                status.progress,
                &status.message,
            );
            return PollOutcome::Pending;
        }

        // Whoever untracks first owns the final render.
        let Some(tracked) = self.untrack(document_id) else {
            return PollOutcome::Untracked;
        };
        tracing::info!(
            "document {} finished processing: {}",
            document_id,
            status.status
        );
        let progress_id = tracked.record.progress_id;
        self.view
            .update_progress(&progress_id, status.status, status.progress, &status.message);
        self.remove_after_grace(progress_id);
        let _ = self.refresh_document_list().await;
        PollOutcome::Finished
    }

    fn give_up(&self, document_id: &str, failures: u32) {
        let Some(tracked) = self.untrack(document_id) else {
            return;
        };
        tracing::warn!(
            "giving up on document {} after {} failed status polls",
            document_id,
            failures
        );
        let progress_id = tracked.record.progress_id;
        self.view.update_progress(
            &progress_id,
            DocumentStatus::Failed,
            tracked.last_progress,
            "Processing status unavailable",
        );
        self.view.notify(Notice::error(format!(
            "Lost track of {}: status unavailable",
            tracked.record.filename
        )));
        self.remove_after_grace(progress_id);
    }

    fn remove_after_grace(&self, progress_id: ProgressId) {
        let view = self.view.clone();
        let grace = self.policy.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            view.remove_progress(&progress_id);
        });
    }

    fn is_tracked(&self, document_id: &str) -> bool {
        self.tracked.lock().unwrap().contains_key(document_id)
    }

    fn untrack(&self, document_id: &str) -> Option<Tracked> {
        let mut tracked = self.tracked.lock().unwrap();
        let entry = tracked.remove(document_id)?;
        entry.cancel.cancel();
        self.active.send_replace(tracked.len());
        Some(entry)
    }

    async fn refresh_document_list(&self) -> Result<(), ApiError> {
        match self.backend.documents().await {
            Ok(documents) => {
                self.view.show_documents(&documents);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("failed to load document list: {}", e);
                Err(e)
            }
        }
    }
}
