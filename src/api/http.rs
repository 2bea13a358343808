use super::{
    ApiError, Backend, ByteStream, ChatRequest, DocumentDetail, DocumentList, DocumentSummary,
    FileBody, HealthStatus, ProcessingStatus, QueryRequest, QueryResponse, RagStats, UploadFile,
    UploadResponse,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Applied to every call except the chat stream, which may run arbitrarily long.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: HttpConfig,
}

impl HttpBackend {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) if !token.is_empty() => {
                req.header("Authorization", format!("Bearer {}", token))
            }
            _ => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self
            .authorize(req)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        ensure_success(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(self.client.get(self.url(path))).await?;
        Ok(resp.json().await?)
    }
}

async fn ensure_success(resp: Response) -> Result<Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status,
        message: text,
    })
}

async fn file_part(file: &UploadFile) -> Result<Part, ApiError> {
    let part = match &file.body {
        FileBody::Bytes(bytes) => Part::bytes(bytes.clone()),
        FileBody::Path(path) => {
            let handle = tokio::fs::File::open(path).await?;
            let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));
            Part::stream_with_length(body, file.size)
        }
    };
    Ok(part.file_name(file.filename.clone()))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn upload(&self, file: &UploadFile) -> Result<UploadResponse, ApiError> {
        let form = Form::new().part("file", file_part(file).await?);
        let resp = self
            .send(self.client.post(self.url("/rag/upload")).multipart(form))
            .await?;
        let data: UploadResponse = resp.json().await?;
        if !data.success {
            return Err(ApiError::Rejected(
                data.message.unwrap_or_else(|| "Upload failed".to_string()),
            ));
        }
        Ok(data)
    }

    async fn status(&self, document_id: &str) -> Result<ProcessingStatus, ApiError> {
        self.get_json(&format!("/rag/status/{}", document_id)).await
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>, ApiError> {
        let list: DocumentList = self.get_json("/rag/documents").await?;
        Ok(list.documents)
    }

    async fn document(&self, document_id: &str) -> Result<DocumentDetail, ApiError> {
        self.get_json(&format!("/rag/documents/{}", document_id))
            .await
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), ApiError> {
        self.send(
            self.client
                .delete(self.url(&format!("/rag/documents/{}", document_id))),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        let resp = self
            .send(self.client.post(self.url("/rag/query")).json(request))
            .await?;
        Ok(resp.json().await?)
    }

    async fn stats(&self) -> Result<RagStats, ApiError> {
        self.get_json("/rag/stats").await
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get_json("/health").await
    }

    async fn open_chat(&self, request: &ChatRequest) -> Result<ByteStream, ApiError> {
        let req = self
            .client
            .post(self.url("/chat"))
            .header("Content-Type", "application/json")
            .json(request);

        // No timeout: the reply streams for as long as the agent keeps producing.
        let resp = self.authorize(req).send().await?;
        let resp = ensure_success(resp).await?;

        Ok(resp
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(ApiError::from)
            .boxed())
    }

    async fn clear_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.send(
            self.client
                .delete(self.url(&format!("/conversations/{}", conversation_id))),
        )
        .await?;
        Ok(())
    }
}
