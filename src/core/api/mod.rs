pub mod types;

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

pub use types::{
    ChatTurnMessage, ChatTurnRequest, Conversation, Job, JobStatus, MatchedSpace, MessageRecord,
    MessageStatus, ModelInfo, NewMessage, QueueEntry, QueueSnapshot, RetrievalRequest, Role,
    Source, StreamRequest,
};

/// Raw body of an SSE response.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Everything the coordinator needs from the dashboard backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;
    async fn create_conversation(&self, title: &str) -> Result<Conversation>;
    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<()>;
    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>>;
    async fn persist_message(&self, conversation_id: &str, message: &NewMessage<'_>)
    -> Result<()>;

    async fn list_jobs(&self, conversation_id: &str) -> Result<Vec<Job>>;
    async fn queue_status(&self) -> Result<QueueSnapshot>;
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Open a streaming request. Non-2xx statuses are errors.
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream>;
}

pub struct HttpBackend {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(api_base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        // Streams stay open far longer than a JSON call, so the timeout only covers connecting.
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn expect_success(res: Response) -> Result<Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(anyhow!("HTTP {}: {}", status.as_u16(), body.trim()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let res = self.request(Method::GET, path).send().await?;
        let res = Self::expect_success(res).await?;
        Ok(res.json::<T>().await?)
    }
}

fn chat_path(conversation_id: &str) -> String {
    format!("/chats/{}", urlencoding::encode(conversation_id))
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.get_json("/chats").await
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let res = self
            .request(Method::POST, "/chats")
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        let res = Self::expect_success(res).await?;
        Ok(res.json::<Conversation>().await?)
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> Result<()> {
        let res = self
            .request(Method::PATCH, &chat_path(conversation_id))
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let res = self
            .request(Method::DELETE, &chat_path(conversation_id))
            .send()
            .await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.get_json(&format!("{}/messages", chat_path(conversation_id)))
            .await
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        message: &NewMessage<'_>,
    ) -> Result<()> {
        let res = self
            .request(
                Method::POST,
                &format!("{}/messages", chat_path(conversation_id)),
            )
            .json(message)
            .send()
            .await?;
        Self::expect_success(res).await?;
        Ok(())
    }

    async fn list_jobs(&self, conversation_id: &str) -> Result<Vec<Job>> {
        self.get_json(&format!("{}/jobs", chat_path(conversation_id)))
            .await
    }

    async fn queue_status(&self) -> Result<QueueSnapshot> {
        self.get_json("/llm/queue").await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.get_json("/llm/models").await
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream> {
        let builder = match request {
            StreamRequest::Chat(body) => self.request(Method::POST, "/llm/chat").json(body),
            StreamRequest::Retrieval(body) => self.request(Method::POST, "/rag/query").json(body),
            StreamRequest::Reconnect { job_id } => self.request(
                Method::GET,
                &format!("/llm/jobs/{}/stream", urlencoding::encode(job_id)),
            ),
        };
        debug!("Opening {} stream", request.label());
        let res = builder
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let res = Self::expect_success(res).await?;
        let stream = res
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(stream))
    }
}
