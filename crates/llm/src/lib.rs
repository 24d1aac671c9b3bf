mod openai;
pub mod plan_json;
pub mod prompt;

use std::collections::VecDeque;
use std::future::Future;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::{parse_sse_line, LlmConfig, OpenAiCompatClient, SseLine};
pub use plan_json::{extract_plan, parse_plan_value, strip_plan_json, PLAN_MARKER};

pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model is not configured")]
    NotConfigured,
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned no text")]
    EmptyResponse,
    #[error("no replay response left")]
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

pub trait LanguageModel: Send + Sync {
    fn complete(
        &self,
        system: &str,
        user: &str,
        history: &[ChatMessage],
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn stream_complete(
        &self,
        system: &str,
        user: &str,
        history: &[ChatMessage],
    ) -> impl Future<Output = Result<TextStream, LlmError>> + Send;

    fn is_configured(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredModel;

impl LanguageModel for UnconfiguredModel {
    async fn complete(&self, _system: &str, _user: &str, _history: &[ChatMessage]) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }

    async fn stream_complete(
        &self,
        _system: &str,
        _user: &str,
        _history: &[ChatMessage],
    ) -> Result<TextStream, LlmError> {
        Err(LlmError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

const REPLAY_CHUNK_CHARS: usize = 48;

/// Answers with queued responses in order. Streaming splits each response
/// into fixed-size character chunks.
#[derive(Debug, Default)]
pub struct ReplayModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ReplayModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_response(&self, user: &str) -> Result<String, LlmError> {
        self.prompts.lock().push(user.to_string());
        self.responses.lock().pop_front().ok_or(LlmError::Exhausted)
    }
}

impl LanguageModel for ReplayModel {
    async fn complete(&self, _system: &str, user: &str, _history: &[ChatMessage]) -> Result<String, LlmError> {
        self.next_response(user)
    }

    async fn stream_complete(
        &self,
        _system: &str,
        user: &str,
        _history: &[ChatMessage],
    ) -> Result<TextStream, LlmError> {
        let response = self.next_response(user)?;
        let chars = response.chars().collect::<Vec<_>>();
        let chunks = chars
            .chunks(REPLAY_CHUNK_CHARS)
            .map(|chunk| Ok(chunk.iter().collect::<String>()))
            .collect::<Vec<_>>();
        Ok(stream::iter(chunks).boxed())
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub enum ModelBackend {
    OpenAi(OpenAiCompatClient),
    Unconfigured(UnconfiguredModel),
    Replay(ReplayModel),
}

impl ModelBackend {
    pub fn from_env() -> Result<Self, LlmError> {
        match LlmConfig::from_env() {
            Some(config) => Ok(Self::OpenAi(OpenAiCompatClient::new(config)?)),
            None => Ok(Self::Unconfigured(UnconfiguredModel)),
        }
    }
}

impl LanguageModel for ModelBackend {
    async fn complete(&self, system: &str, user: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        match self {
            Self::OpenAi(client) => client.complete(system, user, history).await,
            Self::Unconfigured(model) => model.complete(system, user, history).await,
            Self::Replay(model) => model.complete(system, user, history).await,
        }
    }

    async fn stream_complete(
        &self,
        system: &str,
        user: &str,
        history: &[ChatMessage],
    ) -> Result<TextStream, LlmError> {
        match self {
            Self::OpenAi(client) => client.stream_complete(system, user, history).await,
            Self::Unconfigured(model) => model.stream_complete(system, user, history).await,
            Self::Replay(model) => model.stream_complete(system, user, history).await,
        }
    }

    fn is_configured(&self) -> bool {
        match self {
            Self::OpenAi(client) => client.is_configured(),
            Self::Unconfigured(model) => model.is_configured(),
            Self::Replay(model) => model.is_configured(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_streams_in_chunks_and_records_prompts() {
        let text = "第1天：故宫".repeat(20);
        let model = ReplayModel::new([text.clone(), "second".to_string()]);

        let stream = model.stream_complete("sys", "北京三日游", &[]).await.unwrap();
        let chunks = stream.collect::<Vec<_>>().await;
        assert!(chunks.len() > 1);
        let joined = chunks
            .into_iter()
            .map(|chunk| chunk.unwrap())
            .collect::<String>();
        assert_eq!(joined, text);

        assert_eq!(model.complete("sys", "again", &[]).await.unwrap(), "second");
        assert!(matches!(
            model.complete("sys", "empty", &[]).await,
            Err(LlmError::Exhausted)
        ));
        assert_eq!(model.prompts(), vec!["北京三日游", "again", "empty"]);
    }

    #[tokio::test]
    async fn unconfigured_backend_reports_outage() {
        let backend = ModelBackend::Unconfigured(UnconfiguredModel);
        assert!(!backend.is_configured());
        assert!(matches!(
            backend.complete("sys", "hi", &[]).await,
            Err(LlmError::NotConfigured)
        ));
        assert!(backend.stream_complete("sys", "hi", &[]).await.is_err());
    }
}
