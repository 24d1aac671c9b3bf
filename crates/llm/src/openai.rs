use std::collections::VecDeque;
use std::env;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{ChatMessage, ChatRole, LanguageModel, LlmError, TextStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Option<Self> {
        env::var("WAYFARER_LLM_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Self::with_api_key)
    }

    /// Given key, everything else from the environment or defaults.
    pub fn with_api_key(api_key: String) -> Self {
        let base_url = env::var("WAYFARER_LLM_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = env::var("WAYFARER_LLM_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_seconds = env::var("WAYFARER_LLM_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        Self {
            api_key,
            base_url,
            model,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Chat-completions endpoint. Base URLs may or may not carry `/v1`.
    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(6))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn payload(&self, system: &str, user: &str, history: &[ChatMessage], stream: bool) -> Value {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": system }));
        for message in history {
            let role = match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": message.content }));
        }
        messages.push(json!({ "role": "user", "content": user }));

        json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream
        })
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(self.config.completions_url())
            .bearer_auth(self.config.api_key.as_str())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl LanguageModel for OpenAiCompatClient {
    async fn complete(&self, system: &str, user: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        let payload = self.payload(system, user, history, false);
        let body: Value = self.send(&payload).await?.json().await?;
        let text = extract_completion_text(&body)
            .filter(|value| !value.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        info!(model = %self.config.model, chars = text.chars().count(), "completion received");
        Ok(text)
    }

    async fn stream_complete(
        &self,
        system: &str,
        user: &str,
        history: &[ChatMessage],
    ) -> Result<TextStream, LlmError> {
        let payload = self.payload(system, user, history, true);
        let response = self.send(&payload).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(sse_deltas(body))
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Reads `choices[0].message.content`, then the responses-style
/// `output_text` and `output[].content[].text` shapes.
fn extract_completion_text(payload: &Value) -> Option<String> {
    if let Some(content) = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
    {
        return Some(content.to_string());
    }
    if let Some(value) = payload.get("output_text").and_then(Value::as_str) {
        return Some(value.to_string());
    }

    let chunks = payload
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|content| content.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|content| content.get("text").and_then(Value::as_str))
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Interprets one line of a chat-completions event stream.
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(event) => event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .filter(|delta| !delta.is_empty())
            .map(|delta| SseLine::Delta(delta.to_string()))
            .unwrap_or(SseLine::Skip),
        Err(err) => {
            debug!(error = %err, "skipping undecodable stream event");
            SseLine::Skip
        }
    }
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            self.handle_line(&String::from_utf8_lossy(&line));
            if self.done {
                self.buffer.clear();
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        match parse_sse_line(line) {
            SseLine::Delta(delta) => self.pending.push_back(Ok(delta)),
            SseLine::Done => self.done = true,
            SseLine::Skip => {}
        }
    }
}

fn sse_deltas(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> TextStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(err)) => {
                    state.done = true;
                    state.pending.push_back(Err(LlmError::Http(err)));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle_line(&String::from_utf8_lossy(&rest));
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[test]
    fn completions_url_accepts_v1_suffix() {
        assert_eq!(
            config("https://api.openai.com").completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            config("https://llm.internal/compatible-mode/v1/").completions_url(),
            "https://llm.internal/compatible-mode/v1/chat/completions"
        );
    }

    #[test]
    fn reads_chat_and_responses_shapes() {
        let chat = json!({"choices": [{"message": {"content": "第1天：故宫"}}]});
        assert_eq!(extract_completion_text(&chat).as_deref(), Some("第1天：故宫"));

        let responses = json!({
            "output": [{"content": [
                {"type": "output_text", "text": "甲"},
                {"type": "reasoning", "text": "ignored"},
                {"type": "output_text", "text": "乙"}
            ]}]
        });
        assert_eq!(extract_completion_text(&responses).as_deref(), Some("甲\n\n乙"));
        assert_eq!(extract_completion_text(&json!({})), None);
    }

    #[test]
    fn parses_stream_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"故宫"}}]}"#),
            SseLine::Delta("故宫".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
    }

    #[tokio::test]
    async fn reassembles_events_split_across_chunks() {
        let raw = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"第1天\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"：故宫\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n"
        )
        .as_bytes()
        .to_vec();
        let (first, second) = raw.split_at(30);
        let body = stream::iter(vec![Ok(first.to_vec()), Ok(second.to_vec())]).boxed();

        let deltas = sse_deltas(body)
            .map(|delta| delta.unwrap())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(deltas, vec!["第1天", "：故宫"]);
    }
}
