//! Chat completion client for an Azure OpenAI deployment.

use super::types::{ChatError, ChatMessage};
use crate::config::OpenAiConfig;
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Completion chunks as parsed from the event stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value, ChatError>> + Send>>;

/// Parameters of one completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Conversation to complete.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
}

/// Interface implemented by chat completion backends.
#[async_trait]
pub trait ChatCompletions: Send + Sync {
    /// Return the text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError>;

    /// Stream completion chunks, skipping chunks with no choices.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ChatError>;
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    n: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions served by an Azure OpenAI deployment.
pub struct AzureChatClient {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl AzureChatClient {
    /// Build a client for the configured chat deployment.
    pub fn new(config: &OpenAiConfig) -> Result<Self, ChatError> {
        let client = Client::builder().user_agent("docrag/0.2").build()?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.chat_deployment,
            config.api_version
        );
        tracing::debug!(
            url = %url,
            model = %config.chat_model,
            has_api_key = config.api_key.is_some(),
            "Initialized chat completions client"
        );
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
        })
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> RequestBuilder {
        let body = CompletionBody {
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            n: 1,
            stream,
        };
        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("api-key", api_key);
        }
        builder
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, ChatError> {
        let response = self.post(request, stream).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = ChatError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Chat completion request failed");
            return Err(error);
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatCompletions for AzureChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        let response = self.send(request, false).await?;
        let CompletionResponse { choices } = response.json().await?;
        choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| ChatError::InvalidResponse("no choices returned".to_string()))
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<ChunkStream, ChatError> {
        let response = self.send(request, true).await?;
        Ok(event_stream(response.bytes_stream()))
    }
}

/// Turn raw server-sent event bytes into completion chunks.
///
/// Lines are decoded only once complete, so characters split across reads survive intact.
fn event_stream<S, B>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let mut bytes = Box::pin(bytes);
    let stream = try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        'events: while let Some(chunk) = bytes.next().await {
            buffer.extend_from_slice(chunk?.as_ref());
            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = std::str::from_utf8(&line).map_err(|err| {
                    ChatError::InvalidResponse(format!("stream line is not UTF-8: {err}"))
                })?;
                match parse_event_line(line)? {
                    EventLine::Chunk(event) => yield event,
                    EventLine::Done => break 'events,
                    EventLine::Skip => {}
                }
            }
        }
    };
    Box::pin(stream)
}

enum EventLine {
    Chunk(Value),
    Done,
    Skip,
}

/// Interpret one line of a server-sent event stream.
fn parse_event_line(line: &str) -> Result<EventLine, ChatError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(EventLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(EventLine::Done);
    }
    let event: Value = serde_json::from_str(data)
        .map_err(|err| ChatError::InvalidResponse(format!("bad stream event: {err}")))?;
    // Some API versions open with an event that has no choices.
    let has_choices = event
        .get("choices")
        .and_then(Value::as_array)
        .is_some_and(|choices| !choices.is_empty());
    Ok(if has_choices {
        EventLine::Chunk(event)
    } else {
        EventLine::Skip
    })
}
