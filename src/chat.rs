//! OpenAI-compatible streaming chat client.
//!
//! Sends `POST {base_url}/chat/completions` with `stream: true` and turns
//! the server-sent event body into [`StreamFragment`]s. Events are split on
//! blank lines from the raw byte stream, so multi-byte characters cut across
//! network chunks are reassembled before decoding.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use serde_json::{json, Value};

use blog_qa_core::llm::{
    ChatModel, ChatRequest, FinishReason, FragmentStream, StreamFragment,
};

use crate::config::LlmConfig;

/// Streaming chat model speaking the OpenAI chat-completions protocol.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl OpenAIChatModel {
    /// Requires `OPENAI_API_KEY` in the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat API error {}: {}", status, body_text);
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(sse_fragments(bytes))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<StreamFragment>,
    exhausted: bool,
    done: bool,
}

/// Parse an SSE byte stream into chat fragments. Stops at `[DONE]`.
fn sse_fragments<S>(bytes: S) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        exhausted: false,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }

            if let Some(event) = take_event(&mut st.buffer) {
                match parse_sse_event(&event) {
                    SseData::Skip => {}
                    SseData::Done => st.done = true,
                    SseData::Json(value) => st.pending.extend(parse_chat_chunk(&value)),
                    SseData::Invalid(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
                continue;
            }
            if st.exhausted {
                st.done = true;
                continue;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => st.buffer.extend(chunk.into_iter().filter(|b| *b != b'\r')),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(anyhow::anyhow!("chat stream error: {}", e)), st));
                }
                None => {
                    st.exhausted = true;
                    // Trailing event without a final blank line.
                    if st.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        st.buffer.extend_from_slice(b"\n\n");
                    }
                }
            }
        }
    }))
}

/// Remove and return the first complete event (terminated by a blank line).
fn take_event(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let event: Vec<u8> = buffer.drain(..end + 2).collect();
    Some(String::from_utf8_lossy(&event[..end]).into_owned())
}

enum SseData {
    /// Comment, keepalive, or an event without data lines.
    Skip,
    Done,
    Json(Value),
    Invalid(anyhow::Error),
}

fn parse_sse_event(event: &str) -> SseData {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if data.is_empty() {
        return SseData::Skip;
    }

    let payload = data.join("\n");
    if payload.trim() == "[DONE]" {
        return SseData::Done;
    }
    match serde_json::from_str(&payload) {
        Ok(value) => SseData::Json(value),
        Err(e) => SseData::Invalid(anyhow::anyhow!("invalid chat stream payload: {}", e)),
    }
}

/// Map one `chat.completion.chunk` object to fragments.
///
/// Tool-call deltas win over text in the same delta. A chunk without
/// choices, or with an empty delta and no finish reason, is a keepalive.
pub fn parse_chat_chunk(value: &Value) -> Vec<StreamFragment> {
    let Some(choice) = value
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return vec![StreamFragment::Keepalive];
    };

    let mut fragments = Vec::new();
    let delta = choice.get("delta");

    let tool_calls = delta
        .and_then(|d| d.get("tool_calls"))
        .and_then(|t| t.as_array())
        .filter(|t| !t.is_empty());

    if let Some(calls) = tool_calls {
        for (position, call) in calls.iter().enumerate() {
            let function = call.get("function");
            fragments.push(StreamFragment::ToolCall {
                index: call
                    .get("index")
                    .and_then(|i| i.as_u64())
                    .map_or(position, |i| i as usize),
                id: str_field(call, "id"),
                name: function.and_then(|f| str_field(f, "name")),
                arguments: function
                    .and_then(|f| str_field(f, "arguments"))
                    .unwrap_or_default(),
            });
        }
    } else if let Some(function) = delta.and_then(|d| d.get("function_call")) {
        fragments.push(StreamFragment::ToolCall {
            index: 0,
            id: None,
            name: str_field(function, "name"),
            arguments: str_field(function, "arguments").unwrap_or_default(),
        });
    } else if let Some(text) = delta
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
    {
        fragments.push(StreamFragment::Text(text.to_string()));
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
        fragments.push(StreamFragment::Finish(FinishReason::parse(reason)));
    }

    if fragments.is_empty() {
        fragments.push(StreamFragment::Keepalive);
    }
    fragments
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}
