//! Streaming answer synthesis.
//!
//! Drives one ask from retrieval to the last model fragment and publishes
//! typed [`AskEvent`]s on a channel. The HTTP layer turns those into
//! server-sent events; the CLI prints them.
//!
//! # Event protocol
//!
//! ```text
//! exist_in_post_status → context → answer* → end
//! ```
//!
//! Every accepted request sees exactly this shape, with exactly one `end`.
//! Faults are logged and shorten the stream; they are never written into it.
//!
//! # Phases
//!
//! ```text
//! Init → Retrieving → ContextEmitted → Generating → StreamingAnswer → Ended
//! ```
//!
//! A retrieval (store) failure is retried once after the configured backoff.
//! Provider failures (question embedding, chat model) are not retried.
//! If the receiver is dropped the task stops at the next suspension point,
//! discards any buffered tool-call arguments and emits nothing further.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::Instrument;

use blog_qa_core::embedding::{embed_query, EmbeddingProvider};
use blog_qa_core::llm::{ChatModel, ChatRequest, FragmentStream, StreamFragment};
use blog_qa_core::prompt::assemble;
use blog_qa_core::retrieve::{retrieve, RetrievalParams, RetrievalRequest};
use blog_qa_core::store::Store;
use blog_qa_core::tone::{resolve_tone, ToneSelector};
use blog_qa_core::{AskError, ContextEntry, RetrievalResult};

use crate::config::Config;

/// Channel capacity between the synthesizer task and its consumer.
const EVENT_BUFFER: usize = 64;

/// Inbound ask payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub user_id: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(default)]
    pub speech_tone: Option<ToneSelector>,
}

impl AskRequest {
    pub fn validate(&self) -> Result<(), AskError> {
        if self.question.trim().is_empty() {
            return Err(AskError::validation("question must not be empty"));
        }
        if self.user_id.trim().is_empty() {
            return Err(AskError::validation("user_id must not be empty"));
        }
        Ok(())
    }
}

/// One outbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum AskEvent {
    ExistInPostStatus(bool),
    Context(Vec<ContextEntry>),
    /// Raw answer fragment: plain text or a tool-call argument delta.
    Answer(String),
    End,
}

impl AskEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AskEvent::ExistInPostStatus(_) => "exist_in_post_status",
            AskEvent::Context(_) => "context",
            AskEvent::Answer(_) => "answer",
            AskEvent::End => "end",
        }
    }

    /// SSE data line. JSON for every event except `end`, which is `[DONE]`.
    pub fn data(&self) -> String {
        let json = match self {
            AskEvent::ExistInPostStatus(found) => serde_json::to_string(found),
            AskEvent::Context(entries) => serde_json::to_string(entries),
            AskEvent::Answer(fragment) => serde_json::to_string(fragment),
            AskEvent::End => return "[DONE]".to_string(),
        };
        // Serializing bools, strings and plain structs cannot fail.
        json.unwrap_or_default()
    }

    /// Render as a wire-format SSE frame.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}

/// Synthesizer state, tracked for logging and for the exactly-once `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Retrieving,
    ContextEmitted,
    Generating,
    StreamingAnswer,
    Ended,
}

/// Tool-call arguments reassembled per call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedCall {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Groups streamed tool-call deltas by stream index. A call keeps the
/// first id and name seen for its index.
#[derive(Debug, Default)]
pub struct ToolCallBuffers {
    calls: Vec<BufferedCall>,
    by_index: HashMap<usize, usize>,
}

impl ToolCallBuffers {
    pub fn append(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: &str,
    ) {
        let slot = *self.by_index.entry(index).or_insert_with(|| {
            self.calls.push(BufferedCall::default());
            self.calls.len() - 1
        });
        let call = &mut self.calls[slot];
        if call.id.is_none() {
            call.id = id;
        }
        if call.name.is_none() {
            call.name = name;
        }
        call.arguments.push_str(arguments);
    }

    pub fn calls(&self) -> &[BufferedCall] {
        &self.calls
    }
}

/// Sending half of an ask stream.
///
/// Owns the phase and guarantees `end` is sent at most once; once the
/// receiver is gone every send is a no-op.
struct EventSink {
    tx: mpsc::Sender<AskEvent>,
    phase: Phase,
    disconnected: bool,
}

impl EventSink {
    fn new(tx: mpsc::Sender<AskEvent>) -> Self {
        Self {
            tx,
            phase: Phase::Init,
            disconnected: false,
        }
    }

    fn enter(&mut self, next: Phase) {
        if self.phase != next {
            tracing::debug!(from = ?self.phase, to = ?next, "phase transition");
            self.phase = next;
        }
    }

    fn is_open(&self) -> bool {
        !self.disconnected && self.phase != Phase::Ended
    }

    /// Send one event. Returns `false` when the stream is over.
    async fn emit(&mut self, event: AskEvent) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            tracing::info!(phase = ?self.phase, "client disconnected");
            self.disconnected = true;
            return false;
        }
        true
    }

    /// Send `end` unless it was already sent or the client is gone.
    async fn finish(&mut self) {
        if self.is_open() && self.tx.send(AskEvent::End).await.is_err() {
            self.disconnected = true;
        }
        self.enter(Phase::Ended);
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Tunables taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SynthSettings {
    pub params: RetrievalParams,
    pub retry_backoff: Duration,
    pub response_language: String,
}

impl SynthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            params: config.retrieval.params(),
            retry_backoff: Duration::from_millis(config.retrieval.retry_backoff_ms),
            response_language: config.answer.response_language.clone(),
        }
    }
}

/// Runs asks against a store, an embedding provider and a chat model.
pub struct Synthesizer {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    settings: SynthSettings,
}

impl Synthesizer {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        settings: SynthSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            settings,
        }
    }

    /// Validate the request and spawn its synthesis task.
    ///
    /// Validation errors are returned before any event exists.
    pub fn start(
        self: &Arc<Self>,
        request: AskRequest,
    ) -> Result<mpsc::Receiver<AskEvent>, AskError> {
        request.validate()?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let span = tracing::info_span!(
            "ask",
            user_id = %request.user_id,
            category_id = ?request.category_id,
            post_id = ?request.post_id,
        );
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(request, tx).await }.instrument(span));
        Ok(rx)
    }

    /// Drive one ask to completion, publishing events on `tx`.
    pub async fn run(&self, request: AskRequest, tx: mpsc::Sender<AskEvent>) {
        let mut sink = EventSink::new(tx);

        sink.enter(Phase::Retrieving);
        let retrieved = tokio::select! {
            biased;
            _ = sink.closed() => {
                tracing::info!("client disconnected during retrieval");
                return;
            }
            r = self.retrieve_with_retry(&request) => r,
        };

        let results = match retrieved {
            Ok(results) => Some(results),
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "ask failed before context");
                None
            }
        };

        let ranked = results.as_deref().unwrap_or_default();
        let context: Vec<ContextEntry> = ranked.iter().map(ContextEntry::from).collect();
        tracing::info!(
            results = ranked.len(),
            top_score = ranked.first().map(|r| r.similarity_score),
            "retrieval finished"
        );
        if !sink.emit(AskEvent::ExistInPostStatus(!ranked.is_empty())).await
            || !sink.emit(AskEvent::Context(context)).await
        {
            return;
        }
        sink.enter(Phase::ContextEmitted);

        let Some(results) = results else {
            sink.finish().await;
            return;
        };

        self.generate(&request, &results, &mut sink).await;
        sink.finish().await;
    }

    async fn generate(
        &self,
        request: &AskRequest,
        results: &[RetrievalResult],
        sink: &mut EventSink,
    ) {
        sink.enter(Phase::Generating);
        let opened = tokio::select! {
            biased;
            _ = sink.closed() => {
                tracing::info!("client disconnected before the model stream opened");
                sink.disconnected = true;
                return;
            }
            r = self.open_stream(request, results) => r,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, model = self.chat.model_name(), "chat stream failed to open");
                return;
            }
        };

        let mut calls = ToolCallBuffers::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    tracing::info!(
                        buffered_calls = calls.calls().len(),
                        "client disconnected, dropping model stream"
                    );
                    sink.disconnected = true;
                    return;
                }
                item = stream.next() => item,
            };

            let fragment = match next {
                None => {
                    tracing::debug!("model stream ended without finish reason");
                    break;
                }
                Some(Err(e)) => {
                    let e = AskError::Provider(e);
                    tracing::warn!(code = e.code(), error = %e, "model stream fault, ending early");
                    break;
                }
                Some(Ok(fragment)) => fragment,
            };

            match fragment {
                StreamFragment::Keepalive => {}
                StreamFragment::Text(text) => {
                    sink.enter(Phase::StreamingAnswer);
                    if !sink.emit(AskEvent::Answer(text)).await {
                        return;
                    }
                }
                StreamFragment::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    calls.append(index, id, name, &arguments);
                    if arguments.is_empty() {
                        continue;
                    }
                    sink.enter(Phase::StreamingAnswer);
                    if !sink.emit(AskEvent::Answer(arguments)).await {
                        return;
                    }
                }
                StreamFragment::Finish(reason) => {
                    tracing::debug!(?reason, "model finished");
                    break;
                }
            }
        }

        for call in calls.calls() {
            tracing::info!(
                call_id = call.id.as_deref().unwrap_or("-"),
                tool = call.name.as_deref().unwrap_or("-"),
                argument_bytes = call.arguments.len(),
                "tool call completed"
            );
        }
    }

    /// Embed the question, then rank. Store faults get one retry after the
    /// configured backoff; embedding faults are returned as-is.
    /// Resolve tone, load category names, assemble the prompt and open the
    /// model stream.
    async fn open_stream(
        &self,
        request: &AskRequest,
        results: &[RetrievalResult],
    ) -> Result<FragmentStream, AskError> {
        let selector = request.speech_tone.clone().unwrap_or_default();
        let style = resolve_tone(self.store.as_ref(), &request.user_id, &selector).await;
        let category_names = match self.store.category_names(&request.user_id).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "category names unavailable");
                Vec::new()
            }
        };

        let prompt = assemble(
            &request.question,
            results,
            &style,
            &category_names,
            &self.settings.response_language,
        );
        let chat_request = ChatRequest {
            messages: prompt.messages,
            tools: prompt.tools,
        };
        self.chat
            .stream_chat(&chat_request)
            .await
            .map_err(AskError::Provider)
    }

    async fn retrieve_with_retry(
        &self,
        request: &AskRequest,
    ) -> Result<Vec<RetrievalResult>, AskError> {
        let query_vec = embed_query(self.embedder.as_ref(), &request.question)
            .await
            .map_err(AskError::Provider)?;

        let retrieval = RetrievalRequest {
            query_vec: &query_vec,
            user_id: &request.user_id,
            category_id: request.category_id,
            post_id: request.post_id,
            params: self.settings.params.clone(),
        };

        let mut attempt = 0;
        loop {
            match retrieve(self.store.as_ref(), &retrieval).await {
                Ok(results) => return Ok(results),
                Err(e) if attempt == 0 => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        backoff_ms = self.settings.retry_backoff.as_millis() as u64,
                        "retrieval failed, retrying once"
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => return Err(AskError::Retrieval(e)),
            }
        }
    }
}
