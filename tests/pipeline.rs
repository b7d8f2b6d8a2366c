//! End-to-end ask and ingestion tests against scripted providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Router};
use futures_util::stream;
use tempfile::TempDir;

use blog_qa::config::{ChunkingConfig, Config, EmbeddingConfig};
use blog_qa::embedding::{create_provider, create_query_provider};
use blog_qa::ingest::{ingest_content, ingest_title};
use blog_qa::sqlite_store::SqliteStore;
use blog_qa::synth::{AskEvent, AskRequest, SynthSettings, Synthesizer};
use blog_qa::{db, migrate};
use blog_qa_core::chunk::BpeTokenizer;
use blog_qa_core::embedding::EmbeddingProvider;
use blog_qa_core::llm::{
    ChatModel, ChatRequest, FinishReason, FragmentStream, StreamFragment,
};
use blog_qa_core::models::{CandidateChunk, ChunkRecord, Persona};
use blog_qa_core::prompt::NO_POST_CONTEXT;
use blog_qa_core::retrieve::RetrievalParams;
use blog_qa_core::store::memory::InMemoryStore;
use blog_qa_core::store::{PostScope, Store};
use blog_qa_core::tone::{ToneSelector, DEFAULT_STYLE};
use blog_qa_core::AskError;

// ============ Fakes ============

/// Embeds by keyword: texts mentioning "rust" point one way, "cook" another.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("rust") {
                    vec![1.0, 0.0]
                } else if t.contains("cook") {
                    vec![0.0, 1.0]
                } else {
                    vec![0.5, 0.5]
                }
            })
            .collect())
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("embedding API error 500"))
    }
}

enum Script {
    Fragments(Vec<Result<StreamFragment>>),
    /// Yields the fragments, then never finishes.
    Hang(Vec<StreamFragment>),
    OpenError,
}

struct ScriptedChat {
    script: Script,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.script {
            Script::OpenError => Err(anyhow!("Chat API error 401")),
            Script::Fragments(fragments) => {
                let items: Vec<Result<StreamFragment>> = fragments
                    .iter()
                    .map(|f| match f {
                        Ok(f) => Ok(f.clone()),
                        Err(e) => Err(anyhow!("{}", e)),
                    })
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Script::Hang(fragments) => {
                let head = stream::iter(fragments.clone().into_iter().map(Ok::<_, anyhow::Error>));
                Ok(Box::pin(futures_util::StreamExt::chain(
                    head,
                    stream::pending(),
                )))
            }
        }
    }
}

/// Delegates to an in-memory store but fails the first `failures` candidate scans.
struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicUsize,
    scans: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: InMemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            scans: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn replace_chunks(&self, post_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
        self.inner.replace_chunks(post_id, chunks).await
    }
    async fn upsert_title_embedding(&self, post_id: i64, vector: &[f32]) -> Result<()> {
        self.inner.upsert_title_embedding(post_id, vector).await
    }
    async fn category_subtree(&self, user_id: &str, category_id: i64) -> Result<Vec<i64>> {
        self.inner.category_subtree(user_id, category_id).await
    }
    async fn scoring_candidates(
        &self,
        user_id: &str,
        scope: &PostScope,
    ) -> Result<Vec<CandidateChunk>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(anyhow!("database is locked"));
        }
        self.inner.scoring_candidates(user_id, scope).await
    }
    async fn find_persona(&self, persona_id: i64, user_id: &str) -> Result<Option<Persona>> {
        self.inner.find_persona(persona_id, user_id).await
    }
    async fn category_names(&self, user_id: &str) -> Result<Vec<String>> {
        self.inner.category_names(user_id).await
    }
}

/// Answers retrieval normally but never returns from persona lookups.
struct StallingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl Store for StallingStore {
    async fn replace_chunks(&self, post_id: i64, chunks: &[ChunkRecord]) -> Result<()> {
        self.inner.replace_chunks(post_id, chunks).await
    }
    async fn upsert_title_embedding(&self, post_id: i64, vector: &[f32]) -> Result<()> {
        self.inner.upsert_title_embedding(post_id, vector).await
    }
    async fn category_subtree(&self, user_id: &str, category_id: i64) -> Result<Vec<i64>> {
        self.inner.category_subtree(user_id, category_id).await
    }
    async fn scoring_candidates(
        &self,
        user_id: &str,
        scope: &PostScope,
    ) -> Result<Vec<CandidateChunk>> {
        self.inner.scoring_candidates(user_id, scope).await
    }
    async fn find_persona(&self, _persona_id: i64, _user_id: &str) -> Result<Option<Persona>> {
        std::future::pending().await
    }
    async fn category_names(&self, user_id: &str) -> Result<Vec<String>> {
        self.inner.category_names(user_id).await
    }
}

/// Serves `POST /api/embed` with a 500 on every call and counts the calls.
async fn failing_embed_server() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/api/embed",
            post(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, "model crashed")
            }),
        )
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{}", addr), hits)
}

fn ollama_config(url: &str, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "ollama".to_string(),
        model: Some("nomic-embed-text".to_string()),
        dims: Some(2),
        url: Some(url.to_string()),
        max_retries,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

// ============ Helpers ============

fn tokenizer() -> &'static BpeTokenizer {
    static BPE: OnceLock<BpeTokenizer> = OnceLock::new();
    BPE.get_or_init(|| BpeTokenizer::cl100k().unwrap())
}

fn settings() -> SynthSettings {
    SynthSettings {
        params: RetrievalParams {
            threshold: 0.0,
            ..RetrievalParams::default()
        },
        retry_backoff: Duration::from_millis(1),
        response_language: "Korean".to_string(),
    }
}

fn ask(question: &str) -> AskRequest {
    AskRequest {
        question: question.to_string(),
        user_id: "alice".to_string(),
        category_id: None,
        post_id: None,
        speech_tone: None,
    }
}

async fn blog_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.add_category(1, "alice", "Programming", None).unwrap();
    store.add_category(2, "alice", "Kitchen", None).unwrap();
    store.add_post(10, "alice", Some(1), "Learning Rust").unwrap();
    store.add_post(11, "alice", Some(2), "Weekend cooking").unwrap();

    let chunking = ChunkingConfig {
        max_tokens: 64,
        overlap_tokens: 8,
        ..ChunkingConfig::default()
    };
    ingest_title(&store, &KeywordEmbedder, 10, "Learning Rust").await.unwrap();
    ingest_content(&store, &KeywordEmbedder, tokenizer(), &chunking, 8, 10, "Rust has ownership.")
        .await
        .unwrap();
    ingest_title(&store, &KeywordEmbedder, 11, "Weekend cooking").await.unwrap();
    ingest_content(&store, &KeywordEmbedder, tokenizer(), &chunking, 8, 11, "I cook pasta.")
        .await
        .unwrap();
    store
}

fn synthesizer(store: Arc<dyn Store>, chat: Arc<ScriptedChat>) -> Arc<Synthesizer> {
    Arc::new(Synthesizer::new(
        store,
        Arc::new(KeywordEmbedder),
        chat,
        settings(),
    ))
}

async fn collect_events(synth: &Arc<Synthesizer>, request: AskRequest) -> Vec<AskEvent> {
    let mut rx = synth.start(request).unwrap();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn assert_protocol(events: &[AskEvent]) {
    assert!(
        matches!(events.first(), Some(AskEvent::ExistInPostStatus(_))),
        "first event must be exist_in_post_status: {:?}",
        events
    );
    assert!(
        matches!(events.get(1), Some(AskEvent::Context(_))),
        "second event must be context: {:?}",
        events
    );
    assert_eq!(events.last(), Some(&AskEvent::End));
    assert_eq!(
        events.iter().filter(|e| **e == AskEvent::End).count(),
        1,
        "exactly one end: {:?}",
        events
    );
}

fn answers(events: &[AskEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AskEvent::Answer(a) => Some(a.clone()),
            _ => None,
        })
        .collect()
}

fn tool_delta(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> StreamFragment {
    StreamFragment::ToolCall {
        index,
        id: id.map(str::to_string),
        name: name.map(str::to_string),
        arguments: args.to_string(),
    }
}

// ============ Ask protocol ============

#[tokio::test]
async fn test_tool_call_arguments_stream_as_answers() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![
        Ok(StreamFragment::Keepalive),
        Ok(tool_delta(0, Some("call_1"), Some("answer_from_context"), "")),
        Ok(tool_delta(0, None, None, "{\"text\":\"Own")),
        Ok(tool_delta(0, None, None, "ership\"}")),
        Ok(StreamFragment::Finish(FinishReason::ToolCalls)),
    ]));
    let synth = synthesizer(store, chat.clone());

    let events = collect_events(&synth, ask("What does Rust say about ownership?")).await;

    assert_protocol(&events);
    assert_eq!(events[0], AskEvent::ExistInPostStatus(true));
    match &events[1] {
        AskEvent::Context(entries) => {
            assert_eq!(entries[0].post_id, 10);
            assert_eq!(entries[0].post_title, "Learning Rust");
        }
        other => panic!("expected context, got {:?}", other),
    }
    assert_eq!(answers(&events), vec!["{\"text\":\"Own", "ership\"}"]);

    let requests = chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tools.len(), 4);
    assert!(requests[0].messages[1].content.contains("Rust has ownership."));
    assert!(requests[0].messages[0].content.contains("Programming"));
}

#[tokio::test]
async fn test_text_deltas_and_finish_stops_consumption() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![
        Ok(StreamFragment::Text("Hel".to_string())),
        Ok(StreamFragment::Text("lo".to_string())),
        Ok(StreamFragment::Finish(FinishReason::Stop)),
        Ok(StreamFragment::Text("after finish".to_string())),
    ]));
    let synth = synthesizer(store, chat);

    let events = collect_events(&synth, ask("rust?")).await;

    assert_protocol(&events);
    assert_eq!(answers(&events), vec!["Hel", "lo"]);
}

#[tokio::test]
async fn test_zero_posts_not_found_path() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let chat = ScriptedChat::new(Script::Fragments(vec![
        Ok(tool_delta(0, Some("c"), Some("report_not_found"), "{\"text\":\"none\"}")),
        Ok(StreamFragment::Finish(FinishReason::Stop)),
    ]));
    let synth = synthesizer(store, chat.clone());

    let events = collect_events(&synth, ask("anything?")).await;

    assert_protocol(&events);
    assert_eq!(events[0], AskEvent::ExistInPostStatus(false));
    assert_eq!(events[1], AskEvent::Context(vec![]));
    assert!(chat.requests()[0].messages[1]
        .content
        .contains(NO_POST_CONTEXT));
}

#[tokio::test]
async fn test_stream_exhausted_without_finish_still_ends_once() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![Ok(StreamFragment::Text(
        "partial".to_string(),
    ))]));
    let synth = synthesizer(store, chat);

    let events = collect_events(&synth, ask("rust")).await;

    assert_protocol(&events);
    assert_eq!(answers(&events), vec!["partial"]);
}

#[tokio::test]
async fn test_mid_stream_fault_ends_early() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![
        Ok(StreamFragment::Text("a".to_string())),
        Err(anyhow!("connection reset")),
        Ok(StreamFragment::Text("b".to_string())),
    ]));
    let synth = synthesizer(store, chat);

    let events = collect_events(&synth, ask("rust")).await;

    assert_protocol(&events);
    assert_eq!(answers(&events), vec!["a"]);
}

#[tokio::test]
async fn test_chat_open_failure_ends_after_context() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let synth = synthesizer(store, ScriptedChat::new(Script::OpenError));

    let events = collect_events(&synth, ask("rust")).await;

    assert_protocol(&events);
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_category_scope_limits_context() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = synthesizer(store, chat);

    let mut request = ask("cook or rust");
    request.category_id = Some(2);
    let events = collect_events(&synth, request).await;

    assert_protocol(&events);
    match &events[1] {
        AskEvent::Context(entries) => {
            assert!(!entries.is_empty());
            assert!(entries.iter().all(|e| e.post_id == 11));
        }
        other => panic!("expected context, got {:?}", other),
    }
}

// ============ Retry and degradation ============

#[tokio::test]
async fn test_retrieval_retried_once() {
    let flaky = Arc::new(FlakyStore::new(blog_store().await, 1));
    let chat = ScriptedChat::new(Script::Fragments(vec![Ok(StreamFragment::Finish(
        FinishReason::Stop,
    ))]));
    let synth = synthesizer(flaky.clone(), chat);

    let events = collect_events(&synth, ask("rust")).await;

    assert_protocol(&events);
    assert_eq!(events[0], AskEvent::ExistInPostStatus(true));
    assert_eq!(flaky.scans.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retrieval_failing_twice_degrades() {
    let flaky = Arc::new(FlakyStore::new(blog_store().await, 2));
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = synthesizer(flaky.clone(), chat.clone());

    let events = collect_events(&synth, ask("rust")).await;

    assert_eq!(
        events,
        vec![
            AskEvent::ExistInPostStatus(false),
            AskEvent::Context(vec![]),
            AskEvent::End
        ]
    );
    assert_eq!(flaky.scans.load(Ordering::SeqCst), 2);
    assert!(chat.requests().is_empty());
}

#[tokio::test]
async fn test_embedding_fault_not_retried() {
    let flaky = Arc::new(FlakyStore::new(blog_store().await, 0));
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = Arc::new(Synthesizer::new(
        flaky.clone(),
        Arc::new(FailingEmbedder),
        chat,
        settings(),
    ));

    let events = collect_events(&synth, ask("rust")).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], AskEvent::ExistInPostStatus(false));
    assert_eq!(flaky.scans.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_http_question_embedding_attempted_once() {
    let (url, hits) = failing_embed_server().await;
    let embedder = create_query_provider(&ollama_config(&url, 5)).unwrap();
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = Arc::new(Synthesizer::new(
        Arc::new(blog_store().await),
        Arc::from(embedder),
        chat.clone(),
        settings(),
    ));

    let events = tokio::time::timeout(Duration::from_secs(5), collect_events(&synth, ask("rust")))
        .await
        .expect("ask waited on embedding backoff");

    assert_eq!(
        events,
        vec![
            AskEvent::ExistInPostStatus(false),
            AskEvent::Context(vec![]),
            AskEvent::End,
        ]
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(chat.requests().is_empty());
}

#[tokio::test]
async fn test_ingestion_embedding_keeps_backoff() {
    let (url, hits) = failing_embed_server().await;
    let embedder = create_provider(&ollama_config(&url, 1)).unwrap();

    let err = ingest_title(&InMemoryStore::new(), embedder.as_ref(), 1, "Learning Rust")
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("Ollama API error"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

// ============ Tone ============

#[tokio::test]
async fn test_unknown_persona_uses_default_style() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = synthesizer(store, chat.clone());

    let mut request = ask("rust");
    request.speech_tone = Some(ToneSelector::Persona(404));
    let events = collect_events(&synth, request).await;

    assert_protocol(&events);
    assert!(chat.requests()[0].messages[0].content.contains(DEFAULT_STYLE));
}

#[tokio::test]
async fn test_persona_style_applied() {
    let inner = blog_store().await;
    inner
        .add_persona(
            5,
            "alice",
            Persona {
                name: "Chef".to_string(),
                description: "warm and playful".to_string(),
            },
        )
        .unwrap();
    let store: Arc<dyn Store> = Arc::new(inner);
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = synthesizer(store, chat.clone());

    let mut request = ask("cook");
    request.speech_tone = Some(ToneSelector::Persona(5));
    collect_events(&synth, request).await;

    assert!(chat.requests()[0].messages[0]
        .content
        .contains("Chef: warm and playful"));
}

// ============ Validation and cancellation ============

#[tokio::test]
async fn test_blank_question_rejected_before_stream() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let synth = synthesizer(store, ScriptedChat::new(Script::Fragments(vec![])));

    match synth.start(ask("   ")) {
        Err(AskError::Validation(msg)) => assert!(msg.contains("question")),
        Err(other) => panic!("expected validation error, got {}", other),
        Ok(_) => panic!("blank question must be rejected"),
    }
}

#[tokio::test]
async fn test_disconnect_stops_generation() {
    let store: Arc<dyn Store> = Arc::new(blog_store().await);
    let chat = ScriptedChat::new(Script::Hang(vec![StreamFragment::Text("first".to_string())]));
    let synth = synthesizer(store, chat);

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let task = {
        let synth = synth.clone();
        tokio::spawn(async move { synth.run(ask("rust"), tx).await })
    };

    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_answer = matches!(event, AskEvent::Answer(_));
        seen.push(event);
        if is_answer {
            break;
        }
    }
    drop(rx);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("synthesizer kept running after disconnect")
        .unwrap();
    assert_eq!(seen.last(), Some(&AskEvent::Answer("first".to_string())));
    assert!(!seen.contains(&AskEvent::End));
}

#[tokio::test]
async fn test_disconnect_while_resolving_tone() {
    let store: Arc<dyn Store> = Arc::new(StallingStore {
        inner: blog_store().await,
    });
    let chat = ScriptedChat::new(Script::Fragments(vec![]));
    let synth = synthesizer(store, chat.clone());

    let mut request = ask("rust");
    request.speech_tone = Some(ToneSelector::Persona(5));
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let task = {
        let synth = synth.clone();
        tokio::spawn(async move { synth.run(request, tx).await })
    };

    assert!(matches!(rx.recv().await, Some(AskEvent::ExistInPostStatus(true))));
    assert!(matches!(rx.recv().await, Some(AskEvent::Context(_))));
    drop(rx);

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("synthesizer stayed blocked on persona lookup after disconnect")
        .unwrap();
    assert!(chat.requests().is_empty());
}

// ============ SQLite store ============

async fn sqlite_store(tmp: &TempDir) -> SqliteStore {
    let config = Config::with_db_path(tmp.path().join("data/blogqa.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

#[tokio::test]
async fn test_sqlite_ingest_and_replace() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    store
        .upsert_post(1, "alice", None, "Learning Rust", "")
        .await
        .unwrap();

    let chunking = ChunkingConfig {
        max_tokens: 8,
        overlap_tokens: 2,
        ..ChunkingConfig::default()
    };
    let body = "Rust is fast. Rust is safe. Rust has a borrow checker. Rust has cargo.";
    let report = ingest_content(&store, &KeywordEmbedder, tokenizer(), &chunking, 2, 1, body)
        .await
        .unwrap();
    assert!(report.chunk_count > 1);
    assert_eq!(store.chunk_count(1).await.unwrap(), report.chunk_count as i64);

    ingest_content(&store, &KeywordEmbedder, tokenizer(), &chunking, 2, 1, "Rust.")
        .await
        .unwrap();
    assert_eq!(store.chunk_count(1).await.unwrap(), 1);

    ingest_title(&store, &KeywordEmbedder, 1, "Learning Rust").await.unwrap();
    ingest_title(&store, &KeywordEmbedder, 1, "Cooking").await.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_title_embeddings")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(
        store.title_embedding(1).await.unwrap(),
        Some(vec![0.0, 1.0])
    );
}

#[tokio::test]
async fn test_sqlite_category_closure_and_candidates() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    store.insert_category(1, "alice", "Tech", None).await.unwrap();
    store.insert_category(2, "alice", "Rust", Some(1)).await.unwrap();
    store.insert_category(3, "alice", "Async", Some(2)).await.unwrap();
    store.insert_category(4, "bob", "Bob's", None).await.unwrap();

    assert_eq!(store.category_subtree("alice", 1).await.unwrap(), vec![1, 2, 3]);
    assert_eq!(store.category_subtree("alice", 2).await.unwrap(), vec![2, 3]);
    assert!(store.category_subtree("alice", 4).await.unwrap().is_empty());
    assert_eq!(
        store.category_names("alice").await.unwrap(),
        vec!["Async", "Rust", "Tech"]
    );

    store.upsert_post(10, "alice", Some(3), "Tokio", "").await.unwrap();
    store.upsert_post(11, "alice", Some(1), "Overview", "").await.unwrap();
    store.upsert_post(12, "bob", Some(4), "Bob post", "").await.unwrap();
    for post_id in [10, 11, 12] {
        let records = vec![ChunkRecord {
            post_id,
            chunk_index: 0,
            text: format!("chunk of {}", post_id),
            embedding: vec![1.0, 0.0],
        }];
        store.replace_chunks(post_id, &records).await.unwrap();
        store.upsert_title_embedding(post_id, &[0.0, 1.0]).await.unwrap();
    }

    let scoped = store
        .scoring_candidates("alice", &PostScope::Categories(vec![2, 3]))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].post_id, 10);
    assert_eq!(scoped[0].chunk_embedding, vec![1.0, 0.0]);
    assert_eq!(scoped[0].title_embedding, vec![0.0, 1.0]);

    let all = store
        .scoring_candidates("alice", &PostScope::All)
        .await
        .unwrap();
    let ids: Vec<i64> = all.iter().map(|c| c.post_id).collect();
    assert_eq!(ids, vec![10, 11]);

    let single = store
        .scoring_candidates("alice", &PostScope::Post(12))
        .await
        .unwrap();
    assert!(single.is_empty(), "other users' posts are never candidates");
}

#[tokio::test]
async fn test_sqlite_persona_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let persona = Persona {
        name: "Mentor".to_string(),
        description: "patient and encouraging".to_string(),
    };
    store.insert_persona(7, "alice", &persona).await.unwrap();

    assert_eq!(store.find_persona(7, "alice").await.unwrap(), Some(persona));
    assert_eq!(store.find_persona(7, "bob").await.unwrap(), None);
}

#[tokio::test]
async fn test_sqlite_backed_ask() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    store.insert_category(1, "alice", "Programming", None).await.unwrap();
    store
        .upsert_post(10, "alice", Some(1), "Learning Rust", "")
        .await
        .unwrap();
    ingest_title(&store, &KeywordEmbedder, 10, "Learning Rust").await.unwrap();
    ingest_content(
        &store,
        &KeywordEmbedder,
        tokenizer(),
        &ChunkingConfig {
            max_tokens: 64,
            overlap_tokens: 8,
            ..ChunkingConfig::default()
        },
        4,
        10,
        "Rust has ownership.",
    )
    .await
    .unwrap();

    let chat = ScriptedChat::new(Script::Fragments(vec![
        Ok(StreamFragment::Text("ok".to_string())),
        Ok(StreamFragment::Finish(FinishReason::Stop)),
    ]));
    let synth = synthesizer(Arc::new(store), chat);
    let events = collect_events(&synth, ask("Tell me about rust")).await;

    assert_protocol(&events);
    assert_eq!(events[0], AskEvent::ExistInPostStatus(true));
    assert_eq!(answers(&events), vec!["ok"]);
}

#[test]
fn test_event_names_follow_protocol() {
    let names: Vec<&str> = [
        AskEvent::ExistInPostStatus(true),
        AskEvent::Context(vec![]),
        AskEvent::Answer(String::new()),
        AskEvent::End,
    ]
    .iter()
    .map(AskEvent::name)
    .collect();
    assert_eq!(names, vec!["exist_in_post_status", "context", "answer", "end"]);
}
