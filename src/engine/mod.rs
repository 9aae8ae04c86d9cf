pub mod runtime;
mod worker;

pub use runtime::{OllamaRuntime, Phase, PullProgress, SamplingOptions, StreamChunk, TextGenerator};
pub use worker::StreamUpdate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::types::ChatMessage;
use worker::{Worker, WorkerCommand, WorkerEvent};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("LLM not initialized. Call load_model() first")]
    NotReady,
    #[error("{0}")]
    Load(String),
    #[error("{0}")]
    Generation(String),
    #[error("request interrupted")]
    Interrupted,
    #[error("service reset")]
    Reset,
    #[error("model worker is gone")]
    WorkerGone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready { model_id: String },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub ready: bool,
    pub loading: bool,
    pub backend: &'static str,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub enum LoadProgress {
    Message(String),
    Download {
        status: String,
        completed: Option<u64>,
        total: Option<u64>,
    },
    Ready,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system_prompt: Option<String>,
    pub sampling: SamplingOptions,
}

pub type StreamCallback = Box<dyn Fn(StreamUpdate) + Send + 'static>;
type LoadObserver = Box<dyn Fn(LoadProgress) + Send + 'static>;

struct PendingRequest {
    resolve: oneshot::Sender<Result<String, EngineError>>,
    on_chunk: Option<StreamCallback>,
}

struct EngineInner {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    // Only two mutators: the dispatch path inserts, the routing task removes.
    // The lock is never held across an await point.
    pending: Mutex<HashMap<String, PendingRequest>>,
    state: watch::Receiver<EngineState>,
    load_observer: Mutex<Option<LoadObserver>>,
    stop: Arc<AtomicBool>,
    backend: &'static str,
}

impl EngineInner {
    fn notify_load(&self, progress: LoadProgress) {
        if let Some(observer) = &*self.load_observer.lock().unwrap() {
            observer(progress);
        }
    }
}

/// Gateway over the background model worker. Construct one per process with
/// [`LlmEngine::init`] and clone the handle wherever it is needed; the worker
/// and routing tasks wind down when the last handle is dropped.
#[derive(Clone)]
pub struct LlmEngine {
    inner: Arc<EngineInner>,
}

impl LlmEngine {
    pub fn init(runtime: Box<dyn TextGenerator>) -> Self {
        let backend = runtime.name();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Unloaded);
        let stop = Arc::new(AtomicBool::new(false));

        tokio::spawn(Worker::new(runtime, event_tx, stop.clone()).run(command_rx));

        let inner = Arc::new(EngineInner {
            commands: command_tx,
            pending: Mutex::new(HashMap::new()),
            state: state_rx,
            load_observer: Mutex::new(None),
            stop,
            backend,
        });
        tokio::spawn(route_events(event_rx, state_tx, Arc::downgrade(&inner)));

        let engine = Self { inner };
        let _ = engine.inner.commands.send(WorkerCommand::Probe);
        engine
    }

    pub fn on_load_progress(&self, observer: impl Fn(LoadProgress) + Send + 'static) {
        *self.inner.load_observer.lock().unwrap() = Some(Box::new(observer));
    }

    /// Loads (or switches to) a model and resolves once the worker reports it
    /// ready. Load commands queue in order, so concurrent calls for the same
    /// model coalesce on the same ready transition.
    pub async fn load_model(&self, model_id: &str) -> Result<(), EngineError> {
        let mut state = self.inner.state.clone();
        state.mark_unchanged();
        self.inner
            .commands
            .send(WorkerCommand::Load {
                model_id: model_id.to_string(),
            })
            .map_err(|_| EngineError::WorkerGone)?;

        loop {
            state.changed().await.map_err(|_| EngineError::WorkerGone)?;
            let current = state.borrow_and_update().clone();
            match current {
                EngineState::Ready {
                    model_id: ready_model,
                } if ready_model == model_id => return Ok(()),
                EngineState::Error { message } => return Err(EngineError::Load(message)),
                _ => {}
            }
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, EngineError> {
        self.submit(prompt, None, options).await
    }

    pub async fn stream(
        &self,
        prompt: &str,
        on_chunk: StreamCallback,
        options: &GenerateOptions,
    ) -> Result<String, EngineError> {
        self.submit(prompt, Some(on_chunk), options).await
    }

    async fn submit(
        &self,
        prompt: &str,
        on_chunk: Option<StreamCallback>,
        options: &GenerateOptions,
    ) -> Result<String, EngineError> {
        if !self.status().ready {
            return Err(EngineError::NotReady);
        }

        let system = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];

        let request_id = uuid::Uuid::new_v4().to_string();
        let (resolve, resolved) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingRequest { resolve, on_chunk },
        );
        debug!(%request_id, "generation request queued");

        if self
            .inner
            .commands
            .send(WorkerCommand::Generate {
                request_id: request_id.clone(),
                messages,
                options: options.sampling.clone(),
            })
            .is_err()
        {
            self.inner.pending.lock().unwrap().remove(&request_id);
            return Err(EngineError::WorkerGone);
        }

        resolved.await.map_err(|_| EngineError::WorkerGone)?
    }

    /// Hard cancellation: rejects every pending request and stops the
    /// in-flight generation stream. No partial result is delivered.
    pub fn interrupt(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        self.fail_all(EngineError::Interrupted);
        let _ = self.inner.commands.send(WorkerCommand::Interrupt);
    }

    /// Soft reset: same caller-visible sweep as [`interrupt`](Self::interrupt)
    /// with a distinguishable error.
    pub fn reset(&self) {
        self.fail_all(EngineError::Reset);
        let _ = self.inner.commands.send(WorkerCommand::Reset);
    }

    pub fn status(&self) -> EngineStatus {
        let backend = self.inner.backend;
        match self.inner.state.borrow().clone() {
            EngineState::Unloaded | EngineState::Error { .. } => EngineStatus {
                ready: false,
                loading: false,
                backend,
                model: None,
            },
            EngineState::Loading => EngineStatus {
                ready: false,
                loading: true,
                backend,
                model: None,
            },
            EngineState::Ready { model_id } => EngineStatus {
                ready: true,
                loading: false,
                backend,
                model: Some(model_id),
            },
        }
    }

    fn fail_all(&self, error: EngineError) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.resolve.send(Err(error.clone()));
        }
    }
}

async fn route_events(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    state: watch::Sender<EngineState>,
    inner: Weak<EngineInner>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        match event {
            WorkerEvent::Probe { available, detail } => {
                if available {
                    info!(%detail, "model runtime available");
                } else {
                    warn!(%detail, "model runtime degraded; local generation may be slow or unavailable");
                }
            }
            WorkerEvent::Loading { detail } => {
                let _ = state.send(EngineState::Loading);
                inner.notify_load(LoadProgress::Message(detail));
            }
            WorkerEvent::Progress {
                status,
                completed,
                total,
            } => {
                inner.notify_load(LoadProgress::Download {
                    status,
                    completed,
                    total,
                });
            }
            WorkerEvent::Ready { model_id } => {
                info!(%model_id, "model ready");
                let _ = state.send(EngineState::Ready { model_id });
                inner.notify_load(LoadProgress::Ready);
            }
            WorkerEvent::Started { request_id } => {
                debug!(%request_id, "generation started");
            }
            WorkerEvent::Update { request_id, update } => {
                let pending = inner.pending.lock().unwrap();
                match pending.get(&request_id) {
                    Some(entry) => {
                        if let Some(on_chunk) = &entry.on_chunk {
                            on_chunk(update);
                        }
                    }
                    None => debug!(%request_id, "dropping update for unknown request"),
                }
            }
            WorkerEvent::Complete { request_id, text } => {
                let entry = inner.pending.lock().unwrap().remove(&request_id);
                match entry {
                    Some(entry) => {
                        let _ = entry.resolve.send(Ok(text));
                    }
                    None => debug!(%request_id, "dropping completion for unknown request"),
                }
            }
            WorkerEvent::Failed {
                request_id: Some(request_id),
                message,
            } => {
                let entry = inner.pending.lock().unwrap().remove(&request_id);
                match entry {
                    Some(entry) => {
                        let _ = entry.resolve.send(Err(EngineError::Generation(message)));
                    }
                    None => debug!(%request_id, "dropping error for unknown request"),
                }
            }
            WorkerEvent::Failed {
                request_id: None,
                message,
            } => {
                warn!(%message, "model load failed");
                let _ = state.send(EngineState::Error { message });
            }
        }
    }
    debug!("engine event router shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    enum GenBehavior {
        EchoTokens(Vec<&'static str>),
        FirstThenBlock(&'static str),
        BlockForever,
        DelayThen(Duration, &'static str),
    }

    struct StubRuntime {
        behavior: GenBehavior,
        fail_load: Option<&'static str>,
        load_calls: Arc<AtomicUsize>,
        generate_calls: Arc<AtomicUsize>,
    }

    impl StubRuntime {
        fn new(behavior: GenBehavior) -> Self {
            Self {
                behavior,
                fail_load: None,
                load_calls: Arc::new(AtomicUsize::new(0)),
                generate_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StubRuntime {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn probe(&self) -> Result<String> {
            Ok("stub runtime".into())
        }

        async fn load(
            &mut self,
            _model_id: &str,
            progress: &mut (dyn FnMut(PullProgress) + Send),
        ) -> Result<()> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = self.fail_load {
                anyhow::bail!("{message}");
            }
            progress(PullProgress {
                status: "downloading".into(),
                completed: Some(1),
                total: Some(2),
            });
            Ok(())
        }

        async fn generate(
            &mut self,
            _messages: &[ChatMessage],
            _options: &SamplingOptions,
            on_chunk: &mut (dyn FnMut(StreamChunk) -> bool + Send),
        ) -> Result<String> {
            let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                GenBehavior::EchoTokens(tokens) => {
                    let mut text = String::new();
                    for token in tokens {
                        text.push_str(token);
                        if !on_chunk(StreamChunk {
                            text: (*token).to_string(),
                            phase: Phase::Answering,
                        }) {
                            break;
                        }
                    }
                    Ok(text)
                }
                GenBehavior::FirstThenBlock(text) => {
                    if call == 0 {
                        Ok((*text).to_string())
                    } else {
                        std::future::pending().await
                    }
                }
                GenBehavior::BlockForever => std::future::pending().await,
                GenBehavior::DelayThen(delay, text) => {
                    tokio::time::sleep(*delay).await;
                    Ok((*text).to_string())
                }
            }
        }
    }

    fn ready_engine_with(behavior: GenBehavior) -> (LlmEngine, Arc<AtomicUsize>) {
        let stub = StubRuntime::new(behavior);
        let generate_calls = stub.generate_calls.clone();
        (LlmEngine::init(Box::new(stub)), generate_calls)
    }

    #[tokio::test]
    async fn generate_before_load_rejects_without_dispatch() {
        let (engine, generate_calls) =
            ready_engine_with(GenBehavior::EchoTokens(vec!["never"]));

        let err = engine
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotReady);

        tokio::task::yield_now().await;
        assert_eq!(generate_calls.load(Ordering::SeqCst), 0);
        assert!(engine.inner.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_then_generate_returns_full_text() {
        let (engine, _) = ready_engine_with(GenBehavior::EchoTokens(vec!["Hello ", "world"]));
        engine.load_model("test-model").await.unwrap();

        let status = engine.status();
        assert!(status.ready);
        assert_eq!(status.model.as_deref(), Some("test-model"));
        assert_eq!(status.backend, "stub");

        let text = engine
            .generate("hi", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "Hello world");
        assert!(engine.inner.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_routes_chunks_to_the_callback_in_order() {
        let (engine, _) = ready_engine_with(GenBehavior::EchoTokens(vec!["a", "b", "c"]));
        engine.load_model("test-model").await.unwrap();

        let seen: Arc<Mutex<Vec<StreamUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let text = engine
            .stream(
                "hi",
                Box::new(move |update| sink.lock().unwrap().push(update)),
                &GenerateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(text, "abc");
        let seen = seen.lock().unwrap();
        let texts: Vec<&str> = seen.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(seen.last().unwrap().tokens, 3);
    }

    #[tokio::test]
    async fn concurrent_requests_are_tracked_independently() {
        let (engine, _) = ready_engine_with(GenBehavior::FirstThenBlock("first done"));
        engine.load_model("test-model").await.unwrap();

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate("one", &GenerateOptions::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate("two", &GenerateOptions::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = timeout(Duration::from_secs(1), first)
            .await
            .expect("first request should resolve")
            .unwrap();
        assert_eq!(first.unwrap(), "first done");

        // The second request is still pending and still tracked.
        assert_eq!(engine.inner.pending.lock().unwrap().len(), 1);
        engine.interrupt();
        let second = timeout(Duration::from_secs(1), second)
            .await
            .expect("interrupt should reject the pending request")
            .unwrap();
        assert_eq!(second.unwrap_err(), EngineError::Interrupted);
    }

    #[tokio::test]
    async fn interrupt_rejects_all_pending_and_clears_the_map() {
        let (engine, _) = ready_engine_with(GenBehavior::BlockForever);
        engine.load_model("test-model").await.unwrap();

        let spawn_generate = |prompt: &'static str| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.generate(prompt, &GenerateOptions::default()).await })
        };
        let first = spawn_generate("one");
        let second = spawn_generate("two");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.inner.pending.lock().unwrap().len(), 2);

        engine.interrupt();
        assert_eq!(first.await.unwrap().unwrap_err(), EngineError::Interrupted);
        assert_eq!(second.await.unwrap().unwrap_err(), EngineError::Interrupted);
        assert!(engine.inner.pending.lock().unwrap().is_empty());

        // Lifecycle state is unaffected by cancellation.
        assert!(engine.status().ready);
    }

    #[tokio::test]
    async fn reset_rejects_with_a_distinguishable_error() {
        let (engine, _) = ready_engine_with(GenBehavior::BlockForever);
        engine.load_model("test-model").await.unwrap();

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate("one", &GenerateOptions::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.reset();
        assert_eq!(pending.await.unwrap().unwrap_err(), EngineError::Reset);
    }

    #[tokio::test]
    async fn late_completion_after_interrupt_is_dropped_silently() {
        let (engine, _) =
            ready_engine_with(GenBehavior::DelayThen(Duration::from_millis(50), "late"));
        engine.load_model("test-model").await.unwrap();

        let request = tokio::spawn({
            let engine = engine.clone();
            async move { engine.generate("one", &GenerateOptions::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.interrupt();
        assert_eq!(request.await.unwrap().unwrap_err(), EngineError::Interrupted);

        // The worker finishes the in-flight generation later; its event has no
        // matching entry and must not disturb anything.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.inner.pending.lock().unwrap().is_empty());
        assert!(engine.status().ready);
    }

    #[tokio::test]
    async fn load_failure_reports_categorized_error_and_blocks_generation() {
        let mut stub = StubRuntime::new(GenBehavior::BlockForever);
        stub.fail_load = Some("connection refused (os error 111)");
        let engine = LlmEngine::init(Box::new(stub));

        let err = engine.load_model("test-model").await.unwrap_err();
        match err {
            EngineError::Load(message) => {
                assert!(message.contains("could not fetch model assets"))
            }
            other => panic!("expected load error, got {other:?}"),
        }
        assert!(!engine.status().ready);
        assert_eq!(
            engine
                .generate("hi", &GenerateOptions::default())
                .await
                .unwrap_err(),
            EngineError::NotReady
        );
    }

    #[tokio::test]
    async fn load_progress_is_forwarded_to_the_observer() {
        let (engine, _) = ready_engine_with(GenBehavior::BlockForever);
        let seen: Arc<Mutex<Vec<LoadProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.on_load_progress(move |progress| sink.lock().unwrap().push(progress));

        engine.load_model("test-model").await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(matches!(seen.first(), Some(LoadProgress::Message(_))));
        assert!(seen
            .iter()
            .any(|p| matches!(p, LoadProgress::Download { completed: Some(1), .. })));
        assert!(matches!(seen.last(), Some(LoadProgress::Ready)));
    }

    #[tokio::test]
    async fn switching_models_reloads_and_same_model_does_not() {
        let stub = StubRuntime::new(GenBehavior::BlockForever);
        let load_calls = stub.load_calls.clone();
        let engine = LlmEngine::init(Box::new(stub));

        engine.load_model("model-a").await.unwrap();
        engine.load_model("model-a").await.unwrap();
        assert_eq!(load_calls.load(Ordering::SeqCst), 1);

        engine.load_model("model-b").await.unwrap();
        assert_eq!(load_calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.status().model.as_deref(), Some("model-b"));
    }
}
