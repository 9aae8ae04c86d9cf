use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use super::runtime::{Phase, PullProgress, SamplingOptions, StreamChunk, TextGenerator};
use crate::types::ChatMessage;

#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Probe,
    Load {
        model_id: String,
    },
    Generate {
        request_id: String,
        messages: Vec<ChatMessage>,
        options: SamplingOptions,
    },
    Interrupt,
    Reset,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Probe {
        available: bool,
        detail: String,
    },
    Loading {
        detail: String,
    },
    Progress {
        status: String,
        completed: Option<u64>,
        total: Option<u64>,
    },
    Ready {
        model_id: String,
    },
    Started {
        request_id: String,
    },
    Update {
        request_id: String,
        update: StreamUpdate,
    },
    Complete {
        request_id: String,
        text: String,
    },
    Failed {
        request_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub text: String,
    pub phase: Phase,
    pub tokens: u32,
    pub tokens_per_second: Option<f64>,
}

// The single task that owns the model runtime. Commands are processed in
// submission order, so generation is serialized here.
pub(crate) struct Worker {
    runtime: Box<dyn TextGenerator>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    stop: Arc<AtomicBool>,
    loaded: Option<String>,
}

impl Worker {
    pub(crate) fn new(
        runtime: Box<dyn TextGenerator>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            runtime,
            events,
            stop,
            loaded: None,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                WorkerCommand::Probe => self.handle_probe().await,
                WorkerCommand::Load { model_id } => self.handle_load(model_id).await,
                WorkerCommand::Generate {
                    request_id,
                    messages,
                    options,
                } => self.handle_generate(request_id, messages, options).await,
                // The stop flag is raised out-of-band by the engine so an
                // in-flight stream sees it; the command itself needs no work.
                WorkerCommand::Interrupt => {}
                WorkerCommand::Reset => self.stop.store(false, Ordering::Relaxed),
            }
        }
        debug!("model worker shutting down");
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    async fn handle_probe(&self) {
        match self.runtime.probe().await {
            Ok(detail) => self.emit(WorkerEvent::Probe {
                available: true,
                detail,
            }),
            Err(e) => self.emit(WorkerEvent::Probe {
                available: false,
                detail: format!("{e:#}"),
            }),
        }
    }

    async fn handle_load(&mut self, model_id: String) {
        if self.loaded.as_deref() == Some(model_id.as_str()) {
            self.emit(WorkerEvent::Ready { model_id });
            return;
        }
        // Switching models: the previous session is gone until reload finishes.
        self.loaded = None;

        self.emit(WorkerEvent::Loading {
            detail: format!("Loading model {model_id}..."),
        });
        let events = self.events.clone();
        let result = self
            .runtime
            .load(&model_id, &mut |p: PullProgress| {
                let _ = events.send(WorkerEvent::Progress {
                    status: p.status,
                    completed: p.completed,
                    total: p.total,
                });
            })
            .await;
        match result {
            Ok(()) => {
                self.loaded = Some(model_id.clone());
                self.emit(WorkerEvent::Ready { model_id });
            }
            Err(e) => self.emit(WorkerEvent::Failed {
                request_id: None,
                message: describe_load_failure(&format!("{e:#}")),
            }),
        }
    }

    async fn handle_generate(
        &mut self,
        request_id: String,
        messages: Vec<ChatMessage>,
        options: SamplingOptions,
    ) {
        self.stop.store(false, Ordering::Relaxed);
        self.emit(WorkerEvent::Started {
            request_id: request_id.clone(),
        });

        let events = self.events.clone();
        let stop = self.stop.clone();
        let rid = request_id.clone();
        let started = Instant::now();
        let mut tokens: u32 = 0;
        let mut on_chunk = move |chunk: StreamChunk| -> bool {
            tokens += 1;
            let elapsed = started.elapsed().as_secs_f64();
            let tokens_per_second = if tokens > 1 && elapsed > 0.0 {
                Some(f64::from(tokens) / elapsed)
            } else {
                None
            };
            let _ = events.send(WorkerEvent::Update {
                request_id: rid.clone(),
                update: StreamUpdate {
                    text: chunk.text,
                    phase: chunk.phase,
                    tokens,
                    tokens_per_second,
                },
            });
            !stop.load(Ordering::Relaxed)
        };

        let result = self
            .runtime
            .generate(&messages, &options, &mut on_chunk)
            .await;

        // An interrupted request must reject; partial text is never delivered.
        if self.stop.load(Ordering::Relaxed) {
            self.emit(WorkerEvent::Failed {
                request_id: Some(request_id),
                message: "generation interrupted".into(),
            });
            return;
        }
        match result {
            Ok(text) => self.emit(WorkerEvent::Complete { request_id, text }),
            Err(e) => self.emit(WorkerEvent::Failed {
                request_id: Some(request_id),
                message: describe_generation_failure(&format!("{e:#}")),
            }),
        }
    }
}

pub(crate) fn describe_load_failure(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("out of memory") || lower.contains("oom") || lower.contains("memory") {
        format!("Model loading failed: insufficient memory for this model. Try a smaller model. ({message})")
    } else if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("fetch")
        || lower.contains("dns")
    {
        format!("Model loading failed: could not fetch model assets. Check that the model runtime is reachable. ({message})")
    } else if lower.contains("shader")
        || lower.contains("gpu")
        || lower.contains("cuda")
        || lower.contains("vulkan")
    {
        format!("Model loading failed: GPU backend error. Generation may fall back to CPU. ({message})")
    } else {
        format!("Model loading failed: {message}")
    }
}

pub(crate) fn describe_generation_failure(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("out of memory") || lower.contains("oom") || lower.contains("memory") {
        format!("Model execution failed: out of memory during generation. Try a smaller model or shorter prompt. ({message})")
    } else if lower.contains("shader")
        || lower.contains("gpu")
        || lower.contains("cuda")
        || lower.contains("vulkan")
    {
        format!("Model execution failed: GPU error during generation. ({message})")
    } else {
        format!("Model execution failed: {message}")
    }
}
