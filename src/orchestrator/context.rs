//! Everything one engine instance needs, held explicitly.
//!
//! There is no process-wide state: the cache handle, tunables, trace sinks
//! and the recognition engine all live here and die with the context.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;

use crate::{
    backend::traits::{Backend, RecognitionEngine},
    builder::map_builder::{BuilderConfig, MapBuilder},
    capture::recognition::RecognitionConfig,
    error::UiMapError,
    memory::{cache::UiMemory, playbook::RecoveryPlaybook},
    orchestrator::budget::OrchestratorConfig,
    resolver::spatial::BiasPolicy,
    trace::{audit::AuditLog, logger::TraceLogger},
    verify::verifier::{VerifierConfig, VisualVerifier},
};

pub type RecognizerFactory =
    Box<dyn Fn() -> Result<Arc<dyn RecognitionEngine>, UiMapError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Recognition engine built on first use and then kept for the lifetime of
/// the owning context. Concurrent first callers wait on a single
/// construction; a failed construction leaves the engine uninitialized so a
/// later request can try again.
pub struct LazyRecognizer {
    factory: RecognizerFactory,
    cell: OnceCell<Arc<dyn RecognitionEngine>>,
    state: AtomicU8,
}

impl LazyRecognizer {
    pub fn new(factory: RecognizerFactory) -> Self {
        LazyRecognizer {
            factory,
            cell: OnceCell::new(),
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::Acquire) {
            READY => EngineState::Ready,
            INITIALIZING => EngineState::Initializing,
            _ => EngineState::Uninitialized,
        }
    }

    pub fn get(&self) -> Result<Arc<dyn RecognitionEngine>, UiMapError> {
        let engine = self.cell.get_or_try_init(|| {
            self.state.store(INITIALIZING, Ordering::Release);
            info!("initializing recognition engine");
            (self.factory)().inspect_err(|_| self.state.store(UNINITIALIZED, Ordering::Release))
        })?;
        self.state.store(READY, Ordering::Release);
        Ok(engine.clone())
    }
}

pub struct UiMapContext {
    pub(crate) config: OrchestratorConfig,
    pub(crate) recognition: RecognitionConfig,
    pub(crate) pairing: BiasPolicy,
    builder_config: BuilderConfig,
    pub(crate) builder: MapBuilder,
    pub(crate) verifier: VisualVerifier,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) recognizer: LazyRecognizer,
    pub(crate) memory: UiMemory,
    pub(crate) tracer: TraceLogger,
    pub(crate) audit: AuditLog,
    pub(crate) playbook: Mutex<RecoveryPlaybook>,
}

impl UiMapContext {
    /// Context with default tunables, no trace file, no audit log and an
    /// in-memory playbook.
    pub fn new(backend: Arc<dyn Backend>, recognizer: RecognizerFactory, memory: UiMemory) -> Self {
        UiMapContext {
            config: OrchestratorConfig::default(),
            recognition: RecognitionConfig::default(),
            pairing: BiasPolicy::default(),
            builder_config: BuilderConfig::default(),
            builder: MapBuilder::default(),
            verifier: VisualVerifier::default(),
            backend,
            recognizer: LazyRecognizer::new(recognizer),
            memory,
            tracer: TraceLogger::disabled(),
            audit: AuditLog::disabled(),
            playbook: Mutex::new(RecoveryPlaybook::in_memory()),
        }
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recognition_config(mut self, config: RecognitionConfig) -> Self {
        self.recognition = config;
        self
    }

    pub fn with_builder_config(mut self, config: BuilderConfig) -> Self {
        self.builder = MapBuilder::new(config.clone(), self.pairing.clone());
        self.builder_config = config;
        self
    }

    pub fn with_bias_policy(mut self, policy: BiasPolicy) -> Self {
        self.builder = MapBuilder::new(self.builder_config.clone(), policy.clone());
        self.pairing = policy;
        self
    }

    pub fn with_verifier_config(mut self, config: VerifierConfig) -> Self {
        self.verifier = VisualVerifier::new(config);
        self
    }

    pub fn with_tracer(mut self, tracer: TraceLogger) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_playbook(mut self, playbook: RecoveryPlaybook) -> Self {
        self.playbook = Mutex::new(playbook);
        self
    }

    pub fn memory(&self) -> &UiMemory {
        &self.memory
    }

    pub fn recognizer_state(&self) -> EngineState {
        self.recognizer.state()
    }

    /// Markdown instructions from the recovery journal.
    pub fn resume_instructions(&self) -> String {
        self.playbook.lock().resume_instructions()
    }

    pub(crate) fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.config.capture_timeout_ms)
    }

    pub(crate) fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.config.recognition_timeout_ms)
    }

    pub(crate) fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.config.action_timeout_ms)
    }
}
