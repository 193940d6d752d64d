use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{
    backend::{
        helper::{HelperBackend, HelperRecognizer},
        traits::{Backend, RecognitionEngine},
    },
    cli::config::AppConfig,
    error::UiMapError,
    isolation::{deadline::Deadline, watchdog::Watchdog},
    memory::{cache::UiMemory, playbook::RecoveryPlaybook},
    model::geometry::WindowHandle,
    orchestrator::{
        context::{RecognizerFactory, UiMapContext},
        escalation::SceneReport,
        orchestrator::{Orchestrator, Outcome, UiAction},
    },
    trace::{audit::AuditLog, logger::TraceLogger},
};

pub type CmdResult = Result<bool, Box<dyn std::error::Error>>;

// ============================================================================
// Context wiring
// ============================================================================

/// Wire helper-process collaborators, storage and trace sinks from config.
pub fn build_context(config: &AppConfig) -> Result<UiMapContext, UiMapError> {
    let watchdog = Watchdog::new(Duration::from_millis(config.watchdog.teardown_ms));

    let mut backend = HelperBackend::new(watchdog.clone(), config.helpers.backend.clone());
    if let Some(dir) = &config.helpers.scratch_dir {
        backend = backend.with_scratch_dir(dir);
    }
    let backend: Arc<dyn Backend> = Arc::new(backend);

    let recognizer_cmd = config.helpers.recognizer.clone();
    let scratch_dir = config.helpers.scratch_dir.clone();
    let factory: RecognizerFactory = Box::new(move || {
        let mut engine = HelperRecognizer::new(watchdog.clone(), recognizer_cmd.clone());
        if let Some(dir) = &scratch_dir {
            engine = engine.with_scratch_dir(dir);
        }
        Ok(Arc::new(engine) as Arc<dyn RecognitionEngine>)
    });

    let memory = UiMemory::open(&config.storage)?;

    Ok(UiMapContext::new(backend, factory, memory)
        .with_orchestrator_config(config.orchestrator.clone())
        .with_recognition_config(config.recognition.clone())
        .with_builder_config(config.builder.clone())
        .with_bias_policy(config.resolver.clone())
        .with_verifier_config(config.verifier.clone())
        .with_tracer(TraceLogger::new(&config.trace.trace_path))
        .with_audit(AuditLog::new(&config.trace.audit_dir))
        .with_playbook(RecoveryPlaybook::load(&config.trace.playbook_path)))
}

fn deadline_from(timeout_ms: Option<u64>) -> Deadline {
    match timeout_ms {
        Some(ms) => Deadline::after(Duration::from_millis(ms)),
        None => Deadline::none(),
    }
}

fn print_report(report: &SceneReport, format: &str) -> Result<(), serde_json::Error> {
    match format {
        "json" => println!("{}", report.to_json()?),
        _ => print!("{}", report.to_markdown()),
    }
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

/// Every `cmd_*` returns `Ok(false)` when the request was escalated.
pub fn cmd_scan(
    orchestrator: &Orchestrator,
    window: &str,
    force: bool,
    format: &str,
    timeout_ms: Option<u64>,
) -> CmdResult {
    let window = WindowHandle::new(window);
    match orchestrator.scan(&window, force, deadline_from(timeout_ms))? {
        Outcome::Completed(map) => {
            info!(elements = map.len(), fingerprint = %map.fingerprint(), "scan complete");
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(map.as_ref())?),
                _ => {
                    let report = SceneReport::new(None, Some(&map), None, "scan complete");
                    print!("{}", report.to_markdown());
                }
            }
            Ok(true)
        }
        Outcome::Escalated(report) => {
            print_report(&report, format)?;
            Ok(false)
        }
    }
}

pub fn cmd_resolve(orchestrator: &Orchestrator, window: &str, id: &str, timeout_ms: Option<u64>) -> CmdResult {
    let window = WindowHandle::new(window);
    match orchestrator.resolve(&window, id, deadline_from(timeout_ms))? {
        Outcome::Completed(target) => {
            println!("{}", serde_json::to_string_pretty(&target)?);
            Ok(true)
        }
        Outcome::Escalated(report) => {
            print_report(&report, "markdown")?;
            Ok(false)
        }
    }
}

pub fn cmd_act(
    orchestrator: &Orchestrator,
    window: &str,
    id: &str,
    text: Option<String>,
    timeout_ms: Option<u64>,
) -> CmdResult {
    let window = WindowHandle::new(window);
    let action = match text {
        Some(text) => UiAction::Type { text },
        None => UiAction::Click,
    };
    let name = action.name();

    match orchestrator.act(&window, id, action, deadline_from(timeout_ms))? {
        Outcome::Completed(target) => {
            println!(
                "{} on {} at ({}, {})",
                name, target.element.id, target.click_point.x, target.click_point.y
            );
            Ok(true)
        }
        Outcome::Escalated(report) => {
            print_report(&report, "markdown")?;
            Ok(false)
        }
    }
}

pub fn cmd_invalidate(orchestrator: &Orchestrator, window: &str) -> CmdResult {
    let fingerprint = orchestrator.invalidate(&WindowHandle::new(window), Deadline::none())?;
    println!("invalidated {}", fingerprint);
    Ok(true)
}

pub fn cmd_report(orchestrator: &Orchestrator, window: &str, format: &str) -> CmdResult {
    let report = orchestrator.scene_report(&WindowHandle::new(window), Deadline::none())?;
    print_report(&report, format)?;
    Ok(true)
}

/// Reads the journal only; needs no backend.
pub fn cmd_resume(config: &AppConfig) -> CmdResult {
    let playbook = RecoveryPlaybook::load(&config.trace.playbook_path);
    println!("{}", playbook.resume_instructions());
    Ok(true)
}
