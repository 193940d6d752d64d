mod common;

use std::time::Duration;

use semantic_ui_map::{
    CallError, Orchestrator, Outcome, UiAction, UiMapError,
    isolation::deadline::Deadline,
    memory::{
        cache::{StorageConfig, UiMemory},
        playbook::RecoveryPlaybook,
    },
    model::geometry::{BBox, Point},
    orchestrator::{budget::OrchestratorConfig, context::EngineState},
    resolver::spatial::BiasPolicy,
    trace::{audit::AuditLog, logger::TraceLogger},
};

use crate::common::{
    fakes::{Harness, SIGN_IN, USERNAME_LABEL, abs, login_elements, login_frame, raw, window},
    images::{blank, bordered},
};

fn timeout(call: &str) -> CallError {
    CallError::Timeout {
        call: call.into(),
        after: Duration::from_secs(5),
    }
}

// =========================================================================
// Happy paths
// =========================================================================

#[test]
fn resolve_scans_on_miss_and_returns_absolute_click_point() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    let target = orch
        .resolve(&window(), "sign_in", Deadline::none())
        .unwrap()
        .completed()
        .expect("sign_in should resolve");

    assert_eq!(target.element.id, "sign_in");
    assert_eq!(target.element.bbox, SIGN_IN, "Stored bbox is window-relative");
    assert_eq!(target.click_point, Point::new(300, 265), "Center plus window origin");
    assert!(!target.from_cache, "First request must scan");
    assert!(target.verification.passed);
    assert_eq!(h.backend.enumerate_calls(), 1);
}

#[test]
fn second_request_is_served_from_memory_without_scanning() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    orch.resolve(&window(), "sign_in", Deadline::none()).unwrap();
    let again = orch
        .resolve(&window(), "sign_in", Deadline::none())
        .unwrap()
        .completed()
        .expect("cached resolve");

    assert!(again.from_cache, "Second request should hit the cache");
    assert_eq!(h.backend.enumerate_calls(), 1, "No second enumeration");
    assert_eq!(h.recognizer.calls.load(std::sync::atomic::Ordering::SeqCst), 1, "No second OCR pass");
}

#[test]
fn recognition_engine_is_built_lazily_and_once() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());
    assert_eq!(orch.context().recognizer_state(), EngineState::Uninitialized);

    orch.scan(&window(), false, Deadline::none()).unwrap();
    orch.scan(&window(), true, Deadline::none()).unwrap();

    assert_eq!(orch.context().recognizer_state(), EngineState::Ready);
    assert_eq!(h.factory_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn label_resolves_to_its_paired_control() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    let target = orch
        .resolve(&window(), "username", Deadline::none())
        .unwrap()
        .completed()
        .expect("label should resolve through its pairing");

    assert_eq!(target.element.id, "input");
    assert_eq!(target.via_label.as_deref(), Some("username"));
    assert_eq!(target.requested, "username");
}

#[test]
fn act_clicks_exactly_once_and_records_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("journal.json");
    let h = Harness::login();
    let orch = Orchestrator::new(
        h.context()
            .with_audit(AuditLog::new(dir.path().join("audit")))
            .with_playbook(RecoveryPlaybook::load(&journal)),
    );

    let outcome = orch
        .act(&window(), "sign_in", UiAction::Click, Deadline::none())
        .unwrap();

    assert!(!outcome.is_escalated());
    assert_eq!(h.backend.clicks(), vec![Point::new(300, 265)]);

    let resumed = RecoveryPlaybook::load(&journal);
    assert_eq!(resumed.len(), 1, "Journal persisted one step");
    let instructions = resumed.resume_instructions();
    assert!(instructions.contains("sign_in"), "{}", instructions);
    assert!(instructions.contains("Login"), "{}", instructions);

    let audit = std::fs::read_to_string(dir.path().join("audit").join("audit_log.md")).unwrap();
    assert!(audit.contains("### Event: ACTION"), "{}", audit);
}

#[test]
fn type_action_clicks_then_types() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    orch.act(
        &window(),
        "username",
        UiAction::Type {
            text: "alice".into(),
        },
        Deadline::none(),
    )
    .unwrap();

    assert_eq!(h.backend.clicks(), vec![Point::new(320, 100)], "Input center in screen space");
    assert_eq!(h.backend.typed(), vec!["alice".to_string()]);
}

// =========================================================================
// Drift and verification
// =========================================================================

#[test]
fn drift_after_cache_hit_forces_rescan_and_clicks_new_position() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());
    orch.scan(&window(), false, Deadline::none()).unwrap();

    // Same title and size, but the button moved 30px right.
    h.backend.set_elements(login_elements(30));
    h.backend.set_frames(vec![login_frame(30)]);

    let target = orch
        .act(&window(), "sign_in", UiAction::Click, Deadline::none())
        .unwrap()
        .completed()
        .expect("rescan should find the moved button");

    assert_eq!(target.element.bbox, SIGN_IN.translate(30, 0));
    assert!(!target.from_cache);
    assert_eq!(h.backend.clicks(), vec![Point::new(330, 265)]);
    assert_eq!(h.backend.enumerate_calls(), 2, "Exactly one rescan");
}

#[test]
fn repeated_verification_failure_escalates_without_acting() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    // Every scan sees the button in place, every verification sees it moved.
    let mut frames = vec![];
    for _ in 0..3 {
        frames.push(login_frame(0));
        frames.push(login_frame(30));
    }
    h.backend.set_frames(frames);

    let outcome = orch
        .act(&window(), "sign_in", UiAction::Click, Deadline::none())
        .unwrap();

    let Outcome::Escalated(report) = outcome else {
        panic!("expected escalation");
    };
    assert!(report.reason.contains("verification"), "{}", report.reason);
    assert_eq!(report.requested.as_deref(), Some("sign_in"));
    assert!(h.backend.clicks().is_empty(), "A failed verification must block the click");
    assert_eq!(h.backend.enumerate_calls(), 3, "Initial scan plus two retries");
}

// =========================================================================
// Retry budget and escalation rules
// =========================================================================

#[test]
fn transient_scan_timeout_is_retried_not_escalated() {
    let h = Harness::login();
    h.backend.fail_captures(vec![timeout("capture")]);
    let orch = Orchestrator::new(h.context());

    let outcome = orch.resolve(&window(), "sign_in", Deadline::none()).unwrap();

    assert!(!outcome.is_escalated(), "First-attempt timeout must not escalate");
    assert_eq!(h.backend.capture_calls(), 3, "Failed scan, retried scan, verification");
}

#[test]
fn scan_failures_past_budget_escalate() {
    let h = Harness::login();
    h.backend.fail_captures(vec![timeout("capture"), timeout("capture"), timeout("capture")]);
    let orch = Orchestrator::new(h.context());

    let outcome = orch.resolve(&window(), "sign_in", Deadline::none()).unwrap();

    let Outcome::Escalated(report) = outcome else {
        panic!("expected escalation after exhausting scan retries");
    };
    assert!(report.reason.contains("scan kept failing"), "{}", report.reason);
    assert_eq!(h.backend.capture_calls(), 3);
}

#[test]
fn scan_retry_budget_is_configurable() {
    let h = Harness::login();
    h.backend.fail_captures(vec![timeout("capture")]);
    let orch = Orchestrator::new(h.context().with_orchestrator_config(OrchestratorConfig {
        scan_retries: 0,
        ..OrchestratorConfig::default()
    }));

    let outcome = orch.scan(&window(), false, Deadline::none()).unwrap();
    assert!(outcome.is_escalated(), "No retries allowed");
}

#[test]
fn backend_unavailable_fails_immediately() {
    let h = Harness::login();
    h.backend.fail_captures(vec![CallError::Unavailable {
        call: "capture".into(),
        reason: "no display".into(),
    }]);
    let orch = Orchestrator::new(h.context());

    let err = orch.resolve(&window(), "sign_in", Deadline::none()).unwrap_err();

    assert!(matches!(err, UiMapError::BackendUnavailable(_)), "{:?}", err);
    assert_eq!(h.backend.capture_calls(), 1, "Never retried");
}

#[test]
fn unknown_id_on_cache_hit_rescans_once_then_escalates() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());
    orch.scan(&window(), false, Deadline::none()).unwrap();

    let outcome = orch.resolve(&window(), "submit", Deadline::none()).unwrap();

    let Outcome::Escalated(report) = outcome else {
        panic!("expected escalation for unknown id");
    };
    assert!(report.reason.contains("no candidate"), "{}", report.reason);
    assert!(report.elements.iter().any(|e| e.id == "sign_in"), "Report lists the scene");
    assert_eq!(h.backend.enumerate_calls(), 2, "One stale-cache rescan");
}

#[test]
fn stale_cache_rescan_finds_new_element() {
    let h = Harness::login();
    h.recognizer.text.lock().clear();
    h.backend.set_elements(login_elements(0)[..2].to_vec());
    let orch = Orchestrator::new(h.context());
    orch.scan(&window(), false, Deadline::none()).unwrap();

    h.backend.set_elements(login_elements(0));
    let target = orch
        .resolve(&window(), "sign_in", Deadline::none())
        .unwrap()
        .completed()
        .expect("rescan should pick up the new button");

    assert_eq!(target.element.id, "sign_in");
    assert!(!target.from_cache);
}

#[test]
fn label_without_control_escalates() {
    let h = Harness::login();
    h.recognizer.text.lock().clear();
    h.backend
        .set_elements(vec![raw("text", abs(USERNAME_LABEL), Some("Username"))]);
    let orch = Orchestrator::new(h.context());

    let outcome = orch.resolve(&window(), "username", Deadline::none()).unwrap();

    assert!(outcome.is_escalated());
}

#[test]
fn exact_tie_is_ambiguous_when_policy_rejects_id_order() {
    let h = Harness::login();
    h.recognizer.text.lock().clear();
    let label = BBox::new(100, 100, 40, 20);
    h.backend.set_elements(vec![
        raw("text", abs(label), Some("Name")),
        raw("edit", abs(BBox::new(100, 140, 40, 20)), Some("A field")),
        raw("edit", abs(BBox::new(124, 132, 40, 20)), Some("B field")),
    ]);
    let mut img = blank(400, 300);
    bordered(&mut img, BBox::new(100, 140, 40, 20));
    h.backend.set_frames(vec![img]);

    let orch = Orchestrator::new(h.context().with_bias_policy(BiasPolicy {
        reject_id_order_ties: true,
        ..BiasPolicy::default()
    }));

    let err = orch.resolve(&window(), "name", Deadline::none()).unwrap_err();
    match err {
        UiMapError::AmbiguousResolution { id, candidates } => {
            assert_eq!(id, "name");
            assert_eq!(candidates, vec!["a_field".to_string(), "b_field".to_string()]);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
}

// =========================================================================
// Deadlines, action faults, persistence faults
// =========================================================================

#[test]
fn expired_deadline_is_reported_not_escalated() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    let err = orch
        .resolve(&window(), "sign_in", Deadline::after(Duration::ZERO))
        .unwrap_err();

    assert!(matches!(err, UiMapError::DeadlineExceeded { .. }), "{:?}", err);
    assert_eq!(h.backend.enumerate_calls(), 0);
}

#[cfg(unix)]
#[test]
fn deadline_tears_down_a_hung_helper() {
    use std::{sync::Arc, time::Instant};

    use semantic_ui_map::{
        UiMapContext,
        backend::helper::HelperBackend,
        isolation::watchdog::{HelperCommand, Watchdog},
    };

    let h = Harness::login();
    let backend = HelperBackend::new(
        Watchdog::new(Duration::from_millis(500)),
        HelperCommand::with_args("sh", ["-c", "exec sleep 30"]),
    );
    let memory = UiMemory::in_memory(&StorageConfig::default()).unwrap();
    let orch = Orchestrator::new(UiMapContext::new(Arc::new(backend), h.factory(), memory));
    let started = Instant::now();

    let err = orch
        .resolve(&window(), "sign_in", Deadline::after(Duration::from_secs(1)))
        .unwrap_err();

    assert!(matches!(err, UiMapError::DeadlineExceeded { .. }), "{:?}", err);
    assert!(
        started.elapsed() < Duration::from_millis(2500),
        "Returned after {:?}; capture timeout is 5s but the deadline is 1s",
        started.elapsed()
    );
}

#[test]
fn failed_action_is_never_retried() {
    let h = Harness::login();
    h.backend.fail_actions(CallError::Crash {
        call: "click".into(),
        reason: "input injection refused".into(),
    });
    let orch = Orchestrator::new(h.context());

    let err = orch
        .act(&window(), "sign_in", UiAction::Click, Deadline::none())
        .unwrap_err();

    assert!(matches!(err, UiMapError::ActionFailed { ref id, .. } if id == "sign_in"), "{:?}", err);
    assert_eq!(h.backend.clicks().len(), 1, "Exactly one attempt");
}

#[test]
fn broken_store_degrades_to_fresh_scan() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("ui.db");
    let config = StorageConfig {
        db_path: db.display().to_string(),
        ..StorageConfig::default()
    };
    let memory = UiMemory::open(&config).unwrap();
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("DROP TABLE ui_maps;")
        .unwrap();

    let h = Harness::login();
    let orch = Orchestrator::new(semantic_ui_map::UiMapContext::new(
        h.backend.clone(),
        h.factory(),
        memory,
    ));

    let outcome = orch.resolve(&window(), "sign_in", Deadline::none()).unwrap();
    assert!(!outcome.is_escalated(), "Storage faults must not fail the request");
    assert_eq!(h.backend.enumerate_calls(), 1);
}

#[test]
fn every_phase_step_is_traced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let h = Harness::login();
    let orch = Orchestrator::new(h.context().with_tracer(TraceLogger::new(&path)));

    orch.resolve(&window(), "sign_in", Deadline::none()).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let phases: Vec<&str> = events.iter().map(|e| e["phase"].as_str().unwrap()).collect();

    assert_eq!(
        phases,
        vec!["Idle", "CacheLookup", "Scanning", "Building", "Resolving", "Verifying", "Done"]
    );
    let request = &events[0]["request_id"];
    assert!(events.iter().all(|e| &e["request_id"] == request), "One request id per run");
    assert_eq!(events[2]["next_phase"], "Building");
    assert_eq!(events[4]["semantic_id"], "sign_in");
}

#[test]
fn invalidate_forces_next_request_to_scan() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());
    orch.scan(&window(), false, Deadline::none()).unwrap();

    orch.invalidate(&window(), Deadline::none()).unwrap();
    orch.scan(&window(), false, Deadline::none()).unwrap();

    assert_eq!(h.backend.enumerate_calls(), 2);
}

#[test]
fn scene_report_lists_every_element() {
    let h = Harness::login();
    let orch = Orchestrator::new(h.context());

    let report = orch.scene_report(&window(), Deadline::none()).unwrap();

    let ids: Vec<&str> = report.elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["forgot_password", "input", "sign_in", "username"]);
    assert_eq!(report.title.as_deref(), Some("Login"));
    let md = report.to_markdown();
    assert!(md.contains("| ID | Kind | Text | Confidence | BBox |"), "{}", md);
}
