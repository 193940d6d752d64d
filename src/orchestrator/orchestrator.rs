//! The sequencing authority: cache lookup, scan, build, resolve, verify, act.
//!
//! Each request runs its own small state machine. Every transition writes a
//! `TraceEvent`; terminal outcomes are a completed value, a typed error or an
//! escalation report.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    capture::{
        capture::{capture, capture_frame},
        recognition::recognize,
    },
    error::UiMapError,
    isolation::deadline::Deadline,
    model::{
        element::SemanticElement,
        fingerprint::WindowFingerprint,
        geometry::{Point, WindowHandle, WindowMeta, WindowRect},
        signals::{Capture, VisualDetection},
        ui_map::UiMap,
    },
    orchestrator::{
        budget::{BudgetDecision, RetryBudget},
        context::UiMapContext,
        escalation::SceneReport,
        state::{EscalationReason, Phase},
    },
    resolver::spatial::{Pairing, pair_strict},
    trace::{audit::AuditEvent, trace::TraceEvent},
    verify::{signature::sign_map, verifier::VerificationResult},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UiAction {
    Click,
    /// Click the element, then type into it.
    Type { text: String },
}

impl UiAction {
    pub fn name(&self) -> &'static str {
        match self {
            UiAction::Click => "click",
            UiAction::Type { .. } => "type",
        }
    }
}

/// A verified element plus where to click it right now.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTarget {
    pub requested: String,
    pub element: SemanticElement,
    /// Set when `requested` named a label and `element` is its control.
    pub via_label: Option<String>,
    pub window: WindowRect,
    /// Absolute screen coordinates of the element center.
    pub click_point: Point,
    pub fingerprint: WindowFingerprint,
    pub from_cache: bool,
    pub verification: VerificationResult,
}

#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Completed(T),
    Escalated(SceneReport),
}

impl<T> Outcome<T> {
    pub fn is_escalated(&self) -> bool {
        matches!(self, Outcome::Escalated(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Escalated(_) => None,
        }
    }
}

enum Goal {
    Map { force: bool },
    Resolve { id: String },
    Act { id: String, action: UiAction },
}

impl Goal {
    fn id(&self) -> Option<&str> {
        match self {
            Goal::Map { .. } => None,
            Goal::Resolve { id } | Goal::Act { id, .. } => Some(id),
        }
    }
}

struct Target {
    element: SemanticElement,
    via_label: Option<String>,
}

struct Verified {
    meta: WindowMeta,
    result: VerificationResult,
}

enum Finished {
    Map(Arc<UiMap>),
    Target(Box<ResolvedTarget>),
    Escalated(SceneReport),
}

/// Internal state with the data each phase hands to the next.
enum Step {
    Lookup,
    Hit(Arc<UiMap>),
    Scan,
    Build(Box<Capture>, Vec<VisualDetection>),
    Resolve(Arc<UiMap>, bool),
    Verify(Arc<UiMap>, Target, bool),
    Act(Arc<UiMap>, Target, Verified, UiAction, bool),
    Done(Finished),
    Escalate(EscalationReason),
}

impl Step {
    fn phase(&self) -> Phase {
        match self {
            Step::Lookup => Phase::CacheLookup,
            Step::Hit(_) => Phase::CacheHit,
            Step::Scan => Phase::Scanning,
            Step::Build(..) => Phase::Building,
            Step::Resolve(..) => Phase::Resolving,
            Step::Verify(..) => Phase::Verifying,
            Step::Act(..) => Phase::Acting,
            Step::Done(_) => Phase::Done,
            Step::Escalate(_) => Phase::Escalate,
        }
    }
}

pub struct Orchestrator {
    ctx: UiMapContext,
}

impl Orchestrator {
    pub fn new(ctx: UiMapContext) -> Self {
        Orchestrator { ctx }
    }

    pub fn context(&self) -> &UiMapContext {
        &self.ctx
    }

    /// Locate `semantic_id` in `window` and verify it is still where the map
    /// says, without acting on it.
    pub fn resolve(
        &self,
        window: &WindowHandle,
        semantic_id: &str,
        deadline: Deadline,
    ) -> Result<Outcome<ResolvedTarget>, UiMapError> {
        let goal = Goal::Resolve {
            id: semantic_id.to_string(),
        };
        into_target(Run::new(&self.ctx, window, deadline, goal).drive()?)
    }

    /// Resolve, verify and perform `action` exactly once.
    ///
    /// The deadline is honoured up to the moment the action is dispatched;
    /// after that the request runs to completion.
    pub fn act(
        &self,
        window: &WindowHandle,
        semantic_id: &str,
        action: UiAction,
        deadline: Deadline,
    ) -> Result<Outcome<ResolvedTarget>, UiMapError> {
        let goal = Goal::Act {
            id: semantic_id.to_string(),
            action,
        };
        into_target(Run::new(&self.ctx, window, deadline, goal).drive()?)
    }

    /// Current map for `window`, from memory unless `force` is set.
    pub fn scan(
        &self,
        window: &WindowHandle,
        force: bool,
        deadline: Deadline,
    ) -> Result<Outcome<Arc<UiMap>>, UiMapError> {
        match Run::new(&self.ctx, window, deadline, Goal::Map { force }).drive()? {
            Finished::Map(map) => Ok(Outcome::Completed(map)),
            Finished::Escalated(report) => Ok(Outcome::Escalated(report)),
            Finished::Target(_) => Err(UiMapError::Config(
                "map request finished with a resolved target".to_string(),
            )),
        }
    }

    /// Scene report of the current map, for an external reasoning agent.
    pub fn scene_report(&self, window: &WindowHandle, deadline: Deadline) -> Result<SceneReport, UiMapError> {
        match self.scan(window, false, deadline)? {
            Outcome::Escalated(report) => Ok(report),
            Outcome::Completed(map) => {
                let meta = self
                    .ctx
                    .backend
                    .window_meta(window, deadline.clip(self.ctx.capture_timeout(), "scene_report")?)
                    .ok();
                let report = SceneReport::new(meta.as_ref(), Some(&map), None, "requested on demand");
                self.ctx.audit.log_snapshot(&report.to_markdown(), AuditEvent::OnDemand);
                Ok(report)
            }
        }
    }

    /// Forget the map for whatever `window` currently shows.
    pub fn invalidate(&self, window: &WindowHandle, deadline: Deadline) -> Result<WindowFingerprint, UiMapError> {
        let meta = self
            .ctx
            .backend
            .window_meta(window, deadline.clip(self.ctx.capture_timeout(), "invalidate")?)?;
        let fingerprint = WindowFingerprint::of(&meta);
        self.ctx.memory.invalidate(&fingerprint)?;
        info!(window = %window, fingerprint = %fingerprint, "invalidated cached map");
        Ok(fingerprint)
    }
}

fn into_target(finished: Finished) -> Result<Outcome<ResolvedTarget>, UiMapError> {
    match finished {
        Finished::Target(target) => Ok(Outcome::Completed(*target)),
        Finished::Escalated(report) => Ok(Outcome::Escalated(report)),
        Finished::Map(_) => Err(UiMapError::Config(
            "element request finished without a target".to_string(),
        )),
    }
}

/// One request in flight.
struct Run<'a> {
    ctx: &'a UiMapContext,
    window: &'a WindowHandle,
    deadline: Deadline,
    goal: Goal,
    request_id: String,
    step: u64,
    budget: RetryBudget,
    fingerprint: Option<WindowFingerprint>,
    meta: Option<WindowMeta>,
    last_map: Option<Arc<UiMap>>,
}

impl<'a> Run<'a> {
    fn new(ctx: &'a UiMapContext, window: &'a WindowHandle, deadline: Deadline, goal: Goal) -> Self {
        Run {
            ctx,
            window,
            deadline,
            goal,
            request_id: Uuid::new_v4().to_string(),
            step: 0,
            budget: RetryBudget::new(&ctx.config),
            fingerprint: None,
            meta: None,
            last_map: None,
        }
    }

    fn drive(mut self) -> Result<Finished, UiMapError> {
        let mut step = self.go(Phase::Idle, Step::Lookup, "start", None);

        loop {
            step = match step {
                Step::Lookup => self.cache_lookup()?,
                Step::Hit(map) => self.cache_hit(map),
                Step::Scan => self.scanning()?,
                Step::Build(capture, detections) => self.building(*capture, detections),
                Step::Resolve(map, from_cache) => self.resolving(map, from_cache)?,
                Step::Verify(map, target, from_cache) => self.verifying(map, target, from_cache)?,
                Step::Act(map, target, verified, action, from_cache) => {
                    self.acting(map, target, verified, action, from_cache)?
                }
                Step::Done(finished) => {
                    self.trace(Phase::Done, None, "done", None);
                    return Ok(finished);
                }
                Step::Escalate(reason) => return Ok(Finished::Escalated(self.escalate(reason))),
            };
        }
    }

    fn cache_lookup(&mut self) -> Result<Step, UiMapError> {
        let timeout = self.deadline.clip(self.ctx.capture_timeout(), "cache_lookup")?;
        let meta = match self.ctx.backend.window_meta(self.window, timeout) {
            Ok(meta) => meta,
            Err(e) => return self.scan_failed(Phase::CacheLookup, e.into()),
        };
        let fingerprint = WindowFingerprint::of(&meta);
        self.fingerprint = Some(fingerprint.clone());
        self.meta = Some(meta);

        if matches!(self.goal, Goal::Map { force: true }) {
            return Ok(self.go(Phase::CacheLookup, Step::Scan, "forced_scan", None));
        }

        match self.ctx.memory.get(&fingerprint) {
            Ok(Some(map)) => Ok(self.go(Phase::CacheLookup, Step::Hit(map), "cache_hit", None)),
            Ok(None) => Ok(self.go(Phase::CacheLookup, Step::Scan, "cache_miss", None)),
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "map store unreadable; scanning instead");
                Ok(self.go(
                    Phase::CacheLookup,
                    Step::Scan,
                    "persistence_degraded",
                    Some(e.to_string()),
                ))
            }
        }
    }

    fn cache_hit(&mut self, map: Arc<UiMap>) -> Step {
        self.last_map = Some(map.clone());
        match self.goal {
            Goal::Map { .. } => self.go(Phase::CacheHit, Step::Done(Finished::Map(map)), "map_ready", None),
            _ => self.go(Phase::CacheHit, Step::Resolve(map, true), "resolve", None),
        }
    }

    fn scanning(&mut self) -> Result<Step, UiMapError> {
        match self.scan_once() {
            Ok((capture, detections)) => {
                let detail = format!(
                    "{} structural, {} visual",
                    capture.elements.len(),
                    detections.len()
                );
                Ok(self.go(
                    Phase::Scanning,
                    Step::Build(Box::new(capture), detections),
                    "scanned",
                    Some(detail),
                ))
            }
            Err(e) => self.scan_failed(Phase::Scanning, e),
        }
    }

    fn scan_once(&mut self) -> Result<(Capture, Vec<VisualDetection>), UiMapError> {
        let timeout = self.deadline.clip(self.ctx.capture_timeout(), "scanning")?;
        let captured = capture(self.ctx.backend.as_ref(), self.window, timeout)?;

        let engine = self.ctx.recognizer.get()?;
        let timeout = self.deadline.clip(self.ctx.recognition_timeout(), "recognition")?;
        let detections = recognize(engine.as_ref(), &captured.frame, &self.ctx.recognition, timeout)?;

        Ok((captured, detections))
    }

    /// Retry transient faults within the scan budget; everything else ends
    /// the request with the error itself.
    fn scan_failed(&mut self, from: Phase, err: UiMapError) -> Result<Step, UiMapError> {
        if !err.is_retryable() {
            self.trace(from, None, "failed", Some(err.to_string()));
            return Err(err);
        }

        match self.budget.charge_scan() {
            BudgetDecision::Retry => {
                warn!(error = %err, remaining = self.budget.scan_remaining(), "scan failed; retrying");
                Ok(self.go(from, Step::Scan, "retry_scan", Some(err.to_string())))
            }
            BudgetDecision::Exhausted(why) => {
                let reason = EscalationReason::ScanExhausted {
                    last: err.to_string(),
                };
                Ok(self.go(from, Step::Escalate(reason), why, Some(err.to_string())))
            }
        }
    }

    fn building(&mut self, captured: Capture, detections: Vec<VisualDetection>) -> Step {
        let fingerprint = WindowFingerprint::of(&captured.meta);
        let map = self.ctx.builder.build(
            &fingerprint,
            &captured.meta.rect,
            &captured.elements,
            &detections,
        );
        let map = sign_map(map, &captured.frame);

        let map = match self.ctx.memory.put(map.clone()) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "could not store map; using it uncached");
                Arc::new(map)
            }
        };

        self.fingerprint = Some(fingerprint);
        self.meta = Some(captured.meta);
        self.last_map = Some(map.clone());

        let detail = format!("{} elements", map.len());
        match self.goal {
            Goal::Map { .. } => self.go(Phase::Building, Step::Done(Finished::Map(map)), "map_ready", Some(detail)),
            _ => self.go(Phase::Building, Step::Resolve(map, false), "built", Some(detail)),
        }
    }

    fn resolving(&mut self, map: Arc<UiMap>, from_cache: bool) -> Result<Step, UiMapError> {
        let id = self.goal.id().unwrap_or_default().to_string();

        let Some(element) = map.get(&id) else {
            if from_cache && self.budget.take_stale_rescan() {
                info!(id = %id, "id missing from cached map; rescanning once");
                return Ok(self.go(Phase::Resolving, Step::Scan, "stale_cache_rescan", None));
            }
            return Ok(self.go(
                Phase::Resolving,
                Step::Escalate(EscalationReason::NoCandidate { id: id.clone() }),
                "unknown_id",
                None,
            ));
        };

        if !element.kind.is_label() {
            let target = Target {
                element: element.clone(),
                via_label: None,
            };
            return Ok(self.go(Phase::Resolving, Step::Verify(map, target, from_cache), "direct", None));
        }

        match pair_strict(&map, &id, &self.ctx.pairing) {
            Pairing::Paired(control_id) => match map.get(&control_id) {
                Some(control) => {
                    let target = Target {
                        element: control.clone(),
                        via_label: Some(id.clone()),
                    };
                    Ok(self.go(
                        Phase::Resolving,
                        Step::Verify(map.clone(), target, from_cache),
                        "paired",
                        Some(control_id),
                    ))
                }
                None => Ok(self.go(
                    Phase::Resolving,
                    Step::Escalate(EscalationReason::NoCandidate { id }),
                    "no_candidate",
                    None,
                )),
            },
            Pairing::Ambiguous(candidates) => {
                self.trace(Phase::Resolving, None, "ambiguous", Some(candidates.join(",")));
                Err(UiMapError::AmbiguousResolution { id, candidates })
            }
            Pairing::NoCandidate => Ok(self.go(
                Phase::Resolving,
                Step::Escalate(EscalationReason::NoCandidate { id }),
                "no_candidate",
                None,
            )),
        }
    }

    fn verifying(&mut self, map: Arc<UiMap>, target: Target, from_cache: bool) -> Result<Step, UiMapError> {
        let timeout = self.deadline.clip(self.ctx.capture_timeout(), "verifying")?;
        let id = target.element.id.clone();

        let failure = match capture_frame(self.ctx.backend.as_ref(), self.window, timeout) {
            Ok((meta, frame)) => {
                let fingerprint = WindowFingerprint::of(&meta);
                if &fingerprint != map.fingerprint() {
                    format!("window changed since the map was built (now {})", fingerprint)
                } else {
                    let result = self.ctx.verifier.verify(&target.element, &frame);
                    if result.passed {
                        self.meta = Some(meta.clone());
                        let verified = Verified { meta, result };
                        let next = match &self.goal {
                            Goal::Act { action, .. } => {
                                Step::Act(map, target, verified, action.clone(), from_cache)
                            }
                            goal => Step::Done(Finished::Target(Box::new(resolved(
                                goal, target, verified, &map, from_cache,
                            )))),
                        };
                        return Ok(self.go(Phase::Verifying, next, "verified", None));
                    }
                    result.reason.unwrap_or_else(|| "verification failed".to_string())
                }
            }
            Err(e) if e.is_retryable() => e.to_string(),
            Err(e) => {
                self.trace(Phase::Verifying, None, "failed", Some(e.to_string()));
                return Err(e);
            }
        };

        warn!(id = %id, reason = %failure, "verification failed; action blocked");
        self.ctx.audit.log_snapshot(
            &format!("Safety halt: `{}` failed verification: {}", id, failure),
            AuditEvent::SafetyHalt,
        );

        match self.budget.charge_verification() {
            BudgetDecision::Retry => Ok(self.go(
                Phase::Verifying,
                Step::Scan,
                "rescan_after_verification",
                Some(failure),
            )),
            BudgetDecision::Exhausted(why) => {
                let reason = EscalationReason::VerificationExhausted {
                    id: self.goal.id().unwrap_or(&id).to_string(),
                    last: failure.clone(),
                };
                Ok(self.go(Phase::Verifying, Step::Escalate(reason), why, Some(failure)))
            }
        }
    }

    fn acting(
        &mut self,
        map: Arc<UiMap>,
        target: Target,
        verified: Verified,
        action: UiAction,
        from_cache: bool,
    ) -> Result<Step, UiMapError> {
        // Last point at which the request can still be cancelled.
        if self.deadline.is_expired() {
            self.trace(Phase::Acting, None, "deadline_exceeded", None);
            return Err(UiMapError::DeadlineExceeded {
                phase: "acting".to_string(),
            });
        }

        let point = verified.meta.rect.to_absolute(target.element.bbox.center_point());
        let timeout = self.ctx.action_timeout();
        let id = target.element.id.clone();

        let dispatched = self.ctx.backend.click(point, timeout).and_then(|_| match &action {
            UiAction::Click => Ok(()),
            UiAction::Type { text } => self.ctx.backend.type_text(text, timeout),
        });

        if let Err(source) = dispatched {
            warn!(id = %id, error = %source, "action failed; not retrying");
            self.ctx.audit.log_snapshot(
                &format!("Action `{}` on `{}` failed: {}", action.name(), id, source),
                AuditEvent::SafetyHalt,
            );
            self.trace(Phase::Acting, None, "action_failed", Some(source.to_string()));
            return Err(UiMapError::ActionFailed { id, source });
        }

        info!(id = %id, action = action.name(), x = point.x, y = point.y, "action performed");
        if let Err(e) = self.ctx.playbook.lock().record_step(&id, &verified.meta.title, action.name()) {
            warn!(error = %e, "could not update recovery journal");
        }
        self.ctx.audit.log_snapshot(
            &format!(
                "Action: {} on `{}` at ({}, {}) in **{}**",
                action.name(),
                id,
                point.x,
                point.y,
                verified.meta.title
            ),
            AuditEvent::Action,
        );

        let target = resolved(&self.goal, target, verified, &map, from_cache);
        Ok(self.go(
            Phase::Acting,
            Step::Done(Finished::Target(Box::new(target))),
            action.name(),
            None,
        ))
    }

    fn escalate(&mut self, reason: EscalationReason) -> SceneReport {
        let report = SceneReport::new(
            self.meta.as_ref(),
            self.last_map.as_deref(),
            self.goal.id(),
            reason.to_string(),
        );

        warn!(reason = %reason, "escalating request");
        self.ctx.audit.log_snapshot(&report.to_markdown(), AuditEvent::Escalation);
        self.trace(Phase::Escalate, None, "escalated", Some(reason.to_string()));
        report
    }

    /// Trace the transition from `from` into `next` and return `next`.
    fn go(&mut self, from: Phase, next: Step, decision: &str, detail: Option<String>) -> Step {
        self.trace(from, Some(next.phase()), decision, detail);
        next
    }

    fn trace(&mut self, phase: Phase, next: Option<Phase>, decision: &str, detail: Option<String>) {
        debug!(
            request = %self.request_id,
            step = self.step,
            ?phase,
            ?next,
            decision,
            "phase step"
        );

        let mut event = TraceEvent::now(&self.request_id, self.step, phase)
            .with_fingerprint(self.fingerprint.as_ref())
            .with_semantic_id(self.goal.id())
            .with_decision(decision);
        if let Some(next) = next {
            event = event.with_next(next);
        }
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.ctx.tracer.log(&event);
        self.step += 1;
    }
}

fn resolved(goal: &Goal, target: Target, verified: Verified, map: &UiMap, from_cache: bool) -> ResolvedTarget {
    let window = verified.meta.rect;
    ResolvedTarget {
        requested: goal.id().unwrap_or(&target.element.id).to_string(),
        click_point: window.to_absolute(target.element.bbox.center_point()),
        element: target.element,
        via_label: target.via_label,
        window,
        fingerprint: map.fingerprint().clone(),
        from_cache,
        verification: verified.result,
    }
}
