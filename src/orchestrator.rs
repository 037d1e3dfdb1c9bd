//! The guidance loop: capture, propose, map, present, confirm, propose again.
//!
//! One [`Orchestrator`] owns the session and consumes a single inbound channel. Slow work (frame
//! capture, service calls, timers, element lookups) runs in spawned tasks that report back through
//! the same channel, so the state machine is only ever touched from [`Orchestrator::dispatch`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::classifier::{InputEvent, Verdict};
use crate::error::{ConfigurationError, EngineError, IntrospectionError};
use crate::history::{HistoryLog, TurnRecord};
use crate::proposal::{
    AskMode, PlanRequest, ProposedStep, Proposer, ReasonerPlan, filter_batch, propose_for_call,
};
use crate::session::{ActionSession, Advance, BatchEntry, Completion, InputOutcome, PresentOptions, Presentation};
use crate::types::{
    ActionKind, Callout, DisplayInfo, Frame, HIGHLIGHT_COLOR, Point, Rect, Role, TASK_COMPLETED_MARKER,
};

pub const CRITERIA_MET: &str = "Action Criteria Met";
pub const CRITERIA_NOT_MET: &str = "Action Criteria Was not met";
pub const COMPLETED_NOTE: &str = "User Completed The Action";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub settle_before_capture: Duration,
    pub fresh_frame_wait: Duration,
    pub wait_action: Duration,
    pub post_completion_pause: Duration,
    pub auto_continue_delay: Duration,
    pub manual_reask_delay: Duration,
    pub fade_out: Duration,
    pub pointer_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_before_capture: Duration::from_millis(200),
            fresh_frame_wait: Duration::from_millis(600),
            wait_action: Duration::from_millis(2000),
            post_completion_pause: Duration::from_millis(1000),
            auto_continue_delay: Duration::from_millis(2000),
            manual_reask_delay: Duration::from_millis(2000),
            fade_out: Duration::from_millis(220),
            pointer_backoff: Duration::from_millis(400),
        }
    }
}

impl Timings {
    /// Every delay zeroed.
    pub fn immediate() -> Self {
        Self {
            settle_before_capture: Duration::ZERO,
            fresh_frame_wait: Duration::ZERO,
            wait_action: Duration::ZERO,
            post_completion_pause: Duration::ZERO,
            auto_continue_delay: Duration::ZERO,
            manual_reask_delay: Duration::ZERO,
            fade_out: Duration::ZERO,
            pointer_backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AskRequest {
    pub question: String,
    pub mode: Option<AskMode>,
    /// Asked by the engine, not typed by the user.
    pub auto: bool,
    /// Fall back to the previous question when `question` is empty.
    pub reuse_last: bool,
    pub user_status: Option<String>,
    /// Extra pause before capturing.
    pub delay: Duration,
}

impl AskRequest {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            mode: None,
            auto: false,
            reuse_last: false,
            user_status: None,
            delay: Duration::ZERO,
        }
    }

    pub fn auto_continue(delay: Duration) -> Self {
        Self {
            auto: true,
            user_status: Some(CRITERIA_MET.to_string()),
            delay,
            ..Self::question("")
        }
    }

    pub fn reask(delay: Duration) -> Self {
        Self {
            auto: true,
            reuse_last: true,
            delay,
            ..Self::question("")
        }
    }

    pub fn with_mode(mut self, mode: AskMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// `None` when there is nothing to ask.
fn resolve_question(request: &AskRequest, last: Option<&str>) -> Option<String> {
    let typed = request.question.trim();
    if !typed.is_empty() {
        return Some(typed.to_string());
    }
    if request.mode.is_some() || request.reuse_last {
        if let Some(last) = last {
            return Some(last.to_string());
        }
    }
    request.auto.then(String::new)
}

/// Everything a cycle produced before it touched the session.
#[derive(Debug)]
pub struct CycleOutcome {
    pub question: String,
    pub frame: Arc<Frame>,
    pub plan: ReasonerPlan,
    pub steps: Vec<ProposedStep>,
    pub reasoner_ms: u64,
}

#[derive(Debug)]
pub enum Inbound {
    Ask(AskRequest),
    Input(InputEvent),
    /// The shell's Next button.
    Next,
    /// The shell's "done" button.
    TaskCompleted,
    DisplaySelected(DisplayInfo),
    DisplayCleared,
    Reset,
    CycleFinished {
        epoch: u64,
        outcome: Box<Result<CycleOutcome, EngineError>>,
    },
    Scheduled {
        epoch: u64,
        request: AskRequest,
    },
    WaitElapsed {
        generation: u64,
    },
    FadeElapsed {
        generation: u64,
    },
    HighlightResolved {
        generation: u64,
        rect: Rect,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTone {
    Default,
    Success,
    Error,
}

/// Outbound commands for the presentation shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ShellEvent {
    Callout(Callout),
    Highlight { rect: Option<Rect>, color: String },
    Loading { active: bool },
    Status { message: String, tone: StatusTone },
    Chat { role: Role, text: String },
    TaskComplete,
}

impl ShellEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ShellEvent::Callout(_) => "callout",
            ShellEvent::Highlight { .. } => "highlight",
            ShellEvent::Loading { .. } => "loading",
            ShellEvent::Status { .. } => "status",
            ShellEvent::Chat { .. } => "chat",
            ShellEvent::TaskComplete => "task_complete",
        }
    }

    fn status(message: impl Into<String>, tone: StatusTone) -> Self {
        ShellEvent::Status {
            message: message.into(),
            tone,
        }
    }

    fn chat(role: Role, text: impl Into<String>) -> Self {
        ShellEvent::Chat {
            role,
            text: text.into(),
        }
    }

    fn highlight(rect: Option<Rect>) -> Self {
        ShellEvent::Highlight {
            rect,
            color: HIGHLIGHT_COLOR.to_string(),
        }
    }
}

/// Source of captured frames of the shared display.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// A frame captured after this call, or the latest one once `wait` has passed.
    async fn fresh_frame(&self, wait: Duration) -> Result<Arc<Frame>, ConfigurationError>;
}

/// Platform helper that finds the UI element under a physical point.
#[async_trait]
pub trait ElementProbe: Send + Sync {
    async fn element_at(&self, point: Point) -> Result<Option<Rect>, IntrospectionError>;
}

/// Probe for platforms without an introspection helper.
pub struct NoProbe;

#[async_trait]
impl ElementProbe for NoProbe {
    async fn element_at(&self, _point: Point) -> Result<Option<Rect>, IntrospectionError> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct Services {
    pub proposer: Arc<dyn Proposer>,
    pub frames: Arc<dyn FrameSource>,
    pub probe: Arc<dyn ElementProbe>,
}

pub struct Orchestrator {
    session: ActionSession,
    services: Services,
    display: Option<DisplayInfo>,
    history: HistoryLog,
    shell: broadcast::Sender<ShellEvent>,
    inbound: mpsc::Sender<Inbound>,
    timings: Timings,
    in_flight: bool,
    last_question: Option<String>,
    epoch: u64,
}

impl Orchestrator {
    pub fn new(
        services: Services,
        history: HistoryLog,
        shell: broadcast::Sender<ShellEvent>,
        inbound: mpsc::Sender<Inbound>,
        timings: Timings,
    ) -> Self {
        Self {
            session: ActionSession::new(),
            services,
            display: None,
            history,
            shell,
            inbound,
            timings,
            in_flight: false,
            last_question: None,
            epoch: 0,
        }
    }

    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(message) = inbound.recv().await {
            self.dispatch(message);
        }
        debug!("inbound channel closed; orchestrator stopping");
    }

    pub fn session(&self) -> &ActionSession {
        &self.session
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn display(&self) -> Option<&DisplayInfo> {
        self.display.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_question(&self) -> Option<&str> {
        self.last_question.as_deref()
    }

    pub fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Ask(request) => self.ask(request),
            Inbound::Input(event) => self.input(&event),
            Inbound::Next => self.next(),
            Inbound::TaskCompleted => self.complete_task(),
            Inbound::DisplaySelected(selected) => {
                info!(id = ?selected.id, scale = selected.scale(), "display selected");
                self.display = Some(selected);
                self.emit(ShellEvent::status("Screen sharing active.", StatusTone::Success));
            }
            Inbound::DisplayCleared => {
                self.display = None;
                if let Some(faded) = self.session.mark_not_met() {
                    self.fade(faded);
                }
                self.emit(ShellEvent::highlight(None));
            }
            Inbound::Reset => self.reset(),
            Inbound::CycleFinished { epoch, outcome } => self.finish_cycle(epoch, *outcome),
            Inbound::Scheduled { epoch, request } => {
                if epoch == self.epoch {
                    self.ask(request);
                } else {
                    debug!(epoch, current = self.epoch, "dropping stale scheduled ask");
                }
            }
            Inbound::WaitElapsed { generation } => {
                let waiting = self
                    .session
                    .pending_action()
                    .is_some_and(|action| action.kind == ActionKind::Wait);
                if waiting && generation == self.session.generation() {
                    if let Some(completion) = self.session.mark_met() {
                        self.complete_step(completion, "Wait complete.");
                    }
                }
            }
            Inbound::FadeElapsed { generation } => {
                if generation == self.session.generation() && !self.session.has_pending() {
                    self.emit(ShellEvent::Callout(Callout::hidden()));
                }
            }
            Inbound::HighlightResolved { generation, rect } => {
                if self.session.set_target_rect(generation, rect) {
                    self.emit(ShellEvent::highlight(Some(rect)));
                }
            }
        }
    }

    fn emit(&self, event: ShellEvent) {
        // No subscribers is fine: the shell may not be connected yet.
        let _ = self.shell.send(event);
    }

    fn schedule(&self, after: Duration, message: Inbound) {
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            let _ = inbound.send(message).await;
        });
    }

    fn fade(&self, faded: Callout) {
        self.emit(ShellEvent::Callout(faded));
        self.schedule(
            self.timings.fade_out,
            Inbound::FadeElapsed {
                generation: self.session.generation(),
            },
        );
    }

    fn report_error(&self, err: &EngineError) {
        error!(error = %err, "guidance cycle failed");
        self.emit(ShellEvent::status(err.to_string(), StatusTone::Error));
        self.emit(ShellEvent::chat(Role::Assistant, err.to_string()));
    }

    fn ask(&mut self, request: AskRequest) {
        let Some(question) = resolve_question(&request, self.last_question.as_deref()) else {
            self.emit(ShellEvent::status("Type a question before asking.", StatusTone::Error));
            return;
        };
        if self.in_flight {
            debug!("cycle already in flight; dropping ask");
            return;
        }

        let mut user_status = request.user_status.clone();
        let mut faded = false;
        if self.session.has_pending() {
            if let Some(callout) = self.session.mark_not_met() {
                self.fade(callout);
                faded = true;
            }
            self.emit(ShellEvent::highlight(None));
            user_status = Some(CRITERIA_NOT_MET.to_string());
            if !question.is_empty() {
                self.history.note(&format!("User input: {question}"));
            }
        }
        if !request.auto && !question.is_empty() {
            self.emit(ShellEvent::chat(Role::User, question.clone()));
        }

        if self.display.is_none() {
            self.report_error(&EngineError::from(ConfigurationError::NoDisplay));
            return;
        }

        self.in_flight = true;
        self.epoch += 1;
        if !question.is_empty() {
            self.last_question = Some(question.clone());
        }
        self.emit(ShellEvent::Loading { active: true });
        self.emit(ShellEvent::status("Sending question...", StatusTone::Default));
        if !faded {
            self.emit(ShellEvent::Callout(Callout::hidden()));
        }

        self.session.push_conversation(Role::User, &question);
        let plan_request = PlanRequest {
            user_message: question,
            conversation_history: self.session.conversation().to_vec(),
            allow_parallel_pinpoint: true,
            last_cua_suggestion: self.session.last_summary().map(str::to_string),
            mode: request.mode,
            user_status,
        };
        info!(
            epoch = self.epoch,
            auto = request.auto,
            mode = ?request.mode,
            "starting guidance cycle"
        );

        let epoch = self.epoch;
        let services = self.services.clone();
        let timings = self.timings;
        let inbound = self.inbound.clone();
        let delay = request.delay;
        let cycle =
            tokio::spawn(async move { run_cycle(plan_request, delay, &services, timings).await });
        // The single-flight flag only clears on CycleFinished, so a panicking cycle still reports.
        tokio::spawn(async move {
            let outcome = match cycle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(epoch, error = %e, "guidance cycle task died");
                    Err(EngineError::Aborted(e.to_string()))
                }
            };
            let _ = inbound
                .send(Inbound::CycleFinished {
                    epoch,
                    outcome: Box::new(outcome),
                })
                .await;
        });
    }

    fn finish_cycle(&mut self, epoch: u64, outcome: Result<CycleOutcome, EngineError>) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "discarding result of an abandoned cycle");
            return;
        }
        self.in_flight = false;
        self.emit(ShellEvent::Loading { active: false });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_error(&err);
                return;
            }
        };
        if let Err(err) = self.apply(outcome) {
            self.report_error(&err);
        }
    }

    fn apply(&mut self, outcome: CycleOutcome) -> Result<(), EngineError> {
        let CycleOutcome {
            question,
            frame,
            plan,
            steps,
            reasoner_ms,
        } = outcome;
        let task_completed = plan.task_completed();

        if let Some(answer) = plan.answer.as_deref().filter(|a| !a.trim().is_empty()) {
            self.session.push_conversation(Role::Assistant, answer);
            let visible = answer.replace(TASK_COMPLETED_MARKER, "");
            let visible = visible.trim();
            if !visible.is_empty() {
                self.emit(ShellEvent::chat(Role::Assistant, visible));
            }
        }

        let presentation = if task_completed {
            None
        } else if plan.cua_calls.is_empty() || steps.is_empty() {
            plan.callout_text()
                .map(|text| self.session.present_callout(text, plan.tone()))
        } else {
            let display = self.display.clone().ok_or(ConfigurationError::NoDisplay)?;
            let entries = steps
                .iter()
                .map(|step| BatchEntry {
                    proposal: step.proposal.clone(),
                    options: PresentOptions {
                        kind_override: None,
                        callout_text: plan.text_for(&step.call),
                        tone: plan.tone(),
                    },
                })
                .collect();
            self.session.present_batch(entries, &display, Arc::clone(&frame))?
        };

        let kind = presentation.as_ref().map(|p| p.kind);
        let summary = presentation.as_ref().and_then(|p| p.summary.clone());
        if let Some(presentation) = presentation {
            self.show(presentation);
        }

        self.history.record_turn(
            TurnRecord {
                id: uuid::Uuid::new_v4(),
                question: if question.is_empty() {
                    "(auto)".to_string()
                } else {
                    question
                },
                frame_id: frame.id,
                frame_width: frame.width,
                frame_height: frame.height,
                screenshot: None,
                answer: plan.answer.clone(),
                action_kind: kind,
                action_summary: summary,
                reasoner_ms,
                pointer_ms: steps.iter().flat_map(|s| s.durations_ms.iter().copied()).collect(),
                recorded_at: chrono::Utc::now(),
            },
            Some(Arc::clone(&frame)),
        );

        if task_completed {
            self.emit(ShellEvent::status("Task Completed", StatusTone::Success));
            self.emit(ShellEvent::TaskComplete);
            return Ok(());
        }
        let status = match kind {
            Some(ActionKind::Wait) => ("Waiting...", StatusTone::Default),
            Some(ActionKind::Callout) => ("Callout shown.", StatusTone::Default),
            Some(kind) if kind.requires_pointer() => {
                ("Pointer ready. Follow the highlight.", StatusTone::Success)
            }
            Some(_) => ("Follow the instruction, then press Next.", StatusTone::Default),
            None => ("No guidance for this step.", StatusTone::Default),
        };
        self.emit(ShellEvent::status(status.0, status.1));
        Ok(())
    }

    fn show(&mut self, presentation: Presentation) {
        debug!(
            kind = ?presentation.kind,
            generation = presentation.generation,
            frame = ?presentation.frame_id,
            "presenting"
        );
        self.emit(ShellEvent::Callout(presentation.callout));
        self.session.settle();

        let Some(action) = presentation.action else {
            return;
        };
        if action.kind == ActionKind::Wait {
            self.schedule(
                self.timings.wait_action,
                Inbound::WaitElapsed {
                    generation: presentation.generation,
                },
            );
        }
        if let (true, Some(at)) = (action.kind.requires_pointer(), action.at) {
            let probe = Arc::clone(&self.services.probe);
            let inbound = self.inbound.clone();
            let generation = presentation.generation;
            tokio::spawn(async move {
                match probe.element_at(at).await {
                    Ok(Some(rect)) => {
                        let _ = inbound
                            .send(Inbound::HighlightResolved { generation, rect })
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "element lookup failed; skipping highlight"),
                }
            });
        }
    }

    fn input(&mut self, event: &InputEvent) {
        let pending = self.session.pending_action().map(|action| action.kind);
        match self.session.on_input_event(event, Instant::now()) {
            InputOutcome::Met(completion) => {
                let message = completion.completed.kind.completion_message();
                self.complete_step(completion, message);
            }
            InputOutcome::Unmet(verdict) => {
                let hint = match (pending, verdict) {
                    (Some(ActionKind::Click), Verdict::Miss) => {
                        Some("Not quite there. Try clicking the pointer.")
                    }
                    (Some(ActionKind::DoubleClick), Verdict::Miss) => {
                        Some("Double click near the pointer.")
                    }
                    (Some(ActionKind::DoubleClick), Verdict::Armed) => {
                        Some("Double click again to complete.")
                    }
                    _ => None,
                };
                if let Some(hint) = hint {
                    self.emit(ShellEvent::status(hint, StatusTone::Default));
                }
            }
        }
    }

    fn complete_step(&mut self, completion: Completion, message: &str) {
        info!(kind = ?completion.completed.kind, "action completed");
        self.emit(ShellEvent::status(message, StatusTone::Success));
        self.emit(ShellEvent::Callout(Callout::hidden()));
        self.emit(ShellEvent::highlight(None));

        match completion.advance {
            Advance::Next(next) => {
                self.show(next);
                self.emit(ShellEvent::status("Next highlight ready.", StatusTone::Success));
            }
            Advance::CycleComplete => {
                if completion.completed.kind == ActionKind::Pinpoint {
                    return;
                }
                self.history.note(COMPLETED_NOTE);
                self.session.note(COMPLETED_NOTE);
                self.emit(ShellEvent::chat(Role::System, "Action Completed"));
                self.schedule(
                    self.timings.post_completion_pause,
                    Inbound::Scheduled {
                        epoch: self.epoch,
                        request: AskRequest::auto_continue(self.timings.auto_continue_delay),
                    },
                );
            }
        }
    }

    fn next(&mut self) {
        if self.in_flight || self.last_question.is_none() {
            return;
        }
        let confirmable = self
            .session
            .pending_action()
            .is_some_and(|action| action.kind.confirmable_by_next());
        if confirmable {
            if let Some(completion) = self.session.mark_met() {
                self.complete_step(completion, "Step complete.");
            }
            return;
        }
        self.ask(AskRequest::reask(self.timings.manual_reask_delay));
    }

    fn complete_task(&mut self) {
        info!("task completed by user");
        self.session.reset();
        self.history.clear();
        self.last_question = None;
        self.in_flight = false;
        self.epoch += 1;
        self.emit(ShellEvent::Callout(Callout::hidden()));
        self.emit(ShellEvent::highlight(None));
        self.emit(ShellEvent::status(
            "Task completed. Ready for a new question.",
            StatusTone::Success,
        ));
        self.emit(ShellEvent::TaskComplete);
    }

    fn reset(&mut self) {
        self.session.reset();
        self.last_question = None;
        self.in_flight = false;
        self.epoch += 1;
        self.emit(ShellEvent::Callout(Callout::hidden()));
        self.emit(ShellEvent::highlight(None));
    }
}

/// Capture, plan, then resolve every surviving call against the same frame.
async fn run_cycle(
    request: PlanRequest,
    delay: Duration,
    services: &Services,
    timings: Timings,
) -> Result<CycleOutcome, EngineError> {
    let pause = delay + timings.settle_before_capture;
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
    let frame = services.frames.fresh_frame(timings.fresh_frame_wait).await?;
    debug!(frame = frame.id, width = frame.width, height = frame.height, "captured frame");

    let started = Instant::now();
    let plan = services.proposer.plan(&request, &frame).await?;
    let reasoner_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    // A finished task leaves nothing to point at.
    let calls = if plan.task_completed() {
        Vec::new()
    } else {
        filter_batch(&plan.cua_calls)
    };
    if !plan.task_completed() && calls.len() < plan.cua_calls.len() {
        warn!(
            planned = plan.cua_calls.len(),
            kept = calls.len(),
            "multiple calls in one plan; keeping pinpoints only"
        );
    }
    let proposer = services.proposer.as_ref();
    let steps = try_join_all(
        calls
            .iter()
            .map(|call| propose_for_call(proposer, call, &frame)),
    )
    .await?;

    Ok(CycleOutcome {
        question: request.user_message,
        frame,
        plan,
        steps,
        reasoner_ms,
    })
}
