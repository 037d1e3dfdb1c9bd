//! The action session: one pending action, the follow-up queue and the conversation.
//!
//! The session is the only owner of that state. It never talks to the shell itself; every
//! operation returns what should be shown and the orchestrator forwards it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::classifier::{self, GestureState, InputEvent, Verdict};
use crate::error::MappingError;
use crate::mapper;
use crate::types::{
    ActionKind, ActionProposal, CALLOUT_HEADING, Callout, CalloutTone, ChatMessage,
    DisplayInfo, FALLBACK_CALLOUT_TEXT, Frame, PINPOINT_COLOR, Point, Rect, ResolvedAction, Role,
};

const CLICK_HEADING_COLOR: &str = "#ffffff";

/// Presentation inputs that come from the reasoner plan rather than the pointer reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentOptions {
    pub kind_override: Option<ActionKind>,
    pub callout_text: Option<String>,
    pub tone: Option<CalloutTone>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub proposal: ActionProposal,
    pub options: PresentOptions,
}

/// What the shell should show for one presented step.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub callout: Callout,
    /// `None` for callout-only presentations.
    pub action: Option<ResolvedAction>,
    pub kind: ActionKind,
    pub summary: Option<String>,
    pub frame_id: Option<u64>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// A queued action from the same batch is now presenting.
    Next(Presentation),
    /// Nothing left in the batch.
    CycleComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub completed: ResolvedAction,
    pub advance: Advance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    Met(Completion),
    Unmet(Verdict),
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    Presenting(ResolvedAction),
    Pending(ResolvedAction),
}

#[derive(Debug, Clone, PartialEq)]
struct Staged {
    action: Option<ResolvedAction>,
    callout: Callout,
    kind: ActionKind,
    summary: Option<String>,
}

#[derive(Debug)]
pub struct ActionSession {
    phase: Phase,
    queue: VecDeque<Staged>,
    batch_frame: Option<Arc<Frame>>,
    gesture: GestureState,
    conversation: Vec<ChatMessage>,
    last_summary: Option<String>,
    last_callout: Option<Callout>,
    target_rect: Option<Rect>,
    generation: u64,
}

impl Default for ActionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            queue: VecDeque::new(),
            batch_frame: None,
            gesture: GestureState::default(),
            conversation: Vec::new(),
            last_summary: None,
            last_callout: None,
            target_rect: None,
            generation: 0,
        }
    }

    /// Drops the pending action, the queue and the conversation.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.queue.clear();
        self.batch_frame = None;
        self.gesture.reset();
        self.conversation.clear();
        self.last_summary = None;
        self.last_callout = None;
        self.target_rect = None;
    }

    pub fn pending_action(&self) -> Option<&ResolvedAction> {
        match &self.phase {
            Phase::Presenting(action) | Phase::Pending(action) => Some(action),
            Phase::Idle => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_action().is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Frame shared by every entry of the current batch.
    pub fn batch_frame(&self) -> Option<&Arc<Frame>> {
        self.batch_frame.as_ref()
    }

    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    pub fn push_conversation(&mut self, role: Role, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        self.conversation.push(ChatMessage {
            role,
            content: content.to_string(),
        });
    }

    pub fn note(&mut self, text: &str) {
        self.push_conversation(Role::System, text);
    }

    pub fn last_summary(&self) -> Option<&str> {
        self.last_summary.as_deref()
    }

    pub fn last_callout(&self) -> Option<&Callout> {
        self.last_callout.as_ref()
    }

    pub fn target_rect(&self) -> Option<Rect> {
        self.target_rect
    }

    /// Bumped on every presentation; timers and lookups compare against it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Presents a single proposal, replacing anything pending or queued.
    pub fn present(
        &mut self,
        proposal: &ActionProposal,
        options: &PresentOptions,
        display: &DisplayInfo,
        frame: Arc<Frame>,
    ) -> Result<Presentation, MappingError> {
        let staged = stage(proposal, options, display, &frame)?;
        self.queue.clear();
        self.batch_frame = Some(frame);
        Ok(self.activate(staged))
    }

    /// Resolves every entry against one frame, presents the first and queues the rest.
    ///
    /// A mapping failure on any entry rejects the whole batch and leaves the session untouched.
    pub fn present_batch(
        &mut self,
        entries: Vec<BatchEntry>,
        display: &DisplayInfo,
        frame: Arc<Frame>,
    ) -> Result<Option<Presentation>, MappingError> {
        let mut staged = entries
            .iter()
            .map(|entry| stage(&entry.proposal, &entry.options, display, &frame))
            .collect::<Result<VecDeque<_>, _>>()?;
        let Some(first) = staged.pop_front() else {
            return Ok(None);
        };
        self.queue = staged;
        self.batch_frame = Some(frame);
        Ok(Some(self.activate(first)))
    }

    /// Shows text with no target and nothing to confirm.
    pub fn present_callout(&mut self, text: &str, tone: Option<CalloutTone>) -> Presentation {
        self.queue.clear();
        self.batch_frame = None;
        self.activate(callout_only(Some(text), None, tone))
    }

    /// The presentation command has been emitted; input now counts against the action.
    pub fn settle(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::Presenting(action) => Phase::Pending(action),
            other => other,
        };
    }

    pub fn on_input_event(&mut self, event: &InputEvent, now: Instant) -> InputOutcome {
        let Phase::Pending(action) = &self.phase else {
            return InputOutcome::Unmet(Verdict::Ignored);
        };
        let verdict = classifier::classify(action, &mut self.gesture, event, now);
        if verdict != Verdict::Met {
            return InputOutcome::Unmet(verdict);
        }
        match self.mark_met() {
            Some(completion) => InputOutcome::Met(completion),
            None => InputOutcome::Unmet(Verdict::Ignored),
        }
    }

    /// Completes the pending action and moves on to the next queued one, if any.
    pub fn mark_met(&mut self) -> Option<Completion> {
        let completed = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Presenting(action) | Phase::Pending(action) => action,
            Phase::Idle => return None,
        };
        self.gesture.reset();
        self.target_rect = None;
        self.last_callout = None;
        debug!(kind = ?completed.kind, queued = self.queue.len(), "action met");

        let advance = match self.queue.pop_front() {
            Some(next) => Advance::Next(self.activate(next)),
            None => {
                self.batch_frame = None;
                Advance::CycleComplete
            }
        };
        Some(Completion { completed, advance })
    }

    /// Abandons the pending action together with its queued follow-ups.
    ///
    /// Returns the faded copy of the last callout, if one was showing.
    pub fn mark_not_met(&mut self) -> Option<Callout> {
        if let Phase::Presenting(action) | Phase::Pending(action) = &self.phase {
            debug!(kind = ?action.kind, dropped = self.queue.len(), "action not met");
        }
        self.phase = Phase::Idle;
        self.queue.clear();
        self.batch_frame = None;
        self.gesture.reset();
        self.target_rect = None;
        self.fade_out()
    }

    /// Takes the visible callout for a fade-out without touching the pending action.
    pub fn fade_out(&mut self) -> Option<Callout> {
        self.last_callout
            .take()
            .filter(|callout| !callout.is_hidden())
            .map(|callout| callout.faded())
    }

    /// Stores the highlight rectangle if `generation` still names the pending action.
    pub fn set_target_rect(&mut self, generation: u64, rect: Rect) -> bool {
        if generation != self.generation || !self.has_pending() {
            return false;
        }
        self.target_rect = Some(rect);
        true
    }

    fn activate(&mut self, staged: Staged) -> Presentation {
        self.generation += 1;
        self.gesture.reset();
        self.target_rect = None;
        self.phase = match staged.action.clone() {
            Some(action) => Phase::Presenting(action),
            None => Phase::Idle,
        };
        if let Some(summary) = &staged.summary {
            self.last_summary = Some(summary.clone());
        }
        self.last_callout = Some(staged.callout.clone());

        Presentation {
            callout: staged.callout,
            action: staged.action,
            kind: staged.kind,
            summary: staged.summary,
            frame_id: self.batch_frame.as_ref().map(|frame| frame.id),
            generation: self.generation,
        }
    }
}

fn collapse_whitespace(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn body_text(callout_text: Option<&str>, summary: Option<&str>) -> String {
    callout_text
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .or_else(|| summary.and_then(collapse_whitespace))
        .unwrap_or_else(|| FALLBACK_CALLOUT_TEXT.to_string())
}

fn callout_only(callout_text: Option<&str>, summary: Option<&str>, tone: Option<CalloutTone>) -> Staged {
    let color = tone
        .map(CalloutTone::color)
        .unwrap_or(ActionKind::Callout.color())
        .to_string();
    Staged {
        action: None,
        callout: Callout {
            heading: CALLOUT_HEADING.to_string(),
            body: body_text(callout_text, summary),
            border_color: Some(color.clone()),
            heading_color: Some(color),
            x: -1,
            y: -1,
            end_x: None,
            end_y: None,
            keys: Vec::new(),
            show_next: true,
            fade_out: false,
            allow_click_through: true,
        },
        kind: ActionKind::Callout,
        summary: summary.map(str::to_string),
    }
}

struct Anchor {
    physical: Point,
    logical: Point,
    local: (i32, i32),
}

fn anchor(point: Point, display: &DisplayInfo, frame: &Frame) -> Result<Anchor, MappingError> {
    let physical = mapper::map_image_point_to_physical(point, frame.size(), display)?;
    let logical = mapper::physical_to_logical(physical, display);
    let local = mapper::logical_to_local(logical, display);
    Ok(Anchor {
        physical,
        logical,
        local: (mapper::to_pixel(local.x), mapper::to_pixel(local.y)),
    })
}

fn stage(
    proposal: &ActionProposal,
    options: &PresentOptions,
    display: &DisplayInfo,
    frame: &Frame,
) -> Result<Staged, MappingError> {
    let kind = options.kind_override.unwrap_or(proposal.kind);
    let summary = proposal.summary.as_deref();
    let callout_text = options.callout_text.as_deref();

    let start = proposal.start_point();
    let end = if kind == ActionKind::Drag {
        proposal.end_point()
    } else {
        None
    };
    let unresolvable = kind == ActionKind::Callout
        || (kind.requires_pointer() && start.is_none())
        || (kind == ActionKind::Drag && end.is_none());
    if unresolvable {
        debug!(?kind, "no usable target; presenting as callout");
        return Ok(callout_only(callout_text, summary, options.tone));
    }

    let start = start.map(|point| anchor(point, display, frame)).transpose()?;
    let end = end.map(|point| anchor(point, display, frame)).transpose()?;

    let border = if kind == ActionKind::Pinpoint {
        PINPOINT_COLOR
    } else {
        options.tone.map(CalloutTone::color).unwrap_or(kind.color())
    };
    let heading_color = if kind == ActionKind::Click {
        CLICK_HEADING_COLOR
    } else {
        border
    };
    let keys = if kind == ActionKind::Keypress {
        proposal.keys.clone()
    } else {
        Vec::new()
    };

    let mut body = body_text(callout_text, summary);
    if kind == ActionKind::Type {
        if let Some(text) = proposal.text.as_deref().filter(|t| !t.is_empty()) {
            if !body.contains(text) {
                body = format!("{body}\nType: \"{text}\"");
            }
        }
    }

    let (x, y) = start.as_ref().map_or((-1, -1), |a| a.local);
    let callout = Callout {
        heading: kind.heading().to_string(),
        body,
        border_color: Some(border.to_string()),
        heading_color: Some(heading_color.to_string()),
        x,
        y,
        end_x: end.as_ref().map(|a| a.local.0),
        end_y: end.as_ref().map(|a| a.local.1),
        keys: keys.clone(),
        show_next: kind.manual_advance(),
        fade_out: false,
        allow_click_through: true,
    };
    let action = ResolvedAction {
        kind,
        at: start.as_ref().map(|a| a.physical),
        end: end.as_ref().map(|a| a.physical),
        dip: start.as_ref().map(|a| a.logical),
        dip_end: end.as_ref().map(|a| a.logical),
        keys,
    };

    Ok(Staged {
        action: Some(action),
        callout,
        kind,
        summary: summary.map(str::to_string),
    })
}
