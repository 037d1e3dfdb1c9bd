//! Contract with the two inference services and the normalization of their replies.
//!
//! The reasoner plans (answer text plus a list of on-screen calls); the pointer resolves one call
//! into a computer action on the captured frame. Transport lives in the agent binary behind the
//! [`Proposer`] trait, so everything here is testable without a network.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProposalError, Service};
use crate::types::{ActionKind, ActionProposal, CalloutTone, ChatMessage, Frame, Point, TASK_COMPLETED_MARKER};

/// Strict-mode retries after a screenshot-only pointer reply.
pub const MAX_STRICT_RETRIES: usize = 1;

pub const STRICT_DIRECTIVE: &str = "Respond with exactly one concrete computer action for this \
instruction. Do not request another screenshot.";

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One on-screen step the reasoner wants the pointer to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    pub action: String,
    #[serde(default)]
    pub target_description: String,
    #[serde(rename = "action-callout", default, skip_serializing_if = "Option::is_none")]
    pub action_callout: Option<String>,
}

impl PlannedCall {
    pub fn new(action: impl Into<String>, target_description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target_description: target_description.into(),
            action_callout: None,
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(&self.action)
    }

    /// Text sent to the pointer service for this call.
    pub fn pointer_prompt(&self) -> String {
        format!(
            "Action: {}\nInstruction: {}",
            self.action, self.target_description
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanCallout {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "type", default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonerPlan {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cua_calls: Vec<PlannedCall>,
    #[serde(default)]
    pub callout: Option<PlanCallout>,
}

impl ReasonerPlan {
    pub fn task_completed(&self) -> bool {
        self.answer
            .as_deref()
            .is_some_and(|answer| answer.contains(TASK_COMPLETED_MARKER))
    }

    /// The plan-level callout text; `"none"` means the reasoner chose not to show one.
    pub fn callout_text(&self) -> Option<&str> {
        self.callout
            .as_ref()
            .and_then(|callout| callout.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty() && *text != "none")
    }

    pub fn tone(&self) -> Option<CalloutTone> {
        self.callout
            .as_ref()
            .and_then(|callout| callout.tone.as_deref())
            .and_then(CalloutTone::parse)
    }

    /// The call's own callout text, falling back to the plan-level text.
    pub fn text_for(&self, call: &PlannedCall) -> Option<String> {
        call.action_callout
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .or_else(|| self.callout_text())
            .map(str::to_string)
    }
}

/// Several calls in one plan are only trusted as pinpoints.
pub fn filter_batch(calls: &[PlannedCall]) -> Vec<PlannedCall> {
    if calls.len() <= 1 {
        return calls.to_vec();
    }
    calls
        .iter()
        .filter(|call| call.kind() == Some(ActionKind::Pinpoint))
        .cloned()
        .collect()
}

/// The model's text output: top-level `output_text`, else the first message's `output_text` part.
pub fn extract_output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    output_items(response)
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .find_map(message_text)
}

pub fn parse_reasoner_response(response: &Value) -> Result<ReasonerPlan, ProposalError> {
    let text = extract_output_text(response)
        .ok_or_else(|| ProposalError::malformed(Service::Reasoner, "no output text"))?;
    // Models sometimes wrap the JSON in markdown fences.
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(cleaned)
        .map_err(|e| ProposalError::malformed(Service::Reasoner, format!("invalid JSON: {e}")))
}

fn output_items(response: &Value) -> &[Value] {
    response
        .get("output")
        .or_else(|| response.get("outputs"))
        .or_else(|| response.get("response").and_then(|inner| inner.get("output")))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn message_text(item: &Value) -> Option<String> {
    item.get("content")?
        .as_array()?
        .iter()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn summary_text(item: &Value) -> Option<String> {
    item.get("summary")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("type").and_then(Value::as_str) == Some("summary_text"))
        .and_then(|entry| entry.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// The `action` object of a `computer_call` output item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputerAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    #[serde(alias = "end_x", alias = "endX")]
    pub x2: Option<f64>,
    #[serde(alias = "end_y", alias = "endY")]
    pub y2: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub path: Vec<Point>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub keys: Vec<String>,
    pub key: Option<String>,
    pub text: Option<String>,
}

impl ComputerAction {
    fn mapped_kind(&self) -> Option<ActionKind> {
        match self.kind.as_str() {
            // A bare pointer move is a hover instruction.
            "move" => Some(ActionKind::Pinpoint),
            other => ActionKind::parse(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointerReply {
    pub action: Option<ComputerAction>,
    pub summary: Option<String>,
}

impl PointerReply {
    /// The pointer asked for a new screenshot instead of answering.
    pub fn is_capture_only(&self) -> bool {
        self.action
            .as_ref()
            .is_some_and(|action| action.kind == "screenshot")
    }

    /// Normalizes the reply. The planned call's kind wins over the action's own type; a reply
    /// without a usable action becomes a callout.
    pub fn into_proposal(self, planned: Option<ActionKind>) -> ActionProposal {
        let summary = self.summary;
        let action = match self.action {
            Some(action) if action.kind != "screenshot" => action,
            _ => {
                return ActionProposal {
                    summary,
                    ..ActionProposal::new(ActionKind::Callout)
                };
            }
        };

        let kind = planned
            .or_else(|| action.mapped_kind())
            .unwrap_or(ActionKind::Click);
        let point = action.x.zip(action.y).map(|(x, y)| Point::new(x, y));
        let end = action.x2.zip(action.y2).map(|(x, y)| Point::new(x, y));
        let keys = if action.keys.is_empty() {
            action.key.into_iter().collect()
        } else {
            action.keys
        };

        ActionProposal {
            kind,
            point,
            end,
            path: action.path,
            keys,
            text: action.text,
            summary,
        }
    }
}

pub fn parse_pointer_response(response: &Value) -> Result<PointerReply, ProposalError> {
    let mut reply = PointerReply::default();
    for item in output_items(response) {
        if reply.summary.is_none() {
            reply.summary = summary_text(item);
        }
        let is_call = item.get("type").and_then(Value::as_str) == Some("computer_call");
        if reply.action.is_none() && is_call {
            if let Some(action) = item.get("action") {
                let action = ComputerAction::deserialize(action).map_err(|e| {
                    ProposalError::malformed(Service::Pointer, format!("computer action: {e}"))
                })?;
                reply.action = Some(action);
            }
        }
        let is_message = item.get("type").and_then(Value::as_str) == Some("message");
        if reply.summary.is_none() && is_message {
            reply.summary = message_text(item);
        }
    }
    if reply.summary.is_none() {
        reply.summary = response
            .get("output_text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
    }
    Ok(reply)
}

/// Shell buttons that steer the next plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AskMode {
    #[serde(rename = "diff_method")]
    DifferentMethod,
    #[serde(rename = "point")]
    Point,
}

/// Context sent to the reasoner with every frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub user_message: String,
    pub conversation_history: Vec<ChatMessage>,
    pub allow_parallel_pinpoint: bool,
    pub last_cua_suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AskMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointRequest {
    pub instruction: String,
    pub strict: bool,
    pub display_width: u32,
    pub display_height: u32,
}

impl PointRequest {
    pub fn new(call: &PlannedCall, frame: &Frame, strict: bool) -> Self {
        Self {
            instruction: call.pointer_prompt(),
            strict,
            display_width: frame.width,
            display_height: frame.height,
        }
    }

    pub fn prompt(&self) -> String {
        if self.strict {
            format!("{}\n{STRICT_DIRECTIVE}", self.instruction)
        } else {
            self.instruction.clone()
        }
    }
}

#[async_trait]
pub trait Proposer: Send + Sync {
    async fn plan(&self, request: &PlanRequest, frame: &Frame) -> Result<ReasonerPlan, ProposalError>;

    async fn point(&self, request: &PointRequest, frame: &Frame) -> Result<PointerReply, ProposalError>;
}

/// A planned call resolved by the pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedStep {
    pub call: PlannedCall,
    pub proposal: ActionProposal,
    /// One entry per pointer request made for this call.
    pub durations_ms: Vec<u64>,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Resolves one call, retrying in strict mode a bounded number of times when the pointer only
/// asks for a screenshot.
pub async fn propose_for_call(
    proposer: &dyn Proposer,
    call: &PlannedCall,
    frame: &Frame,
) -> Result<ProposedStep, ProposalError> {
    let planned = call.kind();
    let mut durations_ms = Vec::new();

    for attempt in 0..=MAX_STRICT_RETRIES {
        let request = PointRequest::new(call, frame, attempt > 0);
        let started = Instant::now();
        let reply = proposer.point(&request, frame).await?;
        durations_ms.push(elapsed_ms(started));

        if !reply.is_capture_only() {
            return Ok(ProposedStep {
                call: call.clone(),
                proposal: reply.into_proposal(planned),
                durations_ms,
            });
        }
        debug!(attempt, action = %call.action, "pointer replied with a screenshot request");
    }

    warn!(action = %call.action, "no actionable pointer reply; presenting as callout");
    Ok(ProposedStep {
        call: call.clone(),
        proposal: ActionProposal::new(ActionKind::Callout),
        durations_ms,
    })
}

/// Runs `call` until it succeeds, fails permanently, or `max_attempts` is reached. Only
/// [`ProposalError::is_transient`] failures are retried, with a linearly growing backoff.
pub async fn with_transient_retry<T, F, Fut>(
    max_attempts: usize,
    backoff: Duration,
    mut call: F,
) -> Result<T, ProposalError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, ProposalError>>,
{
    let mut attempt = 1;
    loop {
        match call(attempt).await {
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(attempt, error = %err, "transient failure, retrying");
                tokio::time::sleep(backoff * u32::try_from(attempt).unwrap_or(u32::MAX)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn plan_from_top_level_output_text() {
        let response = json!({
            "output_text": r#"{"answer":"Open File","cua_calls":[{"action":"click","target_description":"File menu","action-callout":"Click File"}],"callout":{"text":"none","type":"hint"}}"#
        });
        let plan = parse_reasoner_response(&response).unwrap();
        assert_eq!(plan.answer.as_deref(), Some("Open File"));
        assert_eq!(plan.cua_calls.len(), 1);
        assert_eq!(plan.cua_calls[0].kind(), Some(ActionKind::Click));
        assert_eq!(plan.callout_text(), None);
        assert_eq!(plan.tone(), Some(CalloutTone::Hint));
        assert_eq!(plan.text_for(&plan.cua_calls[0]).as_deref(), Some("Click File"));
    }

    #[test]
    fn plan_from_message_item_with_null_calls() {
        let response = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"answer\":\"Done <<TASK_COMPLETED>>\",\"cua_calls\":null}"}
                ]}
            ]
        });
        let plan = parse_reasoner_response(&response).unwrap();
        assert!(plan.cua_calls.is_empty());
        assert!(plan.task_completed());
    }

    #[test]
    fn fenced_plan_is_accepted() {
        let response = json!({"output_text": "```json\n{\"answer\":\"Hi\",\"cua_calls\":[]}\n```"});
        let plan = parse_reasoner_response(&response).unwrap();
        assert_eq!(plan.answer.as_deref(), Some("Hi"));
    }

    #[test]
    fn plan_without_text_is_malformed() {
        let err = parse_reasoner_response(&json!({"output": []})).unwrap_err();
        assert!(matches!(
            err,
            ProposalError::Malformed {
                service: Service::Reasoner,
                ..
            }
        ));
        let err = parse_reasoner_response(&json!({"output_text": "not json"})).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn plan_callout_falls_back_for_calls() {
        let plan = ReasonerPlan {
            callout: Some(PlanCallout {
                text: Some("Save your work first".into()),
                tone: Some("warning".into()),
            }),
            ..ReasonerPlan::default()
        };
        let call = PlannedCall::new("click", "Save");
        assert_eq!(plan.text_for(&call).as_deref(), Some("Save your work first"));
    }

    #[test]
    fn multiple_calls_keep_only_pinpoints() {
        let calls = vec![
            PlannedCall::new("click", "OK"),
            PlannedCall::new("pinpoint", "Name field"),
            PlannedCall::new("drag", "Slider"),
            PlannedCall::new("pinpoint", "Email field"),
        ];
        let kept = filter_batch(&calls);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|call| call.action == "pinpoint"));

        let single = vec![PlannedCall::new("click", "OK")];
        assert_eq!(filter_batch(&single), single);
    }

    #[test]
    fn pointer_reply_takes_first_summary_in_output_order() {
        let response = json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "message text"}]},
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "Click the OK button"}]},
                {"type": "computer_call", "action": {"type": "click", "x": 120, "y": 48, "button": "left"}},
                {"type": "computer_call", "action": {"type": "double_click", "x": 1, "y": 1}}
            ],
            "output_text": "top level"
        });
        let reply = parse_pointer_response(&response).unwrap();
        // The message came first, so it wins over the later reasoning summary.
        assert_eq!(reply.summary.as_deref(), Some("message text"));
        let action = reply.action.clone().unwrap();
        assert_eq!(action.kind, "click");
        assert_eq!((action.x, action.y), (Some(120.0), Some(48.0)));

        let proposal = reply.into_proposal(None);
        assert_eq!(proposal.kind, ActionKind::Click);
        assert_eq!(proposal.point, Some(Point::new(120.0, 48.0)));
    }

    #[test]
    fn pointer_reply_summary_falls_back_to_output_text() {
        let response = json!({
            "output": [{"type": "computer_call", "action": {"type": "keypress", "keys": ["CTRL", "S"]}}],
            "output_text": "Press Ctrl+S"
        });
        let reply = parse_pointer_response(&response).unwrap();
        assert_eq!(reply.summary.as_deref(), Some("Press Ctrl+S"));
        let proposal = reply.into_proposal(Some(ActionKind::Keypress));
        assert_eq!(proposal.keys, vec!["CTRL", "S"]);
        assert_eq!(proposal.point, None);
    }

    #[test]
    fn drag_end_aliases_and_path() {
        let response = json!({
            "output": [{"type": "computer_call", "action": {
                "type": "drag", "x": 1, "y": 2, "end_x": 30, "endY": 40,
                "path": [{"x": 5, "y": 6}, {"x": 50, "y": 60}]
            }}]
        });
        let proposal = parse_pointer_response(&response)
            .unwrap()
            .into_proposal(Some(ActionKind::Drag));
        assert_eq!(proposal.end, Some(Point::new(30.0, 40.0)));
        assert_eq!(proposal.start_point(), Some(Point::new(5.0, 6.0)));
        assert_eq!(proposal.end_point(), Some(Point::new(50.0, 60.0)));
    }

    #[test]
    fn move_action_is_a_pinpoint_and_missing_action_is_a_callout() {
        let reply = PointerReply {
            action: Some(ComputerAction {
                kind: "move".into(),
                x: Some(3.0),
                y: Some(4.0),
                ..ComputerAction::default()
            }),
            summary: None,
        };
        assert_eq!(reply.into_proposal(None).kind, ActionKind::Pinpoint);

        let empty = PointerReply {
            action: None,
            summary: Some("Nothing to do".into()),
        };
        let proposal = empty.into_proposal(Some(ActionKind::Click));
        assert_eq!(proposal.kind, ActionKind::Callout);
        assert_eq!(proposal.summary.as_deref(), Some("Nothing to do"));
    }

    #[test]
    fn plan_request_omits_absent_mode() {
        let request = PlanRequest {
            user_message: String::new(),
            conversation_history: Vec::new(),
            allow_parallel_pinpoint: true,
            last_cua_suggestion: None,
            mode: Some(AskMode::DifferentMethod),
            user_status: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["mode"], "diff_method");
        assert!(json.get("user_status").is_none());
        assert_eq!(json["last_cua_suggestion"], Value::Null);
    }

    #[test]
    fn strict_prompt_appends_directive() {
        let frame = Frame::new(1, 800, 600, Vec::new());
        let call = PlannedCall::new("click", "the OK button");
        let relaxed = PointRequest::new(&call, &frame, false);
        assert_eq!(relaxed.prompt(), "Action: click\nInstruction: the OK button");
        let strict = PointRequest::new(&call, &frame, true);
        assert!(strict.prompt().ends_with(STRICT_DIRECTIVE));
        assert_eq!((strict.display_width, strict.display_height), (800, 600));
    }

    /// Replies from a script, recording whether each request was strict.
    struct ScriptedPointer {
        replies: Mutex<Vec<PointerReply>>,
        strict_flags: Mutex<Vec<bool>>,
    }

    impl ScriptedPointer {
        fn new(mut replies: Vec<PointerReply>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                strict_flags: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Proposer for ScriptedPointer {
        async fn plan(&self, _: &PlanRequest, _: &Frame) -> Result<ReasonerPlan, ProposalError> {
            Ok(ReasonerPlan::default())
        }

        async fn point(&self, request: &PointRequest, _: &Frame) -> Result<PointerReply, ProposalError> {
            self.strict_flags.lock().unwrap().push(request.strict);
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }
    }

    fn screenshot() -> PointerReply {
        PointerReply {
            action: Some(ComputerAction {
                kind: "screenshot".into(),
                ..ComputerAction::default()
            }),
            summary: None,
        }
    }

    fn click_at(x: f64, y: f64) -> PointerReply {
        PointerReply {
            action: Some(ComputerAction {
                kind: "click".into(),
                x: Some(x),
                y: Some(y),
                ..ComputerAction::default()
            }),
            summary: Some("Click it".into()),
        }
    }

    #[tokio::test]
    async fn screenshot_reply_gets_one_strict_retry() {
        let pointer = ScriptedPointer::new(vec![screenshot(), click_at(10.0, 20.0)]);
        let frame = Frame::new(1, 100, 100, Vec::new());
        let call = PlannedCall::new("click", "OK");

        let step = propose_for_call(&pointer, &call, &frame).await.unwrap();

        assert_eq!(step.proposal.kind, ActionKind::Click);
        assert_eq!(step.proposal.point, Some(Point::new(10.0, 20.0)));
        assert_eq!(step.durations_ms.len(), 2);
        assert_eq!(*pointer.strict_flags.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn repeated_screenshot_reply_becomes_callout() {
        let pointer = ScriptedPointer::new(vec![screenshot(), screenshot(), click_at(1.0, 1.0)]);
        let frame = Frame::new(1, 100, 100, Vec::new());

        let step = propose_for_call(&pointer, &PlannedCall::new("click", "OK"), &frame)
            .await
            .unwrap();

        assert_eq!(step.proposal.kind, ActionKind::Callout);
        assert_eq!(pointer.strict_flags.lock().unwrap().len(), 2);
    }

    fn server_error() -> ProposalError {
        ProposalError::Status {
            service: Service::Pointer,
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let calls = AtomicUsize::new(0);
        let result = with_transient_retry(2, Duration::ZERO, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err(server_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_transient_retry(2, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert_eq!(result, Err(server_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_transient_retry(2, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProposalError::Status {
                    service: Service::Pointer,
                    status: 401,
                    body: "bad key".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
