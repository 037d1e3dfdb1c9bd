use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use screen_guide::error::{ConfigurationError, ProposalError, Service};
use screen_guide::proposal::{
    PlanRequest, PointRequest, PointerReply, Proposer, ReasonerPlan, parse_pointer_response,
    parse_reasoner_response, with_transient_retry,
};
use screen_guide::{ChatMessage, Frame};

const POINTER_ATTEMPTS: usize = 2;

pub const DEFAULT_REASONER_PROMPT: &str = r#"You guide a person through a task on their own computer. You never act yourself; you tell them the ONE next step and where it is on the screenshot.

Reply with a single JSON object, no markdown:
{
  "answer": "short message to the user",
  "cua_calls": [
    {"action": "click", "target_description": "the blue Save button in the toolbar", "action-callout": "Click Save"}
  ],
  "callout": {"text": "optional note shown on screen, or none", "type": "info"}
}

Rules:
1. action is one of: click, double_click, drag, scroll, scroll_up, scroll_down, keypress, type, wait, pinpoint.
2. Use at most one actionable call per reply. Several calls are only allowed when every one is a pinpoint.
3. target_description must let another model find the element on the same screenshot without context.
4. callout.type is one of: info, hint, warning, error-solving.
5. user_status "Action Criteria Met" means the previous step was done; "Action Criteria Was not met" means the user gave up on it.
6. mode "diff_method" asks for another way to reach the same goal; mode "point" asks you to pinpoint the element instead of acting.
7. When the task is finished, include <<TASK_COMPLETED>> in answer and return no calls."#;

pub const DEFAULT_POINTER_PROMPT: &str = "Locate the element described in the instruction on the \
screenshot and reply with a single computer action that targets it.";

/// Endpoint settings for one inference service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub instructions: String,
}

impl ServiceConfig {
    pub fn new(
        endpoint: String,
        model: String,
        key_var: &str,
        prompt_path: Option<&Path>,
        default_prompt: &str,
    ) -> Result<Self> {
        let api_key = std::env::var(key_var)
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| ConfigurationError::MissingSetting(format!("{key_var} or OPENAI_API_KEY")))?;
        let instructions = match prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading prompt file {}", path.display()))?,
            None => default_prompt.to_string(),
        };
        Ok(Self {
            endpoint,
            model,
            api_key,
            instructions,
        })
    }
}

/// HTTP client for the reasoner and pointer services.
pub struct Brain {
    client: Client,
    reasoner: ServiceConfig,
    pointer: ServiceConfig,
    environment: String,
    backoff: Duration,
}

impl Brain {
    pub fn new(
        reasoner: ServiceConfig,
        pointer: ServiceConfig,
        environment: String,
        backoff: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            reasoner,
            pointer,
            environment,
            backoff,
        }
    }

    fn reasoner_payload(&self, request: &PlanRequest, frame: &Frame) -> Value {
        let history = format_history(&request.conversation_history);
        let instructions = if history.is_empty() {
            self.reasoner.instructions.clone()
        } else {
            format!(
                "{}\n\n=== Conversation History ===\n{history}\n",
                self.reasoner.instructions
            )
        };

        json!({
            "model": self.reasoner.model,
            "instructions": instructions,
            "input": [{
                "role": "user",
                "content": [
                    {"type": "input_text", "text": context_text(request)},
                    {"type": "input_image", "image_url": frame.data_url()}
                ]
            }],
            "reasoning": {"effort": "none"},
            "truncation": "auto",
        })
    }

    fn pointer_payload(&self, request: &PointRequest, frame: &Frame) -> Value {
        json!({
            "model": self.pointer.model,
            "instructions": self.pointer.instructions,
            "input": [{
                "role": "user",
                "content": [
                    {"type": "input_text", "text": request.prompt()},
                    {"type": "input_image", "image_url": frame.data_url()}
                ]
            }],
            "reasoning": {"summary": "concise"},
            "tools": [{
                "type": "computer_use_preview",
                "display_width": request.display_width,
                "display_height": request.display_height,
                "environment": self.environment,
            }],
            "tool_choice": "required",
            "truncation": "auto",
        })
    }

    async fn post(
        &self,
        service: Service,
        config: &ServiceConfig,
        payload: &Value,
    ) -> Result<Value, ProposalError> {
        let response = self
            .client
            .post(&config.endpoint)
            .bearer_auth(&config.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProposalError::Transport {
                service,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%service, status = status.as_u16(), "request rejected");
            return Err(ProposalError::Status {
                service,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProposalError::malformed(service, e.to_string()))
    }
}

#[async_trait]
impl Proposer for Brain {
    async fn plan(&self, request: &PlanRequest, frame: &Frame) -> Result<ReasonerPlan, ProposalError> {
        let payload = self.reasoner_payload(request, frame);
        let response = self.post(Service::Reasoner, &self.reasoner, &payload).await?;
        let plan = parse_reasoner_response(&response)?;
        debug!(
            calls = plan.cua_calls.len(),
            answered = plan.answer.is_some(),
            "reasoner replied"
        );
        Ok(plan)
    }

    async fn point(&self, request: &PointRequest, frame: &Frame) -> Result<PointerReply, ProposalError> {
        let payload = self.pointer_payload(request, frame);
        let payload = &payload;
        let response = with_transient_retry(POINTER_ATTEMPTS, self.backoff, move |attempt| {
            debug!(attempt, strict = request.strict, "asking pointer");
            self.post(Service::Pointer, &self.pointer, payload)
        })
        .await?;
        parse_pointer_response(&response)
    }
}

/// `ROLE: content` lines, oldest first.
fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|message| format!("{}: {}", message.role.label(), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The plan request minus its history, which travels in the instructions.
fn context_text(request: &PlanRequest) -> String {
    let mut context = serde_json::to_value(request).unwrap_or(Value::Null);
    if let Some(object) = context.as_object_mut() {
        object.remove("conversation_history");
    }
    context.to_string()
}
