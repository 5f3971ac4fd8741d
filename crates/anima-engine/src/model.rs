use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use anima_core::error::{AnimaError, Result};
use anima_core::traits::{CallOptions, ModelRouter};
use anima_core::types::ChatMessage;

use crate::context::RunContext;
use crate::definition::{NodeDefinition, NodeExec, NodeOutput};
use crate::message::Message;
use crate::registry::NodeRegistry;
use crate::slot::{SlotSpec, SlotType};

/// Calls the model router. The prompt is either the `prompt_template`
/// property with `{slot}` placeholders interpolated from the node's inputs,
/// or the `prompt` input taken as-is.
///
/// Model errors and timeouts are expected failures — they come back
/// failure-shaped and the graph decides where they flow.
struct ModelCall {
    router: Arc<dyn ModelRouter>,
    timeout_secs: u64,
}

impl ModelCall {
    fn render_prompt(template: &str, inputs: &NodeOutput) -> String {
        let mut prompt = template.to_string();
        for (key, value) in inputs.as_map() {
            let placeholder = format!("{{{}}}", key);
            if prompt.contains(&placeholder) {
                prompt = prompt.replace(&placeholder, Message::from_value(value).text());
            }
        }
        prompt
    }
}

impl NodeExec for ModelCall {
    fn execute<'a>(
        &'a self,
        inputs: &'a NodeOutput,
        ctx: &'a mut RunContext,
        properties: &'a NodeOutput,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(AnimaError::Cancelled);
            }

            let role = properties.get_str("role").unwrap_or("persona").to_string();
            let prompt = match properties.get_str("prompt_template") {
                Some(template) => Self::render_prompt(template, inputs),
                None => inputs
                    .get("prompt")
                    .map(|v| Message::from_value(v).text().to_string())
                    .unwrap_or_default(),
            };
            if prompt.trim().is_empty() {
                return Ok(NodeOutput::failure("model_call rendered an empty prompt"));
            }

            let mut messages = Vec::new();
            if properties.get_bool("include_history").unwrap_or(false) {
                messages.extend(ctx.history.iter().cloned());
            }
            messages.push(ChatMessage::user(prompt));

            let options = CallOptions {
                max_tokens: properties.get_u64("max_tokens").map(|v| v as u32),
                temperature: properties.get("temperature").and_then(|v| v.as_f64()),
            };

            debug!(role = %role, messages = messages.len(), "Dispatching model call");
            let call = self.router.call_model(&role, messages, options);
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => Ok(NodeOutput::ok()
                    .with("response", json!({ "content": response.content }))),
                Ok(Err(e)) => {
                    warn!(role = %role, error = %e, "Model call failed");
                    Ok(NodeOutput::failure(e.to_string()))
                }
                Err(_) => {
                    warn!(role = %role, timeout_secs = self.timeout_secs, "Model call timed out");
                    Ok(NodeOutput::failure(
                        AnimaError::ModelTimeout {
                            role,
                            timeout_secs: self.timeout_secs,
                        }
                        .to_string(),
                    ))
                }
            }
        })
    }
}

/// Register the nodes that reach the inference boundary.
pub fn register_model_nodes(
    registry: &mut NodeRegistry,
    router: Arc<dyn ModelRouter>,
    timeout_secs: u64,
) -> Result<()> {
    registry.register(
        NodeDefinition::new(
            "model_call",
            "model",
            Arc::new(ModelCall {
                router,
                timeout_secs,
            }),
        )
        .with_input(SlotSpec::optional("prompt", SlotType::Any))
        .with_input(SlotSpec::optional("context", SlotType::Any))
        .with_output(SlotSpec::optional("response", SlotType::LlmResponse))
        .with_output(SlotSpec::optional("success", SlotType::Boolean))
        .with_output(SlotSpec::optional("error", SlotType::String))
        .with_default("role", json!("persona"))
        .with_default("include_history", json!(false)),
    )?;
    Ok(())
}
