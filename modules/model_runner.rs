use async_trait::async_trait;
use aws_sdk_bedrockruntime::{primitives::Blob, Client as BedrockClient};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::batch::records::ANTHROPIC_VERSION;
use super::error::ServiceError;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} total ({} input, {} output)",
               self.total_tokens, self.input_tokens, self.output_tokens)
    }
}

/// Text returned by one synchronous model call
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Direct (interactive) model invocation
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model_id: &str, prompt: &str, max_tokens: u32) -> Result<ModelResponse, ServiceError>;
}

pub struct BedrockModelRunner {
    bedrock_client: Arc<BedrockClient>,
}

impl BedrockModelRunner {
    pub fn new(bedrock_client: Arc<BedrockClient>) -> Self {
        Self { bedrock_client }
    }
}

#[async_trait]
impl ModelInvoker for BedrockModelRunner {
    async fn invoke(&self, model_id: &str, prompt: &str, max_tokens: u32) -> Result<ModelResponse, ServiceError> {
        let request_body = build_request_body(model_id, prompt, max_tokens);
        info!("Invoking model {} with {} character prompt", model_id, prompt.len());

        let response = self
            .bedrock_client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(request_body.to_string().into_bytes()))
            .send()
            .await
            .map_err(|e| ServiceError(format!("Failed to invoke Bedrock model {}: {}", model_id, e)))?;

        let response_body: Value = serde_json::from_slice(response.body().as_ref())
            .map_err(|e| ServiceError(format!("Failed to parse Bedrock response: {}", e)))?;
        debug!("Bedrock response for model {}: {}", model_id, response_body);

        let text = extract_output(model_id, &response_body).ok_or_else(|| {
            ServiceError(format!("Model {} returned no text content", model_id))
        })?;
        let usage = extract_token_usage(&response_body);
        if let Some(usage) = &usage {
            info!("Model {} invoked successfully, {} tokens used", model_id, usage);
        }

        Ok(ModelResponse { text, usage })
    }
}

/// Build request body based on model type
pub fn build_request_body(model_id: &str, prompt: &str, max_tokens: u32) -> Value {
    match model_id {
        // Amazon Nova models
        id if id.contains("amazon.nova") => {
            json!({
                "messages": [
                    {
                        "role": "user",
                        "content": [{ "text": prompt }]
                    }
                ],
                "inferenceConfig": {
                    "max_new_tokens": max_tokens,
                    "temperature": 0.0
                }
            })
        }
        // Anthropic messages API (Claude 3 and later, including inference profiles)
        id if id.contains("anthropic.claude") && !is_legacy_claude(id) => {
            json!({
                "anthropic_version": ANTHROPIC_VERSION,
                "max_tokens": max_tokens,
                "temperature": 0.0,
                "messages": [
                    {
                        "role": "user",
                        "content": [{ "type": "text", "text": prompt }]
                    }
                ]
            })
        }
        // Older Claude text-completion models
        id if id.contains("anthropic.claude") => {
            json!({
                "prompt": format!("\n\nHuman: {}\n\nAssistant:", prompt),
                "max_tokens_to_sample": max_tokens,
                "temperature": 0.0
            })
        }
        // Meta Llama models
        id if id.contains("meta.llama") => {
            json!({
                "prompt": prompt,
                "max_gen_len": max_tokens,
                "temperature": 0.0
            })
        }
        // Mistral and anything else with a plain completion body
        _ => {
            json!({
                "prompt": prompt,
                "max_tokens": max_tokens,
                "temperature": 0.0
            })
        }
    }
}

fn is_legacy_claude(model_id: &str) -> bool {
    model_id.contains("claude-v2") || model_id.contains("claude-instant")
}

/// Extract output from response based on model type
pub fn extract_output(model_id: &str, response_body: &Value) -> Option<String> {
    let text = match model_id {
        id if id.contains("amazon.nova") => response_body["output"]["message"]["content"][0]["text"].as_str(),
        id if id.contains("anthropic.claude") && !is_legacy_claude(id) => {
            response_body["content"][0]["text"].as_str()
        }
        id if id.contains("anthropic.claude") => response_body["completion"].as_str(),
        id if id.contains("meta.llama") => response_body["generation"].as_str(),
        // Fallback for other models - try multiple common response formats
        _ => response_body["outputs"][0]["text"]
            .as_str()
            .or_else(|| response_body["completion"].as_str())
            .or_else(|| response_body["content"][0]["text"].as_str())
            .or_else(|| response_body["generation"].as_str()),
    };

    match text {
        Some(text) if !text.trim().is_empty() => Some(text.to_string()),
        _ => {
            warn!("Model {} response had no text content: {}", model_id, response_body);
            None
        }
    }
}

/// Extract token usage from response
pub fn extract_token_usage(response_body: &Value) -> Option<TokenUsage> {
    let pairs = [
        (&response_body["usage"]["input_tokens"], &response_body["usage"]["output_tokens"]),
        (&response_body["usage"]["inputTokens"], &response_body["usage"]["outputTokens"]),
        (
            &response_body["amazon-bedrock-invocationMetrics"]["inputTokenCount"],
            &response_body["amazon-bedrock-invocationMetrics"]["outputTokenCount"],
        ),
    ];

    pairs.iter().find_map(|(input, output)| {
        let (input, output) = (input.as_u64()?, output.as_u64()?);
        Some(TokenUsage {
            input_tokens: input as u32,
            output_tokens: output as u32,
            total_tokens: (input + output) as u32,
        })
    })
}
