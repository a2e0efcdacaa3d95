use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::json;

use crate::sse::parse_sse_stream;
use crate::types::*;
use crate::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

pub fn default_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "claude-haiku-4-20250514".into(),
            name: "Claude Haiku 4".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 8_192,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 0.8,
            output_price_per_m: 4.0,
            tier: Tier::Cheap,
        },
        ModelInfo {
            id: "claude-sonnet-4-20250514".into(),
            name: "Claude Sonnet 4".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 16_384,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 3.0,
            output_price_per_m: 15.0,
            tier: Tier::Mid,
        },
        ModelInfo {
            id: "claude-opus-4-20250514".into(),
            name: "Claude Opus 4".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 32_768,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 15.0,
            output_price_per_m: 75.0,
            tier: Tier::Strong,
        },
    ]
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    models: Vec<ModelInfo>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            models: default_models(),
        }
    }

    fn build_messages(&self, request: &ChatRequest) -> Vec<serde_json::Value> {
        request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|msg| {
                let content = match &msg.content {
                    MessageContent::Text(text) => json!(text),
                    MessageContent::Parts(parts) => {
                        let content: Vec<serde_json::Value> = parts
                            .iter()
                            .map(|p| match p {
                                ContentPart::Text { text } => {
                                    json!({"type": "text", "text": text})
                                }
                                ContentPart::ToolUse { id, name, input } => json!({
                                    "type": "tool_use",
                                    "id": id,
                                    "name": name,
                                    "input": input,
                                }),
                                ContentPart::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => json!({
                                    "type": "tool_result",
                                    "tool_use_id": tool_use_id,
                                    "content": content,
                                    "is_error": is_error,
                                }),
                            })
                            .collect();
                        json!(content)
                    }
                };
                json!({
                    "role": match msg.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": content,
                })
            })
            .collect()
    }

    fn build_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };
        let mut body = json!({
            "model": model,
            "messages": self.build_messages(request),
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(self.build_tools(&request.tools));
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supported_models(&self) -> &[ModelInfo] {
        &self.models
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(request, false);

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let text = resp.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_http(status.as_u16(), text, retry_after.as_deref()).into(),
            );
        }

        let data: serde_json::Value = resp.json().await?;
        let content = data["content"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(content),
            },
            usage: Usage {
                input_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            },
            finish_reason: data["stop_reason"].as_str().map(String::from),
            conversation_id: data["id"].as_str().map(String::from),
            turns: 1,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(request, true);

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let text = resp.text().await.unwrap_or_default();
            return Err(
                ProviderError::from_http(status.as_u16(), text, retry_after.as_deref()).into(),
            );
        }

        let sse_stream = parse_sse_stream(resp);
        let mut pending_tool: Option<(String, String, String)> = None;
        let mut text_acc = String::new();
        let mut usage = Usage::default();

        let event_stream = futures::stream::unfold(
            (sse_stream, pending_tool.take(), text_acc.clone(), usage.clone()),
            move |(mut stream, mut tool, mut acc, mut usage)| async move {
                loop {
                    let item = stream.next().await?;
                    let sse = match item {
                        Ok(sse) => sse,
                        Err(e) => return Some((Err(e), (stream, tool, acc, usage))),
                    };
                    let Some(data) = sse.json() else { continue };
                    let event_type = sse.event.as_deref().unwrap_or("");

                    match event_type {
                        "message_start" => {
                            let input = data["message"]["usage"]["input_tokens"]
                                .as_u64()
                                .unwrap_or(0) as u32;
                            usage.input_tokens = input;
                            continue;
                        }
                        "content_block_start" => {
                            let block = &data["content_block"];
                            if block["type"] == "tool_use" {
                                tool = Some((
                                    block["id"].as_str().unwrap_or("").to_string(),
                                    block["name"].as_str().unwrap_or("").to_string(),
                                    String::new(),
                                ));
                            }
                            return Some((
                                Ok(StreamEvent::ContentBlockStart),
                                (stream, tool, acc, usage),
                            ));
                        }
                        "content_block_delta" => {
                            let delta = &data["delta"];
                            if delta["type"] == "text_delta" {
                                let chunk = delta["text"].as_str().unwrap_or("").to_string();
                                acc.push_str(&chunk);
                                return Some((
                                    Ok(StreamEvent::AssistantTextChunk(chunk)),
                                    (stream, tool, acc, usage),
                                ));
                            } else if delta["type"] == "input_json_delta" {
                                if let Some((_, _, ref mut partial)) = tool {
                                    partial
                                        .push_str(delta["partial_json"].as_str().unwrap_or(""));
                                }
                                continue;
                            }
                            continue;
                        }
                        "content_block_stop" => {
                            if let Some((id, name, partial)) = tool.take() {
                                let input: serde_json::Value =
                                    serde_json::from_str(&partial).unwrap_or(json!({}));
                                return Some((
                                    Ok(StreamEvent::ToolUseRequest { id, name, input }),
                                    (stream, None, acc, usage),
                                ));
                            }
                            continue;
                        }
                        "message_delta" => {
                            let output = data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                            usage.output_tokens = output;
                            continue;
                        }
                        "message_stop" => {
                            return Some((
                                Ok(StreamEvent::Result {
                                    text: acc.clone(),
                                    tokens: usage.clone(),
                                    turns: 1,
                                    conversation_id: None,
                                }),
                                (stream, tool, acc, usage),
                            ));
                        }
                        _ => continue,
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_are_ordered_cheap_to_strong() {
        let models = default_models();
        let tiers: Vec<Tier> = models.iter().map(|m| m.tier).collect();
        assert!(tiers.windows(2).all(|w| w[0] <= w[1]));
    }
}
