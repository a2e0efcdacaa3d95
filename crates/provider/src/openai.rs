use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::json;

use crate::sse::parse_sse_stream;
use crate::types::*;
use crate::{Provider, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4.1";

pub fn default_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "gpt-4.1-mini".into(),
            name: "GPT-4.1 Mini".into(),
            provider: "openai".into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 0.4,
            output_price_per_m: 1.6,
            tier: Tier::Cheap,
        },
        ModelInfo {
            id: "gpt-4.1".into(),
            name: "GPT-4.1".into(),
            provider: "openai".into(),
            context_window: 272_000,
            max_output_tokens: 32_768,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 2.0,
            output_price_per_m: 8.0,
            tier: Tier::Mid,
        },
        ModelInfo {
            id: "o3".into(),
            name: "o3".into(),
            provider: "openai".into(),
            context_window: 200_000,
            max_output_tokens: 100_000,
            supports_tools: true,
            supports_streaming: true,
            input_price_per_m: 10.0,
            output_price_per_m: 40.0,
            tier: Tier::Strong,
        },
    ]
}

pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    models: Vec<ModelInfo>,
}

impl OpenAIProvider {
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

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn build_messages(&self, request: &ChatRequest) -> Vec<serde_json::Value> {
        let mut msgs = Vec::new();
        if let Some(system) = &request.system {
            msgs.push(json!({"role": "system", "content": system}));
        }
        for msg in &request.messages {
            msgs.push(match &msg.content {
                MessageContent::Text(text) => json!({
                    "role": role_str(&msg.role),
                    "content": text,
                }),
                MessageContent::Parts(parts) => {
                    let content: Vec<serde_json::Value> = parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => json!({"type": "text", "text": text}),
                            ContentPart::ToolUse { id, name, input } => json!({
                                "type": "function",
                                "id": id,
                                "function": {"name": name, "arguments": input.to_string()},
                            }),
                            ContentPart::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }),
                        })
                        .collect();
                    json!({"role": role_str(&msg.role), "content": content})
                }
            });
        }
        msgs
    }

    fn build_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
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
        });
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
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

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supported_models(&self) -> &[ModelInfo] {
        &self.models
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(request, false);
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self.request(&url).json(&body).send().await?;

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
        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(content),
            },
            usage: Usage {
                input_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            },
            finish_reason: choice["finish_reason"].as_str().map(String::from),
            conversation_id: data["id"].as_str().map(String::from),
            turns: 1,
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(request, true);
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self.request(&url).json(&body).send().await?;

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
        let mut acc = String::new();
        let mut usage = Usage::default();

        let event_stream = futures::stream::unfold(
            (sse_stream, acc.clone(), usage.clone()),
            move |(mut stream, mut acc, mut usage)| async move {
                loop {
                    let item = stream.next().await?;
                    let sse = match item {
                        Ok(sse) => sse,
                        Err(e) => return Some((Err(e), (stream, acc, usage))),
                    };
                    let Some(data) = sse.json() else { continue };

                    if let Some(u) = data.get("usage").filter(|u| u.is_object()) {
                        usage.input_tokens = u["prompt_tokens"].as_u64().unwrap_or(0) as u32;
                        usage.output_tokens = u["completion_tokens"].as_u64().unwrap_or(0) as u32;
                        continue;
                    }

                    if data["choices"][0]["finish_reason"].is_string() {
                        return Some((
                            Ok(StreamEvent::Result {
                                text: acc.clone(),
                                tokens: usage.clone(),
                                turns: 1,
                                conversation_id: data["id"].as_str().map(String::from),
                            }),
                            (stream, acc, usage),
                        ));
                    }

                    let delta = &data["choices"][0]["delta"];
                    if let Some(content) = delta["content"].as_str() {
                        if content.is_empty() {
                            continue;
                        }
                        acc.push_str(content);
                        return Some((
                            Ok(StreamEvent::AssistantTextChunk(content.to_string())),
                            (stream, acc, usage),
                        ));
                    }

                    if let Some(tool_calls) = delta["tool_calls"].as_array() {
                        if let Some(tc) = tool_calls.first() {
                            if let Some(function) = tc.get("function") {
                                if let Some(name) = function["name"].as_str() {
                                    let input = function["arguments"]
                                        .as_str()
                                        .and_then(|s| serde_json::from_str(s).ok())
                                        .unwrap_or(json!({}));
                                    return Some((
                                        Ok(StreamEvent::ToolUseRequest {
                                            id: tc["id"].as_str().unwrap_or("").to_string(),
                                            name: name.to_string(),
                                            input,
                                        }),
                                        (stream, acc, usage),
                                    ));
                                }
                            }
                        }
                        continue;
                    }

                    continue;
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
    fn default_model_used_when_request_model_empty() {
        let provider = OpenAIProvider::new("key".into(), None, Some("gpt-4.1".into()));
        let request = ChatRequest {
            model: String::new(),
            messages: vec![],
            tools: vec![],
            max_tokens: None,
            temperature: None,
            system: None,
            stream: false,
            conversation_id: None,
        };
        let body = provider.build_body(&request, false);
        assert_eq!(body["model"], "gpt-4.1");
    }
}
