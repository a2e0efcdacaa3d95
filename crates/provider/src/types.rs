use serde::{Deserialize, Serialize};

/// Ordered LLM capability tier: cheap < mid < strong. The router, the
/// escalator, and the capability ledger all operate symbolically on this
/// ordering, never on model names directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cheap,
    Mid,
    Strong,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Cheap, Tier::Mid, Tier::Strong];

    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Cheap => Some(Tier::Mid),
            Tier::Mid => Some(Tier::Strong),
            Tier::Strong => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Tier::Cheap => 0,
            Tier::Mid => 1,
            Tier::Strong => 2,
        }
    }

    pub fn turn_cap(self, worker: &undercity_config::WorkerConfig) -> u32 {
        match self {
            Tier::Cheap => worker.turn_cap_cheap,
            Tier::Mid => worker.turn_cap_mid,
            Tier::Strong => worker.turn_cap_strong,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Cheap => write!(f, "cheap"),
            Tier::Mid => write!(f, "mid"),
            Tier::Strong => write!(f, "strong"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cheap" | "low" => Ok(Tier::Cheap),
            "mid" | "medium" => Ok(Tier::Mid),
            "strong" | "high" => Ok(Tier::Strong),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    #[serde(default)]
    pub input_price_per_m: f64,
    #[serde(default)]
    pub output_price_per_m: f64,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
    pub stream: bool,
    /// Resume an existing conversation rather than starting fresh, per
    /// spec.md's "session continuity" rule in the executor loop.
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text(s) => s,
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: Option<String>,
    /// Conversation id the provider assigned, for session resumption.
    pub conversation_id: Option<String>,
    pub turns: u32,
}

/// Tagged variant of the heterogeneous event stream an LLM client emits,
/// per spec.md §9 "Event-stream parsing".
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentBlockStart,
    AssistantTextChunk(String),
    ToolUseRequest {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        is_error: bool,
        content: String,
    },
    Result {
        text: String,
        tokens: Usage,
        turns: u32,
        conversation_id: Option<String>,
    },
    Error(String),
}
