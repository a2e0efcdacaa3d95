//! The per-attempt executor loop (§4.2.2): drives one LLM attempt through
//! its tool-use turns under the thrash guard and stop hook, and dispatches
//! by task kind.

use std::collections::HashMap;
use std::path::Path;

use futures::StreamExt;
use undercity_config::WorkerConfig;
use undercity_provider::{
    ChatRequest, ContentPart, Message, MessageContent, Provider, Role, StreamEvent, Tier,
};

use crate::tools::{self, ToolContext};
use crate::types::SessionHandle;
use crate::worker::sentinels::{self, Sentinel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Meta,
    Research,
    Implementation,
}

#[derive(Debug)]
pub enum AttemptOutcome {
    /// The model emitted a sentinel or the executor detected a terminal
    /// condition without proceeding to verification.
    Sentinel(Sentinel),
    /// The loop ran out of turns, or the LLM stopped with zero writes
    /// three times in a row.
    VagueTask,
    /// Proceed to verification with these file paths touched.
    ReadyToVerify { touched_files: Vec<String> },
}

pub struct AttemptInput<'a> {
    pub provider: &'a dyn Provider,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub briefing: &'a str,
    pub session: &'a SessionHandle,
    pub tier: Tier,
    pub task_kind: TaskKind,
    pub project_root: &'a Path,
    pub worker_config: &'a WorkerConfig,
}

pub struct AttemptResult {
    pub outcome: AttemptOutcome,
    pub conversation_id: Option<String>,
    pub tokens_used: u32,
    pub file_thrash: bool,
    pub touched_files: Vec<String>,
    pub transcript: String,
}

/// Runs one attempt to completion: a sequence of LLM turns, each possibly
/// followed by tool execution, bounded by the tier's turn cap.
pub async fn run_attempt(input: &AttemptInput<'_>) -> anyhow::Result<AttemptResult> {
    let toolset = tools::default_toolset();
    let tool_defs = tools::tool_definitions(&toolset);
    let tool_ctx = ToolContext { cwd: input.project_root.to_path_buf() };

    let mut messages = vec![Message {
        role: Role::User,
        content: MessageContent::Text(input.briefing.to_string()),
    }];

    let turn_cap = input.tier.turn_cap(input.worker_config);
    let mut write_counts: HashMap<String, u32> = HashMap::new();
    let mut consecutive_zero_write_stops: u32 = 0;
    let mut conversation_id = input.session.conversation_id.clone();
    let mut total_tokens: u32 = 0;
    let mut transcript = String::new();
    let mut touched_files: Vec<String> = Vec::new();
    let is_exempt_from_stop_hook = matches!(input.task_kind, TaskKind::Meta | TaskKind::Research);

    for _turn in 0..turn_cap {
        let request = ChatRequest {
            model: input.model.to_string(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
            max_tokens: None,
            temperature: None,
            system: Some(input.system_prompt.to_string()),
            stream: true,
            conversation_id: conversation_id.clone(),
        };

        let mut stream = input.provider.chat_stream(&request).await?;
        let mut turn_text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::AssistantTextChunk(chunk) => {
                    turn_text.push_str(&chunk);
                    transcript.push_str(&chunk);
                }
                StreamEvent::ToolUseRequest { id, name, input: tool_input } => {
                    tool_calls.push((id, name, tool_input));
                }
                StreamEvent::Result { text, tokens, conversation_id: cid, .. } => {
                    if !text.is_empty() {
                        turn_text.push_str(&text);
                        transcript.push_str(&text);
                    }
                    total_tokens += tokens.total();
                    conversation_id = cid.or(conversation_id);
                }
                StreamEvent::ContentBlockStart | StreamEvent::ToolResult { .. } => {}
                StreamEvent::Error(err) => {
                    return Err(anyhow::anyhow!("provider stream error: {err}"));
                }
            }
        }

        if let Some(sentinel) = sentinels::scan(&turn_text) {
            return Ok(AttemptResult {
                outcome: AttemptOutcome::Sentinel(sentinel),
                conversation_id,
                tokens_used: total_tokens,
                file_thrash: false,
                touched_files,
                transcript,
            });
        }

        messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Text(turn_text.clone()),
        });

        if tool_calls.is_empty() {
            if is_exempt_from_stop_hook || !touched_files.is_empty() {
                return Ok(AttemptResult {
                    outcome: AttemptOutcome::ReadyToVerify { touched_files: touched_files.clone() },
                    conversation_id,
                    tokens_used: total_tokens,
                    file_thrash: false,
                    touched_files,
                    transcript,
                });
            }

            consecutive_zero_write_stops += 1;
            if consecutive_zero_write_stops >= 3 {
                return Ok(AttemptResult {
                    outcome: AttemptOutcome::VagueTask,
                    conversation_id,
                    tokens_used: total_tokens,
                    file_thrash: false,
                    touched_files,
                    transcript,
                });
            }
            let nudge = if consecutive_zero_write_stops == 2 {
                "You have made no changes across two attempts. If this task cannot be completed \
                 as a single unit, reply with NEEDS_DECOMPOSITION: <subtasks>."
            } else {
                "You stopped without making any changes. Continue working toward the objective."
            };
            messages.push(Message {
                role: Role::User,
                content: MessageContent::Text(nudge.to_string()),
            });
            continue;
        }

        let mut tool_result_parts = Vec::new();
        for (id, name, args) in tool_calls {
            let outcome = tools::dispatch(&toolset, &name, args, &tool_ctx).await;
            if let Some(path) = &outcome.touched_path {
                if outcome.wrote {
                    let count = write_counts.entry(path.clone()).or_insert(0);
                    *count += 1;
                    if !touched_files.contains(path) {
                        touched_files.push(path.clone());
                    }
                    if *count > input.worker_config.max_writes_per_file {
                        return Ok(AttemptResult {
                            outcome: AttemptOutcome::ReadyToVerify { touched_files: touched_files.clone() },
                            conversation_id,
                            tokens_used: total_tokens,
                            file_thrash: true,
                            touched_files,
                            transcript,
                        });
                    }
                }
            }
            transcript.push_str(&format!("\n[tool:{name}] {}\n", outcome.output));
            tool_result_parts.push(ContentPart::ToolResult {
                tool_use_id: id,
                content: outcome.output,
                is_error: outcome.is_error,
            });
        }
        consecutive_zero_write_stops = 0;
        messages.push(Message {
            role: Role::Tool,
            content: MessageContent::Parts(tool_result_parts),
        });
    }

    Ok(AttemptResult {
        outcome: AttemptOutcome::ReadyToVerify { touched_files: touched_files.clone() },
        conversation_id,
        tokens_used: total_tokens,
        file_thrash: false,
        touched_files,
        transcript,
    })
}
