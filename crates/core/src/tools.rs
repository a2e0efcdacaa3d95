//! The worker's file/shell tool surface: the only way an LLM attempt
//! touches the working tree. Grounded on the teacher's `tools/write.rs`,
//! `tools/edit.rs`, `tools/read.rs`, `tools/bash.rs` — trimmed to the
//! primitives the executor's supervisory hooks need to observe (successful
//! write vs no-op vs error).

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ToolContext {
    pub cwd: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
    /// True when the tool mutated the working tree. A no-op edit (content
    /// already correct) is a success but NOT a write for thrash-guard
    /// purposes — see `is_no_op`.
    pub wrote: bool,
    pub is_no_op: bool,
    pub touched_path: Option<String>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

fn resolve_path(file_path: &str, cwd: &Path) -> PathBuf {
    let p = Path::new(file_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it and parent directories if needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file_path"))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing content"))?;
        let path = resolve_path(file_path, &ctx.cwd);

        let previous = tokio::fs::read_to_string(&path).await.ok();
        if previous.as_deref() == Some(content) {
            return Ok(ToolOutcome {
                output: "content already correct, no changes made".to_string(),
                is_error: false,
                wrote: false,
                is_no_op: true,
                touched_path: Some(file_path.to_string()),
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        Ok(ToolOutcome {
            output: format!("wrote {}", path.display()),
            is_error: false,
            wrote: true,
            is_no_op: false,
            touched_path: Some(file_path.to_string()),
        })
    }
}

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace an exact, unique string occurrence in a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"}
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file_path"))?;
        let old_string = args
            .get("old_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing old_string"))?;
        let new_string = args
            .get("new_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing new_string"))?;
        let path = resolve_path(file_path, &ctx.cwd);

        if !path.exists() {
            return Ok(ToolOutcome {
                output: format!("file not found: {}", path.display()),
                is_error: true,
                wrote: false,
                is_no_op: false,
                touched_path: Some(file_path.to_string()),
            });
        }

        let content = tokio::fs::read_to_string(&path).await?;
        if old_string == new_string || content.contains(new_string) && !content.contains(old_string) {
            return Ok(ToolOutcome {
                output: "content already correct, no changes made".to_string(),
                is_error: false,
                wrote: false,
                is_no_op: true,
                touched_path: Some(file_path.to_string()),
            });
        }

        let count = content.matches(old_string).count();
        if count == 0 {
            return Ok(ToolOutcome {
                output: "old_string not found in file".to_string(),
                is_error: true,
                wrote: false,
                is_no_op: false,
                touched_path: Some(file_path.to_string()),
            });
        }
        if count > 1 {
            return Ok(ToolOutcome {
                output: format!("old_string matched {count} times, must be unique"),
                is_error: true,
                wrote: false,
                is_no_op: false,
                touched_path: Some(file_path.to_string()),
            });
        }

        let new_content = content.replacen(old_string, new_string, 1);
        tokio::fs::write(&path, &new_content).await?;
        Ok(ToolOutcome {
            output: format!("applied edit to {}", path.display()),
            is_error: false,
            wrote: true,
            is_no_op: false,
            touched_path: Some(file_path.to_string()),
        })
    }
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file's contents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"file_path": {"type": "string"}},
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing file_path"))?;
        let path = resolve_path(file_path, &ctx.cwd);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolOutcome {
                output: content,
                is_error: false,
                wrote: false,
                is_no_op: false,
                touched_path: Some(file_path.to_string()),
            }),
            Err(e) => Ok(ToolOutcome {
                output: format!("failed to read {}: {e}", path.display()),
                is_error: true,
                wrote: false,
                is_no_op: false,
                touched_path: Some(file_path.to_string()),
            }),
        }
    }
}

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the task's working directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing command"))?;
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.cwd)
            .output()
            .await?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(ToolOutcome {
            output: combined,
            is_error: !output.status.success(),
            // Shell commands are not counted by the per-file thrash guard.
            wrote: false,
            is_no_op: false,
            touched_path: None,
        })
    }
}

pub fn default_toolset() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ReadTool),
        Box::new(WriteTool),
        Box::new(EditTool),
        Box::new(BashTool),
    ]
}

pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<undercity_provider::ToolDefinition> {
    tools
        .iter()
        .map(|t| undercity_provider::ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect()
}

pub async fn dispatch(tools: &[Box<dyn Tool>], name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
    match tools.iter().find(|t| t.name() == name) {
        Some(tool) => tool.execute(args, ctx).await.unwrap_or_else(|e| ToolOutcome {
            output: format!("tool error: {e}"),
            is_error: true,
            wrote: false,
            is_no_op: false,
            touched_path: None,
        }),
        None => ToolOutcome {
            output: format!("unknown tool: {name}"),
            is_error: true,
            wrote: false,
            is_no_op: false,
            touched_path: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_tool_creates_file_and_parents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext { cwd: dir.path().to_path_buf() };
        let outcome = WriteTool
            .execute(json!({"file_path": "a/b.txt", "content": "hi"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.wrote);
        assert!(!outcome.is_no_op);
        assert_eq!(tokio::fs::read_to_string(dir.path().join("a/b.txt")).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn write_tool_same_content_is_no_op() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "same").await.unwrap();
        let ctx = ToolContext { cwd: dir.path().to_path_buf() };
        let outcome = WriteTool
            .execute(json!({"file_path": "a.txt", "content": "same"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.wrote);
        assert!(outcome.is_no_op);
    }

    #[tokio::test]
    async fn edit_tool_rejects_ambiguous_match() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "x x").await.unwrap();
        let ctx = ToolContext { cwd: dir.path().to_path_buf() };
        let outcome = EditTool
            .execute(json!({"file_path": "a.txt", "old_string": "x", "new_string": "y"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.is_error);
    }
}
