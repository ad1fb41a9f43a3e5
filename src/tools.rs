//! Tools declared to the gateway for the test-driven agent, and the
//! registry that executes the invocations it sends back. Everything
//! runs inside a throwaway workspace that is removed on drop.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::executor::run_with_timeout;
use crate::provider::reply::ToolInvocation;
use crate::provider::schema::ToolSpec;

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "write_file".into(),
            description: "Create or overwrite a file in the workspace".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path of the file" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: "read_file".into(),
            description: "Read a file from the workspace".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path of the file" }
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: "run_python".into(),
            description: "Run a Python file in the workspace and return its output".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path of the file to run" }
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: "finish".into(),
            description: "Mark the task complete. Only call when every test passes.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "One-line summary" }
                },
                "required": ["summary"]
            }),
        },
    ]
}

pub struct ToolRegistry {
    workspace: PathBuf,
    run_timeout: Duration,
    finished: bool,
    written: Vec<String>,
}

impl ToolRegistry {
    pub fn new(run_timeout: Duration) -> Self {
        let workspace = std::env::temp_dir().join(format!("repairbench-agent-{}", Uuid::new_v4()));
        let _ = fs::create_dir_all(&workspace);

        Self {
            workspace,
            run_timeout,
            finished: false,
            written: Vec::new(),
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Execute one invocation. Unknown names and bad arguments come
    /// back as error results for the model, never as controller faults.
    pub fn execute(&mut self, inv: &ToolInvocation) -> Value {
        debug!(tool = %inv.name, "tool invocation");

        let result = match inv.name.as_str() {
            "write_file" => self.write_file(&inv.arguments),
            "read_file" => self.read_file(&inv.arguments),
            "run_python" => self.run_python(&inv.arguments),
            "finish" => {
                self.finished = true;
                let summary = inv
                    .arguments
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or("done");
                Ok(summary.to_string())
            }
            other => Err(format!("unknown tool: {other}")),
        };

        match result {
            Ok(output) => json!({ "success": true, "output": output }),
            Err(e) => json!({ "success": false, "error": e }),
        }
    }

    /// Code of the last non-test Python file the agent wrote.
    pub fn solution_code(&self) -> Option<String> {
        self.last_written(|name| name.ends_with(".py") && !name.starts_with("test_"))
    }

    /// Code of the last test file the agent wrote.
    pub fn test_code(&self) -> Option<String> {
        self.last_written(|name| name.ends_with(".py") && name.starts_with("test_"))
    }

    fn last_written(&self, matches: impl Fn(&str) -> bool) -> Option<String> {
        self.written
            .iter()
            .rev()
            .find(|rel| {
                Path::new(rel)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(&matches)
                    .unwrap_or(false)
            })
            .and_then(|rel| fs::read_to_string(self.workspace.join(rel)).ok())
    }

    fn write_file(&mut self, args: &Value) -> Result<String, String> {
        let rel = str_arg(args, "path")?;
        let content = str_arg(args, "content")?;
        let path = self.resolve(rel)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&path, content).map_err(|e| e.to_string())?;

        self.written.retain(|w| w != rel);
        self.written.push(rel.to_string());
        Ok(format!("wrote {rel}"))
    }

    fn read_file(&self, args: &Value) -> Result<String, String> {
        let rel = str_arg(args, "path")?;
        let path = self.resolve(rel)?;
        fs::read_to_string(path).map_err(|e| format!("{rel}: {e}"))
    }

    fn run_python(&self, args: &Value) -> Result<String, String> {
        let rel = str_arg(args, "path")?;
        let path = self.resolve(rel)?;

        let out = run_with_timeout(
            Command::new("python3").arg(&path).current_dir(&self.workspace),
            self.run_timeout,
        );

        if out.timed_out {
            return Err(format!(
                "timed out after {}s",
                self.run_timeout.as_secs()
            ));
        }

        let mut text = String::new();
        if !out.stdout.trim().is_empty() {
            text.push_str(out.stdout.trim());
        }
        if !out.stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(out.stderr.trim());
        }

        if out.success {
            Ok(if text.is_empty() { "ok (no output)".into() } else { text })
        } else {
            Err(if text.is_empty() { "exited non-zero".into() } else { text })
        }
    }

    /// Confine every path to the workspace.
    fn resolve(&self, rel: &str) -> Result<PathBuf, String> {
        let p = Path::new(rel);

        if p.is_absolute()
            || p.components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(format!("path escapes workspace: {rel}"));
        }

        Ok(self.workspace.join(p))
    }
}

impl Drop for ToolRegistry {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.workspace);
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing argument `{key}`"))
}
