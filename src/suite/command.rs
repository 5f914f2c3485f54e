//! Command-backed work items
//!
//! Each item runs one external command; its exit status is the outcome.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::models::{ItemId, ItemResult, WorkItem};
use crate::utils::Timer;

/// Longest stderr tail carried in a failure payload
const STDERR_TAIL_BYTES: usize = 4096;

/// A work item that executes a command
#[derive(Clone, Debug)]
pub struct CommandItem {
    id: ItemId,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    skip_exit_code: i32,
}

impl CommandItem {
    /// `argv` must not be empty; the manifest loader enforces this.
    pub fn new(id: ItemId, argv: Vec<String>) -> Self {
        Self {
            id,
            argv,
            env: BTreeMap::new(),
            cwd: None,
            timeout: None,
            skip_exit_code: 77,
        }
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn skip_exit_code(mut self, code: i32) -> Self {
        self.skip_exit_code = code;
        self
    }

    fn command(&self) -> Option<Command> {
        let (program, args) = self.argv.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        Some(cmd)
    }
}

#[async_trait]
impl WorkItem for CommandItem {
    fn id(&self) -> &ItemId {
        &self.id
    }

    async fn run(&self) -> ItemResult {
        let timer = Timer::start(self.id.address());

        let Some(mut cmd) = self.command() else {
            return ItemResult::error(0, json!({"message": "empty command"}));
        };

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return ItemResult::error(
                        timer.stop(),
                        json!({"message": format!("timed out after {}s", limit.as_secs())}),
                    );
                }
            },
            None => cmd.output().await,
        };
        let duration_ms = timer.stop();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return ItemResult::error(
                    duration_ms,
                    json!({"message": format!("failed to spawn {}: {e}", self.argv[0])}),
                );
            }
        };

        let stderr = tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_BYTES);
        debug!("{} exited with {}", self.id, output.status);

        match output.status.code() {
            Some(0) => ItemResult::success(duration_ms),
            Some(code) if code == self.skip_exit_code => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let reason = stdout
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("skipped")
                    .trim()
                    .to_string();
                ItemResult {
                    duration_ms,
                    ..ItemResult::skip(reason)
                }
            }
            Some(code) => ItemResult::failure(
                duration_ms,
                json!({
                    "exit_code": code,
                    "stderr": stderr,
                    "message": format!("exited with status {code}"),
                }),
            ),
            None => ItemResult::error(
                duration_ms,
                json!({"stderr": stderr, "message": "terminated by signal"}),
            ),
        }
    }
}

/// Last `max` bytes of `text`, cut on a char boundary
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
