//! Agent CLI invocation
//!
//! Runs the agent CLI once per chat message and captures its output.
//! Each call is independent; nothing here limits how many run at once.

use crate::config::AgentConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit code reported when the process could not be spawned, was killed
/// by a signal, or timed out
pub const FAILED_EXIT_CODE: i32 = -1;

/// Captured result of one agent run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationOutput {
    /// Output for a run that never produced a process exit status
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            exit_code: FAILED_EXIT_CODE,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that can answer a chat message
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run the agent with `text` and collect its output.
    ///
    /// Never fails: spawn errors are reported as a non-zero exit code with
    /// the cause in `stderr`.
    async fn invoke(&self, text: &str) -> InvocationOutput;
}

/// Invokes an external agent command:
/// `{program} {subcommand} --agent {agent_name} --message {text}`
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    subcommand: String,
    agent_name: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    timeout: Option<Duration>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            program: program.into(),
            subcommand: defaults.subcommand,
            agent_name: defaults.agent_name,
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
        }
    }

    /// Build an invoker from the `[agent]` config section
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            program: config.command.clone(),
            subcommand: config.subcommand.clone(),
            agent_name: config.agent_name.clone(),
            working_dir: config.working_dir.clone(),
            env: HashMap::new(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn subcommand(mut self, subcommand: impl Into<String>) -> Self {
        self.subcommand = subcommand.into();
        self
    }

    pub fn agent_name(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = agent_name.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Argument vector for one message
    pub fn args_for(&self, text: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(5);
        if !self.subcommand.is_empty() {
            args.push(self.subcommand.clone());
        }
        args.push("--agent".to_string());
        args.push(self.agent_name.clone());
        args.push("--message".to_string());
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    async fn invoke(&self, text: &str) -> InvocationOutput {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(text))
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(program = %self.program, agent = %self.agent_name, "Spawning agent");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(program = %self.program, "Failed to spawn agent: {}", e);
                return InvocationOutput::failed(format!(
                    "Failed to start agent command '{}': {}",
                    self.program, e
                ));
            }
        };

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    // The child was dropped with the future; kill_on_drop reaps it.
                    tracing::warn!(
                        program = %self.program,
                        timeout_secs = limit.as_secs(),
                        "Agent timed out"
                    );
                    return InvocationOutput::failed(format!(
                        "agent timed out after {}s",
                        limit.as_secs()
                    ));
                }
            },
            None => child.wait_with_output().await,
        };

        match waited {
            Ok(output) => {
                let exit_code = output.status.code().unwrap_or(FAILED_EXIT_CODE);
                tracing::info!(exit_code = exit_code, "Agent process exited");
                InvocationOutput {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            Err(e) => {
                tracing::error!("Failed to collect agent output: {}", e);
                InvocationOutput::failed(format!("Failed to read agent output: {}", e))
            }
        }
    }
}

/// Turn an agent run into the text sent back as `chat_response`.
///
/// A failed run with diagnostics reports the diagnostics; an empty reply
/// acknowledges the original message; anything else is the trimmed stdout.
pub fn compose_reply(output: &InvocationOutput, user_text: &str) -> String {
    if !output.succeeded() && !output.stderr.is_empty() {
        return format!(
            "An error occurred while processing your request: {}",
            output.stderr
        );
    }

    let reply = output.stdout.trim();
    if reply.is_empty() {
        format!("Received your message: \"{}\"", user_text)
    } else {
        reply.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> InvocationOutput {
        InvocationOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_compose_reply_uses_trimmed_stdout() {
        assert_eq!(compose_reply(&output(0, "Hello\n", ""), "hi"), "Hello");
    }

    #[test]
    fn test_compose_reply_reports_stderr_on_failure() {
        let reply = compose_reply(&output(1, "", "boom"), "hi");
        assert!(reply.contains("boom"));
    }

    #[test]
    fn test_compose_reply_falls_back_to_user_text() {
        let reply = compose_reply(&output(0, "  \n", ""), "hi");
        assert!(reply.contains("\"hi\""));
    }

    #[test]
    fn test_compose_reply_failure_without_stderr_uses_stdout() {
        assert_eq!(compose_reply(&output(2, "partial", ""), "hi"), "partial");
    }

    #[test]
    fn test_compose_reply_stderr_ignored_on_success() {
        assert_eq!(compose_reply(&output(0, "ok", "warning"), "hi"), "ok");
    }

    #[test]
    fn test_args_for_default_agent() {
        let invoker = CommandInvoker::new("openclaw");
        assert_eq!(
            invoker.args_for("hello there"),
            vec!["agent", "--agent", "main", "--message", "hello there"]
        );
    }

    #[test]
    fn test_args_from_config() {
        let config = AgentConfig {
            agent_name: "research".to_string(),
            subcommand: String::new(),
            ..Default::default()
        };
        let invoker = CommandInvoker::from_config(&config);
        assert_eq!(invoker.args_for("x"), vec!["--agent", "research", "--message", "x"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_not_raised() {
        let invoker = CommandInvoker::new("clawbridge-definitely-missing-binary");
        let out = invoker.invoke("hi").await;
        assert_eq!(out.exit_code, FAILED_EXIT_CODE);
        assert!(out.stderr.contains("clawbridge-definitely-missing-binary"));
        assert!(out.stdout.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        // `echo agent --agent main --message hi` prints its arguments.
        let invoker = CommandInvoker::new("echo");
        let out = invoker.invoke("hi").await;
        assert!(out.succeeded());
        assert_eq!(out.stdout.trim(), "agent --agent main --message hi");
    }

    /// Invoker running `sh <script>`, so the script sees
    /// `$1=--agent $2=<name> $3=--message $4=<text>`
    #[cfg(unix)]
    fn script_invoker(dir: &tempfile::TempDir, body: &str) -> CommandInvoker {
        let path = dir.path().join("fake-agent.sh");
        std::fs::write(&path, body).unwrap();
        CommandInvoker::new("sh").subcommand(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stderr_and_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = script_invoker(&dir, "echo boom >&2\nexit 3");
        let out = invoker.invoke("hi").await;
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "boom");
        assert!(out.stdout.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_message_passed_as_parameter() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = script_invoker(&dir, "printf '%s|%s' \"$2\" \"$4\"");
        let out = invoker.invoke("what's up?").await;
        assert!(out.succeeded());
        assert_eq!(out.stdout, "main|what's up?");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_agent() {
        let dir = tempfile::TempDir::new().unwrap();
        let invoker = script_invoker(&dir, "sleep 5").timeout(Duration::from_millis(100));
        let out = invoker.invoke("ignored").await;
        assert_eq!(out.exit_code, FAILED_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }
}
