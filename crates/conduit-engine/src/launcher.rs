//! Spawns the external agent CLI and exposes its stdout as lines.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use conduit_core::OrchestratorError;

/// Stderr lines retained for crash reports.
const STDERR_TAIL_LINES: usize = 20;

/// How long a crash report waits for the stderr reader to hit EOF. A
/// grandchild can hold the pipe open past the agent's exit.
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Conversation continuity flag for the agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionFlag {
    /// First turn: create the agent session under this token.
    New(String),
    /// Later turns: continue the agent session with this token.
    Resume(String),
}

impl SessionFlag {
    pub fn for_turn(is_first_turn: bool, token: impl Into<String>) -> Self {
        if is_first_turn {
            Self::New(token.into())
        } else {
            Self::Resume(token.into())
        }
    }
}

/// Everything needed to start one agent process.
#[derive(Clone, Debug)]
pub struct AgentInvocation {
    pub binary: String,
    pub model: String,
    pub session: Option<SessionFlag>,
    pub skip_permissions: bool,
    /// Mode-specific flags such as `--system-prompt`.
    pub extra_args: Vec<String>,
    /// Tool policy flags (`--mcp-config`, `--disallowedTools`); always last.
    pub tool_args: Vec<String>,
    pub work_dir: PathBuf,
    /// Written to stdin, then stdin is closed.
    pub message: String,
}

impl AgentInvocation {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-p", "--output-format", "stream-json", "--verbose"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".into());
        }
        args.push("--model".into());
        args.push(self.model.clone());
        match &self.session {
            Some(SessionFlag::New(token)) => {
                args.push("--session-id".into());
                args.push(token.clone());
            }
            Some(SessionFlag::Resume(token)) => {
                args.push("--resume".into());
                args.push(token.clone());
            }
            None => {}
        }
        args.extend(self.extra_args.iter().cloned());
        args.extend(self.tool_args.iter().cloned());
        args
    }

    /// Start the process with piped stdio. The message is fed on a separate
    /// task so a chatty agent cannot deadlock against a full stdin pipe.
    pub async fn spawn(&self) -> Result<AgentProcess, OrchestratorError> {
        if !self.work_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(&self.work_dir)
                .await
                .map_err(|e| OrchestratorError::LaunchFailure(format!("work dir: {e}")))?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.work_dir.as_os_str().is_empty() {
            cmd.current_dir(&self.work_dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::LaunchFailure(format!("{}: {e}", self.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::LaunchFailure("stdout not captured".into()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let message = self.message.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(message.as_bytes()).await {
                    debug!(error = %e, "agent stdin closed early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_drain = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "conduit_engine::agent_stderr", "{line}");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        Ok(AgentProcess {
            child,
            stdout: BufReader::new(stdout),
            buf: Vec::new(),
            stderr_tail,
            stderr_drain,
        })
    }
}

/// A running agent process.
pub struct AgentProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    buf: Vec<u8>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl AgentProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next stdout line without its terminator; `None` once the process
    /// closed its stdout. Invalid UTF-8 is replaced, not rejected.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.stdout.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Most recent stderr output, oldest first. Waits briefly for the
    /// reader to reach EOF so lines written just before exit are included.
    pub async fn stderr_tail(&mut self) -> String {
        if let Some(drain) = self.stderr_drain.as_mut() {
            match tokio::time::timeout(STDERR_DRAIN_WAIT, drain).await {
                Ok(_) => self.stderr_drain = None,
                Err(_) => debug!("stderr still open after agent exit"),
            }
        }
        self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub async fn terminate(&mut self, grace: Duration) {
        terminate_child(&mut self.child, grace).await;
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) {
    send_sigterm(child);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "child ignored SIGTERM, killing");
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &Child) {
    let _ = child;
}
