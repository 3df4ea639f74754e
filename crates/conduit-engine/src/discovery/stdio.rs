//! MCP over a child process's stdin/stdout, one JSON-RPC message per line.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use super::{
    initialize_request, initialized_notification, reply_for, tools_list_request, DiscoveryError,
    INITIALIZE_ID, TOOLS_LIST_ID,
};
use crate::launcher::terminate_child;

/// Time a tool server gets to exit on SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

pub(super) async fn list_tools(
    command: &str,
    args: &[String],
    read_timeout: Duration,
) -> Result<Value, DiscoveryError> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let outcome = exchange(&mut child, read_timeout).await;
    terminate_child(&mut child, TERMINATE_GRACE).await;
    outcome
}

async fn exchange(child: &mut Child, read_timeout: Duration) -> Result<Value, DiscoveryError> {
    let mut stdin = child.stdin.take().ok_or(DiscoveryError::Closed)?;
    let stdout = child.stdout.take().ok_or(DiscoveryError::Closed)?;
    let mut stdout = BufReader::new(stdout);

    send(&mut stdin, &initialize_request()).await?;
    read_reply(&mut stdout, INITIALIZE_ID, read_timeout).await?;
    send(&mut stdin, &initialized_notification()).await?;
    send(&mut stdin, &tools_list_request()).await?;
    read_reply(&mut stdout, TOOLS_LIST_ID, read_timeout).await
}

async fn send(stdin: &mut ChildStdin, message: &Value) -> Result<(), DiscoveryError> {
    let mut line = message.to_string();
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

/// Read lines until one answers `id`, the stream ends, or `timeout` elapses.
/// Partial lines stay buffered across reads.
async fn read_reply(
    stdout: &mut BufReader<ChildStdout>,
    id: u64,
    timeout: Duration,
) -> Result<Value, DiscoveryError> {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::time::timeout_at(deadline, stdout.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| DiscoveryError::Timeout("tool server reply"))??;
        if read == 0 {
            return Err(DiscoveryError::Closed);
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(reply) = reply_for(&line, id) {
            return Ok(reply);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryClient;
    use crate::test_support::write_script;
    use conduit_settings::McpServerConfig;

    const FAKE_SERVER: &str = r#"
read init
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}'
read notified
read list
printf '%s' '{"jsonrpc":"2.0","id":2,'
sleep 0.1
echo '"result":{"tools":[{"name":"query","description":"Run a query"}]}}'
sleep 30
"#;

    #[tokio::test]
    async fn discovers_tools_from_child_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "server.sh", FAKE_SERVER);
        let client =
            DiscoveryClient::with_limits(Duration::from_secs(1), Duration::from_secs(5), 200);
        let config = McpServerConfig::stdio(script.to_string_lossy(), vec![]);

        let started = std::time::Instant::now();
        let tools = client.discover("db", &config).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].qualified_name(), "mcp__db__query");
        assert_eq!(tools[0].description, "Run a query");
        // the lingering `sleep 30` is terminated rather than awaited
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn server_is_asked_to_exit_after_listing() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"
trap 'echo bye > "$0.term"; exit 0' TERM
read init
echo '{"jsonrpc":"2.0","id":1,"result":{}}'
read notified
read list
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
sleep 30 &
wait
"#;
        let script = write_script(dir.path(), "polite.sh", body);
        let reply = list_tools(&script.to_string_lossy(), &[], Duration::from_secs(5)).await;
        assert!(reply.is_ok());
        let marker = dir.path().join("polite.sh.term");
        assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "bye");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "mute.sh", "exec sleep 30\n");
        let err = list_tools(&script.to_string_lossy(), &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn server_exiting_early_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "quit.sh", "exit 0\n");
        let err = list_tools(&script.to_string_lossy(), &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Closed | DiscoveryError::Io(_)));
    }
}
