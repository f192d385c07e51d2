//! Child-process backends
//!
//! The backend is spawned with piped stdio and speaks line-delimited
//! JSON-RPC: one message per line on stdin/stdout. stderr is forwarded to the
//! gateway log at debug level.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    BackendClient, BackendDescriptor, GatewayError, GatewayResult, PendingConnection,
    ProcessConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{McpBackendClient, DEFAULT_INIT_TIMEOUT};
use crate::peer::{FrameSink, RpcPeer};

/// Variables a restricted child environment still inherits
pub const DEFAULT_INHERITED_ENV: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Grace period between closing stdin and killing the child
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A process backend that has not been spawned yet
pub struct ProcessConnection {
    name: String,
    config: ProcessConfig,
    init_timeout: Duration,
}

impl ProcessConnection {
    pub fn new(descriptor: &BackendDescriptor, config: &ProcessConfig) -> Self {
        Self {
            name: descriptor.name.clone(),
            config: config.clone(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    pub fn with_init_timeout(mut self, init_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self
    }

    /// Environment handed to the child.
    ///
    /// The child never inherits the gateway's environment wholesale: it gets
    /// the minimal base set plus any names the descriptor lists, with values
    /// taken from the gateway's own environment (empty when unset).
    fn child_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = DEFAULT_INHERITED_ENV
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        for name in self.config.env.iter().flatten() {
            env.push((name.clone(), std::env::var(name).unwrap_or_default()));
        }
        env
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear().envs(self.child_env());
        cmd
    }
}

#[async_trait]
impl PendingConnection for ProcessConnection {
    async fn connect(self: Box<Self>) -> GatewayResult<Arc<dyn BackendClient>> {
        let connection_error = |reason: String| GatewayError::Connection {
            backend: self.name.clone(),
            reason,
        };

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| connection_error(format!("failed to spawn '{}': {}", self.config.command, e)))?;

        info!(backend = %self.name, command = %self.config.command, pid = ?child.id(), "Spawned backend process");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.kill().await;
            return Err(connection_error("child stdio was not captured".to_string()));
        };

        let sink = Arc::new(ProcessSink {
            backend: self.name.clone(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
        });
        let peer = Arc::new(RpcPeer::new(&self.name, sink));

        let mut tasks = Vec::with_capacity(2);

        let reader_peer = peer.clone();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => reader_peer.dispatch(&line).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(backend = %reader_peer.backend(), error = %e, "Failed reading backend stdout");
                        break;
                    }
                }
            }
            debug!(backend = %reader_peer.backend(), "Backend stdout closed");
            reader_peer.mark_closed();
        }));

        if let Some(stderr) = stderr {
            let backend = self.name.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(backend = %backend, "stderr: {}", line);
                }
            }));
        }

        let client = McpBackendClient::handshake(&self.name, peer, tasks, self.init_timeout).await?;
        Ok(Arc::new(client))
    }
}

/// Writes frames to the child's stdin and owns the child handle
struct ProcessSink {
    backend: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
}

#[async_trait]
impl FrameSink for ProcessSink {
    async fn send_frame(&self, frame: String) -> GatewayResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| GatewayError::Transport(format!("stdin of '{}' is closed", self.backend)))?;

        let mut line = frame.into_bytes();
        line.push(b'\n');
        stdin
            .write_all(&line)
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to write to '{}': {}", self.backend, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to flush '{}': {}", self.backend, e)))
    }

    async fn shutdown(&self) -> GatewayResult<()> {
        // closing stdin is the polite way to ask a stdio server to exit
        drop(self.stdin.lock().await.take());

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(backend = %self.backend, %status, "Backend process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(GatewayError::Transport(format!(
                "failed waiting for '{}': {}",
                self.backend, e
            ))),
            Err(_) => {
                warn!(backend = %self.backend, "Backend process did not exit, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| GatewayError::Transport(format!("failed to kill '{}': {}", self.backend, e)))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use relay_core::{CapabilityKind, TransportConfig};
    use serde_json::json;

    /// A tiny stdio server: answers initialize, tools/list and tools/call
    /// by matching on the request id, then echoes its env var.
    const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh","version":"0"}}}\n' "$id" ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo_env","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s|%s"}]}}\n' "$id" "$RELAY_TEST_VALUE" "$MCP_AUTH_TOKEN" ;;
  esac
done
"#;

    fn descriptor(command: &str, args: Vec<String>, env: Option<Vec<String>>) -> BackendDescriptor {
        BackendDescriptor {
            name: "sh".to_string(),
            transport: TransportConfig::Process(ProcessConfig {
                command: command.to_string(),
                args,
                env,
            }),
            namespace: false,
        }
    }

    fn connection(descriptor: &BackendDescriptor) -> Box<ProcessConnection> {
        let TransportConfig::Process(config) = &descriptor.transport else {
            unreachable!()
        };
        Box::new(ProcessConnection::new(descriptor, config).with_init_timeout(Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_spawned_backend_round_trip() {
        std::env::set_var("RELAY_TEST_VALUE", "forwarded");
        let descriptor = descriptor(
            "sh",
            vec!["-c".to_string(), FAKE_SERVER.to_string()],
            Some(vec!["RELAY_TEST_VALUE".to_string()]),
        );

        let client = connection(&descriptor).connect().await.unwrap();
        assert!(client.advertises(CapabilityKind::Tool));

        let tools = client.list(CapabilityKind::Tool).await.unwrap();
        assert_eq!(tools[0]["name"], "echo_env");

        let result = client
            .invoke(CapabilityKind::Tool, "echo_env", json!({}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "forwarded|");

        client.close().await.unwrap();
        client.closed().await;
    }

    #[tokio::test]
    async fn test_missing_command_is_connection_error() {
        let descriptor = descriptor("/definitely/not/a/binary", Vec::new(), None);
        let err = connection(&descriptor).connect().await.err().unwrap();
        assert!(matches!(err, GatewayError::Connection { backend, .. } if backend == "sh"));
    }

    #[tokio::test]
    async fn test_early_exit_fails_handshake() {
        let descriptor = descriptor("sh", vec!["-c".to_string(), "exit 0".to_string()], None);
        let err = connection(&descriptor).connect().await.err().unwrap();
        assert!(matches!(err, GatewayError::Connection { .. }));
    }

    #[test]
    fn test_restricted_env_keeps_base_variables() {
        std::env::set_var("RELAY_TEST_LISTED", "yes");
        let descriptor = descriptor(
            "true",
            Vec::new(),
            Some(vec!["RELAY_TEST_LISTED".to_string(), "RELAY_TEST_UNSET_VAR".to_string()]),
        );
        let conn = connection(&descriptor);
        let env = conn.child_env();

        assert!(env.contains(&("RELAY_TEST_LISTED".to_string(), "yes".to_string())));
        assert!(env.contains(&("RELAY_TEST_UNSET_VAR".to_string(), String::new())));
        if std::env::var("PATH").is_ok() {
            assert!(env.iter().any(|(k, _)| k == "PATH"));
        }
    }

    #[tokio::test]
    async fn test_child_without_env_list_cannot_see_gateway_secret() {
        std::env::set_var("MCP_AUTH_TOKEN", "front-secret");
        let descriptor = descriptor("sh", vec!["-c".to_string(), FAKE_SERVER.to_string()], None);

        let client = connection(&descriptor).connect().await.unwrap();
        let result = client
            .invoke(CapabilityKind::Tool, "echo_env", json!({}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "|");

        client.close().await.unwrap();
    }

    #[test]
    fn test_no_env_list_gets_base_variables_only() {
        std::env::set_var("MCP_AUTH_TOKEN", "front-secret");
        let descriptor = descriptor("true", Vec::new(), None);
        let env = connection(&descriptor).child_env();

        assert!(env.iter().all(|(k, _)| DEFAULT_INHERITED_ENV.contains(&k.as_str())));
        assert!(!env.iter().any(|(k, _)| k == "MCP_AUTH_TOKEN"));
    }
}
