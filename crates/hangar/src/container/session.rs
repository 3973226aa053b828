//! Command execution inside session containers.

use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ContainerConfig, ContainerError, RuntimeType, validate_container_name};
use crate::bridge::{Execution, SessionManager};

/// Buffered output lines per execution.
const OUTPUT_BUFFER: usize = 256;

/// Runs `session.exec` commands with `<runtime> exec <container> sh -c <command>`.
#[derive(Debug, Clone)]
pub struct ContainerSessionManager {
    runtime: RuntimeType,
    binary: String,
}

impl ContainerSessionManager {
    pub fn new(config: &ContainerConfig) -> Self {
        Self {
            runtime: config.runtime,
            binary: config.binary(),
        }
    }

    pub fn runtime(&self) -> RuntimeType {
        self.runtime
    }

    fn spawn(&self, container: &str, command: &str) -> Result<Execution, ContainerError> {
        validate_container_name(container)?;

        let mut child = Command::new(&self.binary)
            .args(["exec", container, "sh", "-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(ContainerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ContainerError::MissingPipe("stderr"))?;

        let exec_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);

        let id = exec_id.clone();
        tokio::spawn(async move {
            tokio::join!(pump_lines(stdout, tx.clone()), pump_lines(stderr, tx.clone()));

            if tx.is_closed() {
                debug!("Output of exec {} abandoned, killing process", id);
                let _ = child.kill().await;
                return;
            }

            match child.wait().await {
                Ok(status) if status.success() => debug!("Exec {} exited cleanly", id),
                Ok(status) => {
                    let _ = tx.send(format!("process exited with {status}")).await;
                }
                Err(e) => warn!("Failed to wait for exec {}: {}", id, e),
            }
        });

        Ok(Execution {
            exec_id,
            output: rx,
        })
    }
}

/// Forward each line of `reader` until EOF or until nobody is listening.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Exec output read failed: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl SessionManager for ContainerSessionManager {
    async fn execute(&self, session_id: &str, command: &str) -> Result<Execution> {
        let execution = self.spawn(session_id, command)?;
        info!(
            "Exec {} in container {} via {}",
            execution.exec_id, session_id, self.binary
        );
        Ok(execution)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A stand-in runtime that drops `exec <container>` and runs the rest.
    fn fake_runtime(dir: &Path) -> String {
        let path = dir.join("fake-runtime");
        std::fs::write(&path, "#!/bin/sh\nshift 2\nexec \"$@\"\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn manager(binary: String) -> ContainerSessionManager {
        ContainerSessionManager::new(&ContainerConfig {
            runtime: RuntimeType::Docker,
            binary: Some(binary),
        })
    }

    async fn collect(mut execution: Execution) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = execution.output.recv().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr_lines() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(fake_runtime(dir.path()));

        let execution = manager
            .execute("box-1", "echo one; echo two; echo oops 1>&2")
            .await
            .unwrap();
        assert!(!execution.exec_id.is_empty());

        let mut lines = collect(execution).await;
        lines.sort();
        assert_eq!(lines, vec!["one", "oops", "two"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(fake_runtime(dir.path()));

        let lines = collect(manager.execute("box-1", "exit 3").await.unwrap()).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("process exited with"));
    }

    #[tokio::test]
    async fn test_invalid_container_name_is_rejected() {
        let manager = manager("docker".into());
        let err = manager.execute("box;reboot", "ls").await.unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let manager = manager("/nonexistent/hangar-runtime".into());
        let err = manager.execute("box-1", "ls").await.unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }
}
