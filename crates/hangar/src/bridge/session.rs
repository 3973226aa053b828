//! Session command execution.
//!
//! Runs `session.exec` requests through the session manager and streams the
//! output onto the `session` channel (topic = session id).

use std::sync::Arc;

use async_trait::async_trait;
use hangar_protocol::channels;
use hangar_protocol::events;
use hangar_protocol::payloads::{SessionExecPayload, SessionOutputKind, SessionOutputPayload};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::collaborators::{Execution, SessionManager};
use crate::gateway::{ActionError, Client, Gateway, SessionExecHandler};

/// Streams command output to session subscribers.
pub struct SessionEventBridge {
    gateway: Arc<Gateway>,
    sessions: Arc<dyn SessionManager>,
}

impl SessionEventBridge {
    pub fn new(gateway: Arc<Gateway>, sessions: Arc<dyn SessionManager>) -> Self {
        Self { gateway, sessions }
    }
}

#[async_trait]
impl SessionExecHandler for SessionEventBridge {
    async fn handle_session_exec(
        &self,
        client: &Client,
        request: SessionExecPayload,
    ) -> Result<(), ActionError> {
        if request.session_id.is_empty() {
            return Err(ActionError::invalid_payload("session_id must not be empty"));
        }
        if request.command.trim().is_empty() {
            return Err(ActionError::invalid_payload("command must not be empty"));
        }

        let execution = self
            .sessions
            .execute(&request.session_id, &request.command)
            .await?;

        info!(
            "Client {} started exec {} in session {}",
            client.id(),
            execution.exec_id,
            request.session_id
        );

        tokio::spawn(forward_output(
            Arc::clone(&self.gateway),
            request.session_id,
            execution,
            self.gateway.shutdown_token(),
        ));
        Ok(())
    }
}

/// Publish each output line, then a final `done` event once the source closes.
async fn forward_output(
    gateway: Arc<Gateway>,
    session_id: String,
    mut execution: Execution,
    token: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => {
                debug!("Exec {} output dropped, gateway stopping", execution.exec_id);
                return;
            }
            line = execution.output.recv() => line,
        };
        match line {
            Some(content) => publish(
                &gateway,
                &session_id,
                &execution.exec_id,
                content,
                SessionOutputKind::Message,
            ),
            None => break,
        }
    }

    publish(
        &gateway,
        &session_id,
        &execution.exec_id,
        String::new(),
        SessionOutputKind::Done,
    );
    debug!("Exec {} in session {} finished", execution.exec_id, session_id);
}

fn publish(
    gateway: &Gateway,
    session_id: &str,
    exec_id: &str,
    content: String,
    kind: SessionOutputKind,
) {
    let payload = SessionOutputPayload {
        session_id: session_id.to_string(),
        exec_id: exec_id.to_string(),
        content,
        kind,
    };
    match serde_json::to_value(&payload) {
        Ok(data) => {
            gateway.broadcast_event(channels::SESSION, session_id, events::session::OUTPUT, data);
        }
        Err(e) => warn!("Failed to encode output of exec {}: {}", exec_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Frame, GatewayConfig};
    use hangar_protocol::Message;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Replays a fixed set of lines for every command.
    struct ScriptedSessions {
        lines: Vec<String>,
    }

    #[async_trait]
    impl SessionManager for ScriptedSessions {
        async fn execute(&self, session_id: &str, _command: &str) -> anyhow::Result<Execution> {
            if session_id == "gone" {
                anyhow::bail!("session not found: {session_id}");
            }
            let (tx, rx) = mpsc::channel(16);
            for line in &self.lines {
                tx.send(line.clone()).await?;
            }
            Ok(Execution {
                exec_id: "exec-1".into(),
                output: rx,
            })
        }
    }

    fn setup(lines: &[&str]) -> (Arc<Gateway>, SessionEventBridge) {
        let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
        gateway.start();
        let sessions = Arc::new(ScriptedSessions {
            lines: lines.iter().map(|s| s.to_string()).collect(),
        });
        let bridge = SessionEventBridge::new(Arc::clone(&gateway), sessions);
        (gateway, bridge)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Frame>) -> Message {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_streams_lines_then_done() {
        let (gateway, bridge) = setup(&["line one", "line two"]);
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .subscribe(&client, channels::SESSION, &["s1".to_string()])
            .unwrap();

        bridge
            .handle_session_exec(
                &client,
                SessionExecPayload {
                    session_id: "s1".into(),
                    command: "ls".into(),
                },
            )
            .await
            .unwrap();

        for expected in ["line one", "line two"] {
            let event = next_event(&mut rx).await;
            assert_eq!(event.payload["event"], "session.output");
            assert_eq!(event.payload["topic"], "s1");
            assert_eq!(event.payload["data"]["type"], "message");
            assert_eq!(event.payload["data"]["content"], expected);
            assert_eq!(event.payload["data"]["exec_id"], "exec-1");
        }
        let done = next_event(&mut rx).await;
        assert_eq!(done.payload["data"]["type"], "done");
        assert_eq!(done.payload["data"]["content"], "");
    }

    #[tokio::test]
    async fn test_unknown_session_maps_to_not_found() {
        let (gateway, bridge) = setup(&[]);
        let (client, _rx) = gateway.connect().unwrap();
        let err = bridge
            .handle_session_exec(
                &client,
                SessionExecPayload {
                    session_id: "gone".into(),
                    command: "ls".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_invalid() {
        let (gateway, bridge) = setup(&[]);
        let (client, _rx) = gateway.connect().unwrap();
        let err = bridge
            .handle_session_exec(
                &client,
                SessionExecPayload {
                    session_id: "s1".into(),
                    command: "  ".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidPayload(_)));
    }
}
