//! Relay server implementation

use crate::agent::{compose_reply, AgentInvoker, CommandInvoker};
use crate::config::{AgentConfig, InflightPolicy, ServerConfig, SlotPolicy};
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::relay::slot::{Admission, ConnectionHandle, ConnectionId, ConnectionSlot, Outbound};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock, Semaphore};

/// Sent to a connection refused under [`SlotPolicy::Reject`]
pub const SLOT_TAKEN_MESSAGE: &str =
    "Another client is already connected. Refresh the page to try again.";

/// Sent for a chat message refused under [`InflightPolicy::Reject`]
pub const BUSY_MESSAGE: &str = "An agent request is already in progress";

/// Relay server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Not started
    Stopped,
    /// Binding routes
    Starting,
    /// Serving requests
    Running,
    /// Draining connections
    ShuttingDown,
}

/// A connection that has been through admission
pub struct AcceptedConnection {
    pub id: ConnectionId,
    pub admission: Admission,
    /// Frames for this connection's writer task
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// WebSocket relay between one chat client and the agent CLI
pub struct RelayServer {
    config: ServerConfig,
    state: Arc<RwLock<RelayState>>,
    slot: Arc<ConnectionSlot>,
    invoker: Arc<dyn AgentInvoker>,
    /// Present for the `reject` in-flight policy
    inflight: Option<Arc<Semaphore>>,
    /// Arrival-ordered feed of the `queue` policy worker, started on first use
    queue: OnceLock<mpsc::UnboundedSender<String>>,
}

impl RelayServer {
    /// Create a relay server with the given configuration and agent
    pub fn new(config: ServerConfig, invoker: Arc<dyn AgentInvoker>) -> Self {
        let inflight = match config.inflight_policy {
            InflightPolicy::Reject => Some(Arc::new(Semaphore::new(1))),
            InflightPolicy::Concurrent | InflightPolicy::Queue => None,
        };

        Self {
            slot: Arc::new(ConnectionSlot::new(config.slot_policy)),
            config,
            state: Arc::new(RwLock::new(RelayState::Stopped)),
            invoker,
            inflight,
            queue: OnceLock::new(),
        }
    }

    /// Get current state
    pub async fn state(&self) -> RelayState {
        *self.state.read().await
    }

    /// Get configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Directory the web UI is served from
    pub fn static_dir(&self) -> &Path {
        &self.config.static_dir
    }

    /// Get the connection slot
    pub fn slot(&self) -> &Arc<ConnectionSlot> {
        &self.slot
    }

    /// Run admission for a newly upgraded WebSocket.
    ///
    /// A rejected connection's queue already holds the error frame followed
    /// by a close; its writer only has to drain it.
    pub async fn accept(&self) -> AcceptedConnection {
        let (tx, outbound) = mpsc::unbounded_channel();
        let id = self.slot.next_connection_id();
        let handle = ConnectionHandle::new(id, tx);

        let admission = self.slot.admit(handle.clone()).await;
        match &admission {
            Admission::Accepted => {
                tracing::info!(connection_id = id, "Web client connected");
            }
            Admission::Displaced { previous } => {
                tracing::info!(
                    connection_id = id,
                    previous = previous,
                    "Web client connected, displacing previous client"
                );
            }
            Admission::Rejected { occupant } => {
                tracing::warn!(
                    connection_id = id,
                    occupant = occupant,
                    "Rejecting web client, another client is connected"
                );
                handle.send(Frame::error(SLOT_TAKEN_MESSAGE));
                handle.close();
            }
        }

        AcceptedConnection {
            id,
            admission,
            outbound,
        }
    }

    /// Handle one inbound text frame from connection `id`.
    ///
    /// Never fails: a frame that cannot be parsed is reported to the client
    /// as an `error` frame and the connection stays open. Well-formed frames
    /// other than `chat_message` are ignored.
    pub async fn handle_text(self: &Arc<Self>, id: ConnectionId, text: &str) {
        tracing::debug!(connection_id = id, "Received frame from web client");

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id = id, "Invalid frame: {}", e);
                self.send_error(format!("Error processing message: {}", e))
                    .await;
                return;
            }
        };

        match frame {
            Frame::ChatMessage { message } => self.dispatch_chat_message(message).await,
            other => {
                tracing::debug!(connection_id = id, kind = other.kind(), "Ignoring frame");
            }
        }
    }

    /// Signal typing and run the agent in the background
    async fn dispatch_chat_message(self: &Arc<Self>, message: String) {
        let permit = match &self.inflight {
            Some(gate) => match gate.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::info!("Agent busy, rejecting chat message");
                    self.send_error(BUSY_MESSAGE).await;
                    return;
                }
            },
            None => None,
        };

        tracing::info!(chars = message.chars().count(), "Forwarding chat message to agent");
        self.slot.send(Frame::TypingStart).await;

        if self.config.inflight_policy == InflightPolicy::Queue {
            if self.queue_sender().send(message).is_err() {
                tracing::error!("Agent queue worker stopped, dropping chat message");
            }
            return;
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            server.respond(&message).await;
        });
    }

    /// Sender into the single queue worker, spawning it on first use
    fn queue_sender(self: &Arc<Self>) -> &mpsc::UnboundedSender<String> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_queue(Arc::downgrade(self), rx));
            tx
        })
    }

    /// Invoke the agent and deliver the reply to the current occupant
    async fn respond(&self, message: &str) {
        let output = self.invoker.invoke(message).await;
        let reply = compose_reply(&output, message);

        tracing::debug!(exit_code = output.exit_code, reply = %reply, "Agent responded");

        if !self.slot.send(Frame::chat_response(reply)).await {
            tracing::debug!("No client connected, dropping agent response");
        }
    }

    async fn send_error(&self, message: impl Into<String>) {
        self.slot.send(Frame::error(message)).await;
    }

    /// Connection `id` closed or failed
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.slot.release(id).await {
            tracing::info!(connection_id = id, "Web client disconnected");
        } else {
            tracing::debug!(connection_id = id, "Non-occupant connection closed");
        }
    }

    /// Serve HTTP and WebSocket traffic on `listener` until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.write().await;
        if *state != RelayState::Stopped {
            return Err(Error::Relay("Relay server already running".to_string()));
        }
        *state = RelayState::Starting;
        drop(state);

        let app = crate::relay::handler::router(self.clone());
        let addr = listener.local_addr()?;

        *self.state.write().await = RelayState::Running;
        tracing::info!(
            %addr,
            slot_policy = ?self.config.slot_policy,
            inflight_policy = ?self.config.inflight_policy,
            "Relay server listening"
        );

        let state = self.state.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                *state.write().await = RelayState::ShuttingDown;
            })
            .await;

        *self.state.write().await = RelayState::Stopped;
        tracing::info!("Relay server stopped");

        result.map_err(Error::from)
    }
}

/// Run queued chat messages one at a time, in the order they arrived
async fn run_queue(server: Weak<RelayServer>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(message) = rx.recv().await {
        let Some(server) = server.upgrade() else { break };
        server.respond(&message).await;
    }
    tracing::debug!("Agent queue worker stopped");
}

/// Builder for RelayServer
pub struct RelayServerBuilder {
    config: ServerConfig,
    agent: AgentConfig,
    invoker: Option<Arc<dyn AgentInvoker>>,
}

impl RelayServerBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            agent: AgentConfig::default(),
            invoker: None,
        }
    }

    /// Set the server configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the agent configuration used for the default invoker
    pub fn agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self
    }

    /// Set the listen host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the static asset directory
    pub fn static_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.static_dir = dir.into();
        self
    }

    pub fn slot_policy(mut self, policy: SlotPolicy) -> Self {
        self.config.slot_policy = policy;
        self
    }

    pub fn inflight_policy(mut self, policy: InflightPolicy) -> Self {
        self.config.inflight_policy = policy;
        self
    }

    /// Use a custom agent instead of the configured command
    pub fn invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Build the relay server
    pub fn build(self) -> Arc<RelayServer> {
        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(CommandInvoker::from_config(&self.agent)));
        Arc::new(RelayServer::new(self.config, invoker))
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InvocationOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Replies with a fixed output, optionally waiting for a release signal
    struct ScriptedInvoker {
        output: InvocationOutput,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        /// Reply with the input text instead of the fixed stdout
        echo: bool,
    }

    impl ScriptedInvoker {
        fn new(exit_code: i32, stdout: &str, stderr: &str) -> Self {
            Self {
                output: InvocationOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
                gate: None,
                calls: AtomicUsize::new(0),
                echo: false,
            }
        }

        fn echoing(mut self) -> Self {
            self.echo = true;
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, text: &str) -> InvocationOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let mut output = self.output.clone();
            if self.echo {
                output.stdout = text.to_string();
            }
            output
        }
    }

    fn server_with(invoker: ScriptedInvoker) -> Arc<RelayServer> {
        RelayServerBuilder::new().invoker(Arc::new(invoker)).build()
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Outbound {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn test_relay_creation() {
        let server = RelayServerBuilder::new().port(18000).build();
        assert_eq!(server.state().await, RelayState::Stopped);
        assert_eq!(server.config().port, 18000);
        assert!(!server.slot().is_occupied().await);
    }

    #[tokio::test]
    async fn test_chat_message_yields_typing_then_response() {
        let server = server_with(ScriptedInvoker::new(0, "Hello", ""));
        let mut conn = server.accept().await;
        assert_eq!(conn.admission, Admission::Accepted);

        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"hi"}"#)
            .await;

        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));
        assert_eq!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::chat_response("Hello"))
        );
    }

    #[tokio::test]
    async fn test_agent_failure_surfaces_stderr() {
        let server = server_with(ScriptedInvoker::new(1, "", "boom"));
        let mut conn = server.accept().await;

        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"hi"}"#)
            .await;

        next_frame(&mut conn.outbound).await;
        match next_frame(&mut conn.outbound).await {
            Outbound::Frame(Frame::ChatResponse { message }) => assert!(message.contains("boom")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_output_echoes_input() {
        let server = server_with(ScriptedInvoker::new(0, "", ""));
        let mut conn = server.accept().await;

        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"hi"}"#)
            .await;

        next_frame(&mut conn.outbound).await;
        match next_frame(&mut conn.outbound).await {
            Outbound::Frame(Frame::ChatResponse { message }) => assert!(message.contains("hi")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_reports_error_and_keeps_connection() {
        let server = server_with(ScriptedInvoker::new(0, "Hello", ""));
        let mut conn = server.accept().await;

        server.handle_text(conn.id, "{not json").await;
        match next_frame(&mut conn.outbound).await {
            Outbound::Frame(Frame::Error { message }) => {
                assert!(message.starts_with("Error processing message"))
            }
            other => panic!("unexpected {:?}", other),
        }

        // Still usable afterwards
        assert_eq!(server.slot().occupant().await, Some(conn.id));
        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"again"}"#)
            .await;
        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_error() {
        let server = server_with(ScriptedInvoker::new(0, "Hello", ""));
        let mut conn = server.accept().await;

        server.handle_text(conn.id, r#"{"type":"shout","message":"hi"}"#).await;
        assert!(matches!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_client_sent_server_frames_are_ignored() {
        let server = server_with(ScriptedInvoker::new(0, "Hello", ""));
        let mut conn = server.accept().await;

        server
            .handle_text(conn.id, r#"{"type":"error","message":"client side oops"}"#)
            .await;
        server.handle_text(conn.id, r#"{"type":"typing_start"}"#).await;
        server
            .handle_text(conn.id, r#"{"type":"chat_response","message":"echo"}"#)
            .await;
        assert!(timeout(Duration::from_millis(100), conn.outbound.recv())
            .await
            .is_err());

        // The next chat message is the first thing answered
        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"hi"}"#)
            .await;
        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));
    }

    #[tokio::test]
    async fn test_reject_policy_sends_error_then_close() {
        let server = RelayServerBuilder::new()
            .slot_policy(SlotPolicy::Reject)
            .invoker(Arc::new(ScriptedInvoker::new(0, "", "")))
            .build();
        let first = server.accept().await;
        let mut second = server.accept().await;

        assert!(!second.admission.is_admitted());
        assert_eq!(
            next_frame(&mut second.outbound).await,
            Outbound::Frame(Frame::error(SLOT_TAKEN_MESSAGE))
        );
        assert_eq!(next_frame(&mut second.outbound).await, Outbound::Close);
        assert_eq!(server.slot().occupant().await, Some(first.id));
    }

    #[tokio::test]
    async fn test_response_follows_displacing_client() {
        let gate = Arc::new(Notify::new());
        let server = server_with(ScriptedInvoker::new(0, "late", "").gated(gate.clone()));
        let mut first = server.accept().await;

        server
            .handle_text(first.id, r#"{"type":"chat_message","message":"hi"}"#)
            .await;
        assert_eq!(next_frame(&mut first.outbound).await, Outbound::Frame(Frame::TypingStart));

        let mut second = server.accept().await;
        assert_eq!(next_frame(&mut first.outbound).await, Outbound::Close);

        gate.notify_one();
        assert_eq!(
            next_frame(&mut second.outbound).await,
            Outbound::Frame(Frame::chat_response("late"))
        );
    }

    #[tokio::test]
    async fn test_disconnect_of_displaced_client_keeps_slot() {
        let server = server_with(ScriptedInvoker::new(0, "", ""));
        let first = server.accept().await;
        let second = server.accept().await;

        server.disconnect(first.id).await;
        assert_eq!(server.slot().occupant().await, Some(second.id));

        server.disconnect(second.id).await;
        assert!(!server.slot().is_occupied().await);
    }

    #[tokio::test]
    async fn test_inflight_reject_refuses_second_message() {
        let gate = Arc::new(Notify::new());
        let invoker = Arc::new(ScriptedInvoker::new(0, "done", "").gated(gate.clone()));
        let server = RelayServerBuilder::new()
            .inflight_policy(InflightPolicy::Reject)
            .invoker(invoker.clone())
            .build();
        let mut conn = server.accept().await;

        let msg = r#"{"type":"chat_message","message":"hi"}"#;
        server.handle_text(conn.id, msg).await;
        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));

        server.handle_text(conn.id, msg).await;
        assert_eq!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::error(BUSY_MESSAGE))
        );

        gate.notify_one();
        assert_eq!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::chat_response("done"))
        );
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_inflight_queue_runs_one_at_a_time() {
        let gate = Arc::new(Notify::new());
        let invoker = Arc::new(
            ScriptedInvoker::new(0, "", "")
                .echoing()
                .gated(gate.clone()),
        );
        let server = RelayServerBuilder::new()
            .inflight_policy(InflightPolicy::Queue)
            .invoker(invoker.clone())
            .build();
        let mut conn = server.accept().await;

        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"first"}"#)
            .await;
        server
            .handle_text(conn.id, r#"{"type":"chat_message","message":"second"}"#)
            .await;
        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));
        assert_eq!(next_frame(&mut conn.outbound).await, Outbound::Frame(Frame::TypingStart));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        assert_eq!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::chat_response("first"))
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);

        gate.notify_one();
        assert_eq!(
            next_frame(&mut conn.outbound).await,
            Outbound::Frame(Frame::chat_response("second"))
        );
    }

    #[tokio::test]
    async fn test_concurrent_messages_spawn_independently() {
        let gate = Arc::new(Notify::new());
        let invoker = Arc::new(ScriptedInvoker::new(0, "done", "").gated(gate.clone()));
        let server = RelayServerBuilder::new().invoker(invoker.clone()).build();
        let conn = server.accept().await;

        let msg = r#"{"type":"chat_message","message":"hi"}"#;
        server.handle_text(conn.id, msg).await;
        server.handle_text(conn.id, msg).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
        gate.notify_waiters();
    }
}
