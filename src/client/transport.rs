//! WebSocket transport client
//!
//! Wraps one tokio-tungstenite connection to the relay. After the first
//! successful [`TransportClient::connect`] a background task owns the socket
//! and reconnects on a fixed delay, forever, until [`TransportClient::close`].
//! Lifecycle and inbound text are published as [`TransportEvent`]s.

use crate::client::controller::FrameSink;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::Frame;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;

/// Reported for a frame that was queued but never reached the socket
pub const DROPPED_FRAME_MESSAGE: &str = "Connection lost before the message was sent";

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Explicitly closed; terminal
    Closed,
}

/// Something that happened on the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    /// Raw inbound text frame
    Message(String),
    Close,
    Error(String),
}

/// Discriminant of [`TransportEvent`], for [`TransportClient::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    Open,
    Message,
    Close,
    Error,
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            TransportEvent::Open => TransportEventKind::Open,
            TransportEvent::Message(_) => TransportEventKind::Message,
            TransportEvent::Close => TransportEventKind::Close,
            TransportEvent::Error(_) => TransportEventKind::Error,
        }
    }
}

/// Socket endpoint for a page origin: `http` → `ws`, `https` → `wss`
pub fn endpoint_from_origin(origin: &str) -> Result<Url> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Transport(format!(
                "Unsupported origin scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Transport(format!("Cannot use '{}' as a socket scheme", scheme)))?;
    Ok(url)
}

enum Command {
    Send(String),
    Close,
}

/// How a connected session ended
enum SessionEnd {
    Lost,
    Stopped,
}

/// State shared with the background connection task
struct Shared {
    endpoint: Url,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<TransportEvent>,
}

impl Shared {
    /// Move to `next` unless closed; true if the state is now `next`
    fn set_state(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        self.state() == next
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

/// Auto-reconnecting WebSocket client
pub struct TransportClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl TransportClient {
    pub fn new(endpoint: Url, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                endpoint,
                reconnect_delay,
                state,
                events,
            }),
            commands,
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    /// Client for the relay serving the page at `config.url`
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(
            endpoint_from_origin(&config.url)?,
            Duration::from_millis(config.reconnect_delay_ms),
        ))
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receive every event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Run `handler` for every event of `kind`
    pub fn on<F>(&self, kind: TransportEventKind, handler: F) -> JoinHandle<()>
    where
        F: Fn(TransportEvent) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.kind() == kind => handler(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Transport event handler lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Connect and start the reconnecting background task.
    ///
    /// Returns at once when already connected. When the background task is
    /// already running this waits for it to reach `Connected`.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut slot = self.command_rx.lock().await;
        let Some(commands) = slot.take() else {
            drop(slot);
            return self.wait_connected().await;
        };

        if self.state() == ConnectionState::Closed {
            *slot = Some(commands);
            return Err(Error::Transport("Transport client is closed".to_string()));
        }

        self.shared.set_state(ConnectionState::Connecting);
        tracing::debug!(endpoint = %self.shared.endpoint, "Connecting to relay");

        match connect_async(self.shared.endpoint.as_str()).await {
            Ok((stream, _)) => {
                tokio::spawn(run_connection(self.shared.clone(), stream, commands));
                self.wait_connected().await
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.shared.endpoint, "Failed to connect: {}", e);
                self.shared.set_state(ConnectionState::Disconnected);
                self.shared.emit(TransportEvent::Error(e.to_string()));
                *slot = Some(commands);
                Err(e.into())
            }
        }
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut state = self.watch_state();
        let reached = *state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
            .await
            .map_err(|_| Error::Transport("Transport client dropped".to_string()))?;

        match reached {
            ConnectionState::Connected => Ok(()),
            _ => Err(Error::Transport("Transport client is closed".to_string())),
        }
    }

    /// Transmit a frame; fails unless connected
    pub fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(Command::Send(frame.to_json()))
            .map_err(|_| Error::NotConnected)
    }

    /// Close the socket and stop reconnecting
    pub fn close(&self) {
        self.shared.set_state(ConnectionState::Closed);
        let _ = self.commands.send(Command::Close);
    }
}

impl FrameSink for TransportClient {
    fn send(&self, frame: &Frame) -> Result<()> {
        TransportClient::send(self, frame)
    }

    fn is_connected(&self) -> bool {
        TransportClient::is_connected(self)
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Own the socket, reconnecting after every loss until told to stop
async fn run_connection(
    shared: Arc<Shared>,
    first: WsStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut next = Some(first);

    loop {
        let stream = match next.take() {
            Some(stream) => stream,
            None => {
                shared.set_state(ConnectionState::Connecting);
                tracing::debug!(endpoint = %shared.endpoint, "Reconnecting to relay");

                match connect_async(shared.endpoint.as_str()).await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::debug!("Reconnect failed: {}", e);
                        shared.set_state(ConnectionState::Disconnected);
                        shared.emit(TransportEvent::Error(e.to_string()));
                        if !wait_before_reconnect(&shared, &mut commands).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        if !shared.set_state(ConnectionState::Connected) {
            // Closed while the handshake was in flight
            let mut stream = stream;
            let _ = stream.close(None).await;
            break;
        }
        shared.emit(TransportEvent::Open);
        tracing::info!(endpoint = %shared.endpoint, "Connected to relay");

        let end = run_session(&shared, stream, &mut commands).await;
        if matches!(end, SessionEnd::Lost) {
            shared.set_state(ConnectionState::Disconnected);
        }
        shared.emit(TransportEvent::Close);

        match end {
            SessionEnd::Stopped => break,
            SessionEnd::Lost => {
                tracing::info!(
                    delay_ms = shared.reconnect_delay.as_millis() as u64,
                    "Connection to relay lost"
                );
                if !wait_before_reconnect(&shared, &mut commands).await {
                    break;
                }
            }
        }
    }

    shared.set_state(ConnectionState::Closed);
    tracing::debug!("Transport task stopped");
}

/// Pump one connected socket until it drops or a close is requested
async fn run_session(
    shared: &Shared,
    stream: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.emit(TransportEvent::Message(text)),
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.emit(TransportEvent::Error(e.to_string()));
                    return SessionEnd::Lost;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        shared.emit(TransportEvent::Error(e.to_string()));
                        return SessionEnd::Lost;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
            },
        }
    }
}

/// Sleep for the reconnect delay; false if a close arrived meanwhile
async fn wait_before_reconnect(
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let sleep = tokio::time::sleep(shared.reconnect_delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return shared.state() != ConnectionState::Closed,
            cmd = commands.recv() => match cmd {
                Some(Command::Send(_)) => {
                    tracing::warn!("Dropping frame queued while disconnected");
                    shared.emit(TransportEvent::Error(DROPPED_FRAME_MESSAGE.to_string()));
                }
                Some(Command::Close) | None => return false,
            },
        }
    }
}
