//! Chat server session: connect, handshake, read loop, reconnect.
//!
//! One supervisor task owns the whole connection lifecycle. Within a live
//! session it is the single writer of the outgoing half and the single
//! reader of the incoming half; classified events flow to the engine over a
//! bounded channel. On transport failure the supervisor re-enters
//! `Connecting` with a delayed, jittered retry until the consecutive
//! failure budget is spent, at which point the state becomes `Fatal`.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::classifier::{ChatEvent, MessageClassifier, RawLine};
use crate::core::config::Config;
use crate::core::error::TransportError;
use crate::core::response::sanitize_line;

/// How long a connect attempt may take before it counts as failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the event channel toward the engine.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outbound line channel.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Maximum random jitter added to each reconnect delay.
const RECONNECT_JITTER_MS: u64 = 250;

/// Connection lifecycle states. A session is in exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Fatal,
}

/// Outgoing traffic toward the writer side of the session.
#[derive(Debug)]
pub(crate) enum Outbound {
    Line(String),
    Quit,
}

/// Why a live session ended.
enum SessionEnd {
    /// Transport failure; the supervisor should reconnect.
    Transport(String),
    /// Orderly shutdown; the supervisor should exit.
    Shutdown,
}

/// Cloneable sender-side handle onto the connection.
#[derive(Clone)]
pub struct ChatHandle {
    state_rx: watch::Receiver<ConnState>,
    outbound_tx: mpsc::Sender<Outbound>,
}

impl ChatHandle {
    pub(crate) fn new(
        state_rx: watch::Receiver<ConnState>,
        outbound_tx: mpsc::Sender<Outbound>,
    ) -> Self {
        ChatHandle {
            state_rx,
            outbound_tx,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Queue one outgoing line. Fails immediately when not connected.
    pub async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.state() != ConnState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.outbound_tx
            .send(Outbound::Line(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Request an orderly shutdown: the session signs off with `.q`,
    /// drains pending lines first, and the supervisor exits.
    pub async fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Quit).await;
    }
}

/// Owns the TCP session and drives the reconnect state machine.
pub struct ChatConnection {
    config: Arc<Config>,
    classifier: MessageClassifier,
    state_tx: watch::Sender<ConnState>,
    outbound_rx: mpsc::Receiver<Outbound>,
    events_tx: mpsc::Sender<ChatEvent>,
    /// Monotonic sequence for raw lines, preserved across reconnects.
    next_seq: u64,
    /// Consecutive failed connect attempts since the last `Connected`.
    attempts: u32,
}

impl ChatConnection {
    /// Spawn the connection supervisor.
    ///
    /// Returns the send handle, the stream of classified events, and the
    /// supervisor task. The task resolves `Ok` on orderly shutdown and
    /// `Err(ReconnectExhausted)` when the retry budget is spent.
    pub fn spawn(
        config: Arc<Config>,
        classifier: MessageClassifier,
    ) -> (
        ChatHandle,
        mpsc::Receiver<ChatEvent>,
        JoinHandle<Result<(), TransportError>>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let handle = ChatHandle::new(state_rx, outbound_tx);
        let connection = ChatConnection {
            config,
            classifier,
            state_tx,
            outbound_rx,
            events_tx,
            next_seq: 0,
            attempts: 0,
        };
        let task = tokio::spawn(connection.run());
        (handle, events_rx, task)
    }

    fn set_state(&self, state: ConnState) {
        if *self.state_tx.borrow() != state {
            info!("connection state: {state:?}");
            self.state_tx.send_replace(state);
        }
    }

    /// Supervisor loop: connect, run the session, reconnect on failure.
    async fn run(mut self) -> Result<(), TransportError> {
        loop {
            self.set_state(ConnState::Connecting);
            match self.establish().await {
                Ok(stream) => {
                    self.attempts = 0;
                    self.set_state(ConnState::Connected);
                    match self.session(stream).await {
                        SessionEnd::Shutdown => {
                            self.set_state(ConnState::Disconnected);
                            info!("disconnected from chat server");
                            return Ok(());
                        }
                        SessionEnd::Transport(reason) => {
                            warn!("session lost: {reason}");
                            self.set_state(ConnState::Disconnected);
                            if self.backoff().await {
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    self.attempts += 1;
                    warn!(
                        "connect attempt {}/{} failed: {e}",
                        self.attempts, self.config.chat.max_reconnect_attempts
                    );
                    if self.attempts >= self.config.chat.max_reconnect_attempts {
                        error!("max reconnect attempts reached, giving up");
                        self.set_state(ConnState::Fatal);
                        return Err(TransportError::ReconnectExhausted(self.attempts));
                    }
                    self.set_state(ConnState::Disconnected);
                    if self.backoff().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Open the socket and register the bot's name with the server.
    async fn establish(&self) -> Result<TcpStream, TransportError> {
        let chat = &self.config.chat;
        debug!("connecting to {}:{}", chat.host, chat.port);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((chat.host.as_str(), chat.port)))
            .await
            .map_err(|_| TransportError::ConnectFailed {
                host: chat.host.clone(),
                port: chat.port,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| TransportError::ConnectFailed {
                host: chat.host.clone(),
                port: chat.port,
                source,
            })?;

        self.set_state(ConnState::Authenticating);
        let mut stream = stream;
        let handshake = format!(".n {}\n", self.config.bot.username);
        timeout(chat.write_timeout(), stream.write_all(handshake.as_bytes()))
            .await
            .map_err(|_| TransportError::WriteTimeout(chat.write_timeout()))?
            .map_err(|source| TransportError::ConnectFailed {
                host: chat.host.clone(),
                port: chat.port,
                source,
            })?;
        info!("registered with server as {}", self.config.bot.username);
        Ok(stream)
    }

    /// One live session: read, classify and forward lines while writing
    /// queued outgoing traffic, until failure or shutdown.
    async fn session(&mut self, stream: TcpStream) -> SessionEnd {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(raw)) => {
                        if !self.forward_line(&raw).await {
                            // Engine side is gone; nothing left to do.
                            let _ = self.sign_off(&mut write_half).await;
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(None) => return SessionEnd::Transport("server closed connection".to_string()),
                    Err(e) => return SessionEnd::Transport(format!("read error: {e}")),
                },
                out = self.outbound_rx.recv() => match out {
                    Some(Outbound::Line(text)) => {
                        if let Err(e) = self.write_line(&mut write_half, &text).await {
                            return SessionEnd::Transport(format!("write error: {e}"));
                        }
                    }
                    Some(Outbound::Quit) | None => {
                        let _ = self.sign_off(&mut write_half).await;
                        return SessionEnd::Shutdown;
                    }
                },
            }
        }
    }

    /// Sanitize, stamp, classify and forward one incoming line.
    /// Returns false when the engine has dropped its receiver.
    async fn forward_line(&mut self, raw: &str) -> bool {
        let text = sanitize_line(raw);
        if text.is_empty() {
            return true;
        }
        let line = RawLine {
            seq: self.next_seq,
            text,
        };
        self.next_seq += 1;
        debug!("line {}: {:?}", line.seq, line.text);

        let event = self.classifier.classify(&line);
        self.events_tx.send(event).await.is_ok()
    }

    async fn write_line(
        &self,
        writer: &mut OwnedWriteHalf,
        text: &str,
    ) -> Result<(), TransportError> {
        let write_timeout = self.config.chat.write_timeout();
        let framed = format!("{text}\n");
        timeout(write_timeout, writer.write_all(framed.as_bytes()))
            .await
            .map_err(|_| TransportError::WriteTimeout(write_timeout))?
            .map_err(|_| TransportError::Closed)?;
        timeout(write_timeout, writer.flush())
            .await
            .map_err(|_| TransportError::WriteTimeout(write_timeout))?
            .map_err(|_| TransportError::Closed)?;
        debug!("sent: {text}");
        Ok(())
    }

    /// Best-effort `.q` sign-off so the server drops us cleanly.
    async fn sign_off(&self, writer: &mut OwnedWriteHalf) -> Result<(), TransportError> {
        self.write_line(writer, ".q").await
    }

    /// Sleep out the reconnect delay plus jitter while still honoring
    /// shutdown requests. Returns true when shutdown was requested.
    async fn backoff(&mut self) -> bool {
        let jitter = rand::rng().random_range(0..=RECONNECT_JITTER_MS);
        let delay = self.config.chat.reconnect_delay() + Duration::from_millis(jitter);
        debug!("retrying in {delay:?}");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                out = self.outbound_rx.recv() => match out {
                    Some(Outbound::Quit) | None => return true,
                    Some(Outbound::Line(text)) => {
                        warn!("dropping outbound line while disconnected: {text}");
                    }
                },
            }
        }
    }
}
