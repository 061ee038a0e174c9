//! WebSocket telemetry link
//!
//! Connection lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closing -> Closed
//!            |           |
//!            +-> Failed <+
//! ```
//!
//! Once open, a network event loop task owns the socket. Senders hand
//! it text messages through a bounded queue; a full queue drops the
//! message (best effort, no back-pressure onto the producer).
//!
//! Every network write is bounded by `send_timeout`. A write that stalls
//! past it fails the link. `close` is bounded as well: if the event loop
//! does not finish in time it is aborted and the link is marked closed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use edgepulse_core::{EdgeError, EdgeResult};

use crate::{client_config, Endpoint, TlsPolicy};

/// Close reason sent when the operator stops the device
pub const DISCONNECT_REASON: &str = "user requested disconnect";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Link lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl LinkState {
    /// No further transitions happen from a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Failed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Closed => "closed",
            LinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Link configuration
#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub tls: TlsPolicy,
    /// Handshake deadline
    pub connect_timeout: Duration,
    /// Bounded wait for the peer to confirm a close
    pub close_timeout: Duration,
    /// Deadline for a single frame write
    pub send_timeout: Duration,
    /// Outbound queue depth
    pub outbound_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            tls: TlsPolicy::Verify,
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(5),
            outbound_capacity: 16,
        }
    }
}

#[derive(Debug)]
enum Command {
    Text(String),
    Close(String),
}

/// Counters kept by the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub messages_out: u64,
    pub send_errors: u64,
    pub messages_in: u64,
}

/// Cloneable handle used by the send loop
#[derive(Clone)]
pub struct LinkSender {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LinkState>,
}

impl LinkSender {
    /// Queue one text message. Never waits for the network.
    pub fn send(&self, text: String) -> EdgeResult<()> {
        if *self.state.borrow() != LinkState::Open {
            return Err(EdgeError::LinkClosed);
        }
        self.commands.try_send(Command::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EdgeError::Send("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => EdgeError::LinkClosed,
        })
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

/// Owner of one telemetry connection
pub struct TelemetryLink {
    config: LinkConfig,
    state: Arc<watch::Sender<LinkState>>,
    commands: Option<mpsc::Sender<Command>>,
    event_loop: Option<JoinHandle<LinkStats>>,
    stats: LinkStats,
}

impl TelemetryLink {
    pub fn new(config: LinkConfig) -> Self {
        let (state, _rx) = watch::channel(LinkState::Idle);
        TelemetryLink {
            config,
            state: Arc::new(state),
            commands: None,
            event_loop: None,
            stats: LinkStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Stats of a joined event loop
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Connect to `raw_addr`. Any failure leaves the link `Failed`.
    pub async fn open(&mut self, raw_addr: &str) -> EdgeResult<LinkSender> {
        if self.state() != LinkState::Idle {
            return Err(EdgeError::Handshake(format!(
                "link already {}",
                self.state()
            )));
        }
        self.state.send_replace(LinkState::Connecting);

        match self.handshake(raw_addr).await {
            Ok((socket, endpoint)) => {
                let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
                self.state.send_replace(LinkState::Open);
                info!(endpoint = %endpoint, "Telemetry link open");

                let handle = tokio::spawn(run_event_loop(
                    socket,
                    rx,
                    self.state.clone(),
                    self.config.close_timeout,
                    self.config.send_timeout,
                ));
                self.event_loop = Some(handle);
                self.commands = Some(tx.clone());

                Ok(LinkSender {
                    commands: tx,
                    state: self.state.subscribe(),
                })
            }
            Err(e) => {
                self.state.send_replace(LinkState::Failed);
                warn!("Telemetry link failed: {}", e);
                Err(e)
            }
        }
    }

    async fn handshake(&self, raw_addr: &str) -> EdgeResult<(Socket, Endpoint)> {
        let endpoint = Endpoint::parse(raw_addr)?;

        let connector = if endpoint.is_encrypted() {
            if !self.config.tls.verifies() {
                warn!(
                    endpoint = %endpoint,
                    "TLS certificate verification disabled for telemetry link"
                );
            }
            Connector::Rustls(client_config(self.config.tls)?)
        } else {
            Connector::Plain
        };

        debug!(endpoint = %endpoint, "Connecting telemetry link");
        let connect = connect_async_tls_with_config(endpoint.url(), None, true, Some(connector));
        let (socket, _response) = timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| EdgeError::Handshake("connect timed out".to_string()))?
            .map_err(|e| EdgeError::Handshake(e.to_string()))?;

        Ok((socket, endpoint))
    }

    /// Request a normal close and join the event loop.
    /// A link that never opened is left as is.
    ///
    /// Returns within twice `close_timeout` even when the peer stops
    /// reading; a stalled event loop is aborted.
    pub async fn close(&mut self, reason: &str) -> EdgeResult<()> {
        let Some(commands) = self.commands.take() else {
            return self.join().await;
        };
        if self.state() == LinkState::Open {
            self.state.send_replace(LinkState::Closing);
        }
        let deadline = Instant::now() + self.config.close_timeout * 2;

        // A closed queue means the event loop already ended.
        let request = commands.send(Command::Close(reason.to_string()));
        if timeout_at(deadline, request).await.is_err() {
            warn!("Close request not accepted, aborting telemetry link");
            self.abort();
            return Ok(());
        }
        drop(commands);

        let Some(mut handle) = self.event_loop.take() else {
            return Ok(());
        };
        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(stats)) => {
                self.stats = stats;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state.send_replace(LinkState::Failed);
                Err(EdgeError::Send(format!("event loop aborted: {}", e)))
            }
            Err(_) => {
                warn!("Telemetry link did not close in time, aborting");
                handle.abort();
                self.state.send_replace(LinkState::Closed);
                Ok(())
            }
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
        self.state.send_replace(LinkState::Closed);
    }

    /// Wait for the event loop to finish
    pub async fn join(&mut self) -> EdgeResult<()> {
        let Some(handle) = self.event_loop.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(stats) => {
                self.stats = stats;
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(LinkState::Failed);
                Err(EdgeError::Send(format!("event loop aborted: {}", e)))
            }
        }
    }
}

async fn run_event_loop(
    socket: Socket,
    mut commands: mpsc::Receiver<Command>,
    state: Arc<watch::Sender<LinkState>>,
    close_timeout: Duration,
    send_timeout: Duration,
) -> LinkStats {
    let (mut sink, mut stream) = socket.split();
    let mut stats = LinkStats::default();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Text(text)) => {
                    match timeout(send_timeout, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => stats.messages_out += 1,
                        Ok(Err(e)) => {
                            stats.send_errors += 1;
                            warn!("Telemetry send failed: {}", e);
                        }
                        Err(_) => {
                            // A partially written frame leaves the stream unusable.
                            stats.send_errors += 1;
                            warn!("Telemetry send stalled for {:?}, dropping link", send_timeout);
                            state.send_replace(LinkState::Failed);
                            break;
                        }
                    }
                }
                Some(Command::Close(reason)) => {
                    state.send_replace(LinkState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    };
                    match timeout(close_timeout, sink.send(Message::Close(Some(frame)))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Close frame not sent: {}", e),
                        Err(_) => debug!("Close frame write timed out"),
                    }

                    let confirmed = timeout(close_timeout, async {
                        while let Some(incoming) = stream.next().await {
                            match incoming {
                                Ok(Message::Close(_)) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                    })
                    .await
                    .is_ok();

                    if !confirmed {
                        warn!("Peer did not confirm close within {:?}", close_timeout);
                    }
                    state.send_replace(LinkState::Closed);
                    info!("Telemetry link closed");
                    break;
                }
                None => {
                    // Every sender dropped without a close request.
                    let _ = timeout(close_timeout, sink.close()).await;
                    state.send_replace(LinkState::Closed);
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    stats.messages_in += 1;
                    info!(message = %text, "Collector message");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Collector closed telemetry link");
                    let _ = timeout(close_timeout, sink.close()).await;
                    state.send_replace(LinkState::Closed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Telemetry link error: {}", e);
                    state.send_replace(LinkState::Failed);
                    break;
                }
                None => {
                    info!("Telemetry link ended by peer");
                    state.send_replace(LinkState::Closed);
                    break;
                }
            },
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_invalid_scheme_fails_immediately() {
        let mut link = TelemetryLink::new(LinkConfig::default());
        let result = link.open("ftp://collector.local").await;
        assert!(matches!(result, Err(EdgeError::InvalidEndpoint(_))));
        assert_eq!(link.state(), LinkState::Failed);
        assert!(link.state().is_terminal());
    }

    #[tokio::test]
    async fn test_unreachable_collector_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut link = TelemetryLink::new(LinkConfig::default());
        let result = link.open(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(EdgeError::Handshake(_))));
        assert_eq!(link.state(), LinkState::Failed);
    }

    #[tokio::test]
    async fn test_open_send_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut texts = Vec::new();
            let mut close_reason = None;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => texts.push(text),
                    Message::Close(frame) => {
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            (texts, close_reason)
        });

        let mut link = TelemetryLink::new(LinkConfig::default());
        let sender = link.open(&format!("ws://{}\n", addr)).await.unwrap();
        assert_eq!(link.state(), LinkState::Open);

        sender.send("{\"n\":1}".to_string()).unwrap();
        sender.send("{\"n\":2}".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        link.close(DISCONNECT_REASON).await.unwrap();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.stats().messages_out, 2);
        assert!(matches!(sender.send("late".to_string()), Err(EdgeError::LinkClosed)));

        let (texts, reason) = server.await.unwrap();
        assert_eq!(texts, vec!["{\"n\":1}".to_string(), "{\"n\":2}".to_string()]);
        assert_eq!(reason.as_deref(), Some(DISCONNECT_REASON));
    }

    async fn stalled_collector() -> (std::net::SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // Hold the connection without ever reading from it.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        (addr, server)
    }

    fn flood(sender: &LinkSender) {
        let chunk = "x".repeat(256 * 1024);
        for _ in 0..64 {
            let _ = sender.send(chunk.clone());
        }
    }

    #[tokio::test]
    async fn test_close_bounded_when_peer_stops_reading() {
        let (addr, server) = stalled_collector().await;
        let config = LinkConfig {
            close_timeout: Duration::from_millis(300),
            send_timeout: Duration::from_secs(60),
            ..LinkConfig::default()
        };
        let mut link = TelemetryLink::new(config);
        let sender = link.open(&format!("ws://{}", addr)).await.unwrap();

        for _ in 0..8 {
            flood(&sender);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let started = std::time::Instant::now();
        link.close(DISCONNECT_REASON).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(link.state().is_terminal());
        assert!(matches!(sender.send("late".to_string()), Err(EdgeError::LinkClosed)));
        server.abort();
    }

    #[tokio::test]
    async fn test_stalled_send_fails_link() {
        let (addr, server) = stalled_collector().await;
        let config = LinkConfig {
            send_timeout: Duration::from_millis(200),
            ..LinkConfig::default()
        };
        let mut link = TelemetryLink::new(config);
        let sender = link.open(&format!("ws://{}", addr)).await.unwrap();
        let mut states = link.subscribe();

        let wait_failed = async {
            loop {
                flood(&sender);
                if *states.borrow_and_update() == LinkState::Failed {
                    break;
                }
                let _ = timeout(Duration::from_millis(50), states.changed()).await;
            }
        };
        timeout(Duration::from_secs(10), wait_failed).await.unwrap();

        link.close(DISCONNECT_REASON).await.unwrap();
        assert_eq!(link.state(), LinkState::Failed);
        assert!(link.stats().send_errors >= 1);
        server.abort();
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let mut link = TelemetryLink::new(LinkConfig::default());
        link.close(DISCONNECT_REASON).await.unwrap();
        assert_eq!(link.state(), LinkState::Idle);
    }
}
