//! Loopback telemetry collector
//!
//! A WebSocket server on 127.0.0.1 that records every text message and
//! the close reason of each connection. The close handshake is answered
//! so clients see a confirmed close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Everything the collector has seen
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectorLog {
    pub connections: u32,
    pub messages: Vec<String>,
    pub close_reasons: Vec<String>,
}

pub struct LoopbackCollector {
    addr: SocketAddr,
    log: Arc<Mutex<CollectorLog>>,
    task: JoinHandle<()>,
}

impl LoopbackCollector {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let log = Arc::new(Mutex::new(CollectorLog::default()));

        let task_log = log.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, peer)) = listener.accept().await {
                let log = task_log.clone();
                tokio::spawn(async move {
                    let mut ws = match tokio_tungstenite::accept_async(tcp).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            debug!(%peer, "Collector handshake failed: {}", e);
                            return;
                        }
                    };
                    log.lock().connections += 1;

                    // Keep polling after a close frame so the reply is flushed.
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(text) => log.lock().messages.push(text),
                            Message::Close(frame) => {
                                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                                log.lock().close_reasons.push(reason);
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Ok(LoopbackCollector { addr, log, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` address for `WS_URI`
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn log(&self) -> CollectorLog {
        self.log.lock().clone()
    }

    /// Decoded JSON messages
    pub fn documents(&self) -> Vec<serde_json::Value> {
        self.log
            .lock()
            .messages
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Wait until at least `count` messages arrived or `limit` elapsed
    pub async fn wait_for_messages(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.log.lock().messages.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until a close frame arrived or `limit` elapsed
    pub async fn wait_for_close(&self, limit: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if let Some(reason) = self.log.lock().close_reasons.first().cloned() {
                return Some(reason);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for LoopbackCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}
