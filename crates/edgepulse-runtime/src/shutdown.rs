//! Operator input and shutdown coordination
//!
//! A blocking thread watches the terminal for operator keys:
//! - `q` (or Ctrl-C delivered as a key) raises the stop signal
//! - `m` toggles between Safe and Prediction mode
//!
//! The terminal stays in cooked mode. When no terminal is available the
//! coordinator exits and the stop signal is left to other sources.

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, info, warn};

use edgepulse_core::{EdgeError, EdgeResult, SharedControl, StopSignal};

/// Operator commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKey {
    Stop,
    ToggleMode,
    Other,
}

impl OperatorKey {
    pub fn from_key_event(key: &KeyEvent) -> Self {
        if key.kind == KeyEventKind::Release {
            return OperatorKey::Other;
        }
        match key.code {
            KeyCode::Char('c') | KeyCode::Char('C')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                OperatorKey::Stop
            }
            KeyCode::Char('q') | KeyCode::Char('Q') => OperatorKey::Stop,
            KeyCode::Char('m') | KeyCode::Char('M') => OperatorKey::ToggleMode,
            _ => OperatorKey::Other,
        }
    }
}

/// Source of operator keys. `next_key` may block for up to `wait`.
pub trait KeySource: Send + 'static {
    fn next_key(&mut self, wait: Duration) -> EdgeResult<Option<OperatorKey>>;
}

impl<K: KeySource + ?Sized> KeySource for Box<K> {
    fn next_key(&mut self, wait: Duration) -> EdgeResult<Option<OperatorKey>> {
        (**self).next_key(wait)
    }
}

/// Keys from the controlling terminal
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn next_key(&mut self, wait: Duration) -> EdgeResult<Option<OperatorKey>> {
        if !event::poll(wait).map_err(|e| EdgeError::KeyInput(e.to_string()))? {
            return Ok(None);
        }
        match event::read().map_err(|e| EdgeError::KeyInput(e.to_string()))? {
            Event::Key(key) => Ok(Some(OperatorKey::from_key_event(&key))),
            _ => Ok(None),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownStats {
    pub keys: u64,
    pub toggles: u64,
    /// Whether this coordinator raised the stop signal
    pub requested_stop: bool,
}

pub struct ShutdownCoordinator<K> {
    keys: K,
    control: SharedControl,
    stop: StopSignal,
    poll_interval: Duration,
}

impl<K: KeySource> ShutdownCoordinator<K> {
    pub fn new(keys: K, control: SharedControl, stop: StopSignal, poll_interval: Duration) -> Self {
        ShutdownCoordinator {
            keys,
            control,
            stop,
            poll_interval,
        }
    }

    /// Watch keys until stopped. Blocks the calling thread.
    pub fn run(mut self) -> ShutdownStats {
        let mut stats = ShutdownStats::default();
        while !self.stop.is_stopped() {
            match self.keys.next_key(self.poll_interval) {
                Ok(Some(OperatorKey::Stop)) => {
                    stats.keys += 1;
                    if self.stop.trigger() {
                        stats.requested_stop = true;
                        info!("Stop requested by operator");
                    }
                }
                Ok(Some(OperatorKey::ToggleMode)) => {
                    stats.keys += 1;
                    stats.toggles += 1;
                    let mode = self.control.toggle_mode();
                    info!(%mode, "Mode toggled by operator");
                }
                Ok(Some(OperatorKey::Other)) => stats.keys += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("Operator keys unavailable: {}", e);
                    break;
                }
            }
        }
        debug!("Shutdown coordinator exiting");
        stats
    }

    /// Run on tokio's blocking pool
    pub fn spawn(self) -> tokio::task::JoinHandle<ShutdownStats> {
        tokio::task::spawn_blocking(move || self.run())
    }
}
