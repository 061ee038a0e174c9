//! Scripted stand-ins for the control server and the operator
//!
//! `ScriptedApi` answers registration requests from a queue and control
//! polls with a settable reply. `ScriptedKeys` replays operator keys at
//! fixed offsets from the first poll.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use edgepulse_core::{EdgeError, EdgeResult};
use edgepulse_runtime::{KeySource, OperatorKey};
use edgepulse_transport::ControlApi;

/// One scripted server reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Body(String),
    /// Transport failure (connection refused, timeout, non-2xx)
    Fail(String),
}

impl Reply {
    pub fn empty() -> Self {
        Reply::Body(String::new())
    }

    pub fn registration(device_id: &str) -> Self {
        Reply::Body(serde_json::json!({ "device_id": device_id }).to_string())
    }

    pub fn control(device_id: &str, mode: &str, speed: &str) -> Self {
        Reply::Body(
            serde_json::json!({ "device_id": device_id, "mode": mode, "speed": speed })
                .to_string(),
        )
    }

    fn into_result(self) -> EdgeResult<String> {
        match self {
            Reply::Body(body) => Ok(body),
            Reply::Fail(reason) => Err(EdgeError::Http(reason)),
        }
    }
}

#[derive(Debug, Default)]
struct ApiState {
    registrations: VecDeque<Reply>,
    /// Answer once the registration queue is drained
    registration_fallback: Option<Reply>,
    control: Option<Reply>,
    register_calls: u32,
    polled_ids: Vec<String>,
}

/// Scripted `ControlApi`. Clones share one script.
#[derive(Clone, Debug, Default)]
pub struct ScriptedApi {
    state: Arc<Mutex<ApiState>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue registration replies, answered in order
    pub fn with_registrations(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.state.lock().registrations.extend(replies);
        self
    }

    /// Reply used after the queue is drained. Defaults to an empty body.
    pub fn with_registration_fallback(self, reply: Reply) -> Self {
        self.state.lock().registration_fallback = Some(reply);
        self
    }

    /// Reply to every control poll. Defaults to an empty body.
    pub fn with_control(self, reply: Reply) -> Self {
        self.set_control(reply);
        self
    }

    pub fn set_control(&self, reply: Reply) {
        self.state.lock().control = Some(reply);
    }

    pub fn register_calls(&self) -> u32 {
        self.state.lock().register_calls
    }

    /// Device ids sent with each control poll
    pub fn polled_ids(&self) -> Vec<String> {
        self.state.lock().polled_ids.clone()
    }
}

impl ControlApi for ScriptedApi {
    fn register(&self) -> impl Future<Output = EdgeResult<String>> + Send {
        let reply = {
            let mut state = self.state.lock();
            state.register_calls += 1;
            match state.registrations.pop_front() {
                Some(reply) => reply,
                None => state.registration_fallback.clone().unwrap_or_else(Reply::empty),
            }
        };
        async move { reply.into_result() }
    }

    fn poll_control(&self, device_id: &str) -> impl Future<Output = EdgeResult<String>> + Send {
        let reply = {
            let mut state = self.state.lock();
            state.polled_ids.push(device_id.to_string());
            state.control.clone().unwrap_or_else(Reply::empty)
        };
        async move { reply.into_result() }
    }
}

/// Operator keys replayed at offsets from the first `next_key` call
pub struct ScriptedKeys {
    script: VecDeque<(Duration, OperatorKey)>,
    started: Option<Instant>,
}

impl ScriptedKeys {
    pub fn new(script: impl IntoIterator<Item = (Duration, OperatorKey)>) -> Self {
        let mut script: Vec<_> = script.into_iter().collect();
        script.sort_by_key(|(at, _)| *at);
        ScriptedKeys {
            script: script.into(),
            started: None,
        }
    }

    /// Press `q` after `after`
    pub fn stop_after(after: Duration) -> Self {
        Self::new([(after, OperatorKey::Stop)])
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self, wait: Duration) -> EdgeResult<Option<OperatorKey>> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let Some(&(at, key)) = self.script.front() else {
            std::thread::sleep(wait);
            return Ok(None);
        };

        let due = started + at;
        let now = Instant::now();
        if due > now {
            let remaining = due - now;
            if remaining > wait {
                std::thread::sleep(wait);
                return Ok(None);
            }
            std::thread::sleep(remaining);
        }
        self.script.pop_front();
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registration_queue_then_fallback() {
        let api = ScriptedApi::new()
            .with_registrations([Reply::empty(), Reply::Fail("refused".to_string())])
            .with_registration_fallback(Reply::registration("EF-007"));

        assert_eq!(api.register().await.unwrap(), "");
        assert!(api.register().await.is_err());
        assert!(api.register().await.unwrap().contains("EF-007"));
        assert!(api.register().await.unwrap().contains("EF-007"));
        assert_eq!(api.register_calls(), 4);
    }

    #[tokio::test]
    async fn test_control_records_ids() {
        let api = ScriptedApi::new().with_control(Reply::control("EF-007", "SAFE", "FAST"));
        let clone = api.clone();
        let body = clone.poll_control("EF-007").await.unwrap();
        assert!(body.contains("FAST"));
        assert_eq!(api.polled_ids(), vec!["EF-007".to_string()]);
    }

    #[test]
    fn test_keys_replay_in_order() {
        let mut keys = ScriptedKeys::new([
            (Duration::from_millis(20), OperatorKey::Stop),
            (Duration::ZERO, OperatorKey::ToggleMode),
        ]);
        let wait = Duration::from_millis(50);
        assert_eq!(keys.next_key(wait).unwrap(), Some(OperatorKey::ToggleMode));
        assert_eq!(keys.next_key(wait).unwrap(), Some(OperatorKey::Stop));
        assert_eq!(keys.next_key(Duration::from_millis(1)).unwrap(), None);
    }
}
