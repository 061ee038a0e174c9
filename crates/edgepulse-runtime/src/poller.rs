//! Remote control polling
//!
//! At a fixed interval, independent of the sampling cadence, the poller
//! fetches the desired mode and speed for this device and applies them
//! atomically. Replies addressed to another device are ignored.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use edgepulse_core::{
    normalize_device_id, ControlTransition, EdgeError, Mode, SharedControl, Speed, StopSignal,
};
use edgepulse_transport::{parse_control, ControlApi};

/// What one poll did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Applied(ControlTransition),
    Unchanged,
    Mismatch { expected: String, actual: String },
    Empty,
    Malformed(String),
    Failed(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub polls: u64,
    pub applied: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl PollerStats {
    fn record(&mut self, outcome: &PollOutcome) {
        self.polls += 1;
        match outcome {
            PollOutcome::Applied(_) => self.applied += 1,
            PollOutcome::Unchanged => {}
            PollOutcome::Mismatch { .. } | PollOutcome::Empty | PollOutcome::Malformed(_) => {
                self.rejected += 1
            }
            PollOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub struct ControlPoller<A> {
    api: Arc<A>,
    control: SharedControl,
    interval: Duration,
}

impl<A: ControlApi> ControlPoller<A> {
    pub fn new(api: Arc<A>, control: SharedControl, interval: Duration) -> Self {
        ControlPoller {
            api,
            control,
            interval,
        }
    }

    /// Fetch and apply the control record once
    pub async fn poll_once(&self) -> PollOutcome {
        let device_id = self.control.device_id();
        let body = match self.api.poll_control(&device_id).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Control poll failed: {}", e);
                return PollOutcome::Failed(e.to_string());
            }
        };

        let reply = match parse_control(&body) {
            Ok(reply) => reply,
            Err(EdgeError::EmptyResponse(_)) => {
                debug!("Empty control reply");
                return PollOutcome::Empty;
            }
            Err(e) => {
                warn!("Control reply rejected: {}", e);
                return PollOutcome::Malformed(e.to_string());
            }
        };

        let expected = normalize_device_id(&device_id);
        let actual = normalize_device_id(&reply.device_id);
        if expected != actual {
            let mismatch = EdgeError::IdentityMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            };
            warn!("Control reply ignored: {}", mismatch);
            return PollOutcome::Mismatch { expected, actual };
        }

        if !Mode::is_known_token(&reply.mode) {
            warn!(token = %reply.mode, "Unknown mode token, using Safe");
        }
        if !Speed::is_known_token(&reply.speed) {
            warn!(token = %reply.speed, "Unknown speed token, using Slow");
        }
        let mode = Mode::from_token(&reply.mode);
        let speed = Speed::from_token(&reply.speed);

        match self.control.apply(mode, speed) {
            Some(transition) => {
                info!(%transition, "Control state changed");
                PollOutcome::Applied(transition)
            }
            None => PollOutcome::Unchanged,
        }
    }

    pub async fn run(self, stop: StopSignal) -> PollerStats {
        let mut stats = PollerStats::default();
        while !stop.is_stopped() {
            let outcome = tokio::select! {
                outcome = self.poll_once() => outcome,
                _ = stop.stopped() => break,
            };
            stats.record(&outcome);
            if !stop.sleep(self.interval).await {
                break;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgepulse_core::EdgeResult;
    use std::future::Future;
    use parking_lot::Mutex;

    /// Answers every poll with the same body, or an HTTP error for `None`
    struct Fixed(Mutex<Vec<String>>, Option<String>);

    impl ControlApi for Fixed {
        fn register(&self) -> impl Future<Output = EdgeResult<String>> + Send {
            async { Ok(String::new()) }
        }

        fn poll_control(&self, device_id: &str) -> impl Future<Output = EdgeResult<String>> + Send {
            self.0.lock().push(device_id.to_string());
            let reply = self.1.clone();
            async move { reply.ok_or_else(|| EdgeError::Http("timeout".to_string())) }
        }
    }

    fn setup(reply: Option<String>) -> (ControlPoller<Fixed>, Arc<Fixed>, SharedControl) {
        let api = Arc::new(Fixed(Mutex::new(Vec::new()), reply));
        let control = SharedControl::new();
        control.set_device_id("EF-007");
        let poller = ControlPoller::new(api.clone(), control.clone(), Duration::from_secs(1));
        (poller, api, control)
    }

    #[tokio::test]
    async fn test_applies_matching_reply() {
        let (poller, api, control) =
            setup(Some(r#"{"device_id":"ef-007","mode":"PREDICTION","speed":"FAST"}"#.to_string()));

        match poller.poll_once().await {
            PollOutcome::Applied(t) => {
                assert!(t.mode_changed());
                assert!(t.speed_changed());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(control.mode(), Mode::Prediction);
        assert_eq!(control.speed(), Speed::Fast);
        assert_eq!(poller.poll_once().await, PollOutcome::Unchanged);
        assert_eq!(api.0.lock().as_slice(), ["EF-007", "EF-007"]);
    }

    #[tokio::test]
    async fn test_ignores_other_device() {
        let (poller, _, control) =
            setup(Some(r#"{"device_id":"EF-008","mode":"PREDICTION","speed":"FAST"}"#.to_string()));
        assert!(matches!(poller.poll_once().await, PollOutcome::Mismatch { .. }));
        assert_eq!(control.mode(), Mode::Safe);
        assert_eq!(control.speed(), Speed::Slow);
    }

    #[tokio::test]
    async fn test_unknown_tokens_fall_back() {
        let (poller, _, control) =
            setup(Some(r#"{"device_id":"EF-007","mode":"TURBO","speed":"WARP"}"#.to_string()));
        control.apply(Mode::Prediction, Speed::Fast);

        assert!(matches!(poller.poll_once().await, PollOutcome::Applied(_)));
        assert_eq!(control.mode(), Mode::Safe);
        assert_eq!(control.speed(), Speed::Slow);
    }

    #[tokio::test]
    async fn test_bad_replies_leave_state() {
        for reply in [
            Some(String::new()),
            Some("{\"device_id\":".to_string()),
            None,
        ] {
            let (poller, _, control) = setup(reply);
            let outcome = poller.poll_once().await;
            assert!(!matches!(outcome, PollOutcome::Applied(_) | PollOutcome::Unchanged));
            assert_eq!(control.get().mode, Mode::Safe);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_at_interval() {
        let (poller, api, _) = setup(Some(String::new()));
        let stop = StopSignal::new();
        let handle = tokio::spawn(poller.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        stop.trigger();
        let stats = handle.await.unwrap();
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.rejected, 3);
        assert_eq!(api.0.lock().len(), 3);
    }
}
