//! Reading generator
//!
//! Each cycle draws six readings in `[0, 100)` and one event label, then
//! writes them together with a fresh timestamp and the current mode
//! label in a single update of the shared document.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use chrono::Local;
use edgepulse_core::{
    format_timestamp, EventLabel, Readings, SharedControl, SharedTelemetry, StopSignal,
    READING_MAX,
};

use crate::DutyStats;

pub struct Generator {
    rng: StdRng,
    telemetry: SharedTelemetry,
    control: SharedControl,
}

impl Generator {
    pub fn new(telemetry: SharedTelemetry, control: SharedControl) -> Self {
        Generator {
            rng: StdRng::from_entropy(),
            telemetry,
            control,
        }
    }

    /// Deterministic generator for tests and replays
    pub fn with_seed(telemetry: SharedTelemetry, control: SharedControl, seed: u64) -> Self {
        Generator {
            rng: StdRng::seed_from_u64(seed),
            telemetry,
            control,
        }
    }

    /// Draw one sample and publish it. Returns the new document version.
    pub fn step(&mut self) -> u64 {
        let mut values = [0.0; Readings::CHANNELS];
        for value in values.iter_mut() {
            *value = self.rng.gen_range(0.0..READING_MAX);
        }
        let readings = Readings::from_array(values);
        let event = EventLabel::ALL[self.rng.gen_range(0..EventLabel::COUNT)];
        let mode_label = self.control.mode().label();
        let timestamp = format_timestamp(Local::now());

        let version = self.telemetry.update(|doc| {
            doc.timestamp = timestamp;
            doc.event = event;
            doc.readings = readings;
            doc.mode_label = mode_label.to_string();
        });
        trace!(version, %event, "Sample published");
        version
    }

    /// Run until stopped, one sample per cadence period
    pub async fn run(mut self, stop: StopSignal) -> DutyStats {
        let mut stats = DutyStats::default();
        while !stop.is_stopped() {
            self.step();
            stats.iterations += 1;
            if !stop.sleep(self.control.speed().cadence()).await {
                break;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgepulse_core::{Mode, Speed};
    use std::time::Duration;

    #[test]
    fn test_step_publishes_in_range_sample() {
        let telemetry = SharedTelemetry::new();
        let control = SharedControl::new();
        let mut generator = Generator::with_seed(telemetry.clone(), control.clone(), 7);

        let before = telemetry.version();
        for _ in 0..200 {
            generator.step();
            let doc = telemetry.snapshot().document;
            assert!(doc.readings.in_range());
            assert_eq!(doc.mode_label, "Safe");
        }
        assert_eq!(telemetry.version(), before + 200);
    }

    #[test]
    fn test_mode_label_follows_control() {
        let telemetry = SharedTelemetry::new();
        let control = SharedControl::new();
        let mut generator = Generator::with_seed(telemetry.clone(), control.clone(), 1);

        control.apply(Mode::Prediction, Speed::Slow);
        generator.step();
        assert_eq!(telemetry.snapshot().document.mode_label, "Prediction");
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let a = SharedTelemetry::new();
        let b = SharedTelemetry::new();
        let mut ga = Generator::with_seed(a.clone(), SharedControl::new(), 42);
        let mut gb = Generator::with_seed(b.clone(), SharedControl::new(), 42);
        ga.step();
        gb.step();
        assert_eq!(a.snapshot().document.readings, b.snapshot().document.readings);
        assert_eq!(a.snapshot().document.event, b.snapshot().document.event);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_follows_cadence() {
        let telemetry = SharedTelemetry::new();
        let control = SharedControl::new();
        control.apply(Mode::Safe, Speed::Fast);
        let stop = StopSignal::new();

        let generator = Generator::with_seed(telemetry.clone(), control.clone(), 3);
        let handle = tokio::spawn(generator.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        stop.trigger();
        let stats = handle.await.unwrap();
        // one sample at t=0, then one per 100ms
        assert!((10..=12).contains(&stats.iterations), "{:?}", stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_applies_to_next_interval() {
        let telemetry = SharedTelemetry::new();
        let control = SharedControl::new();
        let stop = StopSignal::new();
        let generator = Generator::with_seed(telemetry.clone(), control.clone(), 5);
        let handle = tokio::spawn(generator.run(stop.clone()));

        // Slow: samples at 0 and 1000ms
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(telemetry.version(), 2);

        // The pending slow sleep finishes at 2000ms, then 200ms steps follow
        control.apply(Mode::Safe, Speed::Medium);
        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(telemetry.version(), 3);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(telemetry.version(), 4);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(telemetry.version(), 5);

        stop.trigger();
        let stats = handle.await.unwrap();
        assert_eq!(stats.iterations, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_slow_sleep() {
        let control = SharedControl::new();
        let stop = StopSignal::new();
        let generator = Generator::with_seed(SharedTelemetry::new(), control, 3);
        let handle = tokio::spawn(generator.run(stop.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.trigger();
        let stats = handle.await.unwrap();
        assert_eq!(stats.iterations, 1);
    }
}
