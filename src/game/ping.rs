//! Latency estimation for movement and projectile prediction
//!
//! The transport reports a noisy round-trip time. The estimator turns it into
//! the two quantities prediction needs: how far to fast-forward an
//! authoritative spawn, and how long a high-latency client should hold back
//! its local projectile so it never predicts past the configured window.

use serde::{Deserialize, Serialize};

/// Default fudge subtracted from measured RTT (ms)
pub const DEFAULT_LATENCY_REDUCTION_MS: f32 = 20.0;
/// Default share of the latency credited to the client
pub const DEFAULT_CLIENT_BIAS_PCT: f32 = 0.5;
/// Default largest ping that is forward-predicted (ms)
pub const DEFAULT_MAX_PREDICTION_PING_MS: f32 = 150.0;

/// Smoothing weight given to each new RTT sample
const PING_SMOOTHING: f32 = 0.25;

/// Per-controller prediction tuning, immutable after load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Processing overhead subtracted from measured RTT, in ms
    pub latency_reduction_ms: f32,
    /// How much (0..=1) to favor the client when placing authoritative projectiles
    pub client_bias_pct: f32,
    /// Pings above this are not forward-predicted; spawns are delayed instead
    pub max_prediction_ping_ms: f32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            latency_reduction_ms: DEFAULT_LATENCY_REDUCTION_MS,
            client_bias_pct: DEFAULT_CLIENT_BIAS_PCT,
            max_prediction_ping_ms: DEFAULT_MAX_PREDICTION_PING_MS,
        }
    }
}

/// How this process participates in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMode {
    /// Single process, no networking
    Standalone,
    /// Server that also hosts a local player
    ListenServer,
    /// Server with remote players only
    DedicatedServer,
    /// Remote client
    Client,
}

impl NetMode {
    pub fn has_authority(self) -> bool {
        !matches!(self, NetMode::Client)
    }
}

/// Derives prediction timings from a controller's ping
#[derive(Debug, Clone)]
pub struct PingEstimator {
    config: PredictionConfig,
    net_mode: NetMode,
    /// True when the controller belongs to this process (client's own
    /// controller, or the listen-server host)
    is_local_controller: bool,
    ping_ms: Option<f32>,
}

impl PingEstimator {
    pub fn new(config: PredictionConfig, net_mode: NetMode, is_local_controller: bool) -> Self {
        Self {
            config,
            net_mode,
            is_local_controller,
            ping_ms: None,
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn net_mode(&self) -> NetMode {
        self.net_mode
    }

    pub fn ping_ms(&self) -> Option<f32> {
        self.ping_ms
    }

    /// Replace the current round-trip sample (ms)
    pub fn set_ping(&mut self, ping_ms: f32) {
        self.ping_ms = Some(ping_ms.max(0.0));
    }

    /// Seconds to simulate an authoritative spawn ahead to catch up with the
    /// client's prediction
    pub fn forward_prediction_time(&self) -> f32 {
        if self.net_mode == NetMode::Standalone {
            return 0.0;
        }
        let Some(ping) = self.ping_ms else {
            return 0.0;
        };

        let reduction = if self.is_local_controller {
            0.0
        } else {
            self.config.latency_reduction_ms
        };
        let predicted = (ping - reduction).clamp(0.0, self.config.max_prediction_ping_ms);
        0.001 * self.config.client_bias_pct * predicted
    }

    /// Seconds a client should wait before spawning its fake projectile so the
    /// effective predicted ping drops back to the configured maximum
    pub fn projectile_sleep_time(&self) -> f32 {
        let Some(ping) = self.ping_ms else {
            return 0.0;
        };
        let excess =
            ping - self.config.latency_reduction_ms - self.config.max_prediction_ping_ms;
        0.001 * excess.max(0.0)
    }
}

/// Smoothed round-trip tracker fed by ping probes
#[derive(Debug, Clone, Default)]
pub struct PingTracker {
    smoothed_ms: Option<f32>,
    samples: u64,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one RTT sample, returning the updated estimate
    pub fn record(&mut self, rtt_ms: f32) -> f32 {
        let rtt_ms = rtt_ms.max(0.0);
        let next = match self.smoothed_ms {
            Some(prev) => prev + (rtt_ms - prev) * PING_SMOOTHING,
            None => rtt_ms,
        };
        self.smoothed_ms = Some(next);
        self.samples += 1;
        next
    }

    pub fn current(&self) -> Option<f32> {
        self.smoothed_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(ping: f32) -> PingEstimator {
        let mut est = PingEstimator::new(PredictionConfig::default(), NetMode::DedicatedServer, false);
        est.set_ping(ping);
        est
    }

    #[test]
    fn no_sample_means_no_prediction() {
        let est = PingEstimator::new(PredictionConfig::default(), NetMode::Client, true);
        assert_eq!(est.forward_prediction_time(), 0.0);
        assert_eq!(est.projectile_sleep_time(), 0.0);
    }

    #[test]
    fn standalone_never_forward_predicts() {
        let mut est = PingEstimator::new(PredictionConfig::default(), NetMode::Standalone, true);
        est.set_ping(80.0);
        assert_eq!(est.forward_prediction_time(), 0.0);
    }

    #[test]
    fn latency_reduction_cancels_low_ping() {
        assert_eq!(remote(20.0).forward_prediction_time(), 0.0);
    }

    #[test]
    fn local_controller_skips_reduction() {
        let mut est = PingEstimator::new(PredictionConfig::default(), NetMode::Client, true);
        est.set_ping(100.0);
        assert!((est.forward_prediction_time() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn forward_time_monotonic_then_clamped() {
        let mut last = 0.0;
        let mut ping = 0.0;
        while ping <= 150.0 {
            let t = remote(ping).forward_prediction_time();
            assert!(t >= last, "decreased at ping {ping}");
            last = t;
            ping += 5.0;
        }
        let ceiling = remote(170.0).forward_prediction_time();
        assert!((ceiling - 0.075).abs() < 1e-6);
        for high in [200.0, 400.0, 1000.0] {
            assert_eq!(remote(high).forward_prediction_time(), ceiling);
        }
    }

    #[test]
    fn sleep_time_threshold() {
        for ping in [0.0, 100.0, 169.0, 170.0] {
            assert_eq!(remote(ping).projectile_sleep_time(), 0.0);
        }
        assert!(remote(171.0).projectile_sleep_time() > 0.0);
        assert!((remote(400.0).projectile_sleep_time() - 0.23).abs() < 1e-5);
    }

    #[test]
    fn tracker_smooths_samples() {
        let mut tracker = PingTracker::new();
        assert_eq!(tracker.record(100.0), 100.0);
        assert_eq!(tracker.record(200.0), 125.0);
        assert_eq!(tracker.samples(), 2);
    }
}
