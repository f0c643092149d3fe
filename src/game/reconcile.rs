//! Movement reconciliation between predicted and authoritative state
//!
//! The same [`apply_command`] runs on the owning client and on the server, so
//! both sides integrate identical inputs. The server stamps the resulting
//! [`ServerStats`] with the command's timestamp. The owning client compares
//! those stats with what it predicted for that tick and, when the divergence
//! exceeds the allowed error, blends back towards the server until it is
//! under the threshold again.

use std::collections::VecDeque;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::math::{smoothing_alpha, Rotator};
use super::move_queue::MoveCommand;
use super::physics::PhysicsBody;

/// Default allowed distance between predicted and server location
pub const DEFAULT_MAX_NET_PREDICTION_ERROR: f32 = 50.0;
/// Exponential smoothing rate (per second) for interpolation and resync
pub const CORRECTION_RATE: f32 = 4.0;
/// Predicted locations kept for comparison against late server stats
const PREDICTION_HISTORY: usize = 64;

/// Which side of the connection simulates a vehicle instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetRole {
    /// Server copy that owns the ground truth
    Authority,
    /// Owning client, predicts and reconciles
    AutonomousProxy,
    /// Non-owning client, interpolates only
    SimulatedProxy,
}

/// Server ground truth after applying one client tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub location: Vec3,
    pub orientation: Rotator,
    pub velocity: Vec3,
    /// Timestamp of the client command this state reflects
    pub timestamp: f64,
}

impl ServerStats {
    pub fn capture<B: PhysicsBody + ?Sized>(body: &B, timestamp: f64) -> Self {
        Self {
            location: body.location(),
            orientation: body.rotation(),
            velocity: body.linear_velocity(),
            timestamp,
        }
    }
}

/// Apply one command to a body
///
/// Deterministic in the body's current velocities and the command; shared by
/// the predicting client and the authoritative server.
pub fn apply_command<B: PhysicsBody + ?Sized>(body: &mut B, cmd: &MoveCommand) {
    let velocity = cmd
        .velocity_override_mask
        .select(cmd.velocity_override, body.linear_velocity());
    body.set_linear_velocity(velocity);
    body.add_force(cmd.force);

    if cmd.angular_velocity_override_set {
        body.set_angular_velocity(cmd.angular_velocity_override);
    }
    body.add_torque(cmd.torque);
}

/// What a reconcile pass did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Authority never corrects itself
    Authoritative,
    /// Simulated proxy smoothed towards the server
    Interpolated,
    /// Prediction within tolerance
    InSync { error: f32 },
    /// Blending towards server state
    Resyncing { error: f32 },
    /// Error dropped back under the threshold this pass
    ResyncFinished { error: f32 },
}

/// Per-vehicle reconciliation state machine
#[derive(Debug, Clone)]
pub struct MovementReconciler {
    role: NetRole,
    max_error: f32,
    rate: f32,
    resyncing: bool,
    history: VecDeque<(f64, Vec3)>,
}

impl MovementReconciler {
    pub fn new(role: NetRole, max_error: f32) -> Self {
        Self {
            role,
            max_error,
            rate: CORRECTION_RATE,
            resyncing: false,
            history: VecDeque::with_capacity(PREDICTION_HISTORY),
        }
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn is_resyncing(&self) -> bool {
        self.resyncing
    }

    /// Remember where the client predicted itself after the tick `timestamp`
    pub fn record_prediction(&mut self, timestamp: f64, location: Vec3) {
        if self.history.len() >= PREDICTION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((timestamp, location));
    }

    /// Drop predictions older than an acknowledged tick
    pub fn prune_history(&mut self, acked: f64) {
        while self.history.front().is_some_and(|(ts, _)| *ts < acked) {
            self.history.pop_front();
        }
    }

    fn predicted_at(&self, timestamp: f64) -> Option<Vec3> {
        self.history
            .iter()
            .find(|(ts, _)| *ts == timestamp)
            .map(|(_, location)| *location)
    }

    /// Reconcile `body` against the latest server stats
    pub fn reconcile<B: PhysicsBody + ?Sized>(
        &mut self,
        body: &mut B,
        stats: &ServerStats,
        dt: f32,
    ) -> ReconcileOutcome {
        match self.role {
            NetRole::Authority => ReconcileOutcome::Authoritative,
            NetRole::SimulatedProxy => {
                let alpha = smoothing_alpha(self.rate, dt);
                let location = body.location().lerp(stats.location, alpha);
                body.set_location(location);
                body.set_rotation(body.rotation().lerp_towards(&stats.orientation, alpha));
                ReconcileOutcome::Interpolated
            }
            NetRole::AutonomousProxy => self.reconcile_owned(body, stats, dt),
        }
    }

    fn reconcile_owned<B: PhysicsBody + ?Sized>(
        &mut self,
        body: &mut B,
        stats: &ServerStats,
        dt: f32,
    ) -> ReconcileOutcome {
        let predicted = self
            .predicted_at(stats.timestamp)
            .unwrap_or_else(|| body.location());
        let offset = stats.location - predicted;
        let error_sq = offset.length_squared();
        let max_sq = self.max_error * self.max_error;
        let error = error_sq.sqrt();

        if !self.resyncing {
            if error_sq <= max_sq {
                return ReconcileOutcome::InSync { error };
            }
            debug!(error, timestamp = stats.timestamp, "Prediction diverged, entering resync");
            self.resyncing = true;
        } else if error_sq < max_sq {
            debug!(error, timestamp = stats.timestamp, "Resync complete");
            self.resyncing = false;
            return ReconcileOutcome::ResyncFinished { error };
        }

        let alpha = smoothing_alpha(self.rate, dt);
        let applied = offset * alpha;
        body.set_location(body.location() + applied);
        for (_, location) in self.history.iter_mut() {
            *location += applied;
        }
        body.set_rotation(body.rotation().lerp_towards(&stats.orientation, alpha));
        body.set_linear_velocity(body.linear_velocity().lerp(stats.velocity, alpha));

        ReconcileOutcome::Resyncing { error }
    }
}
