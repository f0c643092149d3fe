//! Vehicle snapshot building for simulated proxies

use crate::ws::protocol::{ServerMsg, VehicleState};

use super::vehicle::Vehicle;

/// Decides which ticks carry a snapshot and builds it
///
/// Spreads `snapshot_rate` sends evenly over `tick_rate` ticks, so rates that
/// do not divide each other (20 Hz out of 30 Hz) still average out exactly.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    tick_rate: u32,
    snapshot_rate: u32,
    credit: u32,
    sent: u64,
}

impl SnapshotBuilder {
    pub fn new(tick_rate: u32, snapshot_rate: u32) -> Self {
        Self {
            tick_rate: tick_rate.max(1),
            snapshot_rate: snapshot_rate.min(tick_rate),
            credit: 0,
            sent: 0,
        }
    }

    /// Call once per tick; true when this tick should send
    pub fn should_send(&mut self) -> bool {
        self.credit += self.snapshot_rate;
        if self.credit >= self.tick_rate {
            self.credit -= self.tick_rate;
            true
        } else {
            false
        }
    }

    /// Send on the next tick regardless of the accumulated credit (joins, for example)
    pub fn force_next(&mut self) {
        self.credit = self.credit.max(self.tick_rate.saturating_sub(self.snapshot_rate));
    }

    pub fn build<'a>(&mut self, tick: u64, vehicles: impl Iterator<Item = &'a Vehicle>) -> ServerMsg {
        self.sent += 1;
        let vehicles = vehicles
            .map(|v| VehicleState {
                player_id: v.id(),
                stats: v.snapshot_stats(),
            })
            .collect();
        ServerMsg::VehicleSnapshot { tick, vehicles }
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::math::Rotator;
    use crate::game::reconcile::NetRole;
    use crate::game::vehicle::VehicleTuning;
    use glam::Vec3;
    use uuid::Uuid;

    #[test]
    fn twenty_of_thirty_ticks_send() {
        let mut builder = SnapshotBuilder::new(30, 20);
        let sent = (0..30).filter(|_| builder.should_send()).count();
        assert_eq!(sent, 20);
        let sent = (0..300).filter(|_| builder.should_send()).count();
        assert_eq!(sent, 200);
    }

    #[test]
    fn forced_snapshot_goes_out_next_tick() {
        let mut builder = SnapshotBuilder::new(30, 1);
        assert!(!builder.should_send());
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn snapshot_lists_every_vehicle() {
        let vehicles: Vec<Vehicle> = (0..3)
            .map(|i| {
                Vehicle::new(
                    Uuid::new_v4(),
                    NetRole::Authority,
                    Vec3::new(i as f32 * 100.0, 0.0, 500.0),
                    Rotator::ZERO,
                    VehicleTuning::default(),
                    50.0,
                    16,
                )
            })
            .collect();
        let mut builder = SnapshotBuilder::new(30, 20);
        let ServerMsg::VehicleSnapshot { tick, vehicles: states } = builder.build(7, vehicles.iter()) else {
            panic!("expected a vehicle snapshot");
        };
        assert_eq!(tick, 7);
        assert_eq!(states.len(), 3);
        assert_eq!(states[2].stats.location, Vec3::new(200.0, 0.0, 500.0));
        assert_eq!(builder.snapshots_sent(), 1);
    }
}
