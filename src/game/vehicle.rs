//! Hover-vehicle movement: control intent to move commands, and the per-tick
//! driver that feeds them through the move queue and reconciler

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::math::Rotator;
use super::move_queue::{MoveCommand, MoveQueue};
use super::physics::{PhysicsBody, RigidBody};
use super::reconcile::{apply_command, MovementReconciler, NetRole, ReconcileOutcome, ServerStats};

/// Vehicle handling constants
#[derive(Debug, Clone, Copy)]
pub struct VehicleTuning {
    pub ascent_acceleration: f32,
    pub max_ascent_velocity: f32,
    pub descent_acceleration: f32,
    pub max_descent_velocity: f32,
    pub movement_acceleration: f32,
    pub max_movement_velocity: f32,
    pub decelerate_factor: f32,
    pub turning_torque: f32,
    pub max_turning_speed: f32,
    pub wobble_amplitude: f32,
    pub wobble_decay: f32,
    pub wobble_frequency: f32,
    /// Upward acceleration that cancels gravity
    pub gravity_compensation: f32,
    /// Hit sphere radius
    pub hitbox_radius: f32,
    /// Seconds between shots
    pub fire_rate: f32,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            ascent_acceleration: 200.0,
            max_ascent_velocity: 250.0,
            descent_acceleration: -100.0,
            max_descent_velocity: -150.0,
            movement_acceleration: 250.0,
            max_movement_velocity: 500.0,
            decelerate_factor: 2.5,
            turning_torque: 20.0,
            max_turning_speed: 40.0,
            wobble_amplitude: 1.0,
            wobble_decay: 0.5,
            wobble_frequency: 2.5,
            gravity_compensation: 980.0,
            hitbox_radius: 150.0,
            fire_rate: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Throttle {
    #[default]
    Idle,
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Turn {
    #[default]
    Straight,
    Left,
    Right,
}

/// Held controls for one tick, as produced by the (external) input layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlIntent {
    pub ascend: bool,
    pub descend: bool,
    pub throttle: Throttle,
    pub turn: Turn,
    pub locked_in: bool,
    pub boost: bool,
    pub turret_rotation: Rotator,
}

/// Per-tick cosmetic state relayed to non-owning clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualState {
    pub turret_rotation: Rotator,
    pub jet_flame_scale: f32,
    pub thrust_or_brakes_active: bool,
    pub move_direction_forward: bool,
    pub turning_flames_active: bool,
    pub turn_direction_right: bool,
    pub locked_in: bool,
    pub boost_active: bool,
}

/// Turns held controls into move commands, carrying hover state across ticks
///
/// A fresh builder hovers in place.
#[derive(Debug, Clone)]
pub struct MoveBuilder {
    should_hover: bool,
    hover_time: f32,
    max_vel_achieved: f32,
    was_vertical: bool,
}

impl Default for MoveBuilder {
    fn default() -> Self {
        Self {
            should_hover: true,
            hover_time: 0.0,
            max_vel_achieved: 0.0,
            was_vertical: false,
        }
    }
}

impl MoveBuilder {
    pub fn build<B: PhysicsBody + ?Sized>(
        &mut self,
        intent: &ControlIntent,
        body: &B,
        tuning: &VehicleTuning,
        timestamp: f64,
        dt: f32,
    ) -> MoveCommand {
        let mut cmd = MoveCommand {
            orientation: body.rotation(),
            timestamp,
            ..Default::default()
        };
        let velocity = body.linear_velocity();
        let angular = body.angular_velocity();
        let forward = body.rotation().forward();

        let vertical = intent.ascend || intent.descend;
        if vertical {
            self.should_hover = false;
        } else if self.was_vertical {
            // Released: settle into the damped wobble from the speed reached
            self.should_hover = true;
            self.max_vel_achieved = velocity.z;
            self.hover_time = 0.0;
        }
        self.was_vertical = vertical;

        if intent.ascend {
            if velocity.z > tuning.max_ascent_velocity {
                cmd.velocity_override.z = tuning.max_ascent_velocity;
                cmd.velocity_override_mask.z = true;
            } else {
                cmd.force.z += tuning.gravity_compensation + tuning.ascent_acceleration;
            }
        } else if intent.descend {
            if velocity.z < tuning.max_descent_velocity {
                cmd.velocity_override.z = tuning.max_descent_velocity;
                cmd.velocity_override_mask.z = true;
            } else {
                cmd.force.z += tuning.gravity_compensation + tuning.descent_acceleration;
            }
        }

        let direction = match intent.throttle {
            Throttle::Idle => None,
            Throttle::Forward => Some(forward),
            Throttle::Backward => Some(-forward),
        };
        if let Some(direction) = direction {
            let planar = Vec3::new(velocity.x, velocity.y, 0.0);
            let max = tuning.max_movement_velocity;
            if planar.length_squared() > max * max && planar.dot(direction) > 0.0 {
                let capped = direction * max;
                cmd.velocity_override.x = capped.x;
                cmd.velocity_override.y = capped.y;
                cmd.velocity_override_mask.x = true;
                cmd.velocity_override_mask.y = true;
            } else {
                cmd.force += direction * tuning.movement_acceleration;
            }
        }

        let max_turn = tuning.max_turning_speed;
        match intent.turn {
            Turn::Straight => {}
            Turn::Left => {
                if angular.length_squared() > max_turn * max_turn {
                    cmd.angular_velocity_override = Vec3::new(0.0, 0.0, -max_turn);
                    cmd.angular_velocity_override_set = true;
                } else {
                    cmd.torque.z -= tuning.turning_torque;
                }
            }
            Turn::Right => {
                if angular.z > max_turn {
                    cmd.angular_velocity_override = Vec3::new(0.0, 0.0, max_turn);
                    cmd.angular_velocity_override_set = true;
                } else {
                    cmd.torque.z += tuning.turning_torque;
                }
            }
        }

        if self.should_hover {
            self.hover_time += dt;
            let t = self.hover_time;
            cmd.velocity_override.z = tuning.wobble_amplitude
                * (-tuning.wobble_decay * t).exp()
                * (tuning.wobble_frequency * t).cos()
                * self.max_vel_achieved;
            cmd.velocity_override_mask.z = true;
            cmd.force.z += tuning.gravity_compensation;
        }

        if intent.throttle == Throttle::Idle {
            let drag = -velocity * tuning.decelerate_factor;
            cmd.force += Vec3::new(drag.x, drag.y, 0.0);
        }
        if intent.turn == Turn::Straight {
            cmd.torque += -angular * tuning.decelerate_factor;
        }

        cmd
    }
}

/// One vehicle instance on either side of the connection
#[derive(Debug, Clone)]
pub struct Vehicle {
    id: Uuid,
    body: RigidBody,
    tuning: VehicleTuning,
    reconciler: MovementReconciler,
    moves: MoveQueue,
    builder: MoveBuilder,
    latest_stats: Option<ServerStats>,
    /// Newest command timestamp accepted from the owning client (server side)
    last_received: Option<f64>,
    /// Timestamp of the command applied this tick, awaiting a stats snapshot
    pending_ack: Option<f64>,
    visuals: VisualState,
}

impl Vehicle {
    pub fn new(
        id: Uuid,
        role: NetRole,
        location: Vec3,
        rotation: Rotator,
        tuning: VehicleTuning,
        max_net_prediction_error: f32,
        move_queue_capacity: usize,
    ) -> Self {
        Self {
            id,
            body: RigidBody::new(location, rotation),
            tuning,
            reconciler: MovementReconciler::new(role, max_net_prediction_error),
            moves: MoveQueue::new(move_queue_capacity),
            builder: MoveBuilder::default(),
            latest_stats: None,
            last_received: None,
            pending_ack: None,
            visuals: VisualState::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> NetRole {
        self.reconciler.role()
    }

    pub fn body(&self) -> &RigidBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RigidBody {
        &mut self.body
    }

    pub fn tuning(&self) -> &VehicleTuning {
        &self.tuning
    }

    pub fn location(&self) -> Vec3 {
        self.body.location()
    }

    pub fn velocity(&self) -> Vec3 {
        self.body.linear_velocity()
    }

    pub fn move_queue(&self) -> &MoveQueue {
        &self.moves
    }

    pub fn is_resyncing(&self) -> bool {
        self.reconciler.is_resyncing()
    }

    pub fn visuals(&self) -> &VisualState {
        &self.visuals
    }

    /// Build this tick's command from held controls and apply it locally
    ///
    /// The owning client also queues the command for the server.
    pub fn predict(&mut self, intent: &ControlIntent, timestamp: f64, dt: f32) -> MoveCommand {
        let cmd = self
            .builder
            .build(intent, &self.body, &self.tuning, timestamp, dt);
        apply_command(&mut self.body, &cmd);
        if self.role() == NetRole::AutonomousProxy {
            self.moves.enqueue(cmd);
        }
        self.visuals = self.visual_snapshot(intent);
        cmd
    }

    /// Oldest unacknowledged command, the one to send this tick
    pub fn outgoing(&self) -> Option<MoveCommand> {
        self.moves.oldest().copied()
    }

    /// The transport accepted the oldest command; stop resending it
    pub fn on_sent(&mut self) {
        self.moves.dequeue_oldest();
    }

    /// Advance physics, recording the prediction for the owning client
    pub fn integrate(&mut self, timestamp: f64, dt: f32) {
        self.body.integrate(dt);
        if self.role() == NetRole::AutonomousProxy {
            self.reconciler.record_prediction(timestamp, self.body.location());
        }
    }

    /// Server side: queue commands from the owner
    ///
    /// Commands at or before the newest already received are ignored, so a
    /// duplicated or reordered packet is never applied twice. Returns how many
    /// were queued.
    pub fn receive_moves(&mut self, moves: &[MoveCommand]) -> usize {
        let mut accepted = 0;
        for cmd in moves {
            if self.last_received.is_some_and(|last| cmd.timestamp <= last) {
                trace!(vehicle = %self.id, timestamp = cmd.timestamp, "Ignoring already received move");
                continue;
            }
            if self.moves.enqueue(*cmd) {
                self.last_received = Some(cmd.timestamp);
                accepted += 1;
            }
        }
        accepted
    }

    /// Server side: apply the oldest queued command, once
    ///
    /// Returns the applied timestamp; the next stats snapshot is stamped with it.
    pub fn apply_next_move(&mut self) -> Option<f64> {
        if self.moves.is_empty() {
            return None;
        }
        let cmd = self.moves.dequeue_oldest();
        apply_command(&mut self.body, &cmd);
        self.pending_ack = Some(cmd.timestamp);
        Some(cmd.timestamp)
    }

    /// Server side: ground truth stamped with the command applied this tick
    pub fn take_server_stats(&mut self) -> Option<ServerStats> {
        self.pending_ack
            .take()
            .map(|timestamp| ServerStats::capture(&self.body, timestamp))
    }

    /// Current state, stamped with the newest command applied
    pub fn snapshot_stats(&self) -> ServerStats {
        ServerStats::capture(&self.body, self.last_received.unwrap_or_default())
    }

    /// Owning client: take new ground truth, pruning acknowledged commands
    ///
    /// Returns false for stats older than or equal to ones already seen.
    pub fn on_server_stats(&mut self, stats: ServerStats) -> bool {
        if self.moves.acknowledge(stats.timestamp).is_none() {
            return false;
        }
        self.reconciler.prune_history(stats.timestamp);
        self.latest_stats = Some(stats);
        true
    }

    /// Simulated proxy: take the latest broadcast snapshot
    pub fn on_snapshot(&mut self, stats: ServerStats) {
        self.body.set_linear_velocity(stats.velocity);
        self.latest_stats = Some(stats);
    }

    /// Blend towards the latest server state
    pub fn reconcile(&mut self, dt: f32) -> Option<ReconcileOutcome> {
        let stats = self.latest_stats?;
        Some(self.reconciler.reconcile(&mut self.body, &stats, dt))
    }

    /// Relay-side update of cosmetic state
    pub fn set_visuals(&mut self, visuals: VisualState) {
        self.visuals = visuals;
    }

    fn visual_snapshot(&self, intent: &ControlIntent) -> VisualState {
        let vz = self.body.linear_velocity().z;
        let jet_flame_scale = if vz > 0.0 {
            1.0 + vz / self.tuning.max_ascent_velocity
        } else {
            1.0 - vz / self.tuning.max_descent_velocity
        };
        VisualState {
            turret_rotation: intent.turret_rotation,
            jet_flame_scale,
            thrust_or_brakes_active: intent.throttle != Throttle::Idle,
            move_direction_forward: intent.throttle == Throttle::Forward,
            turning_flames_active: intent.turn != Turn::Straight,
            turn_direction_right: intent.turn == Turn::Right,
            locked_in: intent.locked_in,
            boost_active: intent.boost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 30.0;

    fn vehicle(role: NetRole) -> Vehicle {
        Vehicle::new(
            Uuid::new_v4(),
            role,
            Vec3::new(0.0, 0.0, 500.0),
            Rotator::ZERO,
            VehicleTuning::default(),
            50.0,
            16,
        )
    }

    #[test]
    fn ascend_adds_lift_until_capped() {
        let tuning = VehicleTuning::default();
        let mut builder = MoveBuilder::default();
        let intent = ControlIntent { ascend: true, ..Default::default() };

        let body = RigidBody::new(Vec3::ZERO, Rotator::ZERO);
        let cmd = builder.build(&intent, &body, &tuning, 0.0, DT);
        assert_eq!(cmd.force.z, 1180.0);
        assert!(!cmd.velocity_override_mask.z);

        let mut fast = RigidBody::new(Vec3::ZERO, Rotator::ZERO);
        fast.set_linear_velocity(Vec3::new(0.0, 0.0, 300.0));
        let cmd = builder.build(&intent, &fast, &tuning, 0.0, DT);
        assert!(cmd.velocity_override_mask.z);
        assert_eq!(cmd.velocity_override.z, 250.0);
    }

    #[test]
    fn releasing_vertical_starts_hover() {
        let tuning = VehicleTuning::default();
        let mut builder = MoveBuilder::default();
        let mut body = RigidBody::new(Vec3::ZERO, Rotator::ZERO);
        body.set_linear_velocity(Vec3::new(0.0, 0.0, 100.0));

        builder.build(&ControlIntent { ascend: true, ..Default::default() }, &body, &tuning, 0.0, DT);
        let cmd = builder.build(&ControlIntent::default(), &body, &tuning, DT as f64, DT);
        assert!(cmd.velocity_override_mask.z);
        assert_eq!(cmd.force.z, tuning.gravity_compensation);
        assert!(cmd.velocity_override.z > 0.0 && cmd.velocity_override.z <= 100.0);
    }

    #[test]
    fn forward_throttle_caps_planar_speed() {
        let tuning = VehicleTuning::default();
        let mut builder = MoveBuilder::default();
        let mut body = RigidBody::new(Vec3::ZERO, Rotator::ZERO);
        body.set_linear_velocity(Vec3::new(600.0, 0.0, 0.0));
        let intent = ControlIntent { throttle: Throttle::Forward, ..Default::default() };
        let cmd = builder.build(&intent, &body, &tuning, 0.0, DT);
        assert!(cmd.velocity_override_mask.x && cmd.velocity_override_mask.y);
        assert!((cmd.velocity_override.x - 500.0).abs() < 1e-3);
    }

    #[test]
    fn idle_throttle_decelerates() {
        let tuning = VehicleTuning::default();
        let mut builder = MoveBuilder::default();
        let mut body = RigidBody::new(Vec3::ZERO, Rotator::ZERO);
        body.set_linear_velocity(Vec3::new(100.0, 0.0, 0.0));
        let cmd = builder.build(&ControlIntent::default(), &body, &tuning, 0.0, DT);
        assert_eq!(cmd.force.x, -250.0);
    }

    #[test]
    fn owning_client_queues_and_sends_oldest() {
        let mut client = vehicle(NetRole::AutonomousProxy);
        client.predict(&ControlIntent::default(), 1.0, DT);
        client.predict(&ControlIntent::default(), 2.0, DT);
        assert_eq!(client.move_queue().len(), 2);
        assert_eq!(client.outgoing().map(|c| c.timestamp), Some(1.0));
        client.on_sent();
        assert_eq!(client.outgoing().map(|c| c.timestamp), Some(2.0));
    }

    #[test]
    fn server_applies_each_move_at_most_once() {
        let mut server = vehicle(NetRole::Authority);
        let cmd = MoveCommand { timestamp: 1.0, ..Default::default() };
        assert_eq!(server.receive_moves(&[cmd]), 1);
        assert_eq!(server.receive_moves(&[cmd]), 0);
        assert_eq!(server.apply_next_move(), Some(1.0));
        assert_eq!(server.apply_next_move(), None);
        server.body_mut().integrate(DT);
        let stats = server.take_server_stats();
        assert_eq!(stats.map(|s| s.timestamp), Some(1.0));
        assert!(server.take_server_stats().is_none());
    }

    #[test]
    fn stale_stats_are_ignored() {
        let mut client = vehicle(NetRole::AutonomousProxy);
        let stats = ServerStats::capture(client.body(), 2.0);
        assert!(client.on_server_stats(stats));
        let older = ServerStats::capture(client.body(), 1.0);
        assert!(!client.on_server_stats(older));
    }
}
