//! Per-tick movement commands and the bounded queue that carries them

use std::collections::VecDeque;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::math::{AxisMask, Rotator};

/// Default number of unacknowledged commands a queue holds
pub const DEFAULT_MOVE_QUEUE_CAPACITY: usize = 16;

/// The physics inputs a controlling client produced for one tick
///
/// Immutable once enqueued. The default value is the no-op command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveCommand {
    pub velocity_override: Vec3,
    pub velocity_override_mask: AxisMask,
    pub force: Vec3,
    pub torque: Vec3,
    pub angular_velocity_override: Vec3,
    pub angular_velocity_override_set: bool,
    pub orientation: Rotator,
    /// Client simulation time of the tick that produced this command
    pub timestamp: f64,
}

impl MoveCommand {
    pub fn is_noop(&self) -> bool {
        !self.velocity_override_mask.any()
            && !self.angular_velocity_override_set
            && self.force == Vec3::ZERO
            && self.torque == Vec3::ZERO
    }
}

/// Bounded FIFO of move commands
///
/// FIFO order is tick order. When full, new commands are dropped rather than
/// overwriting older ones.
#[derive(Debug, Clone)]
pub struct MoveQueue {
    moves: VecDeque<MoveCommand>,
    capacity: usize,
    dropped: u64,
    last_ack: Option<f64>,
}

impl MoveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            moves: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
            last_ack: None,
        }
    }

    /// Append a command; returns false if the queue was full and it was dropped
    pub fn enqueue(&mut self, cmd: MoveCommand) -> bool {
        if self.moves.len() >= self.capacity {
            self.dropped += 1;
            debug!(
                timestamp = cmd.timestamp,
                capacity = self.capacity,
                "Move queue full, dropping command"
            );
            return false;
        }
        self.moves.push_back(cmd);
        true
    }

    /// Remove and return the oldest command, or the no-op command when empty
    pub fn dequeue_oldest(&mut self) -> MoveCommand {
        self.moves.pop_front().unwrap_or_default()
    }

    pub fn oldest(&self) -> Option<&MoveCommand> {
        self.moves.front()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commands lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn last_ack(&self) -> Option<f64> {
        self.last_ack
    }

    /// Prune every command up to and including `timestamp`
    ///
    /// Acknowledgment is monotonic: an ack older than or equal to the last one
    /// is ignored and returns `None`. Otherwise returns how many commands were
    /// pruned.
    pub fn acknowledge(&mut self, timestamp: f64) -> Option<usize> {
        if let Some(last) = self.last_ack {
            if timestamp <= last {
                trace!(timestamp, last, "Ignoring stale move acknowledgment");
                return None;
            }
        }
        self.last_ack = Some(timestamp);

        let before = self.moves.len();
        while self
            .moves
            .front()
            .is_some_and(|cmd| cmd.timestamp <= timestamp)
        {
            self.moves.pop_front();
        }
        Some(before - self.moves.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoveCommand> {
        self.moves.iter()
    }
}

impl Default for MoveQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MOVE_QUEUE_CAPACITY)
    }
}
