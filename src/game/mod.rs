//! Game simulation modules

pub mod ability;
pub mod arena;
pub mod link;
pub mod math;
pub mod move_queue;
pub mod physics;
pub mod ping;
pub mod projectile;
pub mod reconcile;
pub mod scheduler;
pub mod snapshot;
pub mod spawn;
pub mod vehicle;

pub use arena::{ArenaConfig, ArenaError, ArenaHandle, ArenaRegistry, ArenaState, GameArena};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player input received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: Uuid,
    pub msg: ClientMsg,
    /// Unix millis when the message arrived, used for ping samples
    pub received_at: u64,
}
