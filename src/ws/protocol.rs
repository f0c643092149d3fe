//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::ability::{AbilityHandle, PredictionKey};
use crate::game::math::Rotator;
use crate::game::move_queue::MoveCommand;
use crate::game::projectile::{DamageType, HitInfo, ProjectileClass, ProjectileId};
use crate::game::reconcile::ServerStats;
use crate::game::spawn::SpawnTargetData;
use crate::game::vehicle::VisualState;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join an arena
    JoinArena {
        /// Specific arena, otherwise any arena with room (or a new one)
        arena_id: Option<Uuid>,
    },

    /// Movement commands, oldest first (unreliable in spirit; duplicates
    /// and stale commands are ignored)
    UpdateMovement { moves: Vec<MoveCommand> },

    /// This tick's cosmetic state, relayed to everyone else
    UpdateVisuals { visuals: VisualState },

    /// Start an ability activation under a fresh prediction key
    ActivateAbility {
        ability: AbilityHandle,
        key: PredictionKey,
    },

    /// Spawn transform and predicted projectile ID for an activation
    SpawnTargetData {
        ability: AbilityHandle,
        key: PredictionKey,
        data: SpawnTargetData,
    },

    /// The client could not spawn its fake; stop waiting for data
    SpawnTargetDataCancelled {
        ability: AbilityHandle,
        key: PredictionKey,
    },

    /// Echo of a server ping probe
    PingReply {
        /// Server timestamp from the probe
        t: u64,
    },

    /// Leave current arena
    LeaveArena,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { player_id: Uuid, server_time: u64 },

    /// Confirmation of arena join
    ArenaJoined {
        arena_id: Uuid,
        /// Seed the arena's spawn points derive from
        seed: u64,
        /// The joining player's own vehicle
        you: PlayerInfo,
        /// Everyone in the arena at join time, including the joining player
        players: Vec<PlayerInfo>,
    },

    /// Player joined the arena
    PlayerJoined { player: PlayerInfo },

    /// Player left the arena
    PlayerLeft { player_id: Uuid, reason: String },

    /// Ground truth after the owner's latest applied move (owner only)
    ServerStats { stats: ServerStats },

    /// Periodic state of every vehicle, for simulated proxies
    VehicleSnapshot {
        tick: u64,
        vehicles: Vec<VehicleState>,
    },

    /// Another player's cosmetic state
    VisualsUpdate {
        player_id: Uuid,
        visuals: VisualState,
    },

    /// An authoritative projectile entered the world
    ProjectileSpawned(ProjectileSpawn),

    /// An authoritative projectile left the world
    ProjectileDestroyed { net_id: u64 },

    /// The server refused or gave up on an activation
    AbilityRejected {
        ability: AbilityHandle,
        key: PredictionKey,
        reason: String,
    },

    /// Round-trip probe; answer with `PingReply`
    PingProbe { t: u64 },

    /// Smoothed round-trip time the server measured for this client
    PingUpdate { ping_ms: f32 },

    /// Gameplay event
    Event { event: GameEvent },

    /// Error message
    Error { code: String, message: String },
}

/// Player info for join notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub location: Vec3,
    pub rotation: Rotator,
}

/// One vehicle in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub player_id: Uuid,
    pub stats: ServerStats,
}

/// Replicated authoritative projectile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSpawn {
    /// Server-side handle, used to match the later destroy
    pub net_id: u64,
    pub instigator: Uuid,
    /// Predicted ID for the firing client, 0 for everyone else
    pub projectile_id: ProjectileId,
    pub class: ProjectileClass,
    pub location: Vec3,
    pub rotation: Rotator,
    pub velocity: Vec3,
    pub lifespan: Option<f32>,
}

/// Game events (hits, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Hit registered
    Hit {
        instigator: Uuid,
        target: Uuid,
        damage: f32,
        damage_type: DamageType,
        hit: HitInfo,
        /// Where the presentation layer should place an impact decal
        decal: DecalRequest,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecalRequest {
    pub location: Vec3,
    pub rotation: Rotator,
}

/// Who a server message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Only(Uuid),
    AllExcept(Uuid),
}

impl Recipient {
    pub fn includes(&self, player_id: Uuid) -> bool {
        match self {
            Recipient::All => true,
            Recipient::Only(id) => *id == player_id,
            Recipient::AllExcept(id) => *id != player_id,
        }
    }
}

/// A server message addressed to part of an arena
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub recipient: Recipient,
    pub msg: ServerMsg,
}

impl Envelope {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            recipient: Recipient::All,
            msg,
        }
    }

    pub fn only(player_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            recipient: Recipient::Only(player_id),
            msg,
        }
    }

    pub fn all_except(player_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            recipient: Recipient::AllExcept(player_id),
            msg,
        }
    }
}
