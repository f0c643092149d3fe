//! Arena state and authoritative tick loop

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::util::time::{
    tick_delta, tick_duration, unix_millis, PING_INTERVAL_TICKS, SIMULATION_TPS, SNAPSHOT_TPS,
};
use crate::ws::protocol::{
    ClientMsg, DecalRequest, Envelope, GameEvent, PlayerInfo, ProjectileSpawn, ServerMsg,
};

use super::ability::{AbilityHandle, PredictionKey, DEFAULT_ABILITY_TIMEOUT};
use super::math::Rotator;
use super::move_queue::DEFAULT_MOVE_QUEUE_CAPACITY;
use super::physics::PhysicsBody;
use super::ping::{NetMode, PingTracker, PredictionConfig};
use super::projectile::{
    muzzle_transform, resolve_hits, DamageSink, DamageType, HitInfo, HitTarget, ProjectileClass,
    ProjectileHandle, ProjectileId, ProjectileTable, DEFAULT_MAX_PROJECTILES,
};
use super::reconcile::{NetRole, DEFAULT_MAX_NET_PREDICTION_ERROR};
use super::snapshot::SnapshotBuilder;
use super::spawn::{AuthoritySpawner, ExecutionContext, SpawnTargetData};
use super::vehicle::{Vehicle, VehicleTuning};
use super::PlayerInput;

/// Slack on the weapon cooldown for activations bunched up by jitter
const FIRE_RATE_TOLERANCE: Duration = Duration::from_millis(50);
/// An arena with nobody in it shuts down after this many ticks
const EMPTY_ARENA_TICKS: u64 = SIMULATION_TPS as u64 * 30;

/// Tunables shared by every vehicle and projectile in an arena
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub prediction: PredictionConfig,
    pub max_net_prediction_error: f32,
    pub move_queue_capacity: usize,
    pub max_players: usize,
    /// How long the server waits for target data after an activation
    pub ability_timeout: Duration,
    pub max_projectiles: usize,
    pub tuning: VehicleTuning,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            prediction: PredictionConfig::default(),
            max_net_prediction_error: DEFAULT_MAX_NET_PREDICTION_ERROR,
            move_queue_capacity: DEFAULT_MOVE_QUEUE_CAPACITY,
            max_players: 16,
            ability_timeout: DEFAULT_ABILITY_TIMEOUT,
            max_projectiles: DEFAULT_MAX_PROJECTILES,
            tuning: VehicleTuning::default(),
        }
    }
}

/// One player's authoritative state
#[derive(Debug)]
pub struct PlayerSlot {
    pub vehicle: Vehicle,
    pub ping: PingTracker,
    /// Arena time each weapon slot is ready again
    pub next_fire_at: HashMap<AbilityHandle, Duration>,
    /// Controlled from inside this process (listen server host)
    pub is_local: bool,
}

impl PlayerSlot {
    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.vehicle.id(),
            location: self.vehicle.location(),
            rotation: self.vehicle.body().rotation(),
        }
    }
}

/// Collects hits during a tick and turns them into events
#[derive(Debug, Default)]
struct HitEvents {
    events: Vec<GameEvent>,
}

impl DamageSink for HitEvents {
    fn apply_point_damage(
        &mut self,
        target: Uuid,
        amount: f32,
        hit: &HitInfo,
        instigator: Uuid,
        damage_type: DamageType,
    ) {
        self.events.push(GameEvent::Hit {
            instigator,
            target,
            damage: amount,
            damage_type,
            hit: *hit,
            decal: DecalRequest {
                location: hit.location,
                rotation: Rotator::from_direction(-hit.normal),
            },
        });
    }
}

/// Arena state (owned by the arena task)
#[derive(Debug)]
pub struct ArenaState {
    pub id: Uuid,
    pub seed: u64,
    pub tick: u64,
    config: ArenaConfig,
    net_mode: NetMode,
    elapsed: Duration,
    players: HashMap<Uuid, PlayerSlot>,
    projectiles: ProjectileTable,
    spawner: AuthoritySpawner,
    snapshots: SnapshotBuilder,
    rng: ChaCha8Rng,
}

impl ArenaState {
    pub fn new(id: Uuid, seed: u64, net_mode: NetMode, config: ArenaConfig) -> Self {
        Self {
            id,
            seed,
            tick: 0,
            net_mode,
            elapsed: Duration::ZERO,
            players: HashMap::new(),
            projectiles: ProjectileTable::with_capacity(config.max_projectiles),
            spawner: AuthoritySpawner::new(net_mode, config.prediction, config.ability_timeout),
            snapshots: SnapshotBuilder::new(SIMULATION_TPS, SNAPSHOT_TPS),
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn contains(&self, player_id: Uuid) -> bool {
        self.players.contains_key(&player_id)
    }

    pub fn player(&self, player_id: Uuid) -> Option<&PlayerSlot> {
        self.players.get(&player_id)
    }

    pub fn projectiles(&self) -> &ProjectileTable {
        &self.projectiles
    }

    /// Arena time, advanced one tick at a time
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Generate a spawn point for a new vehicle
    pub fn generate_spawn_point(&mut self) -> (glam::Vec3, Rotator) {
        let angle: f32 = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance: f32 = self.rng.gen_range(500.0..3000.0);
        let altitude: f32 = self.rng.gen_range(500.0..1500.0);
        let yaw: f32 = self.rng.gen_range(-180.0..180.0);
        (
            glam::Vec3::new(angle.cos() * distance, angle.sin() * distance, altitude),
            Rotator::new(0.0, yaw, 0.0),
        )
    }

    /// Process one message from a player
    pub fn handle_input(&mut self, input: PlayerInput, out: &mut Vec<Envelope>) {
        let player_id = input.player_id;
        match input.msg {
            ClientMsg::JoinArena { .. } => self.handle_join(player_id, false, out),
            ClientMsg::LeaveArena => self.handle_leave(player_id, "left", out),
            ClientMsg::UpdateMovement { moves } => {
                let Some(slot) = self.players.get_mut(&player_id) else {
                    return;
                };
                let accepted = slot.vehicle.receive_moves(&moves);
                if accepted < moves.len() {
                    debug!(
                        player_id = %player_id,
                        received = moves.len(),
                        accepted,
                        "Dropped stale or overflowing moves"
                    );
                }
            }
            ClientMsg::UpdateVisuals { visuals } => {
                let Some(slot) = self.players.get_mut(&player_id) else {
                    return;
                };
                slot.vehicle.set_visuals(visuals);
                out.push(Envelope::all_except(
                    player_id,
                    ServerMsg::VisualsUpdate { player_id, visuals },
                ));
            }
            ClientMsg::ActivateAbility { ability, key } => {
                self.handle_activate(player_id, ability, key, out);
            }
            ClientMsg::SpawnTargetData { ability, key, data } => {
                self.handle_target_data(player_id, ability, key, data, out);
            }
            ClientMsg::SpawnTargetDataCancelled { ability, key } => {
                if self
                    .spawner
                    .on_target_data_cancelled(player_id, ability, key, self.elapsed)
                {
                    debug!(player_id = %player_id, %ability, %key, "Client cancelled activation");
                }
            }
            ClientMsg::PingReply { t } => {
                let Some(slot) = self.players.get_mut(&player_id) else {
                    return;
                };
                let rtt = input.received_at.saturating_sub(t) as f32;
                let ping_ms = slot.ping.record(rtt);
                self.spawner.set_ping(player_id, ping_ms);
                trace!(player_id = %player_id, rtt, ping_ms, "Ping sample");
                out.push(Envelope::only(player_id, ServerMsg::PingUpdate { ping_ms }));
            }
        }
    }

    /// Add a vehicle for a player
    ///
    /// `is_local` marks the listen-server host, whose fires spawn directly.
    pub fn handle_join(&mut self, player_id: Uuid, is_local: bool, out: &mut Vec<Envelope>) {
        if self.players.contains_key(&player_id) {
            warn!(arena_id = %self.id, player_id = %player_id, "Player already in arena");
            return;
        }

        if self.players.len() >= self.config.max_players {
            out.push(Envelope::only(
                player_id,
                ServerMsg::Error {
                    code: "arena_full".to_string(),
                    message: "Arena is full".to_string(),
                },
            ));
            return;
        }

        let (location, rotation) = self.generate_spawn_point();
        let vehicle = Vehicle::new(
            player_id,
            NetRole::Authority,
            location,
            rotation,
            self.config.tuning,
            self.config.max_net_prediction_error,
            self.config.move_queue_capacity,
        );
        let slot = PlayerSlot {
            vehicle,
            ping: PingTracker::new(),
            next_fire_at: HashMap::new(),
            is_local,
        };
        let you = slot.info();
        self.players.insert(player_id, slot);
        self.spawner.add_controller(player_id, is_local);

        out.push(Envelope::all_except(
            player_id,
            ServerMsg::PlayerJoined { player: you.clone() },
        ));
        out.push(Envelope::only(
            player_id,
            ServerMsg::ArenaJoined {
                arena_id: self.id,
                seed: self.seed,
                you,
                players: self.players.values().map(PlayerSlot::info).collect(),
            },
        ));
        self.snapshots.force_next();

        info!(
            arena_id = %self.id,
            player_id = %player_id,
            player_count = self.players.len(),
            "Player joined arena"
        );
    }

    /// Remove a player; their projectiles stay in flight
    pub fn handle_leave(&mut self, player_id: Uuid, reason: &str, out: &mut Vec<Envelope>) {
        if self.players.remove(&player_id).is_none() {
            return;
        }
        self.spawner.remove_controller(player_id);
        out.push(Envelope::all(ServerMsg::PlayerLeft {
            player_id,
            reason: reason.to_string(),
        }));
        info!(arena_id = %self.id, player_id = %player_id, reason, "Player left arena");
    }

    fn reject(
        &mut self,
        player_id: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        reason: &str,
        out: &mut Vec<Envelope>,
    ) {
        self.spawner.reject(player_id, ability, key, self.elapsed);
        warn!(player_id = %player_id, %ability, %key, reason, "Rejected ability activation");
        out.push(Envelope::only(
            player_id,
            ServerMsg::AbilityRejected {
                ability,
                key,
                reason: reason.to_string(),
            },
        ));
    }

    fn handle_activate(
        &mut self,
        player_id: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        out: &mut Vec<Envelope>,
    ) {
        let now = self.elapsed;
        // Repeated activations for a known key change nothing
        if self.spawner.is_tracking(player_id, ability, key) {
            debug!(player_id = %player_id, %ability, %key, "Duplicate activation ignored");
            return;
        }
        let Some(slot) = self.players.get_mut(&player_id) else {
            warn!(player_id = %player_id, %key, "Activation from player without a vehicle");
            return;
        };
        let Some(class) = ProjectileClass::for_ability(ability) else {
            self.reject(player_id, ability, key, "unknown_ability", out);
            return;
        };
        let ready_at = slot.next_fire_at.get(&ability).copied().unwrap_or_default();
        if now + FIRE_RATE_TOLERANCE < ready_at {
            self.reject(player_id, ability, key, "cooldown", out);
            return;
        }
        let fire_rate = Duration::from_secs_f32(slot.vehicle.tuning().fire_rate);
        slot.next_fire_at.insert(ability, now + fire_rate);

        match ExecutionContext::resolve(self.net_mode, slot.is_local) {
            Ok(ExecutionContext::LocalAuthority) => {
                let aim = slot.vehicle.visuals().turret_rotation;
                let (location, rotation) = muzzle_transform(slot.vehicle.location(), aim);
                let velocity = slot.vehicle.velocity();
                match self.spawner.spawn_local(
                    player_id,
                    class,
                    location,
                    rotation,
                    velocity,
                    &mut self.projectiles,
                ) {
                    Ok(handle) => self.replicate_spawn(handle, out),
                    Err(error) => {
                        warn!(player_id = %player_id, %error, "Local projectile spawn failed");
                    }
                }
            }
            Ok(ExecutionContext::RemoteAuthority) => {
                if let Err(error) = self.spawner.activate_remote(player_id, ability, key, now) {
                    warn!(player_id = %player_id, %error, "Could not start activation");
                    self.reject(player_id, ability, key, "no_controller", out);
                }
            }
            Ok(ExecutionContext::PredictingClient) | Err(_) => {
                self.reject(player_id, ability, key, "no_authority", out);
            }
        }
    }

    fn handle_target_data(
        &mut self,
        player_id: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        data: SpawnTargetData,
        out: &mut Vec<Envelope>,
    ) {
        let Some(slot) = self.players.get(&player_id) else {
            return;
        };
        let Some(class) = ProjectileClass::for_ability(ability) else {
            self.reject(player_id, ability, key, "unknown_ability", out);
            return;
        };
        let firer_velocity = slot.vehicle.velocity();
        match self.spawner.on_target_data(
            player_id,
            ability,
            key,
            data,
            class,
            firer_velocity,
            self.elapsed,
            &mut self.projectiles,
        ) {
            Ok(Some(handle)) => self.replicate_spawn(handle, out),
            Ok(None) => {}
            Err(error) => {
                warn!(player_id = %player_id, %error, "Target data refused");
                self.reject(player_id, ability, key, "spawn_failed", out);
            }
        }
    }

    /// Announce a new authoritative projectile
    ///
    /// Only the firing client learns the predicted ID; everyone else gets 0
    /// and treats it as a plain projectile.
    fn replicate_spawn(&self, handle: ProjectileHandle, out: &mut Vec<Envelope>) {
        let Some(projectile) = self.projectiles.get(handle) else {
            return;
        };
        let spawn = ProjectileSpawn {
            net_id: handle.to_bits(),
            instigator: projectile.instigator,
            projectile_id: projectile.id,
            class: projectile.class,
            location: projectile.location,
            rotation: projectile.rotation,
            velocity: projectile.velocity,
            lifespan: projectile.lifespan,
        };
        if !projectile.id.is_predicted() {
            out.push(Envelope::all(ServerMsg::ProjectileSpawned(spawn)));
            return;
        }
        let instigator = projectile.instigator;
        out.push(Envelope::all_except(
            instigator,
            ServerMsg::ProjectileSpawned(ProjectileSpawn {
                projectile_id: ProjectileId::NONE,
                ..spawn.clone()
            }),
        ));
        out.push(Envelope::only(instigator, ServerMsg::ProjectileSpawned(spawn)));
    }

    /// Run a single simulation tick
    ///
    /// `now_ms` stamps ping probes; everything else runs on arena time.
    pub fn tick(&mut self, now_ms: u64, out: &mut Vec<Envelope>) {
        self.tick += 1;
        self.elapsed += tick_duration();
        let dt = tick_delta();

        // One queued move per vehicle per tick; the body only advances when
        // a move was applied so the server replays exactly what the client ran
        for (player_id, slot) in self.players.iter_mut() {
            if let Some(timestamp) = slot.vehicle.apply_next_move() {
                slot.vehicle.integrate(timestamp, dt);
            }
            if let Some(stats) = slot.vehicle.take_server_stats() {
                out.push(Envelope::only(*player_id, ServerMsg::ServerStats { stats }));
            }
        }

        for (handle, _) in self.projectiles.step(dt) {
            out.push(Envelope::all(ServerMsg::ProjectileDestroyed {
                net_id: handle.to_bits(),
            }));
        }

        let targets: Vec<HitTarget> = self
            .players
            .values()
            .map(|slot| HitTarget {
                id: slot.vehicle.id(),
                location: slot.vehicle.location(),
                radius: slot.vehicle.tuning().hitbox_radius,
            })
            .collect();
        let mut hits = HitEvents::default();
        let destroyed = resolve_hits(&mut self.projectiles, &targets, &mut hits);
        for event in hits.events {
            out.push(Envelope::all(ServerMsg::Event { event }));
        }
        for (handle, _) in destroyed {
            out.push(Envelope::all(ServerMsg::ProjectileDestroyed {
                net_id: handle.to_bits(),
            }));
        }

        for (player_id, ability, key) in self.spawner.expire(self.elapsed) {
            warn!(player_id = %player_id, %ability, %key, "Activation timed out");
            out.push(Envelope::only(
                player_id,
                ServerMsg::AbilityRejected {
                    ability,
                    key,
                    reason: "timeout".to_string(),
                },
            ));
        }

        if self.tick % PING_INTERVAL_TICKS == 0 && !self.players.is_empty() {
            out.push(Envelope::all(ServerMsg::PingProbe { t: now_ms }));
        }

        if self.snapshots.should_send() && !self.players.is_empty() {
            let snapshot = self
                .snapshots
                .build(self.tick, self.players.values().map(|slot| &slot.vehicle));
            out.push(Envelope::all(snapshot));
        }
    }
}

/// Handle to a running arena
#[derive(Clone)]
pub struct ArenaHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub events_tx: broadcast::Sender<Envelope>,
    pub player_count: Arc<AtomicUsize>,
    pub max_players: usize,
}

impl ArenaHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn has_room(&self) -> bool {
        self.player_count() < self.max_players
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.events_tx.subscribe()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena {0} not found")]
    NotFound(Uuid),

    #[error("arena {0} is full")]
    Full(Uuid),
}

/// Registry of all active arenas
pub struct ArenaRegistry {
    arenas: DashMap<Uuid, ArenaHandle>,
}

impl ArenaRegistry {
    pub fn new() -> Self {
        Self {
            arenas: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<ArenaHandle> {
        self.arenas.get(id).map(|a| a.value().clone())
    }

    pub fn insert(&self, handle: ArenaHandle) {
        self.arenas.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<ArenaHandle> {
        self.arenas.remove(id).map(|(_, h)| h)
    }

    /// Snapshot of every registered arena
    pub fn handles(&self) -> Vec<ArenaHandle> {
        self.arenas.iter().map(|a| a.value().clone()).collect()
    }

    pub fn active_arenas(&self) -> usize {
        self.arenas.len()
    }

    pub fn total_players(&self) -> usize {
        self.arenas.iter().map(|a| a.value().player_count()).sum()
    }

    /// Find an arena with free slots
    pub fn find_available(&self) -> Option<ArenaHandle> {
        self.arenas
            .iter()
            .find(|entry| entry.value().has_room())
            .map(|entry| entry.value().clone())
    }

    /// Start a dedicated-server arena task; it removes itself when it ends
    pub fn spawn_arena(self: &Arc<Self>, config: ArenaConfig) -> ArenaHandle {
        let id = Uuid::new_v4();
        let seed = rand::random();
        let (arena, handle) = GameArena::new(id, seed, NetMode::DedicatedServer, config);
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            arena.run().await;
            registry.remove(&id);
        });
        handle
    }

    /// Resolve the arena a join request lands in
    ///
    /// A requested arena must exist and have room; otherwise any arena with
    /// room is used, or a new one is started.
    pub fn join_or_create(
        self: &Arc<Self>,
        requested: Option<Uuid>,
        config: &ArenaConfig,
    ) -> Result<ArenaHandle, ArenaError> {
        if let Some(id) = requested {
            let handle = self.get(&id).ok_or(ArenaError::NotFound(id))?;
            if !handle.has_room() {
                return Err(ArenaError::Full(id));
            }
            return Ok(handle);
        }
        Ok(self
            .find_available()
            .unwrap_or_else(|| self.spawn_arena(config.clone())))
    }
}

impl Default for ArenaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative arena task
pub struct GameArena {
    state: ArenaState,
    input_rx: mpsc::Receiver<PlayerInput>,
    events_tx: broadcast::Sender<Envelope>,
    player_count: Arc<AtomicUsize>,
}

impl GameArena {
    /// Create a new arena
    pub fn new(id: Uuid, seed: u64, net_mode: NetMode, config: ArenaConfig) -> (Self, ArenaHandle) {
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (events_tx, _) = broadcast::channel(1024);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = ArenaHandle {
            id,
            input_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
            max_players: config.max_players,
        };

        let arena = Self {
            state: ArenaState::new(id, seed, net_mode, config),
            input_rx,
            events_tx,
            player_count,
        };

        (arena, handle)
    }

    /// Run the authoritative tick loop
    pub async fn run(mut self) {
        info!(arena_id = %self.state.id, "Arena started");

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut out = Vec::new();
        let mut empty_ticks = 0u64;

        loop {
            tick_interval.tick().await;

            // Drain input queue
            while let Ok(input) = self.input_rx.try_recv() {
                self.state.handle_input(input, &mut out);
            }

            self.state.tick(unix_millis(), &mut out);

            for envelope in out.drain(..) {
                // No subscribers is fine; nobody is listening yet
                let _ = self.events_tx.send(envelope);
            }
            self.player_count
                .store(self.state.player_count(), Ordering::Relaxed);

            if self.state.player_count() == 0 {
                empty_ticks += 1;
                if empty_ticks >= EMPTY_ARENA_TICKS {
                    info!(arena_id = %self.state.id, "Arena empty, shutting down");
                    break;
                }
            } else {
                empty_ticks = 0;
            }
        }
    }
}
