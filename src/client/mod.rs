//! Headless predicting client
//!
//! Drives the owning-client side of every protocol: it predicts its own
//! vehicle, reconciles against server stats, interpolates everyone else's
//! vehicles and runs the predicted projectile spawns. Transport is left to
//! the caller: feed it [`ServerMsg`]s and send what [`PredictedClient::drain_outbox`]
//! returns.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::game::ability::{AbilityHandle, PredictionKey};
use crate::game::arena::ArenaConfig;
use crate::game::math::Rotator;
use crate::game::projectile::{
    muzzle_transform, Projectile, ProjectileClass, ProjectileHandle, ProjectileId, ProjectileRole,
    ProjectileTable,
};
use crate::game::reconcile::{NetRole, ReconcileOutcome};
use crate::game::spawn::{ClientSpawnPredictor, FireRequest, SpawnRequest, TaskEvent};
use crate::game::vehicle::{ControlIntent, Vehicle};
use crate::ws::protocol::{ClientMsg, GameEvent, PlayerInfo, ProjectileSpawn, ServerMsg};

#[derive(Debug)]
pub struct PredictedClient {
    player_id: Uuid,
    config: ArenaConfig,
    arena_id: Option<Uuid>,
    vehicle: Option<Vehicle>,
    proxies: HashMap<Uuid, Vehicle>,
    projectiles: ProjectileTable,
    /// Server net id -> local replica
    replicated: HashMap<u64, ProjectileHandle>,
    predictor: ClientSpawnPredictor,
    outbox: Vec<ClientMsg>,
    /// Seconds of play, stamps move commands
    clock: f64,
    /// Clock time each weapon slot is ready again
    next_fire_at: HashMap<AbilityHandle, f64>,
    aim: Rotator,
    /// Hold back movement sends (the link is saturated)
    congested: bool,
    last_reconcile: Option<ReconcileOutcome>,
    events: Vec<GameEvent>,
    task_events: Vec<TaskEvent>,
    last_error: Option<String>,
}

impl PredictedClient {
    pub fn new(player_id: Uuid, config: ArenaConfig) -> Self {
        Self {
            player_id,
            predictor: ClientSpawnPredictor::new(player_id, config.prediction),
            projectiles: ProjectileTable::with_capacity(config.max_projectiles),
            config,
            arena_id: None,
            vehicle: None,
            proxies: HashMap::new(),
            replicated: HashMap::new(),
            outbox: Vec::new(),
            clock: 0.0,
            next_fire_at: HashMap::new(),
            aim: Default::default(),
            congested: false,
            last_reconcile: None,
            events: Vec::new(),
            task_events: Vec::new(),
            last_error: None,
        }
    }

    pub fn player_id(&self) -> Uuid {
        self.player_id
    }

    pub fn arena_id(&self) -> Option<Uuid> {
        self.arena_id
    }

    pub fn vehicle(&self) -> Option<&Vehicle> {
        self.vehicle.as_ref()
    }

    pub fn vehicle_mut(&mut self) -> Option<&mut Vehicle> {
        self.vehicle.as_mut()
    }

    pub fn proxy(&self, player_id: Uuid) -> Option<&Vehicle> {
        self.proxies.get(&player_id)
    }

    pub fn projectiles(&self) -> &ProjectileTable {
        &self.projectiles
    }

    pub fn predictor(&self) -> &ClientSpawnPredictor {
        &self.predictor
    }

    pub fn last_reconcile(&self) -> Option<ReconcileOutcome> {
        self.last_reconcile
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Gameplay events received since the last call
    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Activation progress since the last call
    pub fn drain_task_events(&mut self) -> Vec<TaskEvent> {
        self.task_events.extend(self.predictor.drain_events());
        std::mem::take(&mut self.task_events)
    }

    /// Messages to send to the server, oldest first
    pub fn drain_outbox(&mut self) -> Vec<ClientMsg> {
        std::mem::take(&mut self.outbox)
    }

    pub fn join(&mut self, arena_id: Option<Uuid>) {
        self.outbox.push(ClientMsg::JoinArena { arena_id });
    }

    /// While congested, movement stays queued instead of being sent
    pub fn set_congested(&mut self, congested: bool) {
        self.congested = congested;
    }

    /// Apply one message from the server
    pub fn handle(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Welcome { player_id, .. } => {
                if player_id != self.player_id {
                    debug!(old = %self.player_id, new = %player_id, "Server assigned player id");
                    self.player_id = player_id;
                    self.predictor = ClientSpawnPredictor::new(player_id, self.config.prediction);
                }
            }
            ServerMsg::ArenaJoined {
                arena_id,
                you,
                players,
                ..
            } => {
                self.arena_id = Some(arena_id);
                self.vehicle = Some(self.spawn_vehicle(&you, NetRole::AutonomousProxy));
                self.proxies = players
                    .iter()
                    .filter(|p| p.player_id != self.player_id)
                    .map(|p| (p.player_id, self.spawn_vehicle(p, NetRole::SimulatedProxy)))
                    .collect();
            }
            ServerMsg::PlayerJoined { player } => {
                if player.player_id != self.player_id {
                    let proxy = self.spawn_vehicle(&player, NetRole::SimulatedProxy);
                    self.proxies.insert(player.player_id, proxy);
                }
            }
            ServerMsg::PlayerLeft { player_id, .. } => {
                self.proxies.remove(&player_id);
            }
            ServerMsg::ServerStats { stats } => {
                let Some(vehicle) = self.vehicle.as_mut() else {
                    return;
                };
                if !vehicle.on_server_stats(stats) {
                    trace!(timestamp = stats.timestamp, "Stale server stats ignored");
                }
            }
            ServerMsg::VehicleSnapshot { vehicles, .. } => {
                for state in vehicles {
                    if state.player_id == self.player_id {
                        continue;
                    }
                    match self.proxies.get_mut(&state.player_id) {
                        Some(proxy) => proxy.on_snapshot(state.stats),
                        None => {
                            let info = PlayerInfo {
                                player_id: state.player_id,
                                location: state.stats.location,
                                rotation: state.stats.orientation,
                            };
                            let mut proxy = self.spawn_vehicle(&info, NetRole::SimulatedProxy);
                            proxy.on_snapshot(state.stats);
                            self.proxies.insert(state.player_id, proxy);
                        }
                    }
                }
            }
            ServerMsg::VisualsUpdate { player_id, visuals } => {
                if let Some(proxy) = self.proxies.get_mut(&player_id) {
                    proxy.set_visuals(visuals);
                }
            }
            ServerMsg::ProjectileSpawned(spawn) => self.on_projectile_spawned(spawn),
            ServerMsg::ProjectileDestroyed { net_id } => {
                if let Some(handle) = self.replicated.remove(&net_id) {
                    self.predictor
                        .on_authoritative_destroyed(handle, &mut self.projectiles);
                }
            }
            ServerMsg::AbilityRejected { key, reason, .. } => {
                debug!(%key, reason, "Server rejected activation");
                self.predictor.on_rejected(key, &mut self.projectiles);
            }
            ServerMsg::PingProbe { t } => self.outbox.push(ClientMsg::PingReply { t }),
            ServerMsg::PingUpdate { ping_ms } => self.predictor.set_ping(ping_ms),
            ServerMsg::Event { event } => self.events.push(event),
            ServerMsg::Error { code, message } => {
                warn!(code, message, "Server error");
                self.last_error = Some(code);
            }
        }
        self.flush_spawn_requests();
    }

    fn spawn_vehicle(&self, info: &PlayerInfo, role: NetRole) -> Vehicle {
        Vehicle::new(
            info.player_id,
            role,
            info.location,
            info.rotation,
            self.config.tuning,
            self.config.max_net_prediction_error,
            self.config.move_queue_capacity,
        )
    }

    fn on_projectile_spawned(&mut self, spawn: ProjectileSpawn) {
        let projectile = Projectile {
            id: spawn.projectile_id,
            role: ProjectileRole::Plain,
            class: spawn.class,
            instigator: spawn.instigator,
            location: spawn.location,
            rotation: spawn.rotation,
            velocity: spawn.velocity,
            lifespan: spawn.lifespan,
            linked_peer: None,
        };
        // Only our own fires carry a predicted ID
        let id = if spawn.instigator == self.player_id {
            spawn.projectile_id
        } else {
            ProjectileId::NONE
        };
        let handle = match self.projectiles.spawn(projectile) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(%error, net_id = spawn.net_id, "Could not replicate projectile");
                self.predictor.on_authoritative_dropped(id, error);
                return;
            }
        };
        self.replicated.insert(spawn.net_id, handle);

        self.predictor
            .on_authoritative_replicated(id, handle, &mut self.projectiles);
    }

    /// Fire a weapon slot from the current aim
    ///
    /// Returns the activation's key, or `None` when the weapon is cooling
    /// down, the slot has no projectile, or a delayed fire is still pending.
    pub fn fire(&mut self, ability: AbilityHandle) -> Option<PredictionKey> {
        let vehicle = self.vehicle.as_ref()?;
        let ready_at = self.next_fire_at.get(&ability).copied().unwrap_or_default();
        if self.clock < ready_at {
            return None;
        }
        let class = ProjectileClass::for_ability(ability)?;

        let (location, rotation) = muzzle_transform(vehicle.location(), self.aim);
        let request = FireRequest {
            ability,
            class,
            location,
            rotation,
            firer_velocity: vehicle.velocity(),
        };
        let fire_rate = f64::from(vehicle.tuning().fire_rate);

        let key = match self.predictor.activate(request, &mut self.projectiles) {
            Ok(Some(key)) => Some(key),
            Ok(None) => None,
            Err(error) => {
                warn!(%error, %ability, "Predicted fire failed");
                None
            }
        };
        if key.is_some() {
            self.next_fire_at.insert(ability, self.clock + fire_rate);
        }
        self.flush_spawn_requests();
        key
    }

    /// Run one client tick with this tick's held controls
    pub fn tick(&mut self, intent: &ControlIntent, dt: f32) {
        self.clock += f64::from(dt);
        self.aim = intent.turret_rotation;

        if let Some(vehicle) = self.vehicle.as_mut() {
            vehicle.predict(intent, self.clock, dt);
            vehicle.integrate(self.clock, dt);
            self.last_reconcile = vehicle.reconcile(dt);

            if !self.congested {
                if let Some(cmd) = vehicle.outgoing() {
                    self.outbox.push(ClientMsg::UpdateMovement { moves: vec![cmd] });
                    vehicle.on_sent();
                }
            }
            self.outbox.push(ClientMsg::UpdateVisuals {
                visuals: *vehicle.visuals(),
            });
        }

        for proxy in self.proxies.values_mut() {
            proxy.reconcile(dt);
        }

        let firer_velocity = self
            .vehicle
            .as_ref()
            .map(Vehicle::velocity)
            .unwrap_or_default();
        self.predictor.tick(
            Duration::from_secs_f32(dt.max(0.0)),
            firer_velocity,
            &mut self.projectiles,
        );

        self.projectiles.step(dt);
        let projectiles = &self.projectiles;
        self.replicated.retain(|_, handle| projectiles.contains(*handle));

        self.flush_spawn_requests();
    }

    fn flush_spawn_requests(&mut self) {
        for request in self.predictor.drain_outbound() {
            self.outbox.push(match request {
                SpawnRequest::Activate { ability, key } => ClientMsg::ActivateAbility { ability, key },
                SpawnRequest::TargetData { ability, key, data } => {
                    ClientMsg::SpawnTargetData { ability, key, data }
                }
                SpawnRequest::Cancelled { ability, key } => {
                    ClientMsg::SpawnTargetDataCancelled { ability, key }
                }
            });
        }
    }
}
