//! Predicted projectile spawning
//!
//! The firing client spawns a fake projectile right away (or after a short
//! sleep when its ping is beyond the prediction window) and sends the spawn
//! transform and projectile ID under the activation's prediction key. The
//! server consumes that data exactly once, spawns the authoritative projectile
//! and fast-forwards it by the client's one-way delay. When the authoritative
//! copy replicates back, the client links it to the fake by ID and hides it.

use std::collections::HashMap;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::ability::{AbilityHandle, PredictionKey, PredictionKeyGenerator, TargetDataCache};
use super::link::{FakeProjectileRegistry, IdAllocator};
use super::math::Rotator;
use super::ping::{NetMode, PingEstimator, PredictionConfig};
use super::projectile::{
    Projectile, ProjectileClass, ProjectileHandle, ProjectileId, ProjectileRole, ProjectileTable,
};
use super::scheduler::{Scheduler, TimerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("projectile table full ({capacity} live)")]
    TableFull { capacity: usize },

    #[error("instance neither has authority nor controls the vehicle")]
    NoExecutionContext,

    #[error("no pending activation {key} for ability {ability}")]
    UnknownActivation {
        ability: AbilityHandle,
        key: PredictionKey,
    },
}

/// What the client sends the server for one predicted projectile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnTargetData {
    pub location: Vec3,
    pub rotation: Rotator,
    pub projectile_id: ProjectileId,
}

/// Spawn parameters held while a high-ping fire waits out its sleep time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayedSpawnInfo {
    pub class: ProjectileClass,
    pub location: Vec3,
    pub rotation: Rotator,
    pub owner: Uuid,
}

/// Which spawn path an instance takes when its vehicle fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Remote client controlling the vehicle: fake + link
    PredictingClient,
    /// Server hosting the firing player itself: one authoritative projectile
    LocalAuthority,
    /// Server for a remote firer: waits for target data
    RemoteAuthority,
}

impl ExecutionContext {
    pub fn resolve(net_mode: NetMode, locally_controlled: bool) -> Result<Self, SpawnError> {
        match (net_mode.has_authority(), locally_controlled) {
            (true, true) => Ok(Self::LocalAuthority),
            (true, false) => Ok(Self::RemoteAuthority),
            (false, true) => Ok(Self::PredictingClient),
            (false, false) => Err(SpawnError::NoExecutionContext),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnState {
    /// Waiting out the sleep time before spawning the fake
    DelayPending,
    Spawning,
    AwaitingServerAuth { id: ProjectileId },
    Linked { id: ProjectileId },
    Rejected,
    Failed,
}

impl SpawnState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Linked { .. } | Self::Rejected | Self::Failed)
    }
}

/// A fire request from the controlling client's input layer
#[derive(Debug, Clone, Copy)]
pub struct FireRequest {
    pub ability: AbilityHandle,
    pub class: ProjectileClass,
    pub location: Vec3,
    pub rotation: Rotator,
    pub firer_velocity: Vec3,
}

/// Messages the predictor wants sent to the server, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnRequest {
    Activate {
        ability: AbilityHandle,
        key: PredictionKey,
    },
    TargetData {
        ability: AbilityHandle,
        key: PredictionKey,
        data: SpawnTargetData,
    },
    Cancelled {
        ability: AbilityHandle,
        key: PredictionKey,
    },
}

/// Progress reported to whoever started the activation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Delayed { key: PredictionKey, seconds: f32 },
    Spawned { key: PredictionKey, id: ProjectileId },
    Linked { key: PredictionKey, id: ProjectileId },
    Rejected { key: PredictionKey },
    Failed { key: PredictionKey, error: SpawnError },
}

#[derive(Debug, Clone)]
struct Activation {
    ability: AbilityHandle,
    state: SpawnState,
    fake: Option<ProjectileHandle>,
    delayed: Option<(TimerId, DelayedSpawnInfo)>,
}

/// Firing-client side of the protocol, one per controller
#[derive(Debug)]
pub struct ClientSpawnPredictor {
    owner: Uuid,
    estimator: PingEstimator,
    allocator: IdAllocator,
    registry: FakeProjectileRegistry,
    keys: PredictionKeyGenerator,
    timers: Scheduler<PredictionKey>,
    activations: HashMap<PredictionKey, Activation>,
    outbound: Vec<SpawnRequest>,
    events: Vec<TaskEvent>,
}

impl ClientSpawnPredictor {
    pub fn new(owner: Uuid, config: PredictionConfig) -> Self {
        Self {
            owner,
            estimator: PingEstimator::new(config, NetMode::Client, true),
            allocator: IdAllocator::new(),
            registry: FakeProjectileRegistry::new(),
            keys: PredictionKeyGenerator::new(),
            timers: Scheduler::new(),
            activations: HashMap::new(),
            outbound: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn estimator(&self) -> &PingEstimator {
        &self.estimator
    }

    pub fn set_ping(&mut self, ping_ms: f32) {
        self.estimator.set_ping(ping_ms);
    }

    pub fn registry(&self) -> &FakeProjectileRegistry {
        &self.registry
    }

    pub fn state(&self, key: PredictionKey) -> Option<SpawnState> {
        self.activations.get(&key).map(|a| a.state)
    }

    /// The fake spawned for an activation, if any
    pub fn fake(&self, key: PredictionKey) -> Option<ProjectileHandle> {
        self.activations.get(&key).and_then(|a| a.fake)
    }

    pub fn drain_outbound(&mut self) -> Vec<SpawnRequest> {
        std::mem::take(&mut self.outbound)
    }

    pub fn drain_events(&mut self) -> Vec<TaskEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start a predicted fire
    ///
    /// Returns `Ok(None)` when the ability already has a delayed spawn
    /// pending; the request is dropped.
    pub fn activate(
        &mut self,
        request: FireRequest,
        world: &mut ProjectileTable,
    ) -> Result<Option<PredictionKey>, SpawnError> {
        let delay_pending = self
            .activations
            .values()
            .any(|a| a.ability == request.ability && a.state == SpawnState::DelayPending);
        if delay_pending {
            trace!(ability = %request.ability, "Delayed spawn already pending, ignoring fire");
            return Ok(None);
        }

        let key = self.keys.next_key();
        self.outbound.push(SpawnRequest::Activate {
            ability: request.ability,
            key,
        });
        let info = DelayedSpawnInfo {
            class: request.class,
            location: request.location,
            rotation: request.rotation,
            owner: self.owner,
        };

        let sleep = self.estimator.projectile_sleep_time();
        if sleep > 0.0 {
            let timer = self.timers.schedule_after(Duration::from_secs_f32(sleep), key);
            self.activations.insert(
                key,
                Activation {
                    ability: request.ability,
                    state: SpawnState::DelayPending,
                    fake: None,
                    delayed: Some((timer, info)),
                },
            );
            debug!(%key, sleep, "Ping beyond prediction window, delaying fake spawn");
            self.events.push(TaskEvent::Delayed { key, seconds: sleep });
            return Ok(Some(key));
        }

        self.activations.insert(
            key,
            Activation {
                ability: request.ability,
                state: SpawnState::Spawning,
                fake: None,
                delayed: None,
            },
        );
        self.spawn_fake(key, info, request.firer_velocity, world)?;
        Ok(Some(key))
    }

    /// Advance delay timers, spawning fakes whose sleep ended
    pub fn tick(&mut self, dt: Duration, firer_velocity: Vec3, world: &mut ProjectileTable) {
        self.activations.retain(|_, a| !a.state.is_finished());

        for (timer, key) in self.timers.advance(dt) {
            let Some(activation) = self.activations.get_mut(&key) else {
                continue;
            };
            let info = match activation.delayed.take() {
                Some((id, info)) if id == timer => info,
                _ => continue,
            };
            if let Err(error) = self.spawn_fake(key, info, firer_velocity, world) {
                warn!(%key, %error, "Delayed fake spawn failed");
            }
        }
    }

    fn spawn_fake(
        &mut self,
        key: PredictionKey,
        info: DelayedSpawnInfo,
        firer_velocity: Vec3,
        world: &mut ProjectileTable,
    ) -> Result<ProjectileId, SpawnError> {
        let id = self.allocator.next_id(&self.registry);
        let projectile = Projectile::launch(
            id,
            ProjectileRole::Fake,
            info.class,
            info.owner,
            info.location,
            info.rotation,
            firer_velocity,
        );
        let handle = match world.spawn(projectile) {
            Ok(handle) => handle,
            Err(error) => {
                self.fail(key, error.clone(), world);
                return Err(error);
            }
        };
        self.registry.register_fake(id, handle);

        let Some(activation) = self.activations.get_mut(&key) else {
            return Err(SpawnError::NoExecutionContext);
        };
        activation.fake = Some(handle);
        activation.state = SpawnState::AwaitingServerAuth { id };
        self.outbound.push(SpawnRequest::TargetData {
            ability: activation.ability,
            key,
            data: SpawnTargetData {
                location: info.location,
                rotation: info.rotation,
                projectile_id: id,
            },
        });
        self.events.push(TaskEvent::Spawned { key, id });
        trace!(%key, projectile_id = %id, "Spawned fake projectile");
        Ok(id)
    }

    /// End an activation because the server refused it
    ///
    /// Safe to call whether or not the fake has spawned yet, and any number of
    /// times. Returns true only when something was cleaned up.
    pub fn on_rejected(&mut self, key: PredictionKey, world: &mut ProjectileTable) -> bool {
        if !self.release(key, world) {
            return false;
        }
        if let Some(activation) = self.activations.get_mut(&key) {
            activation.state = SpawnState::Rejected;
        }
        debug!(%key, "Activation rejected, fake projectile removed");
        self.events.push(TaskEvent::Rejected { key });
        true
    }

    /// End an activation after a local spawn failure and tell the server
    pub fn fail(&mut self, key: PredictionKey, error: SpawnError, world: &mut ProjectileTable) {
        if !self.release(key, world) {
            return;
        }
        let Some(activation) = self.activations.get_mut(&key) else {
            return;
        };
        activation.state = SpawnState::Failed;
        self.outbound.push(SpawnRequest::Cancelled {
            ability: activation.ability,
            key,
        });
        self.events.push(TaskEvent::Failed { key, error });
    }

    /// Shared cleanup: cancel the timer and destroy the fake
    fn release(&mut self, key: PredictionKey, world: &mut ProjectileTable) -> bool {
        let Some(activation) = self.activations.get_mut(&key) else {
            return false;
        };
        if activation.state.is_finished() {
            return false;
        }
        if let Some((timer, _)) = activation.delayed.take() {
            self.timers.cancel(timer);
        }
        if let Some(fake) = activation.fake.take() {
            world.destroy(fake);
            self.registry.remove_handle(fake);
        }
        true
    }

    /// Handle an authoritative projectile replicated to this client
    ///
    /// A non-zero ID must match a registered fake: both are linked and the
    /// authoritative copy is hidden. ID 0 marks a plain projectile.
    ///
    /// # Panics
    /// If a non-zero ID has no registered fake.
    pub fn on_authoritative_replicated(
        &mut self,
        id: ProjectileId,
        authoritative: ProjectileHandle,
        world: &mut ProjectileTable,
    ) {
        if !id.is_predicted() {
            if let Some(projectile) = world.get_mut(authoritative) {
                projectile.role = ProjectileRole::Plain;
            }
            return;
        }

        let Some(fake) = self.registry.resolve_and_remove(id) else {
            panic!("authoritative projectile {id} has no registered fake");
        };
        if let Some(projectile) = world.get_mut(authoritative) {
            projectile.role = ProjectileRole::Authoritative { hidden: true };
        }
        world.link(fake, authoritative);

        let key = self.activations.iter_mut().find_map(|(key, a)| {
            (a.state == SpawnState::AwaitingServerAuth { id }).then(|| {
                a.state = SpawnState::Linked { id };
                a.fake = None;
                *key
            })
        });
        if let Some(key) = key {
            trace!(%key, projectile_id = %id, "Linked fake to authoritative projectile");
            self.events.push(TaskEvent::Linked { key, id });
        }
    }

    /// The authoritative copy for `id` arrived but could not be stored locally
    ///
    /// The activation ends as failed and its registry entry is released. The
    /// fake stays in flight unlinked until its lifespan runs out; the server
    /// already has its copy, so nothing is cancelled there.
    pub fn on_authoritative_dropped(&mut self, id: ProjectileId, error: SpawnError) {
        if !id.is_predicted() {
            return;
        }
        self.registry.resolve_and_remove(id);
        let key = self.activations.iter_mut().find_map(|(key, a)| {
            (a.state == SpawnState::AwaitingServerAuth { id }).then(|| {
                a.state = SpawnState::Failed;
                a.fake = None;
                *key
            })
        });
        if let Some(key) = key {
            debug!(%key, projectile_id = %id, %error, "Authoritative projectile dropped before linking");
            self.events.push(TaskEvent::Failed { key, error });
        }
    }

    /// The authoritative copy went away; its linked fake goes with it
    pub fn on_authoritative_destroyed(&mut self, authoritative: ProjectileHandle, world: &mut ProjectileTable) {
        let Some(projectile) = world.destroy(authoritative) else {
            return;
        };
        if let Some(fake) = projectile.linked_peer {
            world.destroy(fake);
        }
    }
}

#[derive(Debug)]
struct Controller {
    estimator: PingEstimator,
    cache: TargetDataCache<SpawnTargetData>,
}

/// Authority side of the protocol: one per simulated world
#[derive(Debug)]
pub struct AuthoritySpawner {
    net_mode: NetMode,
    config: PredictionConfig,
    timeout: Duration,
    controllers: HashMap<Uuid, Controller>,
}

impl AuthoritySpawner {
    pub fn new(net_mode: NetMode, config: PredictionConfig, timeout: Duration) -> Self {
        Self {
            net_mode,
            config,
            timeout,
            controllers: HashMap::new(),
        }
    }

    pub fn net_mode(&self) -> NetMode {
        self.net_mode
    }

    pub fn add_controller(&mut self, player: Uuid, is_local: bool) {
        self.controllers.insert(
            player,
            Controller {
                estimator: PingEstimator::new(self.config, self.net_mode, is_local),
                cache: TargetDataCache::new(),
            },
        );
    }

    pub fn remove_controller(&mut self, player: Uuid) {
        self.controllers.remove(&player);
    }

    pub fn set_ping(&mut self, player: Uuid, ping_ms: f32) {
        if let Some(controller) = self.controllers.get_mut(&player) {
            controller.estimator.set_ping(ping_ms);
        }
    }

    pub fn forward_prediction_time(&self, player: Uuid) -> f32 {
        self.controllers
            .get(&player)
            .map_or(0.0, |c| c.estimator.forward_prediction_time())
    }

    /// The activation is already waiting, spawned, or finished here
    pub fn is_tracking(&self, player: Uuid, ability: AbilityHandle, key: PredictionKey) -> bool {
        self.controllers
            .get(&player)
            .is_some_and(|c| c.cache.contains(ability, key))
    }

    /// A remote client activated an ability: start waiting for its data
    pub fn activate_remote(
        &mut self,
        player: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        now: Duration,
    ) -> Result<(), SpawnError> {
        let controller = self
            .controllers
            .get_mut(&player)
            .ok_or(SpawnError::UnknownActivation { ability, key })?;
        controller.cache.register_await(ability, key, now);
        Ok(())
    }

    /// Target data arrived from the firing client
    ///
    /// Spawns and fast-forwards the authoritative projectile the first time
    /// the data for this activation is consumed. Later deliveries, and data
    /// for a cancelled activation, return `Ok(None)`.
    #[allow(clippy::too_many_arguments)]
    pub fn on_target_data(
        &mut self,
        player: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        data: SpawnTargetData,
        class: ProjectileClass,
        firer_velocity: Vec3,
        now: Duration,
        world: &mut ProjectileTable,
    ) -> Result<Option<ProjectileHandle>, SpawnError> {
        let controller = self
            .controllers
            .get_mut(&player)
            .filter(|c| c.cache.contains(ability, key))
            .ok_or(SpawnError::UnknownActivation { ability, key })?;

        controller.cache.set_data(ability, key, data, now);
        let Some(data) = controller.cache.try_consume(ability, key, now) else {
            debug!(player_id = %player, %ability, %key, "Target data already consumed");
            return Ok(None);
        };

        let mut projectile = Projectile::launch(
            data.projectile_id,
            ProjectileRole::Authoritative { hidden: false },
            class,
            player,
            data.location,
            data.rotation,
            firer_velocity,
        );
        let forward = controller.estimator.forward_prediction_time();
        projectile.fast_forward(forward);

        let handle = world.spawn(projectile)?;
        trace!(
            player_id = %player,
            projectile_id = %data.projectile_id,
            forward,
            "Spawned authoritative projectile"
        );
        Ok(Some(handle))
    }

    /// The client gave up on an activation
    pub fn on_target_data_cancelled(
        &mut self,
        player: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        now: Duration,
    ) -> bool {
        self.reject(player, ability, key, now)
    }

    /// Stop waiting on an activation; true only the first time
    pub fn reject(
        &mut self,
        player: Uuid,
        ability: AbilityHandle,
        key: PredictionKey,
        now: Duration,
    ) -> bool {
        self.controllers
            .get_mut(&player)
            .is_some_and(|c| c.cache.cancel(ability, key, now))
    }

    /// Time out stale awaits across every controller
    pub fn expire(&mut self, now: Duration) -> Vec<(Uuid, AbilityHandle, PredictionKey)> {
        let timeout = self.timeout;
        self.controllers
            .iter_mut()
            .flat_map(|(player, c)| {
                c.cache
                    .expire(now, timeout)
                    .into_iter()
                    .map(move |(ability, key)| (*player, ability, key))
            })
            .collect()
    }

    /// The firer lives in this process: one projectile, nothing to predict
    pub fn spawn_local(
        &mut self,
        owner: Uuid,
        class: ProjectileClass,
        location: Vec3,
        rotation: Rotator,
        firer_velocity: Vec3,
        world: &mut ProjectileTable,
    ) -> Result<ProjectileHandle, SpawnError> {
        let projectile = Projectile::launch(
            ProjectileId::NONE,
            ProjectileRole::Authoritative { hidden: false },
            class,
            owner,
            location,
            rotation,
            firer_velocity,
        );
        world.spawn(projectile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::projectile::ProjectileStats;

    const TICK: Duration = Duration::from_micros(33_333);

    fn fire() -> FireRequest {
        FireRequest {
            ability: AbilityHandle::PRIMARY_WEAPON,
            class: ProjectileClass::Bolt,
            location: Vec3::new(0.0, 0.0, 500.0),
            rotation: Rotator::ZERO,
            firer_velocity: Vec3::ZERO,
        }
    }

    fn predictor(ping: f32) -> ClientSpawnPredictor {
        let mut p = ClientSpawnPredictor::new(Uuid::new_v4(), PredictionConfig::default());
        p.set_ping(ping);
        p
    }

    #[test]
    fn context_follows_net_mode() {
        assert_eq!(
            ExecutionContext::resolve(NetMode::Client, true),
            Ok(ExecutionContext::PredictingClient)
        );
        assert_eq!(
            ExecutionContext::resolve(NetMode::ListenServer, true),
            Ok(ExecutionContext::LocalAuthority)
        );
        assert_eq!(
            ExecutionContext::resolve(NetMode::DedicatedServer, false),
            Ok(ExecutionContext::RemoteAuthority)
        );
        assert_eq!(
            ExecutionContext::resolve(NetMode::Client, false),
            Err(SpawnError::NoExecutionContext)
        );
    }

    #[test]
    fn low_ping_spawns_immediately() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(20.0);
        let key = client.activate(fire(), &mut world).unwrap().unwrap();

        assert_eq!(
            client.state(key),
            Some(SpawnState::AwaitingServerAuth { id: ProjectileId::new(1) })
        );
        assert!(client.registry().contains(ProjectileId::new(1)));
        let outbound = client.drain_outbound();
        assert!(matches!(outbound[0], SpawnRequest::Activate { .. }));
        assert!(matches!(
            outbound[1],
            SpawnRequest::TargetData { data: SpawnTargetData { projectile_id, .. }, .. }
                if projectile_id == ProjectileId::new(1)
        ));
    }

    #[test]
    fn high_ping_waits_for_timer_and_ignores_refire() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(400.0);
        let key = client.activate(fire(), &mut world).unwrap().unwrap();
        assert_eq!(client.state(key), Some(SpawnState::DelayPending));
        assert!(world.is_empty());
        assert_eq!(client.activate(fire(), &mut world).unwrap(), None);

        for _ in 0..6 {
            client.tick(TICK, Vec3::ZERO, &mut world);
        }
        assert!(world.is_empty());
        client.tick(TICK, Vec3::ZERO, &mut world);
        assert_eq!(world.len(), 1);
        assert_eq!(
            client.state(key),
            Some(SpawnState::AwaitingServerAuth { id: ProjectileId::new(1) })
        );
    }

    #[test]
    fn rejection_is_idempotent_and_cleans_up() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(20.0);
        let key = client.activate(fire(), &mut world).unwrap().unwrap();
        assert!(client.on_rejected(key, &mut world));
        assert!(!client.on_rejected(key, &mut world));
        assert!(world.is_empty());
        assert!(client.registry().is_empty());
        let events = client.drain_events();
        assert_eq!(events.iter().filter(|e| matches!(e, TaskEvent::Rejected { .. })).count(), 1);
    }

    #[test]
    fn rejecting_one_activation_leaves_the_next_alone() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(20.0);
        let first = client.activate(fire(), &mut world).unwrap().unwrap();
        let second = client.activate(fire(), &mut world).unwrap().unwrap();
        assert_ne!(first, second);

        assert!(client.on_rejected(first, &mut world));
        assert_eq!(client.state(first), Some(SpawnState::Rejected));
        assert_eq!(
            client.state(second),
            Some(SpawnState::AwaitingServerAuth { id: ProjectileId::new(2) })
        );
        let fake = client.fake(second).unwrap();
        assert!(world.contains(fake));
        assert_eq!(world.len(), 1);
        assert!(client.registry().contains(ProjectileId::new(2)));
    }

    #[test]
    fn rejection_while_delayed_cancels_the_timer() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(400.0);
        let key = client.activate(fire(), &mut world).unwrap().unwrap();
        assert!(client.on_rejected(key, &mut world));
        for _ in 0..30 {
            client.tick(TICK, Vec3::ZERO, &mut world);
        }
        assert!(world.is_empty());
        assert!(client.registry().is_empty());
    }

    #[test]
    fn replicated_authoritative_links_and_hides() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(20.0);
        let key = client.activate(fire(), &mut world).unwrap().unwrap();
        let fake = client.fake(key).unwrap();

        let auth = world
            .spawn(Projectile::launch(
                ProjectileId::new(1),
                ProjectileRole::Plain,
                ProjectileClass::Bolt,
                Uuid::nil(),
                Vec3::ZERO,
                Rotator::ZERO,
                Vec3::ZERO,
            ))
            .unwrap();
        client.on_authoritative_replicated(ProjectileId::new(1), auth, &mut world);

        assert!(world.get(auth).unwrap().is_hidden());
        assert_eq!(world.get(auth).unwrap().linked_peer, Some(fake));
        assert_eq!(world.get(fake).unwrap().linked_peer, Some(auth));
        assert!(client.registry().is_empty());
        assert_eq!(client.state(key), Some(SpawnState::Linked { id: ProjectileId::new(1) }));

        client.on_authoritative_destroyed(auth, &mut world);
        assert!(world.is_empty());
    }

    #[test]
    #[should_panic(expected = "no registered fake")]
    fn unknown_authoritative_id_is_fatal() {
        let mut world = ProjectileTable::new();
        let mut client = predictor(20.0);
        let handle = ProjectileHandle::new(0, 0);
        client.on_authoritative_replicated(ProjectileId::new(9), handle, &mut world);
    }

    #[test]
    fn server_consumes_once_and_fast_forwards() {
        let player = Uuid::new_v4();
        let mut world = ProjectileTable::new();
        let mut server = AuthoritySpawner::new(
            NetMode::DedicatedServer,
            PredictionConfig::default(),
            Duration::from_secs(2),
        );
        server.add_controller(player, false);
        server.set_ping(player, 170.0);

        let ability = AbilityHandle::PRIMARY_WEAPON;
        let key = PredictionKey(1);
        server.activate_remote(player, ability, key, Duration::ZERO).unwrap();
        let data = SpawnTargetData {
            location: Vec3::ZERO,
            rotation: Rotator::ZERO,
            projectile_id: ProjectileId::new(1),
        };

        let handle = server
            .on_target_data(player, ability, key, data, ProjectileClass::Bolt, Vec3::ZERO, Duration::ZERO, &mut world)
            .unwrap()
            .unwrap();
        let projectile = world.get(handle).unwrap();
        let stats = ProjectileStats::for_class(ProjectileClass::Bolt);
        assert!((projectile.location.x - stats.speed * 0.075).abs() < 1e-2);
        assert_eq!(projectile.id, ProjectileId::new(1));

        let again = server
            .on_target_data(player, ability, key, data, ProjectileClass::Bolt, Vec3::ZERO, Duration::ZERO, &mut world)
            .unwrap();
        assert_eq!(again, None);
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn server_refuses_data_without_activation() {
        let player = Uuid::new_v4();
        let mut world = ProjectileTable::new();
        let mut server = AuthoritySpawner::new(
            NetMode::DedicatedServer,
            PredictionConfig::default(),
            Duration::from_secs(2),
        );
        server.add_controller(player, false);
        let data = SpawnTargetData {
            location: Vec3::ZERO,
            rotation: Rotator::ZERO,
            projectile_id: ProjectileId::new(1),
        };
        let err = server
            .on_target_data(
                player,
                AbilityHandle::PRIMARY_WEAPON,
                PredictionKey(4),
                data,
                ProjectileClass::Bolt,
                Vec3::ZERO,
                Duration::ZERO,
                &mut world,
            )
            .unwrap_err();
        assert!(matches!(err, SpawnError::UnknownActivation { .. }));
    }

    #[test]
    fn local_authority_spawns_single_unpredicted_projectile() {
        let owner = Uuid::new_v4();
        let mut world = ProjectileTable::new();
        let mut server = AuthoritySpawner::new(
            NetMode::ListenServer,
            PredictionConfig::default(),
            Duration::from_secs(2),
        );
        let handle = server
            .spawn_local(owner, ProjectileClass::Rocket, Vec3::ZERO, Rotator::ZERO, Vec3::ZERO, &mut world)
            .unwrap();
        let projectile = world.get(handle).unwrap();
        assert_eq!(projectile.id, ProjectileId::NONE);
        assert_eq!(projectile.location, Vec3::ZERO);
        assert_eq!(world.len(), 1);
    }
}
