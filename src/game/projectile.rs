//! Projectiles, the entity table that owns them, and hit resolution

use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::ability::AbilityHandle;
use super::math::Rotator;
use super::physics::spheres_overlap;
use super::spawn::SpawnError;

/// Shortest lifetime an authoritative projectile keeps after fast-forward
pub const MIN_LIFESPAN_AFTER_FAST_FORWARD: f32 = 0.2;
/// Muzzle sits this far below the vehicle's origin
pub const MUZZLE_DROP: f32 = 15.0;
/// Default number of live projectiles a table holds
pub const DEFAULT_MAX_PROJECTILES: usize = 1024;

/// Per-controller projectile ID; 0 marks a projectile that was never predicted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectileId(u32);

impl ProjectileId {
    pub const NONE: Self = Self(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_predicted(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ProjectileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileClass {
    Bolt,
    Rocket,
}

impl ProjectileClass {
    /// Projectile fired by a weapon slot
    pub fn for_ability(ability: AbilityHandle) -> Option<Self> {
        match ability {
            AbilityHandle::PRIMARY_WEAPON => Some(Self::Bolt),
            AbilityHandle::SECONDARY_WEAPON => Some(Self::Rocket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Kinetic,
    Explosive,
}

/// Ballistics per projectile class
#[derive(Debug, Clone, Copy)]
pub struct ProjectileStats {
    pub damage: f32,
    pub speed: f32,
    /// Seconds before the projectile destroys itself
    pub lifespan: f32,
    pub radius: f32,
    pub damage_type: DamageType,
}

impl ProjectileStats {
    pub fn for_class(class: ProjectileClass) -> Self {
        match class {
            ProjectileClass::Bolt => Self {
                damage: 10.0,
                speed: 3000.0,
                lifespan: 3.0,
                radius: 20.0,
                damage_type: DamageType::Kinetic,
            },
            ProjectileClass::Rocket => Self {
                damage: 35.0,
                speed: 1800.0,
                lifespan: 5.0,
                radius: 40.0,
                damage_type: DamageType::Explosive,
            },
        }
    }
}

/// Where a vehicle's weapon fires from
pub fn muzzle_transform(vehicle_location: Vec3, aim: Rotator) -> (Vec3, Rotator) {
    (vehicle_location - aim.up() * MUZZLE_DROP, aim)
}

/// Generational reference into a [`ProjectileTable`]
///
/// A handle to a destroyed projectile stays invalid even after its slot is
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectileHandle {
    index: u32,
    generation: u32,
}

impl ProjectileHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Packed form used as a network id for replicated projectiles
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileRole {
    /// Client-local prediction: visible, never deals damage
    Fake,
    /// Server-owned copy; hidden on the firing client once linked to its fake
    Authoritative { hidden: bool },
    /// Never predicted, no link
    Plain,
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: ProjectileId,
    pub role: ProjectileRole,
    pub class: ProjectileClass,
    /// Player whose vehicle fired it
    pub instigator: Uuid,
    pub location: Vec3,
    pub rotation: Rotator,
    pub velocity: Vec3,
    /// Remaining seconds, `None` for no auto-destruction
    pub lifespan: Option<f32>,
    pub linked_peer: Option<ProjectileHandle>,
}

impl Projectile {
    /// Launch along `rotation`, inheriting the firer's velocity
    pub fn launch(
        id: ProjectileId,
        role: ProjectileRole,
        class: ProjectileClass,
        instigator: Uuid,
        location: Vec3,
        rotation: Rotator,
        firer_velocity: Vec3,
    ) -> Self {
        let stats = ProjectileStats::for_class(class);
        Self {
            id,
            role,
            class,
            instigator,
            location,
            rotation,
            velocity: rotation.forward() * stats.speed + firer_velocity,
            lifespan: Some(stats.lifespan),
            linked_peer: None,
        }
    }

    pub fn stats(&self) -> ProjectileStats {
        ProjectileStats::for_class(self.class)
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self.role, ProjectileRole::Authoritative { hidden: true })
    }

    pub fn deals_damage(&self) -> bool {
        !matches!(self.role, ProjectileRole::Fake)
    }

    /// Advance by `dt`; returns false once the lifespan ran out
    pub fn step(&mut self, dt: f32) -> bool {
        self.location += self.velocity * dt;
        match self.lifespan.as_mut() {
            Some(remaining) => {
                *remaining -= dt;
                *remaining > 0.0
            }
            None => true,
        }
    }

    /// Simulate `seconds` of flight at once, as if that time had already passed
    ///
    /// Any lifespan keeps at least [`MIN_LIFESPAN_AFTER_FAST_FORWARD`] so the
    /// projectile still replicates before it expires.
    pub fn fast_forward(&mut self, seconds: f32) {
        if seconds <= 0.0 {
            return;
        }
        self.location += self.velocity * seconds;
        if let Some(remaining) = self.lifespan.as_mut() {
            *remaining = (*remaining - seconds).max(MIN_LIFESPAN_AFTER_FAST_FORWARD);
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    projectile: Option<Projectile>,
}

/// Owns every live projectile in one world
#[derive(Debug, Clone)]
pub struct ProjectileTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    max_live: usize,
}

impl ProjectileTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PROJECTILES)
    }

    pub fn with_capacity(max_live: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_live,
        }
    }

    pub fn spawn(&mut self, projectile: Projectile) -> Result<ProjectileHandle, SpawnError> {
        if self.live >= self.max_live {
            return Err(SpawnError::TableFull {
                capacity: self.max_live,
            });
        }
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.projectile = Some(projectile);
            return Ok(ProjectileHandle::new(index, slot.generation));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            projectile: Some(projectile),
        });
        Ok(ProjectileHandle::new(index, 0))
    }

    pub fn get(&self, handle: ProjectileHandle) -> Option<&Projectile> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.projectile.as_ref())
    }

    pub fn get_mut(&mut self, handle: ProjectileHandle) -> Option<&mut Projectile> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.projectile.as_mut())
    }

    pub fn contains(&self, handle: ProjectileHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a projectile; stale handles are ignored
    pub fn destroy(&mut self, handle: ProjectileHandle) -> Option<Projectile> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let projectile = slot.projectile.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(projectile)
    }

    /// Store back-references between a fake and its authoritative copy
    pub fn link(&mut self, fake: ProjectileHandle, authoritative: ProjectileHandle) {
        let fake_alive = match self.get_mut(fake) {
            Some(projectile) => {
                projectile.linked_peer = Some(authoritative);
                true
            }
            None => false,
        };
        if let Some(projectile) = self.get_mut(authoritative) {
            projectile.linked_peer = fake_alive.then_some(fake);
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProjectileHandle, &Projectile)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.projectile
                .as_ref()
                .map(|p| (ProjectileHandle::new(index as u32, slot.generation), p))
        })
    }

    /// Advance every projectile, destroying the ones whose lifespan ended
    pub fn step(&mut self, dt: f32) -> Vec<(ProjectileHandle, Projectile)> {
        let expired: Vec<ProjectileHandle> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let projectile = slot.projectile.as_mut()?;
                (!projectile.step(dt)).then(|| ProjectileHandle::new(index as u32, slot.generation))
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|handle| self.destroy(handle).map(|p| (handle, p)))
            .collect()
    }
}

impl Default for ProjectileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Impact details passed along with damage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitInfo {
    pub location: Vec3,
    /// Surface normal at the impact, pointing back at the projectile
    pub normal: Vec3,
    pub projectile_id: ProjectileId,
    pub class: ProjectileClass,
}

/// Receiver of projectile damage (health and kill bookkeeping live behind it)
pub trait DamageSink {
    fn apply_point_damage(
        &mut self,
        target: Uuid,
        amount: f32,
        hit: &HitInfo,
        instigator: Uuid,
        damage_type: DamageType,
    );
}

/// Something a projectile can hit
#[derive(Debug, Clone, Copy)]
pub struct HitTarget {
    pub id: Uuid,
    pub location: Vec3,
    pub radius: f32,
}

/// Overlap-test damaging projectiles against `targets`
///
/// A projectile never hits its own instigator. Each hit applies damage through
/// `sink` and destroys the projectile. Returns the destroyed projectiles.
pub fn resolve_hits<S: DamageSink + ?Sized>(
    table: &mut ProjectileTable,
    targets: &[HitTarget],
    sink: &mut S,
) -> Vec<(ProjectileHandle, Projectile)> {
    let mut hits = Vec::new();
    for (handle, projectile) in table.iter() {
        if !projectile.deals_damage() {
            continue;
        }
        let radius = projectile.stats().radius;
        let target = targets.iter().find(|t| {
            t.id != projectile.instigator
                && spheres_overlap(projectile.location, radius, t.location, t.radius)
        });
        if let Some(target) = target {
            hits.push((handle, *target));
        }
    }

    let mut destroyed = Vec::with_capacity(hits.len());
    for (handle, target) in hits {
        let Some(projectile) = table.destroy(handle) else {
            continue;
        };
        let stats = projectile.stats();
        let normal = (projectile.location - target.location).normalize_or_zero();
        let hit = HitInfo {
            location: target.location + normal * target.radius,
            normal,
            projectile_id: projectile.id,
            class: projectile.class,
        };
        trace!(target = %target.id, instigator = %projectile.instigator, "Projectile hit");
        sink.apply_point_damage(
            target.id,
            stats.damage,
            &hit,
            projectile.instigator,
            stats.damage_type,
        );
        destroyed.push((handle, projectile));
    }
    destroyed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bolt(role: ProjectileRole, instigator: Uuid) -> Projectile {
        Projectile::launch(
            ProjectileId::new(1),
            role,
            ProjectileClass::Bolt,
            instigator,
            Vec3::ZERO,
            Rotator::ZERO,
            Vec3::ZERO,
        )
    }

    #[derive(Default)]
    struct Recorder(Vec<(Uuid, f32, Uuid)>);

    impl DamageSink for Recorder {
        fn apply_point_damage(
            &mut self,
            target: Uuid,
            amount: f32,
            _hit: &HitInfo,
            instigator: Uuid,
            _damage_type: DamageType,
        ) {
            self.0.push((target, amount, instigator));
        }
    }

    #[test]
    fn launch_adds_firer_velocity() {
        let p = Projectile::launch(
            ProjectileId::NONE,
            ProjectileRole::Plain,
            ProjectileClass::Bolt,
            Uuid::nil(),
            Vec3::ZERO,
            Rotator::ZERO,
            Vec3::new(0.0, 100.0, 0.0),
        );
        assert_eq!(p.velocity, Vec3::new(3000.0, 100.0, 0.0));
    }

    #[test]
    fn fast_forward_moves_and_keeps_minimum_lifespan() {
        let mut p = bolt(ProjectileRole::Authoritative { hidden: false }, Uuid::nil());
        p.fast_forward(0.075);
        assert!((p.location.x - 225.0).abs() < 1e-3);
        assert!((p.lifespan.unwrap_or_default() - 2.925).abs() < 1e-5);

        p.fast_forward(10.0);
        assert_eq!(p.lifespan, Some(MIN_LIFESPAN_AFTER_FAST_FORWARD));
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut table = ProjectileTable::new();
        let first = table.spawn(bolt(ProjectileRole::Fake, Uuid::nil())).unwrap();
        assert!(table.destroy(first).is_some());
        let second = table.spawn(bolt(ProjectileRole::Fake, Uuid::nil())).unwrap();
        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert!(table.destroy(first).is_none());
        assert!(table.contains(second));
        assert_eq!(ProjectileHandle::from_bits(second.to_bits()), second);
    }

    #[test]
    fn full_table_refuses_spawn() {
        let mut table = ProjectileTable::with_capacity(1);
        table.spawn(bolt(ProjectileRole::Fake, Uuid::nil())).unwrap();
        let err = table.spawn(bolt(ProjectileRole::Fake, Uuid::nil())).unwrap_err();
        assert!(matches!(err, SpawnError::TableFull { capacity: 1 }));
    }

    #[test]
    fn step_expires_projectiles() {
        let mut table = ProjectileTable::new();
        table.spawn(bolt(ProjectileRole::Plain, Uuid::nil())).unwrap();
        let mut expired = Vec::new();
        for _ in 0..100 {
            expired.extend(table.step(1.0 / 30.0));
        }
        assert_eq!(expired.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn fakes_never_deal_damage() {
        let shooter = Uuid::new_v4();
        let target = HitTarget {
            id: Uuid::new_v4(),
            location: Vec3::ZERO,
            radius: 150.0,
        };
        let mut table = ProjectileTable::new();
        table.spawn(bolt(ProjectileRole::Fake, shooter)).unwrap();
        let mut sink = Recorder::default();
        assert!(resolve_hits(&mut table, &[target], &mut sink).is_empty());
        assert!(sink.0.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn authoritative_hits_others_but_not_instigator() {
        let shooter = Uuid::new_v4();
        let victim = Uuid::new_v4();
        let targets = [
            HitTarget { id: shooter, location: Vec3::ZERO, radius: 150.0 },
            HitTarget { id: victim, location: Vec3::new(100.0, 0.0, 0.0), radius: 150.0 },
        ];
        let mut table = ProjectileTable::new();
        table
            .spawn(bolt(ProjectileRole::Authoritative { hidden: false }, shooter))
            .unwrap();
        let mut sink = Recorder::default();
        let destroyed = resolve_hits(&mut table, &targets, &mut sink);
        assert_eq!(destroyed.len(), 1);
        assert_eq!(sink.0, vec![(victim, 10.0, shooter)]);
        assert!(table.is_empty());
    }
}
