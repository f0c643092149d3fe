//! End-to-end prediction scenarios over a simulated link

mod common;

use aerial_netcode::game::ability::{AbilityHandle, PredictionKey};
use aerial_netcode::game::physics::PhysicsBody;
use aerial_netcode::game::projectile::ProjectileRole;
use aerial_netcode::game::reconcile::ReconcileOutcome;
use aerial_netcode::game::spawn::{SpawnState, TaskEvent};
use aerial_netcode::game::ArenaConfig;
use common::Harness;
use glam::Vec3;

/// Step until every client has its own vehicle
fn run_until_joined(h: &mut Harness) {
    let joined = h.run_until(30, |h| h.clients.iter().all(|c| c.vehicle().is_some()));
    assert!(joined.is_some(), "clients never received their arena");
}

/// Step until `client` reports `wanted` for `key`, collecting every task event
fn run_until_event<F>(h: &mut Harness, client: usize, limit: u64, mut wanted: F) -> Vec<TaskEvent>
where
    F: FnMut(&TaskEvent) -> bool,
{
    let mut seen = h.clients[client].drain_task_events();
    for _ in 0..limit {
        if seen.iter().any(&mut wanted) {
            return seen;
        }
        h.step();
        seen.extend(h.clients[client].drain_task_events());
    }
    assert!(seen.iter().any(&mut wanted), "event never arrived: {seen:?}");
    seen
}

fn linked(key: PredictionKey) -> impl FnMut(&TaskEvent) -> bool {
    move |event| matches!(event, TaskEvent::Linked { key: k, .. } if *k == key)
}

#[test]
fn fire_links_fake_to_authoritative_copy() {
    let mut h = Harness::new(2, 2);
    run_until_joined(&mut h);

    let key = h.fire(0, AbilityHandle::PRIMARY_WEAPON).expect("weapon ready");
    assert!(matches!(
        h.clients[0].predictor().state(key),
        Some(SpawnState::AwaitingServerAuth { .. })
    ));
    let events = run_until_event(&mut h, 0, 20, linked(key));
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Spawned { key: k, .. } if *k == key)));

    // Firing client: visible fake plus the hidden server copy, linked both ways
    let owner = h.clients[0].projectiles();
    assert_eq!(owner.len(), 2);
    let (fake, fake_projectile) = owner
        .iter()
        .find(|(_, p)| p.role == ProjectileRole::Fake)
        .expect("fake survives the link");
    let (auth, auth_projectile) = owner
        .iter()
        .find(|(_, p)| p.is_hidden())
        .expect("authoritative copy is hidden");
    assert_eq!(fake_projectile.linked_peer, Some(auth));
    assert_eq!(auth_projectile.linked_peer, Some(fake));
    assert_eq!(auth_projectile.id, fake_projectile.id);
    assert!(h.clients[0].predictor().registry().is_empty());

    // Everyone else: one plain projectile with no predicted id
    let other = h.clients[1].projectiles();
    assert_eq!(other.len(), 1);
    let (_, plain) = other.iter().next().unwrap();
    assert_eq!(plain.role, ProjectileRole::Plain);
    assert!(!plain.id.is_predicted());

    assert_eq!(h.arena.projectiles().len(), 1);
}

#[test]
fn projectiles_disappear_everywhere_when_the_server_copy_expires() {
    let mut h = Harness::new(2, 2);
    run_until_joined(&mut h);
    let key = h.fire(0, AbilityHandle::PRIMARY_WEAPON).unwrap();
    run_until_event(&mut h, 0, 20, linked(key));

    // Bolt lifespan is 3 s; allow for the trip back
    let cleared = h.run_until(150, |h| {
        h.arena.projectiles().is_empty()
            && h.clients.iter().all(|c| c.projectiles().is_empty())
    });
    assert!(cleared.is_some());
}

#[test]
fn high_ping_delays_the_fake_then_links() {
    // 6 ticks each way: 400 ms round trip
    let mut h = Harness::new(1, 6);
    run_until_joined(&mut h);
    let measured = h.run_until(90, |h| h.clients[0].predictor().estimator().ping_ms().is_some());
    assert!(measured.is_some(), "no ping update arrived");
    let ping = h.clients[0].predictor().estimator().ping_ms().unwrap();
    assert!((ping - 400.0).abs() < 1.0, "ping {ping}");

    let key = h.fire(0, AbilityHandle::PRIMARY_WEAPON).unwrap();
    assert_eq!(h.clients[0].predictor().state(key), Some(SpawnState::DelayPending));
    assert!(h.clients[0].projectiles().is_empty());

    let events = run_until_event(&mut h, 0, 60, linked(key));
    let delay = events.iter().find_map(|e| match e {
        TaskEvent::Delayed { key: k, seconds } if *k == key => Some(*seconds),
        _ => None,
    });
    let delay = delay.expect("delayed event first");
    assert!((delay - 0.23).abs() < 1e-3, "delay {delay}");
    let spawned = events
        .iter()
        .position(|e| matches!(e, TaskEvent::Spawned { key: k, .. } if *k == key))
        .unwrap();
    let linked_at = events
        .iter()
        .position(|e| matches!(e, TaskEvent::Linked { key: k, .. } if *k == key))
        .unwrap();
    assert!(spawned < linked_at);
}

#[test]
fn server_cooldown_rejects_the_faster_client_shot() {
    let mut client_config = ArenaConfig::default();
    client_config.tuning.fire_rate = 0.05;
    let mut h = Harness::with_configs(ArenaConfig::default(), client_config, 1, 2);
    run_until_joined(&mut h);

    let first = h.fire(0, AbilityHandle::PRIMARY_WEAPON).unwrap();
    h.run(2);
    let second = h.fire(0, AbilityHandle::PRIMARY_WEAPON).expect("client cooldown is shorter");
    assert_ne!(first, second);
    let second_fake = h.clients[0].predictor().fake(second).unwrap();

    let events = run_until_event(&mut h, 0, 20, |e| {
        matches!(e, TaskEvent::Rejected { key } if *key == second)
    });
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Linked { key, .. } if *key == first)));
    assert!(!events.iter().any(|e| matches!(e, TaskEvent::Rejected { key } if *key == first)));

    assert!(!h.clients[0].projectiles().contains(second_fake));
    assert_eq!(h.clients[0].projectiles().len(), 2);
    assert_eq!(h.arena.projectiles().len(), 1);
}

#[test]
fn rejected_shot_does_not_take_down_the_other_weapon() {
    let mut client_config = ArenaConfig::default();
    client_config.tuning.fire_rate = 0.05;
    let mut h = Harness::with_configs(ArenaConfig::default(), client_config, 1, 2);
    run_until_joined(&mut h);

    let opener = h.fire(0, AbilityHandle::PRIMARY_WEAPON).unwrap();
    h.run(2);
    // Both in the same tick: the primary is still cooling down on the server
    let refused = h.fire(0, AbilityHandle::PRIMARY_WEAPON).unwrap();
    let rocket = h.fire(0, AbilityHandle::SECONDARY_WEAPON).unwrap();
    let refused_fake = h.clients[0].predictor().fake(refused).unwrap();

    let (mut was_rejected, mut was_linked) = (false, false);
    let events = run_until_event(&mut h, 0, 20, |e| {
        was_rejected |= matches!(e, TaskEvent::Rejected { key } if *key == refused);
        was_linked |= matches!(e, TaskEvent::Linked { key, .. } if *key == rocket);
        was_rejected && was_linked
    });
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Linked { key, .. } if *key == opener)));
    assert!(!events.iter().any(|e| matches!(e, TaskEvent::Rejected { key } if *key == rocket)));

    assert!(!h.clients[0].projectiles().contains(refused_fake));
    assert_eq!(h.arena.projectiles().len(), 2);
}

#[test]
fn hovering_prediction_stays_in_sync() {
    let mut h = Harness::new(2, 3);
    run_until_joined(&mut h);
    for _ in 0..60 {
        h.step();
        for client in &h.clients {
            assert!(!client.vehicle().unwrap().is_resyncing());
            if let Some(outcome) = client.last_reconcile() {
                assert!(
                    matches!(outcome, ReconcileOutcome::InSync { .. }),
                    "unexpected {outcome:?}"
                );
            }
        }
    }
    assert!(matches!(
        h.clients[0].last_reconcile(),
        Some(ReconcileOutcome::InSync { error }) if error < 1e-3
    ));

    // The other player's proxy follows the server copy
    let other = h.clients[1].player_id();
    let server = h.arena.player(other).unwrap().vehicle.location();
    let proxy = h.clients[0].proxy(other).unwrap().location();
    assert!(proxy.distance(server) < 1.0);
}

#[test]
fn local_teleport_resyncs_back_to_the_server() {
    let mut h = Harness::new(1, 2);
    run_until_joined(&mut h);
    h.run(20);
    let player = h.clients[0].player_id();

    let vehicle = h.clients[0].vehicle_mut().unwrap();
    let location = vehicle.location();
    vehicle.body_mut().set_location(location + Vec3::new(500.0, 0.0, 0.0));

    let entered = h.run_until(20, |h| h.clients[0].vehicle().unwrap().is_resyncing());
    assert!(entered.is_some(), "divergence never detected");

    let finished = h.run_until(200, |h| {
        matches!(
            h.clients[0].last_reconcile(),
            Some(ReconcileOutcome::ResyncFinished { .. })
        )
    });
    assert!(finished.is_some(), "resync never finished");
    let server = h.arena.player(player).unwrap().vehicle.location();
    let client = h.clients[0].vehicle().unwrap().location();
    assert!(client.distance(server) < 50.0);
}
