//! In-memory link between an arena and predicting clients
//!
//! Every message spends a fixed number of ticks in flight each way, so
//! latency-dependent behavior is reproducible tick for tick.

#![allow(dead_code)]

use aerial_netcode::client::PredictedClient;
use aerial_netcode::game::ability::{AbilityHandle, PredictionKey};
use aerial_netcode::game::math::Rotator;
use aerial_netcode::game::ping::NetMode;
use aerial_netcode::game::vehicle::ControlIntent;
use aerial_netcode::game::{ArenaConfig, ArenaState, PlayerInput};
use aerial_netcode::util::time::{tick_delta, SIMULATION_TPS};
use aerial_netcode::ws::protocol::{ClientMsg, ServerMsg};
use uuid::Uuid;

pub struct Harness {
    pub arena: ArenaState,
    pub clients: Vec<PredictedClient>,
    pub intents: Vec<ControlIntent>,
    latency_ticks: u64,
    now: u64,
    to_server: Vec<(u64, Uuid, ClientMsg)>,
    to_client: Vec<(u64, usize, ServerMsg)>,
}

impl Harness {
    /// An arena plus `clients` players, each `latency_ticks` away one way
    pub fn new(clients: usize, latency_ticks: u64) -> Self {
        Self::with_configs(ArenaConfig::default(), ArenaConfig::default(), clients, latency_ticks)
    }

    pub fn with_configs(
        server: ArenaConfig,
        client: ArenaConfig,
        clients: usize,
        latency_ticks: u64,
    ) -> Self {
        let mut harness = Self {
            arena: ArenaState::new(Uuid::new_v4(), 11, NetMode::DedicatedServer, server),
            clients: (0..clients)
                .map(|_| PredictedClient::new(Uuid::new_v4(), client.clone()))
                .collect(),
            intents: vec![aim_up(); clients],
            latency_ticks,
            now: 0,
            to_server: Vec::new(),
            to_client: Vec::new(),
        };
        for index in 0..clients {
            harness.clients[index].join(None);
            harness.flush(index);
        }
        harness
    }

    /// Wall-clock stand-in, in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now * 1000 / SIMULATION_TPS as u64
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Queue everything a client wants to send
    pub fn flush(&mut self, index: usize) {
        let player_id = self.clients[index].player_id();
        let deliver_at = self.now + self.latency_ticks;
        for msg in self.clients[index].drain_outbox() {
            self.to_server.push((deliver_at, player_id, msg));
        }
    }

    pub fn fire(&mut self, index: usize, ability: AbilityHandle) -> Option<PredictionKey> {
        let key = self.clients[index].fire(ability);
        self.flush(index);
        key
    }

    /// One tick on every side of the link
    pub fn step(&mut self) {
        self.now += 1;
        let now = self.now;
        let now_ms = self.now_ms();

        let mut out = Vec::new();
        let (due, later): (Vec<_>, Vec<_>) = self
            .to_server
            .drain(..)
            .partition(|(deliver_at, _, _)| *deliver_at <= now);
        self.to_server = later;
        for (_, player_id, msg) in due {
            self.arena.handle_input(
                PlayerInput {
                    player_id,
                    msg,
                    received_at: now_ms,
                },
                &mut out,
            );
        }
        self.arena.tick(now_ms, &mut out);

        let deliver_at = now + self.latency_ticks;
        for envelope in out {
            for (index, client) in self.clients.iter().enumerate() {
                if envelope.recipient.includes(client.player_id()) {
                    self.to_client.push((deliver_at, index, envelope.msg.clone()));
                }
            }
        }

        let (due, later): (Vec<_>, Vec<_>) = self
            .to_client
            .drain(..)
            .partition(|(deliver_at, _, _)| *deliver_at <= now);
        self.to_client = later;
        for (_, index, msg) in due {
            self.clients[index].handle(msg);
        }

        for index in 0..self.clients.len() {
            let intent = self.intents[index];
            self.clients[index].tick(&intent, tick_delta());
            self.flush(index);
        }
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds, at most `limit` ticks; returns ticks taken
    pub fn run_until<F>(&mut self, limit: u64, mut done: F) -> Option<u64>
    where
        F: FnMut(&Self) -> bool,
    {
        for taken in 1..=limit {
            self.step();
            if done(self) {
                return Some(taken);
            }
        }
        None
    }
}

/// Hovering in place with the turret pointed almost straight up, so shots
/// never cross another vehicle
pub fn aim_up() -> ControlIntent {
    ControlIntent {
        turret_rotation: Rotator::new(85.0, 0.0, 0.0),
        ..ControlIntent::default()
    }
}
