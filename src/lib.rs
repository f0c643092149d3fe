//! Aerial arena netcode
//!
//! Authoritative arena server and predicting client for hovering combat
//! vehicles:
//! - client-side movement prediction with server reconciliation
//! - predicted projectile spawning, linked to the server's copy by ID
//! - an axum WebSocket surface hosting arenas on a fixed 30 Hz tick

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
