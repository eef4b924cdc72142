//! Authoritative multiplayer FPS arena server
//!
//! Clients connect over WebSocket, join a room, and stream binary input
//! frames; each room runs a fixed-rate simulation with server-side hit
//! validation and lag compensation, and answers with per-tick world
//! snapshots the client reconciles against.
//!
//! Module layout:
//! - [`game`] - map generation, physics, players, combat, rooms
//! - [`ws`] - the binary wire codec and per-connection session loops
//! - [`http`] - health, leaderboard and the websocket upgrade route
//! - [`store`] - the external user-stats collaborator
//! - [`config`] / [`app`] / [`util`] - process plumbing

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod store;
pub mod util;
pub mod ws;
