//! HTTP surface: health, leaderboard, websocket upgrade

pub mod routes;

pub use routes::build_router;
