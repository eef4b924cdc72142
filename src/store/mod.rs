//! User-stats persistence collaborator

pub mod stats;

pub use stats::{StatsError, StatsStore, UserStats};
