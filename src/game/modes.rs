//! Pluggable game-mode policy

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::map::{Obstacle, MAP_SIZE};
use crate::game::player::Player;
use crate::game::Vec3;

/// Delay between death and respawn
pub const RESPAWN_TIME_MS: f64 = 2000.0;

const HEADSHOT_SCORE: u16 = 2;
const BODYSHOT_SCORE: u16 = 1;

/// Capability set a room delegates rule decisions to. The room never
/// inspects the concrete mode; all scoring, spawn and end-of-game policy
/// flows through these hooks.
pub trait GameMode: Send {
    /// Place a newly joined player (chooses the initial spawn)
    fn on_player_join(&mut self, player: &mut Player, obstacles: &[Obstacle]);

    fn on_player_leave(&mut self, player: &Player);

    /// Credit a confirmed kill to the shooter
    fn on_player_kill(&mut self, killer: &mut Player, victim_id: u16, headshot: bool);

    /// Schedule the victim's respawn
    fn on_player_death(&mut self, victim: &mut Player, killer_id: Option<u16>, now_ms: f64);

    fn should_end_game(&self, players: &BTreeMap<u16, Player>) -> bool;

    /// Ids of the winning players (ties allowed)
    fn winners(&self, players: &BTreeMap<u16, Player>) -> Vec<u16>;

    fn spawn_position(&mut self, player_id: u16, obstacles: &[Obstacle]) -> Vec3;

    /// Advance mode timers by one tick
    fn tick(&mut self, players: &mut BTreeMap<u16, Player>, dt: f32);

    /// Called after the room resets scores at end of game
    fn on_game_reset(&mut self) {}
}

/// Free-for-all deathmatch. No score or time limit unless configured;
/// spawns are uniform random drop-ins with no safety check (overlaps
/// resolve on the first simulated tick).
pub struct Deathmatch {
    rng: ChaCha8Rng,
    score_limit: Option<u16>,
    time_limit_ms: Option<f64>,
    elapsed_ms: f64,
}

impl Deathmatch {
    pub fn new() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    pub fn with_rng(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            score_limit: None,
            time_limit_ms: None,
            elapsed_ms: 0.0,
        }
    }

    pub fn score_limit(mut self, limit: u16) -> Self {
        self.score_limit = Some(limit);
        self
    }

    pub fn time_limit_ms(mut self, limit: f64) -> Self {
        self.time_limit_ms = Some(limit);
        self
    }

    fn random_spawn(&mut self) -> Vec3 {
        let extent = MAP_SIZE / 2.0 - 2.0;
        Vec3 {
            x: self.rng.gen_range(-extent..extent),
            y: 5.0,
            z: self.rng.gen_range(-extent..extent),
        }
    }
}

impl Default for Deathmatch {
    fn default() -> Self {
        Self::new()
    }
}

impl GameMode for Deathmatch {
    fn on_player_join(&mut self, player: &mut Player, _obstacles: &[Obstacle]) {
        player.position = self.random_spawn();
    }

    fn on_player_leave(&mut self, _player: &Player) {}

    fn on_player_kill(&mut self, killer: &mut Player, _victim_id: u16, headshot: bool) {
        killer.score = killer.score.saturating_add(if headshot {
            HEADSHOT_SCORE
        } else {
            BODYSHOT_SCORE
        });
        killer.kills += 1;
    }

    fn on_player_death(&mut self, victim: &mut Player, _killer_id: Option<u16>, now_ms: f64) {
        victim.respawn_time = now_ms + RESPAWN_TIME_MS;
    }

    fn should_end_game(&self, players: &BTreeMap<u16, Player>) -> bool {
        if let Some(limit) = self.score_limit {
            if players.values().any(|p| p.score >= limit) {
                return true;
            }
        }
        if let Some(limit) = self.time_limit_ms {
            if self.elapsed_ms >= limit {
                return true;
            }
        }
        false
    }

    fn winners(&self, players: &BTreeMap<u16, Player>) -> Vec<u16> {
        let Some(top) = players.values().map(|p| p.score).max() else {
            return Vec::new();
        };
        players
            .values()
            .filter(|p| p.score == top)
            .map(|p| p.id)
            .collect()
    }

    fn spawn_position(&mut self, _player_id: u16, _obstacles: &[Obstacle]) -> Vec3 {
        self.random_spawn()
    }

    fn tick(&mut self, _players: &mut BTreeMap<u16, Player>, dt: f32) {
        self.elapsed_ms += dt as f64 * 1000.0;
    }

    fn on_game_reset(&mut self) {
        self.elapsed_ms = 0.0;
    }
}
