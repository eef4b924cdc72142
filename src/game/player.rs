//! Authoritative per-player state

use std::collections::VecDeque;

use crate::game::Vec3;
use crate::ws::protocol::InputRecord;

pub const MAX_HEALTH: u8 = 100;

/// History ring capacity; at 60 Hz this covers five seconds of rewind
pub const HISTORY_CAPACITY: usize = 300;

/// Circular buffer of timestamped positions used for lag-compensated hit
/// validation. Parallel arrays keep samples dense; `head` points at the
/// next write slot.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    xs: Box<[f32; HISTORY_CAPACITY]>,
    ys: Box<[f32; HISTORY_CAPACITY]>,
    zs: Box<[f32; HISTORY_CAPACITY]>,
    times: Box<[f64; HISTORY_CAPACITY]>,
    head: usize,
    size: usize,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self {
            xs: Box::new([0.0; HISTORY_CAPACITY]),
            ys: Box::new([0.0; HISTORY_CAPACITY]),
            zs: Box::new([0.0; HISTORY_CAPACITY]),
            times: Box::new([0.0; HISTORY_CAPACITY]),
            head: 0,
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Record a sample. Timestamps must be non-decreasing; the tick loop
    /// writes exactly once per tick with the current server clock.
    pub fn push(&mut self, position: Vec3, timestamp: f64) {
        self.xs[self.head] = position.x;
        self.ys[self.head] = position.y;
        self.zs[self.head] = position.z;
        self.times[self.head] = timestamp;
        self.head = (self.head + 1) % HISTORY_CAPACITY;
        self.size = (self.size + 1).min(HISTORY_CAPACITY);
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    fn at(&self, idx: usize) -> Vec3 {
        Vec3 {
            x: self.xs[idx],
            y: self.ys[idx],
            z: self.zs[idx],
        }
    }

    /// Reconstruct the position at time `t`.
    ///
    /// Clamps to the newest sample when `t` is in the future and to the
    /// oldest when it predates the ring; never extrapolates, so the result
    /// always lies within the hull of stored positions.
    pub fn sample(&self, t: f64) -> Option<Vec3> {
        if self.size == 0 {
            return None;
        }

        let newest = (self.head + HISTORY_CAPACITY - 1) % HISTORY_CAPACITY;
        if t >= self.times[newest] {
            return Some(self.at(newest));
        }

        for back in 1..self.size {
            let curr = (newest + HISTORY_CAPACITY - (back - 1)) % HISTORY_CAPACITY;
            let prev = (newest + HISTORY_CAPACITY - back) % HISTORY_CAPACITY;
            let t_prev = self.times[prev];
            let t_curr = self.times[curr];

            if t_prev <= t && t <= t_curr {
                let span = t_curr - t_prev;
                if span <= 0.0 {
                    return Some(self.at(curr));
                }
                let alpha = ((t - t_prev) / span) as f32;
                let a = self.at(prev);
                let b = self.at(curr);
                return Some(Vec3 {
                    x: a.x + (b.x - a.x) * alpha,
                    y: a.y + (b.y - a.y) * alpha,
                    z: a.z + (b.z - a.z) * alpha,
                });
            }
        }

        let oldest = (newest + HISTORY_CAPACITY - (self.size - 1)) % HISTORY_CAPACITY;
        Some(self.at(oldest))
    }
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected player. Owned exclusively by its room; the network layer
/// only ever refers to it by id.
#[derive(Debug)]
pub struct Player {
    pub id: u16,
    pub name: String,

    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,

    pub health: u8,
    pub is_dead: bool,
    /// Server clock ms at which to respawn; 0 = not scheduled
    pub respawn_time: f64,
    pub weapon: u8,
    pub is_shooting: bool,
    pub last_shoot_time: f64,

    pub score: u16,
    pub kills: u32,
    pub deaths: u32,

    pub pending_inputs: VecDeque<InputRecord>,
    pub last_processed_input: u32,

    pub grounded: bool,
    pub history: PositionHistory,
}

impl Player {
    pub fn new(id: u16, name: String, spawn: Vec3) -> Self {
        Self {
            id,
            name,
            position: spawn,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            health: MAX_HEALTH,
            is_dead: false,
            respawn_time: 0.0,
            weapon: 0,
            is_shooting: false,
            last_shoot_time: 0.0,
            score: 0,
            kills: 0,
            deaths: 0,
            pending_inputs: VecDeque::new(),
            last_processed_input: 0,
            grounded: false,
            history: PositionHistory::new(),
        }
    }

    /// Teleport to a spawn point with full health. Clears the history
    /// ring so stale pre-death positions can never validate a hit.
    pub fn respawn(&mut self, spawn: Vec3) {
        self.position = spawn;
        self.velocity = Vec3::ZERO;
        self.health = MAX_HEALTH;
        self.is_dead = false;
        self.respawn_time = 0.0;
        self.grounded = false;
        self.history.clear();
    }

    /// Eye position shots originate from
    pub fn eye_position(&self) -> Vec3 {
        Vec3 {
            x: self.position.x,
            y: self.position.y + crate::game::physics::PLAYER_HEIGHT - 0.2,
            z: self.position.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn v(x: f32, y: f32, z: f32) -> Vec3 {
        Vec3 { x, y, z }
    }

    #[test]
    fn empty_history_has_no_samples() {
        let history = PositionHistory::new();
        assert!(history.sample(100.0).is_none());
    }

    #[test]
    fn future_time_clamps_to_newest() {
        let mut history = PositionHistory::new();
        history.push(v(1.0, 0.0, 0.0), 10.0);
        history.push(v(2.0, 0.0, 0.0), 20.0);

        let p = history.sample(1000.0).unwrap();
        assert_eq!(p.x, 2.0);
    }

    #[test]
    fn past_time_clamps_to_oldest() {
        let mut history = PositionHistory::new();
        history.push(v(1.0, 0.0, 0.0), 10.0);
        history.push(v(2.0, 0.0, 0.0), 20.0);

        let p = history.sample(0.0).unwrap();
        assert_eq!(p.x, 1.0);
    }

    #[test]
    fn interpolates_between_adjacent_samples() {
        let mut history = PositionHistory::new();
        history.push(v(0.0, 0.0, 5.0), 100.0);
        history.push(v(0.0, 0.0, 10.0), 200.0);

        let p = history.sample(150.0).unwrap();
        assert_approx_eq!(p.z, 7.5, 1e-4);
    }

    #[test]
    fn size_is_bounded_by_capacity() {
        let mut history = PositionHistory::new();
        for i in 0..(HISTORY_CAPACITY * 2) {
            history.push(v(i as f32, 0.0, 0.0), i as f64);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);

        // Oldest retained sample is capacity steps behind the newest
        let oldest = history.sample(0.0).unwrap();
        assert_eq!(oldest.x, HISTORY_CAPACITY as f32);
    }

    #[test]
    fn wrapped_ring_still_interpolates() {
        let mut history = PositionHistory::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            history.push(v(i as f32, 0.0, 0.0), i as f64 * 10.0);
        }
        // Halfway between two mid-ring samples
        let t = (HISTORY_CAPACITY as f64) * 10.0 + 5.0;
        let p = history.sample(t).unwrap();
        assert_approx_eq!(p.x, HISTORY_CAPACITY as f32 + 0.5, 1e-3);
    }

    #[test]
    fn respawn_restores_health_and_clears_history() {
        let mut player = Player::new(7, "p".into(), Vec3::ZERO);
        player.history.push(v(1.0, 2.0, 3.0), 50.0);
        player.health = 0;
        player.is_dead = true;
        player.respawn_time = 123.0;

        player.respawn(v(5.0, 5.0, 5.0));

        assert_eq!(player.health, MAX_HEALTH);
        assert!(!player.is_dead);
        assert_eq!(player.respawn_time, 0.0);
        assert!(player.history.is_empty());
        assert_eq!(player.position.x, 5.0);
    }

    #[test]
    fn eye_height_sits_below_head_top() {
        let player = Player::new(1, "p".into(), Vec3::ZERO);
        assert_approx_eq!(player.eye_position().y, 1.6, 1e-6);
    }
}
