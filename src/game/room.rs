//! Room state and authoritative tick loop
//!
//! One room owns one simulation: players, obstacles, mode policy and the
//! snapshot scratch buffer all live on a single tokio task. The network
//! layer talks to it exclusively through the command channel, so no locks
//! guard any of the mutable state.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::game::combat::{self, HitEvent, RewoundTarget};
use crate::game::map::{self, Obstacle};
use crate::game::modes::{Deathmatch, GameMode};
use crate::game::physics;
use crate::game::player::Player;
use crate::game::Vec3;
use crate::util::time::server_now_ms;
use crate::ws::protocol::{self, InputRecord, SnapshotEncoder};

const MAX_NAME_LEN: usize = 24;

/// Command channel depth per room
const COMMAND_BUFFER: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room is full")]
    RoomFull,

    #[error("all rooms are full")]
    ServerFull,

    #[error("room is no longer accepting players")]
    Unavailable,
}

/// Final stats handed back when a player leaves, for persistence
#[derive(Debug, Clone, Copy)]
pub struct PlayerTally {
    pub kills: u32,
    pub deaths: u32,
}

/// Messages from connection tasks into a room
pub enum RoomCommand {
    Join {
        name: String,
        out: mpsc::UnboundedSender<Vec<u8>>,
        reply: oneshot::Sender<Result<u16, JoinError>>,
    },
    Input {
        player_id: u16,
        input: InputRecord,
    },
    Leave {
        player_id: u16,
        reply: Option<oneshot::Sender<Option<PlayerTally>>>,
    },
}

/// Simulation parameters lifted out of the server config
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub tick_rate: u8,
    pub max_players: usize,
    pub max_lag_compensation_ms: f64,
    pub map_seed: u32,
}

impl RoomSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_rate: config.tick_rate,
            max_players: config.max_players_per_room,
            max_lag_compensation_ms: config.max_lag_compensation_ms,
            map_seed: config.map_seed,
        }
    }
}

/// The authoritative per-room simulation. Synchronous by design: the
/// async driver only feeds it commands and clock readings.
pub struct Room {
    id: u32,
    settings: RoomSettings,
    dt: f32,
    obstacles: Vec<Obstacle>,
    players: BTreeMap<u16, Player>,
    outputs: HashMap<u16, mpsc::UnboundedSender<Vec<u8>>>,
    tick: u32,
    next_player_id: u16,
    mode: Box<dyn GameMode>,
    hit_events: Vec<HitEvent>,
    encoder: SnapshotEncoder,
    spread_rng: ChaCha8Rng,
}

impl Room {
    pub fn new(id: u32, settings: RoomSettings, mode: Box<dyn GameMode>) -> Self {
        Self {
            id,
            settings,
            dt: 1.0 / settings.tick_rate as f32,
            obstacles: map::generate_obstacles(settings.map_seed),
            players: BTreeMap::new(),
            outputs: HashMap::new(),
            tick: 0,
            next_player_id: 1,
            mode,
            hit_events: Vec::new(),
            encoder: SnapshotEncoder::new(),
            spread_rng: ChaCha8Rng::from_entropy(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn player_len(&self) -> usize {
        self.players.len()
    }

    pub fn tick_rate(&self) -> u8 {
        self.settings.tick_rate
    }

    /// Hits recorded by the most recent tick
    pub fn hit_events(&self) -> &[HitEvent] {
        &self.hit_events
    }

    #[cfg(test)]
    pub(crate) fn set_spread_rng(&mut self, rng: ChaCha8Rng) {
        self.spread_rng = rng;
    }

    pub fn apply_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { name, out, reply } => {
                let _ = reply.send(self.join(name, out));
            }
            RoomCommand::Input { player_id, input } => self.queue_input(player_id, input),
            RoomCommand::Leave { player_id, reply } => {
                let tally = self.leave(player_id);
                if let Some(reply) = reply {
                    let _ = reply.send(tally);
                }
            }
        }
    }

    /// Admit a player: allocate an id, let the mode place them, send the
    /// welcome frame over their outbound channel.
    pub fn join(
        &mut self,
        name: String,
        out: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<u16, JoinError> {
        if self.players.len() >= self.settings.max_players {
            return Err(JoinError::RoomFull);
        }

        let id = self.allocate_player_id();
        let mut player = Player::new(id, sanitize_name(name, id), Vec3::ZERO);
        self.mode.on_player_join(&mut player, &self.obstacles);

        let welcome =
            protocol::encode_welcome(id, self.settings.tick_rate, self.settings.map_seed);
        let _ = out.send(welcome);

        info!(
            room_id = self.id,
            player_id = id,
            name = %player.name,
            "player joined"
        );

        self.players.insert(id, player);
        self.outputs.insert(id, out);
        Ok(id)
    }

    fn allocate_player_id(&mut self) -> u16 {
        loop {
            let id = self.next_player_id;
            self.next_player_id = self.next_player_id.wrapping_add(1);
            if id != 0 && !self.players.contains_key(&id) {
                return id;
            }
        }
    }

    /// Append an input to its player's queue. The tick loop is the only
    /// consumer; inputs from unknown players are dropped.
    pub fn queue_input(&mut self, player_id: u16, input: InputRecord) {
        match self.players.get_mut(&player_id) {
            Some(player) => player.pending_inputs.push_back(input),
            None => debug!(room_id = self.id, player_id, "input for unknown player"),
        }
    }

    /// Remove a player and their queued inputs
    pub fn leave(&mut self, player_id: u16) -> Option<PlayerTally> {
        self.outputs.remove(&player_id);
        let player = self.players.remove(&player_id)?;
        self.mode.on_player_leave(&player);

        info!(
            room_id = self.id,
            player_id,
            name = %player.name,
            "player left"
        );

        Some(PlayerTally {
            kills: player.kills,
            deaths: player.deaths,
        })
    }

    /// One fixed-dt simulation step. `now_ms` is the server's monotonic
    /// clock reading for this tick; passing it in keeps the simulation
    /// fully deterministic under test.
    pub fn tick(&mut self, now_ms: f64) {
        self.tick = self.tick.wrapping_add(1);
        self.hit_events.clear();

        // Stable player order for the room's lifetime: ascending id
        let ids: Vec<u16> = self.players.keys().copied().collect();
        for id in &ids {
            let inputs: Vec<InputRecord> = match self.players.get_mut(id) {
                Some(player) => player.pending_inputs.drain(..).collect(),
                None => continue,
            };

            for input in &inputs {
                self.apply_input(*id, input, now_ms);
            }

            if let Some(player) = self.players.get_mut(id) {
                if let Some(last) = inputs.last() {
                    player.last_processed_input = last.seq;
                }
                let position = player.position;
                player.history.push(position, now_ms);
            }
        }

        self.process_respawns(now_ms);
        self.mode.tick(&mut self.players, self.dt);
        self.check_game_end();
        self.broadcast(now_ms);
    }

    fn apply_input(&mut self, player_id: u16, input: &InputRecord, now_ms: f64) {
        let mut wants_shot = false;
        if let Some(player) = self.players.get_mut(&player_id) {
            if player.is_dead {
                return;
            }
            physics::apply_movement_input(player, input);
            physics::step(player, self.dt, &self.obstacles);
            wants_shot = input.shoot();
        }
        if wants_shot {
            self.handle_shot(player_id, input, now_ms);
        }
    }

    fn handle_shot(&mut self, shooter_id: u16, input: &InputRecord, now_ms: f64) {
        let (eye, yaw, pitch, weapon_index) = match self.players.get_mut(&shooter_id) {
            Some(shooter) => {
                let stats = combat::weapon(shooter.weapon);
                // Fire-rate gate runs on the server clock so attacker
                // timestamps cannot compress the firing cadence
                if now_ms - shooter.last_shoot_time < stats.fire_rate_ms {
                    return;
                }
                shooter.last_shoot_time = now_ms;
                (
                    shooter.eye_position(),
                    shooter.yaw,
                    shooter.pitch,
                    shooter.weapon,
                )
            }
            None => return,
        };

        let stats = combat::weapon(weapon_index);
        let claimed = if input.timestamp.is_finite() {
            input.timestamp
        } else {
            now_ms
        };
        // Stale or future timestamps are clamped into the compensation
        // window, never rejected
        let rewind_t = claimed.clamp(now_ms - self.settings.max_lag_compensation_ms, now_ms);

        // Targets with no history yet (fresh spawn) simply cannot be hit
        let targets: Vec<RewoundTarget> = self
            .players
            .iter()
            .filter(|(id, player)| **id != shooter_id && !player.is_dead)
            .filter_map(|(id, player)| {
                player
                    .history
                    .sample(rewind_t)
                    .map(|position| RewoundTarget { id: *id, position })
            })
            .collect();

        let hits = combat::resolve_shot(
            shooter_id,
            eye,
            yaw,
            pitch,
            stats,
            &targets,
            &self.obstacles,
            &mut self.spread_rng,
        );

        for hit in hits {
            self.apply_hit(hit, now_ms);
        }
    }

    fn apply_hit(&mut self, hit: HitEvent, now_ms: f64) {
        let Some(target) = self.players.get_mut(&hit.target_id) else {
            return;
        };

        self.hit_events.push(hit);
        if target.is_dead {
            // Later pellets of the same volley; the kill already happened
            return;
        }

        target.health = target.health.saturating_sub(hit.damage);
        if target.health > 0 {
            return;
        }

        target.is_dead = true;
        target.deaths += 1;
        self.mode
            .on_player_death(target, Some(hit.shooter_id), now_ms);

        info!(
            room_id = self.id,
            shooter_id = hit.shooter_id,
            target_id = hit.target_id,
            headshot = hit.headshot,
            "kill"
        );

        if let Some(killer) = self.players.get_mut(&hit.shooter_id) {
            self.mode.on_player_kill(killer, hit.target_id, hit.headshot);
        }
    }

    fn process_respawns(&mut self, now_ms: f64) {
        let due: Vec<u16> = self
            .players
            .values()
            .filter(|p| p.is_dead && p.respawn_time > 0.0 && now_ms >= p.respawn_time)
            .map(|p| p.id)
            .collect();

        for id in due {
            let spawn = self.mode.spawn_position(id, &self.obstacles);
            if let Some(player) = self.players.get_mut(&id) {
                player.respawn(spawn);
                debug!(room_id = self.id, player_id = id, "respawned");
            }
        }
    }

    fn check_game_end(&mut self) {
        if !self.mode.should_end_game(&self.players) {
            return;
        }

        let winners = self.mode.winners(&self.players);
        info!(room_id = self.id, ?winners, "game over, resetting room");

        let ids: Vec<u16> = self.players.keys().copied().collect();
        for id in ids {
            let spawn = self.mode.spawn_position(id, &self.obstacles);
            if let Some(player) = self.players.get_mut(&id) {
                player.score = 0;
                player.kills = 0;
                player.deaths = 0;
                player.respawn(spawn);
            }
        }
        self.tick = 0;
        self.mode.on_game_reset();
    }

    /// Encode the shared world state once, then send each player their
    /// personalised copy (only the acked input sequence differs).
    fn broadcast(&mut self, now_ms: f64) {
        self.encoder
            .encode_shared(self.tick, now_ms, self.players.values(), &self.hit_events);

        for (id, out) in &self.outputs {
            let last = self
                .players
                .get(id)
                .map(|p| p.last_processed_input)
                .unwrap_or(0);
            let frame = self.encoder.personalized(last);
            // Send failures mean the socket is gone; the leave command
            // will clean up shortly
            let _ = out.send(frame);
        }
    }
}

fn sanitize_name(raw: String, id: u16) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return format!("Player_{id}");
    }
    let mut name = trimmed.to_string();
    if name.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Drive a room at its fixed tick rate until the last player leaves.
pub async fn run_room(
    mut room: Room,
    mut commands: mpsc::Receiver<RoomCommand>,
    player_count: Arc<AtomicUsize>,
) {
    let tick_duration = Duration::from_micros(1_000_000 / room.tick_rate() as u64);
    let mut interval = tokio::time::interval(tick_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(room_id = room.id(), "room started");
    let mut had_players = false;

    loop {
        interval.tick().await;

        loop {
            match commands.try_recv() {
                Ok(command) => {
                    room.apply_command(command);
                    let len = room.player_len();
                    player_count.store(len, Ordering::Relaxed);
                    if len > 0 {
                        had_players = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!(room_id = room.id(), "command channel closed");
                    return;
                }
            }
        }

        if room.player_len() > 0 {
            room.tick(server_now_ms());
        } else if had_players {
            break;
        }
    }

    info!(room_id = room.id(), "room closed");
}

/// Handle held by connection tasks and the registry
#[derive(Clone)]
pub struct RoomHandle {
    pub id: u32,
    commands: mpsc::Sender<RoomCommand>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub async fn queue_input(&self, player_id: u16, input: InputRecord) {
        let _ = self
            .commands
            .send(RoomCommand::Input { player_id, input })
            .await;
    }

    /// Remove the player, returning their final tally for persistence
    pub async fn leave(&self, player_id: u16) -> Option<PlayerTally> {
        let (tx, rx) = oneshot::channel();
        let command = RoomCommand::Leave {
            player_id,
            reply: Some(tx),
        };
        if self.commands.send(command).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    async fn try_join(
        &self,
        name: &str,
        out: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<u16, JoinError> {
        let (tx, rx) = oneshot::channel();
        let command = RoomCommand::Join {
            name: name.to_string(),
            out,
            reply: tx,
        };
        self.commands
            .send(command)
            .await
            .map_err(|_| JoinError::Unavailable)?;
        rx.await.map_err(|_| JoinError::Unavailable)?
    }
}

/// Registry of live rooms; places new connections round-robin into the
/// first non-full room in creation order.
pub struct RoomRegistry {
    config: Arc<Config>,
    rooms: Arc<DashMap<u32, RoomHandle>>,
    next_room_id: AtomicU32,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            rooms: Arc::new(DashMap::new()),
            next_room_id: AtomicU32::new(1),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Admit a connection: first non-full existing room wins, otherwise a
    /// new room is spawned, bounded by the configured room cap.
    pub async fn place(
        &self,
        name: &str,
        out: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(RoomHandle, u16), JoinError> {
        let mut handles: Vec<RoomHandle> =
            self.rooms.iter().map(|r| r.value().clone()).collect();
        handles.sort_by_key(|h| h.id);

        for handle in handles {
            if handle.player_count() >= self.config.max_players_per_room {
                continue;
            }
            match handle.try_join(name, out.clone()).await {
                Ok(player_id) => return Ok((handle, player_id)),
                // Raced a fill-up or a shutdown; try the next room
                Err(JoinError::RoomFull) | Err(JoinError::Unavailable) => continue,
                Err(e) => return Err(e),
            }
        }

        if self.rooms.len() >= self.config.max_rooms {
            warn!("all rooms full, rejecting join");
            return Err(JoinError::ServerFull);
        }

        let handle = self.spawn_room();
        let player_id = handle.try_join(name, out).await?;
        Ok((handle, player_id))
    }

    fn spawn_room(&self) -> RoomHandle {
        let id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id,
            commands: tx,
            player_count: player_count.clone(),
        };
        self.rooms.insert(id, handle.clone());

        let room = Room::new(
            id,
            RoomSettings::from_config(&self.config),
            Box::new(Deathmatch::new()),
        );

        let rooms = Arc::clone(&self.rooms);
        tokio::spawn(async move {
            run_room(room, rx, player_count).await;
            rooms.remove(&id);
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::WEAPONS;
    use crate::game::physics::PLAYER_HEIGHT;
    use crate::game::player::MAX_HEALTH;
    use crate::ws::protocol::{flags, SNAPSHOT_HEADER_LEN};
    use rand_chacha::ChaCha8Rng;

    fn settings() -> RoomSettings {
        RoomSettings {
            tick_rate: 60,
            max_players: 16,
            max_lag_compensation_ms: 400.0,
            map_seed: 0,
        }
    }

    fn empty_map_room() -> Room {
        let mode = Deathmatch::with_rng(ChaCha8Rng::seed_from_u64(1));
        let mut room = Room::new(1, settings(), Box::new(mode));
        room.set_spread_rng(ChaCha8Rng::seed_from_u64(2));
        // Flat arena: geometry-sensitive tests place their own obstacles
        room.obstacles.clear();
        room
    }

    fn join(room: &mut Room, name: &str) -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = room.join(name.to_string(), tx).unwrap();
        (id, rx)
    }

    /// Park a player on the ground at a fixed spot with a clean history
    fn place(room: &mut Room, id: u16, x: f32, z: f32) {
        let player = room.players.get_mut(&id).unwrap();
        player.position = Vec3 { x, y: 0.0, z };
        player.velocity = Vec3::ZERO;
        player.grounded = true;
        player.history.clear();
    }

    fn shoot_input(seq: u32, pitch: f32, weapon: u8, timestamp: f64) -> InputRecord {
        InputRecord {
            seq,
            flags: flags::SHOOT,
            weapon,
            yaw: 0.0,
            pitch,
            timestamp,
        }
    }

    /// Pitch that aims from an eye at the origin-player's eye height to
    /// the body center of a target `dist` units down +Z
    fn body_pitch(dist: f32) -> f32 {
        let eye_y = PLAYER_HEIGHT - 0.2;
        let body_y = PLAYER_HEIGHT / 2.0;
        ((eye_y - body_y) / dist).atan()
    }

    #[test]
    fn join_assigns_monotonic_ids_and_sends_welcome() {
        let mut room = empty_map_room();
        let (id_a, mut rx_a) = join(&mut room, "alice");
        let (id_b, _rx_b) = join(&mut room, "bob");

        assert_eq!(id_a, 1);
        assert_eq!(id_b, 2);

        let welcome = rx_a.try_recv().unwrap();
        assert_eq!(welcome[0], crate::ws::protocol::server_msg::WELCOME);
        assert_eq!(u16::from_le_bytes(welcome[1..3].try_into().unwrap()), 1);
    }

    #[test]
    fn full_room_rejects_joins() {
        let mut room = empty_map_room();
        for i in 0..16 {
            let _ = join(&mut room, &format!("p{i}"));
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            room.join("late".to_string(), tx),
            Err(JoinError::RoomFull)
        ));
    }

    #[test]
    fn empty_names_get_generated_ones() {
        let mut room = empty_map_room();
        let (id, _rx) = join(&mut room, "   ");
        assert_eq!(room.players[&id].name, format!("Player_{id}"));
    }

    #[test]
    fn snapshot_acks_last_drained_input() {
        let mut room = empty_map_room();
        let (id, mut rx) = join(&mut room, "alice");
        let _welcome = rx.try_recv().unwrap();

        for seq in [5u32, 6, 7] {
            room.queue_input(
                id,
                InputRecord {
                    seq,
                    flags: flags::FORWARD,
                    weapon: 0,
                    yaw: 0.0,
                    pitch: 0.0,
                    timestamp: 0.0,
                },
            );
        }
        room.tick(1000.0);

        assert_eq!(room.players[&id].last_processed_input, 7);
        assert!(room.players[&id].pending_inputs.is_empty());

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(u32::from_le_bytes(snapshot[15..19].try_into().unwrap()), 7);
        assert_eq!(snapshot[13], 1); // one player entry
        assert!(snapshot.len() >= SNAPSHOT_HEADER_LEN);
    }

    #[test]
    fn history_grows_once_per_tick() {
        let mut room = empty_map_room();
        let (id, _rx) = join(&mut room, "alice");
        place(&mut room, id, 0.0, 0.0);

        for t in 0..5 {
            room.tick(1000.0 + t as f64 * 16.0);
        }
        assert_eq!(room.players[&id].history.len(), 5);
    }

    #[test]
    fn rifle_shot_hits_and_damages() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        // Target needs history to be hittable
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now - 16.0,
        );

        room.queue_input(a, shoot_input(1, body_pitch(10.0), 2, now));
        room.tick(now);

        assert_eq!(room.hit_events().len(), 1);
        let hit = room.hit_events()[0];
        assert_eq!(hit.shooter_id, a);
        assert_eq!(hit.target_id, b);
        assert_eq!(hit.damage, 35);
        assert!(!hit.headshot);
        assert_eq!(room.players[&b].health, 65);
    }

    #[test]
    fn fresh_spawn_without_history_cannot_be_hit() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        room.queue_input(a, shoot_input(1, body_pitch(10.0), 2, 10_000.0));
        room.tick(10_000.0);

        assert!(room.hit_events().is_empty());
        assert_eq!(room.players[&b].health, MAX_HEALTH);
    }

    #[test]
    fn fire_rate_gate_drops_rapid_second_shot() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now - 16.0,
        );

        // Pistol fire rate is 400 ms; both inputs land on the same tick
        room.queue_input(a, shoot_input(1, body_pitch(10.0), 0, now));
        room.queue_input(a, shoot_input(2, body_pitch(10.0), 0, now));
        room.tick(now);

        assert_eq!(room.hit_events().len(), 1);
        assert_eq!(room.players[&b].health, MAX_HEALTH - WEAPONS[0].damage);
    }

    #[test]
    fn rewind_validates_shot_at_past_position() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        // B moved from z=5 to z=10 over the last 200 ms; A's client saw
        // them at z=5 and stamped the shot accordingly
        {
            let b_player = room.players.get_mut(&b).unwrap();
            b_player.history.push(
                Vec3 {
                    x: 0.0,
                    y: 0.0,
                    z: 5.0,
                },
                now - 200.0,
            );
            b_player.history.push(
                Vec3 {
                    x: 0.0,
                    y: 0.0,
                    z: 10.0,
                },
                now,
            );
        }

        room.queue_input(a, shoot_input(1, body_pitch(5.0), 2, now - 200.0));
        room.tick(now);

        assert_eq!(room.hit_events().len(), 1);
        assert_eq!(room.hit_events()[0].target_id, b);
    }

    #[test]
    fn aim_at_current_position_of_moved_target_misses() {
        // Same motion as above, but the shot aims where B used to be with
        // a fresh timestamp: rewind resolves to z=10 and the ray at the
        // z=5 drop angle passes under the body
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now,
        );

        room.queue_input(a, shoot_input(1, body_pitch(5.0), 2, now));
        room.tick(now);

        assert!(room.hit_events().is_empty());
    }

    #[test]
    fn ancient_timestamp_is_clamped_not_rejected() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        // Only sample is well inside the window; a clamped rewind to
        // now-400 still resolves to it
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now - 100.0,
        );

        room.queue_input(a, shoot_input(1, body_pitch(10.0), 2, now - 401.0));
        room.tick(now);

        assert_eq!(room.hit_events().len(), 1);
    }

    #[test]
    fn obstacle_between_players_blocks_the_shot() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);
        room.obstacles.push(Obstacle {
            x: 0.0,
            z: 5.0,
            width: 4.0,
            height: 5.0,
            depth: 1.0,
        });

        let now = 10_000.0;
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now - 16.0,
        );

        room.queue_input(a, shoot_input(1, body_pitch(10.0), 2, now));
        room.tick(now);

        assert!(room.hit_events().is_empty());
        assert_eq!(room.players[&b].health, MAX_HEALTH);
    }

    #[test]
    fn shotgun_point_blank_kills_with_one_death_transition() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 1.0);

        let now = 10_000.0;
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            },
            now - 16.0,
        );

        room.queue_input(a, shoot_input(1, body_pitch(1.0), 3, now));
        room.tick(now);

        assert_eq!(room.hit_events().len(), 8);
        let total: u32 = room.hit_events().iter().map(|h| h.damage as u32).sum();
        assert_eq!(total, 8 * 15);

        let victim = &room.players[&b];
        assert_eq!(victim.health, 0);
        assert!(victim.is_dead);
        assert_eq!(victim.deaths, 1);
        assert!(victim.respawn_time > now);

        let shooter = &room.players[&a];
        assert_eq!(shooter.kills, 1);
        assert_eq!(shooter.score, 1);
    }

    #[test]
    fn dead_players_neither_move_nor_shoot_but_still_ack() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 10.0);

        let now = 10_000.0;
        {
            let a_player = room.players.get_mut(&a).unwrap();
            a_player.is_dead = true;
            a_player.respawn_time = now + 5_000.0;
        }
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 10.0,
            },
            now - 16.0,
        );

        let mut input = shoot_input(9, body_pitch(10.0), 2, now);
        input.flags |= flags::FORWARD;
        room.queue_input(a, input);
        room.tick(now);

        let dead = &room.players[&a];
        assert_eq!(dead.position.z, 0.0);
        assert_eq!(dead.last_processed_input, 9);
        assert!(room.hit_events().is_empty());
    }

    #[test]
    fn due_respawn_restores_player_by_tick_end() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        place(&mut room, a, 0.0, 0.0);

        let now = 10_000.0;
        {
            let player = room.players.get_mut(&a).unwrap();
            player.is_dead = true;
            player.health = 0;
            player.respawn_time = now - 1.0;
        }

        room.tick(now);

        let player = &room.players[&a];
        assert!(!player.is_dead);
        assert_eq!(player.health, MAX_HEALTH);
        assert_eq!(player.respawn_time, 0.0);
        assert_eq!(player.position.y, 5.0);
    }

    #[test]
    fn score_limit_resets_room_state() {
        let mode = Deathmatch::with_rng(ChaCha8Rng::seed_from_u64(1)).score_limit(1);
        let mut room = Room::new(1, settings(), Box::new(mode));
        room.set_spread_rng(ChaCha8Rng::seed_from_u64(2));
        room.obstacles.clear();

        let (a, _rx_a) = join(&mut room, "alice");
        let (b, _rx_b) = join(&mut room, "bob");
        place(&mut room, a, 0.0, 0.0);
        place(&mut room, b, 0.0, 1.0);

        let now = 10_000.0;
        room.players.get_mut(&b).unwrap().history.push(
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 1.0,
            },
            now - 16.0,
        );

        room.queue_input(a, shoot_input(1, body_pitch(1.0), 3, now));
        room.tick(now);

        // Shotgun kill reached the score limit: everything reset
        assert_eq!(room.tick, 0);
        for player in room.players.values() {
            assert_eq!(player.score, 0);
            assert_eq!(player.kills, 0);
            assert_eq!(player.deaths, 0);
            assert!(!player.is_dead);
            assert_eq!(player.health, MAX_HEALTH);
        }
    }

    #[test]
    fn leave_drops_pending_inputs_and_returns_tally() {
        let mut room = empty_map_room();
        let (a, _rx_a) = join(&mut room, "alice");
        {
            let player = room.players.get_mut(&a).unwrap();
            player.kills = 3;
            player.deaths = 2;
        }
        room.queue_input(a, shoot_input(1, 0.0, 0, 0.0));

        let tally = room.leave(a).unwrap();
        assert_eq!(tally.kills, 3);
        assert_eq!(tally.deaths, 2);
        assert!(room.players.is_empty());
        assert!(room.leave(a).is_none());
    }

    #[test]
    fn identical_setups_produce_identical_snapshots() {
        let build = || {
            let mode = Deathmatch::with_rng(ChaCha8Rng::seed_from_u64(1));
            let mut room = Room::new(1, settings(), Box::new(mode));
            room.set_spread_rng(ChaCha8Rng::seed_from_u64(9));
            let (tx, rx) = mpsc::unbounded_channel();
            let id = room.join("alice".to_string(), tx).unwrap();
            room.queue_input(
                id,
                InputRecord {
                    seq: 1,
                    flags: flags::FORWARD | flags::SHOOT,
                    weapon: 3,
                    yaw: 0.5,
                    pitch: 0.1,
                    timestamp: 900.0,
                },
            );
            room.tick(1000.0);
            (room, rx)
        };

        let (_room1, mut rx1) = build();
        let (_room2, mut rx2) = build();

        let _ = rx1.try_recv().unwrap(); // welcome
        let _ = rx2.try_recv().unwrap();
        let snap1 = rx1.try_recv().unwrap();
        let snap2 = rx2.try_recv().unwrap();
        assert_eq!(snap1, snap2);
    }
}
