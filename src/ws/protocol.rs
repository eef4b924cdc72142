//! Binary wire protocol
//!
//! Little-endian, fixed-width fields throughout. Every layout here is a
//! contract with the client's decoder; changing an offset is a protocol
//! break. Snapshot encoding reuses one scratch buffer per room so the
//! broadcast path does not grow the heap with player count.

use crate::game::combat::HitEvent;
use crate::game::player::Player;

/// Client-to-server message types (first byte of each frame)
pub mod client_msg {
    pub const JOIN: u8 = 1;
    pub const INPUT: u8 = 2;
    pub const PING: u8 = 3;
}

/// Server-to-client message types
pub mod server_msg {
    pub const WELCOME: u8 = 1;
    pub const SNAPSHOT: u8 = 2;
}

/// Input flag bits, LSB first
pub mod flags {
    pub const FORWARD: u8 = 1 << 0;
    pub const BACKWARD: u8 = 1 << 1;
    pub const LEFT: u8 = 1 << 2;
    pub const RIGHT: u8 = 1 << 3;
    pub const JUMP: u8 = 1 << 4;
    pub const SPRINT: u8 = 1 << 5;
    pub const SNEAK: u8 = 1 << 6;
    pub const SHOOT: u8 = 1 << 7;
}

/// `[type][seq u32][flags u8][weapon u8][yaw f32][pitch f32][timestamp f64]`
pub const INPUT_FRAME_LEN: usize = 23;
/// `[type][clientTime f64]`
pub const PING_FRAME_LEN: usize = 9;
/// `[type][playerId u16][tickRate u8][mapSeed u32]`
pub const WELCOME_FRAME_LEN: usize = 8;

pub const SNAPSHOT_HEADER_LEN: usize = 19;
pub const PLAYER_ENTRY_LEN: usize = 40;
pub const HIT_ENTRY_LEN: usize = 6;

/// Offset of the per-recipient `lastProcessedInput` field in the header
const LAST_INPUT_OFFSET: usize = 15;

/// Snapshot hit list is capped at this many entries per tick
pub const MAX_HITS_PER_SNAPSHOT: usize = 16;

/// Scratch sizing: headroom for twice the player cap plus the hit cap
const SCRATCH_CAPACITY: usize =
    SNAPSHOT_HEADER_LEN + 32 * PLAYER_ENTRY_LEN + MAX_HITS_PER_SNAPSHOT * HIT_ENTRY_LEN;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("name length {len} exceeds payload of {got} bytes")]
    NameOverrun { len: usize, got: usize },
}

/// One frame of player input as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRecord {
    pub seq: u32,
    pub flags: u8,
    pub weapon: u8,
    pub yaw: f32,
    pub pitch: f32,
    /// Client wall-clock milliseconds; clamped server-side before use
    pub timestamp: f64,
}

impl InputRecord {
    pub fn forward(&self) -> bool {
        self.flags & flags::FORWARD != 0
    }
    pub fn backward(&self) -> bool {
        self.flags & flags::BACKWARD != 0
    }
    pub fn left(&self) -> bool {
        self.flags & flags::LEFT != 0
    }
    pub fn right(&self) -> bool {
        self.flags & flags::RIGHT != 0
    }
    pub fn jump(&self) -> bool {
        self.flags & flags::JUMP != 0
    }
    pub fn sprint(&self) -> bool {
        self.flags & flags::SPRINT != 0
    }
    pub fn sneak(&self) -> bool {
        self.flags & flags::SNEAK != 0
    }
    pub fn shoot(&self) -> bool {
        self.flags & flags::SHOOT != 0
    }
}

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Join { name: String },
    Input(InputRecord),
    /// Ping payloads are echoed verbatim, so the decoded form carries
    /// nothing; the handler answers with the original bytes.
    Ping,
}

fn require(buf: &[u8], need: usize) -> Result<(), CodecError> {
    if buf.len() < need {
        return Err(CodecError::Truncated {
            need,
            got: buf.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().expect("bounds checked"))
}

fn read_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(buf[at..at + 4].try_into().expect("bounds checked"))
}

fn read_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(buf[at..at + 8].try_into().expect("bounds checked"))
}

/// Decode a client frame. Trailing bytes beyond a message's fixed layout
/// are ignored; clients have been observed padding input frames.
pub fn decode_client(buf: &[u8]) -> Result<ClientFrame, CodecError> {
    require(buf, 1)?;
    match buf[0] {
        client_msg::JOIN => {
            require(buf, 2)?;
            let len = buf[1] as usize;
            if buf.len() < 2 + len {
                return Err(CodecError::NameOverrun {
                    len,
                    got: buf.len(),
                });
            }
            let name = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
            Ok(ClientFrame::Join { name })
        }
        client_msg::INPUT => {
            require(buf, INPUT_FRAME_LEN)?;
            Ok(ClientFrame::Input(InputRecord {
                seq: read_u32(buf, 1),
                flags: buf[5],
                weapon: buf[6],
                yaw: read_f32(buf, 7),
                pitch: read_f32(buf, 11),
                timestamp: read_f64(buf, 15),
            }))
        }
        client_msg::PING => {
            require(buf, PING_FRAME_LEN)?;
            Ok(ClientFrame::Ping)
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

/// Encode a join frame (native clients and tests)
pub fn encode_join(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    let mut buf = Vec::with_capacity(2 + len);
    buf.push(client_msg::JOIN);
    buf.push(len as u8);
    buf.extend_from_slice(&bytes[..len]);
    buf
}

pub fn encode_input(input: &InputRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INPUT_FRAME_LEN);
    buf.push(client_msg::INPUT);
    buf.extend_from_slice(&input.seq.to_le_bytes());
    buf.push(input.flags);
    buf.push(input.weapon);
    buf.extend_from_slice(&input.yaw.to_le_bytes());
    buf.extend_from_slice(&input.pitch.to_le_bytes());
    buf.extend_from_slice(&input.timestamp.to_le_bytes());
    buf
}

pub fn encode_ping(client_time: f64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PING_FRAME_LEN);
    buf.push(client_msg::PING);
    buf.extend_from_slice(&client_time.to_le_bytes());
    buf
}

pub fn encode_welcome(player_id: u16, tick_rate: u8, map_seed: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(WELCOME_FRAME_LEN);
    buf.push(server_msg::WELCOME);
    buf.extend_from_slice(&player_id.to_le_bytes());
    buf.push(tick_rate);
    buf.extend_from_slice(&map_seed.to_le_bytes());
    buf
}

/// Per-room snapshot encoder.
///
/// The world state is encoded once per tick into the scratch buffer with a
/// zeroed `lastProcessedInput`; `personalized` then patches that one field
/// and hands out the recipient's copy.
pub struct SnapshotEncoder {
    buf: Vec<u8>,
}

impl SnapshotEncoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    pub fn encode_shared<'a, P>(&mut self, tick: u32, server_time: f64, players: P, hits: &[HitEvent])
    where
        P: IntoIterator<Item = &'a Player>,
        P::IntoIter: ExactSizeIterator,
    {
        let players = players.into_iter();
        let hit_count = hits.len().min(MAX_HITS_PER_SNAPSHOT);

        self.buf.clear();
        self.buf.push(server_msg::SNAPSHOT);
        self.buf.extend_from_slice(&tick.to_le_bytes());
        self.buf.extend_from_slice(&server_time.to_le_bytes());
        self.buf.push(players.len() as u8);
        self.buf.push(hit_count as u8);
        // Patched per recipient in `personalized`
        self.buf.extend_from_slice(&0u32.to_le_bytes());

        for player in players {
            self.buf.extend_from_slice(&player.id.to_le_bytes());
            self.buf.extend_from_slice(&player.position.x.to_le_bytes());
            self.buf.extend_from_slice(&player.position.y.to_le_bytes());
            self.buf.extend_from_slice(&player.position.z.to_le_bytes());
            self.buf.extend_from_slice(&player.velocity.x.to_le_bytes());
            self.buf.extend_from_slice(&player.velocity.y.to_le_bytes());
            self.buf.extend_from_slice(&player.velocity.z.to_le_bytes());
            self.buf.extend_from_slice(&player.yaw.to_le_bytes());
            self.buf.extend_from_slice(&player.pitch.to_le_bytes());
            self.buf.push(player.health);
            self.buf.push(player.weapon);
            self.buf.push(player.is_shooting as u8);
            self.buf.push(player.is_dead as u8);
            self.buf.extend_from_slice(&player.score.to_le_bytes());
        }

        for hit in &hits[..hit_count] {
            self.buf.extend_from_slice(&hit.shooter_id.to_le_bytes());
            self.buf.extend_from_slice(&hit.target_id.to_le_bytes());
            self.buf.push(hit.damage);
            self.buf.push(hit.headshot as u8);
        }
    }

    /// Stamp the recipient's acknowledged input sequence and return their
    /// copy of the frame.
    pub fn personalized(&mut self, last_processed_input: u32) -> Vec<u8> {
        self.buf[LAST_INPUT_OFFSET..LAST_INPUT_OFFSET + 4]
            .copy_from_slice(&last_processed_input.to_le_bytes());
        self.buf.clone()
    }
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}
