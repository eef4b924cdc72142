//! Weapons and server-side hit validation

use rand::Rng;

use crate::game::map::Obstacle;
use crate::game::physics::{self, PLAYER_HEIGHT, PLAYER_RADIUS};
use crate::game::Vec3;

/// Head hitbox radius; the head center sits this far below the top of the
/// player capsule
pub const HEAD_HEIGHT: f32 = 0.3;

/// Body hitbox radius
pub const BODY_RADIUS: f32 = PLAYER_RADIUS * 1.5;

/// Fixed weapon table; indices are the wire contract
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    pub name: &'static str,
    pub damage: u8,
    pub fire_rate_ms: f64,
    pub range: f32,
    pub spread: f32,
    pub bullets: u8,
}

pub static WEAPONS: [WeaponStats; 4] = [
    WeaponStats {
        name: "pistol",
        damage: 25,
        fire_rate_ms: 400.0,
        range: 100.0,
        spread: 0.02,
        bullets: 1,
    },
    WeaponStats {
        name: "smg",
        damage: 15,
        fire_rate_ms: 100.0,
        range: 50.0,
        spread: 0.08,
        bullets: 1,
    },
    WeaponStats {
        name: "rifle",
        damage: 35,
        fire_rate_ms: 150.0,
        range: 150.0,
        spread: 0.01,
        bullets: 1,
    },
    WeaponStats {
        name: "shotgun",
        damage: 15,
        fire_rate_ms: 800.0,
        range: 20.0,
        spread: 0.15,
        bullets: 8,
    },
];

/// Look up a weapon by wire index; out-of-range indices fall back to the
/// pistol rather than faulting the tick loop.
pub fn weapon(index: u8) -> &'static WeaponStats {
    WEAPONS.get(index as usize).unwrap_or(&WEAPONS[0])
}

/// A validated hit, recorded per bullet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitEvent {
    pub shooter_id: u16,
    pub target_id: u16,
    pub damage: u8,
    pub headshot: bool,
}

/// A candidate target rewound to the shot's compensated timestamp
#[derive(Debug, Clone, Copy)]
pub struct RewoundTarget {
    pub id: u16,
    pub position: Vec3,
}

/// View-ray direction from yaw/pitch; positive pitch looks down.
pub fn aim_direction(yaw: f32, pitch: f32) -> Vec3 {
    let (sin_yaw, cos_yaw) = yaw.sin_cos();
    let (sin_pitch, cos_pitch) = pitch.sin_cos();
    Vec3 {
        x: sin_yaw * cos_pitch,
        y: -sin_pitch,
        z: cos_yaw * cos_pitch,
    }
}

/// Resolve every bullet of one shot against the rewound targets.
///
/// Per bullet: perturb the aim by the weapon's spread, find the nearest
/// head-or-body sphere intersection within range, then confirm no obstacle
/// sits in front of it. Spread comes from a non-deterministic RNG so a
/// client cannot precompute pellet patterns; tests pass a seeded one.
pub fn resolve_shot<R: Rng>(
    shooter_id: u16,
    eye: Vec3,
    yaw: f32,
    pitch: f32,
    stats: &WeaponStats,
    targets: &[RewoundTarget],
    obstacles: &[Obstacle],
    rng: &mut R,
) -> Vec<HitEvent> {
    let mut hits = Vec::new();
    let base_dir = aim_direction(yaw, pitch);

    for _ in 0..stats.bullets {
        let dir = if stats.spread > 0.0 {
            let half = stats.spread / 2.0;
            let perturbed = Vec3 {
                x: base_dir.x + rng.gen_range(-half..half),
                y: base_dir.y + rng.gen_range(-half..half),
                z: base_dir.z + rng.gen_range(-half..half),
            };
            match perturbed.normalized() {
                Some(d) => d,
                // Degenerate after perturbation: the bullet misses
                None => continue,
            }
        } else {
            base_dir
        };

        let mut nearest: Option<(f32, u16, bool)> = None;
        for target in targets {
            let head_center = Vec3 {
                x: target.position.x,
                y: target.position.y + PLAYER_HEIGHT - HEAD_HEIGHT,
                z: target.position.z,
            };
            let body_center = Vec3 {
                x: target.position.x,
                y: target.position.y + PLAYER_HEIGHT / 2.0,
                z: target.position.z,
            };

            // The spheres overlap; a headshot is a ray that crosses the
            // head surface before the body surface, so both distances are
            // needed before deciding which one the bullet reached
            let head =
                physics::ray_sphere_distance(eye, dir, head_center, HEAD_HEIGHT, stats.range);
            let body =
                physics::ray_sphere_distance(eye, dir, body_center, BODY_RADIUS, stats.range);
            let candidate = match (head, body) {
                (Some(h), Some(b)) if b < h => Some((b, false)),
                (Some(h), _) => Some((h, true)),
                (None, Some(b)) => Some((b, false)),
                (None, None) => None,
            };

            if let Some((d, headshot)) = candidate {
                if nearest.map_or(true, |(best, _, _)| d < best) {
                    nearest = Some((d, target.id, headshot));
                }
            }
        }

        if let Some((distance, target_id, headshot)) = nearest {
            if physics::ray_obstacle_distance(eye, dir, distance, obstacles).is_some() {
                // Geometry in front of the target: bullet is blocked
                continue;
            }
            let damage = if headshot {
                stats.damage.saturating_mul(2)
            } else {
                stats.damage
            };
            hits.push(HitEvent {
                shooter_id,
                target_id,
                damage,
                headshot,
            });
        }
    }

    hits
}
