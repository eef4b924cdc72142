//! Movement and collision kernel
//!
//! The step function is shared contract with client-side prediction: one
//! input applied equals one fixed-dt integration step, and the X/Z/Y
//! axis-separated resolution order is what produces wall sliding on both
//! sides.

use crate::game::map::{Obstacle, MAP_SIZE};
use crate::game::player::Player;
use crate::game::Vec3;
use crate::ws::protocol::InputRecord;

pub const GRAVITY: f32 = 20.0;
pub const MOVE_SPEED: f32 = 5.0;
pub const SPRINT_MULTIPLIER: f32 = 1.6;
pub const SNEAK_MULTIPLIER: f32 = 0.5;
pub const JUMP_FORCE: f32 = 8.0;
pub const PLAYER_RADIUS: f32 = 0.4;
pub const PLAYER_HEIGHT: f32 = 1.8;

/// Maximum pitch magnitude (slightly under straight up/down)
pub const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.1;

/// Ray-march step for line-of-sight tests. Coarse on purpose; the client
/// reproduces the same granularity.
const RAY_STEP: f32 = 0.5;

/// Test whether a player standing at (x, y, z) intersects any obstacle.
///
/// The player is an XZ disc of PLAYER_RADIUS swept over [y, y + height]:
/// clamp the center to the obstacle footprint, compare squared distance,
/// then require the vertical intervals to overlap.
pub fn collides_at(x: f32, y: f32, z: f32, obstacles: &[Obstacle]) -> bool {
    for obstacle in obstacles {
        let (cx, cz) = obstacle.closest_xz(x, z);
        let dx = x - cx;
        let dz = z - cz;
        if dx * dx + dz * dz < PLAYER_RADIUS * PLAYER_RADIUS
            && y < obstacle.height
            && y + PLAYER_HEIGHT > 0.0
        {
            return true;
        }
    }
    false
}

/// Apply an input's look direction and movement flags to the player.
///
/// Horizontal velocity is set directly from the flags (no momentum), so a
/// replayed input always yields the same velocity regardless of what came
/// before it.
pub fn apply_movement_input(player: &mut Player, input: &InputRecord) {
    player.yaw = input.yaw;
    player.pitch = input.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);

    let mut dx = 0.0_f32;
    let mut dz = 0.0_f32;
    if input.forward() {
        dz += 1.0;
    }
    if input.backward() {
        dz -= 1.0;
    }
    if input.right() {
        dx += 1.0;
    }
    if input.left() {
        dx -= 1.0;
    }

    let len = (dx * dx + dz * dz).sqrt();
    if len > 0.0 {
        dx /= len;
        dz /= len;
    }

    // Rotate local direction into world space around the Y axis
    let (sin_yaw, cos_yaw) = player.yaw.sin_cos();
    let wx = dx * cos_yaw + dz * sin_yaw;
    let wz = -dx * sin_yaw + dz * cos_yaw;

    // Sprint wins over sneak when both are held
    let speed = MOVE_SPEED
        * if input.sprint() {
            SPRINT_MULTIPLIER
        } else if input.sneak() {
            SNEAK_MULTIPLIER
        } else {
            1.0
        };

    player.velocity.x = wx * speed;
    player.velocity.z = wz * speed;

    if input.jump() && player.grounded {
        player.velocity.y = JUMP_FORCE;
        player.grounded = false;
    }

    player.weapon = input.weapon.min(3);
    player.is_shooting = input.shoot();
}

/// Integrate one fixed timestep with axis-separated collision resolution.
pub fn step(player: &mut Player, dt: f32, obstacles: &[Obstacle]) {
    player.velocity.y -= GRAVITY * dt;

    let pos = player.position;
    let vel = player.velocity;
    let mut new_x = pos.x + vel.x * dt;
    let mut new_y = pos.y + vel.y * dt;
    let mut new_z = pos.z + vel.z * dt;

    // X and Z are each tested against the pre-step values of the other
    // axes; reverting one axis while the other survives is what makes
    // players slide along walls instead of sticking to them.
    if collides_at(new_x, pos.y, pos.z, obstacles) {
        new_x = pos.x;
        player.velocity.x = 0.0;
    }
    if collides_at(pos.x, pos.y, new_z, obstacles) {
        new_z = pos.z;
        player.velocity.z = 0.0;
    }

    if new_y <= 0.0 {
        new_y = 0.0;
        player.velocity.y = 0.0;
        player.grounded = true;
    } else if collides_at(new_x, new_y, new_z, obstacles) {
        new_y = pos.y;
        player.velocity.y = 0.0;
    }

    let limit = MAP_SIZE / 2.0 - PLAYER_RADIUS;
    player.position = Vec3 {
        x: new_x.clamp(-limit, limit),
        y: new_y,
        z: new_z.clamp(-limit, limit),
    };
}

/// March a ray against the obstacle field and the ground plane.
///
/// Fixed 0.5-unit steps; the reported distance is quantized to the step
/// that first landed inside geometry. Returns None if nothing is hit
/// within `max_distance`.
pub fn ray_obstacle_distance(
    origin: Vec3,
    dir: Vec3,
    max_distance: f32,
    obstacles: &[Obstacle],
) -> Option<f32> {
    let mut step_index = 1u32;
    loop {
        let d = step_index as f32 * RAY_STEP;
        if d > max_distance {
            return None;
        }
        let px = origin.x + dir.x * d;
        let py = origin.y + dir.y * d;
        let pz = origin.z + dir.z * d;

        if py < 0.0 || obstacles.iter().any(|o| o.contains(px, py, pz)) {
            return Some(d);
        }
        step_index += 1;
    }
}

/// Analytic ray-vs-sphere intersection.
///
/// Returns the smaller non-negative root when it lies inside the open
/// interval [0, max_distance), otherwise None. `dir` must be unit length.
pub fn ray_sphere_distance(
    origin: Vec3,
    dir: Vec3,
    center: Vec3,
    radius: f32,
    max_distance: f32,
) -> Option<f32> {
    let oc = Vec3 {
        x: origin.x - center.x,
        y: origin.y - center.y,
        z: origin.z - center.z,
    };
    let b = 2.0 * (oc.x * dir.x + oc.y * dir.y + oc.z * dir.z);
    let c = oc.x * oc.x + oc.y * oc.y + oc.z * oc.z - radius * radius;
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        return None;
    }

    let sqrt_d = discriminant.sqrt();
    let t_near = (-b - sqrt_d) / 2.0;
    let t_far = (-b + sqrt_d) / 2.0;
    let t = if t_near >= 0.0 {
        t_near
    } else if t_far >= 0.0 {
        t_far
    } else {
        return None;
    };

    (t < max_distance).then_some(t)
}
