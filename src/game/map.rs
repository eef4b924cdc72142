//! Deterministic obstacle field generation
//!
//! Clients rebuild the map locally from the seed in the welcome message,
//! so the draw order below is a wire-level contract: five PRNG draws per
//! obstacle (width, height, depth, x, z), then four boundary walls in
//! fixed order.

/// Side length of the square play area
pub const MAP_SIZE: f32 = 50.0;

/// Number of randomly placed obstacles per map
pub const OBSTACLE_COUNT: usize = 40;

const WALL_THICKNESS: f32 = 1.0;
const WALL_HEIGHT: f32 = 5.0;

/// Axis-aligned box obstacle. The base always sits on the ground plane
/// (y = 0); `x`/`z` are the footprint center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub x: f32,
    pub z: f32,
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl Obstacle {
    /// Clamp a point in the XZ plane to this obstacle's footprint
    pub fn closest_xz(&self, px: f32, pz: f32) -> (f32, f32) {
        let hw = self.width / 2.0;
        let hd = self.depth / 2.0;
        (
            px.clamp(self.x - hw, self.x + hw),
            pz.clamp(self.z - hd, self.z + hd),
        )
    }

    /// Whether a world-space point lies inside the box
    pub fn contains(&self, px: f32, py: f32, pz: f32) -> bool {
        (px - self.x).abs() <= self.width / 2.0
            && (pz - self.z).abs() <= self.depth / 2.0
            && py >= 0.0
            && py <= self.height
    }
}

/// Linear congruential generator shared verbatim with the client.
///
/// Hand-rolled on purpose: both sides must produce bit-identical draw
/// sequences, which rules out depending on any library's stream layout.
pub struct MapRng {
    state: u64,
}

impl MapRng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: seed as u64,
        }
    }

    /// Next draw in [0, 1)
    pub fn next(&mut self) -> f32 {
        self.state = (self.state.wrapping_mul(1_103_515_245).wrapping_add(12_345)) & 0x7FFF_FFFF;
        self.state as f32 / 0x7FFF_FFFF as f32
    }
}

/// Generate the obstacle field for a seed: OBSTACLE_COUNT random boxes
/// followed by the four boundary walls (north, south, east, west).
pub fn generate_obstacles(seed: u32) -> Vec<Obstacle> {
    let mut rng = MapRng::new(seed);
    let mut obstacles = Vec::with_capacity(OBSTACLE_COUNT + 4);

    for _ in 0..OBSTACLE_COUNT {
        let width = 1.0 + rng.next() * 4.0;
        let height = 2.0 + rng.next() * 6.0;
        let depth = 1.0 + rng.next() * 4.0;
        let x = (rng.next() - 0.5) * (MAP_SIZE - width);
        let z = (rng.next() - 0.5) * (MAP_SIZE - depth);

        obstacles.push(Obstacle {
            x,
            z,
            width,
            height,
            depth,
        });
    }

    let half = MAP_SIZE / 2.0;
    // North / south walls run along X, east / west along Z
    obstacles.push(wall(0.0, half, MAP_SIZE, WALL_THICKNESS));
    obstacles.push(wall(0.0, -half, MAP_SIZE, WALL_THICKNESS));
    obstacles.push(wall(half, 0.0, WALL_THICKNESS, MAP_SIZE));
    obstacles.push(wall(-half, 0.0, WALL_THICKNESS, MAP_SIZE));

    obstacles
}

fn wall(x: f32, z: f32, width: f32, depth: f32) -> Obstacle {
    Obstacle {
        x,
        z,
        width,
        height: WALL_HEIGHT,
        depth,
    }
}
