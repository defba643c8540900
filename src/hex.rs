use serde::{Deserialize, Serialize};

/// Axial hex coordinate. The implicit third cube axis is `s = -q - r`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct HexCoord {
    pub q: i32,
    pub r: i32,
}

/// Neighbor offsets, direction 0 is east and the rest follow counter-clockwise:
/// east, north-east, north-west, west, south-west, south-east.
pub const HEX_DIRECTIONS: [HexCoord; 6] = [
    HexCoord::new(1, 0),
    HexCoord::new(1, -1),
    HexCoord::new(0, -1),
    HexCoord::new(-1, 0),
    HexCoord::new(-1, 1),
    HexCoord::new(0, 1),
];

impl HexCoord {
    pub const ORIGIN: HexCoord = HexCoord::new(0, 0);

    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    pub fn s(self) -> i64 {
        -(self.q as i64) - (self.r as i64)
    }

    /// Hex-grid distance in steps. Symmetric, zero only for equal coordinates.
    pub fn distance(self, other: HexCoord) -> u64 {
        let dq = (self.q as i64 - other.q as i64).unsigned_abs();
        let dr = (self.r as i64 - other.r as i64).unsigned_abs();
        let ds = (self.s() - other.s()).unsigned_abs();
        (dq + dr + ds) / 2
    }

    pub fn neighbor(self, direction: usize) -> HexCoord {
        let offset = HEX_DIRECTIONS[direction % HEX_DIRECTIONS.len()];
        HexCoord::new(
            self.q.saturating_add(offset.q),
            self.r.saturating_add(offset.r),
        )
    }

    pub fn neighbors(self) -> [HexCoord; 6] {
        std::array::from_fn(|direction| self.neighbor(direction))
    }

    /// Every coordinate within `radius` steps, ordered by `q` then `r`.
    /// Cells that would fall outside the `i32` range are left out.
    pub fn within(self, radius: u32) -> Vec<HexCoord> {
        let radius = i64::from(radius);
        let mut out = Vec::new();
        for dq in -radius..=radius {
            let Ok(q) = i32::try_from(i64::from(self.q) + dq) else {
                continue;
            };
            let lo = (-radius).max(-dq - radius);
            let hi = radius.min(-dq + radius);
            for dr in lo..=hi {
                if let Ok(r) = i32::try_from(i64::from(self.r) + dr) {
                    out.push(HexCoord::new(q, r));
                }
            }
        }
        out
    }
}

impl std::fmt::Display for HexCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}
