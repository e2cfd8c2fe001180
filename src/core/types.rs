//! Core type aliases, coordinates and re-exports

use std::fmt;

use serde::{Deserialize, Serialize};

pub use glam::{IVec2, Vec2};

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Axis-aligned integer rectangle in world units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub origin: IVec2,
    pub size: IVec2,
}

impl Rect {
    pub fn new(origin: IVec2, size: IVec2) -> Self {
        Self { origin, size }
    }

    /// Exclusive upper corner.
    pub fn end(&self) -> IVec2 {
        self.origin + self.size
    }

    pub fn center(&self) -> Vec2 {
        self.origin.as_vec2() + self.size.as_vec2() * 0.5
    }

    pub fn contains(&self, p: Vec2) -> bool {
        let min = self.origin.as_vec2();
        let max = self.end().as_vec2();
        p.x >= min.x && p.y >= min.y && p.x < max.x && p.y < max.y
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        let a_end = self.end();
        let b_end = other.end();
        self.origin.x < b_end.x
            && other.origin.x < a_end.x
            && self.origin.y < b_end.y
            && other.origin.y < a_end.y
    }
}

/// Detail level of a tile generation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetailLevel {
    /// Low resolution preview, generated first
    Draft,
    /// Full resolution result
    Main,
}

impl DetailLevel {
    pub const ALL: [DetailLevel; 2] = [DetailLevel::Draft, DetailLevel::Main];

    pub fn index(self) -> usize {
        match self {
            DetailLevel::Draft => 0,
            DetailLevel::Main => 1,
        }
    }
}

/// Grid coordinate of a terrain tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// World-space rectangle covered by this tile.
    pub fn rect(&self, tile_size: i32) -> Rect {
        Rect::new(IVec2::new(self.x, self.z) * tile_size, IVec2::splat(tile_size))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile({}, {})", self.x, self.z)
    }
}

/// Grid coordinate of a shared cluster cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterCoord {
    pub x: i32,
    pub z: i32,
}

impl ClusterCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// World-space rectangle covered by this cell.
    pub fn rect(&self, cell_size: i32) -> Rect {
        Rect::new(IVec2::new(self.x, self.z) * cell_size, IVec2::splat(cell_size))
    }

    /// All cells overlapping `rect`, row-major. Empty for a non-positive
    /// cell size.
    pub fn covering(rect: &Rect, cell_size: i32) -> Vec<ClusterCoord> {
        if cell_size <= 0 {
            return Vec::new();
        }
        let min = IVec2::new(
            rect.origin.x.div_euclid(cell_size),
            rect.origin.y.div_euclid(cell_size),
        );
        let end = rect.end() - IVec2::ONE;
        let max = IVec2::new(end.x.div_euclid(cell_size), end.y.div_euclid(cell_size));

        let mut cells = Vec::new();
        for z in min.y..=max.y {
            for x in min.x..=max.x {
                cells.push(ClusterCoord::new(x, z));
            }
        }
        cells
    }
}

impl fmt::Display for ClusterCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster({}, {})", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_rect() {
        let rect = TileCoord::new(-1, 2).rect(100);
        assert_eq!(rect.origin, IVec2::new(-100, 200));
        assert_eq!(rect.end(), IVec2::new(0, 300));
    }

    #[test]
    fn test_covering_single_cell() {
        let rect = TileCoord::new(1, 1).rect(100);
        let cells = ClusterCoord::covering(&rect, 500);
        assert_eq!(cells, vec![ClusterCoord::new(0, 0)]);
    }

    #[test]
    fn test_covering_straddles_cells() {
        let rect = Rect::new(IVec2::new(-50, 450), IVec2::new(100, 100));
        let cells = ClusterCoord::covering(&rect, 500);
        assert_eq!(cells.len(), 4);
        assert!(cells.contains(&ClusterCoord::new(-1, 0)));
        assert!(cells.contains(&ClusterCoord::new(0, 1)));
    }

    #[test]
    fn test_covering_zero_cell_size_is_empty() {
        let rect = TileCoord::new(0, 0).rect(100);
        assert!(ClusterCoord::covering(&rect, 0).is_empty());
        assert!(ClusterCoord::covering(&rect, -10).is_empty());
    }

    #[test]
    fn test_rect_intersects() {
        let a = Rect::new(IVec2::ZERO, IVec2::splat(10));
        let b = Rect::new(IVec2::splat(9), IVec2::splat(10));
        let c = Rect::new(IVec2::splat(10), IVec2::splat(10));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
