use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hex::HexCoord;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    #[default]
    Plains,
    Forest,
    Mountain,
    Water,
}

impl Terrain {
    pub fn as_str(self) -> &'static str {
        match self {
            Terrain::Plains => "plains",
            Terrain::Forest => "forest",
            Terrain::Mountain => "mountain",
            Terrain::Water => "water",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "plains" => Some(Terrain::Plains),
            "forest" => Some(Terrain::Forest),
            "mountain" => Some(Terrain::Mountain),
            "water" => Some(Terrain::Water),
            _ => None,
        }
    }

    pub fn is_passable(self) -> bool {
        matches!(self, Terrain::Plains | Terrain::Forest)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Tile {
    pub terrain: Terrain,
}

impl Tile {
    pub fn new(terrain: Terrain) -> Self {
        Self { terrain }
    }

    pub fn is_passable(&self) -> bool {
        self.terrain.is_passable()
    }
}

/// Sparse hex map. Coordinates without an entry have no tile at all.
#[derive(Clone, Debug, Default)]
pub struct WorldStore {
    tiles: HashMap<HexCoord, Tile>,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filled hexagon of plains around the origin.
    pub fn hexagon(radius: u32) -> Self {
        let mut world = Self::new();
        world.fill_hexagon(HexCoord::ORIGIN, radius, Terrain::Plains);
        world
    }

    pub fn get_tile(&self, coord: HexCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    pub fn tile_exists(&self, coord: HexCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn set_tile(&mut self, coord: HexCoord, tile: Tile) -> Option<Tile> {
        self.tiles.insert(coord, tile)
    }

    pub fn remove_tile(&mut self, coord: HexCoord) -> Option<Tile> {
        self.tiles.remove(&coord)
    }

    pub fn fill_hexagon(&mut self, center: HexCoord, radius: u32, terrain: Terrain) {
        for coord in center.within(radius) {
            self.tiles.insert(coord, Tile::new(terrain));
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_lookup_reports_missing_tiles() {
        let mut world = WorldStore::hexagon(1);
        assert_eq!(world.len(), 7);
        assert!(world.tile_exists(HexCoord::new(1, -1)));
        assert!(world.get_tile(HexCoord::new(2, 0)).is_none());

        world.set_tile(HexCoord::new(2, 0), Tile::new(Terrain::Water));
        let tile = world.get_tile(HexCoord::new(2, 0)).copied();
        assert_eq!(tile, Some(Tile::new(Terrain::Water)));
        assert!(!tile.is_some_and(|t| t.is_passable()));

        assert!(world.remove_tile(HexCoord::ORIGIN).is_some());
        assert!(!world.tile_exists(HexCoord::ORIGIN));
    }

    #[test]
    fn terrain_labels_round_trip() {
        for terrain in [
            Terrain::Plains,
            Terrain::Forest,
            Terrain::Mountain,
            Terrain::Water,
        ] {
            assert_eq!(Terrain::from_label(terrain.as_str()), Some(terrain));
        }
        assert_eq!(Terrain::from_label(" Forest "), Some(Terrain::Forest));
        assert_eq!(Terrain::from_label("lava"), None);
    }
}
