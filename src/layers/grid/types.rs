//! Core data types for the tile-grid engine.

use crate::core::constants::{
    CHILD_SEARCH_DEPTH, DEFAULT_KEEP_BUFFER, PARENT_SEARCH_DEPTH, TILE_FADE_MS, TILE_SIZE,
};
use crate::core::geo::{LatLngBounds, Point};
use crate::prelude::{Arc, Duration, Instant};
use serde::{Deserialize, Serialize};

/// Integer tile address in the slippy-map pyramid. `x`/`y` are signed so that
/// pre-wrap addresses (negative, or beyond the antimeridian copy) survive
/// until placement; the cache always keys on wrapped addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: i32, y: i32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Cache key. Injective over the practical integer range since each
    /// component is delimited.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.x, self.y, self.z)
    }

    /// Inverse of [`TileCoord::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.split(':');
        let x = parts.next()?.parse().ok()?;
        let y = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { x, y, z })
    }

    /// The containing tile one zoom level down, or `None` at the pyramid root.
    /// Arithmetic shift keeps the floor-division semantics for negative x.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            None
        } else {
            Some(TileCoord::new(self.x >> 1, self.y >> 1, self.z - 1))
        }
    }

    /// The four tiles covering this one at the next zoom level.
    pub fn children(&self) -> [TileCoord; 4] {
        let (x, y, z) = (self.x * 2, self.y * 2, self.z + 1);
        [
            TileCoord::new(x, y, z),
            TileCoord::new(x + 1, y, z),
            TileCoord::new(x, y + 1, z),
            TileCoord::new(x + 1, y + 1, z),
        ]
    }
}

/// One cache entry in the grid. Placement uses the unwrapped `coords`; the
/// factory and the data cache see the `wrapped` address.
#[derive(Debug, Clone)]
pub struct Tile {
    pub coords: TileCoord,
    pub wrapped: TileCoord,
    pub data: Option<Arc<Vec<u8>>>,
    /// Still within the desired visible range.
    pub current: bool,
    /// Fully faded in and eligible for pruning decisions.
    pub active: bool,
    /// Protected from pruning this cycle (parent/child fallback).
    pub retain: bool,
    pub loaded: Option<Instant>,
    pub opacity: f64,
    pub error: bool,
    /// Request generation; stale loader completions are dropped against it.
    pub generation: u64,
}

impl Tile {
    pub fn placeholder(coords: TileCoord, wrapped: TileCoord, generation: u64) -> Self {
        Self {
            coords,
            wrapped,
            data: None,
            current: true,
            active: false,
            retain: false,
            loaded: None,
            opacity: 0.0,
            error: false,
            generation,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn mark_loaded(&mut self, data: Arc<Vec<u8>>, at: Instant) {
        self.data = Some(data);
        self.loaded = Some(at);
        self.error = false;
    }

    pub fn mark_error(&mut self, placeholder: Option<Arc<Vec<u8>>>, at: Instant) {
        self.data = placeholder;
        self.loaded = Some(at);
        self.error = true;
    }
}

/// One tile-pyramid layer per integer zoom level seen since the last full
/// reset. Translated/scaled against the displayed continuous zoom so tiles
/// keep their place during zoom animation without re-fetching.
#[derive(Debug, Clone)]
pub struct Level {
    pub zoom: u8,
    /// World-pixel origin at the level's native zoom, fixed at creation.
    pub origin: Point,
    pub scale: f64,
    pub translation: Point,
}

impl Level {
    pub fn new(zoom: u8, origin: Point) -> Self {
        Self {
            zoom,
            origin,
            scale: 1.0,
            translation: Point::new(0.0, 0.0),
        }
    }

    pub fn set_transform(&mut self, scale: f64, translation: Point) {
        self.scale = scale;
        self.translation = translation;
    }

    /// Screen position of a world-pixel coordinate at this level's native zoom.
    pub fn to_screen(&self, world: &Point) -> Point {
        world.subtract(&self.origin).multiply(self.scale).add(&self.translation)
    }
}

/// Tile-grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOptions {
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Extra tile margin kept around the visible range to reduce pop-in.
    pub keep_buffer: i32,
    /// How many levels toward lower zoom the prune pass searches for a
    /// loaded parent before falling back to children.
    pub parent_search_depth: u8,
    /// How many levels toward higher zoom the prune pass searches for
    /// loaded children.
    pub child_search_depth: u8,
    /// Whether intermediate zoom-animation frames retarget the grid.
    pub update_when_zooming: bool,
    /// Suppress longitude wrapping even when the CRS declares a wrap range.
    pub no_wrap: bool,
    /// Optional geographic restriction: tiles outside never load.
    pub bounds: Option<LatLngBounds>,
    pub fade_duration: Duration,
    /// Placeholder payload substituted when a tile fails to load.
    pub error_tile: Option<Vec<u8>>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            min_zoom: 0,
            max_zoom: 18,
            keep_buffer: DEFAULT_KEEP_BUFFER,
            parent_search_depth: PARENT_SEARCH_DEPTH,
            child_search_depth: CHILD_SEARCH_DEPTH,
            update_when_zooming: true,
            no_wrap: false,
            bounds: None,
            fade_duration: Duration::from_millis(TILE_FADE_MS),
            error_tile: None,
        }
    }
}
