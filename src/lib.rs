//! # tilescape
//!
//! A slippy-map engine core inspired by Leaflet: a coordinate/projection
//! stack, a tile-grid pyramid engine, and a view-state controller with
//! ordered lifecycle events.
//!
//! Rendering backends, DOM concerns, and input gesture recognition are
//! external collaborators: the engine computes *what* is visible and *where*
//! it goes, hosts draw it and feed pointer state back through the view API.

pub mod core;
pub mod layers;
pub mod map;
pub mod prelude;
pub mod runtime;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    bounds::Bounds,
    crs::{Crs, Projection, Transformation},
    geo::{LatLng, LatLngBounds, Point},
};

pub use crate::map::{events::MapEvent, options::MapOptions, Map, ViewOptions};

pub use crate::layers::{
    grid::{GridOptions, TileCoord, TileGrid, TileSource},
    vector::{Shape, VectorRenderer},
};

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http-source")]
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing view configuration: programmer misuse, not a
    /// runtime condition to recover from.
    #[error("Invalid view: {0}")]
    InvalidView(String),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    /// Numeric degeneracy in the tile pipeline; failing fast beats an
    /// unbounded tile fetch loop.
    #[error("Invalid tile range: {0}")]
    InvalidTileRange(String),

    #[error("Tile load failed: {0}")]
    TileLoad(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;
