//! Tile-grid engine: pyramid bookkeeping, viewport-to-tile-range
//! computation, load queueing, and the retain/prune lifecycle.

pub mod cache;
pub mod layer;
pub mod loader;
pub mod source;
pub mod types;

pub use cache::TileDataCache;
pub use layer::TileGrid;
pub use loader::{LoaderConfig, TileLoadResult, TileLoader};
#[cfg(feature = "http-source")]
pub use source::HttpTileSource;
pub use source::{FixedTileSource, TileSource};
pub use types::{GridOptions, Level, Tile, TileCoord};
