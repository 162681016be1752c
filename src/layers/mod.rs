pub mod grid;
pub mod vector;

pub use grid::TileGrid;
pub use vector::VectorRenderer;
