//! Prelude module for common tilescape types and traits
//!
//! Re-exports the most commonly used types, traits, and functions for easy
//! importing with `use tilescape::prelude::*;`

pub use crate::core::{
    bounds::Bounds,
    constants,
    crs::{Crs, Projection, Transformation},
    geo::{LatLng, LatLngBounds, Point},
};

pub use crate::map::{
    animation::{EasingType, FlyPath, Lerp, PanAnimation, ZoomAnimation},
    events::{EventBus, EventEnvelope, IdAllocator, ListenerId, LocationErrorCode, MapEvent},
    options::MapOptions,
    scheduler::{FrameHandle, FrameScheduler, ManualScheduler},
    FitBoundsOptions, FixedSize, Locator, Map, SizeProvider, ViewOptions,
};

pub use crate::layers::{
    grid::{
        FixedTileSource, GridOptions, Level, LoaderConfig, Tile, TileCoord, TileDataCache,
        TileGrid, TileLoader, TileSource,
    },
    vector::{BoundsProvider, Projectable, Projector, Renderable, Shape, VectorRenderer},
};

#[cfg(feature = "http-source")]
pub use crate::layers::grid::HttpTileSource;

pub use crate::{MapError, Result};

pub use std::{sync::Arc, time::Duration};

/// Wasm-safe monotonic clock, used as the engine-wide time type.
pub use instant::Instant;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
