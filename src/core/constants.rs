//! Engine-wide constants derived from common web-map conventions.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Equatorial earth radius in meters (WGS84), shared by both mercator variants.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Polar earth radius in meters (WGS84), used by the elliptical mercator projection.
pub const EARTH_RADIUS_MINOR: f64 = 6_356_752.314_245_179;

/// Latitude at which the spherical mercator y coordinate would diverge.
pub const MAX_LATITUDE: f64 = 85.051_128_779_8;

/// Snap zoom levels to these quanta (1 → integer zooms).
pub const DEFAULT_ZOOM_SNAP: f64 = 1.0;

/// Programmatic +/- zoom step when calling `zoom_in`/`zoom_out`.
pub const DEFAULT_ZOOM_DELTA: f64 = 1.0;

/// Do not animate a zoom if the delta exceeds this many levels.
pub const ZOOM_ANIMATION_THRESHOLD: f64 = 4.0;

/// Extra tile margin retained beyond the visible viewport.
pub const DEFAULT_KEEP_BUFFER: i32 = 2;

/// How many zoom levels upward the prune pass searches for a loaded parent.
pub const PARENT_SEARCH_DEPTH: u8 = 5;

/// How many zoom levels downward the prune pass searches for loaded children.
pub const CHILD_SEARCH_DEPTH: u8 = 2;

/// Tile fade-in duration in milliseconds.
pub const TILE_FADE_MS: u64 = 200;

/// Steepness of the fly-to velocity curve.
pub const FLY_RHO: f64 = 1.42;
