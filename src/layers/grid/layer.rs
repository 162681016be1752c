//! The tile-grid engine: decides the minimal, centered, priority-ordered set
//! of tiles for the current view, and reclaims tiles no longer needed
//! without visible flicker.

use crate::core::bounds::Bounds;
use crate::core::crs::Crs;
use crate::core::geo::{LatLng, LatLngBounds, Point};
use crate::layers::grid::cache::TileDataCache;
use crate::layers::grid::loader::{LoaderConfig, TileLoader};
use crate::layers::grid::source::TileSource;
use crate::layers::grid::types::{GridOptions, Level, Tile, TileCoord};
use crate::map::events::{EventBus, IdAllocator, ListenerId, MapEvent};
use crate::prelude::{Arc, Duration, HashMap, Instant};
use crate::{MapError, Result};
use std::sync::Mutex;

/// Tile-grid engine. Owns the tile cache and pyramid levels exclusively;
/// other layers observe it through events and read-only accessors.
pub struct TileGrid {
    options: GridOptions,
    crs: Crs,
    source: Arc<dyn TileSource>,
    loader: TileLoader,
    data_cache: TileDataCache,
    /// Cache of live tiles, keyed by the wrapped coordinate key.
    tiles: HashMap<String, Tile>,
    levels: HashMap<u8, Level>,
    tile_zoom: Option<u8>,
    center: LatLng,
    map_zoom: f64,
    size: Point,
    loading: bool,
    generations: IdAllocator,
    events: Arc<EventBus>,
    global_tile_range: Option<(Point, Point)>,
    wrap_x: Option<(i32, i32)>,
    wrap_y: Option<(i32, i32)>,
}

impl TileGrid {
    pub fn new(crs: Crs, source: Arc<dyn TileSource>, size: Point, options: GridOptions) -> Self {
        Self::with_loader_config(crs, source, size, options, LoaderConfig::default())
    }

    pub fn with_loader_config(
        crs: Crs,
        source: Arc<dyn TileSource>,
        size: Point,
        options: GridOptions,
        loader_config: LoaderConfig,
    ) -> Self {
        Self {
            options,
            crs,
            source,
            loader: TileLoader::new(loader_config),
            data_cache: TileDataCache::default(),
            tiles: HashMap::default(),
            levels: HashMap::default(),
            tile_zoom: None,
            center: LatLng::default(),
            map_zoom: 0.0,
            size,
            loading: false,
            generations: IdAllocator::new(),
            events: EventBus::new(),
            wrap_x: None,
            wrap_y: None,
            global_tile_range: None,
        }
    }

    // --- accessors ---------------------------------------------------------

    pub fn options(&self) -> &GridOptions {
        &self.options
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Re-fires this grid's tile events on a parent bus (usually the map's).
    pub fn set_event_parent(&self, parent: &Arc<EventBus>) {
        self.events.add_parent(parent);
    }

    pub fn tile_zoom(&self) -> Option<u8> {
        self.tile_zoom
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, key: &str) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn level(&self, zoom: u8) -> Option<&Level> {
        self.levels.get(&zoom)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn pending_loads(&self) -> usize {
        self.loader.pending_count()
    }

    /// Screen position and on-screen size for a tile, derived from its
    /// unwrapped coordinate and the pyramid-level transform.
    pub fn tile_position(&self, tile: &Tile) -> Option<(Point, f64)> {
        let level = self.levels.get(&tile.coords.z)?;
        let ts = self.options.tile_size as f64;
        let world = Point::new(tile.coords.x as f64 * ts, tile.coords.y as f64 * ts);
        Some((level.to_screen(&world), ts * level.scale))
    }

    // --- event wiring ------------------------------------------------------

    /// Subscribes a shared grid to the view-lifecycle events it consumes.
    pub fn subscribe(
        grid: &Arc<Mutex<TileGrid>>,
        map: &crate::map::Map,
    ) -> Vec<(&'static str, ListenerId)> {
        ["viewprereset", "viewreset", "zoom", "zoomanim", "moveend", "resize"]
            .into_iter()
            .map(|name| {
                let grid = grid.clone();
                let id = map.on(name, move |env| {
                    let mut grid = grid.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(error) = grid.handle_event(env.event) {
                        log::warn!("tile grid update failed: {}", error);
                    }
                });
                (name, id)
            })
            .collect()
    }

    /// Routes one view-lifecycle event into the grid.
    pub fn handle_event(&mut self, event: &MapEvent) -> Result<()> {
        match event {
            MapEvent::ViewPreReset => {
                self.invalidate_all();
                Ok(())
            }
            MapEvent::ViewReset { center, zoom } | MapEvent::MoveEnd { center, zoom } => {
                self.set_view(*center, *zoom, false, false)
            }
            MapEvent::Zoom { center, zoom } => self.set_view(*center, *zoom, true, false),
            MapEvent::ZoomAnim { center, zoom } => self.set_view(*center, *zoom, true, true),
            MapEvent::Resize { new_size, .. } => {
                self.size = *new_size;
                self.set_view(self.center, self.map_zoom, false, false)
            }
            _ => Ok(()),
        }
    }

    // --- view targeting ----------------------------------------------------

    /// Retargets the grid at a view. `no_prune` defers reclamation (animation
    /// frames), `no_update` limits the work to level transforms unless the
    /// integer tile zoom actually changed.
    pub fn set_view(
        &mut self,
        center: LatLng,
        zoom: f64,
        no_prune: bool,
        no_update: bool,
    ) -> Result<()> {
        if !center.is_finite() || !zoom.is_finite() {
            return Err(MapError::InvalidTileRange(format!(
                "non-finite view: center={:?} zoom={}",
                center, zoom
            )));
        }
        self.center = center;
        self.map_zoom = zoom;

        let new_tile_zoom = self.clamp_zoom(zoom);

        // A jump of more than one pyramid level renders two wildly different
        // resolutions at once; tear down and rebuild instead.
        if let (Some(old), Some(new)) = (self.tile_zoom, new_tile_zoom) {
            if (new as i16 - old as i16).abs() > 1 {
                self.invalidate_all();
            }
        }

        let tile_zoom_changed =
            self.options.update_when_zooming && new_tile_zoom != self.tile_zoom;

        if !no_update || tile_zoom_changed {
            self.tile_zoom = new_tile_zoom;
            self.update_levels();
            self.reset_grid();
            if new_tile_zoom.is_some() {
                self.update(center)?;
            }
            if !no_prune {
                self.prune_tiles();
            }
        }

        self.set_zoom_transforms(&center, zoom);
        Ok(())
    }

    /// Integer pyramid zoom for a continuous map zoom, or `None` when the
    /// grid should hide entirely.
    fn clamp_zoom(&self, zoom: f64) -> Option<u8> {
        let rounded = zoom.round();
        if rounded < self.options.min_zoom as f64 || rounded > self.options.max_zoom as f64 {
            None
        } else {
            Some(rounded as u8)
        }
    }

    /// Discards pyramid levels that hold no tiles and are not the active
    /// zoom, and lazily creates the active level.
    fn update_levels(&mut self) {
        let Some(tile_zoom) = self.tile_zoom else {
            return;
        };

        let zooms: Vec<u8> = self.levels.keys().copied().collect();
        for z in zooms {
            let has_tiles = self.tiles.values().any(|t| t.coords.z == z);
            if z != tile_zoom && !has_tiles {
                log::debug!("discarding empty pyramid level {}", z);
                self.levels.remove(&z);
            }
        }

        let origin = self
            .crs
            .lat_lng_to_point(&self.center, tile_zoom as f64)
            .floor();
        self.levels
            .entry(tile_zoom)
            .or_insert_with(|| Level::new(tile_zoom, origin));
    }

    /// Recomputes wrap ranges and the valid world tile range at the active
    /// tile zoom.
    fn reset_grid(&mut self) {
        let Some(tile_zoom) = self.tile_zoom else {
            self.global_tile_range = None;
            self.wrap_x = None;
            self.wrap_y = None;
            return;
        };
        let tz = tile_zoom as f64;
        let ts = self.options.tile_size as f64;

        self.global_tile_range = self
            .crs
            .pixel_world_bounds(tz)
            .map(|b| Self::tile_range_unchecked(&b, ts));

        self.wrap_x = match (self.crs.wrap_lng, self.options.no_wrap) {
            (Some((min, max)), false) => Some((
                (self.crs.lat_lng_to_point(&LatLng::new(0.0, min), tz).x / ts).floor() as i32,
                (self.crs.lat_lng_to_point(&LatLng::new(0.0, max), tz).x / ts).ceil() as i32,
            )),
            _ => None,
        };
        self.wrap_y = match (self.crs.wrap_lat, self.options.no_wrap) {
            (Some((min, max)), false) => Some((
                (self.crs.lat_lng_to_point(&LatLng::new(min, 0.0), tz).y / ts).floor() as i32,
                (self.crs.lat_lng_to_point(&LatLng::new(max, 0.0), tz).y / ts).ceil() as i32,
            )),
            _ => None,
        };
    }

    /// Updates pyramid-level transforms against the displayed continuous
    /// zoom, keeping loaded tiles in place during zoom animation.
    fn set_zoom_transforms(&mut self, center: &LatLng, zoom: f64) {
        let size = self.size;
        for level in self.levels.values_mut() {
            let scale = self.crs.scale(zoom) / self.crs.scale(level.zoom as f64);
            let center_px = self.crs.lat_lng_to_point(center, level.zoom as f64);
            let translation = size
                .multiply(0.5)
                .subtract(&center_px.subtract(&level.origin).multiply(scale));
            level.set_transform(scale, translation);
        }
    }

    // --- the update algorithm ----------------------------------------------

    /// Recomputes the wanted tile range around `center` at the active tile
    /// zoom, marks out-of-range tiles non-current, and enqueues missing
    /// tiles nearest-first.
    pub fn update(&mut self, center: LatLng) -> Result<()> {
        let Some(tile_zoom) = self.tile_zoom else {
            return Ok(());
        };
        self.center = center;

        let pixel_bounds = self.tiled_pixel_bounds(&center);
        let (range_min, range_max) = self.px_bounds_to_tile_range(&pixel_bounds)?;
        let tile_center = Point::new(
            (range_min.x + range_max.x) / 2.0,
            (range_min.y + range_max.y) / 2.0,
        );

        let kb = self.options.keep_buffer as f64;
        let keep_min = range_min.subtract(&Point::new(kb, kb));
        let keep_max = range_max.add(&Point::new(kb, kb));

        for tile in self.tiles.values_mut() {
            let c = tile.coords;
            if c.z != tile_zoom
                || (c.x as f64) < keep_min.x
                || (c.x as f64) > keep_max.x
                || (c.y as f64) < keep_min.y
                || (c.y as f64) > keep_max.y
            {
                tile.current = false;
            }
        }

        // Several enumerated coordinates can wrap onto one cache entry; the
        // first copy claims the entry's placement for this pass.
        let mut claimed: crate::prelude::HashSet<String> = crate::prelude::HashSet::default();
        let mut queue: Vec<TileCoord> = Vec::new();
        for y in (range_min.y as i32)..=(range_max.y as i32) {
            for x in (range_min.x as i32)..=(range_max.x as i32) {
                let coords = TileCoord::new(x, y, tile_zoom);
                if !self.is_valid_tile(&coords) {
                    continue;
                }
                let wrapped = self.wrap_coords(&coords);
                let key = wrapped.key();
                match self.tiles.get_mut(&key) {
                    Some(tile) => {
                        tile.current = true;
                        if claimed.insert(key) {
                            tile.coords = coords;
                        }
                    }
                    None => queue.push(coords),
                }
            }
        }

        // Nearest tiles load first; they are the ones visible immediately.
        queue.sort_by(|a, b| {
            let da = (a.x as f64 - tile_center.x).powi(2) + (a.y as f64 - tile_center.y).powi(2);
            let db = (b.x as f64 - tile_center.x).powi(2) + (b.y as f64 - tile_center.y).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

        if !queue.is_empty() {
            if !self.loading {
                self.loading = true;
                self.fire(MapEvent::GridLoading);
            }
            for coords in queue {
                self.add_tile(coords);
            }
        }
        Ok(())
    }

    /// Viewport pixel rectangle at the active tile zoom, scaled by the ratio
    /// between continuous and tile zoom.
    fn tiled_pixel_bounds(&self, center: &LatLng) -> Bounds {
        let tile_zoom = self.tile_zoom.unwrap_or(0) as f64;
        let scale = self.crs.scale(self.map_zoom) / self.crs.scale(tile_zoom);
        let pixel_center = self.crs.lat_lng_to_point(center, tile_zoom).floor();
        let half = Point::new(self.size.x / (scale * 2.0), self.size.y / (scale * 2.0));
        Bounds::new(pixel_center.subtract(&half), pixel_center.add(&half))
    }

    /// Inclusive tile index range covering a pixel rectangle. A non-finite
    /// rectangle indicates a corrupt projection/zoom combination upstream
    /// and fails hard rather than enumerating unbounded tiles.
    fn px_bounds_to_tile_range(&self, bounds: &Bounds) -> Result<(Point, Point)> {
        if !bounds.is_finite() {
            return Err(MapError::InvalidTileRange(format!(
                "non-finite pixel bounds {:?}",
                bounds
            )));
        }
        Ok(Self::tile_range_unchecked(
            bounds,
            self.options.tile_size as f64,
        ))
    }

    fn tile_range_unchecked(bounds: &Bounds, tile_size: f64) -> (Point, Point) {
        (
            bounds.min.divide(tile_size).floor(),
            bounds
                .max
                .divide(tile_size)
                .ceil()
                .subtract(&Point::new(1.0, 1.0)),
        )
    }

    /// Whether a tile coordinate may load: inside the world range on axes
    /// the CRS does not wrap, and intersecting the optional geographic
    /// restriction.
    fn is_valid_tile(&self, coords: &TileCoord) -> bool {
        if !self.crs.infinite {
            if let Some((min, max)) = &self.global_tile_range {
                if (self.wrap_x.is_none()
                    && ((coords.x as f64) < min.x || (coords.x as f64) > max.x))
                    || (self.wrap_y.is_none()
                        && ((coords.y as f64) < min.y || (coords.y as f64) > max.y))
                {
                    return false;
                }
            }
        }

        match &self.options.bounds {
            None => true,
            Some(bounds) => bounds.overlaps(&self.tile_bounds(coords)),
        }
    }

    /// Geographic rectangle covered by a tile.
    pub fn tile_bounds(&self, coords: &TileCoord) -> LatLngBounds {
        let ts = self.options.tile_size as f64;
        let zoom = coords.z as f64;
        let nw_px = Point::new(coords.x as f64 * ts, coords.y as f64 * ts);
        let se_px = Point::new(nw_px.x + ts, nw_px.y + ts);
        let nw = self.crs.point_to_lat_lng(&nw_px, zoom);
        let se = self.crs.point_to_lat_lng(&se_px, zoom);
        LatLngBounds::new(nw, se)
    }

    fn wrap_coords(&self, coords: &TileCoord) -> TileCoord {
        TileCoord::new(
            match self.wrap_x {
                Some(range) => wrap_int(coords.x, range),
                None => coords.x,
            },
            match self.wrap_y {
                Some(range) => wrap_int(coords.y, range),
                None => coords.y,
            },
            coords.z,
        )
    }

    /// Inserts a placeholder cache entry and requests its payload, serving
    /// straight from the data cache when possible.
    fn add_tile(&mut self, coords: TileCoord) {
        let wrapped = self.wrap_coords(&coords);
        let key = wrapped.key();
        // The queue is sorted nearest-first, so when two world copies share
        // a wrapped key the closer copy has already claimed it.
        if self.tiles.contains_key(&key) {
            return;
        }
        let generation = self.generations.next_id();
        let mut tile = Tile::placeholder(coords, wrapped, generation);

        if let Some(data) = self.data_cache.get(&wrapped) {
            tile.mark_loaded(data, Instant::now());
            self.tiles.insert(key, tile);
            self.fire(MapEvent::TileLoad { coords });
        } else {
            self.tiles.insert(key, tile);
            self.loader.request(self.source.clone(), wrapped, generation);
            self.fire(MapEvent::TileLoadStart { coords });
        }
    }

    // --- load completion / fade / prune ------------------------------------

    /// Drains loader completions and advances fades. Hosts call this from
    /// their frame pump. Completions for evicted or superseded entries are
    /// dropped (their payloads still warm the data cache).
    pub fn process_results(&mut self, now: Instant) {
        let results = self.loader.try_recv();
        let mut fired: Vec<MapEvent> = Vec::new();

        for result in results {
            let key = result.coords.key();
            let Some(tile) = self.tiles.get_mut(&key) else {
                if let Ok(data) = result.data {
                    self.data_cache.put(result.coords, data);
                }
                continue;
            };
            if tile.generation != result.generation {
                continue;
            }

            match result.data {
                Ok(data) => {
                    self.data_cache.put(result.coords, data.clone());
                    tile.mark_loaded(data, now);
                    fired.push(MapEvent::TileLoad {
                        coords: tile.coords,
                    });
                }
                Err(error) => {
                    log::warn!("failed to load tile {}: {}", key, error);
                    let placeholder = self.options.error_tile.clone().map(Arc::new);
                    let coords = tile.coords;
                    tile.mark_error(placeholder, now);
                    fired.push(MapEvent::TileError {
                        coords,
                        message: error.to_string(),
                    });
                }
            }
        }

        for event in fired {
            self.fire(event);
        }
        self.update_fades(now);
    }

    /// Ramps tile opacity toward 1 over the fade duration; a fully faded
    /// tile becomes `active` and newly active tiles trigger a prune.
    fn update_fades(&mut self, now: Instant) {
        let fade = self.options.fade_duration;
        let mut newly_active = false;

        for tile in self.tiles.values_mut() {
            let Some(loaded) = tile.loaded else {
                continue;
            };
            let elapsed = if now > loaded {
                now - loaded
            } else {
                Duration::from_secs(0)
            };
            let t = if fade.as_secs_f64() <= 0.0 {
                1.0
            } else {
                (elapsed.as_secs_f64() / fade.as_secs_f64()).min(1.0)
            };
            tile.opacity = t;
            if t >= 1.0 && !tile.active {
                tile.active = true;
                newly_active = true;
            }
        }

        if newly_active {
            self.prune_tiles();
        }
        if self.loading && !self.tiles.values().any(|t| t.current && !t.is_loaded()) {
            self.loading = false;
            self.fire(MapEvent::GridLoad);
        }
    }

    /// Reclaims tiles superseded by the current range. A current-but-not-yet
    /// -active tile first tries to retain a loaded ancestor (coarser but
    /// complete imagery wins), then loaded descendants, both depth-bounded.
    pub fn prune_tiles(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.retain = tile.current;
        }

        let gaps: Vec<TileCoord> = self
            .tiles
            .values()
            .filter(|t| t.current && !t.active)
            .map(|t| t.wrapped)
            .collect();

        for wrapped in gaps {
            let min_z = wrapped.z as i16 - self.options.parent_search_depth as i16;
            if !self.retain_parent(wrapped.x, wrapped.y, wrapped.z as i16, min_z) {
                let max_z = wrapped.z as i16 + self.options.child_search_depth as i16;
                self.retain_children(wrapped.x, wrapped.y, wrapped.z as i16, max_z);
            }
        }

        let removed: Vec<String> = self
            .tiles
            .iter()
            .filter(|(_, tile)| !tile.retain)
            .map(|(key, _)| key.clone())
            .collect();
        for key in removed {
            self.remove_tile(&key);
        }

        // A level emptied by the prune and no longer the active zoom is
        // torn down with it.
        let active = self.tile_zoom;
        let zooms: Vec<u8> = self.levels.keys().copied().collect();
        for z in zooms {
            if Some(z) != active && !self.tiles.values().any(|t| t.coords.z == z) {
                log::debug!("discarding empty pyramid level {}", z);
                self.levels.remove(&z);
            }
        }
    }

    fn retain_parent(&mut self, x: i32, y: i32, z: i16, min_z: i16) -> bool {
        let z2 = z - 1;
        if z2 < 0 {
            return false;
        }
        let (x2, y2) = (x >> 1, y >> 1);

        if let Some(tile) = self.tiles.get_mut(&TileCoord::new(x2, y2, z2 as u8).key()) {
            if tile.active {
                tile.retain = true;
                return true;
            } else if tile.is_loaded() {
                tile.retain = true;
            }
        }

        if z2 > min_z {
            return self.retain_parent(x2, y2, z2, min_z);
        }
        false
    }

    fn retain_children(&mut self, x: i32, y: i32, z: i16, max_z: i16) {
        for i in (2 * x)..(2 * x + 2) {
            for j in (2 * y)..(2 * y + 2) {
                let child_z = z + 1;
                if let Some(tile) = self
                    .tiles
                    .get_mut(&TileCoord::new(i, j, child_z as u8).key())
                {
                    if tile.active {
                        tile.retain = true;
                        continue;
                    } else if tile.is_loaded() {
                        tile.retain = true;
                    }
                }
                if child_z < max_z {
                    self.retain_children(i, j, child_z, max_z);
                }
            }
        }
    }

    fn remove_tile(&mut self, key: &str) {
        if let Some(tile) = self.tiles.remove(key) {
            self.fire(MapEvent::TileUnload {
                coords: tile.coords,
            });
        }
    }

    /// Full teardown: every tile unloads, every level is discarded. The next
    /// `set_view` rebuilds from scratch.
    pub fn invalidate_all(&mut self) {
        let keys: Vec<String> = self.tiles.keys().cloned().collect();
        for key in keys {
            self.remove_tile(&key);
        }
        self.levels.clear();
        self.tile_zoom = None;
        self.loading = false;
    }

    fn fire(&self, event: MapEvent) {
        self.events.fire(&event, true);
    }
}

/// Integer modular wrap into `[min, max)`.
fn wrap_int(x: i32, (min, max): (i32, i32)) -> i32 {
    let d = max - min;
    if d <= 0 {
        return x;
    }
    ((x - min).rem_euclid(d)) + min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::grid::source::FixedTileSource;

    fn make_grid(size: Point, options: GridOptions) -> TileGrid {
        TileGrid::with_loader_config(
            Crs::epsg3857(),
            Arc::new(FixedTileSource::new()),
            size,
            options,
            LoaderConfig::for_testing(),
        )
    }

    fn pump(grid: &mut TileGrid, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while grid.pending_loads() > 0 && Instant::now() < deadline {
            grid.process_results(Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
        grid.process_results(Instant::now());
    }

    fn settle(grid: &mut TileGrid) {
        pump(grid, Duration::from_secs(5));
        // Jump past the fade so every loaded tile becomes active.
        grid.process_results(Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_viewport_tile_range_centered() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();

        // 512px viewport at zoom 2 covers a 2×2 block centered on the origin.
        assert_eq!(grid.tile_count(), 4);
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            assert!(
                grid.tile(&TileCoord::new(x, y, 2).key()).is_some(),
                "missing tile {}:{}",
                x,
                y
            );
        }
    }

    #[test]
    fn test_load_order_is_center_out() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let grid = Arc::new(Mutex::new(make_grid(Point::new(1024.0, 1024.0), options)));

        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            let bus = grid.lock().unwrap().events().clone();
            bus.on("tileloadstart", move |env| {
                if let MapEvent::TileLoadStart { coords } = env.event {
                    order.lock().unwrap().push(*coords);
                }
            });
        }

        grid.lock()
            .unwrap()
            .set_view(LatLng::new(0.0, 0.0), 3.0, false, false)
            .unwrap();

        let order = order.lock().unwrap();
        assert!(order.len() >= 16);
        let center = Point::new(3.5, 3.5);
        let d = |c: &TileCoord| {
            (c.x as f64 - center.x).powi(2) + (c.y as f64 - center.y).powi(2)
        };
        // Distances are non-decreasing along the request order.
        for pair in order.windows(2) {
            assert!(d(&pair[0]) <= d(&pair[1]) + 1e-9);
        }
    }

    #[test]
    fn test_world_wrap_keys() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(1024.0, 512.0), options);

        // Zoom 1: the world is two tiles wide. Centered on the antimeridian
        // the viewport spans a world seam, so some placements are unwrapped
        // copies while every cache key stays wrapped.
        grid.set_view(LatLng::new(0.0, 180.0), 1.0, false, false).unwrap();

        assert!(grid.tile(&TileCoord::new(0, 0, 1).key()).is_some());
        assert!(grid.tile(&TileCoord::new(1, 0, 1).key()).is_some());
        let has_unwrapped = grid.tiles().any(|t| t.coords.x < 0 || t.coords.x > 1);
        assert!(has_unwrapped);
        for tile in grid.tiles() {
            assert!(tile.wrapped.x >= 0 && tile.wrapped.x <= 1);
        }
    }

    #[test]
    fn test_no_wrap_clips_to_world() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        options.no_wrap = true;
        let mut grid = make_grid(Point::new(1024.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 1.0, false, false).unwrap();

        for tile in grid.tiles() {
            assert!(tile.coords.x >= 0 && tile.coords.x <= 1);
        }
    }

    #[test]
    fn test_non_finite_view_fails_fast() {
        let mut grid = make_grid(Point::new(512.0, 512.0), GridOptions::default());
        let err = grid.set_view(LatLng::new(0.0, 0.0), f64::NAN, false, false);
        assert!(matches!(err, Err(MapError::InvalidTileRange(_))));
        assert_eq!(grid.tile_count(), 0);
    }

    #[test]
    fn test_tiles_load_and_fade_active() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);
        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();

        pump(&mut grid, Duration::from_secs(5));
        assert!(grid.tiles().all(|t| t.is_loaded()));
        // Mid-fade: loaded but not yet active.
        assert!(grid.tiles().any(|t| !t.active));

        grid.process_results(Instant::now() + Duration::from_secs(1));
        assert!(grid.tiles().all(|t| t.active));
        assert!(!grid.is_loading());
    }

    #[test]
    fn test_prune_idempotence() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 4.0, false, false).unwrap();
        settle(&mut grid);

        // Pan far enough that the old tiles leave the padded range.
        grid.set_view(LatLng::new(0.0, 90.0), 4.0, false, false).unwrap();
        settle(&mut grid);

        let after_first = grid.tile_count();
        grid.prune_tiles();
        assert_eq!(grid.tile_count(), after_first);
    }

    #[test]
    fn test_parent_retained_until_children_fade() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        settle(&mut grid);
        assert!(grid.tiles().all(|t| t.active));

        // One level in: new tiles are placeholders; active parents at z2
        // must survive the prune to avoid a blank gap.
        grid.set_view(LatLng::new(0.0, 0.0), 3.0, false, false).unwrap();
        let parents = grid.tiles().filter(|t| t.coords.z == 2).count();
        assert!(parents > 0, "active parents were pruned too early");

        // Once the z3 tiles are loaded and faded, the parents go away.
        settle(&mut grid);
        grid.prune_tiles();
        assert_eq!(grid.tiles().filter(|t| t.coords.z == 2).count(), 0);
        assert!(grid.level(2).is_none());
        assert!(grid.level(3).is_some());
    }

    #[test]
    fn test_big_zoom_jump_invalidates() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        settle(&mut grid);

        grid.set_view(LatLng::new(0.0, 0.0), 7.0, false, false).unwrap();
        // Nothing from the old pyramid survives a >1-level jump.
        assert!(grid.tiles().all(|t| t.coords.z == 7));
        assert!(grid.level(2).is_none());
    }

    #[test]
    fn test_error_tile_substitution() {
        let failing = TileCoord::new(1, 1, 2);
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        options.error_tile = Some(vec![0xDE, 0xAD]);

        let mut grid = TileGrid::with_loader_config(
            Crs::epsg3857(),
            Arc::new(FixedTileSource::new().failing_on(failing)),
            Point::new(512.0, 512.0),
            options,
            LoaderConfig {
                max_retries: 0,
                ..LoaderConfig::for_testing()
            },
        );

        let errors = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            grid.events().on("tileerror", move |env| {
                if let MapEvent::TileError { coords, .. } = env.event {
                    errors.lock().unwrap().push(*coords);
                }
            });
        }

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        pump(&mut grid, Duration::from_secs(5));

        let failed = grid.tile(&failing.key()).unwrap();
        assert!(failed.error);
        assert_eq!(failed.data.as_deref(), Some(&vec![0xDE, 0xAD]));
        assert_eq!(*errors.lock().unwrap(), vec![failing]);

        // The rest of the batch loaded normally.
        assert!(grid
            .tiles()
            .filter(|t| t.wrapped != failing)
            .all(|t| t.is_loaded() && !t.error));
    }

    #[test]
    fn test_stale_completion_is_dropped() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = TileGrid::with_loader_config(
            Crs::epsg3857(),
            Arc::new(FixedTileSource::new().with_delay(Duration::from_millis(30))),
            Point::new(512.0, 512.0),
            options,
            LoaderConfig::for_testing(),
        );

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        assert!(grid.tile_count() > 0);

        // Evict everything while fetches are in flight.
        grid.invalidate_all();
        assert_eq!(grid.tile_count(), 0);

        pump(&mut grid, Duration::from_secs(5));
        // Completions for evicted entries are no-ops.
        assert_eq!(grid.tile_count(), 0);
    }

    #[test]
    fn test_cached_payload_skips_loader() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        settle(&mut grid);

        // Pan away and back: the second visit is served from the data cache.
        grid.set_view(LatLng::new(0.0, 90.0), 2.0, false, false).unwrap();
        settle(&mut grid);
        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();

        let origin_tile = grid.tile(&TileCoord::new(1, 1, 2).key()).unwrap();
        assert!(origin_tile.is_loaded());
    }

    #[test]
    fn test_zoom_anim_scales_level() {
        let mut options = GridOptions::default();
        options.update_when_zooming = false;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);
        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();

        // Animation frame halfway to zoom 3: transform only, no retarget.
        let before = grid.tile_count();
        grid.set_view(LatLng::new(0.0, 0.0), 2.5, true, true).unwrap();
        assert_eq!(grid.tile_count(), before);

        let level = grid.level(2).unwrap();
        assert!((level.scale - 2_f64.powf(0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_restriction() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        options.bounds = Some(LatLngBounds::from_coords(0.0, 0.0, 85.0, 180.0));
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();

        // Of the 2×2 center block only the north-east quadrant tile loads.
        assert_eq!(grid.tile_count(), 1);
        assert!(grid.tile(&TileCoord::new(2, 1, 2).key()).is_some());
    }

    #[test]
    fn test_grid_load_event() {
        let mut options = GridOptions::default();
        options.keep_buffer = 0;
        let mut grid = make_grid(Point::new(512.0, 512.0), options);

        let loaded = Arc::new(Mutex::new(0));
        {
            let loaded = loaded.clone();
            grid.events().on("gridload", move |_| {
                *loaded.lock().unwrap() += 1;
            });
        }

        grid.set_view(LatLng::new(0.0, 0.0), 2.0, false, false).unwrap();
        assert!(grid.is_loading());
        settle(&mut grid);
        assert_eq!(*loaded.lock().unwrap(), 1);
    }

    #[test]
    fn test_wrap_int() {
        assert_eq!(wrap_int(-1, (0, 4)), 3);
        assert_eq!(wrap_int(4, (0, 4)), 0);
        assert_eq!(wrap_int(7, (0, 4)), 3);
        assert_eq!(wrap_int(2, (0, 4)), 2);
    }
}
