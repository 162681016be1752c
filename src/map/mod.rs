//! The map controller: authoritative view state (center/zoom/size), the
//! `set_view` pipeline with its lifecycle-event ordering contract, and the
//! pan/zoom/fly animation orchestration.

pub mod animation;
pub mod events;
pub mod options;
pub mod scheduler;

use crate::core::bounds::Bounds;
use crate::core::crs::Crs;
use crate::core::geo::{LatLng, LatLngBounds, Point};
use crate::map::animation::{EasingType, FlyPath, PanAnimation, ZoomAnimation};
use crate::map::events::{EventBus, ListenerId, LocationErrorCode, MapEvent};
use crate::map::options::MapOptions;
use crate::map::scheduler::{FrameHandle, FrameScheduler, ManualScheduler};
use crate::prelude::{Arc, Duration, Instant};
use crate::{MapError, Result};

/// Supplies the current viewport size in pixels. The engine never measures
/// the host surface itself.
pub trait SizeProvider: Send {
    fn size(&self) -> Point;
}

/// Fixed-size provider for headless hosts and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSize(pub Point);

impl SizeProvider for FixedSize {
    fn size(&self) -> Point {
        self.0
    }
}

/// Optional positioning capability. Absence is an expected, cooperative
/// failure reported through events, never an error.
pub trait Locator: Send {
    /// Current position and accuracy radius in meters, if available.
    fn locate(&mut self) -> Option<(LatLng, f64)>;
}

/// Per-call view options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewOptions {
    /// `Some(true)` forces animation, `Some(false)` forbids it, `None`
    /// animates when the move is small enough.
    pub animate: Option<bool>,
    pub duration: Option<Duration>,
    /// Force the non-incremental reset path.
    pub reset: bool,
    /// Suppress the `movestart` event (chained internal moves).
    pub no_move_start: bool,
}

impl ViewOptions {
    pub const NO_ANIMATE: ViewOptions = ViewOptions {
        animate: Some(false),
        duration: None,
        reset: false,
        no_move_start: false,
    };
}

/// Options for [`Map::fit_bounds`] and [`Map::fly_to_bounds`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FitBoundsOptions {
    /// Pixel padding subtracted from the viewport before fitting.
    pub padding: Point,
    /// Cap on the resulting zoom.
    pub max_zoom: Option<f64>,
    pub view: ViewOptions,
}

enum ActiveAnimation {
    Pan(PanAnimation),
    Zoom(ZoomAnimation),
    Fly {
        path: FlyPath,
        start_zoom: f64,
        duration: Duration,
    },
}

struct RunningAnimation {
    animation: ActiveAnimation,
    started: Instant,
    zoom_changed: bool,
}

/// The view controller. Owns exactly one CRS for its lifetime; all view
/// mutation funnels through [`Map::set_view`], which enforces zoom/bounds
/// limits and the event ordering contract:
/// `zoomstart?` → `movestart?` → frames (`zoom`/`move`) → `zoomend?` →
/// `moveend`, with `viewprereset`/`viewreset` bracketing non-incremental
/// changes and a single `load` on first initialization.
pub struct Map {
    options: MapOptions,
    crs: Crs,
    center: LatLng,
    zoom: f64,
    size_provider: Box<dyn SizeProvider>,
    last_size: Point,
    pixel_origin: Point,
    loaded: bool,
    events: Arc<EventBus>,
    scheduler: Box<dyn FrameScheduler>,
    pending_frame: Option<FrameHandle>,
    animation: Option<RunningAnimation>,
    locator: Option<Box<dyn Locator>>,
}

impl Map {
    /// Creates a map with a fixed viewport size. When the options carry an
    /// initial center and zoom the view initializes immediately (firing the
    /// reset/load sequence to any listener attached afterwards is not
    /// possible, so hosts that care attach first and call `set_view`).
    pub fn new(options: MapOptions, size: Point) -> Result<Self> {
        Self::with_size_provider(options, Box::new(FixedSize(size)))
    }

    pub fn with_size_provider(
        options: MapOptions,
        size_provider: Box<dyn SizeProvider>,
    ) -> Result<Self> {
        let initial = match (options.center, options.zoom) {
            (Some(center), Some(zoom)) => Some((center, zoom)),
            (None, None) => None,
            _ => {
                return Err(MapError::InvalidView(
                    "initial center and zoom must be provided together".into(),
                ))
            }
        };

        let size = size_provider.size();
        let mut map = Self {
            crs: options.crs,
            options,
            center: LatLng::default(),
            zoom: 0.0,
            size_provider,
            last_size: size,
            pixel_origin: Point::default(),
            loaded: false,
            events: EventBus::new(),
            scheduler: Box::new(ManualScheduler::new()),
            pending_frame: None,
            animation: None,
            locator: None,
        };

        if let Some((center, zoom)) = initial {
            map.set_view(center, zoom, ViewOptions::NO_ANIMATE)?;
        }
        Ok(map)
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn FrameScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn set_locator(&mut self, locator: Box<dyn Locator>) {
        self.locator = Some(locator);
    }

    // --- accessors ---------------------------------------------------------

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Convenience pass-through to the event bus.
    pub fn on<F>(&self, name: &'static str, callback: F) -> ListenerId
    where
        F: Fn(&events::EventEnvelope<'_>) + Send + Sync + 'static,
    {
        self.events.on(name, callback)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn get_center(&self) -> LatLng {
        self.center
    }

    pub fn get_zoom(&self) -> f64 {
        self.zoom
    }

    pub fn get_min_zoom(&self) -> f64 {
        self.options.min_zoom
    }

    pub fn get_max_zoom(&self) -> f64 {
        self.options.max_zoom
    }

    pub fn get_size(&self) -> Point {
        self.size_provider.size()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    // --- coordinate conversion --------------------------------------------

    /// Geographic coordinate → world pixel at the given zoom (current zoom
    /// when `None`).
    pub fn project(&self, lat_lng: &LatLng, zoom: Option<f64>) -> Point {
        self.crs
            .lat_lng_to_point(lat_lng, zoom.unwrap_or(self.zoom))
    }

    /// World pixel at the given zoom → geographic coordinate.
    pub fn unproject(&self, point: &Point, zoom: Option<f64>) -> LatLng {
        self.crs.point_to_lat_lng(point, zoom.unwrap_or(self.zoom))
    }

    /// Origin of layer-point space: fixed between view resets so projected
    /// vector caches stay valid across pure pans.
    pub fn get_pixel_origin(&self) -> Point {
        self.pixel_origin
    }

    pub fn lat_lng_to_layer_point(&self, lat_lng: &LatLng) -> Point {
        self.project(lat_lng, None).subtract(&self.pixel_origin)
    }

    pub fn layer_point_to_lat_lng(&self, point: &Point) -> LatLng {
        self.unproject(&point.add(&self.pixel_origin), None)
    }

    /// Top-left of the viewport in world pixels at the current zoom.
    fn view_top_left(&self) -> Point {
        self.project(&self.center, None)
            .subtract(&self.get_size().multiply(0.5))
    }

    pub fn lat_lng_to_container_point(&self, lat_lng: &LatLng) -> Point {
        self.project(lat_lng, None).subtract(&self.view_top_left())
    }

    pub fn container_point_to_lat_lng(&self, point: &Point) -> LatLng {
        self.unproject(&point.add(&self.view_top_left()), None)
    }

    pub fn layer_point_to_container_point(&self, point: &Point) -> Point {
        point.add(&self.pixel_origin).subtract(&self.view_top_left())
    }

    pub fn container_point_to_layer_point(&self, point: &Point) -> Point {
        point.add(&self.view_top_left()).subtract(&self.pixel_origin)
    }

    /// Viewport rectangle in world pixels at the given center/zoom
    /// (current view when `None`).
    pub fn get_pixel_bounds(&self, center: Option<&LatLng>, zoom: Option<f64>) -> Bounds {
        let half = self.get_size().multiply(0.5);
        let center_px = self.project(center.unwrap_or(&self.center), zoom);
        Bounds::new(center_px.subtract(&half), center_px.add(&half))
    }

    /// Pixel bounds of the whole projected world at the given zoom, or
    /// `None` for an infinite CRS.
    pub fn get_pixel_world_bounds(&self, zoom: Option<f64>) -> Option<Bounds> {
        self.crs.pixel_world_bounds(zoom.unwrap_or(self.zoom))
    }

    /// Geographic rectangle currently visible.
    pub fn get_bounds(&self) -> LatLngBounds {
        let px = self.get_pixel_bounds(None, None);
        let sw = self.unproject(&px.bottom_left(), None);
        let ne = self.unproject(&px.top_right(), None);
        LatLngBounds::new(sw, ne)
    }

    pub fn distance(&self, a: &LatLng, b: &LatLng) -> f64 {
        self.crs.distance(a, b)
    }

    /// Ratio of pixel scales between two zooms.
    pub fn get_zoom_scale(&self, to_zoom: f64, from_zoom: f64) -> f64 {
        self.crs.scale(to_zoom) / self.crs.scale(from_zoom)
    }

    /// Zoom reached by multiplying the scale at `from_zoom` by `scale`.
    pub fn get_scale_zoom(&self, scale: f64, from_zoom: f64) -> f64 {
        self.crs.zoom(scale * self.crs.scale(from_zoom))
    }

    // --- the set_view pipeline --------------------------------------------

    /// Moves the view. Clamps zoom to the configured limits (snapping to the
    /// zoom-snap granularity), clamps the center against `max_bounds`,
    /// cancels any in-flight animation, then either animates (small pans,
    /// zoom deltas within the animation threshold) or performs an immediate
    /// reset.
    pub fn set_view(&mut self, center: LatLng, zoom: f64, options: ViewOptions) -> Result<()> {
        if !center.is_finite() || !zoom.is_finite() {
            return Err(MapError::InvalidView(format!(
                "non-finite view: center={:?} zoom={}",
                center, zoom
            )));
        }

        let zoom = self.limit_zoom(zoom);
        let center = self.limit_center(&self.crs.wrap_lat_lng(&center), zoom);
        self.cancel_animation();

        if self.loaded && !options.reset {
            let animate = options.animate.unwrap_or(true);
            if animate && self.try_animate(&center, zoom, &options) {
                return Ok(());
            }
        }

        self.reset_view(center, zoom, options.no_move_start);
        Ok(())
    }

    /// Attempts an animated transition; returns whether one was started.
    fn try_animate(&mut self, center: &LatLng, zoom: f64, options: &ViewOptions) -> bool {
        let zoom_changed = (zoom - self.zoom).abs() > 1e-9;

        if !zoom_changed {
            let from = self.project(&self.center, None);
            let to = self.project(center, None);
            let offset = to.subtract(&from);
            let size = self.get_size();

            // Only animate pans that stay within one viewport, unless the
            // caller explicitly forced animation.
            let within_viewport = offset.x.abs() <= size.x && offset.y.abs() <= size.y;
            if !within_viewport && options.animate != Some(true) {
                return false;
            }
            if offset.x == 0.0 && offset.y == 0.0 {
                return false;
            }

            self.move_start(false, options.no_move_start);
            self.start_animation(
                ActiveAnimation::Pan(PanAnimation::new(
                    from,
                    to,
                    self.zoom,
                    options.duration.unwrap_or(self.options.pan_duration),
                    EasingType::EaseOut,
                )),
                false,
            );
            return true;
        }

        if !self.options.zoom_animation
            || (zoom - self.zoom).abs() > self.options.zoom_animation_threshold
        {
            return false;
        }

        self.move_start(true, options.no_move_start);
        self.start_animation(
            ActiveAnimation::Zoom(ZoomAnimation::new(
                self.center,
                *center,
                self.zoom,
                zoom,
                options.duration.unwrap_or(self.options.zoom_duration),
                EasingType::EaseOut,
            )),
            true,
        );
        true
    }

    /// Non-incremental view change: full re-projection of all layers.
    fn reset_view(&mut self, center: LatLng, zoom: f64, no_move_start: bool) {
        let loading = !self.loaded;
        self.loaded = true;

        self.fire(MapEvent::ViewPreReset);
        let zoom_changed = loading || (zoom - self.zoom).abs() > 1e-9;
        self.move_start(zoom_changed, no_move_start);
        self.pixel_origin = self.new_pixel_origin(&center, zoom);
        self.apply_move(center, zoom);
        self.move_end(zoom_changed);
        self.fire(MapEvent::ViewReset { center, zoom });
        if loading {
            self.fire(MapEvent::Load);
        }
    }

    fn new_pixel_origin(&self, center: &LatLng, zoom: f64) -> Point {
        self.crs
            .lat_lng_to_point(center, zoom)
            .subtract(&self.get_size().multiply(0.5))
            .round()
    }

    fn move_start(&mut self, zoom_changed: bool, no_move_start: bool) {
        if zoom_changed {
            self.fire(MapEvent::ZoomStart { zoom: self.zoom });
        }
        if !no_move_start {
            self.fire(MapEvent::MoveStart {
                center: self.center,
            });
        }
    }

    /// Commits one frame of view state and fires the per-frame events.
    fn apply_move(&mut self, center: LatLng, zoom: f64) {
        let zoom_changed = (zoom - self.zoom).abs() > 1e-9;
        self.center = center;
        self.zoom = zoom;
        if zoom_changed {
            self.fire(MapEvent::Zoom { center, zoom });
        }
        self.fire(MapEvent::Move { center, zoom });
    }

    fn move_end(&mut self, zoom_changed: bool) {
        if zoom_changed {
            self.fire(MapEvent::ZoomEnd { zoom: self.zoom });
        }
        self.fire(MapEvent::MoveEnd {
            center: self.center,
            zoom: self.zoom,
        });
    }

    fn fire(&self, event: MapEvent) {
        self.events.fire(&event, false);
    }

    // --- animation machinery ----------------------------------------------

    fn start_animation(&mut self, animation: ActiveAnimation, zoom_changed: bool) {
        self.animation = Some(RunningAnimation {
            animation,
            started: Instant::now(),
            zoom_changed,
        });
        self.request_frame();
    }

    fn request_frame(&mut self) {
        if self.pending_frame.is_none() {
            self.pending_frame = Some(self.scheduler.request());
        }
    }

    /// Cancels the in-flight animation without firing completion events.
    fn cancel_animation(&mut self) {
        self.animation = None;
        if let Some(handle) = self.pending_frame.take() {
            self.scheduler.cancel(handle);
        }
    }

    /// Halts any in-flight animation mid-frame. The canceled animation fires
    /// no completion events; the view stays wherever the last frame put it.
    pub fn stop(&mut self) -> bool {
        let was_animating = self.animation.is_some();
        self.cancel_animation();
        was_animating
    }

    /// Advances the active animation. Hosts call this once per delivered
    /// frame; returns whether another frame was requested.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.pending_frame = None;
        let Some(running) = self.animation.take() else {
            return false;
        };

        let elapsed = if now > running.started {
            now - running.started
        } else {
            Duration::from_secs(0)
        };

        match &running.animation {
            ActiveAnimation::Pan(pan) => {
                let (center_px, done) = pan.sample(elapsed);
                let center = self.unproject(&center_px, Some(pan.zoom));
                self.apply_move(center, pan.zoom);
                if done {
                    self.move_end(false);
                    return false;
                }
            }
            ActiveAnimation::Zoom(zoom_anim) => {
                let frame = zoom_anim.sample(elapsed);
                self.apply_move(frame.center, frame.zoom);
                self.fire(MapEvent::ZoomAnim {
                    center: frame.center,
                    zoom: frame.zoom,
                });
                if frame.done {
                    self.pixel_origin = self.new_pixel_origin(&frame.center, frame.zoom);
                    self.move_end(running.zoom_changed);
                    return false;
                }
            }
            ActiveAnimation::Fly {
                path,
                start_zoom,
                duration,
            } => {
                let t = elapsed.as_secs_f64() / duration.as_secs_f64();
                let (center_px, zoom) = path.sample(t);
                let center = self.unproject(&center_px, Some(*start_zoom));
                self.apply_move(center, zoom);
                self.fire(MapEvent::ZoomAnim { center, zoom });
                if t >= 1.0 {
                    self.pixel_origin = self.new_pixel_origin(&center, zoom);
                    self.move_end(running.zoom_changed);
                    return false;
                }
            }
        }

        self.animation = Some(running);
        self.request_frame();
        true
    }

    // --- pan / zoom / fly operations --------------------------------------

    /// Pans by a pixel offset.
    pub fn pan_by(&mut self, offset: Point, options: ViewOptions) -> Result<()> {
        if offset.x == 0.0 && offset.y == 0.0 {
            self.fire(MapEvent::MoveEnd {
                center: self.center,
                zoom: self.zoom,
            });
            return Ok(());
        }
        let target = self.unproject(&self.project(&self.center, None).add(&offset), None);
        self.set_view(target, self.zoom, options)
    }

    pub fn pan_to(&mut self, center: LatLng, options: ViewOptions) -> Result<()> {
        self.set_view(center, self.zoom, options)
    }

    pub fn set_zoom(&mut self, zoom: f64, options: ViewOptions) -> Result<()> {
        self.set_view(self.center, zoom, options)
    }

    pub fn zoom_in(&mut self, delta: Option<f64>, options: ViewOptions) -> Result<()> {
        self.set_zoom(self.zoom + delta.unwrap_or(self.options.zoom_delta), options)
    }

    pub fn zoom_out(&mut self, delta: Option<f64>, options: ViewOptions) -> Result<()> {
        self.set_zoom(self.zoom - delta.unwrap_or(self.options.zoom_delta), options)
    }

    /// Zooms while keeping the given container point geographically fixed
    /// (the wheel-zoom primitive).
    pub fn zoom_around(&mut self, fixed: Point, zoom: f64, options: ViewOptions) -> Result<()> {
        let zoom = self.limit_zoom(zoom);
        let scale = self.get_zoom_scale(zoom, self.zoom);
        let view_half = self.get_size().multiply(0.5);
        let offset = fixed.subtract(&view_half).multiply(1.0 - 1.0 / scale);
        let center = self.container_point_to_lat_lng(&view_half.add(&offset));
        self.set_view(center, zoom, options)
    }

    /// Applies the configured wheel response curve and zooms around the
    /// cursor position.
    pub fn wheel_zoom(&mut self, delta: f64, at: Point) -> Result<()> {
        let dz = (self.options.wheel_response)(delta);
        self.zoom_around(at, self.zoom + dz, ViewOptions::default())
    }

    /// Animated flight combining zoom-out, pan, and zoom-in along a
    /// hyperbolic velocity curve.
    pub fn fly_to(
        &mut self,
        center: LatLng,
        zoom: Option<f64>,
        options: ViewOptions,
    ) -> Result<()> {
        if options.animate == Some(false) {
            return self.set_view(center, zoom.unwrap_or(self.zoom), options);
        }
        if !self.loaded {
            return self.set_view(center, zoom.unwrap_or(self.zoom), ViewOptions::NO_ANIMATE);
        }
        if !center.is_finite() {
            return Err(MapError::InvalidView(format!(
                "non-finite fly target: {:?}",
                center
            )));
        }

        let target_zoom = self.limit_zoom(zoom.unwrap_or(self.zoom));
        let target_center = self.limit_center(&self.crs.wrap_lat_lng(&center), target_zoom);
        self.cancel_animation();

        let start_zoom = self.zoom;
        let from = self.project(&self.center, Some(start_zoom));
        let to = self.project(&target_center, Some(start_zoom));
        let path = FlyPath::new(
            from,
            to,
            self.get_size(),
            start_zoom,
            target_zoom,
            self.options.fly_rho,
        );
        let duration = options.duration.unwrap_or_else(|| path.duration());
        let zoom_changed = (target_zoom - start_zoom).abs() > 1e-9;

        self.move_start(zoom_changed, options.no_move_start);
        self.start_animation(
            ActiveAnimation::Fly {
                path,
                start_zoom,
                duration,
            },
            zoom_changed,
        );
        Ok(())
    }

    pub fn fly_to_bounds(&mut self, bounds: &LatLngBounds, options: FitBoundsOptions) -> Result<()> {
        let (center, zoom) = self.bounds_center_zoom(bounds, &options)?;
        self.fly_to(center, Some(zoom), options.view)
    }

    // --- bounds fitting ----------------------------------------------------

    /// Maximum zoom at which `bounds` fits the padded viewport. With
    /// `inside`, instead the minimum zoom at which the viewport fits inside
    /// the bounds (per-axis max scale rather than min).
    pub fn get_bounds_zoom(&self, bounds: &LatLngBounds, inside: bool, padding: Point) -> Result<f64> {
        if !bounds.is_valid() {
            return Err(MapError::InvalidBounds("empty bounds".into()));
        }

        let reference_zoom = self.zoom;
        let size = self.get_size().subtract(&padding);
        let nw = bounds.north_west();
        let se = bounds.south_east();
        let projected = Bounds::new(
            self.project(&se, Some(reference_zoom)),
            self.project(&nw, Some(reference_zoom)),
        );
        let bounds_size = projected.size();
        if bounds_size.x == 0.0 && bounds_size.y == 0.0 {
            return Ok(self.options.max_zoom);
        }

        let scale_x = size.x / bounds_size.x;
        let scale_y = size.y / bounds_size.y;
        let scale = if inside {
            scale_x.max(scale_y)
        } else {
            scale_x.min(scale_y)
        };

        let mut zoom = self.get_scale_zoom(scale, reference_zoom);
        let snap = self.options.zoom_snap;
        if snap > 0.0 {
            // Nudge before quantizing so exact fits are not rounded away.
            zoom = if inside {
                (zoom / snap - 1e-9).ceil() * snap
            } else {
                (zoom / snap + 1e-9).floor() * snap
            };
        }
        Ok(zoom.clamp(self.options.min_zoom, self.options.max_zoom))
    }

    fn bounds_center_zoom(
        &self,
        bounds: &LatLngBounds,
        options: &FitBoundsOptions,
    ) -> Result<(LatLng, f64)> {
        let mut zoom = self.get_bounds_zoom(bounds, false, options.padding.multiply(2.0))?;
        if let Some(max) = options.max_zoom {
            zoom = zoom.min(max);
        }

        let sw = self.project(&bounds.south_west, Some(zoom));
        let ne = self.project(&bounds.north_east, Some(zoom));
        let center = self.unproject(&sw.add(&ne).multiply(0.5), Some(zoom));
        Ok((center, zoom))
    }

    /// Centers the view on `bounds` at the largest zoom where the whole
    /// rectangle stays visible.
    pub fn fit_bounds(&mut self, bounds: &LatLngBounds, options: FitBoundsOptions) -> Result<()> {
        let (center, zoom) = self.bounds_center_zoom(bounds, &options)?;
        self.set_view(center, zoom, options.view)
    }

    pub fn fit_world(&mut self, options: FitBoundsOptions) -> Result<()> {
        self.fit_bounds(&LatLngBounds::from_coords(-90.0, -180.0, 90.0, 180.0), options)
    }

    /// Pans the minimal distance needed to bring the view inside `bounds`.
    pub fn pan_inside_bounds(&mut self, bounds: &LatLngBounds, options: ViewOptions) -> Result<()> {
        let target = self.limit_center_within(&self.center, self.zoom, Some(bounds));
        if target == self.center {
            return Ok(());
        }
        self.pan_to(target, options)
    }

    // --- limits -------------------------------------------------------------

    /// Snaps to the zoom-snap granularity, then clamps to `[min, max]`.
    pub fn limit_zoom(&self, zoom: f64) -> f64 {
        let snap = self.options.zoom_snap;
        let zoom = if snap > 0.0 {
            (zoom / snap).round() * snap
        } else {
            zoom
        };
        zoom.clamp(self.options.min_zoom, self.options.max_zoom)
    }

    /// Clamps a center so the viewport stays inside `max_bounds`.
    fn limit_center(&self, center: &LatLng, zoom: f64) -> LatLng {
        self.limit_center_within(center, zoom, self.options.max_bounds.as_ref())
    }

    fn limit_center_within(
        &self,
        center: &LatLng,
        zoom: f64,
        bounds: Option<&LatLngBounds>,
    ) -> LatLng {
        let Some(bounds) = bounds else {
            return *center;
        };

        let center_px = self.project(center, Some(zoom));
        let half = self.get_size().multiply(0.5);
        let view = Bounds::new(center_px.subtract(&half), center_px.add(&half));
        let offset = self.bounds_offset(&view, bounds, zoom);

        if offset.x.abs() <= 1.0 && offset.y.abs() <= 1.0 {
            return *center;
        }
        self.unproject(&center_px.add(&offset), Some(zoom))
    }

    /// Minimal pixel offset bringing `px_bounds` back inside the projected
    /// `max_bounds`, computed independently per axis. When the viewport is
    /// larger than the bound on an axis, the correction centers it.
    fn bounds_offset(&self, px_bounds: &Bounds, max_bounds: &LatLngBounds, zoom: f64) -> Point {
        let projected = Bounds::new(
            self.project(&max_bounds.north_east, Some(zoom)),
            self.project(&max_bounds.south_west, Some(zoom)),
        );
        let min_offset = projected.min.subtract(&px_bounds.min);
        let max_offset = projected.max.subtract(&px_bounds.max);

        Point::new(
            Self::rebound(min_offset.x, -max_offset.x),
            Self::rebound(min_offset.y, -max_offset.y),
        )
    }

    fn rebound(left: f64, right: f64) -> f64 {
        if left + right > 0.0 {
            (left - right).round() / 2.0
        } else {
            left.ceil().max(0.0) - right.floor().max(0.0)
        }
    }

    /// Applies max-bounds viscosity to a drag offset: overshoot past the
    /// bounds is damped by the configured factor instead of clipped.
    pub fn limit_drag_offset(&self, offset: Point) -> Point {
        let Some(bounds) = &self.options.max_bounds else {
            return offset;
        };
        let viscosity = self.options.max_bounds_viscosity;
        if viscosity <= 0.0 {
            return offset;
        }

        let view = self.get_pixel_bounds(None, None);
        let shifted = Bounds::new(view.min.add(&offset), view.max.add(&offset));
        let correction = self.bounds_offset(&shifted, bounds, self.zoom);
        offset.add(&correction.multiply(viscosity))
    }

    // --- size / location ----------------------------------------------------

    /// Tells the map its viewport size changed. Fires `resize`, re-clamps
    /// the center, and ends with `moveend` so grids refresh their range.
    pub fn invalidate_size(&mut self) {
        let new_size = self.get_size();
        let old_size = self.last_size;
        self.last_size = new_size;

        if !self.loaded {
            return;
        }

        self.fire(MapEvent::Resize { old_size, new_size });
        let center = self.limit_center(&self.center, self.zoom);
        self.apply_move(center, self.zoom);
        self.fire(MapEvent::MoveEnd {
            center: self.center,
            zoom: self.zoom,
        });
    }

    /// Requests the host position. Capability absence is reported through
    /// `locationerror`, never an `Err`.
    pub fn locate(&mut self) {
        match self.locator.as_mut() {
            None => {
                self.events.fire(
                    &MapEvent::LocationError {
                        code: LocationErrorCode::NotSupported,
                        message: "no locator capability installed".into(),
                    },
                    false,
                );
            }
            Some(locator) => match locator.locate() {
                Some((lat_lng, accuracy)) => {
                    self.events
                        .fire(&MapEvent::LocationFound { lat_lng, accuracy }, false);
                }
                None => {
                    self.events.fire(
                        &MapEvent::LocationError {
                            code: LocationErrorCode::PositionUnavailable,
                            message: "position unavailable".into(),
                        },
                        false,
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_map() -> Map {
        Map::new(
            MapOptions::default().with_view(LatLng::new(0.0, 0.0), 3.0),
            Point::new(512.0, 512.0),
        )
        .unwrap()
    }

    fn record_events(map: &Map) -> Arc<Mutex<Vec<&'static str>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in [
            "zoomstart", "movestart", "zoom", "move", "zoomend", "moveend", "viewreset", "load",
        ] {
            let log = log.clone();
            map.on(name, move |env| log.lock().unwrap().push(env.event.name()));
        }
        log
    }

    #[test]
    fn test_initial_view() {
        let map = test_map();
        assert!(map.is_loaded());
        assert_eq!(map.get_zoom(), 3.0);
        assert!(map.get_center().equals(&LatLng::new(0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_mismatched_initial_view_is_rejected() {
        let mut options = MapOptions::default();
        options.center = Some(LatLng::new(0.0, 0.0));
        let err = Map::new(options, Point::new(256.0, 256.0));
        assert!(matches!(err, Err(MapError::InvalidView(_))));
    }

    #[test]
    fn test_set_view_event_ordering() {
        let mut map = test_map();
        let log = record_events(&map);

        map.set_view(LatLng::new(20.0, 30.0), 5.0, ViewOptions::NO_ANIMATE)
            .unwrap();

        let log = log.lock().unwrap();
        let count = |name| log.iter().filter(|n| **n == name).count();
        assert_eq!(count("zoomstart"), 1);
        assert_eq!(count("movestart"), 1);
        assert_eq!(count("zoomend"), 1);
        assert_eq!(count("moveend"), 1);

        let pos = |name| log.iter().position(|n| *n == name).unwrap();
        assert!(pos("zoomstart") < pos("movestart"));
        assert!(pos("movestart") < pos("zoomend"));
        assert!(pos("zoomend") < pos("moveend"));
    }

    #[test]
    fn test_load_fires_once() {
        let options = MapOptions::default();
        let mut map = Map::new(options, Point::new(256.0, 256.0)).unwrap();
        assert!(!map.is_loaded());

        let log = record_events(&map);
        map.set_view(LatLng::new(0.0, 0.0), 2.0, ViewOptions::NO_ANIMATE)
            .unwrap();
        map.set_view(LatLng::new(10.0, 10.0), 4.0, ViewOptions::NO_ANIMATE)
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|n| **n == "load").count(), 1);
    }

    #[test]
    fn test_zoom_snap_and_clamp() {
        let map = test_map();
        assert_eq!(map.limit_zoom(4.4), 4.0);
        assert_eq!(map.limit_zoom(4.6), 5.0);
        assert_eq!(map.limit_zoom(25.0), 18.0);
        assert_eq!(map.limit_zoom(-3.0), 0.0);
    }

    #[test]
    fn test_zoom_snap_disabled() {
        let mut options = MapOptions::default().with_view(LatLng::new(0.0, 0.0), 3.0);
        options.zoom_snap = 0.0;
        let map = Map::new(options, Point::new(512.0, 512.0)).unwrap();
        assert_eq!(map.limit_zoom(4.37), 4.37);
    }

    #[test]
    fn test_container_point_of_center_is_view_half() {
        let map = test_map();
        let p = map.lat_lng_to_container_point(&LatLng::new(0.0, 0.0));
        assert!((p.x - 256.0).abs() < 1e-9);
        assert!((p.y - 256.0).abs() < 1e-9);

        let round = map.container_point_to_lat_lng(&p);
        assert!(round.equals(&LatLng::new(0.0, 0.0), 1e-9));
    }

    #[test]
    fn test_layer_container_round_trip() {
        let map = test_map();
        let ll = LatLng::new(12.3, -45.6);
        let layer = map.lat_lng_to_layer_point(&ll);
        let container = map.layer_point_to_container_point(&layer);
        let back = map.container_point_to_layer_point(&container);
        assert!((back.x - layer.x).abs() < 1e-9);
        assert!((back.y - layer.y).abs() < 1e-9);
        assert!(map.layer_point_to_lat_lng(&layer).equals(&ll, 1e-9));
    }

    #[test]
    fn test_max_bounds_clamping() {
        let bounds = LatLngBounds::from_coords(-20.0, -20.0, 20.0, 20.0);
        let options = MapOptions::default()
            .with_view(LatLng::new(0.0, 0.0), 10.0)
            .with_max_bounds(bounds.clone(), 1.0);
        let mut map = Map::new(options, Point::new(256.0, 256.0)).unwrap();

        map.set_view(LatLng::new(60.0, 120.0), 10.0, ViewOptions::NO_ANIMATE)
            .unwrap();

        // The correction works in whole pixels; one pixel at zoom 10 is well
        // under a hundredth of a degree.
        let slack = 0.01;
        let view = map.get_bounds();
        assert!(view.north_east.lat <= bounds.north_east.lat + slack);
        assert!(view.north_east.lng <= bounds.north_east.lng + slack);
        assert!(view.south_west.lat >= bounds.south_west.lat - slack);
        assert!(view.south_west.lng >= bounds.south_west.lng - slack);
    }

    #[test]
    fn test_fit_bounds_whole_world() {
        let mut map = test_map();
        let world = LatLngBounds::from_coords(-90.0, -180.0, 90.0, 180.0);

        let zoom = map.get_bounds_zoom(&world, false, Point::new(0.0, 0.0)).unwrap();
        assert!(zoom <= 1.0);

        let options = FitBoundsOptions {
            view: ViewOptions::NO_ANIMATE,
            ..Default::default()
        };
        map.fit_bounds(&world, options).unwrap();
        assert_eq!(map.get_zoom(), zoom.max(0.0));

        // The fitted view must contain the projectable world.
        let view = map.get_bounds();
        assert!(view.north_east.lng >= 179.0);
        assert!(view.south_west.lng <= -179.0);
    }

    #[test]
    fn test_get_bounds_zoom_inside_picks_larger() {
        let map = test_map();
        let bounds = LatLngBounds::from_coords(-10.0, -40.0, 10.0, 40.0);
        let outside = map.get_bounds_zoom(&bounds, false, Point::new(0.0, 0.0)).unwrap();
        let inside = map.get_bounds_zoom(&bounds, true, Point::new(0.0, 0.0)).unwrap();
        assert!(inside >= outside);
    }

    #[test]
    fn test_invalid_fit_bounds_rejected() {
        let mut map = test_map();
        let empty = LatLngBounds::empty();
        assert!(matches!(
            map.fit_bounds(&empty, FitBoundsOptions::default()),
            Err(MapError::InvalidBounds(_))
        ));
    }

    #[test]
    fn test_non_finite_view_rejected() {
        let mut map = test_map();
        let err = map.set_view(LatLng::new(f64::NAN, 0.0), 3.0, ViewOptions::default());
        assert!(matches!(err, Err(MapError::InvalidView(_))));
        // State untouched.
        assert_eq!(map.get_zoom(), 3.0);
    }

    #[test]
    fn test_animated_pan_completes() {
        let mut map = test_map();
        let log = record_events(&map);

        let target = LatLng::new(0.5, 0.5);
        map.set_view(target, 3.0, ViewOptions::default()).unwrap();
        assert!(map.is_animating());

        let start = Instant::now();
        map.tick(start + Duration::from_millis(100));
        assert!(map.is_animating());
        map.tick(start + Duration::from_secs(2));
        assert!(!map.is_animating());
        assert!(map.get_center().equals(&target, 1e-9));

        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|n| **n == "movestart").count(), 1);
        assert_eq!(log.iter().filter(|n| **n == "moveend").count(), 1);
        assert_eq!(log.iter().filter(|n| **n == "zoomstart").count(), 0);
        assert!(log.iter().filter(|n| **n == "move").count() >= 2);
    }

    #[test]
    fn test_animation_canceled_by_set_view() {
        let mut map = test_map();
        map.set_view(LatLng::new(0.5, 0.5), 3.0, ViewOptions::default())
            .unwrap();
        assert!(map.is_animating());

        let log = record_events(&map);
        map.set_view(LatLng::new(-40.0, 90.0), 8.0, ViewOptions::NO_ANIMATE)
            .unwrap();
        assert!(!map.is_animating());

        // The canceled pan fired no terminal events; the reset fired its own.
        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|n| **n == "moveend").count(), 1);
        assert!(map.get_center().equals(&LatLng::new(-40.0, 90.0), 1e-9));
    }

    #[test]
    fn test_fly_to_lands_exactly() {
        let mut map = test_map();
        let target = LatLng::new(35.0, 139.0);
        map.fly_to(target, Some(8.0), ViewOptions::default()).unwrap();
        assert!(map.is_animating());

        let start = Instant::now();
        let mut guard: u64 = 0;
        while map.is_animating() && guard < 10_000 {
            map.tick(start + Duration::from_millis(16 * guard));
            guard += 1;
        }
        assert!(!map.is_animating());
        assert!(map.get_center().equals(&target, 1e-9));
        assert_eq!(map.get_zoom(), 8.0);
    }

    #[test]
    fn test_large_zoom_jump_resets() {
        let mut map = test_map();
        // Delta above the animation threshold goes through the reset path.
        map.set_view(LatLng::new(0.0, 0.0), 13.0, ViewOptions::default())
            .unwrap();
        assert!(!map.is_animating());
        assert_eq!(map.get_zoom(), 13.0);
    }

    #[test]
    fn test_zoom_around_keeps_fixed_point() {
        let mut map = test_map();
        let fixed = Point::new(100.0, 100.0);
        let before = map.container_point_to_lat_lng(&fixed);

        map.zoom_around(fixed, 4.0, ViewOptions::NO_ANIMATE).unwrap();

        let after = map.container_point_to_lat_lng(&fixed);
        assert!(after.equals(&before, 1e-6));
    }

    #[test]
    fn test_pan_by_zero_offset_fires_moveend() {
        let mut map = test_map();
        let log = record_events(&map);
        map.pan_by(Point::new(0.0, 0.0), ViewOptions::default()).unwrap();
        assert_eq!(
            log.lock().unwrap().iter().filter(|n| **n == "moveend").count(),
            1
        );
    }

    #[test]
    fn test_viscous_drag_damps_overshoot() {
        let bounds = LatLngBounds::from_coords(-30.0, -30.0, 30.0, 30.0);
        let options = MapOptions::default()
            .with_view(LatLng::new(29.0, 0.0), 4.0)
            .with_max_bounds(bounds, 1.0);
        let map = Map::new(options, Point::new(256.0, 256.0)).unwrap();

        // Dragging further north is fully resisted at viscosity 1.0.
        let raw = Point::new(0.0, -400.0);
        let limited = map.limit_drag_offset(raw);
        assert!(limited.y > raw.y);
    }

    #[test]
    fn test_locate_without_capability() {
        let mut map = test_map();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        map.on("locationerror", move |env| {
            if let MapEvent::LocationError { code, .. } = env.event {
                *s.lock().unwrap() = Some(*code);
            }
        });
        map.locate();
        assert_eq!(*seen.lock().unwrap(), Some(LocationErrorCode::NotSupported));
    }

    #[test]
    fn test_stop_cancels_silently() {
        let mut map = test_map();
        map.set_view(LatLng::new(0.5, 0.5), 3.0, ViewOptions::default())
            .unwrap();

        let log = record_events(&map);
        assert!(map.stop());
        assert!(!map.is_animating());
        assert!(log.lock().unwrap().is_empty());
        assert!(!map.stop());
    }
}
