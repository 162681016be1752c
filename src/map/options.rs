use crate::core::constants::{
    DEFAULT_ZOOM_DELTA, DEFAULT_ZOOM_SNAP, FLY_RHO, ZOOM_ANIMATION_THRESHOLD,
};
use crate::core::crs::Crs;
use crate::core::geo::{LatLng, LatLngBounds};
use crate::prelude::Duration;

/// Map controller configuration.
#[derive(Debug, Clone)]
pub struct MapOptions {
    pub crs: Crs,
    /// Initial view; when both are set the map initializes on construction.
    pub center: Option<LatLng>,
    pub zoom: Option<f64>,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Granularity continuous zoom values snap to; 0 disables snapping.
    pub zoom_snap: f64,
    /// Step for `zoom_in`/`zoom_out`.
    pub zoom_delta: f64,
    /// The view cannot leave these bounds when set.
    pub max_bounds: Option<LatLngBounds>,
    /// Damping applied when a drag pushes past `max_bounds`:
    /// 0.0 lets the drag overshoot freely, 1.0 stops it dead at the edge.
    pub max_bounds_viscosity: f64,
    pub zoom_animation: bool,
    /// Do not animate zoom changes larger than this many levels.
    pub zoom_animation_threshold: f64,
    pub pan_duration: Duration,
    pub zoom_duration: Duration,
    /// Steepness of the fly-to velocity curve.
    pub fly_rho: f64,
    /// Maps a raw wheel delta to a zoom delta.
    pub wheel_response: fn(f64) -> f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            crs: Crs::epsg3857(),
            center: None,
            zoom: None,
            min_zoom: 0.0,
            max_zoom: 18.0,
            zoom_snap: DEFAULT_ZOOM_SNAP,
            zoom_delta: DEFAULT_ZOOM_DELTA,
            max_bounds: None,
            max_bounds_viscosity: 0.0,
            zoom_animation: true,
            zoom_animation_threshold: ZOOM_ANIMATION_THRESHOLD,
            pan_duration: Duration::from_millis(250),
            zoom_duration: Duration::from_millis(250),
            fly_rho: FLY_RHO,
            wheel_response: default_wheel_response,
        }
    }
}

impl MapOptions {
    pub fn with_view(mut self, center: LatLng, zoom: f64) -> Self {
        self.center = Some(center);
        self.zoom = Some(zoom);
        self
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_max_bounds(mut self, bounds: LatLngBounds, viscosity: f64) -> Self {
        self.max_bounds = Some(bounds);
        self.max_bounds_viscosity = viscosity.clamp(0.0, 1.0);
        self
    }
}

/// Default wheel-to-zoom curve: roughly linear for small deltas, saturating
/// for large ones so a single aggressive wheel flick cannot jump many levels.
pub fn default_wheel_response(delta: f64) -> f64 {
    4.0 * (2.0 / (1.0 + (-delta / 128.0).exp()) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MapOptions::default();
        assert_eq!(options.zoom_snap, 1.0);
        assert_eq!(options.zoom_delta, 1.0);
        assert_eq!(options.max_bounds_viscosity, 0.0);
        assert!(options.zoom_animation);
        assert!(options.center.is_none());
    }

    #[test]
    fn test_wheel_response_saturates() {
        assert_eq!(default_wheel_response(0.0), 0.0);
        assert!(default_wheel_response(120.0) > 0.0);
        assert!(default_wheel_response(10_000.0) <= 4.0);
        assert!(default_wheel_response(-10_000.0) >= -4.0);
        // Symmetry around zero.
        let up = default_wheel_response(100.0);
        let down = default_wheel_response(-100.0);
        assert!((up + down).abs() < 1e-12);
    }
}
