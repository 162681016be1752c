//! Coordinate reference systems: projections, affine pixel transformations,
//! and the scale law tying geographic coordinates to tile-pixel space.

use crate::core::bounds::Bounds;
use crate::core::constants::{EARTH_RADIUS, EARTH_RADIUS_MINOR, MAX_LATITUDE, TILE_SIZE};
use crate::core::geo::{LatLng, LatLngBounds, Point};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Wraps `x` into `[min, max)` using modular arithmetic that is well-defined
/// (never negative relative to `min`) for any finite input. With
/// `include_max`, the exact upper bound maps to itself.
pub fn wrap_num(x: f64, range: (f64, f64), include_max: bool) -> f64 {
    let (min, max) = range;
    let d = max - min;
    if x == max && include_max {
        x
    } else {
        ((x - min) % d + d) % d + min
    }
}

/// Affine transformation applied to a projection's planar output to obtain
/// pixel coordinates: `(x, y) -> (scale * (a*x + b), scale * (c*y + d))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl Transformation {
    /// Creates a new transformation. Zero `a` or `c` coefficients make the
    /// transformation non-invertible, which is a programmer error.
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        assert!(a != 0.0, "transformation coefficient a must be nonzero");
        assert!(c != 0.0, "transformation coefficient c must be nonzero");
        Self { a, b, c, d }
    }

    pub fn transform(&self, point: &Point, scale: f64) -> Point {
        Point::new(
            scale * (self.a * point.x + self.b),
            scale * (self.c * point.y + self.d),
        )
    }

    pub fn untransform(&self, point: &Point, scale: f64) -> Point {
        Point::new(
            (point.x / scale - self.b) / self.a,
            (point.y / scale - self.d) / self.c,
        )
    }
}

/// Stateless map projection: geographic coordinate ⇄ planar coordinate.
/// `unproject(project(p)) ≈ p` holds for points inside `bounds()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Web-mercator sphere (EPSG:3857 and friends).
    SphericalMercator,
    /// True ellipsoidal mercator (EPSG:3395).
    EllipticalMercator,
    /// Identity lng/lat projection (EPSG:4326, simple CRS).
    LonLat,
}

impl Projection {
    pub fn project(&self, lat_lng: &LatLng) -> Point {
        match self {
            Projection::SphericalMercator => {
                let lat = lat_lng.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
                let x = lat_lng.lng.to_radians() * EARTH_RADIUS;
                let y = ((PI / 4.0 + lat.to_radians() / 2.0).tan().ln()) * EARTH_RADIUS;
                Point::new(x, y)
            }
            Projection::EllipticalMercator => {
                let lat = lat_lng.lat.clamp(-89.5, 89.5);
                let e = Self::eccentricity();
                let y = lat.to_radians();
                let con = e * y.sin();
                let ts = (PI / 4.0 - y / 2.0).tan() / ((1.0 - con) / (1.0 + con)).powf(e / 2.0);
                Point::new(
                    lat_lng.lng.to_radians() * EARTH_RADIUS,
                    -EARTH_RADIUS * ts.max(1e-10).ln(),
                )
            }
            Projection::LonLat => Point::new(lat_lng.lng, lat_lng.lat),
        }
    }

    pub fn unproject(&self, point: &Point) -> LatLng {
        match self {
            Projection::SphericalMercator => {
                let lng = (point.x / EARTH_RADIUS).to_degrees();
                let lat =
                    (2.0 * (point.y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
                LatLng::new(lat, lng)
            }
            Projection::EllipticalMercator => {
                let e = Self::eccentricity();
                let ts = (-point.y / EARTH_RADIUS).exp();
                let mut phi = PI / 2.0 - 2.0 * ts.atan();

                // Conformal-latitude refinement; converges in a handful of steps.
                for _ in 0..15 {
                    let con = e * phi.sin();
                    let con = ((1.0 - con) / (1.0 + con)).powf(e / 2.0);
                    let dphi = PI / 2.0 - 2.0 * (ts * con).atan() - phi;
                    phi += dphi;
                    if dphi.abs() < 1e-7 {
                        break;
                    }
                }

                LatLng::new(phi.to_degrees(), (point.x / EARTH_RADIUS).to_degrees())
            }
            Projection::LonLat => LatLng::new(point.y, point.x),
        }
    }

    /// The projected world rectangle in planar coordinates.
    pub fn bounds(&self) -> Bounds {
        match self {
            Projection::SphericalMercator => {
                let d = EARTH_RADIUS * PI;
                Bounds::from_coords(-d, -d, d, d)
            }
            Projection::EllipticalMercator => Bounds::from_coords(
                -20_037_508.342_89,
                -15_496_570.739_72,
                20_037_508.342_89,
                18_764_656.231_38,
            ),
            Projection::LonLat => Bounds::from_coords(-180.0, -90.0, 180.0, 90.0),
        }
    }

    fn eccentricity() -> f64 {
        let tmp = EARTH_RADIUS_MINOR / EARTH_RADIUS;
        (1.0 - tmp * tmp).sqrt()
    }
}

/// Composition of a projection, a pixel transformation, and a scale law.
/// The sole authority translating geographic ⇄ pixel space at a given zoom.
/// A map owns exactly one CRS for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crs {
    pub code: &'static str,
    projection: Projection,
    transformation: Transformation,
    /// Longitude range the CRS wraps into, if it wraps at all.
    pub wrap_lng: Option<(f64, f64)>,
    /// Latitude range the CRS wraps into, if it wraps at all.
    pub wrap_lat: Option<(f64, f64)>,
    /// Whether pixel space extends without world bounds (planar CRS).
    pub infinite: bool,
}

impl Crs {
    /// Web mercator, the default for slippy-map tile services.
    pub fn epsg3857() -> Self {
        let s = TILE_SIZE as f64 * 0.5 / (PI * EARTH_RADIUS);
        Self {
            code: "EPSG:3857",
            projection: Projection::SphericalMercator,
            transformation: Transformation::new(s, TILE_SIZE as f64 / 2.0, -s, TILE_SIZE as f64 / 2.0),
            wrap_lng: Some((-180.0, 180.0)),
            wrap_lat: None,
            infinite: false,
        }
    }

    /// Plate carrée: two tiles wide, one tall at zoom zero.
    pub fn epsg4326() -> Self {
        let s = TILE_SIZE as f64 / 360.0 * 2.0;
        Self {
            code: "EPSG:4326",
            projection: Projection::LonLat,
            transformation: Transformation::new(s, TILE_SIZE as f64, -s, TILE_SIZE as f64 / 2.0),
            wrap_lng: Some((-180.0, 180.0)),
            wrap_lat: None,
            infinite: false,
        }
    }

    /// Ellipsoidal mercator.
    pub fn epsg3395() -> Self {
        let s = TILE_SIZE as f64 * 0.5 / (PI * EARTH_RADIUS);
        Self {
            code: "EPSG:3395",
            projection: Projection::EllipticalMercator,
            transformation: Transformation::new(s, TILE_SIZE as f64 / 2.0, -s, TILE_SIZE as f64 / 2.0),
            wrap_lng: Some((-180.0, 180.0)),
            wrap_lat: None,
            infinite: false,
        }
    }

    /// Planar CRS for non-geographic maps: coordinates map 1:1 to pixels at
    /// zoom zero, pixel space is unbounded, distance is Euclidean.
    pub fn simple() -> Self {
        Self {
            code: "Simple",
            projection: Projection::LonLat,
            transformation: Transformation::new(1.0, 0.0, -1.0, 0.0),
            wrap_lng: None,
            wrap_lat: None,
            infinite: true,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn transformation(&self) -> &Transformation {
        &self.transformation
    }

    /// Scale factor for pixel space at the given zoom.
    pub fn scale(&self, zoom: f64) -> f64 {
        2_f64.powf(zoom)
    }

    /// Inverse of [`Crs::scale`].
    pub fn zoom(&self, scale: f64) -> f64 {
        scale.log2()
    }

    /// Projects a geographic coordinate into planar space.
    pub fn project(&self, lat_lng: &LatLng) -> Point {
        self.projection.project(lat_lng)
    }

    /// Inverse of [`Crs::project`].
    pub fn unproject(&self, point: &Point) -> LatLng {
        self.projection.unproject(point)
    }

    /// Geographic coordinate → world pixel coordinate at the given zoom.
    pub fn lat_lng_to_point(&self, lat_lng: &LatLng, zoom: f64) -> Point {
        let projected = self.projection.project(lat_lng);
        self.transformation.transform(&projected, self.scale(zoom))
    }

    /// World pixel coordinate at the given zoom → geographic coordinate.
    pub fn point_to_lat_lng(&self, point: &Point, zoom: f64) -> LatLng {
        let untransformed = self.transformation.untransform(point, self.scale(zoom));
        self.projection.unproject(&untransformed)
    }

    /// Pixel bounds of the projected world at the given zoom, or `None` for
    /// an infinite CRS.
    pub fn pixel_world_bounds(&self, zoom: f64) -> Option<Bounds> {
        if self.infinite {
            return None;
        }
        let b = self.projection.bounds();
        let s = self.scale(zoom);
        Some(Bounds::new(
            self.transformation.transform(&b.min, s),
            self.transformation.transform(&b.max, s),
        ))
    }

    /// Whether this CRS measures distance on the earth rather than the plane.
    pub fn is_geographic(&self) -> bool {
        !self.infinite
    }

    /// Distance between two coordinates: meters along the sphere for
    /// geographic CRSs, Euclidean units for planar ones.
    pub fn distance(&self, a: &LatLng, b: &LatLng) -> f64 {
        if self.is_geographic() {
            a.distance_to(b)
        } else {
            let dx = b.lng - a.lng;
            let dy = b.lat - a.lat;
            (dx * dx + dy * dy).sqrt()
        }
    }

    /// Reduces a coordinate into the CRS wrap ranges, preserving altitude.
    pub fn wrap_lat_lng(&self, lat_lng: &LatLng) -> LatLng {
        let lng = match self.wrap_lng {
            Some(range) => wrap_num(lat_lng.lng, range, true),
            None => lat_lng.lng,
        };
        let lat = match self.wrap_lat {
            Some(range) => wrap_num(lat_lng.lat, range, true),
            None => lat_lng.lat,
        };
        LatLng {
            lat,
            lng,
            alt: lat_lng.alt,
        }
    }

    /// Re-centers a bounds on its wrapped center, preserving the span.
    pub fn wrap_lat_lng_bounds(&self, bounds: &LatLngBounds) -> LatLngBounds {
        let center = bounds.center();
        let wrapped = self.wrap_lat_lng(&center);
        let lat_shift = center.lat - wrapped.lat;
        let lng_shift = center.lng - wrapped.lng;

        if lat_shift == 0.0 && lng_shift == 0.0 {
            return bounds.clone();
        }

        LatLngBounds::new(
            LatLng::new(
                bounds.south_west.lat - lat_shift,
                bounds.south_west.lng - lng_shift,
            ),
            LatLng::new(
                bounds.north_east.lat - lat_shift,
                bounds.north_east.lng - lng_shift,
            ),
        )
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::epsg3857()
    }
}
