//! Vector overlay renderer: keeps projected coordinate caches for shapes and
//! re-projects them on view changes. Depends on the CRS only, never on the
//! tile grid. Dispatch is a tagged `Shape` enum plus small capability traits
//! rather than a layer class hierarchy.

use crate::core::bounds::Bounds;
use crate::core::constants::{EARTH_RADIUS, TILE_SIZE};
use crate::core::crs::Crs;
use crate::core::geo::{LatLng, LatLngBounds, Point};
use crate::map::events::{IdAllocator, MapEvent};
use crate::prelude::HashMap;
use std::f64::consts::PI;

/// Projection context captured from view events: everything a shape needs to
/// turn geographic coordinates into layer points.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    crs: Crs,
    origin: Point,
    zoom: f64,
}

impl Projector {
    pub fn new(crs: Crs, center: &LatLng, zoom: f64, size: Point) -> Self {
        let origin = crs
            .lat_lng_to_point(center, zoom)
            .subtract(&size.multiply(0.5))
            .round();
        Self { crs, origin, zoom }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn layer_point(&self, lat_lng: &LatLng) -> Point {
        self.crs.lat_lng_to_point(lat_lng, self.zoom).subtract(&self.origin)
    }

    /// On-screen length of `meters` at the given latitude. For a planar CRS
    /// the input is already in CRS units and only the zoom scale applies.
    pub fn meters_to_pixels(&self, meters: f64, at_lat: f64) -> f64 {
        if !self.crs.is_geographic() {
            return meters * self.crs.scale(self.zoom);
        }
        let world = TILE_SIZE as f64 * self.crs.scale(self.zoom);
        let meters_per_pixel = 2.0 * PI * EARTH_RADIUS * at_lat.to_radians().cos() / world;
        meters / meters_per_pixel
    }
}

/// Vector geometry variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polyline { points: Vec<LatLng> },
    Polygon { rings: Vec<Vec<LatLng>> },
    Circle { center: LatLng, radius_m: f64 },
}

/// Anything that can refresh its projected cache from a projector.
pub trait Projectable {
    fn reproject(&mut self, projector: &Projector);
}

/// Anything exposing projected rings ready for a path rasterizer.
pub trait Renderable {
    fn projected_rings(&self) -> &[Vec<Point>];
    fn pixel_bounds(&self) -> &Bounds;
}

/// Anything with a geographic extent.
pub trait BoundsProvider {
    fn geo_bounds(&self) -> Option<LatLngBounds>;
}

/// One shape plus its projected cache.
#[derive(Debug, Clone)]
pub struct VectorShape {
    id: u64,
    shape: Shape,
    projected: Vec<Vec<Point>>,
    pixel_bounds: Bounds,
}

impl VectorShape {
    fn new(id: u64, shape: Shape) -> Self {
        Self {
            id,
            shape,
            projected: Vec::new(),
            pixel_bounds: Bounds::empty(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

impl Projectable for VectorShape {
    fn reproject(&mut self, projector: &Projector) {
        self.projected.clear();
        self.pixel_bounds = Bounds::empty();

        match &self.shape {
            Shape::Polyline { points } => {
                let ring: Vec<Point> = points.iter().map(|p| projector.layer_point(p)).collect();
                for point in &ring {
                    self.pixel_bounds.extend(point);
                }
                self.projected.push(ring);
            }
            Shape::Polygon { rings } => {
                for ring in rings {
                    let projected: Vec<Point> =
                        ring.iter().map(|p| projector.layer_point(p)).collect();
                    for point in &projected {
                        self.pixel_bounds.extend(point);
                    }
                    self.projected.push(projected);
                }
            }
            Shape::Circle { center, radius_m } => {
                // Approximated as a closed ring so path rasterizers need no
                // special casing.
                let center_px = projector.layer_point(center);
                let radius_px = projector.meters_to_pixels(*radius_m, center.lat);
                const SEGMENTS: usize = 64;
                let ring: Vec<Point> = (0..=SEGMENTS)
                    .map(|i| {
                        let angle = i as f64 / SEGMENTS as f64 * 2.0 * PI;
                        Point::new(
                            center_px.x + radius_px * angle.cos(),
                            center_px.y + radius_px * angle.sin(),
                        )
                    })
                    .collect();
                for point in &ring {
                    self.pixel_bounds.extend(point);
                }
                self.projected.push(ring);
            }
        }
    }
}

impl Renderable for VectorShape {
    fn projected_rings(&self) -> &[Vec<Point>] {
        &self.projected
    }

    fn pixel_bounds(&self) -> &Bounds {
        &self.pixel_bounds
    }
}

impl BoundsProvider for VectorShape {
    fn geo_bounds(&self) -> Option<LatLngBounds> {
        let mut bounds = LatLngBounds::empty();
        match &self.shape {
            Shape::Polyline { points } => {
                for p in points {
                    bounds.extend(p);
                }
            }
            Shape::Polygon { rings } => {
                for ring in rings {
                    for p in ring {
                        bounds.extend(p);
                    }
                }
            }
            Shape::Circle { center, radius_m } => {
                // Degrees-per-meter bound; good enough for culling.
                let dlat = radius_m / 111_320.0;
                let dlng = dlat / center.lat.to_radians().cos().abs().max(1e-6);
                bounds.extend(&LatLng::new(center.lat - dlat, center.lng - dlng));
                bounds.extend(&LatLng::new(center.lat + dlat, center.lng + dlng));
            }
        }
        bounds.is_valid().then_some(bounds)
    }
}

/// Renderer holding all vector shapes and their projected caches.
pub struct VectorRenderer {
    shapes: HashMap<u64, VectorShape>,
    ids: IdAllocator,
    projector: Option<Projector>,
    crs: Crs,
    size: Point,
}

impl VectorRenderer {
    pub fn new(crs: Crs, size: Point) -> Self {
        Self {
            shapes: HashMap::default(),
            ids: IdAllocator::new(),
            projector: None,
            crs,
            size,
        }
    }

    pub fn add_shape(&mut self, shape: Shape) -> u64 {
        let id = self.ids.next_id();
        let mut entry = VectorShape::new(id, shape);
        if let Some(projector) = &self.projector {
            entry.reproject(projector);
        }
        self.shapes.insert(id, entry);
        id
    }

    pub fn remove_shape(&mut self, id: u64) -> Option<VectorShape> {
        self.shapes.remove(&id)
    }

    pub fn shape(&self, id: u64) -> Option<&VectorShape> {
        self.shapes.get(&id)
    }

    pub fn shapes(&self) -> impl Iterator<Item = &VectorShape> {
        self.shapes.values()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shapes whose pixel bounds intersect the current viewport. Layer
    /// points are origin-relative and the origin is the view top-left, so
    /// the viewport rectangle starts at zero.
    pub fn visible(&self) -> impl Iterator<Item = &VectorShape> {
        let view = Bounds::new(Point::new(0.0, 0.0), self.size);
        self.shapes
            .values()
            .filter(move |s| s.pixel_bounds.is_valid() && s.pixel_bounds.intersects(&view))
    }

    /// Routes view-lifecycle events: a view reset re-projects every cache,
    /// intermediate animation frames leave the caches untouched.
    pub fn handle_event(&mut self, event: &MapEvent) {
        match event {
            MapEvent::ViewReset { center, zoom } | MapEvent::MoveEnd { center, zoom } => {
                self.projector = Some(Projector::new(self.crs, center, *zoom, self.size));
                self.reproject_all();
            }
            MapEvent::Resize { new_size, .. } => {
                self.size = *new_size;
            }
            _ => {}
        }
    }

    fn reproject_all(&mut self) {
        if let Some(projector) = self.projector {
            for shape in self.shapes.values_mut() {
                shape.reproject(&projector);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer_at(center: LatLng, zoom: f64) -> VectorRenderer {
        let mut renderer = VectorRenderer::new(Crs::epsg3857(), Point::new(512.0, 512.0));
        renderer.handle_event(&MapEvent::ViewReset { center, zoom });
        renderer
    }

    #[test]
    fn test_polyline_projection() {
        let mut renderer = renderer_at(LatLng::new(0.0, 0.0), 2.0);
        let id = renderer.add_shape(Shape::Polyline {
            points: vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 10.0)],
        });

        let shape = renderer.shape(id).unwrap();
        let rings = shape.projected_rings();
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].len(), 2);
        // The map center projects to the viewport center.
        assert!((rings[0][0].x - 256.0).abs() < 1.0);
        assert!((rings[0][0].y - 256.0).abs() < 1.0);
        // 10° east is strictly to the right.
        assert!(rings[0][1].x > rings[0][0].x);
        assert!((rings[0][1].y - rings[0][0].y).abs() < 1e-6);
    }

    #[test]
    fn test_reproject_on_view_reset() {
        let mut renderer = renderer_at(LatLng::new(0.0, 0.0), 2.0);
        let id = renderer.add_shape(Shape::Polyline {
            points: vec![LatLng::new(0.0, 0.0)],
        });
        let before = renderer.shape(id).unwrap().projected_rings()[0][0];

        renderer.handle_event(&MapEvent::ViewReset {
            center: LatLng::new(0.0, 0.0),
            zoom: 3.0,
        });
        let after = renderer.shape(id).unwrap().projected_rings()[0][0];

        // Same screen position at the new zoom for the point under center.
        assert!((after.x - before.x).abs() < 1.0);
        // Zooming doubled the world scale behind it.
        let p2 = renderer.shape(id).unwrap();
        assert!(p2.pixel_bounds().is_valid());
    }

    #[test]
    fn test_circle_ring_is_closed() {
        let mut renderer = renderer_at(LatLng::new(40.0, -74.0), 10.0);
        let id = renderer.add_shape(Shape::Circle {
            center: LatLng::new(40.0, -74.0),
            radius_m: 1000.0,
        });

        let rings = renderer.shape(id).unwrap().projected_rings();
        let ring = &rings[0];
        assert!(ring.len() > 32);
        assert!((ring[0].x - ring[ring.len() - 1].x).abs() < 1e-6);
        assert!((ring[0].y - ring[ring.len() - 1].y).abs() < 1e-6);

        // 1 km at zoom 10 near 40°N is tens of pixels across.
        let bounds = renderer.shape(id).unwrap().pixel_bounds();
        assert!(bounds.width() > 5.0 && bounds.width() < 200.0);
    }

    #[test]
    fn test_visibility_culling() {
        let mut renderer = renderer_at(LatLng::new(0.0, 0.0), 4.0);
        renderer.add_shape(Shape::Polyline {
            points: vec![LatLng::new(0.0, -1.0), LatLng::new(0.0, 1.0)],
        });
        renderer.add_shape(Shape::Polyline {
            points: vec![LatLng::new(0.0, 170.0), LatLng::new(0.0, 175.0)],
        });

        assert_eq!(renderer.len(), 2);
        assert_eq!(renderer.visible().count(), 1);
    }

    #[test]
    fn test_geo_bounds() {
        let mut renderer = renderer_at(LatLng::new(0.0, 0.0), 2.0);
        let id = renderer.add_shape(Shape::Polygon {
            rings: vec![vec![
                LatLng::new(0.0, 0.0),
                LatLng::new(10.0, 0.0),
                LatLng::new(10.0, 10.0),
            ]],
        });

        let bounds = renderer.shape(id).unwrap().geo_bounds().unwrap();
        assert_eq!(bounds.south_west, LatLng::new(0.0, 0.0));
        assert_eq!(bounds.north_east, LatLng::new(10.0, 10.0));
    }

    #[test]
    fn test_remove_shape() {
        let mut renderer = renderer_at(LatLng::new(0.0, 0.0), 2.0);
        let id = renderer.add_shape(Shape::Polyline {
            points: vec![LatLng::new(0.0, 0.0)],
        });
        assert!(renderer.remove_shape(id).is_some());
        assert!(renderer.is_empty());
        assert!(renderer.remove_shape(id).is_none());
    }
}
