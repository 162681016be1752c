//! View animations. Every animation here is a pure function of elapsed time:
//! construction captures the endpoints, `sample` maps a time offset to a view
//! state, and the caller owns the clock. That keeps them unit-testable
//! without faking frame timing.

use crate::core::geo::{LatLng, Point};
use crate::prelude::Duration;

/// Interpolation between two values of the same type.
pub trait Lerp {
    fn lerp(&self, other: &Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        self + (other - self) * t
    }
}

impl Lerp for Point {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        Point::new(self.x.lerp(&other.x, t), self.y.lerp(&other.y, t))
    }
}

impl Lerp for LatLng {
    fn lerp(&self, other: &Self, t: f64) -> Self {
        LatLng::new(self.lat.lerp(&other.lat, t), self.lng.lerp(&other.lng, t))
    }
}

/// Easing curves applied to normalized animation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EasingType {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    /// Smooth step (3t² - 2t³).
    Smooth,
}

impl EasingType {
    /// Applies the easing function to a normalized time value in [0, 1].
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            EasingType::Linear => t,
            EasingType::EaseIn => t * t * t,
            EasingType::EaseOut => {
                let t = t - 1.0;
                t * t * t + 1.0
            }
            EasingType::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            EasingType::Smooth => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// A sampled animation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrame {
    pub center: LatLng,
    pub zoom: f64,
    pub done: bool,
}

/// Pure translation at constant zoom, interpolated in world-pixel space so
/// the motion is straight on screen.
#[derive(Debug, Clone)]
pub struct PanAnimation {
    pub from: Point,
    pub to: Point,
    pub zoom: f64,
    pub duration: Duration,
    pub easing: EasingType,
}

impl PanAnimation {
    pub fn new(from: Point, to: Point, zoom: f64, duration: Duration, easing: EasingType) -> Self {
        Self {
            from,
            to,
            zoom,
            duration,
            easing,
        }
    }

    /// World-pixel center after `elapsed`; the flag reports completion.
    pub fn sample(&self, elapsed: Duration) -> (Point, bool) {
        let t = progress(elapsed, self.duration);
        if t >= 1.0 {
            (self.to, true)
        } else {
            (self.from.lerp(&self.to, self.easing.apply(t)), false)
        }
    }
}

/// Combined center/zoom interpolation used for animated zooms.
#[derive(Debug, Clone)]
pub struct ZoomAnimation {
    pub from_center: LatLng,
    pub to_center: LatLng,
    pub from_zoom: f64,
    pub to_zoom: f64,
    pub duration: Duration,
    pub easing: EasingType,
}

impl ZoomAnimation {
    pub fn new(
        from_center: LatLng,
        to_center: LatLng,
        from_zoom: f64,
        to_zoom: f64,
        duration: Duration,
        easing: EasingType,
    ) -> Self {
        Self {
            from_center,
            to_center,
            from_zoom,
            to_zoom,
            duration,
            easing,
        }
    }

    pub fn sample(&self, elapsed: Duration) -> ViewFrame {
        let t = progress(elapsed, self.duration);
        if t >= 1.0 {
            return ViewFrame {
                center: self.to_center,
                zoom: self.to_zoom,
                done: true,
            };
        }
        let eased = self.easing.apply(t);
        ViewFrame {
            center: self.from_center.lerp(&self.to_center, eased),
            zoom: self.from_zoom.lerp(&self.to_zoom, eased),
            done: false,
        }
    }
}

/// Hyperbolic fly-to path: a velocity profile that reads as a combined
/// zoom-out/pan/zoom-in, parameterized by the steepness constant `rho`.
/// All inputs are in world pixels at the starting zoom.
#[derive(Debug, Clone)]
pub struct FlyPath {
    from: Point,
    to: Point,
    start_zoom: f64,
    target_zoom: f64,
    w0: f64,
    w1: f64,
    u1: f64,
    rho: f64,
    r0: f64,
    s_total: f64,
}

impl FlyPath {
    pub fn new(
        from: Point,
        to: Point,
        size: Point,
        start_zoom: f64,
        target_zoom: f64,
        rho: f64,
    ) -> Self {
        let w0 = size.x.max(size.y);
        let w1 = w0 * 2_f64.powf(start_zoom - target_zoom);
        let mut u1 = to.distance_to(&from);
        if u1 == 0.0 {
            u1 = 1.0;
        }

        let mut path = Self {
            from,
            to,
            start_zoom,
            target_zoom,
            w0,
            w1,
            u1,
            rho,
            r0: 0.0,
            s_total: 0.0,
        };
        path.r0 = path.r(false);
        path.s_total = (path.r(true) - path.r0) / rho;
        path
    }

    fn r(&self, far_end: bool) -> f64 {
        let rho2 = self.rho * self.rho;
        let s1 = if far_end { -1.0 } else { 1.0 };
        let s2 = if far_end { self.w1 } else { self.w0 };
        let t1 = self.w1 * self.w1 - self.w0 * self.w0 + s1 * rho2 * rho2 * self.u1 * self.u1;
        let b = t1 / (2.0 * s2 * rho2 * self.u1);
        let sq = (b * b + 1.0).sqrt() - b;
        if sq < 1e-9 {
            -18.0
        } else {
            sq.ln()
        }
    }

    fn w(&self, s: f64) -> f64 {
        self.w0 * (self.r0.cosh() / (self.r0 + self.rho * s).cosh())
    }

    fn u(&self, s: f64) -> f64 {
        let rho2 = self.rho * self.rho;
        self.w0 * (self.r0.cosh() * (self.r0 + self.rho * s).tanh() - self.r0.sinh()) / rho2
    }

    /// Natural duration of the path.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64((self.s_total * 0.8).max(0.25))
    }

    /// Samples the path at completion fraction `t` in [0, 1]. Returns the
    /// world-pixel center at the starting zoom and the continuous zoom.
    /// At `t >= 1` the exact target is returned.
    pub fn sample(&self, t: f64) -> (Point, f64) {
        if t >= 1.0 {
            return (self.to, self.target_zoom);
        }
        let s = ease_fly(t) * self.s_total;
        let along = self.u(s) / self.u1;
        let center = self.from.add(&self.to.subtract(&self.from).multiply(along));
        let zoom = self.start_zoom + (self.w0 / self.w(s)).log2();
        (center, zoom)
    }
}

fn ease_fly(t: f64) -> f64 {
    1.0 - (1.0 - t.clamp(0.0, 1.0)).powf(1.5)
}

fn progress(elapsed: Duration, duration: Duration) -> f64 {
    if duration.as_secs_f64() <= 0.0 {
        1.0
    } else {
        elapsed.as_secs_f64() / duration.as_secs_f64()
    }
}
