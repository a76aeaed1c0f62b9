//! Pan/zoom mapping between screen space and content space.
//!
//! Screen space is the pointer coordinate system of the canvas element.
//! Content space is where layer positions live. The viewport [`Transform`]
//! maps one onto the other: `screen = content * scale + (x, y)`.

use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 10.0;
pub const DEFAULT_ZOOM_SENSITIVITY: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Zoom limits and wheel sensitivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min_scale: f64,
    pub max_scale: f64,
    pub sensitivity: f64,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self {
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
            sensitivity: DEFAULT_ZOOM_SENSITIVITY,
        }
    }
}

/// Viewport pan offset and zoom factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        scale: 1.0,
    };

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }

    /// Apply one wheel event at `anchor` (screen space).
    ///
    /// With the precision modifier held the wheel zooms about `anchor`, so the
    /// content point under the cursor stays put. Without it the wheel scrolls
    /// vertically.
    pub fn zoom_about(
        &mut self,
        anchor: Point,
        delta_y: f64,
        precision: bool,
        limits: &ZoomLimits,
    ) {
        if !precision {
            self.y -= delta_y;
            return;
        }

        let old_scale = self.scale;
        let factor = 1.0 - delta_y * limits.sensitivity;
        let new_scale = (old_scale * factor).clamp(limits.min_scale, limits.max_scale);

        let mx = anchor.x - self.x;
        let my = anchor.y - self.y;
        self.x += mx - mx * new_scale / old_scale;
        self.y += my - my * new_scale / old_scale;
        self.scale = new_scale;
    }

    /// Clamp the zoom factor into `limits`, e.g. after loading a saved project.
    pub fn clamped(self, limits: &ZoomLimits) -> Self {
        Self {
            scale: self.scale.clamp(limits.min_scale, limits.max_scale),
            ..self
        }
    }
}

#[inline]
pub fn screen_to_content(screen: Point, transform: &Transform) -> Point {
    Point {
        x: (screen.x - transform.x) / transform.scale,
        y: (screen.y - transform.y) / transform.scale,
    }
}

#[inline]
pub fn content_to_screen(content: Point, transform: &Transform) -> Point {
    Point {
        x: content.x * transform.scale + transform.x,
        y: content.y * transform.scale + transform.y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn screen_to_content_inverts_forward_mapping() {
        let scales = [MIN_SCALE, 0.25, 0.5, 1.0, 1.1, 3.7, MAX_SCALE];
        let points = [(0.0, 0.0), (12.5, -40.0), (-300.25, 1024.0), (1e5, -1e4)];
        for scale in scales {
            let transform = Transform {
                x: -37.5,
                y: 91.0,
                scale,
            };
            for (x, y) in points {
                let content = Point::new(x, y);
                let back = screen_to_content(content_to_screen(content, &transform), &transform);
                assert!(approx(back.x, x), "x round trip at scale {scale}");
                assert!(approx(back.y, y), "y round trip at scale {scale}");
            }
        }
    }

    #[test]
    fn precision_zoom_matches_formula_exactly() {
        let mut transform = Transform {
            x: 20.0,
            y: 10.0,
            scale: 1.0,
        };
        let anchor = Point::new(120.0, 60.0);
        transform.zoom_about(anchor, -100.0, true, &ZoomLimits::default());

        let new_scale = 1.0 * (1.0 - (-100.0) * 0.001);
        assert!(approx(transform.scale, 1.1));
        let mx = 120.0 - 20.0;
        let my = 60.0 - 10.0;
        assert_eq!(transform.scale, new_scale);
        assert_eq!(transform.x, 20.0 + (mx - mx * new_scale / 1.0));
        assert_eq!(transform.y, 10.0 + (my - my * new_scale / 1.0));
    }

    #[test]
    fn precision_zoom_keeps_content_under_cursor() {
        let limits = ZoomLimits::default();
        let mut transform = Transform {
            x: -15.0,
            y: 33.0,
            scale: 2.0,
        };
        let anchor = Point::new(400.0, 250.0);
        for delta in [-100.0, 35.0, -250.0, 600.0, 10.0] {
            let before = screen_to_content(anchor, &transform);
            transform.zoom_about(anchor, delta, true, &limits);
            let after = screen_to_content(anchor, &transform);
            assert!(approx(before.x, after.x), "delta {delta}");
            assert!(approx(before.y, after.y), "delta {delta}");
        }
    }

    #[test]
    fn scale_stays_clamped_for_any_wheel_sequence() {
        let limits = ZoomLimits::default();
        let mut transform = Transform::IDENTITY;
        let deltas = [-5000.0, -5000.0, -900.0, 900.0, 999.0, 5000.0, -1.0, 1.0, 2000.0];
        for delta in deltas {
            transform.zoom_about(Point::new(5.0, 5.0), delta, true, &limits);
            assert!(transform.scale >= MIN_SCALE && transform.scale <= MAX_SCALE);
        }
    }

    #[test]
    fn zoom_at_clamp_limit_leaves_position_unchanged() {
        let limits = ZoomLimits::default();
        let mut transform = Transform {
            x: 7.0,
            y: -3.0,
            scale: MAX_SCALE,
        };
        transform.zoom_about(Point::new(50.0, 80.0), -200.0, true, &limits);
        assert_eq!(transform.scale, MAX_SCALE);
        assert_eq!(transform.x, 7.0);
        assert_eq!(transform.y, -3.0);
    }

    #[test]
    fn wheel_without_modifier_scrolls_vertically() {
        let mut transform = Transform::IDENTITY;
        transform.zoom_about(Point::new(1.0, 1.0), 40.0, false, &ZoomLimits::default());
        assert_eq!(transform.y, -40.0);
        assert_eq!(transform.x, 0.0);
        assert_eq!(transform.scale, 1.0);
    }
}
