use std::fmt;

use geo::Intersects;
use geo_types::{Coord, Rect};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A position in natural-pixel coordinates of the base image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Natural pixel size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, TS)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned box in top-left/width/height form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a box from its center and size.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn from_corners(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// True when all components are finite and the extent is non-empty.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn to_rect(&self) -> Rect<f32> {
        Rect::new(
            Coord { x: self.x, y: self.y },
            Coord {
                x: self.x + self.width,
                y: self.y + self.height,
            },
        )
    }

    /// Inclusive containment test, edges count as inside.
    pub fn contains(&self, point: Point) -> bool {
        self.to_rect().intersects(&Coord {
            x: point.x,
            y: point.y,
        })
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Pixel span `(x0, y0, x1, y1)` covered by the box, clipped to `dims`.
    /// End coordinates are exclusive. `None` when the box lies outside the image.
    pub fn pixel_span(&self, dims: Dimensions) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(dims.width as f32);
        let y1 = (self.y + self.height).ceil().min(dims.height as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// On-screen rectangle the base image is currently displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Viewport {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// A viewport showing the image at its natural size at the origin.
    pub fn natural(dims: Dimensions) -> Self {
        Self::new(0.0, 0.0, dims.width as f32, dims.height as f32)
    }

    /// Per-axis `naturalSize / displayedSize`.
    pub fn scale(&self, natural: Dimensions) -> (f32, f32) {
        let sx = if self.width > 0.0 {
            natural.width as f32 / self.width
        } else {
            1.0
        };
        let sy = if self.height > 0.0 {
            natural.height as f32 / self.height
        } else {
            1.0
        };
        (sx, sy)
    }

    /// Map a client-space position into natural-pixel space.
    pub fn to_natural(&self, client: Point, natural: Dimensions) -> Point {
        let (sx, sy) = self.scale(natural);
        Point::new((client.x - self.left) * sx, (client.y - self.top) * sy)
    }

    /// Convert a display length (brush width) into natural pixels.
    pub fn length_to_natural(&self, length: f32, natural: Dimensions) -> f32 {
        let (sx, sy) = self.scale(natural);
        length * (sx + sy) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_box_converts_to_top_left() {
        let bbox = BoundingBox::from_center(50.0, 50.0, 20.0, 10.0);
        assert_eq!(bbox, BoundingBox::new(40.0, 45.0, 20.0, 10.0));
    }

    #[test]
    fn contains_is_inclusive_of_edges() {
        let bbox = BoundingBox::new(10.0, 10.0, 5.0, 5.0);
        assert!(bbox.contains(Point::new(10.0, 10.0)));
        assert!(bbox.contains(Point::new(15.0, 15.0)));
        assert!(!bbox.contains(Point::new(15.1, 12.0)));
    }

    #[test]
    fn pixel_span_is_clipped() {
        let bbox = BoundingBox::new(-5.0, 2.5, 20.0, 4.0);
        let span = bbox.pixel_span(Dimensions::new(10, 10));
        assert_eq!(span, Some((0, 2, 10, 7)));

        let outside = BoundingBox::new(50.0, 50.0, 4.0, 4.0);
        assert_eq!(outside.pixel_span(Dimensions::new(10, 10)), None);
    }

    #[test]
    fn viewport_scales_display_to_natural() {
        let natural = Dimensions::new(1000, 500);
        let viewport = Viewport::new(100.0, 50.0, 500.0, 250.0);

        let p = viewport.to_natural(Point::new(350.0, 175.0), natural);
        assert_eq!(p, Point::new(500.0, 250.0));
        assert_eq!(viewport.length_to_natural(10.0, natural), 20.0);
    }

    #[test]
    fn degenerate_viewport_falls_back_to_unit_scale() {
        let viewport = Viewport::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(viewport.scale(Dimensions::new(64, 64)), (1.0, 1.0));
    }
}
