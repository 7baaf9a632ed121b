//! Stroke capture: pointer and touch input in display space becomes vector
//! paths in natural-pixel space, committed into the surface's [`MaskState`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::debug;

use crate::{
    config::BrushConfig,
    geometry::{Dimensions, Point, Viewport},
    mask::MaskState,
};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DrawMode {
    /// Freehand line with round caps and joins
    #[default]
    Brush,
    /// Closed, filled outline
    Lasso,
}

/// One pointer-down to pointer-up path, in natural pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub brush_width: f32,
    pub kind: DrawMode,
}

/// Raw pointer input as delivered by the UI layer, in client coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PointerInput {
    Mouse { client_x: f32, client_y: f32 },
    Touch { touches: Vec<Point> },
}

impl PointerInput {
    pub fn mouse(client_x: f32, client_y: f32) -> Self {
        Self::Mouse { client_x, client_y }
    }

    /// The client position this input refers to; the first touch wins.
    pub fn client_position(&self) -> Option<Point> {
        match self {
            Self::Mouse { client_x, client_y } => Some(Point::new(*client_x, *client_y)),
            Self::Touch { touches } => touches.first().copied(),
        }
    }
}

/// What the UI should render in response to an input.
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeEvent {
    /// Draw this segment now (brush trail). `from == to` for the initial dab.
    Segment { from: Point, to: Point, width: f32 },
    /// Lasso point recorded, nothing to draw yet.
    Pending(Point),
    /// The path was stored in the mask at this index.
    Committed(usize),
    /// Input arrived with no stroke in progress, or carried no position.
    Ignored,
}

/// Owns the single drawing context and the active [`MaskState`] of a view.
#[derive(Debug, Clone)]
pub struct StrokeSurface {
    mask: MaskState,
    viewport: Viewport,
    mode: DrawMode,
    brush: BrushConfig,
    brush_width: f32,
    current: Option<Vec<Point>>,
}

impl StrokeSurface {
    pub fn new(dimensions: Dimensions, brush: BrushConfig) -> Self {
        Self {
            mask: MaskState::new(dimensions),
            viewport: Viewport::natural(dimensions),
            mode: DrawMode::default(),
            brush_width: brush.default_width,
            brush,
            current: None,
        }
    }

    pub fn mask(&self) -> &MaskState {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut MaskState {
        &mut self.mask
    }

    pub fn dimensions(&self) -> Dimensions {
        self.mask.dimensions()
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Brush width in display pixels, as the user picked it.
    pub fn brush_width(&self) -> f32 {
        self.brush_width
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Switch tool. Any uncommitted path is thrown away.
    pub fn set_mode(&mut self, mode: DrawMode) {
        if let Some(points) = self.current.take() {
            debug!(points = points.len(), "discarding in-progress stroke on mode switch");
        }
        self.mode = mode;
    }

    pub fn set_brush_width(&mut self, width: f32) {
        self.brush_width = width.clamp(self.brush.min_width, self.brush.max_width);
    }

    /// Width a committed stroke in the current mode will carry, in natural pixels.
    pub fn natural_stroke_width(&self) -> f32 {
        let display = match self.mode {
            DrawMode::Brush => self.brush_width,
            DrawMode::Lasso => self.brush.lasso_outline_width,
        };
        self.viewport.length_to_natural(display, self.dimensions())
    }

    /// The uncommitted path, for rendering a live preview.
    pub fn in_progress(&self) -> Option<&[Point]> {
        self.current.as_deref()
    }

    pub fn is_drawing(&self) -> bool {
        self.current.is_some()
    }

    /// Convert raw input to natural-pixel space.
    pub fn locate(&self, input: &PointerInput) -> Option<Point> {
        let client = input.client_position()?;
        Some(self.viewport.to_natural(client, self.dimensions()))
    }

    pub fn start_stroke(&mut self, input: &PointerInput) -> StrokeEvent {
        let Some(point) = self.locate(input) else {
            return StrokeEvent::Ignored;
        };
        if let Some(stale) = self.current.replace(vec![point]) {
            debug!(points = stale.len(), "pointer down while drawing, restarting stroke");
        }

        match self.mode {
            DrawMode::Brush => StrokeEvent::Segment {
                from: point,
                to: point,
                width: self.natural_stroke_width(),
            },
            DrawMode::Lasso => StrokeEvent::Pending(point),
        }
    }

    pub fn extend_stroke(&mut self, input: &PointerInput) -> StrokeEvent {
        let Some(point) = self.locate(input) else {
            return StrokeEvent::Ignored;
        };
        let width = self.natural_stroke_width();
        let mode = self.mode;
        let Some(points) = self.current.as_mut() else {
            return StrokeEvent::Ignored;
        };

        let last = points.last().copied().unwrap_or(point);
        points.push(point);

        match mode {
            DrawMode::Brush => StrokeEvent::Segment {
                from: last,
                to: point,
                width,
            },
            DrawMode::Lasso => StrokeEvent::Pending(point),
        }
    }

    /// Commit the in-progress path. Lasso paths are closed when rasterized,
    /// whether or not the last point meets the first.
    pub fn end_stroke(&mut self) -> StrokeEvent {
        let Some(points) = self.current.take() else {
            return StrokeEvent::Ignored;
        };
        if points.is_empty() {
            return StrokeEvent::Ignored;
        }

        let stroke = Stroke {
            points,
            brush_width: self.natural_stroke_width(),
            kind: self.mode,
        };
        debug!(
            kind = %stroke.kind,
            points = stroke.points.len(),
            width = stroke.brush_width,
            "stroke committed"
        );
        self.mask.push_stroke(stroke);
        StrokeEvent::Committed(self.mask.strokes().len() - 1)
    }

    /// Clear the mask. The in-progress path, if any, is kept.
    pub fn clear(&mut self) {
        self.mask.clear();
    }

    /// Start over against a new base image.
    pub fn reset(&mut self, dimensions: Dimensions) {
        if dimensions != self.dimensions() {
            debug!(from = %self.dimensions(), to = %dimensions, "surface resized for new base image");
            // an unset viewport follows the image
            if self.viewport == Viewport::natural(self.dimensions()) {
                self.viewport = Viewport::natural(dimensions);
            }
        }
        self.mask = MaskState::new(dimensions);
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> StrokeSurface {
        StrokeSurface::new(Dimensions::new(200, 100), BrushConfig::default())
    }

    fn draw(surface: &mut StrokeSurface, points: &[(f32, f32)]) -> StrokeEvent {
        let mut iter = points.iter();
        if let Some(&(x, y)) = iter.next() {
            surface.start_stroke(&PointerInput::mouse(x, y));
        }
        for &(x, y) in iter {
            surface.extend_stroke(&PointerInput::mouse(x, y));
        }
        surface.end_stroke()
    }

    #[test]
    fn display_coordinates_are_scaled_to_natural_pixels() {
        let mut surface = surface();
        // image shown at half size, offset on the page
        surface.set_viewport(Viewport::new(10.0, 20.0, 100.0, 50.0));
        surface.set_brush_width(10.0);

        assert_eq!(draw(&mut surface, &[(10.0, 20.0), (60.0, 45.0)]), StrokeEvent::Committed(0));

        let stroke = &surface.mask().strokes()[0];
        assert_eq!(stroke.points, vec![Point::new(0.0, 0.0), Point::new(100.0, 50.0)]);
        assert_eq!(stroke.brush_width, 20.0);
    }

    #[test]
    fn touch_and_mouse_share_coordinate_extraction() {
        let surface = surface();
        let touch = PointerInput::Touch {
            touches: vec![Point::new(3.0, 4.0), Point::new(90.0, 90.0)],
        };
        assert_eq!(surface.locate(&touch), surface.locate(&PointerInput::mouse(3.0, 4.0)));
        assert_eq!(surface.locate(&PointerInput::Touch { touches: vec![] }), None);
    }

    #[test]
    fn brush_mode_emits_segments_as_the_pointer_moves() {
        let mut surface = surface();
        let first = surface.start_stroke(&PointerInput::mouse(5.0, 5.0));
        assert!(matches!(first, StrokeEvent::Segment { from, to, .. } if from == to));

        let next = surface.extend_stroke(&PointerInput::mouse(8.0, 9.0));
        assert_eq!(
            next,
            StrokeEvent::Segment {
                from: Point::new(5.0, 5.0),
                to: Point::new(8.0, 9.0),
                width: 20.0,
            }
        );
    }

    #[test]
    fn lasso_mode_accumulates_without_drawing() {
        let mut surface = surface();
        surface.set_mode(DrawMode::Lasso);
        assert_eq!(
            surface.start_stroke(&PointerInput::mouse(1.0, 1.0)),
            StrokeEvent::Pending(Point::new(1.0, 1.0))
        );
        assert!(matches!(
            surface.extend_stroke(&PointerInput::mouse(50.0, 1.0)),
            StrokeEvent::Pending(_)
        ));
        assert_eq!(surface.end_stroke(), StrokeEvent::Committed(0));
        let stroke = &surface.mask().strokes()[0];
        assert_eq!(stroke.kind, DrawMode::Lasso);
        assert_eq!(stroke.brush_width, 2.0);
    }

    #[test]
    fn mode_switch_discards_only_the_in_progress_path() {
        let mut surface = surface();
        draw(&mut surface, &[(1.0, 1.0), (10.0, 10.0)]);

        surface.start_stroke(&PointerInput::mouse(20.0, 20.0));
        surface.extend_stroke(&PointerInput::mouse(30.0, 30.0));
        surface.set_mode(DrawMode::Lasso);

        assert!(surface.in_progress().is_none());
        assert_eq!(surface.end_stroke(), StrokeEvent::Ignored);
        assert_eq!(surface.mask().strokes().len(), 1);
        assert_eq!(surface.mask().strokes()[0].points[1], Point::new(10.0, 10.0));
    }

    #[test]
    fn brush_width_is_clamped_to_configured_range() {
        let mut surface = surface();
        surface.set_brush_width(1.0);
        assert_eq!(surface.brush_width(), 5.0);
        surface.set_brush_width(500.0);
        assert_eq!(surface.brush_width(), 100.0);
    }

    #[test]
    fn extend_without_start_is_ignored() {
        let mut surface = surface();
        assert_eq!(surface.extend_stroke(&PointerInput::mouse(1.0, 1.0)), StrokeEvent::Ignored);
        assert_eq!(surface.end_stroke(), StrokeEvent::Ignored);
        assert!(surface.mask().is_empty());
    }

    #[test]
    fn reset_replaces_mask_dimensions() {
        let mut surface = surface();
        draw(&mut surface, &[(1.0, 1.0)]);
        surface.reset(Dimensions::new(64, 32));
        assert!(surface.mask().is_empty());
        assert_eq!(surface.dimensions(), Dimensions::new(64, 32));
    }
}
