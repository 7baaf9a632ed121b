use image::{DynamicImage, GrayImage, Luma, Pixel, Rgba, RgbaImage};
use imageproc::{
    drawing::{Canvas, draw_filled_circle_mut, draw_polygon_mut},
    point::Point as PixelPoint,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    encoding::EncodedImage,
    error::Result,
    geometry::Point,
    mask::MaskState,
    stroke::{DrawMode, Stroke},
};

const MASK_ON: Luma<u8> = Luma([255]);
const MASK_OFF: Luma<u8> = Luma([0]);

/// Appearance of the visual-prompt overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RasterStyle {
    /// RGBA; the alpha channel sets the overlay's translucency
    pub overlay_color: [u8; 4],
}

impl Default for RasterStyle {
    fn default() -> Self {
        Self {
            overlay_color: [57, 255, 20, 128],
        }
    }
}

/// Binary mask pixels: black background, external mask then strokes in white.
/// `None` when nothing is selected.
pub fn render_mask(mask: &MaskState) -> Option<GrayImage> {
    if mask.is_empty() {
        return None;
    }
    let dims = mask.dimensions();
    let mut canvas = GrayImage::from_pixel(dims.width, dims.height, MASK_OFF);

    if let Some(external) = mask.external_mask() {
        for (dst, src) in canvas.pixels_mut().zip(external.pixels()) {
            if src.0[0] > 0 {
                *dst = MASK_ON;
            }
        }
    }

    for stroke in mask.strokes() {
        paint_stroke(&mut canvas, stroke, MASK_ON);
    }

    Some(canvas)
}

/// Same geometry as [`render_mask`], painted translucent on a transparent
/// background.
pub fn render_overlay(mask: &MaskState, style: &RasterStyle) -> Option<RgbaImage> {
    if mask.is_empty() {
        return None;
    }
    let dims = mask.dimensions();
    let color = Rgba(style.overlay_color);
    let mut canvas = RgbaImage::from_pixel(dims.width, dims.height, Rgba([0, 0, 0, 0]));

    if let Some(external) = mask.external_mask() {
        for (dst, src) in canvas.pixels_mut().zip(external.pixels()) {
            if src.0[0] > 0 {
                *dst = color;
            }
        }
    }

    for stroke in mask.strokes() {
        paint_stroke(&mut canvas, stroke, color);
    }

    Some(canvas)
}

/// PNG bytes of the binary mask, or `None` for an empty selection.
pub fn rasterize(mask: &MaskState) -> Result<Option<EncodedImage>> {
    render_mask(mask)
        .map(|pixels| EncodedImage::png(&DynamicImage::ImageLuma8(pixels)))
        .transpose()
}

/// PNG bytes of the translucent overlay, or `None` for an empty selection.
pub fn rasterize_overlay(mask: &MaskState, style: &RasterStyle) -> Result<Option<EncodedImage>> {
    render_overlay(mask, style)
        .map(|pixels| EncodedImage::png(&DynamicImage::ImageRgba8(pixels)))
        .transpose()
}

/// Paint a stroke with round caps and joins. Lasso strokes are closed back to
/// their first point and filled before the outline is drawn.
pub fn paint_stroke<C>(canvas: &mut C, stroke: &Stroke, color: C::Pixel)
where
    C: Canvas,
    C::Pixel: Pixel,
{
    let points = dedup_consecutive(&stroke.points);
    let radius = stroke.brush_width / 2.0;

    if stroke.kind == DrawMode::Lasso {
        fill_polygon(canvas, &points, color);
    }

    for pair in points.windows(2) {
        paint_segment(canvas, pair[0], pair[1], radius, color);
    }
    if stroke.kind == DrawMode::Lasso && points.len() > 2 {
        paint_segment(canvas, points[points.len() - 1], points[0], radius, color);
    }
    for point in &points {
        paint_dab(canvas, *point, radius, color);
    }
}

fn dedup_consecutive(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for point in points {
        if out.last() != Some(point) {
            out.push(*point);
        }
    }
    out
}

fn to_pixel(point: Point) -> PixelPoint<i32> {
    PixelPoint::new(point.x.round() as i32, point.y.round() as i32)
}

fn fill_polygon<C>(canvas: &mut C, points: &[Point], color: C::Pixel)
where
    C: Canvas,
{
    let mut poly: Vec<PixelPoint<i32>> = Vec::with_capacity(points.len());
    for point in points.iter().copied().map(to_pixel) {
        if poly.last() != Some(&point) {
            poly.push(point);
        }
    }
    // closing is implicit; the polygon routine rejects an explicit closing vertex
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() >= 3 {
        draw_polygon_mut(canvas, &poly, color);
    }
}

fn paint_segment<C>(canvas: &mut C, from: Point, to: Point, radius: f32, color: C::Pixel)
where
    C: Canvas,
{
    let length = from.distance_to(&to);
    if length < f32::EPSILON {
        return;
    }
    let nx = -(to.y - from.y) / length * radius;
    let ny = (to.x - from.x) / length * radius;

    let quad = [
        to_pixel(Point::new(from.x + nx, from.y + ny)),
        to_pixel(Point::new(to.x + nx, to.y + ny)),
        to_pixel(Point::new(to.x - nx, to.y - ny)),
        to_pixel(Point::new(from.x - nx, from.y - ny)),
    ];
    if quad[0] != quad[3] && quad[0] != quad[1] {
        draw_polygon_mut(canvas, &quad, color);
    }
}

fn paint_dab<C>(canvas: &mut C, center: Point, radius: f32, color: C::Pixel)
where
    C: Canvas,
{
    let c = to_pixel(center);
    draw_filled_circle_mut(canvas, (c.x, c.y), radius.round().max(0.0) as i32, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Dimensions;

    fn brush(points: &[(f32, f32)], width: f32) -> Stroke {
        Stroke {
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            brush_width: width,
            kind: DrawMode::Brush,
        }
    }

    fn lasso(points: &[(f32, f32)]) -> Stroke {
        Stroke {
            kind: DrawMode::Lasso,
            ..brush(points, 2.0)
        }
    }

    fn lit(image: &GrayImage, x: u32, y: u32) -> bool {
        image.get_pixel(x, y).0[0] == 255
    }

    #[test]
    fn empty_mask_yields_no_image() {
        let mask = MaskState::new(Dimensions::new(10, 10));
        assert!(render_mask(&mask).is_none());
        assert!(rasterize(&mask).expect("rasterize").is_none());
        assert!(rasterize_overlay(&mask, &RasterStyle::default()).expect("overlay").is_none());
    }

    #[test]
    fn mask_matches_natural_dimensions() {
        let mut mask = MaskState::new(Dimensions::new(120, 80));
        mask.push_stroke(brush(&[(10.0, 10.0), (400.0, 300.0)], 6.0));

        let png = rasterize(&mask).expect("rasterize").expect("mask present");
        assert_eq!(png.dimensions, Dimensions::new(120, 80));
        assert_eq!(png.decode().expect("decode").dimensions(), (120, 80));
    }

    #[test]
    fn brush_stroke_is_white_on_black() {
        let mut mask = MaskState::new(Dimensions::new(40, 40));
        mask.push_stroke(brush(&[(5.0, 20.0), (35.0, 20.0)], 6.0));

        let pixels = render_mask(&mask).expect("mask present");
        assert!(lit(&pixels, 20, 20));
        assert!(lit(&pixels, 20, 18));
        // round cap extends past the end point
        assert!(lit(&pixels, 37, 20));
        assert!(!lit(&pixels, 20, 30));
        assert!(!lit(&pixels, 0, 0));
    }

    #[test]
    fn single_point_stroke_leaves_a_dab() {
        let mut mask = MaskState::new(Dimensions::new(20, 20));
        mask.push_stroke(brush(&[(10.0, 10.0)], 8.0));

        let pixels = render_mask(&mask).expect("mask present");
        assert!(lit(&pixels, 10, 10));
        assert!(lit(&pixels, 13, 10));
        assert!(!lit(&pixels, 16, 10));
    }

    #[test]
    fn open_lasso_is_closed_and_filled() {
        let mut mask = MaskState::new(Dimensions::new(50, 50));
        // ends far from where it started
        mask.push_stroke(lasso(&[(10.0, 10.0), (40.0, 10.0), (40.0, 40.0), (10.0, 40.0)]));

        let pixels = render_mask(&mask).expect("mask present");
        assert!(lit(&pixels, 25, 25));
        assert!(lit(&pixels, 12, 38));
        // closing edge from (10,40) back to (10,10)
        assert!(lit(&pixels, 10, 25));
        assert!(!lit(&pixels, 45, 45));
    }

    #[test]
    fn lasso_with_explicit_closing_point_is_accepted() {
        let mut mask = MaskState::new(Dimensions::new(30, 30));
        mask.push_stroke(lasso(&[(5.0, 5.0), (25.0, 5.0), (15.0, 25.0), (5.0, 5.0)]));

        let pixels = render_mask(&mask).expect("mask present");
        assert!(lit(&pixels, 15, 12));
    }

    #[test]
    fn strokes_draw_over_external_mask() {
        let mut mask = MaskState::new(Dimensions::new(20, 20));
        let mut external = GrayImage::new(20, 20);
        for x in 0..5 {
            external.put_pixel(x, 0, Luma([255]));
        }
        mask.set_external_binary(external);
        mask.push_stroke(brush(&[(15.0, 15.0)], 4.0));

        let pixels = render_mask(&mask).expect("mask present");
        assert!(lit(&pixels, 2, 0));
        assert!(lit(&pixels, 15, 15));
        assert!(!lit(&pixels, 10, 10));
    }

    #[test]
    fn rasterize_is_idempotent() {
        let mut mask = MaskState::new(Dimensions::new(64, 64));
        mask.push_stroke(brush(&[(3.0, 3.0), (60.0, 31.0), (12.0, 50.0)], 9.0));
        mask.push_stroke(lasso(&[(30.0, 30.0), (50.0, 35.0), (33.0, 55.0)]));

        let first = rasterize(&mask).expect("rasterize");
        let second = rasterize(&mask).expect("rasterize");
        assert_eq!(first, second);
    }

    #[test]
    fn overlay_is_translucent_on_transparent() {
        let mut mask = MaskState::new(Dimensions::new(20, 20));
        mask.push_stroke(brush(&[(10.0, 10.0)], 6.0));

        let style = RasterStyle::default();
        let overlay = render_overlay(&mask, &style).expect("overlay present");
        assert_eq!(overlay.get_pixel(10, 10).0, style.overlay_color);
        assert_eq!(overlay.get_pixel(0, 0).0[3], 0);
    }
}
