use image::{DynamicImage, GrayImage, Luma, imageops::FilterType};

use crate::{geometry::Dimensions, stroke::Stroke};

/// The full description of the currently selected region(s) on one surface.
///
/// Coordinates of every stroke are natural pixels of the base image and the
/// external mask is always stored at `dimensions`.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskState {
    strokes: Vec<Stroke>,
    external_mask: Option<GrayImage>,
    dimensions: Dimensions,
}

impl MaskState {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            strokes: Vec::new(),
            external_mask: None,
            dimensions,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Binary external mask (255 = selected), already at `dimensions`.
    pub fn external_mask(&self) -> Option<&GrayImage> {
        self.external_mask.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.external_mask.is_none()
    }

    pub fn push_stroke(&mut self, stroke: Stroke) {
        self.strokes.push(stroke);
    }

    /// Replace the external mask with an arbitrary raster.
    ///
    /// The raster is stretched to the mask dimensions; a pixel is selected when
    /// it is non-transparent and not black.
    pub fn set_external_mask(&mut self, image: &DynamicImage) {
        self.external_mask = Some(self.normalize(image));
    }

    /// Union an arbitrary raster into the external mask.
    pub fn merge_external_mask(&mut self, image: &DynamicImage) {
        let incoming = self.normalize(image);
        self.merge_binary(incoming);
    }

    /// Replace the external mask with an already binary raster.
    pub fn set_external_binary(&mut self, mask: GrayImage) {
        self.external_mask = Some(self.fit(mask));
    }

    pub fn merge_binary(&mut self, mask: GrayImage) {
        let incoming = self.fit(mask);
        match self.external_mask.as_mut() {
            Some(existing) => {
                for (dst, src) in existing.pixels_mut().zip(incoming.pixels()) {
                    dst.0[0] = dst.0[0].max(src.0[0]);
                }
            }
            None => self.external_mask = Some(incoming),
        }
    }

    /// Drop every stroke and the external mask in one step.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.external_mask = None;
    }

    fn normalize(&self, image: &DynamicImage) -> GrayImage {
        let rgba = image.to_rgba8();
        let mut binary = GrayImage::new(rgba.width(), rgba.height());
        for (dst, src) in binary.pixels_mut().zip(rgba.pixels()) {
            let [r, g, b, a] = src.0;
            let lit = a > 0 && r.max(g).max(b) > 0;
            *dst = Luma([if lit { 255 } else { 0 }]);
        }
        self.fit(binary)
    }

    fn fit(&self, mask: GrayImage) -> GrayImage {
        let Dimensions { width, height } = self.dimensions;
        if mask.dimensions() == (width, height) {
            mask
        } else {
            image::imageops::resize(&mask, width, height, FilterType::Nearest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::Point, stroke::DrawMode};
    use image::{Rgba, RgbaImage};

    fn stroke() -> Stroke {
        Stroke {
            points: vec![Point::new(1.0, 1.0), Point::new(5.0, 5.0)],
            brush_width: 2.0,
            kind: DrawMode::Brush,
        }
    }

    #[test]
    fn clear_resets_strokes_and_external_mask_together() {
        let mut mask = MaskState::new(Dimensions::new(8, 8));
        mask.push_stroke(stroke());
        mask.set_external_binary(GrayImage::from_pixel(8, 8, Luma([255])));
        assert!(!mask.is_empty());

        mask.clear();
        assert!(mask.strokes().is_empty());
        assert!(mask.external_mask().is_none());
        assert!(mask.is_empty());
    }

    #[test]
    fn external_mask_is_stretched_and_normalized() {
        let mut source = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        source.put_pixel(0, 0, Rgba([10, 200, 30, 40]));
        source.put_pixel(1, 1, Rgba([0, 0, 0, 255]));

        let mut mask = MaskState::new(Dimensions::new(4, 4));
        mask.set_external_mask(&DynamicImage::ImageRgba8(source));

        let ext = mask.external_mask().expect("external mask set");
        assert_eq!(ext.dimensions(), (4, 4));
        assert_eq!(ext.get_pixel(0, 0).0[0], 255);
        assert_eq!(ext.get_pixel(1, 1).0[0], 255);
        // opaque black does not count as selected
        assert_eq!(ext.get_pixel(3, 3).0[0], 0);
        assert_eq!(ext.get_pixel(3, 0).0[0], 0);
    }

    #[test]
    fn merge_unions_binary_masks() {
        let mut mask = MaskState::new(Dimensions::new(2, 1));
        let mut left = GrayImage::new(2, 1);
        left.put_pixel(0, 0, Luma([255]));
        let mut right = GrayImage::new(2, 1);
        right.put_pixel(1, 0, Luma([255]));

        mask.merge_binary(left);
        mask.merge_binary(right);

        let ext = mask.external_mask().expect("external mask set");
        assert_eq!(ext.as_raw(), &vec![255, 255]);
    }
}
