//! Normalization of detection / segmentation responses into [`DetectedRegion`]s.
//!
//! Providers disagree on the shape of a detection. Each entry is decoded
//! against a fixed list of known shapes, in priority order:
//!
//! 1. `{"box": {"xmin", "ymin", "xmax", "ymax"}}` corner pair
//! 2. `{"bbox": [x, y, width, height]}` corner + size
//! 3. `{"x", "y", "width", "height"}` center + size
//! 4. `{"mask": "<base64 png>"}` segmentation raster
//!
//! Entries matching none of these, or carrying a degenerate box, are skipped
//! and reported; the rest of the batch still comes through.
//!
//! Box shapes are taken to be in natural pixels already. Segmentation
//! rasters come at whatever resolution the provider works in, so when the
//! natural dimensions are known the raster is resized to them before its
//! extent is measured.

use image::{GrayImage, Luma, imageops::FilterType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    encoding::decode_base64_payload,
    geometry::{BoundingBox, Dimensions, Point},
    session::Rejection,
};

const DEFAULT_LABEL: &str = "object";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedRegion {
    pub bounding_box: BoundingBox,
    pub label: String,
    pub confidence: Option<f32>,
    /// Segmentation raster in natural pixels (255 = inside), when the
    /// provider returned one.
    #[serde(skip)]
    pub mask: Option<GrayImage>,
}

impl DetectedRegion {
    /// Mask for this region alone: its segmentation raster if present,
    /// otherwise the bounding box filled white on black.
    pub fn to_mask(&self, dims: Dimensions) -> GrayImage {
        if let Some(mask) = &self.mask {
            if mask.dimensions() == (dims.width, dims.height) {
                return mask.clone();
            }
            return image::imageops::resize(mask, dims.width, dims.height, FilterType::Nearest);
        }

        let mut out = GrayImage::new(dims.width, dims.height);
        if let Some((x0, y0, x1, y1)) = self.bounding_box.pixel_span(dims) {
            for y in y0..y1 {
                for x in x0..x1 {
                    out.put_pixel(x, y, Luma([255]));
                }
            }
        }
        out
    }
}

/// Why a single entry was left out of the normalized result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub regions: Vec<DetectedRegion>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Deserialize)]
struct CornerPair {
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
}

/// Known per-entry box encodings. Variant order is decode priority.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntryShape {
    Corners {
        #[serde(rename = "box")]
        corners: CornerPair,
    },
    CornerSize {
        bbox: [f32; 4],
    },
    CenterSize {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Segmentation {
        mask: String,
    },
}

/// Label and confidence of an entry. Each field is read on its own, so one
/// oddly typed field does not take the others with it.
#[derive(Debug, Default)]
struct EntryMeta {
    label: Option<String>,
    confidence: Option<f32>,
}

impl EntryMeta {
    fn read(entry: &Value) -> Self {
        let label = ["label", "class", "name"]
            .iter()
            .find_map(|key| match entry.get(key)? {
                Value::String(text) if !text.is_empty() => Some(text.clone()),
                // class ids
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            });
        let confidence = ["confidence", "score"]
            .iter()
            .find_map(|key| entry.get(key).and_then(Value::as_f64))
            .map(|value| value as f32);
        Self { label, confidence }
    }

    fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| DEFAULT_LABEL.to_string())
    }
}

/// Normalize a raw response, dropping malformed entries. Segmentation
/// rasters keep their own resolution.
pub fn normalize(raw: &Value) -> Vec<DetectedRegion> {
    normalize_with_report(raw, None).regions
}

/// Parse and normalize a raw response body.
pub fn normalize_str(raw: &str, natural: Option<Dimensions>) -> crate::Result<DetectionReport> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(normalize_with_report(&value, natural))
}

/// Normalize a raw response, keeping a record of every skipped entry.
///
/// With `natural` set, segmentation rasters are brought to that size so
/// every box and mask in the report is in natural pixels.
pub fn normalize_with_report(raw: &Value, natural: Option<Dimensions>) -> DetectionReport {
    let mut report = DetectionReport::default();

    for (index, entry) in collect_entries(raw).into_iter().enumerate() {
        match decode_entry(&entry, natural) {
            Ok(region) => report.regions.push(region),
            Err(reason) => {
                debug!(index, %reason, "skipping detection entry");
                report.skipped.push(SkippedEntry { index, reason });
            }
        }
    }

    debug!(
        regions = report.regions.len(),
        skipped = report.skipped.len(),
        "normalized detection response"
    );
    report
}

/// Flatten the known response envelopes into a list of candidate entries.
fn collect_entries(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.iter().map(as_entry).collect(),
        Value::Object(map) => {
            for key in ["predictions", "masks", "data"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().map(as_entry).collect();
                }
            }
            if serde_json::from_value::<EntryShape>(raw.clone()).is_ok() {
                return vec![raw.clone()];
            }
            // scattered: every object value (or array of them) is a candidate
            map.values()
                .flat_map(|value| match value {
                    Value::Array(items) => items.iter().map(as_entry).collect(),
                    Value::Object(_) => vec![value.clone()],
                    _ => Vec::new(),
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Bare strings inside a mask list are base64 segmentation rasters.
fn as_entry(value: &Value) -> Value {
    match value {
        Value::String(mask) => serde_json::json!({ "mask": mask }),
        other => other.clone(),
    }
}

fn decode_entry(entry: &Value, natural: Option<Dimensions>) -> Result<DetectedRegion, String> {
    let shape: EntryShape = serde_json::from_value(entry.clone())
        .map_err(|_| "no recognized box or mask fields".to_string())?;
    let meta = EntryMeta::read(entry);

    let (bounding_box, mask) = match shape {
        EntryShape::Corners { corners } => (
            BoundingBox::from_corners(corners.xmin, corners.ymin, corners.xmax, corners.ymax),
            None,
        ),
        EntryShape::CornerSize { bbox: [x, y, w, h] } => (BoundingBox::new(x, y, w, h), None),
        EntryShape::CenterSize {
            x,
            y,
            width,
            height,
        } => (BoundingBox::from_center(x, y, width, height), None),
        EntryShape::Segmentation { mask } => {
            let mut raster = decode_segmentation(&mask)?;
            if let Some(dims) = natural.filter(|d| raster.dimensions() != (d.width, d.height)) {
                debug!(
                    from = %Dimensions::new(raster.width(), raster.height()),
                    to = %dims,
                    "resizing segmentation raster to natural size"
                );
                raster = image::imageops::resize(&raster, dims.width, dims.height, FilterType::Nearest);
            }
            let bbox = lit_extent(&raster).ok_or_else(|| "segmentation mask is empty".to_string())?;
            (bbox, Some(raster))
        }
    };

    if !bounding_box.is_valid() {
        return Err(format!("degenerate box {:?}", bounding_box));
    }

    Ok(DetectedRegion {
        bounding_box,
        label: meta.label(),
        confidence: meta.confidence,
        mask,
    })
}

fn decode_segmentation(encoded: &str) -> Result<GrayImage, String> {
    let bytes = decode_base64_payload(encoded).map_err(|e| e.to_string())?;
    let image = image::load_from_memory(&bytes).map_err(|e| e.to_string())?;
    let rgba = image.to_rgba8();

    let mut binary = GrayImage::new(rgba.width(), rgba.height());
    for (dst, src) in binary.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        if a > 0 && r.max(g).max(b) > 0 {
            *dst = Luma([255]);
        }
    }
    Ok(binary)
}

fn lit_extent(mask: &GrayImage) -> Option<BoundingBox> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        extent = Some(match extent {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    extent.map(|(x0, y0, x1, y1)| {
        BoundingBox::new(
            x0 as f32,
            y0 as f32,
            (x1 - x0 + 1) as f32,
            (y1 - y0 + 1) as f32,
        )
    })
}

/// Index of the first region (in list order) whose box contains `point`.
pub fn hit_test(regions: &[DetectedRegion], point: Point) -> Option<usize> {
    regions
        .iter()
        .position(|region| region.bounding_box.contains(point))
}

/// Handle for one outstanding detection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionTicket {
    epoch: u64,
}

/// Detected regions of the current base image plus the epoch guarding them.
///
/// Every new request or selection-context change bumps the epoch; a response
/// carrying an older ticket is dropped instead of applied.
#[derive(Debug, Clone, Default)]
pub struct DetectionBoard {
    regions: Vec<DetectedRegion>,
    hovered: Option<usize>,
    epoch: u64,
}

impl DetectionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regions(&self) -> &[DetectedRegion] {
        &self.regions
    }

    pub fn hovered(&self) -> Option<&DetectedRegion> {
        self.hovered.and_then(|i| self.regions.get(i))
    }

    /// Issue a ticket for a new request, superseding any outstanding one.
    pub fn begin_request(&mut self) -> DetectionTicket {
        self.epoch += 1;
        DetectionTicket { epoch: self.epoch }
    }

    pub fn is_current(&self, ticket: DetectionTicket) -> bool {
        ticket.epoch == self.epoch
    }

    /// Apply a response for an image of `natural` size if its ticket is
    /// still current.
    pub fn apply(
        &mut self,
        ticket: DetectionTicket,
        raw: &Value,
        natural: Dimensions,
    ) -> Result<DetectionReport, Rejection> {
        if !self.is_current(ticket) {
            warn!(
                ticket = ticket.epoch,
                current = self.epoch,
                "dropping stale detection response"
            );
            return Err(Rejection::StaleDetection);
        }
        let report = normalize_with_report(raw, Some(natural));
        self.regions = report.regions.clone();
        self.hovered = None;
        Ok(report)
    }

    /// Forget all regions and orphan any outstanding request.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.regions.clear();
        self.hovered = None;
    }

    /// Update the hover target for a pointer position.
    pub fn hover(&mut self, point: Point) -> Option<&DetectedRegion> {
        self.hovered = hit_test(&self.regions, point);
        self.hovered()
    }

    pub fn region_at(&self, point: Point) -> Option<usize> {
        hit_test(&self.regions, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodedImage;
    use image::DynamicImage;
    use serde_json::json;

    const DIMS: Dimensions = Dimensions {
        width: 100,
        height: 100,
    };

    fn segmentation_uri(size: u32, lit: std::ops::Range<u32>) -> String {
        let mut raster = GrayImage::new(size, size);
        for y in lit.clone() {
            for x in lit.clone() {
                raster.put_pixel(x, y, Luma([255]));
            }
        }
        EncodedImage::png(&DynamicImage::ImageLuma8(raster))
            .expect("encode")
            .to_data_uri()
    }

    #[test]
    fn center_based_box_becomes_top_left() {
        let regions = normalize(&json!([{ "x": 50, "y": 50, "width": 20, "height": 10 }]));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box, BoundingBox::new(40.0, 45.0, 20.0, 10.0));
        assert_eq!(regions[0].label, DEFAULT_LABEL);
    }

    #[test]
    fn predictions_envelope_skips_malformed_entries() {
        let raw = json!({
            "time": 0.12,
            "predictions": [
                { "x": 10, "y": 10, "width": 4, "height": 4, "class": "cup", "confidence": 0.9 },
                {},
                { "x": 30, "y": 20, "width": 10, "height": 6, "class": "plate" }
            ]
        });

        let report = normalize_with_report(&raw, None);
        let labels: Vec<_> = report.regions.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["cup", "plate"]);
        assert_eq!(report.regions[0].confidence, Some(0.9));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
    }

    #[test]
    fn corner_shapes_are_recognized() {
        let raw = json!([
            { "box": { "xmin": 5, "ymin": 6, "xmax": 15, "ymax": 26 }, "label": "dog", "score": 0.5 },
            { "bbox": [1, 2, 3, 4], "name": "cat" }
        ]);

        let regions = normalize(&raw);
        assert_eq!(regions[0].bounding_box, BoundingBox::new(5.0, 6.0, 10.0, 20.0));
        assert_eq!(regions[0].confidence, Some(0.5));
        assert_eq!(regions[1].bounding_box, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(regions[1].label, "cat");
    }

    #[test]
    fn degenerate_and_scattered_entries() {
        let raw = json!({
            "first": { "x": 5, "y": 5, "width": 2, "height": 2 },
            "broken": { "x": 5, "y": 5, "width": 0, "height": 2 },
            "more": [{ "bbox": [0, 0, 1, 1] }, "not a mask"],
            "elapsed": 3
        });

        let report = normalize_with_report(&raw, None);
        assert_eq!(report.regions.len(), 2);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn non_container_response_yields_nothing() {
        assert!(normalize(&json!("oops")).is_empty());
        assert!(normalize(&json!(null)).is_empty());
    }

    #[test]
    fn segmentation_mask_entries_decode_to_their_extent() {
        let mut raster = GrayImage::new(16, 16);
        for y in 4..8 {
            for x in 2..12 {
                raster.put_pixel(x, y, Luma([255]));
            }
        }
        let uri = EncodedImage::png(&DynamicImage::ImageLuma8(raster))
            .expect("encode")
            .to_data_uri();

        let report = normalize_with_report(&json!({ "success": true, "masks": [uri] }), None);
        assert_eq!(report.regions.len(), 1);
        let region = &report.regions[0];
        assert_eq!(region.bounding_box, BoundingBox::new(2.0, 4.0, 10.0, 4.0));

        let mask = region.to_mask(Dimensions::new(16, 16));
        assert_eq!(mask.get_pixel(5, 5).0[0], 255);
        assert_eq!(mask.get_pixel(5, 10).0[0], 0);
    }

    #[test]
    fn coarse_segmentation_is_measured_at_natural_size() {
        let raw = json!({ "masks": [segmentation_uri(8, 4..8)] });
        let natural = Dimensions::new(16, 16);

        let report = normalize_with_report(&raw, Some(natural));
        let region = &report.regions[0];
        assert_eq!(region.bounding_box, BoundingBox::new(8.0, 8.0, 8.0, 8.0));
        assert_eq!(hit_test(&report.regions, Point::new(12.0, 12.0)), Some(0));
        assert_eq!(hit_test(&report.regions, Point::new(5.0, 5.0)), None);

        let mask = region.to_mask(natural);
        assert_eq!(mask.get_pixel(12, 12).0[0], 255);
        assert_eq!(mask.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn board_scales_segmentation_to_the_image() {
        let mut board = DetectionBoard::new();
        let ticket = board.begin_request();
        board
            .apply(ticket, &json!([segmentation_uri(10, 0..5)]), DIMS)
            .expect("current ticket");

        assert_eq!(board.regions()[0].bounding_box, BoundingBox::new(0.0, 0.0, 50.0, 50.0));
        assert_eq!(board.region_at(Point::new(40.0, 40.0)), Some(0));
    }

    #[test]
    fn numeric_class_keeps_its_score() {
        let regions = normalize(&json!([
            { "bbox": [0, 0, 4, 4], "class": 3, "score": 0.75 },
            { "bbox": [0, 0, 4, 4], "label": ["odd"], "confidence": 0.5 }
        ]));

        assert_eq!(regions[0].label, "3");
        assert_eq!(regions[0].confidence, Some(0.75));
        assert_eq!(regions[1].label, DEFAULT_LABEL);
        assert_eq!(regions[1].confidence, Some(0.5));
    }

    #[test]
    fn hit_test_prefers_list_order() {
        let regions = normalize(&json!([
            { "bbox": [0, 0, 50, 50], "label": "outer" },
            { "bbox": [10, 10, 5, 5], "label": "inner" }
        ]));

        assert_eq!(hit_test(&regions, Point::new(12.0, 12.0)), Some(0));
        assert_eq!(hit_test(&regions, Point::new(80.0, 80.0)), None);
    }

    #[test]
    fn box_region_mask_is_white_on_black() {
        let region = &normalize(&json!([{ "bbox": [2, 2, 3, 3] }]))[0];
        let mask = region.to_mask(Dimensions::new(8, 8));
        assert_eq!(mask.get_pixel(3, 3).0[0], 255);
        assert_eq!(mask.get_pixel(5, 5).0[0], 0);
        assert_eq!(mask.get_pixel(1, 1).0[0], 0);
    }

    #[test]
    fn stale_ticket_is_rejected() {
        let mut board = DetectionBoard::new();
        let stale = board.begin_request();
        let fresh = board.begin_request();
        let raw = json!([{ "bbox": [0, 0, 4, 4] }]);

        assert_eq!(board.apply(stale, &raw, DIMS), Err(Rejection::StaleDetection));
        assert!(board.regions().is_empty());

        assert!(board.apply(fresh, &raw, DIMS).is_ok());
        assert_eq!(board.regions().len(), 1);

        let late = board.begin_request();
        board.invalidate();
        assert_eq!(board.apply(late, &raw, DIMS), Err(Rejection::StaleDetection));
        assert!(board.regions().is_empty());
    }

    #[test]
    fn hover_tracks_pointer() {
        let mut board = DetectionBoard::new();
        let ticket = board.begin_request();
        board
            .apply(ticket, &json!([{ "bbox": [0, 0, 10, 10], "label": "a" }]), DIMS)
            .expect("current ticket");

        assert_eq!(board.hover(Point::new(5.0, 5.0)).map(|r| r.label.as_str()), Some("a"));
        assert!(board.hover(Point::new(50.0, 5.0)).is_none());
    }
}
