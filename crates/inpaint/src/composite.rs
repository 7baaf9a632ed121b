use std::path::Path;

use image::{DynamicImage, imageops};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, IntoStaticStr};
use tracing::debug;

use crate::{
    encoding::{EncodedImage, require_data_uri},
    error::{EditorError, Result},
    geometry::Dimensions,
    mask::MaskState,
    raster::{RasterStyle, rasterize, render_overlay},
};

/// The image an edit is applied to, at its natural resolution.
#[derive(Debug, Clone)]
pub struct BaseImage {
    pixels: DynamicImage,
    source: Option<EncodedImage>,
}

impl BaseImage {
    pub fn from_image(pixels: DynamicImage) -> Self {
        Self {
            pixels,
            source: None,
        }
    }

    /// Decode encoded bytes, keeping them for pass-through submission.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let source = EncodedImage::from_bytes(bytes)?;
        let pixels = source.decode()?;
        Ok(Self {
            pixels,
            source: Some(source),
        })
    }

    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let (_, bytes) = require_data_uri(uri)?;
        Self::from_bytes(bytes)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.pixels.width(), self.pixels.height())
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// The original encoded bytes, or a PNG encoding when none were supplied.
    pub fn encoded(&self) -> Result<EncodedImage> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => EncodedImage::png(&self.pixels),
        }
    }

    /// The base image with the selection overlay flattened onto it.
    pub fn flatten_overlay(&self, mask: &MaskState, style: &RasterStyle) -> Result<EncodedImage> {
        match render_overlay(mask, style) {
            Some(overlay) => {
                let mut canvas = self.pixels.to_rgba8();
                imageops::overlay(&mut canvas, &overlay, 0, 0);
                EncodedImage::png(&DynamicImage::ImageRgba8(canvas))
            }
            None => self.encoded(),
        }
    }
}

/// Whether an encoded image field keeps its `data:<mime>;base64,` prefix.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HeaderRule {
    #[default]
    DataUri,
    RawBase64,
}

impl HeaderRule {
    pub fn render(&self, image: &EncodedImage) -> String {
        match self {
            Self::DataUri => image.to_data_uri(),
            Self::RawBase64 => image.to_base64(),
        }
    }
}

/// Payload shape expected by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetContract {
    /// Base image and binary mask as two separate fields
    MaskField {
        image_field: String,
        mask_field: String,
        header: HeaderRule,
    },
    /// One image with the selection painted onto it
    VisualPrompt { image_field: String, header: HeaderRule },
}

impl Default for TargetContract {
    fn default() -> Self {
        Self::MaskField {
            image_field: "image".to_string(),
            mask_field: "mask".to_string(),
            header: HeaderRule::DataUri,
        }
    }
}

/// Everything needed to submit one edit request, minus the prompt text.
#[derive(Debug, Clone, PartialEq)]
pub struct EditPayload {
    pub contract: TargetContract,
    pub image: EncodedImage,
    /// `None` means "edit the whole image"
    pub mask: Option<EncodedImage>,
}

impl EditPayload {
    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// Render the payload's fields as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut fields = Map::new();
        match &self.contract {
            TargetContract::MaskField {
                image_field,
                mask_field,
                header,
            } => {
                fields.insert(image_field.clone(), Value::String(header.render(&self.image)));
                let mask = self
                    .mask
                    .as_ref()
                    .map(|m| Value::String(header.render(m)))
                    .unwrap_or(Value::Null);
                fields.insert(mask_field.clone(), mask);
            }
            TargetContract::VisualPrompt { image_field, header } => {
                fields.insert(image_field.clone(), Value::String(header.render(&self.image)));
            }
        }
        Value::Object(fields)
    }
}

/// Assemble the payload for one edit request.
pub fn build_payload(
    base: &BaseImage,
    mask: &MaskState,
    contract: &TargetContract,
    style: &RasterStyle,
) -> Result<EditPayload> {
    if mask.dimensions() != base.dimensions() {
        return Err(EditorError::DimensionMismatch {
            mask: mask.dimensions(),
            base: base.dimensions(),
        });
    }

    let payload = match contract {
        TargetContract::MaskField { .. } => EditPayload {
            contract: contract.clone(),
            image: base.encoded()?,
            mask: rasterize(mask)?,
        },
        TargetContract::VisualPrompt { .. } => EditPayload {
            contract: contract.clone(),
            image: base.flatten_overlay(mask, style)?,
            mask: None,
        },
    };

    debug!(
        contract = <&'static str>::from(contract),
        masked = !mask.is_empty(),
        dimensions = %base.dimensions(),
        "built edit payload"
    );
    Ok(payload)
}
