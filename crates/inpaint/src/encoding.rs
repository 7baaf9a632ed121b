use std::io::Cursor;

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::{
    error::{EditorError, Result},
    geometry::Dimensions,
};

/// Encoded image bytes with their MIME type and natural size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub dimensions: Dimensions,
}

impl EncodedImage {
    /// PNG-encode an image. Output is deterministic for identical pixels.
    pub fn png(image: &DynamicImage) -> Result<Self> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(Self {
            bytes,
            mime: "image/png".to_string(),
            dimensions: Dimensions::new(image.width(), image.height()),
        })
    }

    /// Wrap already-encoded bytes, sniffing format and size from the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(&bytes)).with_guessed_format()?;
        let mime = reader
            .format()
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let (width, height) = reader.into_dimensions()?;
        Ok(Self {
            bytes,
            mime,
            dimensions: Dimensions::new(width, height),
        })
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        Ok(image::load_from_memory(&self.bytes)?)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

/// Split `data:<mime>;base64,<payload>` into mime and payload.
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, payload))
}

/// Payload of a data URI, or the input unchanged when it carries no header.
pub fn strip_data_uri_header(value: &str) -> &str {
    parse_data_uri(value).map(|(_, payload)| payload).unwrap_or(value)
}

/// Decode base64 image data, with or without a data-URI header.
pub fn decode_base64_payload(value: &str) -> Result<Vec<u8>> {
    let payload = strip_data_uri_header(value.trim());
    Ok(STANDARD.decode(payload)?)
}

/// Natural size of an inline data-URI image, read from its header only.
pub fn sniff_data_uri_dimensions(uri: &str) -> Option<Dimensions> {
    let (_, payload) = parse_data_uri(uri)?;
    let bytes = STANDARD.decode(payload).ok()?;
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some(Dimensions::new(width, height))
}

pub fn build_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

pub(crate) fn require_data_uri(uri: &str) -> Result<(&str, Vec<u8>)> {
    let (mime, payload) = parse_data_uri(uri).ok_or(EditorError::InvalidDataUri)?;
    Ok((mime, STANDARD.decode(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn tiny_png() -> EncodedImage {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([7])));
        EncodedImage::png(&image).expect("encode png")
    }

    #[test]
    fn data_uri_header_is_split_and_stripped() {
        assert_eq!(
            parse_data_uri("data:image/jpeg;base64,AAAA"),
            Some(("image/jpeg", "AAAA"))
        );
        assert_eq!(strip_data_uri_header("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri_header("QUJD"), "QUJD");
        assert_eq!(parse_data_uri("https://example.com/a.png"), None);
    }

    #[test]
    fn encoded_png_round_trips_through_data_uri() {
        let png = tiny_png();
        let uri = png.to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(sniff_data_uri_dimensions(&uri), Some(Dimensions::new(3, 2)));

        let bytes = decode_base64_payload(&uri).expect("decode payload");
        let sniffed = EncodedImage::from_bytes(bytes).expect("sniff bytes");
        assert_eq!(sniffed, png);
    }

    #[test]
    fn png_encoding_is_deterministic() {
        assert_eq!(tiny_png().bytes, tiny_png().bytes);
    }
}
