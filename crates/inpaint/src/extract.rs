use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, IntoStaticStr, VariantNames};

use crate::{
    encoding::build_data_uri,
    error::{EditorError, Result},
};

/// Body returned by a generation service.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResponse {
    Json(Value),
    Image { bytes: Vec<u8>, mime: String },
}

/// Pulls the generated image reference (URL or data URI) out of a response.
pub trait ImageExtractor: Send + Sync {
    fn extract(&self, response: &GenerationResponse) -> Result<String>;
}

/// Provider-specific extraction, selected by configuration.
#[derive(
    Debug, Clone, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, VariantNames, IntoStaticStr,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionStrategy {
    /// First string found among top-level fields, in order
    FieldList { fields: Vec<String> },
    /// `outputs[]` entry with `type == "image"`, `data` and `mime_type`
    InteractionOutputs,
    /// `candidates[0].content.parts[].inlineData`
    CandidateParts,
    /// Response body is the image itself
    RawImage,
}

impl Default for ExtractionStrategy {
    fn default() -> Self {
        Self::FieldList {
            fields: vec!["outputImage".into(), "image".into(), "url".into()],
        }
    }
}

impl ExtractionStrategy {
    pub fn build(&self) -> Box<dyn ImageExtractor> {
        match self {
            Self::FieldList { fields } => Box::new(FieldListExtractor {
                fields: fields.clone(),
            }),
            Self::InteractionOutputs => Box::new(InteractionOutputsExtractor),
            Self::CandidateParts => Box::new(CandidatePartsExtractor),
            Self::RawImage => Box::new(RawImageExtractor),
        }
    }
}

impl ImageExtractor for ExtractionStrategy {
    fn extract(&self, response: &GenerationResponse) -> Result<String> {
        self.build().extract(response)
    }
}

fn json_body(response: &GenerationResponse) -> Result<&Value> {
    match response {
        GenerationResponse::Json(value) => Ok(value),
        GenerationResponse::Image { mime, .. } => Err(EditorError::Decode(format!(
            "expected a JSON body, got {}",
            mime
        ))),
    }
}

/// Error text a provider put in an otherwise successful body, if any.
fn provider_error(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    let text = error
        .as_str()
        .map(str::to_string)
        .or_else(|| error.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| error.to_string());
    match body.get("details").and_then(Value::as_str) {
        Some(details) => Some(format!("{}: {}", text, details)),
        None => Some(text),
    }
}

fn missing(body: &Value, what: &str) -> EditorError {
    match provider_error(body) {
        Some(error) => EditorError::Decode(format!("no {} in response ({})", what, error)),
        None => EditorError::Decode(format!("no {} in response", what)),
    }
}

#[derive(Debug, Clone)]
pub struct FieldListExtractor {
    pub fields: Vec<String>,
}

impl ImageExtractor for FieldListExtractor {
    fn extract(&self, response: &GenerationResponse) -> Result<String> {
        let body = json_body(response)?;
        self.fields
            .iter()
            .find_map(|field| body.get(field).and_then(Value::as_str).filter(|value| !value.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| missing(body, &format!("image field ({})", self.fields.join(", "))))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteractionOutputsExtractor;

impl ImageExtractor for InteractionOutputsExtractor {
    fn extract(&self, response: &GenerationResponse) -> Result<String> {
        let body = json_body(response)?;
        body.get("outputs")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find_map(|output| {
                if output.get("type").and_then(Value::as_str) != Some("image") {
                    return None;
                }
                let data = output.get("data").and_then(Value::as_str)?;
                let mime = output.get("mime_type").and_then(Value::as_str)?;
                Some(format!("data:{};base64,{}", mime, data))
            })
            .ok_or_else(|| missing(body, "image output"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePartsExtractor;

impl ImageExtractor for CandidatePartsExtractor {
    fn extract(&self, response: &GenerationResponse) -> Result<String> {
        let body = json_body(response)?;
        body.pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find_map(|part| {
                let inline = part.get("inlineData")?;
                let data = inline.get("data").and_then(Value::as_str)?;
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                Some(format!("data:{};base64,{}", mime, data))
            })
            .ok_or_else(|| missing(body, "inline image part"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawImageExtractor;

impl ImageExtractor for RawImageExtractor {
    fn extract(&self, response: &GenerationResponse) -> Result<String> {
        match response {
            GenerationResponse::Image { bytes, mime } if !bytes.is_empty() => {
                Ok(build_data_uri(mime, bytes))
            }
            GenerationResponse::Image { .. } => {
                Err(EditorError::Decode("empty image body".to_string()))
            }
            GenerationResponse::Json(body) => Err(missing(body, "raw image body")),
        }
    }
}
