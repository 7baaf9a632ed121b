use std::time::Duration;

use thiserror::Error;

use crate::geometry::Dimensions;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("No base image loaded")]
    NoBaseImage,

    #[error("Mask is {mask} but base image is {base}")]
    DimensionMismatch { mask: Dimensions, base: Dimensions },

    #[error("Invalid data URI")]
    InvalidDataUri,

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("No response within {0:?}")]
    DeadlineElapsed(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Unsupported config format. Please use .toml or .json files")]
    UnsupportedConfigFormat,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EditorError>;
