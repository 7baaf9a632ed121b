use std::{fs, path::Path, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    composite::TargetContract,
    error::{EditorError, Result},
    extract::ExtractionStrategy,
    raster::RasterStyle,
};

/// Brush sizing, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BrushConfig {
    pub default_width: f32,
    pub min_width: f32,
    pub max_width: f32,
    /// Outline width used for lasso paths
    pub lasso_outline_width: f32,
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            default_width: 20.0,
            min_width: 5.0,
            max_width: 100.0,
            lasso_outline_width: 2.0,
        }
    }
}

/// Editor configuration, loadable from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EditorConfig {
    pub brush: BrushConfig,
    pub style: RasterStyle,
    /// Shape of the payload handed to the generation service
    pub contract: TargetContract,
    /// Where the generated image lives in the provider's response
    pub extraction: ExtractionStrategy,
    /// Upper bound on a single generation round-trip
    pub submit_deadline_secs: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            brush: BrushConfig::default(),
            style: RasterStyle::default(),
            contract: TargetContract::default(),
            extraction: ExtractionStrategy::default(),
            submit_deadline_secs: 120,
        }
    }
}

impl EditorConfig {
    pub fn submit_deadline(&self) -> Duration {
        Duration::from_secs(self.submit_deadline_secs)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path)?),
            Some("json") => Self::from_json(&fs::read_to_string(path)?),
            _ => Err(EditorError::UnsupportedConfigFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EditorConfig)
    }
}
