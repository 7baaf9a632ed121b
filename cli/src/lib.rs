use inpaint::{EditorCommand, EditorConfig};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Script has no steps")]
    NoSteps,
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// One named command in an edit script
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScriptStep {
    pub name: String,
    pub description: Option<String>,
    pub command: EditorCommand,
}

/// A base image plus the commands to replay against it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EditScript {
    pub image: String,
    pub output_dir: String,
    #[serde(default)]
    pub editor: EditorConfig,
    pub steps: Vec<ScriptStep>,
}

impl EditScript {
    /// Load an edit script from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ScriptError> {
        let script: EditScript = toml::from_str(content)?;
        script.validated()
    }

    /// Load an edit script from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ScriptError> {
        let script: EditScript = serde_json::from_str(content)?;
        script.validated()
    }

    /// Auto-detect file format and load the script
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(ScriptError::UnsupportedFileFormat),
        }
    }

    /// Save the script, picking the format from the extension
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ScriptError> {
        let path_ref = path.as_ref();
        let content = match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => self.to_toml()?,
            Some("json") => self.to_json()?,
            _ => return Err(ScriptError::UnsupportedFileFormat),
        };
        fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ScriptError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json(&self) -> Result<String, ScriptError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    /// A starter script: one brush stroke, then a mask export
    pub fn skeleton(image: &str, output_dir: &str) -> Self {
        Self {
            image: image.to_string(),
            output_dir: output_dir.to_string(),
            editor: EditorConfig::default(),
            steps: vec![
                ScriptStep {
                    name: "brush".to_string(),
                    description: Some("Paint over the area to edit".to_string()),
                    command: EditorCommand::Stroke {
                        points: vec![
                            inpaint::Point::new(10.0, 10.0),
                            inpaint::Point::new(60.0, 60.0),
                        ],
                    },
                },
                ScriptStep {
                    name: "payload".to_string(),
                    description: Some("Show the request that would be sent".to_string()),
                    command: EditorCommand::BuildPayload,
                },
            ],
        }
    }

    fn validated(self) -> Result<Self, ScriptError> {
        if self.steps.is_empty() {
            return Err(ScriptError::NoSteps);
        }
        Ok(self)
    }
}
