use std::{collections::HashMap, fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, IntoStaticStr, VariantNames};
use tracing::{debug, info};

use crate::{
    composite::{BaseImage, build_payload},
    config::EditorConfig,
    detection::DetectionReport,
    encoding::EncodedImage,
    error::{EditorError, Result},
    geometry::{Dimensions, Point, Viewport},
    raster::{rasterize, rasterize_overlay},
    session::{EditHistoryEntry, EditSession, Rejection, SessionSnapshot, SubmitTicket, Transition},
    stroke::{DrawMode, PointerInput},
};

#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EditorCommand {
    /// Open a base image and start a fresh session on it
    LoadImage { path: String },

    /// Switch between brush and lasso drawing
    SetMode { mode: DrawMode },

    /// Set the brush width in display pixels
    SetBrushWidth {
        #[schemars(range(min = 5.0, max = 100.0))]
        width: f32,
    },

    /// Describe where the image is displayed, for client-to-natural mapping
    SetViewport { viewport: Viewport },

    /// Draw one pointer-down to pointer-up path, in client coordinates
    Stroke {
        #[schemars(length(min = 1))]
        points: Vec<Point>,
    },

    /// Feed a raw detection response for the current image
    ApplyDetections { response: Value },

    /// Report the region under a client position
    Hover { x: f32, y: f32 },

    /// Select the region under a client position
    SelectRegionAt { x: f32, y: f32 },

    /// Union every detected region into the selection
    SelectAllRegions,

    /// Remove strokes, region selection and detections
    ClearMask,

    /// Start a generation with the current mask
    Submit { prompt: String },

    /// Resolve the in-flight generation with its output image
    Complete { image_ref: String },

    /// Resolve the in-flight generation as failed
    Fail { message: String },

    Undo,
    Redo,

    /// Return the displayed history entry
    Accept,

    /// Build the request payload for the current image and mask
    BuildPayload,

    /// Write the binary mask as PNG
    ExportMask { path: String },

    /// Write the coloured selection overlay as PNG
    ExportOverlay { path: String },

    /// Write the base image with the overlay flattened onto it
    ExportComposite { path: String },

    /// Return the session state for rendering
    Snapshot,
}

impl EditorCommand {
    /// Get the JSON schema for all commands
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EditorCommand)
    }

    /// Get a list of all available command names
    pub fn command_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::LoadImage { .. } => "Open a base image and start a fresh editing session",
            Self::SetMode { .. } => "Switch between brush and lasso drawing",
            Self::SetBrushWidth { .. } => "Set the brush width in display pixels (clamped to 5-100)",
            Self::SetViewport { .. } => "Set the on-screen rectangle the image is displayed in",
            Self::Stroke { .. } => "Draw a path given in client coordinates",
            Self::ApplyDetections { .. } => "Normalize a detection response into selectable regions",
            Self::Hover { .. } => "Report the detected region under a client position",
            Self::SelectRegionAt { .. } => "Select the detected region under a client position",
            Self::SelectAllRegions => "Add every detected region to the selection",
            Self::ClearMask => "Clear strokes, region selection and detections",
            Self::Submit { .. } => "Start a generation request with the current mask",
            Self::Complete { .. } => "Record the generated image for the in-flight request",
            Self::Fail { .. } => "Record that the in-flight request failed",
            Self::Undo => "Step back to the previous image",
            Self::Redo => "Step forward to the next image",
            Self::Accept => "Return the displayed image for saving",
            Self::BuildPayload => "Build the generation payload for the current image and mask",
            Self::ExportMask { .. } => "Write the binary mask PNG",
            Self::ExportOverlay { .. } => "Write the translucent selection overlay PNG",
            Self::ExportComposite { .. } => "Write the base image with the selection painted on",
            Self::Snapshot => "Return the current session state",
        }
    }

    pub fn parameters_info(&self) -> Vec<(&'static str, &'static str, bool)> {
        match self {
            Self::LoadImage { .. } => vec![("path", "Path to the base image", true)],
            Self::SetMode { .. } => vec![("mode", "\"brush\" or \"lasso\"", true)],
            Self::SetBrushWidth { .. } => vec![("width", "Brush width in display pixels (5-100)", true)],
            Self::SetViewport { .. } => vec![("viewport", "{left, top, width, height} of the displayed image", true)],
            Self::Stroke { .. } => vec![("points", "Client-space points [{x, y}, ...]", true)],
            Self::ApplyDetections { .. } => vec![("response", "Raw detection response JSON", true)],
            Self::Hover { .. } | Self::SelectRegionAt { .. } => vec![
                ("x", "Client x coordinate", true),
                ("y", "Client y coordinate", true),
            ],
            Self::Submit { .. } => vec![("prompt", "Edit instruction", true)],
            Self::Complete { .. } => vec![("image_ref", "URL, data URI or file path of the generated image", true)],
            Self::Fail { .. } => vec![("message", "Failure reason", true)],
            Self::ExportMask { .. } | Self::ExportOverlay { .. } | Self::ExportComposite { .. } => {
                vec![("path", "Output PNG path", true)]
            }
            Self::SelectAllRegions
            | Self::ClearMask
            | Self::Undo
            | Self::Redo
            | Self::Accept
            | Self::BuildPayload
            | Self::Snapshot => vec![],
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Loaded { dimensions: Dimensions },
    Updated,
    Stroked { points: usize },
    Detected { report: DetectionReport },
    Region { index: Option<usize>, label: Option<String> },
    Selected { count: usize },
    Submitted,
    Transitioned { transition: Transition },
    Rejected { rejection: Rejection },
    Accepted { entry: EditHistoryEntry },
    Payload { payload: Value },
    Written { path: String, dimensions: Dimensions },
    /// Nothing to export because the mask is empty
    EmptyMask,
    Snapshot { snapshot: SessionSnapshot },
}

impl From<std::result::Result<Transition, Rejection>> for CommandOutcome {
    fn from(result: std::result::Result<Transition, Rejection>) -> Self {
        match result {
            Ok(transition) => Self::Transitioned { transition },
            Err(rejection) => Self::Rejected { rejection },
        }
    }
}

/// Command-driven front end over one [`EditSession`], resolving image
/// references to decoded images where it can.
#[derive(Debug, Clone, Default)]
pub struct Editor {
    config: EditorConfig,
    session: Option<EditSession>,
    images: HashMap<String, BaseImage>,
    pending: Option<SubmitTicket>,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    /// Start a session on an already-decoded image.
    pub fn open(&mut self, image_ref: impl Into<String>, base: BaseImage) -> Dimensions {
        let image_ref = image_ref.into();
        let dimensions = base.dimensions();
        self.session = Some(EditSession::new(
            EditHistoryEntry::new(image_ref.clone(), ""),
            dimensions,
            self.config.brush,
        ));
        self.images.clear();
        self.images.insert(image_ref, base);
        self.pending = None;
        info!(%dimensions, "editing session opened");
        dimensions
    }

    /// The decoded image behind the displayed history entry.
    pub fn current_base(&self) -> Result<&BaseImage> {
        let session = self.active()?;
        self.images
            .get(&session.current().image_ref)
            .ok_or(EditorError::NoBaseImage)
    }

    fn active(&self) -> Result<&EditSession> {
        self.session.as_ref().ok_or(EditorError::NoBaseImage)
    }

    fn active_mut(&mut self) -> Result<&mut EditSession> {
        self.session.as_mut().ok_or(EditorError::NoBaseImage)
    }

    pub fn execute(&mut self, command: EditorCommand) -> Result<CommandOutcome> {
        debug!(command = %command, "executing");
        match command {
            EditorCommand::LoadImage { path } => {
                let base = BaseImage::open(&path)?;
                let dimensions = self.open(path, base);
                Ok(CommandOutcome::Loaded { dimensions })
            }
            EditorCommand::SetMode { mode } => {
                self.active_mut()?.surface_mut().set_mode(mode);
                Ok(CommandOutcome::Updated)
            }
            EditorCommand::SetBrushWidth { width } => {
                self.active_mut()?.surface_mut().set_brush_width(width);
                Ok(CommandOutcome::Updated)
            }
            EditorCommand::SetViewport { viewport } => {
                self.active_mut()?.surface_mut().set_viewport(viewport);
                Ok(CommandOutcome::Updated)
            }
            EditorCommand::Stroke { points } => {
                let surface = self.active_mut()?.surface_mut();
                let mut inputs = points.iter().map(|p| PointerInput::mouse(p.x, p.y));
                let Some(first) = inputs.next() else {
                    return Ok(CommandOutcome::Stroked { points: 0 });
                };
                surface.start_stroke(&first);
                for input in inputs {
                    surface.extend_stroke(&input);
                }
                surface.end_stroke();
                Ok(CommandOutcome::Stroked {
                    points: points.len(),
                })
            }
            EditorCommand::ApplyDetections { response } => {
                let session = self.active_mut()?;
                let natural = session.surface().dimensions();
                let board = session.detections_mut();
                let ticket = board.begin_request();
                Ok(match board.apply(ticket, &response, natural) {
                    Ok(report) => CommandOutcome::Detected { report },
                    Err(rejection) => CommandOutcome::Rejected { rejection },
                })
            }
            EditorCommand::Hover { x, y } => {
                let session = self.active_mut()?;
                let Some(point) = session.surface().locate(&PointerInput::mouse(x, y)) else {
                    return Ok(CommandOutcome::Region { index: None, label: None });
                };
                let index = session.detections().region_at(point);
                let label = session.detections_mut().hover(point).map(|r| r.label.clone());
                Ok(CommandOutcome::Region { index, label })
            }
            EditorCommand::SelectRegionAt { x, y } => {
                let session = self.active_mut()?;
                let index = session
                    .surface()
                    .locate(&PointerInput::mouse(x, y))
                    .and_then(|point| session.detections().region_at(point));
                let label = index.and_then(|i| session.select_region(i).map(str::to_string));
                Ok(CommandOutcome::Region { index, label })
            }
            EditorCommand::SelectAllRegions => {
                let count = self.active_mut()?.select_all_regions();
                Ok(CommandOutcome::Selected { count })
            }
            EditorCommand::ClearMask => {
                self.active_mut()?.clear_mask();
                Ok(CommandOutcome::Updated)
            }
            EditorCommand::Submit { prompt } => Ok(match self.active_mut()?.submit(prompt) {
                Ok(ticket) => {
                    self.pending = Some(ticket);
                    CommandOutcome::Submitted
                }
                Err(rejection) => CommandOutcome::Rejected { rejection },
            }),
            EditorCommand::Complete { image_ref } => {
                let Some(ticket) = self.pending else {
                    return Ok(CommandOutcome::Rejected {
                        rejection: Rejection::NotSubmitting,
                    });
                };
                let resolved = resolve_image(&image_ref);
                let dimensions = resolved.as_ref().map(BaseImage::dimensions);
                let session = self.session.as_mut().ok_or(EditorError::NoBaseImage)?;
                let result = session.complete_success(ticket, image_ref.clone(), dimensions);
                if result.is_ok() {
                    // bases of entries dropped from the redo tail go with them
                    let history = session.history();
                    self.images
                        .retain(|known, _| history.entries().iter().any(|entry| &entry.image_ref == known));
                    if let Some(base) = resolved {
                        self.images.insert(image_ref, base);
                    }
                    self.pending = None;
                }
                Ok(result.into())
            }
            EditorCommand::Fail { message } => {
                let Some(ticket) = self.pending else {
                    return Ok(CommandOutcome::Rejected {
                        rejection: Rejection::NotSubmitting,
                    });
                };
                let result = self.active_mut()?.complete_failure(ticket, message);
                if result.is_ok() {
                    self.pending = None;
                }
                Ok(result.into())
            }
            EditorCommand::Undo => Ok(self.active_mut()?.undo().into()),
            EditorCommand::Redo => Ok(self.active_mut()?.redo().into()),
            EditorCommand::Accept => Ok(CommandOutcome::Accepted {
                entry: self.active()?.accept().clone(),
            }),
            EditorCommand::BuildPayload => {
                let session = self.active()?;
                let payload = build_payload(
                    self.current_base()?,
                    session.surface().mask(),
                    &self.config.contract,
                    &self.config.style,
                )?;
                Ok(CommandOutcome::Payload {
                    payload: payload.to_json(),
                })
            }
            EditorCommand::ExportMask { path } => {
                let encoded = rasterize(self.active()?.surface().mask())?;
                write_export(path, encoded)
            }
            EditorCommand::ExportOverlay { path } => {
                let encoded = rasterize_overlay(self.active()?.surface().mask(), &self.config.style)?;
                write_export(path, encoded)
            }
            EditorCommand::ExportComposite { path } => {
                let mask = self.active()?.surface().mask();
                let encoded = self.current_base()?.flatten_overlay(mask, &self.config.style)?;
                write_export(path, Some(encoded))
            }
            EditorCommand::Snapshot => Ok(CommandOutcome::Snapshot {
                snapshot: self.active()?.snapshot(),
            }),
        }
    }
}

/// Decode an image reference that is available locally: a data URI or an
/// existing file. Remote URLs resolve to `None`.
fn resolve_image(image_ref: &str) -> Option<BaseImage> {
    let resolved = if image_ref.starts_with("data:") {
        BaseImage::from_data_uri(image_ref)
    } else if Path::new(image_ref).is_file() {
        BaseImage::open(image_ref)
    } else {
        return None;
    };
    match resolved {
        Ok(base) => Some(base),
        Err(e) => {
            debug!(error = %e, "generated image could not be decoded locally");
            None
        }
    }
}

fn write_export(path: String, encoded: Option<EncodedImage>) -> Result<CommandOutcome> {
    let Some(encoded) = encoded else {
        return Ok(CommandOutcome::EmptyMask);
    };
    fs::write(&path, &encoded.bytes)?;
    info!(path = %path, dimensions = %encoded.dimensions, "exported");
    Ok(CommandOutcome::Written {
        path,
        dimensions: encoded.dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    fn editor() -> Editor {
        let mut editor = Editor::new(EditorConfig::default());
        let base = BaseImage::from_image(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            80,
            Rgba([10, 20, 30, 255]),
        )));
        editor.open("I0", base);
        editor
    }

    fn stroke(points: &[(f32, f32)]) -> EditorCommand {
        EditorCommand::Stroke {
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        }
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: EditorCommand = serde_json::from_value(json!({
            "type": "set_brush_width",
            "params": { "width": 30.0 }
        }))
        .expect("valid command");
        assert_eq!(command, EditorCommand::SetBrushWidth { width: 30.0 });

        let command: EditorCommand = serde_json::from_value(json!({ "type": "undo" })).expect("valid command");
        assert_eq!(command, EditorCommand::Undo);
        assert_eq!(command.to_string(), "undo");
    }

    #[test]
    fn every_command_is_described() {
        assert!(EditorCommand::command_names().contains(&"select_region_at"));
        assert!(EditorCommand::command_names().contains(&"export_composite"));
        let schema = serde_json::to_string(&EditorCommand::schema()).expect("schema");
        assert!(schema.contains("apply_detections"));
    }

    #[test]
    fn commands_need_an_open_image() {
        let mut editor = Editor::new(EditorConfig::default());
        assert!(matches!(
            editor.execute(EditorCommand::ClearMask),
            Err(EditorError::NoBaseImage)
        ));
    }

    #[test]
    fn stroke_then_payload_carries_mask() {
        let mut editor = editor();
        editor.execute(stroke(&[(10.0, 10.0), (50.0, 40.0)])).expect("stroke");

        let CommandOutcome::Payload { payload } = editor.execute(EditorCommand::BuildPayload).expect("payload") else {
            panic!("expected payload");
        };
        assert!(payload["image"].as_str().is_some());
        assert!(payload["mask"].as_str().is_some());
    }

    #[test]
    fn viewport_scales_strokes_to_natural_pixels() {
        let mut editor = editor();
        editor
            .execute(EditorCommand::SetViewport {
                viewport: Viewport::new(0.0, 0.0, 50.0, 40.0),
            })
            .expect("viewport");
        editor.execute(stroke(&[(25.0, 20.0)])).expect("stroke");

        let session = editor.session().expect("open");
        let stroke = &session.surface().mask().strokes()[0];
        assert_eq!(stroke.points[0], Point::new(50.0, 40.0));
        assert_eq!(stroke.brush_width, 40.0);
    }

    #[test]
    fn region_selection_and_generation_cycle() {
        let mut editor = editor();
        let outcome = editor
            .execute(EditorCommand::ApplyDetections {
                response: json!({ "predictions": [{ "x": 50, "y": 40, "width": 20, "height": 20, "class": "cup" }] }),
            })
            .expect("detections");
        assert!(matches!(outcome, CommandOutcome::Detected { ref report } if report.regions.len() == 1));

        let outcome = editor
            .execute(EditorCommand::SelectRegionAt { x: 45.0, y: 35.0 })
            .expect("select");
        assert_eq!(
            outcome,
            CommandOutcome::Region {
                index: Some(0),
                label: Some("cup".to_string())
            }
        );

        editor
            .execute(EditorCommand::Submit {
                prompt: "make it red".into(),
            })
            .expect("submit");
        let outcome = editor
            .execute(EditorCommand::Submit { prompt: "again".into() })
            .expect("submit");
        assert_eq!(
            outcome,
            CommandOutcome::Rejected {
                rejection: Rejection::AlreadySubmitting
            }
        );

        let generated = EncodedImage::png(&DynamicImage::ImageRgba8(RgbaImage::new(64, 64)))
            .expect("encode")
            .to_data_uri();
        editor
            .execute(EditorCommand::Complete { image_ref: generated })
            .expect("complete");

        let session = editor.session().expect("open");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.history().len(), 2);
        assert!(session.surface().mask().is_empty());
        assert_eq!(editor.current_base().expect("decoded").dimensions(), Dimensions::new(64, 64));

        editor.execute(EditorCommand::Undo).expect("undo");
        assert_eq!(editor.current_base().expect("decoded").dimensions(), Dimensions::new(100, 80));
    }

    fn generated(size: u32) -> String {
        EncodedImage::png(&DynamicImage::ImageRgba8(RgbaImage::new(size, size)))
            .expect("encode")
            .to_data_uri()
    }

    fn complete_with(editor: &mut Editor, image_ref: &str) -> CommandOutcome {
        editor
            .execute(EditorCommand::Submit { prompt: "edit".into() })
            .expect("submit");
        editor
            .execute(EditorCommand::Complete {
                image_ref: image_ref.to_string(),
            })
            .expect("complete")
    }

    #[test]
    fn completion_reports_the_new_cursor() {
        let mut editor = editor();
        let outcome = complete_with(&mut editor, &generated(16));
        assert_eq!(
            outcome,
            CommandOutcome::Transitioned {
                transition: Transition::Succeeded { cursor: 1 }
            }
        );
        assert_eq!(editor.current_base().expect("decoded").dimensions(), Dimensions::new(16, 16));
    }

    #[test]
    fn bases_of_discarded_entries_are_released() {
        let mut editor = editor();
        let abandoned = generated(64);
        let kept = generated(32);

        complete_with(&mut editor, &abandoned);
        editor.execute(EditorCommand::Undo).expect("undo");
        complete_with(&mut editor, &kept);

        assert_eq!(editor.images.len(), 2);
        assert!(editor.images.contains_key("I0"));
        assert!(editor.images.contains_key(&kept));
        assert!(!editor.images.contains_key(&abandoned));
        assert_eq!(editor.current_base().expect("decoded").dimensions(), Dimensions::new(32, 32));
    }

    #[test]
    fn remote_result_has_no_local_base() {
        let mut editor = editor();
        editor.execute(EditorCommand::Submit { prompt: "p".into() }).expect("submit");
        editor
            .execute(EditorCommand::Complete {
                image_ref: "https://cdn.example/out.png".into(),
            })
            .expect("complete");
        assert!(matches!(editor.current_base(), Err(EditorError::NoBaseImage)));
        assert!(matches!(
            editor.execute(EditorCommand::BuildPayload),
            Err(EditorError::NoBaseImage)
        ));
    }

    #[test]
    fn completion_without_submission_is_rejected() {
        let mut editor = editor();
        let outcome = editor
            .execute(EditorCommand::Fail { message: "late".into() })
            .expect("fail");
        assert_eq!(
            outcome,
            CommandOutcome::Rejected {
                rejection: Rejection::NotSubmitting
            }
        );
    }

    #[test]
    fn empty_mask_exports_nothing() {
        let mut editor = editor();
        let path = std::env::temp_dir().join("inpaint-empty-mask.png");
        let outcome = editor
            .execute(EditorCommand::ExportMask {
                path: path.to_string_lossy().into_owned(),
            })
            .expect("export");
        assert_eq!(outcome, CommandOutcome::EmptyMask);
    }

    #[test]
    fn composite_export_writes_png_at_natural_size() {
        let mut editor = editor();
        editor.execute(stroke(&[(20.0, 20.0), (60.0, 20.0)])).expect("stroke");
        let path = std::env::temp_dir().join("inpaint-composite-test.png");
        let outcome = editor
            .execute(EditorCommand::ExportComposite {
                path: path.to_string_lossy().into_owned(),
            })
            .expect("export");
        assert!(matches!(outcome, CommandOutcome::Written { dimensions, .. } if dimensions == Dimensions::new(100, 80)));

        let written = image::open(&path).expect("readable png");
        assert_eq!((written.width(), written.height()), (100, 80));
        let _ = fs::remove_file(path);
    }
}
