//! # Mask-Based Image Editing Engine
//!
//! Paint or lasso a selection over an image, pick regions returned by an
//! object detector, and drive a generate / undo / redo edit history against
//! an external image-editing service.
//!
//! ## Core Features
//!
//! - **Stroke capture**: pointer and touch input mapped from display space to
//!   natural image pixels, in brush or lasso mode
//! - **Mask rasterization**: binary masks (white = edit) at the base image's
//!   natural resolution, plus a translucent display overlay
//! - **Detection adapter**: normalizes the box and segmentation shapes common
//!   detection services return, with hit-testing and stale-response guards
//! - **Payload composition**: mask-field or visual-prompt request shapes
//! - **Edit session**: Idle/Submitting state machine over a linear history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inpaint::{Editor, EditorCommand, EditorConfig, Point};
//!
//! let mut editor = Editor::new(EditorConfig::default());
//! editor.execute(EditorCommand::LoadImage { path: "photo.png".into() })?;
//! editor.execute(EditorCommand::Stroke {
//!     points: vec![Point::new(40.0, 40.0), Point::new(120.0, 90.0)],
//! })?;
//! editor.execute(EditorCommand::ExportMask { path: "mask.png".into() })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod command;
pub mod composite;
pub mod config;
pub mod detection;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod mask;
pub mod mcp;
pub mod raster;
pub mod session;
pub mod stroke;

pub use command::{CommandOutcome, Editor, EditorCommand};
pub use composite::{BaseImage, EditPayload, HeaderRule, TargetContract, build_payload};
pub use config::{BrushConfig, EditorConfig};
pub use detection::{DetectedRegion, DetectionBoard, DetectionReport, DetectionTicket, hit_test, normalize};
pub use encoding::EncodedImage;
pub use error::{EditorError, Result};
pub use extract::{ExtractionStrategy, GenerationResponse, ImageExtractor};
pub use geometry::{BoundingBox, Dimensions, Point, Viewport};
pub use mask::MaskState;
pub use raster::{RasterStyle, rasterize, rasterize_overlay, render_mask, render_overlay};
pub use session::{
    EditHistory, EditHistoryEntry, EditSession, GenerateOutcome, GenerationReply, GenerationRequest,
    GenerationTransport, InFlightGeneration, PersistenceSink, Rejection, SessionSnapshot, SessionState,
    SubmitTicket,
};
pub use stroke::{DrawMode, PointerInput, Stroke, StrokeEvent, StrokeSurface};
