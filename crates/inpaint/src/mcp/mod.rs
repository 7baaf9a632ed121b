use crate::{
    command::{CommandOutcome, Editor, EditorCommand},
    config::EditorConfig,
    geometry::{Point, Viewport},
    stroke::DrawMode,
};
use rmcp::{
    handler::server::tool::IntoCallToolResult, model::{CallToolResult, Content, ServerCapabilities, ServerInfo}, schemars, tool, Error as McpError, ServerHandler
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::warn;
use ts_rs::TS;

/// Request for loading a base image from disk
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LoadImageRequest {
    #[schemars(description = "Path to the image file")]
    pub path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ModeRequest {
    #[schemars(description = "Drawing mode: \"brush\" or \"lasso\"")]
    pub mode: DrawMode,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BrushWidthRequest {
    #[schemars(
        description = "Brush width in display pixels",
        range(min = 5.0, max = 100.0)
    )]
    pub width: f32,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ViewportRequest {
    #[schemars(description = "On-screen rectangle the image is displayed in")]
    pub viewport: Viewport,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StrokeRequest {
    #[schemars(description = "Path points in client coordinates", length(min = 1))]
    pub points: Vec<Point>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DetectionsRequest {
    #[schemars(description = "Raw detection service response")]
    pub response: serde_json::Value,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PositionRequest {
    #[schemars(description = "Client x coordinate")]
    pub x: f32,
    #[schemars(description = "Client y coordinate")]
    pub y: f32,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PromptRequest {
    #[schemars(description = "Edit instruction", length(min = 1))]
    pub prompt: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CompletionRequest {
    #[schemars(description = "URL, data URI or file path of the generated image")]
    pub image_ref: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FailureRequest {
    #[schemars(description = "Why the generation failed")]
    pub message: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExportRequest {
    #[schemars(description = "Output PNG path")]
    pub path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteRequest {
    #[schemars(description = "Any editor command, as {\"type\": ..., \"params\": {...}}")]
    pub command: EditorCommand,
}

/// Response carrying the outcome of one editor command
#[derive(Debug, Serialize, schemars::JsonSchema, TS)]
#[ts(export)]
pub struct EditorResponse {
    #[schemars(description = "Whether the command ran")]
    pub ok: bool,
    #[schemars(description = "Command name")]
    pub command: String,
    #[schemars(description = "Outcome of the command, or the error")]
    pub outcome: serde_json::Value,
}

impl EditorResponse {
    fn success(command: &str, outcome: &CommandOutcome) -> Self {
        let outcome = serde_json::to_value(outcome)
            .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
        Self {
            ok: true,
            command: command.to_string(),
            outcome,
        }
    }

    fn error(command: &str, message: String) -> Self {
        Self {
            ok: false,
            command: command.to_string(),
            outcome: serde_json::json!({ "error": message }),
        }
    }
}

impl IntoCallToolResult for EditorResponse {
    fn into_call_tool_result(self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&self).unwrap_or_else(|_| format!("{:?}", self)),
        )]))
    }
}

/// MCP Server exposing one mask-editing session
#[derive(Clone)]
pub struct EditorMcpServer {
    editor: Arc<RwLock<Editor>>,
}

impl EditorMcpServer {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        Self {
            editor: Arc::new(RwLock::new(Editor::new(config))),
        }
    }

    fn run(&self, command: EditorCommand) -> EditorResponse {
        let name: &'static str = (&command).into();
        let mut editor = match self.editor.write() {
            Ok(editor) => editor,
            Err(_) => return EditorResponse::error(name, "Editor state is poisoned".to_string()),
        };
        match editor.execute(command) {
            Ok(outcome) => EditorResponse::success(name, &outcome),
            Err(e) => {
                warn!(command = name, error = %e, "command failed");
                EditorResponse::error(name, e.to_string())
            }
        }
    }
}

impl Default for EditorMcpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool(tool_box)]
impl EditorMcpServer {
    #[tool(description = "Load a base image from file path and start a new editing session")]
    fn load_image(&self, #[tool(aggr)] LoadImageRequest { path }: LoadImageRequest) -> EditorResponse {
        self.run(EditorCommand::LoadImage { path })
    }

    #[tool(description = "Switch the drawing mode between brush and lasso")]
    fn set_mode(&self, #[tool(aggr)] ModeRequest { mode }: ModeRequest) -> EditorResponse {
        self.run(EditorCommand::SetMode { mode })
    }

    #[tool(description = "Set the brush width in display pixels (clamped to 5-100)")]
    fn set_brush_width(&self, #[tool(aggr)] BrushWidthRequest { width }: BrushWidthRequest) -> EditorResponse {
        self.run(EditorCommand::SetBrushWidth { width })
    }

    #[tool(description = "Set the on-screen rectangle the image is displayed in")]
    fn set_viewport(&self, #[tool(aggr)] ViewportRequest { viewport }: ViewportRequest) -> EditorResponse {
        self.run(EditorCommand::SetViewport { viewport })
    }

    #[tool(description = "Draw a brush or lasso path given in client coordinates")]
    fn stroke(&self, #[tool(aggr)] StrokeRequest { points }: StrokeRequest) -> EditorResponse {
        self.run(EditorCommand::Stroke { points })
    }

    #[tool(description = "Normalize an object detection response into selectable regions")]
    fn apply_detections(&self, #[tool(aggr)] DetectionsRequest { response }: DetectionsRequest) -> EditorResponse {
        self.run(EditorCommand::ApplyDetections { response })
    }

    #[tool(description = "Select the detected region under a client position")]
    fn select_region_at(&self, #[tool(aggr)] PositionRequest { x, y }: PositionRequest) -> EditorResponse {
        self.run(EditorCommand::SelectRegionAt { x, y })
    }

    #[tool(description = "Add every detected region to the selection")]
    fn select_all_regions(&self) -> EditorResponse {
        self.run(EditorCommand::SelectAllRegions)
    }

    #[tool(description = "Clear strokes, region selection and detections")]
    fn clear_mask(&self) -> EditorResponse {
        self.run(EditorCommand::ClearMask)
    }

    #[tool(description = "Start a generation request with the current mask")]
    fn submit(&self, #[tool(aggr)] PromptRequest { prompt }: PromptRequest) -> EditorResponse {
        self.run(EditorCommand::Submit { prompt })
    }

    #[tool(description = "Record the generated image for the in-flight request")]
    fn complete_generation(&self, #[tool(aggr)] CompletionRequest { image_ref }: CompletionRequest) -> EditorResponse {
        self.run(EditorCommand::Complete { image_ref })
    }

    #[tool(description = "Record that the in-flight request failed; the mask is kept")]
    fn fail_generation(&self, #[tool(aggr)] FailureRequest { message }: FailureRequest) -> EditorResponse {
        self.run(EditorCommand::Fail { message })
    }

    #[tool(description = "Step back to the previous image in the edit history")]
    fn undo(&self) -> EditorResponse {
        self.run(EditorCommand::Undo)
    }

    #[tool(description = "Step forward to the next image in the edit history")]
    fn redo(&self) -> EditorResponse {
        self.run(EditorCommand::Redo)
    }

    #[tool(description = "Build the generation payload (image and mask fields) for the current state")]
    fn build_payload(&self) -> EditorResponse {
        self.run(EditorCommand::BuildPayload)
    }

    #[tool(description = "Write the binary mask (white = edit) as PNG")]
    fn export_mask(&self, #[tool(aggr)] ExportRequest { path }: ExportRequest) -> EditorResponse {
        self.run(EditorCommand::ExportMask { path })
    }

    #[tool(description = "Write the base image with the selection overlay as PNG")]
    fn export_composite(&self, #[tool(aggr)] ExportRequest { path }: ExportRequest) -> EditorResponse {
        self.run(EditorCommand::ExportComposite { path })
    }

    #[tool(description = "Get the current session state: history cursor, undo/redo availability and mask status")]
    fn snapshot(&self) -> EditorResponse {
        self.run(EditorCommand::Snapshot)
    }

    #[tool(description = "Execute any editor command given as {\"type\": ..., \"params\": {...}}")]
    fn execute(&self, #[tool(aggr)] ExecuteRequest { command }: ExecuteRequest) -> EditorResponse {
        self.run(command)
    }

    #[tool(description = "Get information about available commands and their parameters")]
    fn get_command_info(&self) -> String {
        let mut info = String::new();
        info.push_str("Available EditorCommands:\n\n");

        for (i, name) in EditorCommand::command_names().iter().enumerate() {
            info.push_str(&format!("{}. {}\n", i + 1, name));
        }

        info.push_str("\nCommand Details:\n");
        for cmd in sample_commands() {
            info.push_str(&format!("\n- {}\n", cmd));
            info.push_str(&format!("  Description: {}\n", cmd.description()));

            let params = cmd.parameters_info();
            if !params.is_empty() {
                info.push_str("  Parameters:\n");
                for (name, desc, required) in params {
                    let req_marker = if required { " (required)" } else { " (optional)" };
                    info.push_str(&format!("    - {}{}: {}\n", name, req_marker, desc));
                }
            }
        }

        info
    }

    #[tool(description = "Get the JSON schema for EditorCommand")]
    fn get_command_schema(&self) -> String {
        let schema = EditorCommand::schema();
        serde_json::to_string_pretty(&schema)
            .unwrap_or_else(|e| format!("Failed to serialize schema: {}", e))
    }
}

#[tool(tool_box)]
impl ServerHandler for EditorMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Mask Editing Server - Paint or lasso a selection over an image, pick detected regions, and drive a generate/undo/redo edit history with binary mask export.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// One instance of every command, for listing descriptions.
fn sample_commands() -> Vec<EditorCommand> {
    let path = || "out.png".to_string();
    vec![
        EditorCommand::LoadImage { path: "image.png".to_string() },
        EditorCommand::SetMode { mode: DrawMode::Brush },
        EditorCommand::SetBrushWidth { width: 20.0 },
        EditorCommand::SetViewport { viewport: Viewport::new(0.0, 0.0, 512.0, 512.0) },
        EditorCommand::Stroke { points: vec![Point::new(0.0, 0.0)] },
        EditorCommand::ApplyDetections { response: serde_json::Value::Null },
        EditorCommand::Hover { x: 0.0, y: 0.0 },
        EditorCommand::SelectRegionAt { x: 0.0, y: 0.0 },
        EditorCommand::SelectAllRegions,
        EditorCommand::ClearMask,
        EditorCommand::Submit { prompt: String::new() },
        EditorCommand::Complete { image_ref: String::new() },
        EditorCommand::Fail { message: String::new() },
        EditorCommand::Undo,
        EditorCommand::Redo,
        EditorCommand::Accept,
        EditorCommand::BuildPayload,
        EditorCommand::ExportMask { path: path() },
        EditorCommand::ExportOverlay { path: path() },
        EditorCommand::ExportComposite { path: path() },
        EditorCommand::Snapshot,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_info_lists_every_command() {
        let server = EditorMcpServer::new();
        let info = server.get_command_info();
        assert_eq!(sample_commands().len(), EditorCommand::command_names().len());
        for name in EditorCommand::command_names() {
            assert!(info.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn commands_before_load_report_an_error() {
        let server = EditorMcpServer::new();
        let response = server.undo();
        assert!(!response.ok);
        assert_eq!(response.command, "undo");
    }
}
