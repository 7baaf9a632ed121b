//! Generation session: the Idle/Submitting state machine, the linear edit
//! history with its cursor, and the mask invalidation that follows every
//! change of base image.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::{
    composite::{BaseImage, EditPayload, build_payload},
    config::{BrushConfig, EditorConfig},
    detection::DetectionBoard,
    encoding::{EncodedImage, sniff_data_uri_dimensions},
    error::{EditorError, Result},
    extract::{GenerationResponse, ImageExtractor},
    geometry::Dimensions,
    raster::{RasterStyle, rasterize, rasterize_overlay},
    stroke::StrokeSurface,
};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, TS, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Submitting,
}

/// A call the current state does not allow. Returned, never raised.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    Serialize, Deserialize, TS, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// A generation is already in flight
    AlreadySubmitting,
    /// No generation is in flight, or the ticket belongs to an older one
    NotSubmitting,
    /// Undo at the first entry
    AtOldestEntry,
    /// Redo at the last entry
    AtNewestEntry,
    /// Detection response for a superseded request
    StaleDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct EditHistoryEntry {
    pub image_ref: String,
    pub prompt_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub dimensions: Option<Dimensions>,
}

impl EditHistoryEntry {
    pub fn new(image_ref: impl Into<String>, prompt_text: impl Into<String>) -> Self {
        Self {
            image_ref: image_ref.into(),
            prompt_text: prompt_text.into(),
            created_at: Utc::now(),
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Flat, never-empty history with a cursor at the displayed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EditHistory {
    entries: Vec<EditHistoryEntry>,
    cursor: usize,
}

impl EditHistory {
    pub fn new(initial: EditHistoryEntry) -> Self {
        Self {
            entries: vec![initial],
            cursor: 0,
        }
    }

    pub fn entries(&self) -> &[EditHistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> &EditHistoryEntry {
        &self.entries[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Append after the cursor, discarding any redo entries.
    pub fn push(&mut self, entry: EditHistoryEntry) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(entry);
        self.cursor = self.entries.len() - 1;
    }

    pub fn undo(&mut self) -> Option<&EditHistoryEntry> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.current())
    }

    pub fn redo(&mut self) -> Option<&EditHistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.current())
    }
}

/// Handle correlating a completion with the submission that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmitTicket {
    id: u64,
}

#[derive(Debug, Clone)]
struct PendingSubmission {
    ticket: SubmitTicket,
    prompt: String,
}

/// A state change a UI layer may want to render.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Submitted,
    Succeeded { cursor: usize },
    Failed { message: String },
    Undone { cursor: usize },
    Redone { cursor: usize },
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub cursor: usize,
    pub history_len: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    pub has_mask: bool,
    pub last_error: Option<String>,
    pub current: EditHistoryEntry,
}

/// What a full generate round-trip ended in.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    Succeeded { cursor: usize },
    Failed { message: String },
    Rejected(Rejection),
}

/// One edit request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub payload: EditPayload,
}

/// A submitted request that has not been sent yet. Holds no borrow of the
/// session it came from.
#[derive(Debug, Clone)]
pub struct InFlightGeneration {
    ticket: SubmitTicket,
    request: GenerationRequest,
}

impl InFlightGeneration {
    pub fn ticket(&self) -> SubmitTicket {
        self.ticket
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Send the request and extract the output image reference, giving up
    /// once the configured deadline passes.
    pub async fn run<T: GenerationTransport>(self, transport: &T, config: &EditorConfig) -> GenerationReply {
        let deadline = config.submit_deadline();
        let resolved = match tokio::time::timeout(deadline, transport.generate(self.request)).await {
            Err(_) => Err(EditorError::DeadlineElapsed(deadline)),
            Ok(Err(error)) => Err(error),
            Ok(Ok(response)) => config.extraction.extract(&response),
        };
        GenerationReply {
            ticket: self.ticket,
            resolved,
        }
    }
}

/// Output image reference, or the reason there is none, for one submission.
#[derive(Debug)]
pub struct GenerationReply {
    pub ticket: SubmitTicket,
    pub resolved: Result<String>,
}

/// Performs the network call to a generation service. Timeouts beyond the
/// session deadline and retries are the implementor's business.
pub trait GenerationTransport: Send + Sync {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<GenerationResponse>> + Send;
}

/// Durable storage for accepted images.
pub trait PersistenceSink: Send + Sync {
    fn persist(&self, entry: &EditHistoryEntry) -> impl Future<Output = Result<()>> + Send;
}

/// Everything one image-editing view owns: the drawing surface, detected
/// regions, edit history and submission state.
#[derive(Debug, Clone)]
pub struct EditSession {
    surface: StrokeSurface,
    detections: DetectionBoard,
    history: EditHistory,
    state: SessionState,
    pending: Option<PendingSubmission>,
    next_ticket: u64,
    last_error: Option<String>,
}

impl EditSession {
    pub fn new(initial: EditHistoryEntry, dimensions: Dimensions, brush: BrushConfig) -> Self {
        let initial = EditHistoryEntry {
            dimensions: Some(dimensions),
            ..initial
        };
        Self {
            surface: StrokeSurface::new(dimensions, brush),
            detections: DetectionBoard::new(),
            history: EditHistory::new(initial),
            state: SessionState::Idle,
            pending: None,
            next_ticket: 0,
            last_error: None,
        }
    }

    pub fn surface(&self) -> &StrokeSurface {
        &self.surface
    }

    /// Drawing stays available while a generation is in flight; strokes made
    /// now apply to the next submission.
    pub fn surface_mut(&mut self) -> &mut StrokeSurface {
        &mut self.surface
    }

    pub fn detections(&self) -> &DetectionBoard {
        &self.detections
    }

    pub fn detections_mut(&mut self) -> &mut DetectionBoard {
        &mut self.detections
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn current(&self) -> &EditHistoryEntry {
        self.history.current()
    }

    /// Clear the selection: strokes, external mask and detections together.
    pub fn clear_mask(&mut self) {
        self.surface.clear();
        self.detections.invalidate();
    }

    /// Select a detected region, replacing any previous region selection.
    pub fn select_region(&mut self, index: usize) -> Option<&str> {
        let dims = self.surface.dimensions();
        let region = self.detections.regions().get(index)?;
        let mask = region.to_mask(dims);
        self.surface.mask_mut().set_external_binary(mask);
        debug!(index, label = %region.label, "region selected");
        self.detections.regions().get(index).map(|r| r.label.as_str())
    }

    /// Union every detected region into the external mask.
    pub fn select_all_regions(&mut self) -> usize {
        let dims = self.surface.dimensions();
        let masks: Vec<_> = self
            .detections
            .regions()
            .iter()
            .map(|region| region.to_mask(dims))
            .collect();
        let count = masks.len();
        for mask in masks {
            self.surface.mask_mut().merge_binary(mask);
        }
        count
    }

    /// Enter Submitting. A second submission while one is in flight is
    /// refused and leaves everything untouched.
    pub fn submit(&mut self, prompt: impl Into<String>) -> std::result::Result<SubmitTicket, Rejection> {
        if self.state == SessionState::Submitting {
            warn!("submit refused, a generation is already in flight");
            return Err(Rejection::AlreadySubmitting);
        }

        self.next_ticket += 1;
        let ticket = SubmitTicket {
            id: self.next_ticket,
        };
        let prompt = prompt.into();
        info!(ticket = ticket.id, prompt = %prompt, "submitting edit");

        self.pending = Some(PendingSubmission { ticket, prompt });
        self.state = SessionState::Submitting;
        self.last_error = None;
        Ok(ticket)
    }

    fn take_pending(&mut self, ticket: SubmitTicket) -> std::result::Result<PendingSubmission, Rejection> {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {}
            _ => {
                warn!(ticket = ticket.id, "completion for a submission that is not in flight");
                return Err(Rejection::NotSubmitting);
            }
        }
        self.state = SessionState::Idle;
        self.pending.take().ok_or(Rejection::NotSubmitting)
    }

    /// Record a generated image: append it, move to it, clear the mask.
    ///
    /// `dimensions` is the new image's natural size if known; inline data-URI
    /// images are measured automatically.
    pub fn complete_success(
        &mut self,
        ticket: SubmitTicket,
        image_ref: impl Into<String>,
        dimensions: Option<Dimensions>,
    ) -> std::result::Result<Transition, Rejection> {
        let pending = self.take_pending(ticket)?;
        let image_ref = image_ref.into();
        let dimensions = dimensions
            .or_else(|| sniff_data_uri_dimensions(&image_ref))
            .unwrap_or_else(|| self.surface.dimensions());

        let entry = EditHistoryEntry::new(image_ref, pending.prompt).with_dimensions(dimensions);
        self.history.push(entry);
        self.rebase(dimensions);

        let cursor = self.history.cursor();
        info!(cursor, len = self.history.len(), "edit succeeded");
        Ok(Transition::Succeeded { cursor })
    }

    /// Record a failed generation. Image, cursor and mask are kept so the
    /// user can retry as-is.
    pub fn complete_failure(
        &mut self,
        ticket: SubmitTicket,
        message: impl Into<String>,
    ) -> std::result::Result<Transition, Rejection> {
        self.take_pending(ticket)?;
        let message = message.into();
        warn!(error = %message, "edit failed");
        self.last_error = Some(message.clone());
        Ok(Transition::Failed { message })
    }

    pub fn undo(&mut self) -> std::result::Result<Transition, Rejection> {
        if self.state == SessionState::Submitting {
            return Err(Rejection::AlreadySubmitting);
        }
        let dimensions = self
            .history
            .undo()
            .ok_or(Rejection::AtOldestEntry)?
            .dimensions;
        self.rebase(dimensions.unwrap_or_else(|| self.surface.dimensions()));
        debug!(cursor = self.history.cursor(), "undo");
        Ok(Transition::Undone {
            cursor: self.history.cursor(),
        })
    }

    pub fn redo(&mut self) -> std::result::Result<Transition, Rejection> {
        if self.state == SessionState::Submitting {
            return Err(Rejection::AlreadySubmitting);
        }
        let dimensions = self
            .history
            .redo()
            .ok_or(Rejection::AtNewestEntry)?
            .dimensions;
        self.rebase(dimensions.unwrap_or_else(|| self.surface.dimensions()));
        debug!(cursor = self.history.cursor(), "redo");
        Ok(Transition::Redone {
            cursor: self.history.cursor(),
        })
    }

    /// Start over against a new base image of the given natural size, e.g.
    /// once a remote image has loaded. Always clears the mask.
    pub fn reset_base_image(&mut self, dimensions: Dimensions) {
        self.rebase(dimensions);
    }

    /// Binary mask PNG, or `None` when nothing is selected.
    pub fn mask_png(&self) -> Result<Option<EncodedImage>> {
        rasterize(self.surface.mask())
    }

    /// Translucent overlay PNG, or `None` when nothing is selected.
    pub fn overlay_png(&self, style: &RasterStyle) -> Result<Option<EncodedImage>> {
        rasterize_overlay(self.surface.mask(), style)
    }

    /// The displayed entry, for an external persistence collaborator.
    pub fn accept(&self) -> &EditHistoryEntry {
        self.history.current()
    }

    /// Hand the displayed entry to a persistence collaborator.
    pub async fn commit<S: PersistenceSink>(&self, sink: &S) -> Result<()> {
        let entry = self.accept();
        info!(cursor = self.history.cursor(), image = %entry.image_ref, "committing entry");
        sink.persist(entry).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            cursor: self.history.cursor(),
            history_len: self.history.len(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            has_mask: !self.surface.mask().is_empty(),
            last_error: self.last_error.clone(),
            current: self.history.current().clone(),
        }
    }

    /// Build the payload for `base`, submit it through `transport` and
    /// resolve the session, failing the attempt if the configured deadline
    /// passes first.
    ///
    /// The session stays mutably borrowed until the reply arrives. Callers
    /// that keep drawing while a request is in flight drive the three steps
    /// themselves: [`begin_generation`](Self::begin_generation),
    /// [`InFlightGeneration::run`] and
    /// [`finish_generation`](Self::finish_generation).
    pub async fn generate<T>(
        &mut self,
        transport: &T,
        base: &BaseImage,
        prompt: &str,
        config: &EditorConfig,
    ) -> Result<GenerateOutcome>
    where
        T: GenerationTransport,
    {
        let generation = match self.begin_generation(base, prompt, config)? {
            Ok(generation) => generation,
            Err(rejection) => return Ok(GenerateOutcome::Rejected(rejection)),
        };
        let reply = generation.run(transport, config).await;
        Ok(self.finish_generation(reply))
    }

    /// Build the payload for `base` and the current mask, then enter
    /// Submitting. Nothing changes if the payload cannot be built.
    pub fn begin_generation(
        &mut self,
        base: &BaseImage,
        prompt: &str,
        config: &EditorConfig,
    ) -> Result<std::result::Result<InFlightGeneration, Rejection>> {
        if self.state == SessionState::Submitting {
            warn!("generate refused, a generation is already in flight");
            return Ok(Err(Rejection::AlreadySubmitting));
        }

        let payload = build_payload(base, self.surface.mask(), &config.contract, &config.style)?;
        Ok(self.submit(prompt).map(|ticket| InFlightGeneration {
            ticket,
            request: GenerationRequest {
                prompt: prompt.to_string(),
                payload,
            },
        }))
    }

    /// Resolve the submission a reply belongs to.
    pub fn finish_generation(&mut self, reply: GenerationReply) -> GenerateOutcome {
        let transition = match reply.resolved {
            Ok(image_ref) => self.complete_success(reply.ticket, image_ref, None),
            Err(error) => self.complete_failure(reply.ticket, error.to_string()),
        };

        match transition {
            Ok(Transition::Succeeded { cursor }) => GenerateOutcome::Succeeded { cursor },
            Ok(Transition::Failed { message }) => GenerateOutcome::Failed { message },
            Ok(_) => GenerateOutcome::Rejected(Rejection::NotSubmitting),
            Err(rejection) => GenerateOutcome::Rejected(rejection),
        }
    }

    fn rebase(&mut self, dimensions: Dimensions) {
        self.surface.reset(dimensions);
        self.detections.invalidate();
    }
}
