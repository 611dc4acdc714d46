use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::remote::RemoteError;

pub const SCAN_FPS: u32 = 10;
pub const DETECTION_BOX_PX: u32 = 250;
/// How long a success message stays on screen before the session closes
/// itself.
pub const SUCCESS_CLOSE_DELAY_MS: u64 = 3000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    pub facing: &'static str,
    pub fps: u32,
    pub box_width: u32,
    pub box_height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            facing: "environment",
            fps: SCAN_FPS,
            box_width: DETECTION_BOX_PX,
            box_height: DETECTION_BOX_PX,
        }
    }
}

/// The continuous-decode camera peripheral. Acquire and release must be
/// symmetric: the session guarantees exactly one release per successful or
/// denied acquisition, on every exit path.
pub trait Camera: Send {
    fn acquire(&mut self, config: &CameraConfig) -> Result<(), CameraDenied>;
    fn release(&mut self);
}

#[derive(Debug)]
pub struct CameraDenied;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ScanFailure {
    #[error("Cannot access camera. Please allow camera permission and reload.")]
    CameraPermissionDenied,
    #[error("Invalid QR content")]
    MalformedPayload,
    #[error("This QR code is for a different class!")]
    ClassMismatch,
    #[error("Please login again.")]
    AuthMissing,
    #[error("{message}")]
    BackendRejected { message: String },
    #[error("network failure: {message}")]
    NetworkFailure { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ScanOutcome {
    Success { message: String },
    Failure { failure: ScanFailure },
}

impl ScanOutcome {
    fn failure(failure: ScanFailure) -> Self {
        ScanOutcome::Failure { failure }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanState {
    Idle,
    ClassSelected,
    CameraAcquiring,
    Scanning,
    Decoding,
    Validating,
    Submitting,
    Result,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub class_id: String,
    pub code: String,
}

/// Structured `{class_id, code}` first; a JSON text missing either field
/// falls through to the two-part `classId|code` form before being called
/// malformed.
pub fn parse_payload(text: &str) -> Result<ScanPayload, ScanFailure> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        let class_id = match value.get("class_id") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let code = value
            .get("code")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let (Some(class_id), Some(code)) = (class_id, code) {
            return Ok(ScanPayload { class_id, code });
        }
    }
    let mut parts = text.split('|');
    if let (Some(class_id), Some(code), None) = (parts.next(), parts.next(), parts.next()) {
        return Ok(ScanPayload {
            class_id: class_id.to_string(),
            code: code.to_string(),
        });
    }
    Err(ScanFailure::MalformedPayload)
}

/// What the session asks its driver to do with a decoded frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Guard hit or session not scanning; the frame is discarded, never queued.
    Dropped,
    /// Failed before submission; `outcome()` carries the specific failure.
    Rejected(ScanFailure),
    /// Validated; the driver performs the verification request and reports
    /// back through `complete_submit`.
    Submit(ScanSubmission),
}

#[derive(Debug, Clone)]
pub struct ScanSubmission {
    pub class_id: String,
    pub code: String,
    pub generation: u64,
}

/// One "scan attendance" interaction, from class selection to result.
/// Owns the camera for its whole lifetime; `release_camera` is take()-based
/// so every acquisition is released exactly once whatever path ends it.
pub struct ScanSession {
    state: ScanState,
    selected_class: String,
    camera: Option<Box<dyn Camera>>,
    outcome: Option<ScanOutcome>,
    generation: u64,
}

pub type SharedScanSession = Arc<Mutex<ScanSession>>;

pub fn shared(session: ScanSession) -> SharedScanSession {
    Arc::new(Mutex::new(session))
}

pub fn lock(session: &SharedScanSession) -> MutexGuard<'_, ScanSession> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for ScanSession {
    fn default() -> Self {
        ScanSession::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        ScanSession {
            state: ScanState::Idle,
            selected_class: String::new(),
            camera: None,
            outcome: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn outcome(&self) -> Option<&ScanOutcome> {
        self.outcome.as_ref()
    }

    pub fn selected_class(&self) -> &str {
        &self.selected_class
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ScanState::Closed
    }

    /// A non-empty selection is required before anything else; an empty one
    /// keeps the session Idle and the caller surfaces a validation message.
    pub fn select_class(&mut self, class_id: &str) -> bool {
        let class_id = class_id.trim();
        if class_id.is_empty() {
            return false;
        }
        if !matches!(self.state, ScanState::Idle | ScanState::ClassSelected) {
            return false;
        }
        self.selected_class = class_id.to_string();
        self.state = ScanState::ClassSelected;
        true
    }

    /// Acquires the camera and enters Scanning. Denial is terminal for the
    /// session and the camera resource is closed before the result shows.
    pub fn start(&mut self, mut camera: Box<dyn Camera>, config: &CameraConfig) {
        if self.state != ScanState::ClassSelected {
            return;
        }
        self.state = ScanState::CameraAcquiring;
        self.outcome = None;
        match camera.acquire(config) {
            Ok(()) => {
                self.camera = Some(camera);
                self.state = ScanState::Scanning;
            }
            Err(CameraDenied) => {
                camera.release();
                self.outcome = Some(ScanOutcome::failure(ScanFailure::CameraPermissionDenied));
                self.state = ScanState::Result;
            }
        }
    }

    /// Permission denial reported after an optimistic acquire (drivers that
    /// only learn the answer asynchronously).
    pub fn camera_denied(&mut self) {
        if !matches!(self.state, ScanState::CameraAcquiring | ScanState::Scanning) {
            return;
        }
        self.release_camera();
        self.outcome = Some(ScanOutcome::failure(ScanFailure::CameraPermissionDenied));
        self.state = ScanState::Result;
    }

    /// One decoded frame. At most one payload is in flight: frames decoded
    /// while a previous one is being validated or submitted are dropped.
    pub fn handle_frame(&mut self, text: &str, token: Option<&str>) -> FrameOutcome {
        if self.state != ScanState::Scanning {
            debug!(state = ?self.state, "dropping frame");
            return FrameOutcome::Dropped;
        }
        self.state = ScanState::Decoding;
        let payload = match parse_payload(text) {
            Ok(p) => p,
            Err(failure) => {
                // Malformed frames don't end the session; the camera keeps
                // running for another attempt.
                self.outcome = Some(ScanOutcome::failure(failure.clone()));
                self.state = ScanState::Scanning;
                return FrameOutcome::Rejected(failure);
            }
        };

        self.state = ScanState::Validating;
        if payload.class_id != self.selected_class {
            // Not retried automatically; re-entering the scan flow is
            // required after a mismatch.
            self.release_camera();
            self.outcome = Some(ScanOutcome::failure(ScanFailure::ClassMismatch));
            self.state = ScanState::Result;
            return FrameOutcome::Rejected(ScanFailure::ClassMismatch);
        }

        if token.is_none() {
            // No network call without a credential; retryable in-session.
            self.outcome = Some(ScanOutcome::failure(ScanFailure::AuthMissing));
            self.state = ScanState::Scanning;
            return FrameOutcome::Rejected(ScanFailure::AuthMissing);
        }

        self.generation += 1;
        self.state = ScanState::Submitting;
        FrameOutcome::Submit(ScanSubmission {
            class_id: payload.class_id,
            code: payload.code,
            generation: self.generation,
        })
    }

    /// Applies a verification result. A completion from a cancelled or
    /// superseded submission is ignored; in-flight requests are never
    /// aborted, only abandoned.
    pub fn complete_submit(&mut self, generation: u64, result: Result<String, RemoteError>) {
        if self.state != ScanState::Submitting || generation != self.generation {
            debug!(generation, "ignoring stale submission result");
            return;
        }
        match result {
            Ok(message) => {
                self.release_camera();
                self.outcome = Some(ScanOutcome::Success { message });
                self.state = ScanState::Result;
            }
            Err(RemoteError::Rejected(message)) => {
                self.outcome = Some(ScanOutcome::failure(ScanFailure::BackendRejected {
                    message,
                }));
                self.state = ScanState::Scanning;
            }
            Err(RemoteError::Network(message)) => {
                self.outcome = Some(ScanOutcome::failure(ScanFailure::NetworkFailure {
                    message,
                }));
                self.state = ScanState::Scanning;
            }
        }
    }

    /// Scheduled close after a success result; a session that moved on in
    /// the meantime is left alone.
    pub fn close_after_success(&mut self, generation: u64) {
        let success = matches!(self.outcome, Some(ScanOutcome::Success { .. }));
        if generation == self.generation && self.state == ScanState::Result && success {
            self.close();
        }
    }

    /// Cancellation or external close from any state; releases the camera
    /// before the session is considered closed.
    pub fn close(&mut self) {
        self.release_camera();
        self.state = ScanState::Closed;
    }

    fn release_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.release_camera();
    }
}
