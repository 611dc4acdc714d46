use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use super::param_str;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::qr::{
    self, Camera, CameraConfig, CameraDenied, FrameOutcome, ScanSession, SharedScanSession,
    SUCCESS_CLOSE_DELAY_MS,
};

/// Camera driver for the sidecar: start/stop are forwarded to the host UI
/// as standalone event lines, and the host reports a denied permission back
/// through `qr.cameraDenied`. Release may fire from a spawned task, so each
/// event takes the stdout lock for exactly one line.
struct HostCamera;

fn emit_event(event: serde_json::Value) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", event);
    let _ = out.flush();
}

impl Camera for HostCamera {
    fn acquire(&mut self, config: &CameraConfig) -> Result<(), CameraDenied> {
        emit_event(json!({ "event": "qr.camera", "action": "start", "config": config }));
        Ok(())
    }

    fn release(&mut self) {
        emit_event(json!({ "event": "qr.camera", "action": "stop" }));
    }
}

fn status_json(session: &ScanSession) -> serde_json::Value {
    json!({
        "state": session.state(),
        "selectedClass": session.selected_class(),
        "cameraActive": session.camera_active(),
        "outcome": session.outcome(),
    })
}

fn live_scan(session: &Session) -> Option<SharedScanSession> {
    let scan = session.scan.as_ref()?;
    if qr::lock(scan).is_closed() {
        return None;
    }
    Some(Arc::clone(scan))
}

fn handle_qr_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    // Accept both the string and numeric spellings of the id.
    let class_id = match req.params.get("classId") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let scan = match live_scan(session) {
        Some(scan) => scan,
        None => {
            let scan = qr::shared(ScanSession::new());
            session.scan = Some(Arc::clone(&scan));
            scan
        }
    };
    let mut guard = qr::lock(&scan);
    if !guard.select_class(&class_id) {
        // Not a protocol error; the UI shows the validation message.
        return ok(
            &req.id,
            json!({
                "selected": false,
                "message": "Please select a class first",
                "state": guard.state(),
            }),
        );
    }
    ok(
        &req.id,
        json!({ "selected": true, "state": guard.state() }),
    )
}

fn handle_qr_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(scan) = live_scan(session) else {
        return err(&req.id, "no_scan", "begin a scan session first");
    };
    let mut guard = qr::lock(&scan);
    guard.start(Box::new(HostCamera), &CameraConfig::default());
    ok(&req.id, status_json(&guard))
}

/// A decoded frame from the host. Validation and the processing guard live
/// in the session; a validated payload is submitted on the runtime and the
/// result lands back in the shared session for `qr.status` to pick up.
fn handle_qr_frame(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(text) = param_str(&req.params, "text") else {
        return err(&req.id, "bad_params", "missing params.text");
    };
    let Some(scan) = live_scan(session) else {
        return err(&req.id, "no_scan", "begin a scan session first");
    };

    let token = state.token.get();
    let outcome = {
        let mut guard = qr::lock(&scan);
        guard.handle_frame(&text, token.as_deref())
    };

    match outcome {
        FrameOutcome::Submit(submission) => {
            let service = session.sync.service();
            let scan_for_task = Arc::clone(&scan);
            state.runtime.spawn(async move {
                let result = service
                    .submit_scan(&submission.class_id, &submission.code)
                    .await;
                let success = result.is_ok();
                qr::lock(&scan_for_task).complete_submit(submission.generation, result);
                if success {
                    // Leave the success message up briefly, then self-close.
                    tokio::time::sleep(Duration::from_millis(SUCCESS_CLOSE_DELAY_MS)).await;
                    qr::lock(&scan_for_task).close_after_success(submission.generation);
                }
            });
        }
        other => debug!(outcome = ?other, "frame not submitted"),
    }

    let response = ok(&req.id, status_json(&qr::lock(&scan)));
    response
}

fn handle_qr_camera_denied(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(scan) = live_scan(session) else {
        return err(&req.id, "no_scan", "begin a scan session first");
    };
    let mut guard = qr::lock(&scan);
    guard.camera_denied();
    ok(&req.id, status_json(&guard))
}

fn handle_qr_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    if let Some(scan) = session.scan.take() {
        qr::lock(&scan).close();
    }
    ok(&req.id, json!({}))
}

fn handle_qr_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(scan) = session.scan.as_ref() else {
        return ok(&req.id, json!({ "state": "closed" }));
    };
    ok(&req.id, status_json(&qr::lock(scan)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "qr.begin" => Some(handle_qr_begin(state, req)),
        "qr.start" => Some(handle_qr_start(state, req)),
        "qr.frame" => Some(handle_qr_frame(state, req)),
        "qr.cameraDenied" => Some(handle_qr_camera_denied(state, req)),
        "qr.cancel" => Some(handle_qr_cancel(state, req)),
        "qr.status" => Some(handle_qr_status(state, req)),
        _ => None,
    }
}
