use serde_json::json;

use super::{param_i64, param_month};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats;

/// Dashboard roll-up across every class for the selected month.
fn handle_reports_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some((year, month0)) = param_month(&req.params) else {
        return err(&req.id, "bad_params", "missing params.year/month0");
    };
    let overview = stats::overview(
        session.store.classes(),
        year,
        month0,
        &session.store.default_thresholds(),
    );
    match serde_json::to_value(overview) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string()),
    }
}

fn handle_reports_class_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Some((year, month0)) = param_month(&req.params) else {
        return err(&req.id, "bad_params", "missing params.year/month0");
    };
    let Some(class) = session.store.class(class_id) else {
        return err(&req.id, "not_found", "class not found");
    };
    let stats = stats::class_month(class, year, month0, &session.store.default_thresholds());
    match serde_json::to_value(stats) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.snapshot" => Some(handle_reports_snapshot(state, req)),
        "reports.classStats" => Some(handle_reports_class_stats(state, req)),
        _ => None,
    }
}
