use serde_json::json;

use super::{param_i64, param_month};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::{date_key, ColumnType};
use crate::stats::days_in_month;

fn handle_attendance_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Some(student_id) = param_i64(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "missing params.studentId");
    };
    let Some((year, month0)) = param_month(&req.params) else {
        return err(&req.id, "bad_params", "missing params.year/month0");
    };
    let Some(day) = req.params.get("day").and_then(|v| v.as_u64()).map(|d| d as u32) else {
        return err(&req.id, "bad_params", "missing params.day");
    };
    if day == 0 || day > days_in_month(year, month0) {
        return err(&req.id, "bad_params", "day out of range for month");
    }

    let Session { store, sync, .. } = session;
    let status = store.toggle_attendance(cache, sync, class_id, student_id, year, month0, day);
    ok(&req.id, json!({ "status": status.flatten() }))
}

/// Month grid for one class: day-indexed status rows per student, in roster
/// order.
fn handle_attendance_sheet_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let days = days_in_month(year, month0);
    let students_json: Vec<serde_json::Value> = class
        .students
        .iter()
        .map(|s| json!({ "id": s.id, "rollNo": &s.roll_no, "name": &s.name }))
        .collect();
    let rows_json: Vec<serde_json::Value> = class
        .students
        .iter()
        .map(|s| {
            let statuses: Vec<serde_json::Value> = (1..=days)
                .map(|day| {
                    s.attendance
                        .get(&date_key(year, month0, day))
                        .map(|status| json!(status))
                        .unwrap_or(json!(null))
                })
                .collect();
            json!({ "studentId": s.id, "statuses": statuses })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class.id,
            "name": &class.name,
            "daysInMonth": days,
            "customColumns": &class.custom_columns,
            "students": students_json,
            "rows": rows_json,
        }),
    )
}

fn handle_columns_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Some(label) = super::param_str(&req.params, "label") else {
        return err(&req.id, "bad_params", "missing params.label");
    };
    let column_type: ColumnType = match serde_json::from_value(
        req.params.get("type").cloned().unwrap_or(json!("text")),
    ) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "bad_params", format!("invalid type: {}", e)),
    };
    let options: Option<Vec<String>> = req
        .params
        .get("options")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let Session { store, sync, .. } = session;
    match store.add_column(cache, sync, class_id, &label, column_type, options) {
        Some(column_id) => ok(&req.id, json!({ "columnId": column_id })),
        None => err(&req.id, "bad_params", "column label must not be empty"),
    }
}

fn handle_columns_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Some(column_id) = super::param_str(&req.params, "columnId") else {
        return err(&req.id, "bad_params", "missing params.columnId");
    };
    let Session { store, sync, .. } = session;
    store.delete_column(cache, sync, class_id, &column_id);
    ok(&req.id, json!({}))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.toggle" => Some(handle_attendance_toggle(state, req)),
        "attendance.sheetOpen" => Some(handle_attendance_sheet_open(state, req)),
        "columns.add" => Some(handle_columns_add(state, req)),
        "columns.delete" => Some(handle_columns_delete(state, req)),
        _ => None,
    }
}
