use serde_json::json;

use super::{param_i64, param_str};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Session { store, sync, .. } = session;
    // Unknown class is a silent no-op; studentId is null in that case.
    let student_id = store.add_student(cache, sync, class_id);
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(field) = param_str(&req.params, "field") else {
        return err(&req.id, "bad_params", "missing params.field");
    };
    let value = req.params.get("value").cloned().unwrap_or(json!(null));
    let Session { store, sync, .. } = session;
    store.update_student(cache, sync, class_id, student_id, &field, value);
    ok(&req.id, json!({}))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Session { store, sync, .. } = session;
    store.delete_student(cache, sync, class_id, student_id);
    ok(&req.id, json!({}))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
