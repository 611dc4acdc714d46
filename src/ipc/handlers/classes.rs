use serde_json::json;

use super::{param_i64, param_str};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::{ids, AttendanceThresholds, ClassId, Student};
use crate::store::ActiveView;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    match serde_json::to_value(session.store.classes()) {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "serialize_failed", e.to_string()),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(name) = param_str(&req.params, "name") else {
        return err(&req.id, "bad_params", "missing params.name");
    };
    let Session {
        store, sync, view, ..
    } = session;
    let Some(class_id) = store.add_class(cache, sync, &name) else {
        return err(&req.id, "bad_params", "class name must not be empty");
    };
    // A fresh class opens straight onto its sheet.
    *view = ActiveView::Sheet { class_id };
    ok(&req.id, json!({ "classId": class_id }))
}

/// Quoted-CSV record reader; `""` escapes a quote inside quotes.
fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn looks_like_header(fields: &[String]) -> bool {
    let first = fields
        .first()
        .map(|f| f.trim().to_ascii_lowercase())
        .unwrap_or_default();
    matches!(first.as_str(), "rollno" | "roll no" | "roll_no")
}

fn parse_roster(text: &str) -> (Vec<Student>, Vec<serde_json::Value>) {
    let mut students = Vec::new();
    let mut warnings = Vec::new();
    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = parse_csv_record(line);
        if line_no == 0 && looks_like_header(&fields) {
            continue;
        }
        if fields.len() < 2 {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "bad_columns",
                "message": "expected rollNo,name"
            }));
            continue;
        }
        let mut student = Student::blank(ids::numeric());
        student.roll_no = fields[0].trim().to_string();
        student.name = fields[1].trim().to_string();
        students.push(student);
    }
    (students, warnings)
}

fn handle_classes_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(name) = param_str(&req.params, "name") else {
        return err(&req.id, "bad_params", "missing params.name");
    };
    let Some(csv) = param_str(&req.params, "csv") else {
        return err(&req.id, "bad_params", "missing params.csv");
    };
    let (students, warnings) = parse_roster(&csv);
    let imported = students.len();
    let Session {
        store, sync, view, ..
    } = session;
    let Some(class_id) = store.insert_class(cache, sync, &name, students, Vec::new()) else {
        return err(&req.id, "bad_params", "class name must not be empty");
    };
    *view = ActiveView::Sheet { class_id };
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "imported": imported,
            "warnings": warnings,
        }),
    )
}

/// Explicit single-class re-pull; the remote copy overwrites the local one
/// at object granularity, same as the load protocol does wholesale.
fn handle_classes_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let runtime = state.runtime.clone();
    match runtime.block_on(session.sync.fetch_class(class_id)) {
        Ok(class) => {
            session.store.adopt_class(cache, class);
            ok(&req.id, json!({ "classId": class_id }))
        }
        Err(e) => err(&req.id, "sync_failed", e.to_string()),
    }
}

fn handle_classes_rename(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Some(name) = param_str(&req.params, "name") else {
        return err(&req.id, "bad_params", "missing params.name");
    };
    let Session { store, sync, .. } = session;
    store.rename_class(cache, sync, class_id, &name);
    ok(&req.id, json!({}))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let Some(class_id) = param_i64(&req.params, "classId") else {
        return err(&req.id, "bad_params", "missing params.classId");
    };
    let Session {
        store, sync, view, ..
    } = session;
    let deleted = store.delete_class(cache, sync, class_id);
    if deleted && *view == (ActiveView::Sheet { class_id }) {
        *view = ActiveView::Snapshot;
    }
    ok(&req.id, json!({ "deleted": deleted }))
}

fn handle_classes_set_thresholds(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let thresholds: AttendanceThresholds =
        match serde_json::from_value(req.params.get("thresholds").cloned().unwrap_or_default()) {
            Ok(t) => t,
            Err(e) => return err(&req.id, "bad_params", format!("invalid thresholds: {}", e)),
        };
    let apply_to: Vec<ClassId> = req
        .params
        .get("applyTo")
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();
    let set_default = req
        .params
        .get("setDefault")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let Session { store, sync, .. } = session;
    if !store.set_thresholds(cache, sync, thresholds, &apply_to, set_default) {
        return err(
            &req.id,
            "bad_params",
            "thresholds must satisfy atRisk <= moderate <= good <= excellent",
        );
    }
    ok(&req.id, json!({ "applied": apply_to.len(), "setDefault": set_default }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.importCsv" => Some(handle_classes_import_csv(state, req)),
        "classes.refresh" => Some(handle_classes_refresh(state, req)),
        "classes.rename" => Some(handle_classes_rename(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.setThresholds" => Some(handle_classes_set_thresholds(state, req)),
        _ => None,
    }
}
