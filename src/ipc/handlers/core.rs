use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::param_str;
use crate::cache::PersistenceCache;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::remote::{HttpClassService, BASE_URL_ENV, DEFAULT_BASE_URL};
use crate::store::{ActiveView, AttendanceStore};
use crate::sync::SyncEngine;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sessionOpen": state.session.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = param_str(&req.params, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing params.path");
    };
    match PersistenceCache::open(&path) {
        Ok(cache) => {
            state.workspace = Some(path.clone());
            state.cache = Some(cache);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "cache_open_failed", format!("{e:?}")),
    }
}

fn handle_auth_set_token(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(token) = param_str(&req.params, "token").filter(|t| !t.trim().is_empty()) else {
        return err(&req.id, "bad_params", "missing params.token");
    };
    state.token.set(Some(token));
    ok(&req.id, json!({}))
}

fn handle_auth_clear_token(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.token.set(None);
    ok(&req.id, json!({}))
}

fn close_session(state: &mut AppState) {
    if let Some(session) = state.session.take() {
        // Session::drop closes any live scan and releases the camera.
        info!(user = session.store.user_id(), "session disposed");
    }
}

/// Creates the store for the user and runs the load protocol: remote wins
/// when it answers (empty included); on failure the session degrades to the
/// cached snapshot, or empty state when there is none.
fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(user_id) = param_str(&req.params, "userId").filter(|u| !u.trim().is_empty()) else {
        return err(&req.id, "bad_params", "missing params.userId");
    };
    if state.cache.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first");
    }
    // Re-opening replaces any live session; the old one is disposed first.
    close_session(state);

    let base_url = param_str(&req.params, "baseUrl")
        .or_else(|| std::env::var(BASE_URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let service = match HttpClassService::new(base_url, state.token.clone()) {
        Ok(service) => service,
        Err(e) => return err(&req.id, "client_build_failed", format!("{e:?}")),
    };
    let sync = SyncEngine::new(Arc::new(service), state.runtime.clone());

    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let default_thresholds = cache.load_thresholds(&user_id).unwrap_or_default();
    let mut store = AttendanceStore::create(&user_id, default_thresholds);

    let loaded = state.runtime.block_on(sync.load());
    match loaded {
        Ok(classes) => store.replace_all(cache, classes),
        Err(_) => {
            // Offline start: adopt the last snapshot for this user, if any.
            if let Some(snapshot) = cache.load_classes(&user_id) {
                store.replace_all(cache, snapshot);
            }
        }
    }

    info!(user = %user_id, classes = store.classes().len(), "session opened");
    let result = json!({
        "userId": user_id,
        "classCount": store.classes().len(),
        "syncState": sync.state(),
    });
    state.session = Some(Session {
        store,
        sync,
        view: ActiveView::Snapshot,
        scan: None,
    });
    ok(&req.id, result)
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    close_session(state);
    ok(&req.id, json!({}))
}

fn handle_session_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    ok(
        &req.id,
        json!({
            "userId": session.store.user_id(),
            "view": session.view,
            "classCount": session.store.classes().len(),
            "syncState": session.sync.state(),
            "defaultThresholds": session.store.default_thresholds(),
        }),
    )
}

fn handle_view_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let view: ActiveView = match serde_json::from_value(req.params.clone()) {
        Ok(view) => view,
        Err(e) => return err(&req.id, "bad_params", format!("invalid view: {}", e)),
    };
    if let ActiveView::Sheet { class_id } = view {
        if session.store.class(class_id).is_none() {
            return err(&req.id, "not_found", "class not found");
        }
    }
    session.view = view;
    ok(&req.id, json!({ "view": session.view }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "auth.setToken" => Some(handle_auth_set_token(state, req)),
        "auth.clearToken" => Some(handle_auth_clear_token(state, req)),
        "session.open" => Some(handle_session_open(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        "session.status" => Some(handle_session_status(state, req)),
        "view.set" => Some(handle_view_set(state, req)),
        _ => None,
    }
}
