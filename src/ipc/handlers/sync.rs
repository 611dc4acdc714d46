use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};

fn handle_sync_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "no_session", "open a session first");
    };
    ok(
        &req.id,
        json!({
            "sync": session.sync.state(),
            "pendingClasses": session.sync.pending_classes(),
        }),
    )
}

/// Explicit bulk reconciliation: push everything local, then adopt the
/// remote's final word for the collection.
fn handle_sync_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(cache) = state.cache.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first");
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first");
    };
    let runtime = state.runtime.clone();
    let Session { store, sync, .. } = session;
    let local = store.classes().to_vec();
    match runtime.block_on(sync.reconcile(local)) {
        Ok(classes) => {
            let count = classes.len();
            store.replace_all(cache, classes);
            ok(&req.id, json!({ "classCount": count }))
        }
        Err(e) => err(&req.id, "sync_failed", e.to_string()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.status" => Some(handle_sync_status(state, req)),
        "sync.flush" => Some(handle_sync_flush(state, req)),
        _ => None,
    }
}
