use std::path::PathBuf;

use serde::Deserialize;
use tokio::runtime::Handle;

use crate::cache::PersistenceCache;
use crate::qr::SharedScanSession;
use crate::remote::TokenHolder;
use crate::store::{ActiveView, AttendanceStore};
use crate::sync::SyncEngine;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One signed-in user's live state: the canonical store, its sync engine,
/// the active dashboard view, and at most one scan session.
pub struct Session {
    pub store: AttendanceStore,
    pub sync: SyncEngine,
    pub view: ActiveView,
    pub scan: Option<SharedScanSession>,
}

impl Drop for Session {
    fn drop(&mut self) {
        // Disposal must never leak the camera past the session.
        if let Some(scan) = self.scan.take() {
            crate::qr::lock(&scan).close();
        }
    }
}

pub struct AppState {
    pub runtime: Handle,
    pub workspace: Option<PathBuf>,
    pub cache: Option<PersistenceCache>,
    pub token: TokenHolder,
    pub session: Option<Session>,
}

impl AppState {
    pub fn new(runtime: Handle) -> Self {
        AppState {
            runtime,
            workspace: None,
            cache: None,
            token: TokenHolder::default(),
            session: None,
        }
    }
}
