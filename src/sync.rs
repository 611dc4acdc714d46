use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::{Class, ClassId};
use crate::remote::{ClassService, RemoteError};

/// Surfaced verbatim when the remote load fails and the session degrades to
/// the cached snapshot.
pub const OFFLINE_MESSAGE: &str = "Failed to sync with server. Working offline.";
const RECONCILE_FAILED_MESSAGE: &str = "Failed to sync some changes";
const DELETE_FAILED_MESSAGE: &str = "Failed to sync deletion";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SyncState {
    Idle,
    Syncing,
    Error { message: String },
}

#[derive(Default)]
struct ClassTrack {
    /// Bumped on every local mutation of the class.
    current: u64,
    /// Highest revision the remote has confirmed.
    acked: u64,
}

struct SyncShared {
    state: Mutex<SyncState>,
    tracks: Mutex<HashMap<ClassId, ClassTrack>>,
    /// Ids the remote is believed to hold; decides create vs update.
    /// Marked optimistically when a create is spawned so bursts of
    /// mutations on a fresh class never POST twice.
    remote_ids: Mutex<HashSet<ClassId>>,
    in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Brings the remote class service and the local view into agreement.
/// Pushes are fire-and-forget on the runtime; a failure is recorded as
/// observable state and never rolls back or blocks local edits.
pub struct SyncEngine {
    service: Arc<dyn ClassService>,
    runtime: Handle,
    shared: Arc<SyncShared>,
}

impl SyncEngine {
    pub fn new(service: Arc<dyn ClassService>, runtime: Handle) -> Self {
        SyncEngine {
            service,
            runtime,
            shared: Arc::new(SyncShared {
                state: Mutex::new(SyncState::Idle),
                tracks: Mutex::new(HashMap::new()),
                remote_ids: Mutex::new(HashSet::new()),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn service(&self) -> Arc<dyn ClassService> {
        Arc::clone(&self.service)
    }

    pub fn state(&self) -> SyncState {
        lock(&self.shared.state).clone()
    }

    /// Classes whose latest local revision the remote has not confirmed.
    pub fn pending_classes(&self) -> usize {
        lock(&self.shared.tracks)
            .values()
            .filter(|t| t.current > t.acked)
            .count()
    }

    /// Session-start load. A non-empty or empty list are both valid; a
    /// failure flips the state to error and the caller falls back to the
    /// cache snapshot.
    pub async fn load(&self) -> Result<Vec<Class>, String> {
        *lock(&self.shared.state) = SyncState::Syncing;
        match self.service.list_classes().await {
            Ok(classes) => {
                self.adopt_remote(&classes);
                *lock(&self.shared.state) = SyncState::Idle;
                Ok(classes)
            }
            Err(e) => {
                warn!(error = %e, "remote load failed");
                *lock(&self.shared.state) = SyncState::Error {
                    message: OFFLINE_MESSAGE.to_string(),
                };
                Err(e.to_string())
            }
        }
    }

    fn adopt_remote(&self, classes: &[Class]) {
        let mut remote_ids = lock(&self.shared.remote_ids);
        let mut tracks = lock(&self.shared.tracks);
        remote_ids.clear();
        tracks.clear();
        for class in classes {
            remote_ids.insert(class.id);
            tracks.insert(class.id, ClassTrack::default());
        }
    }

    /// Non-blocking upsert of one class, tagged with the revision it was
    /// built from. A resolution older than the store's current revision is
    /// discarded so a slow push can never count as the latest state.
    pub fn push_class(&self, class: Class) -> JoinHandle<()> {
        let id = class.id;
        let revision = {
            let mut tracks = lock(&self.shared.tracks);
            let track = tracks.entry(id).or_default();
            track.current += 1;
            track.current
        };
        let create = {
            let mut remote_ids = lock(&self.shared.remote_ids);
            remote_ids.insert(id)
        };

        *lock(&self.shared.state) = SyncState::Syncing;
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        let service = Arc::clone(&self.service);
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = if create {
                service.create_class(&class).await
            } else {
                service.update_class(&class).await
            };
            let remaining = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            match result {
                Ok(_) => {
                    {
                        let mut tracks = lock(&shared.tracks);
                        match tracks.get_mut(&id) {
                            Some(track) if track.current > revision => {
                                // Store diverged while this push was in flight.
                                debug!(class = id, revision, "discarding stale push response");
                            }
                            Some(track) => {
                                track.acked = track.acked.max(revision);
                            }
                            None => {
                                // Deleted locally while in flight; nothing to record.
                                debug!(class = id, "push resolved after local delete");
                            }
                        }
                    }
                    if remaining == 0 {
                        *lock(&shared.state) = SyncState::Idle;
                    }
                }
                Err(e) => {
                    warn!(class = id, error = %e, "class push failed");
                    *lock(&shared.state) = SyncState::Error {
                        message: e.to_string(),
                    };
                }
            }
        })
    }

    /// Remote-wins refresh of a single class, for an explicit re-pull
    /// outside the session-start load.
    pub async fn fetch_class(&self, id: ClassId) -> Result<Class, RemoteError> {
        let class = self.service.get_class(id).await?;
        lock(&self.shared.remote_ids).insert(id);
        Ok(class)
    }

    /// Best-effort remote delete; the local removal already happened and
    /// stands regardless of the outcome.
    pub fn push_delete(&self, id: ClassId) -> JoinHandle<()> {
        lock(&self.shared.tracks).remove(&id);
        lock(&self.shared.remote_ids).remove(&id);
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        let service = Arc::clone(&self.service);
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let result = service.delete_class(id).await;
            let remaining = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            match result {
                Ok(_) => {
                    if remaining == 0 {
                        *lock(&shared.state) = SyncState::Idle;
                    }
                }
                Err(e) => {
                    warn!(class = id, error = %e, "class delete push failed");
                    *lock(&shared.state) = SyncState::Error {
                        message: DELETE_FAILED_MESSAGE.to_string(),
                    };
                }
            }
        })
    }

    /// Bulk reconciliation: classes the remote lacks are created, the rest
    /// are overwritten with the local object, then the remote's final list
    /// is adopted. Object granularity; concurrent edits from another
    /// session lose whole-object, a documented limitation.
    pub async fn reconcile(&self, local: Vec<Class>) -> Result<Vec<Class>, RemoteError> {
        *lock(&self.shared.state) = SyncState::Syncing;
        let result = self.reconcile_inner(local).await;
        match &result {
            Ok(classes) => {
                self.adopt_remote(classes);
                *lock(&self.shared.state) = SyncState::Idle;
            }
            Err(e) => {
                warn!(error = %e, "reconciliation failed");
                *lock(&self.shared.state) = SyncState::Error {
                    message: RECONCILE_FAILED_MESSAGE.to_string(),
                };
            }
        }
        result
    }

    async fn reconcile_inner(&self, local: Vec<Class>) -> Result<Vec<Class>, RemoteError> {
        let remote: HashSet<ClassId> = self
            .service
            .list_classes()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        for class in &local {
            if remote.contains(&class.id) {
                self.service.update_class(class).await?;
            } else {
                self.service.create_class(class).await?;
            }
        }
        self.service.list_classes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeClassService;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use tokio::runtime::Runtime;

    fn class(id: ClassId, name: &str) -> Class {
        Class {
            id,
            name: name.into(),
            students: vec![],
            custom_columns: vec![],
            thresholds: None,
        }
    }

    fn engine(service: Arc<FakeClassService>, rt: &Runtime) -> SyncEngine {
        SyncEngine::new(service, rt.handle().clone())
    }

    #[test]
    fn load_returns_remote_list_and_goes_idle() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::with_classes(vec![
            class(1, "A"),
            class(2, "B"),
        ]));
        let sync = engine(Arc::clone(&service), &rt);
        let loaded = rt.block_on(sync.load()).expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn load_failure_reports_offline_state() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::default());
        service.offline.store(true, AtomicOrdering::SeqCst);
        let sync = engine(Arc::clone(&service), &rt);
        assert!(rt.block_on(sync.load()).is_err());
        assert_eq!(
            sync.state(),
            SyncState::Error {
                message: OFFLINE_MESSAGE.to_string()
            }
        );
    }

    #[test]
    fn push_creates_unseen_ids_and_updates_seen_ones() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::with_classes(vec![class(1, "A")]));
        let sync = engine(Arc::clone(&service), &rt);
        rt.block_on(sync.load()).expect("load");

        let first = sync.push_class(class(1, "A renamed"));
        let second = sync.push_class(class(9, "Fresh"));
        rt.block_on(async {
            first.await.expect("join");
            second.await.expect("join");
        });

        assert_eq!(*service.updated.lock().expect("lock"), vec![1]);
        assert_eq!(*service.created.lock().expect("lock"), vec![9]);
        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(sync.pending_classes(), 0);
    }

    #[test]
    fn rapid_pushes_on_a_fresh_class_create_only_once() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::default());
        service.hold.store(true, AtomicOrdering::SeqCst);
        let sync = engine(Arc::clone(&service), &rt);

        let first = sync.push_class(class(7, "v1"));
        let second = sync.push_class(class(7, "v2"));
        assert_eq!(sync.state(), SyncState::Syncing);
        service.hold.store(false, AtomicOrdering::SeqCst);
        rt.block_on(async {
            first.await.expect("join");
            second.await.expect("join");
        });

        assert_eq!(service.created.lock().expect("lock").len(), 1);
        assert_eq!(service.updated.lock().expect("lock").len(), 1);
        assert_eq!(sync.pending_classes(), 0);
    }

    #[test]
    fn push_failure_records_error_and_keeps_class_pending() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::default());
        service.offline.store(true, AtomicOrdering::SeqCst);
        let sync = engine(Arc::clone(&service), &rt);

        let handle = sync.push_class(class(3, "Offline"));
        rt.block_on(handle).expect("join");

        assert!(matches!(sync.state(), SyncState::Error { .. }));
        assert_eq!(sync.pending_classes(), 1);
    }

    #[test]
    fn fetch_class_marks_the_id_as_remote() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::with_classes(vec![class(6, "Pulled")]));
        let sync = engine(Arc::clone(&service), &rt);

        let fetched = rt.block_on(sync.fetch_class(6)).expect("fetch");
        assert_eq!(fetched.name, "Pulled");

        // The next push updates instead of re-creating.
        rt.block_on(sync.push_class(class(6, "Pulled v2"))).expect("join");
        assert_eq!(*service.updated.lock().expect("lock"), vec![6]);
        assert!(service.created.lock().expect("lock").is_empty());
    }

    #[test]
    fn delete_push_is_best_effort() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::with_classes(vec![class(4, "Doomed")]));
        let sync = engine(Arc::clone(&service), &rt);
        rt.block_on(sync.load()).expect("load");

        rt.block_on(sync.push_delete(4)).expect("join");
        assert_eq!(*service.deleted.lock().expect("lock"), vec![4]);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn reconcile_creates_missing_and_overwrites_present() {
        let rt = Runtime::new().expect("runtime");
        let service = Arc::new(FakeClassService::with_classes(vec![class(1, "Remote A")]));
        let sync = engine(Arc::clone(&service), &rt);

        let local = vec![class(1, "Local A"), class(2, "Local B")];
        let merged = rt.block_on(sync.reconcile(local)).expect("reconcile");

        assert_eq!(*service.updated.lock().expect("lock"), vec![1]);
        assert_eq!(*service.created.lock().expect("lock"), vec![2]);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.iter().find(|c| c.id == 1).map(|c| c.name.as_str()),
            Some("Local A")
        );
        assert_eq!(sync.state(), SyncState::Idle);
    }
}
