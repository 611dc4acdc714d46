use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::PersistenceCache;
use crate::cycle;
use crate::model::{
    date_key, ids, AttendanceStatus, AttendanceThresholds, Class, ClassId, ColumnType,
    CustomColumn, Student, StudentId,
};
use crate::sync::SyncEngine;

/// Which surface the dashboard is showing. One variant set instead of the
/// original's three booleans, so inconsistent combinations cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActiveView {
    Snapshot,
    AllClasses,
    Sheet { class_id: ClassId },
    ImportSetup,
}

/// Canonical in-memory class collection for one signed-in user. Every
/// structural mutation passes through here and is (a) applied to memory,
/// (b) mirrored to the cache — the durability boundary — and (c) handed to
/// the sync engine, fire-and-forget. Invalid input is absorbed as a no-op;
/// mutations never raise.
pub struct AttendanceStore {
    user_id: String,
    classes: Vec<Class>,
    default_thresholds: AttendanceThresholds,
}

impl AttendanceStore {
    pub fn create(user_id: &str, default_thresholds: AttendanceThresholds) -> Self {
        AttendanceStore {
            user_id: user_id.to_string(),
            classes: Vec::new(),
            default_thresholds,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == id)
    }

    fn class_mut(&mut self, id: ClassId) -> Option<&mut Class> {
        self.classes.iter_mut().find(|c| c.id == id)
    }

    pub fn default_thresholds(&self) -> AttendanceThresholds {
        self.default_thresholds
    }

    /// Whole-collection overwrite: remote-wins load and bulk reconciliation
    /// both land here.
    pub fn replace_all(&mut self, cache: &PersistenceCache, classes: Vec<Class>) {
        self.classes = classes;
        self.mirror(cache);
    }

    /// Adopts one remote-sourced class object verbatim. Mirrored but not
    /// pushed back; the remote already holds this exact state.
    pub fn adopt_class(&mut self, cache: &PersistenceCache, class: Class) {
        match self.class_mut(class.id) {
            Some(slot) => *slot = class,
            None => self.classes.push(class),
        }
        self.mirror(cache);
    }

    fn mirror(&self, cache: &PersistenceCache) {
        if let Err(e) = cache.save_classes(&self.user_id, &self.classes) {
            // The cache is a fallback; a failed mirror must not block edits.
            warn!(user = %self.user_id, error = %e, "cache mirror failed");
        }
    }

    fn commit(&self, cache: &PersistenceCache, sync: &SyncEngine, class_id: ClassId) {
        self.mirror(cache);
        if let Some(class) = self.class(class_id) {
            let _ = sync.push_class(class.clone());
        }
    }

    pub fn add_class(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        name: &str,
    ) -> Option<ClassId> {
        self.insert_class(cache, sync, name, Vec::new(), Vec::new())
    }

    /// Import path: a freshly created class arriving with a parsed roster.
    pub fn insert_class(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        name: &str,
        students: Vec<Student>,
        custom_columns: Vec<CustomColumn>,
    ) -> Option<ClassId> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let class = Class {
            id: ids::numeric(),
            name: name.to_string(),
            students,
            custom_columns,
            thresholds: None,
        };
        let id = class.id;
        self.classes.push(class);
        self.commit(cache, sync, id);
        Some(id)
    }

    /// Local removal is synchronous and authoritative; the remote delete is
    /// best-effort and its failure only affects remote state until the next
    /// successful load.
    pub fn delete_class(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
    ) -> bool {
        let before = self.classes.len();
        self.classes.retain(|c| c.id != class_id);
        if self.classes.len() == before {
            return false;
        }
        self.mirror(cache);
        let _ = sync.push_delete(class_id);
        true
    }

    pub fn rename_class(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        new_name: &str,
    ) {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return;
        }
        let Some(class) = self.class_mut(class_id) else {
            return;
        };
        if class.name == new_name {
            return;
        }
        class.name = new_name.to_string();
        self.commit(cache, sync, class_id);
    }

    pub fn add_student(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
    ) -> Option<StudentId> {
        let Some(class) = self.class_mut(class_id) else {
            return None;
        };
        let student = Student::blank(ids::numeric());
        let id = student.id;
        class.students.push(student);
        self.commit(cache, sync, class_id);
        Some(id)
    }

    /// Replaces one field on one student. `rollNo` and `name` are the named
    /// fields; anything else lands in the custom-column bag. The identity
    /// and attendance fields are not reachable through this op.
    pub fn update_student(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        student_id: StudentId,
        field: &str,
        value: serde_json::Value,
    ) {
        let Some(class) = self.class_mut(class_id) else {
            return;
        };
        let Some(student) = class.students.iter_mut().find(|s| s.id == student_id) else {
            return;
        };
        match field {
            "rollNo" => {
                let Some(text) = value.as_str() else { return };
                student.roll_no = text.to_string();
            }
            "name" => {
                let Some(text) = value.as_str() else { return };
                student.name = text.to_string();
            }
            "id" | "attendance" => {
                debug!(field, "refusing protected student field");
                return;
            }
            column_id => {
                student.extra.insert(column_id.to_string(), value);
            }
        }
        self.commit(cache, sync, class_id);
    }

    pub fn delete_student(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        student_id: StudentId,
    ) {
        let Some(class) = self.class_mut(class_id) else {
            return;
        };
        let before = class.students.len();
        class.students.retain(|s| s.id != student_id);
        if class.students.len() == before {
            return;
        }
        self.commit(cache, sync, class_id);
    }

    /// Advances one day's status through the marking cycle. An Unmarked
    /// result removes the key so the map stays minimal.
    pub fn toggle_attendance(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        student_id: StudentId,
        year: i32,
        month0: u32,
        day: u32,
    ) -> Option<Option<AttendanceStatus>> {
        let key = date_key(year, month0, day);
        let Some(class) = self.class_mut(class_id) else {
            return None;
        };
        let Some(student) = class.students.iter_mut().find(|s| s.id == student_id) else {
            return None;
        };
        let next = cycle::next_status(student.attendance.get(&key).copied());
        match next {
            Some(status) => {
                student.attendance.insert(key, status);
            }
            None => {
                student.attendance.remove(&key);
            }
        }
        self.commit(cache, sync, class_id);
        Some(next)
    }

    /// An empty label is refused outright, even though the caller UI also
    /// validates it.
    pub fn add_column(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        label: &str,
        column_type: ColumnType,
        options: Option<Vec<String>>,
    ) -> Option<String> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let Some(class) = self.class_mut(class_id) else {
            return None;
        };
        let column = CustomColumn {
            id: ids::column(),
            label: label.to_string(),
            column_type,
            options: match column_type {
                ColumnType::Select => options,
                _ => None,
            },
        };
        let id = column.id.clone();
        class.custom_columns.push(column);
        self.commit(cache, sync, class_id);
        Some(id)
    }

    /// Removes the definition and strips the key from every student's bag
    /// in the same mutation; an unknown column touches neither.
    pub fn delete_column(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        class_id: ClassId,
        column_id: &str,
    ) {
        let Some(class) = self.class_mut(class_id) else {
            return;
        };
        let Some(pos) = class.custom_columns.iter().position(|c| c.id == column_id) else {
            return;
        };
        class.custom_columns.remove(pos);
        for student in &mut class.students {
            student.extra.remove(column_id);
        }
        self.commit(cache, sync, class_id);
    }

    /// Applies thresholds to the named classes and optionally makes them
    /// the user default. Out-of-order cut-points are refused whole.
    pub fn set_thresholds(
        &mut self,
        cache: &PersistenceCache,
        sync: &SyncEngine,
        thresholds: AttendanceThresholds,
        apply_to: &[ClassId],
        set_default: bool,
    ) -> bool {
        if !thresholds.is_ordered() {
            return false;
        }
        let mut touched = Vec::new();
        for &class_id in apply_to {
            if let Some(class) = self.class_mut(class_id) {
                class.thresholds = Some(thresholds);
                touched.push(class_id);
            }
        }
        if set_default {
            self.default_thresholds = thresholds;
            if let Err(e) = cache.save_thresholds(&self.user_id, &thresholds) {
                warn!(user = %self.user_id, error = %e, "threshold save failed");
            }
        }
        if !touched.is_empty() {
            self.mirror(cache);
            for class_id in touched {
                if let Some(class) = self.class(class_id) {
                    let _ = sync.push_class(class.clone());
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeClassService;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::runtime::Runtime;

    struct Fixture {
        _rt: Runtime,
        cache: PersistenceCache,
        sync: SyncEngine,
        service: Arc<FakeClassService>,
        store: AttendanceStore,
        dir: PathBuf,
    }

    impl Fixture {
        fn new(prefix: &str) -> Self {
            let rt = Runtime::new().expect("runtime");
            let dir = std::env::temp_dir().join(format!(
                "{}-{}",
                prefix,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("clock")
                    .as_nanos()
            ));
            let cache = PersistenceCache::open(&dir).expect("open cache");
            let service = Arc::new(FakeClassService::default());
            let sync = SyncEngine::new(
                Arc::clone(&service) as Arc<dyn crate::remote::ClassService>,
                rt.handle().clone(),
            );
            let store = AttendanceStore::create("u1", AttendanceThresholds::default());
            Fixture {
                _rt: rt,
                cache,
                sync,
                service,
                store,
                dir,
            }
        }

        fn class_with_student(&mut self) -> (ClassId, StudentId) {
            let class_id = self
                .store
                .add_class(&self.cache, &self.sync, "Physics")
                .expect("class");
            let student_id = self
                .store
                .add_student(&self.cache, &self.sync, class_id)
                .expect("student");
            (class_id, student_id)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn toggle_walks_present_absent_late_unmarked() {
        let mut fx = Fixture::new("attendsheets-store-toggle");
        let (class_id, student_id) = fx.class_with_student();

        let mut last = None;
        for _ in 0..3 {
            last = fx
                .store
                .toggle_attendance(&fx.cache, &fx.sync, class_id, student_id, 2025, 8, 15)
                .expect("toggle");
        }
        assert_eq!(last, Some(AttendanceStatus::Late));

        let last = fx
            .store
            .toggle_attendance(&fx.cache, &fx.sync, class_id, student_id, 2025, 8, 15)
            .expect("toggle");
        assert_eq!(last, None);

        // Unmarked leaves no key behind.
        let class = fx.store.class(class_id).expect("class");
        assert!(class.students[0].attendance.is_empty());
    }

    #[test]
    fn first_toggle_is_present_under_the_stored_key() {
        let mut fx = Fixture::new("attendsheets-store-key");
        let (class_id, student_id) = fx.class_with_student();
        fx.store
            .toggle_attendance(&fx.cache, &fx.sync, class_id, student_id, 2025, 0, 7)
            .expect("toggle");
        let class = fx.store.class(class_id).expect("class");
        assert_eq!(
            class.students[0].attendance.get("2025-1-7"),
            Some(&AttendanceStatus::Present)
        );
    }

    #[test]
    fn every_mutation_round_trips_through_the_cache() {
        let mut fx = Fixture::new("attendsheets-store-mirror");
        let (class_id, student_id) = fx.class_with_student();
        fx.store.update_student(
            &fx.cache,
            &fx.sync,
            class_id,
            student_id,
            "name",
            serde_json::json!("Grace"),
        );
        fx.store
            .toggle_attendance(&fx.cache, &fx.sync, class_id, student_id, 2025, 8, 3)
            .expect("toggle");

        let reloaded = fx.cache.load_classes("u1").expect("snapshot");
        assert_eq!(reloaded, fx.store.classes().to_vec());
    }

    #[test]
    fn delete_column_strips_every_bag_entry() {
        let mut fx = Fixture::new("attendsheets-store-columns");
        let (class_id, student_id) = fx.class_with_student();
        let second = fx
            .store
            .add_student(&fx.cache, &fx.sync, class_id)
            .expect("student");
        let column_id = fx
            .store
            .add_column(&fx.cache, &fx.sync, class_id, "House", ColumnType::Text, None)
            .expect("column");
        for sid in [student_id, second] {
            fx.store.update_student(
                &fx.cache,
                &fx.sync,
                class_id,
                sid,
                &column_id,
                serde_json::json!("Ravenclaw"),
            );
        }

        fx.store
            .delete_column(&fx.cache, &fx.sync, class_id, &column_id);

        let class = fx.store.class(class_id).expect("class");
        assert!(class.custom_columns.is_empty());
        assert!(class
            .students
            .iter()
            .all(|s| !s.extra.contains_key(&column_id)));
    }

    #[test]
    fn unknown_column_deletion_touches_nothing() {
        let mut fx = Fixture::new("attendsheets-store-columns-missing");
        let (class_id, student_id) = fx.class_with_student();
        let column_id = fx
            .store
            .add_column(&fx.cache, &fx.sync, class_id, "House", ColumnType::Text, None)
            .expect("column");
        fx.store.update_student(
            &fx.cache,
            &fx.sync,
            class_id,
            student_id,
            &column_id,
            serde_json::json!("Hufflepuff"),
        );

        fx.store
            .delete_column(&fx.cache, &fx.sync, class_id, "col-missing");

        let class = fx.store.class(class_id).expect("class");
        assert_eq!(class.custom_columns.len(), 1);
        assert!(class.students[0].extra.contains_key(&column_id));
    }

    #[test]
    fn empty_column_label_is_refused() {
        let mut fx = Fixture::new("attendsheets-store-label");
        let (class_id, _) = fx.class_with_student();
        assert!(fx
            .store
            .add_column(&fx.cache, &fx.sync, class_id, "   ", ColumnType::Text, None)
            .is_none());
        assert!(fx.store.class(class_id).expect("class").custom_columns.is_empty());
    }

    #[test]
    fn select_options_only_survive_on_select_columns() {
        let mut fx = Fixture::new("attendsheets-store-options");
        let (class_id, _) = fx.class_with_student();
        let options = Some(vec!["Red".to_string(), "Blue".to_string()]);
        fx.store
            .add_column(
                &fx.cache,
                &fx.sync,
                class_id,
                "Team",
                ColumnType::Select,
                options.clone(),
            )
            .expect("column");
        fx.store
            .add_column(&fx.cache, &fx.sync, class_id, "Notes", ColumnType::Text, options)
            .expect("column");
        let class = fx.store.class(class_id).expect("class");
        assert!(class.custom_columns[0].options.is_some());
        assert!(class.custom_columns[1].options.is_none());
    }

    #[test]
    fn mutations_on_unknown_targets_are_noops() {
        let mut fx = Fixture::new("attendsheets-store-noop");
        let (class_id, _) = fx.class_with_student();
        let snapshot = fx.store.classes().to_vec();

        assert!(fx.store.add_student(&fx.cache, &fx.sync, 999).is_none());
        fx.store.delete_student(&fx.cache, &fx.sync, class_id, 999);
        fx.store.update_student(
            &fx.cache,
            &fx.sync,
            class_id,
            999,
            "name",
            serde_json::json!("Ghost"),
        );
        assert!(fx
            .store
            .toggle_attendance(&fx.cache, &fx.sync, 999, 1, 2025, 0, 1)
            .is_none());

        assert_eq!(fx.store.classes(), &snapshot[..]);
    }

    #[test]
    fn protected_student_fields_are_refused() {
        let mut fx = Fixture::new("attendsheets-store-protected");
        let (class_id, student_id) = fx.class_with_student();
        fx.store.update_student(
            &fx.cache,
            &fx.sync,
            class_id,
            student_id,
            "id",
            serde_json::json!(42),
        );
        let class = fx.store.class(class_id).expect("class");
        assert_eq!(class.students[0].id, student_id);
        assert!(!class.students[0].extra.contains_key("id"));
    }

    #[test]
    fn rename_ignores_empty_and_unchanged_names() {
        let mut fx = Fixture::new("attendsheets-store-rename");
        let (class_id, _) = fx.class_with_student();
        fx.store.rename_class(&fx.cache, &fx.sync, class_id, "  ");
        fx.store
            .rename_class(&fx.cache, &fx.sync, class_id, "Physics");
        assert_eq!(fx.store.class(class_id).expect("class").name, "Physics");

        fx.store
            .rename_class(&fx.cache, &fx.sync, class_id, " Applied Physics ");
        assert_eq!(
            fx.store.class(class_id).expect("class").name,
            "Applied Physics"
        );
    }

    #[test]
    fn unordered_thresholds_are_refused_whole() {
        let mut fx = Fixture::new("attendsheets-store-thresholds");
        let (class_id, _) = fx.class_with_student();
        let bad = AttendanceThresholds {
            excellent: 80.0,
            good: 90.0,
            moderate: 85.0,
            at_risk: 85.0,
        };
        assert!(!fx
            .store
            .set_thresholds(&fx.cache, &fx.sync, bad, &[class_id], true));
        assert!(fx.store.class(class_id).expect("class").thresholds.is_none());
        assert_eq!(
            fx.store.default_thresholds(),
            AttendanceThresholds::default()
        );
    }

    #[test]
    fn thresholds_apply_per_class_and_as_default() {
        let mut fx = Fixture::new("attendsheets-store-thresholds-apply");
        let (class_id, _) = fx.class_with_student();
        let tuned = AttendanceThresholds {
            excellent: 98.0,
            good: 92.0,
            moderate: 80.0,
            at_risk: 70.0,
        };
        assert!(fx
            .store
            .set_thresholds(&fx.cache, &fx.sync, tuned, &[class_id], true));
        assert_eq!(
            fx.store.class(class_id).expect("class").thresholds,
            Some(tuned)
        );
        assert_eq!(fx.cache.load_thresholds("u1"), Some(tuned));
    }

    #[test]
    fn deleting_a_class_removes_it_everywhere_local() {
        let mut fx = Fixture::new("attendsheets-store-delete-class");
        let (class_id, _) = fx.class_with_student();
        assert!(fx.store.delete_class(&fx.cache, &fx.sync, class_id));
        assert!(fx.store.classes().is_empty());
        assert_eq!(fx.cache.load_classes("u1"), Some(vec![]));
        assert!(!fx.store.delete_class(&fx.cache, &fx.sync, class_id));
        let _ = &fx.service;
    }
}
