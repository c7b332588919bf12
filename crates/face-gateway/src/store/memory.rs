use async_trait::async_trait;
use common::violations::{
    NewStudent, NewUnknownFace, NewViolation, SearchField, Student, StudentRecord, UnknownFace,
    Violation,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{GatewayStore, StoreError, StoreResult, ViolationRow};

/// In-process store for tests and database-less runs.
///
/// Mirrors the PostgreSQL store: unique LRNs and image paths, newest-first
/// listings, case-insensitive search.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    offline: AtomicBool,
}

#[derive(Default)]
struct StoreInner {
    students: Vec<StudentRecord>,
    violations: Vec<Violation>,
    unknown_faces: Vec<UnknownFace>,
    next_student_id: i64,
    next_violation_id: i64,
    next_unknown_face_id: i64,
}

impl StoreInner {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn push_violation(&mut self, violation: &NewViolation) -> i64 {
        let id = Self::next_id(&mut self.next_violation_id);
        self.violations.push(violation.clone().into_violation(id));
        id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost database: every call fails with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn newest_first(violations: &mut [Violation]) {
        violations.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn load_students(&self) -> StoreResult<Vec<StudentRecord>> {
        self.ensure_online()?;
        Ok(self.inner.read().await.students.clone())
    }

    async fn insert_student(&self, student: &NewStudent) -> StoreResult<i64> {
        self.ensure_online()?;
        let mut inner = self.inner.write().await;

        if inner.students.iter().any(|s| s.student.lrn == student.lrn) {
            return Err(StoreError::Duplicate(format!("Student with LRN {}", student.lrn)));
        }

        let id = StoreInner::next_id(&mut inner.next_student_id);
        inner.students.push(StudentRecord {
            student: Student {
                id,
                name: student.name.clone(),
                lrn: student.lrn.clone(),
                grade_level: student.grade_level.clone(),
                section: student.section.clone(),
            },
            photo: Some(student.photo.clone()),
        });
        Ok(id)
    }

    async fn insert_violation(&self, violation: &NewViolation) -> StoreResult<i64> {
        self.ensure_online()?;
        Ok(self.inner.write().await.push_violation(violation))
    }

    async fn record_unknown_face(
        &self,
        face: &NewUnknownFace,
        violation: &NewViolation,
    ) -> StoreResult<(i64, i64)> {
        self.ensure_online()?;
        let mut inner = self.inner.write().await;

        if inner.unknown_faces.iter().any(|f| f.image_path == face.image_path) {
            return Err(StoreError::Duplicate(format!("Unknown face {}", face.image_path)));
        }

        let face_id = StoreInner::next_id(&mut inner.next_unknown_face_id);
        inner.unknown_faces.push(UnknownFace {
            id: face_id,
            image_path: face.image_path.clone(),
            detection_time: face.detection_time,
            location: face.location.clone(),
            processed: false,
            notes: None,
        });
        let violation_id = inner.push_violation(violation);

        Ok((face_id, violation_id))
    }

    async fn list_violations(&self) -> StoreResult<Vec<ViolationRow>> {
        self.ensure_online()?;
        let inner = self.inner.read().await;

        let mut violations = inner.violations.clone();
        Self::newest_first(&mut violations);

        Ok(violations
            .into_iter()
            .map(|violation| {
                let student_photo = if violation.is_unknown() {
                    None
                } else {
                    inner
                        .students
                        .iter()
                        .find(|s| s.student.lrn == violation.student_id)
                        .and_then(|s| s.photo.clone())
                };
                ViolationRow {
                    violation,
                    student_photo,
                }
            })
            .collect())
    }

    async fn list_unknown_faces(&self) -> StoreResult<Vec<UnknownFace>> {
        self.ensure_online()?;
        let mut faces = self.inner.read().await.unknown_faces.clone();
        faces.sort_by(|a, b| b.detection_time.cmp(&a.detection_time).then(b.id.cmp(&a.id)));
        Ok(faces)
    }

    async fn search_violations(
        &self,
        field: SearchField,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<Violation>> {
        self.ensure_online()?;
        let needle = query.to_lowercase();

        let mut hits: Vec<Violation> = self
            .inner
            .read()
            .await
            .violations
            .iter()
            .filter(|v| field.value_of(v).to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Self::newest_first(&mut hits);
        hits.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(hits)
    }

    async fn suggest(&self, field: SearchField, prefix: &str, limit: i64) -> StoreResult<Vec<String>> {
        self.ensure_online()?;
        let prefix = prefix.to_lowercase();

        let distinct: BTreeSet<String> = self
            .inner
            .read()
            .await
            .violations
            .iter()
            .map(|v| field.value_of(v))
            .filter(|value| value.to_lowercase().starts_with(&prefix))
            .map(str::to_string)
            .collect();

        Ok(distinct
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.ensure_online()
    }
}
