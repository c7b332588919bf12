use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::violations::{
    NewStudent, NewUnknownFace, NewViolation, SearchField, Student, StudentRecord, UnknownFace,
    Violation, UNKNOWN_STUDENT_ID,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use super::{escape_like, GatewayStore, StoreError, StoreResult, ViolationRow};

const VIOLATION_COLUMNS: &str =
    "id, student_id, student_name, grade_level, section, violation_type, date, status, confidence";

#[derive(Debug, FromRow)]
struct StudentRow {
    id: i64,
    name: String,
    lrn: String,
    grade_level: String,
    section: String,
    photo: Option<Vec<u8>>,
}

impl From<StudentRow> for StudentRecord {
    fn from(row: StudentRow) -> Self {
        StudentRecord {
            student: Student {
                id: row.id,
                name: row.name,
                lrn: row.lrn,
                grade_level: row.grade_level,
                section: row.section,
            },
            photo: row.photo,
        }
    }
}

#[derive(Debug, FromRow)]
struct ViolationDbRow {
    id: i64,
    student_id: String,
    student_name: String,
    grade_level: Option<String>,
    section: Option<String>,
    violation_type: String,
    date: DateTime<Utc>,
    status: String,
    confidence: Option<f32>,
}

impl From<ViolationDbRow> for Violation {
    fn from(row: ViolationDbRow) -> Self {
        Violation {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            grade_level: row.grade_level,
            section: row.section,
            violation_type: row.violation_type,
            date: row.date,
            status: row.status,
            confidence: row.confidence,
        }
    }
}

#[derive(Debug, FromRow)]
struct ViolationPhotoRow {
    #[sqlx(flatten)]
    violation: ViolationDbRow,
    student_photo: Option<Vec<u8>>,
}

#[derive(Debug, FromRow)]
struct UnknownFaceRow {
    id: i64,
    image_path: String,
    detection_time: DateTime<Utc>,
    location: Option<String>,
    processed: bool,
    notes: Option<String>,
}

impl From<UnknownFaceRow> for UnknownFace {
    fn from(row: UnknownFaceRow) -> Self {
        UnknownFace {
            id: row.id,
            image_path: row.image_path,
            detection_time: row.detection_time,
            location: row.location,
            processed: row.processed,
            notes: row.notes,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self { pool })
    }

    fn record(operation: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        telemetry::metrics::STORE_OPERATIONS
            .with_label_values(&[operation, status])
            .inc();
    }

    fn observed<T>(operation: &str, result: Result<T, sqlx::Error>) -> StoreResult<T> {
        Self::record(operation, result.is_ok());
        result.map_err(StoreError::from)
    }
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn load_students(&self) -> StoreResult<Vec<StudentRecord>> {
        let rows = sqlx::query_as::<_, StudentRow>(
            "SELECT id, name, lrn, grade_level, section, photo FROM students ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await;

        Ok(Self::observed("load_students", rows)?
            .into_iter()
            .map(StudentRecord::from)
            .collect())
    }

    async fn insert_student(&self, student: &NewStudent) -> StoreResult<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO students (name, lrn, grade_level, section, photo)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&student.name)
        .bind(&student.lrn)
        .bind(&student.grade_level)
        .bind(&student.section)
        .bind(&student.photo)
        .fetch_one(&self.pool)
        .await;

        match Self::observed("insert_student", result) {
            Err(StoreError::Duplicate(_)) => Err(StoreError::Duplicate(format!(
                "Student with LRN {}",
                student.lrn
            ))),
            other => other,
        }
    }

    async fn insert_violation(&self, violation: &NewViolation) -> StoreResult<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO violations
                (student_id, student_name, grade_level, section, violation_type, date, status, confidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&violation.student_id)
        .bind(&violation.student_name)
        .bind(&violation.grade_level)
        .bind(&violation.section)
        .bind(&violation.violation_type)
        .bind(violation.date)
        .bind(&violation.status)
        .bind(violation.confidence)
        .fetch_one(&self.pool)
        .await;

        Self::observed("insert_violation", result)
    }

    async fn record_unknown_face(
        &self,
        face: &NewUnknownFace,
        violation: &NewViolation,
    ) -> StoreResult<(i64, i64)> {
        let result: Result<(i64, i64), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;

            let face_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO unknown_faces (image_path, detection_time, location)
                VALUES ($1, $2, $3)
                RETURNING id
                "#,
            )
            .bind(&face.image_path)
            .bind(face.detection_time)
            .bind(&face.location)
            .fetch_one(&mut *tx)
            .await?;

            let violation_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO violations
                    (student_id, student_name, grade_level, section, violation_type, date, status, confidence)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(&violation.student_id)
            .bind(&violation.student_name)
            .bind(&violation.grade_level)
            .bind(&violation.section)
            .bind(&violation.violation_type)
            .bind(violation.date)
            .bind(&violation.status)
            .bind(violation.confidence)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((face_id, violation_id))
        }
        .await;

        Self::observed("record_unknown_face", result)
    }

    async fn list_violations(&self) -> StoreResult<Vec<ViolationRow>> {
        let sql = r#"
            SELECT v.id, v.student_id, v.student_name, v.grade_level, v.section,
                v.violation_type, v.date, v.status, v.confidence,
                CASE WHEN v.student_id = $1 THEN NULL
                     ELSE (SELECT s.photo FROM students s WHERE s.lrn = v.student_id LIMIT 1)
                END AS student_photo
            FROM violations v
            ORDER BY v.date DESC, v.id DESC
            "#;

        let rows = sqlx::query_as::<_, ViolationPhotoRow>(sql)
            .bind(UNKNOWN_STUDENT_ID)
            .fetch_all(&self.pool)
            .await;

        Ok(Self::observed("list_violations", rows)?
            .into_iter()
            .map(|row| ViolationRow {
                violation: row.violation.into(),
                student_photo: row.student_photo,
            })
            .collect())
    }

    async fn list_unknown_faces(&self) -> StoreResult<Vec<UnknownFace>> {
        let rows = sqlx::query_as::<_, UnknownFaceRow>(
            r#"
            SELECT id, image_path, detection_time, location, processed, notes
            FROM unknown_faces
            ORDER BY detection_time DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        Ok(Self::observed("list_unknown_faces", rows)?
            .into_iter()
            .map(UnknownFace::from)
            .collect())
    }

    async fn search_violations(
        &self,
        field: SearchField,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<Violation>> {
        // column names come from SearchField, never from input
        let sql = format!(
            "SELECT {} FROM violations WHERE {} ILIKE $1 ORDER BY date DESC, id DESC LIMIT $2",
            VIOLATION_COLUMNS,
            field.column()
        );

        let rows = sqlx::query_as::<_, ViolationDbRow>(&sql)
            .bind(format!("%{}%", escape_like(query)))
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        Ok(Self::observed("search_violations", rows)?
            .into_iter()
            .map(Violation::from)
            .collect())
    }

    async fn suggest(&self, field: SearchField, prefix: &str, limit: i64) -> StoreResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {column} AS suggestion FROM violations WHERE {column} ILIKE $1 \
             ORDER BY suggestion ASC LIMIT $2",
            column = field.column()
        );

        let rows = sqlx::query_scalar::<_, String>(&sql)
            .bind(format!("{}%", escape_like(prefix)))
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        Self::observed("suggest", rows)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
