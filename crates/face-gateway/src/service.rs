use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use common::recognition::{
    FaceBox, KnownFacesResponse, PixelRect, Recognition, RecognizeResponse, RosterReloadResponse,
};
use common::validation::{
    optional_field, safe_unix_timestamp, sniff_image_kind, trimmed_required, validate_length, validate_lrn,
    MAX_GRADE_LENGTH, MAX_LOCATION_LENGTH, MAX_NAME_LENGTH, MAX_QUERY_LENGTH, MAX_SECTION_LENGTH,
    MAX_STATUS_LENGTH, MAX_VIOLATION_TYPE_LENGTH,
};
use common::violations::{
    NewStudent, NewUnknownFace, NewViolation, RegisterStudentResponse, SearchField, SearchRequest,
    SearchResponse, Student, StudentRecord, SubmitViolationResponse, SuggestionResponse,
    UnknownFaceListResponse, UnknownViolationResponse, ViolationListResponse, ViolationSearchHit,
    ViolationWithPhoto, DEFAULT_LOCATION, DEFAULT_STATUS, DEFAULT_UNKNOWN_VIOLATION_TYPE,
    MIN_SUGGESTION_QUERY_LEN, SEARCH_RESULT_LIMIT, SUGGESTION_LIMIT,
};
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::Mutex;

use crate::analyzer::FaceAnalyzer;
use crate::archive::UnknownFaceArchive;
use crate::config::GatewayConfig;
use crate::error::ApiError;
use crate::heuristics;
use crate::roster::{enroll_record, KnownFace, KnownFaces};
use crate::store::GatewayStore;

/// Multipart upload for `POST /submit_unknown_violation`
#[derive(Debug, Default)]
pub struct UnknownFaceReport {
    pub image: Option<Vec<u8>>,
    pub violation_type: Option<String>,
    pub location: Option<String>,
}

/// Multipart upload for `POST /register_face`
#[derive(Debug, Default)]
pub struct StudentRegistration {
    pub image: Option<Vec<u8>>,
    pub name: Option<String>,
    pub lrn: Option<String>,
    pub grade_level: Option<String>,
    pub section: Option<String>,
}

/// Read a JSON member as text; clients send LRNs both as strings and numbers
fn json_text(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn invalid(err: anyhow::Error) -> ApiError {
    ApiError::bad_request(err.to_string())
}

/// Build the violation row described by a `POST /submit_violation` body
pub fn parse_violation_submission(body: &Value) -> Result<NewViolation, ApiError> {
    if !body.is_object() {
        return Err(ApiError::bad_request("Invalid request format"));
    }

    let required = |key: &str| {
        trimmed_required(json_text(body, key).as_deref())
            .ok_or_else(|| ApiError::bad_request(format!("Missing field: {}", key)))
    };

    let student_id = required("student_id")?;
    let student_name = required("student_name")?;
    let violation_type = required("violation_type")?;

    validate_lrn(&student_id).map_err(invalid)?;
    validate_length(&student_name, MAX_NAME_LENGTH, "student_name").map_err(invalid)?;
    validate_length(&violation_type, MAX_VIOLATION_TYPE_LENGTH, "violation_type").map_err(invalid)?;

    let grade_level =
        optional_field(json_text(body, "grade_level").as_deref(), MAX_GRADE_LENGTH, "grade_level")
            .map_err(invalid)?;
    let section = optional_field(json_text(body, "section").as_deref(), MAX_SECTION_LENGTH, "section")
        .map_err(invalid)?;
    let status = optional_field(json_text(body, "status").as_deref(), MAX_STATUS_LENGTH, "status")
        .map_err(invalid)?
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());

    let confidence = match body.get("confidence") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_f64()
                .filter(|c| c.is_finite())
                .map(|c| c as f32)
                .ok_or_else(|| ApiError::bad_request("confidence must be a number"))?,
        ),
    };

    Ok(NewViolation {
        student_id,
        student_name,
        grade_level,
        section,
        violation_type,
        date: Utc::now(),
        status,
        confidence,
    })
}

/// Crop a detected face out of the frame; empty when the box misses the image
fn face_region(frame: &RgbImage, bbox: &FaceBox) -> RgbImage {
    match PixelRect::clamp_face_box(bbox, frame.width(), frame.height()) {
        Some(rect) => image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image(),
        None => RgbImage::new(0, 0),
    }
}

pub struct GatewayService {
    analyzer: Arc<dyn FaceAnalyzer>,
    roster: KnownFaces,
    store: Arc<dyn GatewayStore>,
    archive: UnknownFaceArchive,
    config: GatewayConfig,

    /// Serialises roster reloads with registration's insert-and-enrol step
    roster_writes: Mutex<()>,
}

impl GatewayService {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        roster: KnownFaces,
        store: Arc<dyn GatewayStore>,
        archive: UnknownFaceArchive,
        config: GatewayConfig,
    ) -> Self {
        Self {
            analyzer,
            roster,
            store,
            archive,
            config,
            roster_writes: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn roster(&self) -> &KnownFaces {
        &self.roster
    }

    pub fn analyzer(&self) -> &dyn FaceAnalyzer {
        self.analyzer.as_ref()
    }

    pub fn store(&self) -> &dyn GatewayStore {
        self.store.as_ref()
    }

    pub fn archive(&self) -> &UnknownFaceArchive {
        &self.archive
    }

    // ===== Recognition =====

    pub async fn recognize(&self, image_bytes: &[u8]) -> Result<RecognizeResponse, ApiError> {
        if image_bytes.is_empty() {
            metrics::RECOGNITION_REQUESTS.with_label_values(&["rejected"]).inc();
            return Err(ApiError::bad_request("No image file provided"));
        }

        let image = match image::load_from_memory(image_bytes) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(error = %e, bytes = image_bytes.len(), "undecodable upload");
                metrics::RECOGNITION_REQUESTS.with_label_values(&["rejected"]).inc();
                return Err(ApiError::bad_request("Invalid image"));
            }
        };

        let timer = metrics::RECOGNITION_LATENCY.start_timer();
        let result = self.recognize_image(&image).await;
        timer.observe_duration();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ApiError::NotFound(_)) => "no_faces",
            Err(_) => "error",
        };
        metrics::RECOGNITION_REQUESTS.with_label_values(&[outcome]).inc();

        result
    }

    async fn recognize_image(&self, image: &DynamicImage) -> Result<RecognizeResponse, ApiError> {
        let faces = self
            .analyzer
            .analyze(image)
            .await
            .with_context(|| format!("{} analyzer failed", self.analyzer.id()))?;

        if faces.is_empty() {
            return Err(ApiError::not_found("No faces detected"));
        }
        metrics::FACES_DETECTED.inc_by(faces.len() as u64);

        let frame = image.to_rgb8();
        let threshold = self.config.match_threshold_percent;

        let mut recognitions = Vec::with_capacity(faces.len());
        for face in &faces {
            let region = face_region(&frame, &face.bbox);
            let labels = heuristics::assess(&region, &self.config.heuristics);

            let recognition = match self.roster.best_match(&face.embedding, threshold).await {
                Some(found) => {
                    metrics::FACE_MATCHES.with_label_values(&["known"]).inc();
                    Recognition {
                        name: found.face.name,
                        grade: found.face.grade,
                        lrn: found.face.lrn,
                        section: found.face.section,
                        confidence: found.confidence,
                        bbox: face.bbox,
                        violations_detected: labels,
                    }
                }
                None => {
                    metrics::FACE_MATCHES.with_label_values(&["unknown"]).inc();
                    Recognition::unknown(face.bbox, labels)
                }
            };
            recognitions.push(recognition);
        }

        tracing::info!(
            faces = faces.len(),
            known = recognitions.iter().filter(|r| !r.is_unknown()).count(),
            "recognition complete"
        );

        Ok(RecognizeResponse {
            success: true,
            faces_detected: faces.len(),
            recognitions,
        })
    }

    // ===== Violations =====

    pub async fn submit_violation(&self, body: &Value) -> Result<SubmitViolationResponse, ApiError> {
        let violation = parse_violation_submission(body)?;
        let violation_id = self.store.insert_violation(&violation).await?;

        metrics::VIOLATIONS_RECORDED.with_label_values(&["student"]).inc();
        tracing::info!(
            violation_id,
            student_id = %violation.student_id,
            violation_type = %violation.violation_type,
            "violation recorded"
        );

        Ok(SubmitViolationResponse {
            success: true,
            message: "Violation recorded".to_string(),
            violation_id,
        })
    }

    pub async fn submit_unknown_violation(
        &self,
        report: UnknownFaceReport,
    ) -> Result<UnknownViolationResponse, ApiError> {
        let image = report
            .image
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| ApiError::bad_request("No image file provided"))?;

        let violation_type = optional_field(
            report.violation_type.as_deref(),
            MAX_VIOLATION_TYPE_LENGTH,
            "violation_type",
        )
        .map_err(invalid)?
        .unwrap_or_else(|| DEFAULT_UNKNOWN_VIOLATION_TYPE.to_string());
        let location = optional_field(report.location.as_deref(), MAX_LOCATION_LENGTH, "location")
            .map_err(invalid)?
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());

        let now = Utc::now();
        let path = self.archive.store(&image, now).await?;
        let image_path = UnknownFaceArchive::public_path(&path);

        let face = NewUnknownFace {
            image_path: image_path.clone(),
            detection_time: now,
            location: Some(location),
        };
        let violation = NewViolation::unknown_person(violation_type, now);

        let (unknown_face_id, violation_id) = match self.store.record_unknown_face(&face, &violation).await {
            Ok(ids) => ids,
            Err(e) => {
                self.archive.discard(&path).await;
                return Err(e.into());
            }
        };

        metrics::VIOLATIONS_RECORDED.with_label_values(&["unknown"]).inc();
        tracing::info!(unknown_face_id, violation_id, path = %image_path, "unknown face reported");

        Ok(UnknownViolationResponse {
            success: true,
            message: "Unknown face reported".to_string(),
            unknown_face_id,
            violation_id,
            image_path,
        })
    }

    pub async fn list_violations(&self) -> Result<ViolationListResponse, ApiError> {
        let rows = self.store.list_violations().await?;

        let violations = rows
            .into_iter()
            .map(|row| ViolationWithPhoto {
                student_photo: row.student_photo.as_deref().map(|photo| BASE64.encode(photo)),
                violation: row.violation,
            })
            .collect();

        Ok(ViolationListResponse {
            success: true,
            violations,
        })
    }

    pub async fn list_unknown_faces(&self) -> Result<UnknownFaceListResponse, ApiError> {
        Ok(UnknownFaceListResponse {
            success: true,
            unknown_faces: self.store.list_unknown_faces().await?,
        })
    }

    // ===== Search =====

    pub async fn search_violations(&self, request: &SearchRequest) -> Result<SearchResponse, ApiError> {
        let query = request.query.as_deref().unwrap_or_default();
        if query.is_empty() {
            return Err(ApiError::bad_request("Search query is required"));
        }
        validate_length(query, MAX_QUERY_LENGTH, "query").map_err(invalid)?;

        let field = SearchField::from_type(request.search_type.as_deref());
        let violations = self
            .store
            .search_violations(field, query, SEARCH_RESULT_LIMIT)
            .await?
            .into_iter()
            .map(ViolationSearchHit::from)
            .collect();

        Ok(SearchResponse {
            success: true,
            violations,
        })
    }

    pub async fn search_suggestions(&self, request: &SearchRequest) -> Result<SuggestionResponse, ApiError> {
        let query = request.query.as_deref().unwrap_or_default();
        if query.chars().count() < MIN_SUGGESTION_QUERY_LEN {
            return Ok(SuggestionResponse {
                success: true,
                suggestions: Vec::new(),
            });
        }
        validate_length(query, MAX_QUERY_LENGTH, "query").map_err(invalid)?;

        let field = SearchField::from_type(request.search_type.as_deref());
        let suggestions = self.store.suggest(field, query, SUGGESTION_LIMIT).await?;

        Ok(SuggestionResponse {
            success: true,
            suggestions,
        })
    }

    // ===== Students and roster =====

    pub async fn register_student(
        &self,
        registration: StudentRegistration,
    ) -> Result<RegisterStudentResponse, ApiError> {
        let photo = registration
            .image
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| ApiError::bad_request("No image file uploaded"))?;

        if photo.len() > self.config.max_register_image_bytes {
            return Err(ApiError::payload_too_large("Image too large. Max 5MB allowed"));
        }
        if !sniff_image_kind(&photo).is_some_and(|kind| kind.is_enrollable()) {
            return Err(ApiError::bad_request("Invalid file type. Only JPG/PNG allowed"));
        }

        let fields = (
            trimmed_required(registration.name.as_deref()),
            trimmed_required(registration.lrn.as_deref()),
            trimmed_required(registration.grade_level.as_deref()),
            trimmed_required(registration.section.as_deref()),
        );
        let (Some(name), Some(lrn), Some(grade_level), Some(section)) = fields else {
            return Err(ApiError::bad_request("All fields are required"));
        };

        validate_length(&name, MAX_NAME_LENGTH, "name").map_err(invalid)?;
        validate_lrn(&lrn).map_err(invalid)?;
        validate_length(&grade_level, MAX_GRADE_LENGTH, "Grade_level").map_err(invalid)?;
        validate_length(&section, MAX_SECTION_LENGTH, "section").map_err(invalid)?;

        let student = NewStudent {
            name,
            lrn,
            grade_level,
            section,
            photo,
        };
        let _roster_writes = self.roster_writes.lock().await;
        let student_id = self.store.insert_student(&student).await?;

        let record = StudentRecord {
            student: Student {
                id: student_id,
                name: student.name,
                lrn: student.lrn,
                grade_level: student.grade_level,
                section: student.section,
            },
            photo: Some(student.photo),
        };

        let enrolled = match enroll_record(&record, self.analyzer.as_ref()).await {
            Some(face) => {
                self.roster.enroll(face).await;
                true
            }
            None => false,
        };

        tracing::info!(student_id, lrn = %record.student.lrn, enrolled, "student registered");

        Ok(RegisterStudentResponse {
            success: true,
            message: "Student registered successfully!".to_string(),
            student_id,
            enrolled,
        })
    }

    /// Rebuild the roster from the store
    pub async fn reload_roster(&self) -> Result<RosterReloadResponse, ApiError> {
        let _roster_writes = self.roster_writes.lock().await;
        let faces: Vec<KnownFace> = KnownFaces::build(self.store.as_ref(), self.analyzer.as_ref())
            .await
            .context("failed to load known faces")?;
        let known_faces = self.roster.replace_all(faces).await;

        Ok(RosterReloadResponse {
            success: true,
            message: "Known faces reloaded".to_string(),
            known_faces,
            reloaded_at: safe_unix_timestamp(),
        })
    }

    pub async fn list_roster(&self) -> KnownFacesResponse {
        let known_faces = self.roster.summaries().await;
        KnownFacesResponse {
            success: true,
            count: known_faces.len(),
            known_faces,
        }
    }
}
