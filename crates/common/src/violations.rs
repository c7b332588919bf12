//! Violation, unknown-face and student records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `student_id` stored on violations raised against unidentified people
pub const UNKNOWN_STUDENT_ID: &str = "UNKNOWN";

/// `student_name` stored on violations raised against unidentified people
pub const UNKNOWN_STUDENT_NAME: &str = "Unknown Person";

pub const DEFAULT_STATUS: &str = "Pending";
pub const DEFAULT_UNKNOWN_VIOLATION_TYPE: &str = "Unknown Person Detected";
pub const DEFAULT_LOCATION: &str = "Camera Scan Point";

/// Value of `reported_by` on search results; guard attribution is not tracked
pub const DEFAULT_REPORTER: &str = "System";

/// Upper bound on rows returned by a violation search
pub const SEARCH_RESULT_LIMIT: i64 = 50;

/// Upper bound on suggestions returned for a search prefix
pub const SUGGESTION_LIMIT: i64 = 10;

/// Queries shorter than this produce no suggestions
pub const MIN_SUGGESTION_QUERY_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: i64,
    pub student_id: String,
    pub student_name: String,
    pub grade_level: Option<String>,
    pub section: Option<String>,
    pub violation_type: String,
    pub date: DateTime<Utc>,
    pub status: String,
    pub confidence: Option<f32>,
}

impl Violation {
    pub fn is_unknown(&self) -> bool {
        self.student_id == UNKNOWN_STUDENT_ID
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewViolation {
    pub student_id: String,
    pub student_name: String,
    pub grade_level: Option<String>,
    pub section: Option<String>,
    pub violation_type: String,
    pub date: DateTime<Utc>,
    pub status: String,
    pub confidence: Option<f32>,
}

impl NewViolation {
    /// Violation row raised alongside an archived unknown face
    pub fn unknown_person(violation_type: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            student_id: UNKNOWN_STUDENT_ID.to_string(),
            student_name: UNKNOWN_STUDENT_NAME.to_string(),
            grade_level: None,
            section: None,
            violation_type: violation_type.into(),
            date,
            status: DEFAULT_STATUS.to_string(),
            confidence: None,
        }
    }

    pub fn into_violation(self, id: i64) -> Violation {
        Violation {
            id,
            student_id: self.student_id,
            student_name: self.student_name,
            grade_level: self.grade_level,
            section: self.section,
            violation_type: self.violation_type,
            date: self.date,
            status: self.status,
            confidence: self.confidence,
        }
    }
}

/// Violation joined with the offender's roster photo (base64), if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationWithPhoto {
    #[serde(flatten)]
    pub violation: Violation,
    pub student_photo: Option<String>,
}

/// Violation as returned by the search endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSearchHit {
    #[serde(flatten)]
    pub violation: Violation,
    pub date_formatted: String,
    pub reported_by: String,
}

impl From<Violation> for ViolationSearchHit {
    fn from(violation: Violation) -> Self {
        Self {
            date_formatted: format_report_date(&violation.date),
            reported_by: DEFAULT_REPORTER.to_string(),
            violation,
        }
    }
}

/// Format a timestamp the way the reports screen shows it, e.g. `Mar 04, 2025 09:15 AM`
pub fn format_report_date(date: &DateTime<Utc>) -> String {
    date.format("%b %d, %Y %I:%M %p").to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownFace {
    pub id: i64,
    pub image_path: String,
    pub detection_time: DateTime<Utc>,
    pub location: Option<String>,
    pub processed: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUnknownFace {
    pub image_path: String,
    pub detection_time: DateTime<Utc>,
    pub location: Option<String>,
}

/// Student row without the photo blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub lrn: String,
    pub grade_level: String,
    pub section: String,
}

/// Student row together with the raw enrolment photo
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student: Student,
    pub photo: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub name: String,
    pub lrn: String,
    pub grade_level: String,
    pub section: String,
    pub photo: Vec<u8>,
}

/// Column a violation search runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchField {
    #[default]
    StudentName,
    ViolationType,
}

impl SearchField {
    /// Anything other than `student_name` searches by violation type.
    pub fn from_type(search_type: Option<&str>) -> Self {
        match search_type {
            None | Some("student_name") => Self::StudentName,
            Some(_) => Self::ViolationType,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::StudentName => "student_name",
            Self::ViolationType => "violation_type",
        }
    }

    pub fn value_of<'a>(&self, violation: &'a Violation) -> &'a str {
        match self {
            Self::StudentName => &violation.student_name,
            Self::ViolationType => &violation.violation_type,
        }
    }
}

impl std::fmt::Display for SearchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// Body of `POST /search_violation` and `POST /get_search_suggestions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,

    #[serde(rename = "type", default)]
    pub search_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitViolationResponse {
    pub success: bool,
    pub message: String,
    pub violation_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownViolationResponse {
    pub success: bool,
    pub message: String,
    pub unknown_face_id: i64,
    pub violation_id: i64,
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationListResponse {
    pub success: bool,
    pub violations: Vec<ViolationWithPhoto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownFaceListResponse {
    pub success: bool,
    pub unknown_faces: Vec<UnknownFace>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub violations: Vec<ViolationSearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub success: bool,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStudentResponse {
    pub success: bool,
    pub message: String,
    pub student_id: i64,

    /// Whether a face was found in the photo and added to the live roster
    pub enrolled: bool,
}
