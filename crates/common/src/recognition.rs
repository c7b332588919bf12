//! Recognition contracts shared by the gateway and its clients.
//!
//! A recognition pass yields one [`Recognition`] per detected face, in the
//! order the detector reported them.

use serde::{Deserialize, Serialize};

/// Display name used for faces that match nobody on the roster
pub const UNKNOWN_NAME: &str = "Unknown";

/// Heuristic label: dominant uniform colour missing from the face region
pub const UNIFORM_VIOLATION: &str = "Uniform Violation";

/// Heuristic label: several small earring-like contours in the face region
pub const EARRINGS_VIOLATION: &str = "Wearing Earrings";

/// Label attached to every face that matches nobody on the roster
pub const UNKNOWN_PERSON_VIOLATION: &str = "No ID/Unknown Person";

/// Face bounding box as `[x1, y1, x2, y2]` in source image pixels
pub type FaceBox = [f32; 4];

/// Pixel rectangle inside an image, safe to crop with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Clamp a floating point box to an image of the given size.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clamp_face_box(bbox: &FaceBox, image_width: u32, image_height: u32) -> Option<Self> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as u32).min(max)
            }
        };

        let x1 = clamp(bbox[0], image_width);
        let y1 = clamp(bbox[1], image_height);
        let x2 = clamp(bbox[2], image_width);
        let y2 = clamp(bbox[3], image_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }
}

/// Result for a single detected face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub name: String,
    pub grade: String,
    pub lrn: String,
    pub section: String,

    /// Similarity percentage in `[0, 100]`, `0` for unknown faces
    pub confidence: f32,

    pub bbox: FaceBox,

    #[serde(default)]
    pub violations_detected: Vec<String>,
}

impl Recognition {
    /// Build the entry for a face that matched nobody.
    ///
    /// The unknown-person label is appended after any heuristic labels.
    pub fn unknown(bbox: FaceBox, mut violations_detected: Vec<String>) -> Self {
        violations_detected.push(UNKNOWN_PERSON_VIOLATION.to_string());
        Self {
            name: UNKNOWN_NAME.to_string(),
            grade: String::new(),
            lrn: String::new(),
            section: String::new(),
            confidence: 0.0,
            bbox,
            violations_detected,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.lrn.is_empty() && self.name == UNKNOWN_NAME
    }
}

/// Response body of `POST /recognize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeResponse {
    pub success: bool,
    pub faces_detected: usize,
    pub recognitions: Vec<Recognition>,
}

/// Roster entry as exposed to operators (no embedding)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFaceSummary {
    pub name: String,
    pub lrn: String,
    pub grade: String,
    pub section: String,
    pub embedding_dim: usize,
}

/// Response body of `GET /known_faces`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFacesResponse {
    pub success: bool,
    pub count: usize,
    pub known_faces: Vec<KnownFaceSummary>,
}

/// Response body of `POST /known_faces/reload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterReloadResponse {
    pub success: bool,
    pub message: String,
    pub known_faces: usize,

    /// Unix seconds at which the new roster took effect
    pub reloaded_at: u64,
}
