//! In-memory roster of known faces and the similarity scan over it.

use anyhow::Result;
use common::recognition::KnownFaceSummary;
use common::violations::{Student, StudentRecord};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::analyzer::FaceAnalyzer;
use crate::store::GatewayStore;

/// A student whose enrolment photo produced an embedding
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub name: String,
    pub lrn: String,
    pub grade: String,
    pub section: String,
    pub embedding: Vec<f32>,
}

impl KnownFace {
    pub fn from_student(student: &Student, embedding: Vec<f32>) -> Self {
        Self {
            name: student.name.clone(),
            lrn: student.lrn.clone(),
            grade: student.grade_level.clone(),
            section: student.section.clone(),
            embedding,
        }
    }

    pub fn summary(&self) -> KnownFaceSummary {
        KnownFaceSummary {
            name: self.name.clone(),
            lrn: self.lrn.clone(),
            grade: self.grade.clone(),
            section: self.section.clone(),
            embedding_dim: self.embedding.len(),
        }
    }
}

/// Best roster match for a query embedding
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub face: KnownFace,

    /// Similarity percentage in `[0, 100]`
    pub confidence: f32,
}

/// Cosine similarity in `[-1, 1]`.
///
/// `None` when the vectors differ in length, are empty, or either has zero
/// norm; such pairs never match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denom = norm_a * norm_b;
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }

    Some((dot / denom).clamp(-1.0, 1.0))
}

/// Map cosine similarity from `[-1, 1]` onto a `[0, 100]` percentage
pub fn similarity_percent(similarity: f32) -> f32 {
    (similarity + 1.0) / 2.0 * 100.0
}

/// Shared, reloadable list of known faces
#[derive(Clone, Default)]
pub struct KnownFaces {
    faces: Arc<RwLock<Vec<KnownFace>>>,
}

impl KnownFaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_faces(faces: Vec<KnownFace>) -> Self {
        telemetry::metrics::KNOWN_FACES.set(faces.len() as i64);
        Self {
            faces: Arc::new(RwLock::new(faces)),
        }
    }

    /// Build embeddings for every student that has a usable photo.
    ///
    /// Students without a photo, with an undecodable photo, or whose photo
    /// shows no face are skipped; the roster uses the most confident face.
    pub async fn build(store: &dyn GatewayStore, analyzer: &dyn FaceAnalyzer) -> Result<Vec<KnownFace>> {
        let records = store.load_students().await?;
        let total = records.len();

        let mut faces = Vec::with_capacity(total);
        for record in records {
            if let Some(face) = enroll_record(&record, analyzer).await {
                faces.push(face);
            }
        }

        tracing::info!(students = total, known_faces = faces.len(), "known faces loaded");
        Ok(faces)
    }

    /// Replace the roster wholesale, returning the new size
    pub async fn replace_all(&self, faces: Vec<KnownFace>) -> usize {
        let mut guard = self.faces.write().await;
        *guard = faces;
        telemetry::metrics::KNOWN_FACES.set(guard.len() as i64);
        guard.len()
    }

    /// Add or replace (by LRN) a single identity
    pub async fn enroll(&self, face: KnownFace) {
        let mut guard = self.faces.write().await;
        match guard.iter_mut().find(|known| known.lrn == face.lrn) {
            Some(existing) => *existing = face,
            None => guard.push(face),
        }
        telemetry::metrics::KNOWN_FACES.set(guard.len() as i64);
    }

    pub async fn len(&self) -> usize {
        self.faces.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.faces.read().await.is_empty()
    }

    pub async fn summaries(&self) -> Vec<KnownFaceSummary> {
        self.faces.read().await.iter().map(KnownFace::summary).collect()
    }

    /// Linear scan for the most similar known face.
    ///
    /// A candidate must beat both the running best and `threshold_percent`
    /// strictly, so ties keep the earlier roster entry.
    pub async fn best_match(&self, embedding: &[f32], threshold_percent: f32) -> Option<FaceMatch> {
        let faces = self.faces.read().await;
        best_match_in(&faces, embedding, threshold_percent)
    }
}

pub fn best_match_in(faces: &[KnownFace], embedding: &[f32], threshold_percent: f32) -> Option<FaceMatch> {
    let mut best: Option<(&KnownFace, f32)> = None;
    let mut highest = 0.0f32;

    for known in faces {
        let Some(similarity) = cosine_similarity(embedding, &known.embedding) else {
            continue;
        };
        let percent = similarity_percent(similarity);

        if percent > highest && percent > threshold_percent {
            highest = percent;
            best = Some((known, percent));
        }
    }

    best.map(|(face, confidence)| FaceMatch {
        face: face.clone(),
        confidence,
    })
}

/// Compute the roster entry for one student row, logging why it was skipped
pub async fn enroll_record(record: &StudentRecord, analyzer: &dyn FaceAnalyzer) -> Option<KnownFace> {
    let student = &record.student;

    let photo = match record.photo.as_deref() {
        Some(photo) if !photo.is_empty() => photo,
        _ => {
            telemetry::metrics::ROSTER_SKIPPED.with_label_values(&["no_photo"]).inc();
            return None;
        }
    };

    let image = match image::load_from_memory(photo) {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(lrn = %student.lrn, error = %e, "skipping undecodable student photo");
            telemetry::metrics::ROSTER_SKIPPED.with_label_values(&["undecodable"]).inc();
            return None;
        }
    };

    let faces = match analyzer.analyze(&image).await {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(lrn = %student.lrn, error = %e, "face analysis failed for student photo");
            telemetry::metrics::ROSTER_SKIPPED.with_label_values(&["analysis_failed"]).inc();
            return None;
        }
    };

    match faces.into_iter().next() {
        Some(face) => Some(KnownFace::from_student(student, face.embedding)),
        None => {
            tracing::debug!(lrn = %student.lrn, "no face found in student photo");
            telemetry::metrics::ROSTER_SKIPPED.with_label_values(&["no_face"]).inc();
            None
        }
    }
}
