//! Seam between the gateway and the external face model.
//!
//! Detection, alignment and embedding are the model's job; the gateway only
//! consumes boxes and embedding vectors through [`FaceAnalyzer`].

pub mod mock;
pub mod onnx;

use anyhow::Result;
use async_trait::async_trait;
use common::recognition::FaceBox;
use image::DynamicImage;

/// A face found by the analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    /// `[x1, y1, x2, y2]` in pixels of the analysed image
    pub bbox: FaceBox,

    /// Detector confidence in `[0, 1]`
    pub score: f32,

    pub embedding: Vec<f32>,
}

/// Face detection + embedding capability.
///
/// Implementations return faces ordered by descending detector score, so the
/// first face is the most confident one.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Short identifier used in logs and metrics
    fn id(&self) -> &'static str;

    async fn analyze(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
