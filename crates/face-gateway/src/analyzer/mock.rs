//! Deterministic analyzer for tests and model-less dry runs.
//!
//! Every image with any lit pixel contains exactly one face spanning the whole
//! frame. Its embedding is the mean RGB colour, so two photos of the same
//! colour match perfectly and photos of orthogonal colours do not.
use super::{DetectedFace, FaceAnalyzer};
use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;

#[derive(Debug, Default, Clone)]
pub struct MockFaceAnalyzer;

impl MockFaceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn mean_rgb(image: &DynamicImage) -> [f32; 3] {
        let rgb = image.to_rgb8();
        let pixel_count = (rgb.width() as f64 * rgb.height() as f64).max(1.0);

        let mut sums = [0f64; 3];
        for pixel in rgb.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0.iter()) {
                *sum += *channel as f64;
            }
        }

        sums.map(|sum| (sum / pixel_count) as f32)
    }
}

#[async_trait]
impl FaceAnalyzer for MockFaceAnalyzer {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn analyze(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let embedding = Self::mean_rgb(image);
        if embedding.iter().all(|v| *v == 0.0) {
            return Ok(Vec::new());
        }

        Ok(vec![DetectedFace {
            bbox: [0.0, 0.0, image.width() as f32, image.height() as f32],
            score: 0.99,
            embedding: embedding.to_vec(),
        }])
    }
}
