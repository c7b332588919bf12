//! Face analyzer backed by ONNX Runtime.
//!
//! Two models are chained:
//! 1. Detection: a YOLO-style face detector producing `[1, 5, N]` (cx, cy, w, h, score)
//! 2. Embedding: an ArcFace-style embedder producing `[1, D]`
use super::{DetectedFace, FaceAnalyzer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::recognition::{FaceBox, PixelRect};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxAnalyzerConfig {
    pub detection_model_path: String,
    pub embedding_model_path: String,

    /// Minimum detector score for a face (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    #[serde(default = "default_detection_input_size")]
    pub detection_input_size: u32,

    #[serde(default = "default_embedding_input_size")]
    pub embedding_input_size: u32,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    #[serde(default)]
    pub device_id: i32,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_confidence() -> f32 {
    0.5
}

fn default_iou_threshold() -> f32 {
    0.4
}

fn default_max_detections() -> usize {
    50
}

fn default_detection_input_size() -> u32 {
    640
}

fn default_embedding_input_size() -> u32 {
    112
}

fn default_execution_provider() -> String {
    "CPU".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl Default for OnnxAnalyzerConfig {
    fn default() -> Self {
        Self {
            detection_model_path: "models/face_detector.onnx".to_string(),
            embedding_model_path: "models/face_embedding.onnx".to_string(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            detection_input_size: default_detection_input_size(),
            embedding_input_size: default_embedding_input_size(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

pub struct OnnxFaceAnalyzer {
    config: OnnxAnalyzerConfig,
    detection_session: Arc<Mutex<Session>>,
    embedding_session: Arc<Mutex<Session>>,
    execution_provider: String,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails when either model file cannot be opened.
    pub fn load(config: OnnxAnalyzerConfig) -> Result<Self> {
        let (detection_session, provider) = create_session(&config, &config.detection_model_path)
            .with_context(|| format!("failed to load detection model {}", config.detection_model_path))?;
        let (embedding_session, embedding_provider) =
            create_session(&config, &config.embedding_model_path).with_context(|| {
                format!("failed to load embedding model {}", config.embedding_model_path)
            })?;

        tracing::info!(
            detection_model = %config.detection_model_path,
            embedding_model = %config.embedding_model_path,
            provider = %provider,
            embedding_provider = %embedding_provider,
            device_id = config.device_id,
            "face models loaded"
        );

        Ok(Self {
            config,
            detection_session: Arc::new(Mutex::new(detection_session)),
            embedding_session: Arc::new(Mutex::new(embedding_session)),
            execution_provider: provider,
        })
    }

    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }

    async fn detect(&self, img: &DynamicImage) -> Result<Vec<(FaceBox, f32)>> {
        let input_tensor = Value::from_array(detection_input(img, self.config.detection_input_size))?;

        let started = std::time::Instant::now();
        let mut session = self.detection_session.lock().await;
        let outputs = session.run(ort::inputs![input_tensor])?;
        self.observe("detection", started);

        let output_value = outputs
            .get("output0")
            .or_else(|| outputs.get("output"))
            .or_else(|| outputs.get("boxes"))
            .context("No detection output tensor found")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

        Ok(decode_detections(&output, img.width(), img.height(), &self.config))
    }

    async fn embed(&self, face_img: &DynamicImage) -> Result<Vec<f32>> {
        let input_tensor = Value::from_array(embedding_input(face_img, self.config.embedding_input_size))?;

        let started = std::time::Instant::now();
        let mut session = self.embedding_session.lock().await;
        let outputs = session.run(ort::inputs![input_tensor])?;
        self.observe("embedding", started);

        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("embedding"))
            .context("No embedding output tensor found")?;
        let (_, data) = output_value.try_extract_tensor::<f32>()?;

        Ok(l2_normalize(data.to_vec()))
    }

    fn observe(&self, stage: &str, started: std::time::Instant) {
        telemetry::metrics::INFERENCE_TIME
            .with_label_values(&[stage, &self.execution_provider])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn id(&self) -> &'static str {
        "onnx"
    }

    async fn analyze(&self, image: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let boxes = self.detect(image).await?;

        let mut faces = Vec::with_capacity(boxes.len());
        for (bbox, score) in boxes {
            let Some(rect) = PixelRect::clamp_face_box(&bbox, image.width(), image.height()) else {
                continue;
            };
            let crop = image.crop_imm(rect.x, rect.y, rect.width, rect.height);

            match self.embed(&crop).await {
                Ok(embedding) => faces.push(DetectedFace {
                    bbox,
                    score,
                    embedding,
                }),
                Err(e) => tracing::warn!(error = %e, "embedding extraction failed, dropping face"),
            }
        }

        Ok(faces)
    }
}

/// Resize to the detector input, NCHW, RGB scaled to `[0, 1]`
fn detection_input(img: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb_img = resized.to_rgb8();

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
    for (x, y, pixel) in rgb_img.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    input
}

/// Resize a face crop to the embedder input, NCHW, RGB scaled to `[-1, 1]`
fn embedding_input(img: &DynamicImage, size: u32) -> Array<f32, IxDyn> {
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb_img = resized.to_rgb8();

    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
    for (x, y, pixel) in rgb_img.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 127.5) - 1.0;
        }
    }
    input
}

/// Turn raw `[1, 5, N]` detector output into scored boxes in image pixels
fn decode_detections(
    output: &Array<f32, IxDyn>,
    original_width: u32,
    original_height: u32,
    config: &OnnxAnalyzerConfig,
) -> Vec<(FaceBox, f32)> {
    if output.ndim() != 3 || output.shape()[1] < 5 {
        tracing::warn!(shape = ?output.shape(), "unexpected detector output shape");
        return Vec::new();
    }

    let scale_x = original_width as f32 / config.detection_input_size as f32;
    let scale_y = original_height as f32 / config.detection_input_size as f32;
    let max_x = original_width as f32;
    let max_y = original_height as f32;

    let mut boxes = Vec::new();
    for i in 0..output.shape()[2] {
        let score = output[[0, 4, i]];
        if score < config.confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        let bbox = [
            ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
        ];
        boxes.push((bbox, score));
    }

    let mut kept = nms(boxes, config.iou_threshold);
    kept.truncate(config.max_detections);
    kept
}

/// Greedy non-maximum suppression; output is sorted by descending score
fn nms(mut boxes: Vec<(FaceBox, f32)>, iou_threshold: f32) -> Vec<(FaceBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(FaceBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(&kept.0, &candidate.0) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

fn l2_normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in &mut embedding {
            *val /= norm;
        }
    }
    embedding
}

/// Create ONNX session with execution provider fallback (TensorRT -> CUDA -> CPU)
fn create_session(config: &OnnxAnalyzerConfig, model_path: &str) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            let result = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(config.intra_threads)?
                .with_inter_threads(config.inter_threads)?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])?
                .commit_from_file(model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!(model = %model_path, error = %e, "TensorRT unavailable, trying CUDA");
                    try_cuda(config, model_path)
                }
            }
        }
        "CUDA" => try_cuda(config, model_path),
        _ => try_cpu(config, model_path),
    }
}

fn try_cuda(config: &OnnxAnalyzerConfig, model_path: &str) -> Result<(Session, String)> {
    let result = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.intra_threads)?
        .with_inter_threads(config.inter_threads)?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?
        .commit_from_file(model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!(model = %model_path, error = %e, "CUDA unavailable, using CPU");
            try_cpu(config, model_path)
        }
    }
}

fn try_cpu(config: &OnnxAnalyzerConfig, model_path: &str) -> Result<(Session, String)> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.intra_threads)?
        .with_inter_threads(config.inter_threads)?
        .commit_from_file(model_path)
        .context("Failed to load model from file")?;
    Ok((session, "CPU".to_string()))
}
