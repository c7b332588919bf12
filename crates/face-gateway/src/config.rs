use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::analyzer::onnx::OnnxAnalyzerConfig;
use crate::heuristics::HeuristicConfig;

/// Which face analyzer backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerKind {
    /// ONNX detector + embedder through onnxruntime
    Onnx,
    /// Deterministic colour-based analyzer, for dry runs without model files
    Mock,
}

impl std::str::FromStr for AnalyzerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "mock" => Ok(Self::Mock),
            other => Err(anyhow!("unknown FACE_ANALYZER '{}', expected onnx or mock", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,

    /// PostgreSQL URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    /// Where reported unknown faces are written
    pub unknown_faces_dir: PathBuf,

    /// Minimum similarity percentage (exclusive) for a roster match
    pub match_threshold_percent: f32,

    /// Upper bound for enrolment photos
    pub max_register_image_bytes: usize,

    /// Request body limit for every route
    pub max_upload_bytes: usize,

    pub analyzer: AnalyzerKind,
    pub onnx: OnnxAnalyzerConfig,
    pub heuristics: HeuristicConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database_url: None,
            db_max_connections: 10,
            unknown_faces_dir: PathBuf::from("unknown_faces"),
            match_threshold_percent: 60.0,
            max_register_image_bytes: 5_000_000,
            max_upload_bytes: 16 * 1024 * 1024,
            analyzer: AnalyzerKind::Onnx,
            onnx: OnnxAnalyzerConfig::default(),
            heuristics: HeuristicConfig::default(),
        }
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(None),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = env::var("FACE_GATEWAY_ADDR")
            .unwrap_or_else(|_| defaults.bind_addr.to_string())
            .parse()
            .context("invalid FACE_GATEWAY_ADDR")?;

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let match_threshold_percent =
            parse_env::<f32>("MATCH_THRESHOLD_PERCENT")?.unwrap_or(defaults.match_threshold_percent);
        if !(0.0..=100.0).contains(&match_threshold_percent) {
            return Err(anyhow!(
                "MATCH_THRESHOLD_PERCENT must be between 0 and 100, got {}",
                match_threshold_percent
            ));
        }

        let mut onnx = defaults.onnx.clone();
        if let Ok(path) = env::var("FACE_DETECTION_MODEL") {
            onnx.detection_model_path = path;
        }
        if let Ok(path) = env::var("FACE_EMBEDDING_MODEL") {
            onnx.embedding_model_path = path;
        }
        if let Ok(provider) = env::var("FACE_RECOGNITION_EXECUTION_PROVIDER") {
            onnx.execution_provider = provider;
        }
        if let Some(device_id) = parse_env::<i32>("FACE_RECOGNITION_DEVICE_ID")? {
            onnx.device_id = device_id;
        }

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
            unknown_faces_dir: env::var("UNKNOWN_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.unknown_faces_dir),
            match_threshold_percent,
            max_register_image_bytes: parse_env("MAX_REGISTER_IMAGE_BYTES")?
                .unwrap_or(defaults.max_register_image_bytes),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes),
            analyzer: parse_env("FACE_ANALYZER")?.unwrap_or(defaults.analyzer),
            onnx,
            heuristics: defaults.heuristics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.match_threshold_percent, 60.0);
        assert_eq!(config.max_register_image_bytes, 5_000_000);
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.unknown_faces_dir, PathBuf::from("unknown_faces"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_analyzer_kind_from_str() {
        assert_eq!("onnx".parse::<AnalyzerKind>().ok(), Some(AnalyzerKind::Onnx));
        assert_eq!("MOCK".parse::<AnalyzerKind>().ok(), Some(AnalyzerKind::Mock));
        assert!("dlib".parse::<AnalyzerKind>().is_err());
    }
}
