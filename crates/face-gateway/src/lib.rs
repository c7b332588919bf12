pub mod analyzer;
pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod roster;
pub mod service;
pub mod state;
pub mod store;

pub use analyzer::{DetectedFace, FaceAnalyzer};
pub use config::GatewayConfig;
pub use error::ApiError;
pub use roster::KnownFaces;
pub use service::GatewayService;
pub use state::GatewayState;
