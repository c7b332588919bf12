//! Campus Guard: face-recognition violation gateway.
//!
//! The service itself lives in `face-gateway`; this package re-exports the
//! workspace crates and hosts the cross-crate integration tests.

pub use common;
pub use face_gateway;
pub use telemetry;
