//! Input validation for uploaded forms and images
//!
//! Limits mirror the column widths of the gateway schema so that oversized
//! input is rejected before it reaches the database.

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for person names
pub const MAX_NAME_LENGTH: usize = 100;

/// Maximum length for learner reference numbers / student ids
pub const MAX_LRN_LENGTH: usize = 50;

/// Maximum length for grade levels
pub const MAX_GRADE_LENGTH: usize = 20;

/// Maximum length for section names
pub const MAX_SECTION_LENGTH: usize = 50;

/// Maximum length for violation type labels
pub const MAX_VIOLATION_TYPE_LENGTH: usize = 100;

/// Maximum length for camera locations
pub const MAX_LOCATION_LENGTH: usize = 100;

/// Maximum length for violation status values
pub const MAX_STATUS_LENGTH: usize = 20;

/// Maximum length for search queries
pub const MAX_QUERY_LENGTH: usize = 256;

// ============================================================================
// Time Utilities
// ============================================================================

/// Current Unix timestamp in seconds, falling back to 0 if the clock is before the epoch
pub fn safe_unix_timestamp() -> u64 {
    match unix_timestamp() {
        Ok(secs) => secs,
        Err(e) => {
            tracing::warn!(error = %e, "using timestamp 0");
            0
        }
    }
}

/// Current Unix timestamp in seconds
pub fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .context("System clock is before UNIX epoch")
}

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length (in characters) against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    let len = value.chars().count();
    if len > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} characters (got {})",
            field_name,
            max_length,
            len
        ));
    }
    Ok(())
}

/// Trim a form value, treating missing and blank values alike
pub fn trimmed_required(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Trim an optional value and bound its length
pub fn optional_field(value: Option<&str>, max_length: usize, field_name: &str) -> Result<Option<String>> {
    match trimmed_required(value) {
        Some(v) => {
            validate_length(&v, max_length, field_name)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

/// Student id / LRN: non-empty and bounded
pub fn validate_lrn(lrn: &str) -> Result<()> {
    if lrn.trim().is_empty() {
        return Err(anyhow!("LRN cannot be empty"));
    }
    validate_length(lrn, MAX_LRN_LENGTH, "LRN")
}

// ============================================================================
// Image Validation
// ============================================================================

/// Image container detected from leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Other(ImageFormat),
}

impl ImageKind {
    /// Only JPEG and PNG are accepted for student enrolment photos
    pub fn is_enrollable(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }
}

/// Sniff the image container from its content, ignoring any client-supplied type
pub fn sniff_image_kind(bytes: &[u8]) -> Option<ImageKind> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some(ImageKind::Jpeg),
        ImageFormat::Png => Some(ImageKind::Png),
        other => Some(ImageKind::Other(other)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_unix_timestamp() {
        let ts = safe_unix_timestamp();
        assert!(ts > 1700000000); // After 2023
        assert!(unix_timestamp().unwrap() >= ts);
    }

    #[test]
    fn test_trimmed_required() {
        assert_eq!(trimmed_required(Some("  Maria ")), Some("Maria".to_string()));
        assert_eq!(trimmed_required(Some("   ")), None);
        assert_eq!(trimmed_required(None), None);
    }

    #[test]
    fn test_optional_field_bounds_length() {
        assert!(optional_field(Some("Gate 2"), MAX_LOCATION_LENGTH, "location").is_ok());
        assert!(optional_field(Some(&"x".repeat(101)), MAX_LOCATION_LENGTH, "location").is_err());
        assert_eq!(optional_field(Some(""), 10, "x").ok().flatten(), None);
    }

    #[test]
    fn test_validate_length_counts_chars() {
        assert!(validate_length("ñññ", 3, "name").is_ok());
        assert!(validate_length("ññññ", 3, "name").is_err());
    }

    #[test]
    fn test_validate_lrn() {
        assert!(validate_lrn("123456789012").is_ok());
        assert!(validate_lrn("").is_err());
        assert!(validate_lrn("   ").is_err());
        assert!(validate_lrn("STU/2024-001").is_ok());
        assert!(validate_lrn(&"9".repeat(60)).is_err());
    }

    #[test]
    fn test_sniff_image_kind() {
        assert_eq!(sniff_image_kind(PNG_MAGIC), Some(ImageKind::Png));
        assert_eq!(sniff_image_kind(JPEG_MAGIC), Some(ImageKind::Jpeg));
        assert_eq!(sniff_image_kind(b"GIF89a\x01\x00"), Some(ImageKind::Other(ImageFormat::Gif)));
        assert_eq!(sniff_image_kind(b"plain text"), None);
        assert!(ImageKind::Png.is_enrollable());
        assert!(!ImageKind::Other(ImageFormat::Gif).is_enrollable());
    }
}
