//! Colour and edge checks run on each cropped face region.
//!
//! Both checks are coarse by nature: a low share of uniform-coloured pixels
//! flags a uniform violation, and a cluster of small closed edge contours
//! flags earrings. Empty regions never flag anything.

use common::recognition::{EARRINGS_VIOLATION, UNIFORM_VIOLATION};
use image::{GrayImage, RgbImage};
use imageproc::contours::find_contours;
use imageproc::edges::canny;
use imageproc::point::Point;

/// Thresholds for the uniform and earring checks.
///
/// Hue uses the 0..180 scale, saturation and value 0..255.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicConfig {
    pub uniform_hue: (u8, u8),
    pub uniform_min_saturation: u8,
    pub uniform_min_value: u8,

    /// Violation when the in-range share of pixels is below this
    pub min_uniform_coverage: f32,

    pub canny_low: f32,
    pub canny_high: f32,

    /// Exclusive contour area bounds for an earring candidate
    pub min_contour_area: f64,
    pub max_contour_area: f64,

    /// Violation when more candidates than this are found
    pub max_earring_contours: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            uniform_hue: (20, 30),
            uniform_min_saturation: 50,
            uniform_min_value: 50,
            min_uniform_coverage: 0.3,
            canny_low: 100.0,
            canny_high: 200.0,
            min_contour_area: 50.0,
            max_contour_area: 500.0,
            max_earring_contours: 2,
        }
    }
}

/// 8-bit HSV with hue halved into 0..180
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = max - min;

    let saturation = if max > 0.0 { diff / max * 255.0 } else { 0.0 };

    let mut hue = if diff == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / diff
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (
        (hue / 2.0).round().min(179.0) as u8,
        saturation.round() as u8,
        max as u8,
    )
}

/// Share of pixels that fall inside the uniform colour range
pub fn uniform_coverage(region: &RgbImage, config: &HeuristicConfig) -> Option<f32> {
    let total = region.width() as usize * region.height() as usize;
    if total == 0 {
        return None;
    }

    let (hue_low, hue_high) = config.uniform_hue;
    let in_range = region
        .pixels()
        .filter(|pixel| {
            let [r, g, b] = pixel.0;
            let (h, s, v) = rgb_to_hsv(r, g, b);
            (hue_low..=hue_high).contains(&h)
                && s >= config.uniform_min_saturation
                && v >= config.uniform_min_value
        })
        .count();

    Some(in_range as f32 / total as f32)
}

pub fn detect_uniform_violation(region: &RgbImage, config: &HeuristicConfig) -> bool {
    match uniform_coverage(region, config) {
        Some(coverage) => coverage < config.min_uniform_coverage,
        None => false,
    }
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();

    (twice as f64 / 2.0).abs()
}

/// Number of edge contours whose area looks like a small accessory
pub fn earring_candidates(region: &RgbImage, config: &HeuristicConfig) -> usize {
    if region.width() == 0 || region.height() == 0 {
        return 0;
    }

    let gray: GrayImage = image::imageops::grayscale(region);
    let edges = canny(&gray, config.canny_low, config.canny_high);

    find_contours::<i32>(&edges)
        .iter()
        .map(|contour| polygon_area(&contour.points))
        .filter(|area| *area > config.min_contour_area && *area < config.max_contour_area)
        .count()
}

pub fn detect_earrings(region: &RgbImage, config: &HeuristicConfig) -> bool {
    earring_candidates(region, config) > config.max_earring_contours
}

/// Violation labels for one face region, uniform first
pub fn assess(region: &RgbImage, config: &HeuristicConfig) -> Vec<String> {
    let mut labels = Vec::new();

    if detect_uniform_violation(region, config) {
        telemetry::metrics::HEURISTIC_FLAGS.with_label_values(&["uniform"]).inc();
        labels.push(UNIFORM_VIOLATION.to_string());
    }
    if detect_earrings(region, config) {
        telemetry::metrics::HEURISTIC_FLAGS.with_label_values(&["earrings"]).inc();
        labels.push(EARRINGS_VIOLATION.to_string());
    }

    labels
}
