// Metric constructors only fail on malformed static names.
#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Recognition ====
    pub static ref RECOGNITION_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_recognition_requests_total",
                "Total number of recognition requests by outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACES_DETECTED: IntCounter = {
        let metric = IntCounter::new(
            "face_gateway_faces_detected_total",
            "Total number of faces returned by the analyzer",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_MATCHES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_face_matches_total",
                "Roster match results (known/unknown)",
            ),
            &["result"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref HEURISTIC_FLAGS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_heuristic_flags_total",
                "Faces flagged by the uniform and earring heuristics",
            ),
            &["check"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref RECOGNITION_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "face_gateway_recognition_latency_seconds",
                "End-to-end latency of a recognition request",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "face_gateway_inference_time_seconds",
                "Time spent in model inference (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["stage", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Roster ====
    pub static ref KNOWN_FACES: IntGauge = {
        let metric = IntGauge::new(
            "face_gateway_known_faces",
            "Number of identities in the in-memory roster",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ROSTER_SKIPPED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_roster_skipped_total",
                "Student photos that could not be enrolled",
            ),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Persistence ====
    pub static ref VIOLATIONS_RECORDED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_violations_recorded_total",
                "Violations persisted, by kind (student/unknown)",
            ),
            &["kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref STORE_OPERATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_gateway_store_operations_total",
                "Store operations by name and status",
            ),
            &["operation", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("metrics output is not valid UTF-8: {}", e))
    })
}
