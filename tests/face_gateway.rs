//! Integration tests for the face gateway HTTP surface
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use face_gateway::{
    analyzer::mock::MockFaceAnalyzer,
    api,
    archive::UnknownFaceArchive,
    config::AnalyzerKind,
    service::StudentRegistration,
    store::{GatewayStore, MemoryStore, StoreResult, ViolationRow},
    GatewayConfig, GatewayService, GatewayState, KnownFaces,
};
use async_trait::async_trait;
use common::violations::{
    NewStudent, NewUnknownFace, NewViolation, SearchField, StudentRecord, UnknownFace, Violation,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const RED: [u8; 3] = [220, 20, 20];
const BLUE: [u8; 3] = [20, 20, 220];
const BLACK: [u8; 3] = [0, 0, 0];

struct Harness {
    server: TestServer,
    store: Arc<MemoryStore>,
    unknown_dir: TempDir,
}

async fn setup_with(configure: impl FnOnce(&mut GatewayConfig)) -> Harness {
    let unknown_dir = TempDir::new().unwrap();

    let mut config = GatewayConfig {
        analyzer: AnalyzerKind::Mock,
        unknown_faces_dir: unknown_dir.path().to_path_buf(),
        ..GatewayConfig::default()
    };
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    let archive = UnknownFaceArchive::open(&config.unknown_faces_dir).await.unwrap();
    let service = GatewayService::new(
        Arc::new(MockFaceAnalyzer::new()),
        KnownFaces::new(),
        store.clone() as Arc<dyn GatewayStore>,
        archive,
        config,
    );

    let app = api::router(GatewayState::new(Arc::new(service)));
    Harness {
        server: TestServer::new(app).unwrap(),
        store,
        unknown_dir,
    }
}

async fn setup() -> Harness {
    setup_with(|_| {}).await
}

fn encode(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(color)));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}

fn png(color: [u8; 3]) -> Vec<u8> {
    encode(color, ImageFormat::Png)
}

fn image_part(bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name("capture.png").mime_type("image/png")
}

fn registration(name: &str, lrn: &str, photo: Vec<u8>) -> MultipartForm {
    MultipartForm::new()
        .add_text("name", name)
        .add_text("LRN", lrn)
        .add_text("Grade_level", "Grade 10")
        .add_text("section", "Rizal")
        .add_part("image", image_part(photo))
}

async fn register(harness: &Harness, name: &str, lrn: &str, color: [u8; 3]) -> Value {
    let response = harness
        .server
        .post("/register_face")
        .multipart(registration(name, lrn, png(color)))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json::<Value>()
}

async fn recognize(harness: &Harness, bytes: Vec<u8>) -> (u16, Value) {
    let response = harness
        .server
        .post("/recognize")
        .multipart(MultipartForm::new().add_part("image", image_part(bytes)))
        .await;
    (response.status_code().as_u16(), response.json::<Value>())
}

fn archived_files(harness: &Harness) -> usize {
    std::fs::read_dir(harness.unknown_dir.path()).unwrap().count()
}

#[tokio::test]
async fn test_healthz_and_metrics() {
    let harness = setup().await;

    let response = harness.server.get("/healthz").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "ok");

    recognize(&harness, png(BLUE)).await;
    let response = harness.server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("face_gateway_recognition_requests_total"));
}

#[tokio::test]
async fn test_readyz_reports_store_outage() {
    let harness = setup().await;

    let response = harness.server.get("/readyz").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>()["success"], true);

    harness.store.set_offline(true);
    let response = harness.server.get("/readyz").await;
    assert_eq!(response.status_code(), 503);
    let body = response.json::<Value>();
    assert_eq!(body["success"], false);
    assert_eq!(body["analyzer"], "ok");
}

#[tokio::test]
async fn test_recognize_known_and_unknown_faces() {
    let harness = setup().await;

    let registered = register(&harness, "Ana Cruz", "1001", RED).await;
    assert_eq!(registered["success"], true);
    assert_eq!(registered["message"], "Student registered successfully!");
    assert_eq!(registered["enrolled"], true);

    let (status, body) = recognize(&harness, png(RED)).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["faces_detected"], 1);

    let face = &body["recognitions"][0];
    assert_eq!(face["name"], "Ana Cruz");
    assert_eq!(face["lrn"], "1001");
    assert_eq!(face["grade"], "Grade 10");
    assert_eq!(face["section"], "Rizal");
    assert!(face["confidence"].as_f64().unwrap() > 99.9);
    assert_eq!(face["bbox"], json!([0.0, 0.0, 32.0, 32.0]));
    assert_eq!(face["violations_detected"], json!(["Uniform Violation"]));

    let (status, body) = recognize(&harness, png(BLUE)).await;
    assert_eq!(status, 200);
    let face = &body["recognitions"][0];
    assert_eq!(face["name"], "Unknown");
    assert_eq!(face["lrn"], "");
    assert_eq!(face["confidence"], 0.0);
    assert_eq!(
        face["violations_detected"],
        json!(["Uniform Violation", "No ID/Unknown Person"])
    );
}

#[tokio::test]
async fn test_recognize_uniform_colour_has_no_uniform_flag() {
    let harness = setup().await;

    let (status, body) = recognize(&harness, png([230, 190, 20])).await;
    assert_eq!(status, 200);
    assert_eq!(
        body["recognitions"][0]["violations_detected"],
        json!(["No ID/Unknown Person"])
    );
}

#[tokio::test]
async fn test_recognize_rejections() {
    let harness = setup().await;

    let (status, body) = recognize(&harness, png(BLACK)).await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"success": false, "message": "No faces detected"}));

    let (status, body) = recognize(&harness, b"definitely not an image".to_vec()).await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Invalid image");

    let response = harness
        .server
        .post("/recognize")
        .multipart(MultipartForm::new().add_text("note", "no image here"))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "No image file provided");

    let response = harness.server.post("/recognize").json(&json!({"image": "x"})).await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "No image file provided");
}

#[tokio::test]
async fn test_submit_violation_and_list_with_photo() {
    let harness = setup().await;
    register(&harness, "Ana Cruz", "1001", RED).await;

    let response = harness
        .server
        .post("/submit_violation")
        .json(&json!({
            "student_id": "1001",
            "student_name": "Ana Cruz",
            "grade_level": "Grade 10",
            "section": "Rizal",
            "violation_type": "Wearing Earrings"
        }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Violation recorded");
    assert_eq!(body["violation_id"], 1);

    let response = harness.server.get("/get_violations").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    let violation = &body["violations"][0];
    assert_eq!(violation["student_id"], "1001");
    assert_eq!(violation["status"], "Pending");
    assert_eq!(violation["student_photo"], BASE64.encode(png(RED)));
    assert!(violation["date"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_submit_violation_validation() {
    let harness = setup().await;

    let response = harness
        .server
        .post("/submit_violation")
        .json(&json!({"student_id": "1001", "violation_type": "Late"}))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(
        response.json::<Value>(),
        json!({"success": false, "message": "Missing field: student_name"})
    );

    let response = harness.server.post("/submit_violation").text("student_id=1001").await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "Invalid request format");
}

#[tokio::test]
async fn test_submit_unknown_violation_archives_image() {
    let harness = setup().await;

    let response = harness
        .server
        .post("/submit_unknown_violation")
        .multipart(
            MultipartForm::new()
                .add_part("image", image_part(png(BLUE)))
                .add_text("location", "Main Gate"),
        )
        .await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Unknown face reported");
    assert_eq!(archived_files(&harness), 1);

    let image_path = body["image_path"].as_str().unwrap().to_string();
    let file_name = image_path.strip_prefix("unknown_faces/").unwrap();
    assert!(file_name.starts_with("unknown_"));
    assert!(file_name.ends_with(".jpg"));

    let capture = harness.server.get(&format!("/{}", image_path)).await;
    assert_eq!(capture.status_code(), 200);
    assert_eq!(capture.as_bytes().to_vec(), png(BLUE));

    let faces = harness.server.get("/get_unknown_faces").await.json::<Value>();
    assert_eq!(faces["unknown_faces"][0]["image_path"], image_path.as_str());
    assert_eq!(faces["unknown_faces"][0]["location"], "Main Gate");
    assert_eq!(faces["unknown_faces"][0]["processed"], false);

    let violations = harness.server.get("/get_violations").await.json::<Value>();
    let violation = &violations["violations"][0];
    assert_eq!(violation["student_id"], "UNKNOWN");
    assert_eq!(violation["student_name"], "Unknown Person");
    assert_eq!(violation["violation_type"], "Unknown Person Detected");
    assert_eq!(violation["student_photo"], Value::Null);
}

#[tokio::test]
async fn test_unknown_violation_rolls_back_file_on_store_failure() {
    let harness = setup().await;
    harness.store.set_offline(true);

    let response = harness
        .server
        .post("/submit_unknown_violation")
        .multipart(MultipartForm::new().add_part("image", image_part(png(BLUE))))
        .await;
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.json::<Value>()["success"], false);
    assert_eq!(archived_files(&harness), 0);
}

#[tokio::test]
async fn test_unknown_violation_requires_image() {
    let harness = setup().await;

    let response = harness
        .server
        .post("/submit_unknown_violation")
        .multipart(MultipartForm::new().add_text("location", "Main Gate"))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "No image file provided");
}

#[tokio::test]
async fn test_register_face_validation() {
    let harness = setup().await;
    register(&harness, "Ana Cruz", "1001", RED).await;

    let response = harness
        .server
        .post("/register_face")
        .multipart(registration("Other Ana", "1001", png(BLUE)))
        .await;
    assert_eq!(response.status_code(), 409);
    assert_eq!(
        response.json::<Value>()["message"],
        "Student with LRN 1001 already exists"
    );

    let response = harness
        .server
        .post("/register_face")
        .multipart(registration("   ", "1002", png(BLUE)))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "All fields are required");

    let response = harness
        .server
        .post("/register_face")
        .multipart(registration("Ben Santos", "1003", encode(BLUE, ImageFormat::Bmp)))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(
        response.json::<Value>()["message"],
        "Invalid file type. Only JPG/PNG allowed"
    );
}

#[tokio::test]
async fn test_register_face_rejects_large_images() {
    let harness = setup_with(|config| config.max_register_image_bytes = 16).await;

    let response = harness
        .server
        .post("/register_face")
        .multipart(registration("Ana Cruz", "1001", png(RED)))
        .await;
    assert_eq!(response.status_code(), 413);
    assert_eq!(
        response.json::<Value>()["message"],
        "Image too large. Max 5MB allowed"
    );
}

#[tokio::test]
async fn test_register_without_face_is_stored_but_not_enrolled() {
    let harness = setup().await;

    let body = register(&harness, "Dark Photo", "2001", BLACK).await;
    assert_eq!(body["enrolled"], false);

    let roster = harness.server.get("/known_faces").await.json::<Value>();
    assert_eq!(roster["count"], 0);
}

#[tokio::test]
async fn test_known_faces_reload() {
    let harness = setup().await;
    register(&harness, "Ana Cruz", "1001", RED).await;
    register(&harness, "Ben Santos", "1002", BLUE).await;

    let roster = harness.server.get("/known_faces").await.json::<Value>();
    assert_eq!(roster["count"], 2);
    assert_eq!(roster["known_faces"][0]["lrn"], "1001");
    assert_eq!(roster["known_faces"][0]["embedding_dim"], 3);

    let response = harness.server.post("/known_faces/reload").await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["known_faces"], 2);
    assert!(body["reloaded_at"].as_u64().unwrap() > 1700000000);
}

#[tokio::test]
async fn test_search_and_suggestions() {
    let harness = setup().await;
    for (id, name, kind) in [
        ("1001", "Ana Cruz", "Wearing Earrings"),
        ("1002", "Ben Santos", "Uniform Violation"),
        ("1003", "Bea Lim", "Uniform Violation"),
    ] {
        let response = harness
            .server
            .post("/submit_violation")
            .json(&json!({"student_id": id, "student_name": name, "violation_type": kind}))
            .await;
        assert_eq!(response.status_code(), 200);
    }

    let response = harness
        .server
        .post("/search_violation")
        .json(&json!({"query": "uniform", "type": "violation_type"}))
        .await;
    assert_eq!(response.status_code(), 200);
    let body = response.json::<Value>();
    let hits = body["violations"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["student_name"], "Bea Lim");
    assert_eq!(hits[0]["reported_by"], "System");
    assert!(hits[0]["date_formatted"].as_str().unwrap().ends_with('M'));

    let body = harness
        .server
        .post("/search_violation")
        .json(&json!({"query": "ana"}))
        .await
        .json::<Value>();
    assert_eq!(body["violations"][0]["student_id"], "1001");

    let response = harness.server.post("/search_violation").json(&json!({"query": ""})).await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["message"], "Search query is required");

    let body = harness
        .server
        .post("/get_search_suggestions")
        .json(&json!({"query": "Be", "type": "student_name"}))
        .await
        .json::<Value>();
    assert_eq!(body, json!({"success": true, "suggestions": ["Bea Lim", "Ben Santos"]}));

    let body = harness
        .server
        .post("/get_search_suggestions")
        .json(&json!({"query": "B"}))
        .await
        .json::<Value>();
    assert_eq!(body["suggestions"], json!([]));
}

/// Memory store whose `load_students` takes its snapshot, then parks until released
#[derive(Default)]
struct ParkedLoadStore {
    inner: MemoryStore,
    loaded: Notify,
    release: Notify,
}

#[async_trait]
impl GatewayStore for ParkedLoadStore {
    async fn load_students(&self) -> StoreResult<Vec<StudentRecord>> {
        let snapshot = self.inner.load_students().await?;
        self.loaded.notify_one();
        self.release.notified().await;
        Ok(snapshot)
    }

    async fn insert_student(&self, student: &NewStudent) -> StoreResult<i64> {
        self.inner.insert_student(student).await
    }

    async fn insert_violation(&self, violation: &NewViolation) -> StoreResult<i64> {
        self.inner.insert_violation(violation).await
    }

    async fn record_unknown_face(
        &self,
        face: &NewUnknownFace,
        violation: &NewViolation,
    ) -> StoreResult<(i64, i64)> {
        self.inner.record_unknown_face(face, violation).await
    }

    async fn list_violations(&self) -> StoreResult<Vec<ViolationRow>> {
        self.inner.list_violations().await
    }

    async fn list_unknown_faces(&self) -> StoreResult<Vec<UnknownFace>> {
        self.inner.list_unknown_faces().await
    }

    async fn search_violations(
        &self,
        field: SearchField,
        query: &str,
        limit: i64,
    ) -> StoreResult<Vec<Violation>> {
        self.inner.search_violations(field, query, limit).await
    }

    async fn suggest(&self, field: SearchField, prefix: &str, limit: i64) -> StoreResult<Vec<String>> {
        self.inner.suggest(field, prefix, limit).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn test_reload_does_not_drop_concurrent_enrolment() {
    let unknown_dir = TempDir::new().unwrap();
    let config = GatewayConfig {
        analyzer: AnalyzerKind::Mock,
        unknown_faces_dir: unknown_dir.path().to_path_buf(),
        ..GatewayConfig::default()
    };
    let store = Arc::new(ParkedLoadStore::default());
    let archive = UnknownFaceArchive::open(&config.unknown_faces_dir).await.unwrap();
    let service = Arc::new(GatewayService::new(
        Arc::new(MockFaceAnalyzer::new()),
        KnownFaces::new(),
        store.clone() as Arc<dyn GatewayStore>,
        archive,
        config,
    ));

    let reload = tokio::spawn({
        let service = service.clone();
        async move { service.reload_roster().await.map(|r| r.known_faces).ok() }
    });
    store.loaded.notified().await;

    let register = tokio::spawn({
        let service = service.clone();
        async move {
            let registration = StudentRegistration {
                image: Some(png(RED)),
                name: Some("Ana Cruz".to_string()),
                lrn: Some("1001".to_string()),
                grade_level: Some("Grade 10".to_string()),
                section: Some("Rizal".to_string()),
            };
            service.register_student(registration).await.map(|r| r.enrolled).ok()
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    store.release.notify_one();

    assert!(reload.await.unwrap().is_some());
    assert_eq!(register.await.unwrap(), Some(true));

    assert_eq!(service.roster().len().await, 1);
    let summaries = service.roster().summaries().await;
    assert_eq!(summaries[0].lrn, "1001");
}
