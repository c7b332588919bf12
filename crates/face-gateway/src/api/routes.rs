use crate::error::ApiError;
use crate::service::{StudentRegistration, UnknownFaceReport};
use crate::state::GatewayState;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::recognition::{KnownFacesResponse, RecognizeResponse, RosterReloadResponse};
use common::violations::{
    RegisterStudentResponse, SearchRequest, SearchResponse, SubmitViolationResponse,
    SuggestionResponse, UnknownFaceListResponse, UnknownViolationResponse, ViolationListResponse,
};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Fields of a multipart upload; the `image` part is kept as raw bytes
#[derive(Debug, Default)]
struct UploadForm {
    image: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }
}

fn upload_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Upload too large")
    } else {
        ApiError::bad_request(format!("Malformed upload: {}", err.body_text()))
    }
}

async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Result<UploadForm, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection, "request is not a multipart upload");
        ApiError::bad_request("No image file provided")
    })?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let bytes = field.bytes().await.map_err(upload_error)?;
            form.image = Some(bytes.to_vec());
        } else {
            let text = field.text().await.map_err(upload_error)?;
            form.fields.insert(name, text);
        }
    }

    Ok(form)
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected JSON body");
        ApiError::bad_request("Invalid request format")
    })
}

fn search_request(body: Result<Json<Value>, JsonRejection>) -> Result<SearchRequest, ApiError> {
    serde_json::from_value(json_body(body)?)
        .map_err(|_| ApiError::bad_request("Invalid request format"))
}

// ===== Health & Metrics =====

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz(State(state): State<GatewayState>) -> impl IntoResponse {
    let service = state.service();

    let store = match service.store().health_check().await {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    let analyzer = match service.analyzer().health_check().await {
        Ok(true) => "ok".to_string(),
        Ok(false) => "not ready".to_string(),
        Err(e) => e.to_string(),
    };

    let ready = store == "ok" && analyzer == "ok";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "success": ready,
            "store": store,
            "analyzer": analyzer,
            "known_faces": service.roster().len().await,
        })),
    )
}

pub async fn metrics() -> Result<String, ApiError> {
    telemetry::metrics::encode_metrics()
        .map_err(|e| ApiError::internal(format!("failed to encode metrics: {}", e)))
}

// ===== Recognition =====

pub async fn recognize(
    State(state): State<GatewayState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let form = read_upload(multipart).await?;
    let image = form.image.unwrap_or_default();

    let response = state.service().recognize(&image).await?;
    Ok(Json(response))
}

// ===== Violations =====

pub async fn submit_violation(
    State(state): State<GatewayState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SubmitViolationResponse>, ApiError> {
    let body = json_body(body)?;
    let response = state.service().submit_violation(&body).await?;
    Ok(Json(response))
}

pub async fn submit_unknown_violation(
    State(state): State<GatewayState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UnknownViolationResponse>, ApiError> {
    let mut form = read_upload(multipart).await?;
    let report = UnknownFaceReport {
        violation_type: form.take("violation_type"),
        location: form.take("location"),
        image: form.image,
    };

    let response = state.service().submit_unknown_violation(report).await?;
    Ok(Json(response))
}

pub async fn get_violations(
    State(state): State<GatewayState>,
) -> Result<Json<ViolationListResponse>, ApiError> {
    let response = state.service().list_violations().await?;
    Ok(Json(response))
}

pub async fn get_unknown_faces(
    State(state): State<GatewayState>,
) -> Result<Json<UnknownFaceListResponse>, ApiError> {
    let response = state.service().list_unknown_faces().await?;
    Ok(Json(response))
}

pub async fn search_violation(
    State(state): State<GatewayState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let request = search_request(body)?;
    let response = state.service().search_violations(&request).await?;
    Ok(Json(response))
}

pub async fn get_search_suggestions(
    State(state): State<GatewayState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let request = search_request(body)?;
    let response = state.service().search_suggestions(&request).await?;
    Ok(Json(response))
}

// ===== Students and roster =====

pub async fn register_face(
    State(state): State<GatewayState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RegisterStudentResponse>, ApiError> {
    let mut form = read_upload(multipart).await?;
    let registration = StudentRegistration {
        name: form.take("name"),
        lrn: form.take("LRN"),
        grade_level: form.take("Grade_level"),
        section: form.take("section"),
        image: form.image,
    };

    let response = state.service().register_student(registration).await?;
    Ok(Json(response))
}

pub async fn known_faces(State(state): State<GatewayState>) -> Json<KnownFacesResponse> {
    Json(state.service().list_roster().await)
}

pub async fn reload_known_faces(
    State(state): State<GatewayState>,
) -> Result<Json<RosterReloadResponse>, ApiError> {
    let response = state.service().reload_roster().await?;
    Ok(Json(response))
}
