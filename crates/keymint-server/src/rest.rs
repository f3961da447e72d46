//! REST façade: route table, request validation, error mapping, and audit
//! emission for every key operation.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::SecondsFormat;
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use keymint_core::{KeyError, KeyMaterial, KeyMetadata};

use crate::audit::{AuditEvent, AuditResult};
use crate::middleware::{correlation_middleware, trace_context_middleware, CorrelationId, TraceContext};
use crate::state::AppState;
use crate::validation::{parse_generation, validate_tenant_id};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/v1/tenants/:tenant_id/keys",
            axum::routing::post(create_key).get(list_keys),
        )
        .route("/v1/tenants/:tenant_id/keys/current", get(get_current_key))
        .route(
            "/v1/tenants/:tenant_id/keys/rotate",
            axum::routing::post(rotate_key),
        )
        .route(
            "/v1/tenants/:tenant_id/keys/:generation",
            get(get_key_by_generation).delete(disable_key),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace_context_middleware,
        ))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

#[derive(Serialize)]
struct KeyMetadataResponse {
    tenant_id: String,
    generation: i64,
    status: String,
    created_at: String,
}

impl From<KeyMetadata> for KeyMetadataResponse {
    fn from(meta: KeyMetadata) -> Self {
        Self {
            tenant_id: meta.tenant_id,
            generation: meta.generation,
            status: meta.status.to_string(),
            created_at: meta.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Serialize)]
struct KeyResponse {
    tenant_id: String,
    generation: i64,
    key: String,
}

impl From<KeyMaterial> for KeyResponse {
    fn from(material: KeyMaterial) -> Self {
        let key = BASE64.encode(&material.dek);
        Self {
            tenant_id: material.tenant_id,
            generation: material.generation,
            key,
        }
    }
}

#[derive(Serialize)]
struct KeyListResponse {
    keys: Vec<KeyMetadataResponse>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: &'static str,
}

/// Exhaustive mapping from the error taxonomy to wire status and code.
/// Infrastructure errors always serialize as a fixed 500 body; the cause
/// stays in the logs, never in the response.
fn status_and_code(err: &KeyError) -> (StatusCode, &'static str, &'static str) {
    match err {
        KeyError::InvalidTenantId(_) => (
            StatusCode::BAD_REQUEST,
            "INVALID_TENANT_ID",
            "invalid tenant ID format",
        ),
        KeyError::InvalidGeneration(_) => (
            StatusCode::BAD_REQUEST,
            "INVALID_GENERATION",
            "invalid generation number",
        ),
        KeyError::KeyNotFound => (
            StatusCode::NOT_FOUND,
            "KEY_NOT_FOUND",
            "key not found for this tenant",
        ),
        KeyError::KeyAlreadyExists => (
            StatusCode::CONFLICT,
            "KEY_ALREADY_EXISTS",
            "key already exists for this tenant",
        ),
        KeyError::KeyDisabled => (StatusCode::GONE, "KEY_DISABLED", "key has been disabled"),
        KeyError::KeyAlreadyDisabled => (
            StatusCode::CONFLICT,
            "KEY_ALREADY_DISABLED",
            "key is already disabled",
        ),
        KeyError::Conflict(_) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            "concurrent update conflict, retry the request",
        ),
        KeyError::Kms(_)
        | KeyError::Storage(_)
        | KeyError::Migration(_)
        | KeyError::InvalidMigrationFile(_)
        | KeyError::Config(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal server error",
        ),
    }
}

fn error_response(err: &KeyError) -> Response {
    let (status, code, message) = status_and_code(err);
    (status, Json(ErrorBody { code, message })).into_response()
}

fn audit(
    state: &AppState,
    operation: &'static str,
    tenant_id: &str,
    generation: Option<i64>,
    outcome: Result<(), &KeyError>,
    correlation: &CorrelationId,
    trace: Option<&TraceContext>,
) {
    let (result, error_code) = match outcome {
        Ok(()) => (AuditResult::Success, None),
        Err(err) => {
            let (_, code, _) = status_and_code(err);
            (AuditResult::Failed, Some(code))
        }
    };
    state.audit.record(&AuditEvent::new(
        operation,
        tenant_id,
        generation,
        result,
        error_code,
        &correlation.0,
        trace,
    ));
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path(tenant_id): Path<String>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let trace = trace.as_deref();

    match state.service.create_key(&tenant_id).await {
        Ok(meta) => {
            audit(&state, "CREATE_KEY", &tenant_id, Some(meta.generation), Ok(()), &correlation, trace);
            (StatusCode::CREATED, Json(KeyMetadataResponse::from(meta))).into_response()
        }
        Err(err) => {
            audit(&state, "CREATE_KEY", &tenant_id, None, Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path(tenant_id): Path<String>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let trace = trace.as_deref();

    match state.service.list_keys(&tenant_id).await {
        Ok(keys) => {
            audit(&state, "LIST_KEYS", &tenant_id, None, Ok(()), &correlation, trace);
            Json(KeyListResponse {
                keys: keys.into_iter().map(KeyMetadataResponse::from).collect(),
            })
            .into_response()
        }
        Err(err) => {
            audit(&state, "LIST_KEYS", &tenant_id, None, Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

async fn get_current_key(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path(tenant_id): Path<String>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let trace = trace.as_deref();

    match state.service.current_key(&tenant_id).await {
        Ok(material) => {
            audit(&state, "GET_CURRENT_KEY", &tenant_id, Some(material.generation), Ok(()), &correlation, trace);
            Json(KeyResponse::from(material)).into_response()
        }
        Err(err) => {
            audit(&state, "GET_CURRENT_KEY", &tenant_id, None, Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

async fn get_key_by_generation(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path((tenant_id, generation)): Path<(String, String)>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let generation = match parse_generation(&generation) {
        Ok(generation) => generation,
        Err(err) => return error_response(&err),
    };
    let trace = trace.as_deref();

    match state.service.key_by_generation(&tenant_id, generation).await {
        Ok(material) => {
            audit(&state, "GET_KEY_BY_GENERATION", &tenant_id, Some(generation), Ok(()), &correlation, trace);
            Json(KeyResponse::from(material)).into_response()
        }
        Err(err) => {
            audit(&state, "GET_KEY_BY_GENERATION", &tenant_id, Some(generation), Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path(tenant_id): Path<String>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let trace = trace.as_deref();

    match state.service.rotate_key(&tenant_id).await {
        Ok(meta) => {
            audit(&state, "ROTATE_KEY", &tenant_id, Some(meta.generation), Ok(()), &correlation, trace);
            (StatusCode::CREATED, Json(KeyMetadataResponse::from(meta))).into_response()
        }
        Err(err) => {
            audit(&state, "ROTATE_KEY", &tenant_id, None, Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

async fn disable_key(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    trace: Option<Extension<TraceContext>>,
    Path((tenant_id, generation)): Path<(String, String)>,
) -> Response {
    if let Err(err) = validate_tenant_id(&tenant_id) {
        return error_response(&err);
    }
    let generation = match parse_generation(&generation) {
        Ok(generation) => generation,
        Err(err) => return error_response(&err),
    };
    let trace = trace.as_deref();

    match state.service.disable_key(&tenant_id, generation).await {
        Ok(()) => {
            audit(&state, "DISABLE_KEY", &tenant_id, Some(generation), Ok(()), &correlation, trace);
            StatusCode::ACCEPTED.into_response()
        }
        Err(err) => {
            audit(&state, "DISABLE_KEY", &tenant_id, Some(generation), Err(&err), &correlation, trace);
            error_response(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_distinct_status_codes() {
        assert_eq!(status_and_code(&KeyError::KeyNotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(status_and_code(&KeyError::KeyAlreadyExists).0, StatusCode::CONFLICT);
        assert_eq!(status_and_code(&KeyError::KeyDisabled).0, StatusCode::GONE);
        assert_eq!(
            status_and_code(&KeyError::KeyAlreadyDisabled).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_and_code(&KeyError::InvalidTenantId("x!".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_and_code(&KeyError::Conflict("dup".into())).0,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn infrastructure_errors_hide_their_cause() {
        for err in [
            KeyError::Kms("provider exploded: secret detail".into()),
            KeyError::Storage("schema leaked".into()),
        ] {
            let (status, code, message) = status_and_code(&err);
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(code, "INTERNAL_ERROR");
            assert_eq!(message, "internal server error");
        }
    }
}
