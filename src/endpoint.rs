//! HTTP surface for sending and receiving on a named configuration.
//!
//! - `POST /messages/{name}` sends the request body.
//! - `GET /messages/{name}?timeout_ms=N` receives one message, `204` when
//!   nothing arrives in time.
//! - `POST /messages/{name}/xa` sends the body inside a transaction that
//!   commits when the handler returns.
//!
//! Every response carries an `x-correlation-id` header, taken from the
//! request when present.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{MessagingError, TransactionError};
use crate::server::AppState;

const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", get(list_handler))
        .route("/messages/{name}", post(send_handler).get(receive_handler))
        .route("/messages/{name}/xa", post(send_xa_handler))
}

#[derive(Debug, Deserialize)]
pub struct ReceiveParams {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigurationList {
    pub configurations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from)
}

fn with_correlation(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

fn error_status(error: &MessagingError) -> StatusCode {
    match error {
        MessagingError::Configuration { .. } | MessagingError::Closed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        MessagingError::ConnectionLost(_) | MessagingError::Authentication(_) => {
            StatusCode::BAD_GATEWAY
        }
        MessagingError::ReceiveTimeout(_) => StatusCode::NO_CONTENT,
        MessagingError::Transaction(TransactionError::RolledBack { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn failure(state: &AppState, name: &str, error: &MessagingError) -> Response {
    if matches!(error, MessagingError::ConnectionLost(_)) {
        // Drop the broken managers so the next request reconnects.
        let _ = state.registry.release(name).await;
    }
    let status = error_status(error);
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn unknown(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("unknown configuration '{name}'"),
        }),
    )
        .into_response()
}

pub async fn list_handler(State(state): State<Arc<AppState>>) -> Json<ConfigurationList> {
    Json(ConfigurationList {
        configurations: state.registry.names().map(str::to_string).collect(),
    })
}

pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = correlation_id(&headers);
    if !state.registry.contains(&name) {
        return with_correlation(unknown(&name), &correlation_id);
    }

    let result = async {
        let producer = state.registry.producer(&name).await?;
        producer.send(body).await
    }
    .await;

    let response = match result {
        Ok(()) => {
            tracing::info!(correlation_id = %correlation_id, config = %name, "message sent");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, config = %name, error = %e, "send failed");
            failure(&state, &name, &e).await
        }
    };
    with_correlation(response, &correlation_id)
}

pub async fn receive_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ReceiveParams>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = correlation_id(&headers);
    if !state.registry.contains(&name) {
        return with_correlation(unknown(&name), &correlation_id);
    }

    let timeout = params
        .timeout_ms
        .map_or(state.receive_timeout, Duration::from_millis);

    let result = async {
        let consumer = state.registry.consumer(&name).await?;
        consumer.receive(Some(timeout)).await
    }
    .await;

    let response = match result {
        Ok(payload) => {
            tracing::info!(
                correlation_id = %correlation_id,
                config = %name,
                bytes = payload.len(),
                "message delivered"
            );
            (
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                )],
                payload,
            )
                .into_response()
        }
        Err(MessagingError::ReceiveTimeout(_)) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, config = %name, error = %e, "receive failed");
            failure(&state, &name, &e).await
        }
    };
    with_correlation(response, &correlation_id)
}

pub async fn send_xa_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = correlation_id(&headers);
    if !state.registry.contains(&name) {
        return with_correlation(unknown(&name), &correlation_id);
    }

    let result = state
        .transactions
        .run(async {
            let producer = state.registry.producer(&name).await?;
            producer.send_xa(body).await
        })
        .await;

    let response = match result {
        Ok(()) => {
            tracing::info!(correlation_id = %correlation_id, config = %name, "transactional message committed");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            tracing::warn!(
                correlation_id = %correlation_id,
                config = %name,
                error = %e,
                "transactional send failed"
            );
            failure(&state, &name, &e).await
        }
    };
    with_correlation(response, &correlation_id)
}
