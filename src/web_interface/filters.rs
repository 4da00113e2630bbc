use std::convert::Infallible;
use std::sync::Arc;

use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use crate::auth::{AuthService, Claims};
use crate::error_handling::types::ServiceError;
use crate::storage::types::SYSTEM_USER_ID;
use crate::web_interface::types::ApiResponse;

/// Largest request body accepted by JSON endpoints.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Carries a service failure through warp's rejection chain.
#[derive(Debug)]
pub struct ApiRejection(pub ServiceError);

impl warp::reject::Reject for ApiRejection {}

pub fn reject(err: ServiceError) -> Rejection {
    warp::reject::custom(ApiRejection(err))
}

/// Token part of an `Authorization: Bearer <token>` header.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub fn with_claims(
    auth: Arc<AuthService>,
) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let auth = auth.clone();
        async move {
            let token = bearer_token(header.as_deref()).ok_or_else(|| {
                reject(ServiceError::Auth("Missing bearer token".to_string()))
            })?;
            auth.verify(token).map_err(reject)
        }
    })
}

/// Any valid player token. Operator tokens are refused.
pub fn player_claims(
    auth: Arc<AuthService>,
) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    with_claims(auth).and_then(|claims: Claims| async move {
        if claims.is_admin || claims.user_id == SYSTEM_USER_ID {
            Err(reject(ServiceError::Authorization(
                "Player account required".to_string(),
            )))
        } else {
            Ok(claims)
        }
    })
}

pub fn admin_claims(
    auth: Arc<AuthService>,
) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    with_claims(auth).and_then(|claims: Claims| async move {
        if claims.is_admin {
            Ok(claims)
        } else {
            Err(reject(ServiceError::Authorization(
                "Administrator access required".to_string(),
            )))
        }
    })
}

/// Run a store-touching call on the blocking pool.
pub async fn run_blocking<T, F>(work: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServiceError::Internal(format!("worker task failed: {}", e)))?
}

pub fn error_response(err: &ServiceError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    reply::with_status(reply::json(&ApiResponse::error(err.message())), status).into_response()
}

/// Wrap a service result in the response envelope.
pub fn respond<T: Serialize>(result: Result<T, ServiceError>, success: StatusCode) -> Response {
    match result {
        Ok(data) => reply::with_status(reply::json(&ApiResponse::ok(data)), success).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(ApiRejection(service_err)) = err.find::<ApiRejection>() {
        return Ok(error_response(service_err));
    }

    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Route not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length header required".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };
    Ok(reply::with_status(reply::json(&ApiResponse::error(message)), status).into_response())
}
