//! HTTP surface of the invocation endpoint (`POST /api/job`).

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;

use crate::app::endpoint::{InvocationEndpoint, InvocationResponse};

pub const JOB_ROUTE: &str = "/api/job";

pub fn create_router(endpoint: Arc<InvocationEndpoint>) -> Router {
    Router::new()
        .route(JOB_ROUTE, post(invoke_job))
        .with_state(endpoint)
}

async fn invoke_job(
    State(endpoint): State<Arc<InvocationEndpoint>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    // The handler keeps running after the response; the handle is not awaited.
    let outcome = endpoint.invoke(&body, authorization).await;
    outcome.response.into_response()
}

impl IntoResponse for InvocationResponse {
    fn into_response(self) -> Response {
        let status = match self {
            InvocationResponse::Ok => StatusCode::OK,
            InvocationResponse::Unauthorized => StatusCode::UNAUTHORIZED,
            InvocationResponse::NotFound => StatusCode::NOT_FOUND,
            InvocationResponse::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.body()).into_response()
    }
}
