// Placeholder authentication: checks that a bearer token is present,
// not that it is valid. Real verification is out of scope; this keeps
// the check outside the ingestion pipeline the way `otlp2parquet-server`
// keeps auth/tenant concerns out of `handlers.rs`'s core conversion path.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub(crate) async fn require_bearer_token(request: Request, next: Next) -> Response {
    let has_bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer ") && v.len() > "Bearer ".len())
        .unwrap_or(false);

    if !has_bearer {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "missing bearer token" })),
        )
            .into_response();
    }

    next.run(request).await
}
