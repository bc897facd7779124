//! Liveness/readiness endpoints -- ambient infrastructure, not a domain
//! feature. `/healthz` only proves the process is up; `/readyz` proves the
//! broadcast queue has a live dispatcher path wired in.

use axum::http::StatusCode;
use axum::response::IntoResponse;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}
