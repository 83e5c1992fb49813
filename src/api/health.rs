//! Liveness endpoint and the client used by `--healthcheck`.

use anyhow::Context;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /healthz`: 200 with `{"status": "ok"}` whenever the process serves HTTP.
///
/// Touches no dependency, unlike `/api/demo`, so orchestrators can restart the
/// service without reacting to a database or broker outage.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// GET `url` and report whether it answered with a 2xx status.
pub async fn check(url: &str) -> anyhow::Result<bool> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("GET {url}"))?;
    Ok(resp.status().is_success())
}
