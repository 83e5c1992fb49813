//! `GET /api/demo`: round-trip every dependency and report per-dependency results.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::probe::Prober;

/// Always `200 OK`. The per-dependency `result` fields are the signal; a
/// request that reaches this handler never turns into a transport error.
///
/// Example response:
/// ```json
/// {
///   "ok": true,
///   "result": {
///     "postgres": { "result": "success", "created": {...}, "read": {...}, "updated": {...}, "deleted": {...} },
///     "redis":    { "result": "fail", "error": "connection error: Connection refused (os error 111)" },
///     "kafka":    { "result": "partial_success", "topic": "demo-topic", "produced": "...", "consumed": null }
///   }
/// }
/// ```
pub async fn demo(State(prober): State<Prober>) -> impl IntoResponse {
    let result = prober.run().await;
    Json(json!({ "ok": true, "result": result }))
}
