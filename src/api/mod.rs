//! HTTP surface: one probe endpoint plus a dependency-free liveness check.
//!
//! Handlers are thin; all probing lives in [`crate::probe`].

pub mod demo;
pub mod health;

use axum::{routing::get, Router};

use crate::probe::Prober;

/// Build the axum router. Middleware (tracing, timeouts) is layered on in `main`.
pub fn router(prober: Prober) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/demo", get(demo::demo))
        .with_state(prober)
}
