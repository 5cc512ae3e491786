//! Public server status.

use axum::Json;
use serde::Serialize;

/// Structured status.
#[derive(Serialize)]
pub struct Status {
    name: &'static str,
    version: &'static str,
}

/// Name and version of the running server.
pub async fn status() -> Json<Status> {
    Json(Status {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}
