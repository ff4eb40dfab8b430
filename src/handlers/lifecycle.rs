//! # Lifecycle Handlers
//!
//! The page posts `/heartbeat` every few seconds while it is open; the idle
//! monitor ends the process once those stop. `/shutdown` backs the Quit button.

use crate::state::AppState;
use actix_web::{web, HttpResponse};

/// `POST /heartbeat`
pub async fn heartbeat(state: web::Data<AppState>) -> HttpResponse {
    state.record_heartbeat();
    HttpResponse::Ok().content_type("text/plain; charset=utf-8").body("OK")
}

/// `POST /shutdown`
///
/// Answers right away; the process exits after the configured delay.
pub async fn shutdown(state: web::Data<AppState>) -> HttpResponse {
    // Detached: the task outlives this request on purpose.
    let _ = state.request_shutdown();
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Server shutting down...")
}
