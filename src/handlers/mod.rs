pub mod index;
pub mod lifecycle;
pub mod upload;

use crate::health;
use actix_web::web;

pub use index::{index_page, submit_transcription};
pub use lifecycle::{heartbeat, shutdown};

/// Register every route the application serves.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(index_page))
            .route(web::post().to(submit_transcription)),
    )
    .route("/heartbeat", web::post().to(heartbeat))
    .route("/shutdown", web::post().to(shutdown))
    .route("/health", web::get().to(health::health_check));
}
