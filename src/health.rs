use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    let loaded: Vec<&str> = state
        .models
        .loaded_sizes()
        .into_iter()
        .map(|size| size.as_str())
        .collect();
    let seconds_since_heartbeat = state.heartbeat.idle_for().map(|idle| idle.as_secs_f64());

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "whisper-trans",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "models": {
            "loaded": loaded,
            "device": config.models.device
        },
        "results": {
            "cached": state.results.len()
        },
        "flashes": {
            "pending": state.flashes.pending()
        },
        "heartbeat": {
            "seconds_since_last": seconds_since_heartbeat,
            "idle_timeout_seconds": config.lifecycle.idle_timeout_secs
        }
    }))
}

#[cfg(test)]
mod tests {
    use crate::handlers;
    use crate::testing::TestHarness;
    use crate::transcription::ModelSize;
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_health_reports_caches_and_heartbeat() {
        let harness = TestHarness::new();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(harness.state.clone()))
                .configure(handlers::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "whisper-trans");
        assert_eq!(body["models"]["loaded"], serde_json::json!([]));
        assert!(body["models"].get("default").is_none());
        assert_eq!(body["results"]["cached"], 0);
        assert!(body["heartbeat"]["seconds_since_last"].is_null());

        harness.state.models.get_model(ModelSize::Small).await.unwrap();
        harness.state.results.put("hello".to_string());
        harness.state.record_heartbeat();

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["models"]["loaded"], serde_json::json!(["small"]));
        assert_eq!(body["results"]["cached"], 1);
        assert!(body["heartbeat"]["seconds_since_last"].is_number());
    }
}
