//! # Upload Page Handlers
//!
//! ## Endpoints:
//! - `GET /` - render the form, the result named by `?result=` and any pending error
//! - `POST /` - accept an upload, transcribe it and redirect back to `GET /`
//!
//! ## Request Flow (POST):
//! 1. Parse the multipart body, streaming the audio into a temp directory
//! 2. Coerce `model` / `format` to known values
//! 3. Reject a missing or unusable file before any model is touched
//! 4. Fetch (or load) the model, run it on the blocking pool, format the result
//! 5. Store the output and answer `303 See Other` to `/?result=<handle>`
//!
//! Any failure in steps 3-4 is flashed and redirected to `/`. The temp
//! directory is removed when the handler returns, whatever the outcome.

use crate::error::{AppError, AppResult};
use crate::flash;
use crate::handlers::upload::{self, AudioUpload, SavedUpload};
use crate::page::{self, PageView};
use crate::state::AppState;
use crate::transcription::{engine, format_output, ModelSize, OutputFormat};
use actix_multipart::Multipart;
use actix_web::http::header::{self, ContentType};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

/// The user's choices, echoed back so the form keeps them after a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub model: ModelSize,
    pub format: OutputFormat,
}

impl Selection {
    pub fn from_form(model: Option<&str>, format: Option<&str>) -> Self {
        Self {
            model: ModelSize::from_form(model),
            format: OutputFormat::from_form(format),
        }
    }

    fn query(&self) -> String {
        format!("model={}&format={}", self.model, self.format)
    }
}

/// Query string accepted by `GET /`.
#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub result: Option<String>,
    pub model: Option<String>,
    pub format: Option<String>,
}

/// Render the upload page.
///
/// ## Endpoint: `GET /`
///
/// An unknown or malformed `result` handle simply shows the empty form.
pub async fn index_page(req: HttpRequest, state: web::Data<AppState>, query: web::Query<IndexQuery>) -> HttpResponse {
    let transcription = query.result.as_deref().and_then(|handle| state.results.get(handle));
    let error = state.flashes.consume(&req);
    let selection = Selection::from_form(query.model.as_deref(), query.format.as_deref());
    let config = state.get_config();

    let body = page::render_index(&PageView {
        transcription: transcription.as_deref(),
        error: error.as_deref(),
        model: selection.model,
        format: selection.format,
        max_upload_mb: config.server.max_upload_size_mb,
        heartbeat_every_ms: config.lifecycle.heartbeat_interval_secs.saturating_mul(1000),
    });

    let mut response = HttpResponse::Ok();
    response.content_type(ContentType::html());
    if req.cookie(flash::FLASH_COOKIE).is_some() {
        response.cookie(flash::removal_cookie());
    }
    response.body(body)
}

/// Accept an upload and transcribe it.
///
/// ## Endpoint: `POST /` (`multipart/form-data`)
///
/// ## Responses:
/// - **303** to `/?result=<handle>&model=..&format=..` on success
/// - **303** to `/?model=..&format=..` with a flash cookie on any user-facing failure
/// - **413** when the body exceeds `MAX_UPLOAD_SIZE`
/// - **400** when the multipart body itself is malformed
pub async fn submit_transcription(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let limit_bytes = config.max_upload_bytes();
    let limit_mb = config.server.max_upload_size_mb;

    if declared_length(&req).is_some_and(|len| len > limit_bytes) {
        tracing::warn!(limit_mb, "Upload rejected by Content-Length");
        return Err(AppError::PayloadTooLarge(limit_mb));
    }

    let form = upload::parse_upload(payload, limit_bytes, limit_mb).await?;
    let selection = Selection::from_form(form.model.as_deref(), form.format.as_deref());
    let language = form.language.clone();

    let saved = match form.audio {
        AudioUpload::Missing | AudioUpload::EmptyName => {
            return Ok(flash_redirect(
                &state,
                &selection,
                &AppError::ValidationError(upload::NO_FILE_MESSAGE.to_string()),
            ));
        }
        AudioUpload::InvalidName => {
            return Ok(flash_redirect(
                &state,
                &selection,
                &AppError::ValidationError(upload::INVALID_FILENAME_MESSAGE.to_string()),
            ));
        }
        AudioUpload::Saved(saved) => saved,
    };

    tracing::info!(
        model = %selection.model,
        format = %selection.format,
        bytes = saved.bytes(),
        "Transcription requested"
    );

    let outcome = run_transcription(&state, &selection, &saved, language).await;
    // the temp directory goes away here on both paths
    drop(saved);

    match outcome {
        Ok(rendered) => {
            let handle = state.results.put(rendered);
            tracing::info!(handle = %handle, "Transcription stored");
            Ok(see_other(&format!("/?result={}&{}", handle, selection.query())).finish())
        }
        Err(err) => {
            tracing::warn!(error = %err, "Transcription failed");
            Ok(flash_redirect(&state, &selection, &err))
        }
    }
}

async fn run_transcription(
    state: &AppState,
    selection: &Selection,
    saved: &SavedUpload,
    language: Option<String>,
) -> AppResult<String> {
    let model = state.models.get_model(selection.model).await?;
    let path = saved.path().to_path_buf();
    let format = selection.format;

    web::block(move || -> AppResult<String> {
        let result = engine::transcribe(model.as_ref(), &path, language.as_deref())?;
        Ok(format_output(&result, format))
    })
    .await?
}

fn declared_length(req: &HttpRequest) -> Option<u64> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn see_other(location: &str) -> actix_web::HttpResponseBuilder {
    let mut response = HttpResponse::SeeOther();
    response.insert_header((header::LOCATION, location.to_string()));
    response
}

fn flash_redirect(state: &AppState, selection: &Selection, err: &AppError) -> HttpResponse {
    let cookie = state.flashes.issue(&err.user_message());
    see_other(&format!("/?{}", selection.query())).cookie(cookie).finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::testing::{multipart_body, test_config, StubModel, TestHarness};
    use actix_web::cookie::Cookie;
    use actix_web::dev::ServiceResponse;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    macro_rules! init_app {
        ($harness:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($harness.state.clone()))
                    .configure(handlers::configure),
            )
            .await
        };
    }

    fn upload_request(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> test::TestRequest {
        let (content_type, body) = multipart_body(fields, file);
        test::TestRequest::post()
            .uri("/")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
    }

    fn location(resp: &ServiceResponse) -> String {
        resp.headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    fn flash_cookie(resp: &ServiceResponse) -> Option<Cookie<'static>> {
        resp.response()
            .cookies()
            .find(|c| c.name() == flash::FLASH_COOKIE)
            .map(|c| c.into_owned())
    }

    #[actix_web::test]
    async fn test_empty_form_renders() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("name=\"audio_file\""));
        assert!(!body.contains("id=\"transcription\""));
    }

    #[actix_web::test]
    async fn test_successful_upload_redirects_to_result() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(
            &app,
            upload_request(&[("model", "small"), ("format", "srt"), ("language", "en")], Some(("talk.wav", &b"RIFF"[..]))).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let target = location(&resp);
        assert!(target.starts_with("/?result="));
        assert!(target.ends_with("&model=small&format=srt"));

        assert_eq!(harness.loader.loads(), vec![ModelSize::Small]);
        let calls = harness.model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].path_existed);
        assert_eq!(calls[0].language.as_deref(), Some("en"));
        // temp file and directory are gone after the request
        assert!(!calls[0].path.exists());
        assert!(!calls[0].path.parent().unwrap().exists());

        let resp = test::call_service(&app, test::TestRequest::get().uri(&target).to_request()).await;
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("1\n00:00.000 --&gt; 00:01.500\nHello from the stub."));
        assert!(body.contains(r#"<option value="small" selected>"#));
    }

    #[actix_web::test]
    async fn test_result_page_is_repeatable() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[], Some(("a.wav", &b"RIFF"[..]))).to_request()).await;
        let target = location(&resp);

        let first = test::read_body(test::call_service(&app, test::TestRequest::get().uri(&target).to_request()).await).await;
        let second = test::read_body(test::call_service(&app, test::TestRequest::get().uri(&target).to_request()).await).await;
        assert_eq!(first, second);
        assert_eq!(harness.model.call_count(), 1);
    }

    #[actix_web::test]
    async fn test_every_model_and_format_combination() {
        for size in ModelSize::ALL {
            for format in OutputFormat::ALL {
                let harness = TestHarness::new();
                let app = init_app!(harness);

                let resp = test::call_service(
                    &app,
                    upload_request(
                        &[("model", size.as_str()), ("format", format.as_str())],
                        Some(("clip.wav", &b"RIFF"[..])),
                    )
                    .to_request(),
                )
                .await;
                assert_eq!(resp.status(), StatusCode::SEE_OTHER);

                let handle = location(&resp)
                    .trim_start_matches("/?result=")
                    .split('&')
                    .next()
                    .unwrap()
                    .to_string();
                let stored = harness.state.results.get(&handle).unwrap();
                assert_eq!(
                    &*stored,
                    format_output(&StubModel::sample_result(), format)
                );
                assert_eq!(harness.loader.loads(), vec![size]);
            }
        }
    }

    #[actix_web::test]
    async fn test_invalid_model_and_format_are_coerced() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(
            &app,
            upload_request(&[("model", "gigantic"), ("format", "docx")], Some(("a.wav", &b"RIFF"[..]))).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(location(&resp).ends_with("&model=base&format=txt"));
        assert_eq!(harness.loader.loads(), vec![ModelSize::Base]);
    }

    #[actix_web::test]
    async fn test_absent_model_and_format_use_base_and_txt() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[], Some(("a.wav", &b"RIFF"[..]))).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(location(&resp).ends_with("&model=base&format=txt"));
        assert_eq!(harness.loader.loads(), vec![ModelSize::Base]);
    }

    #[actix_web::test]
    async fn test_missing_file_flashes_and_skips_model() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[("model", "tiny")], None).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/?model=tiny&format=txt");
        let cookie = flash_cookie(&resp).unwrap();
        assert!(harness.loader.loads().is_empty());
        assert_eq!(harness.model.call_count(), 0);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/?model=tiny&format=txt").cookie(cookie.clone()).to_request(),
        )
        .await;
        assert!(flash_cookie(&resp).is_some_and(|c| c.value().is_empty()));
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains(upload::NO_FILE_MESSAGE));

        // shown once only
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(!body.contains(upload::NO_FILE_MESSAGE));
    }

    #[actix_web::test]
    async fn test_empty_filename_flashes_and_skips_model() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[], Some(("", &b""[..]))).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(flash_cookie(&resp).is_some());
        assert_eq!(harness.model.call_count(), 0);
        assert_eq!(harness.state.flashes.pending(), 1);
    }

    #[actix_web::test]
    async fn test_unusable_filename_flashes() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[], Some(("\u{97f3}\u{58f0}", &b"RIFF"[..]))).to_request()).await;
        let cookie = flash_cookie(&resp).unwrap();
        assert_eq!(harness.model.call_count(), 0);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("Invalid filename. Please rename your file and try again."));
    }

    #[actix_web::test]
    async fn test_model_failure_is_flashed_and_file_removed() {
        let harness = TestHarness::with_model(StubModel::failing("not a WAV file"), test_config());
        let app = init_app!(harness);

        let resp = test::call_service(&app, upload_request(&[], Some(("song.mp3", &b"ID3"[..]))).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/?model=base&format=txt");
        let cookie = flash_cookie(&resp).unwrap();

        let calls = harness.model.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].path.exists());
        assert!(harness.state.results.is_empty());

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("not a WAV file"));
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_413() {
        let mut config = test_config();
        config.server.max_upload_size_mb = 1;
        let harness = TestHarness::with_model(StubModel::default(), config);
        let app = init_app!(harness);

        let big = vec![7u8; 2 * 1024 * 1024];
        let resp = test::call_service(&app, upload_request(&[], Some(("big.wav", big.as_slice()))).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(harness.model.call_count(), 0);
    }

    #[actix_web::test]
    async fn test_unknown_result_handle_shows_empty_form() {
        let harness = TestHarness::new();
        let app = init_app!(harness);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/?result=nope").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
        assert!(!body.contains("id=\"transcription\""));
    }
}
