use anyhow::{Context, Result, anyhow};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{ErrorResponse, RecognizeRequest, RecognizeResponse};
use super::state::ServerState;
use crate::crop::RasterCrop;
use crate::error::PipelineError;
use crate::recognition::{EngineFactory, NoRemote, Orchestrator, RecognitionMode, TesseractFactory};
use crate::session::Session;
use crate::settings::Settings;
use crate::translate::translator_or_disabled;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const SERVER_USER: &str = "remote-client";

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(settings: Settings) -> Result<()> {
    if settings.server.tokens.is_empty() {
        return Err(anyhow!(
            "server.tokens is empty; configure at least one accepted bearer token"
        ));
    }
    let app = router(server_state(&settings));
    let listener = tokio::net::TcpListener::bind(&settings.server.addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("recognition server listening on {}", settings.server.addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn server_state(settings: &Settings) -> ServerState<TesseractFactory> {
    ServerState {
        orchestrator: Orchestrator::new(
            NoRemote,
            TesseractFactory::new(settings.tesseract_config()),
            translator_or_disabled(&settings.translation),
            settings.orchestrator_options(RecognitionMode::LocalOnly),
        ),
        tokens: settings.server.tokens.clone(),
    }
}

pub(crate) fn router<F>(state: ServerState<F>) -> Router
where
    F: EngineFactory + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/recognize", post(recognize::<F>))
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn recognize<F>(
    State(state): State<Arc<ServerState<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RecognizeResponse>, ApiError>
where
    F: EngineFactory + 'static,
{
    let token = bearer_token(&headers)
        .filter(|token| state.accepts(token))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "not authenticated"))?;
    let session = Session::new(SERVER_USER, token);

    let request: RecognizeRequest = serde_json::from_slice(&body).map_err(|err| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("invalid request body: {}", err),
        )
    })?;
    let crop = RasterCrop::from_data_url(&request.image)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    match state
        .orchestrator
        .recognize_crop(&crop, session.as_ref())
        .await
    {
        Ok(recognition) => {
            if let Some(err) = recognition.translation_error.as_ref() {
                warn!("returning untranslated text: {}", err);
            }
            Ok(Json(RecognizeResponse {
                ocr_text: recognition.result.text,
                translated: recognition.result.translated,
                romaji: recognition.result.phonetic,
            }))
        }
        // empty text is an answer; the caller decides whether to fall back
        Err(PipelineError::NoText) => Ok(Json(RecognizeResponse {
            ocr_text: String::new(),
            translated: None,
            romaji: None,
        })),
        Err(err @ PipelineError::Precondition(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err) => {
            warn!("recognition request failed: {}", err);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop::CropRect;
    use crate::error::PipelineResult;
    use crate::recognition::{
        EngineFuture, LocalEngine, OrchestratorOptions, SegmentationMode,
    };
    use crate::translate::{TranslationEngine, TranslationFuture};
    use image::{Rgba, RgbaImage};
    use tower::ServiceExt;

    struct FixedEngine(&'static str);

    impl LocalEngine for FixedEngine {
        fn recognize<'a>(
            &'a mut self,
            _crop: &'a RasterCrop,
            _mode: SegmentationMode,
        ) -> EngineFuture<'a> {
            let text = self.0.to_string();
            Box::pin(async move { Ok(text) })
        }

        fn terminate(&mut self) {}
    }

    struct FixedFactory(&'static str);

    impl EngineFactory for FixedFactory {
        type Engine = FixedEngine;

        fn create(&self) -> PipelineResult<FixedEngine> {
            Ok(FixedEngine(self.0))
        }
    }

    struct Echo;

    impl TranslationEngine for Echo {
        fn translate<'a>(
            &'a self,
            text: &'a str,
            _session: Option<&'a Session>,
        ) -> TranslationFuture<'a> {
            Box::pin(async move { Ok(format!("<{}>", text)) })
        }
    }

    fn app(text: &'static str) -> Router {
        app_with(text, Box::new(Echo))
    }

    fn app_with(text: &'static str, translator: Box<dyn TranslationEngine>) -> Router {
        router(ServerState {
            orchestrator: Orchestrator::new(
                NoRemote,
                FixedFactory(text),
                translator,
                OrchestratorOptions {
                    mode: RecognitionMode::LocalOnly,
                    ..OrchestratorOptions::default()
                },
            ),
            tokens: vec!["secret".to_string()],
        })
    }

    fn image_url() -> String {
        RasterCrop {
            image: RgbaImage::from_pixel(8, 4, Rgba([255, 255, 255, 255])),
            source: CropRect {
                x: 0,
                y: 0,
                width: 8,
                height: 4,
            },
            rotated: false,
        }
        .to_data_url()
        .unwrap()
    }

    fn post(body: String, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/recognize")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn json_body(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn recognizes_with_valid_token() {
        let body = serde_json::json!({ "image": image_url() }).to_string();
        let response = app("すごい").oneshot(post(body, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            HeaderValue::from_static("*")
        );
        insta::assert_json_snapshot!(json_body(response).await, @r#"
        {
          "ocrText": "すごい",
          "romaji": "sugoi",
          "translated": "<すごい>"
        }
        "#);
    }

    #[tokio::test]
    async fn missing_translator_config_still_serves_text() {
        let mut settings = Settings::default();
        settings.translation.url = None;
        settings.server.tokens = vec!["secret".to_string()];
        let state = server_state(&settings);
        assert!(state.accepts("secret"));

        let body = serde_json::json!({ "image": image_url() }).to_string();
        let translator = translator_or_disabled(&settings.translation);
        let response = app_with("ねこ", translator)
            .oneshot(post(body, Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        insta::assert_json_snapshot!(json_body(response).await, @r#"
        {
          "ocrText": "ねこ",
          "romaji": "neko",
          "translated": null
        }
        "#);
    }

    #[tokio::test]
    async fn empty_text_is_not_an_error() {
        let body = serde_json::json!({ "image": image_url() }).to_string();
        let response = app(" ").oneshot(post(body, Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ocrText"], "");
        assert!(json["translated"].is_null());
    }

    #[tokio::test]
    async fn unknown_or_missing_token_is_rejected() {
        let body = serde_json::json!({ "image": image_url() }).to_string();
        let response = app("x").oneshot(post(body.clone(), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app("x").oneshot(post(body, Some("guess"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "not authenticated");
    }

    #[tokio::test]
    async fn malformed_payloads_are_bad_requests() {
        for body in [
            "{".to_string(),
            serde_json::json!({ "picture": "x" }).to_string(),
            serde_json::json!({ "image": "data:image/png;base64,@@@" }).to_string(),
        ] {
            let response = app("x").oneshot(post(body, Some("secret"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn preflight_and_health() {
        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/recognize")
            .body(Body::empty())
            .unwrap();
        let response = app("x").oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key("access-control-allow-headers"));

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app("x").oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  abc "));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
