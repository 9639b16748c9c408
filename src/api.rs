use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{
        HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use tokio::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    context::RequestContext,
    error::ProcessError,
    models::{
        ProxyDownloadRequest, QualitiesResponse, QualityRequest, VideoDescriptor, VideoRequest,
    },
    service::Service,
};

const EXTRACTION_DEADLINE_SECONDS: u64 = 30;
const PROXY_DEADLINE_SECONDS: u64 = 60;
const SERVICE_NAME: &str = "reelfetch";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code,
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: "INTERNAL_ERROR",
            details: None,
        }
    }

    fn invalid_request(rejection: JsonRejection) -> Self {
        debug!(%rejection, "Rejected request body");
        Self {
            details: Some(rejection.body_text()),
            ..Self::bad_request("Invalid request body", "INVALID_REQUEST")
        }
    }

    /// Caller mistakes keep their own code as a 400; everything else is
    /// reported under the endpoint's failure code.
    fn from_process(error: ProcessError, message: &str, code: &'static str) -> Self {
        let kind = error.kind();
        if kind.is_client_error() {
            return Self {
                details: Some(error.to_string()),
                ..Self::bad_request(kind.to_string(), kind.code())
            };
        }

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
            code,
            details: Some(error.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            details: self.details,
        });

        (self.status, body).into_response()
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/download", post(download_video))
        .route("/api/v1/qualities", post(list_qualities))
        .route("/api/v1/proxy-download", post(proxy_download))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "service": SERVICE_NAME,
    }))
}

async fn download_video(
    State(state): State<AppState>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> Result<Json<VideoDescriptor>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;
    let url = non_empty(&request.url)
        .ok_or_else(|| ApiError::bad_request("URL is required", "MISSING_URL"))?;
    let quality = request
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or("best");

    info!(url, quality, "Downloading video");
    let ctx = RequestContext::with_timeout(Duration::from_secs(EXTRACTION_DEADLINE_SECONDS));

    let descriptor = state
        .service
        .process(&ctx, url, quality)
        .await
        .map_err(|failure| {
            error!(url, error = %failure, "Failed to download video");
            ApiError::from_process(failure, "Failed to download video", "DOWNLOAD_ERROR")
        })?;

    info!(
        url,
        platform = %descriptor.platform,
        video_url = %descriptor.video_url,
        quality,
        "Video downloaded successfully"
    );
    Ok(Json(descriptor))
}

async fn list_qualities(
    State(state): State<AppState>,
    payload: Result<Json<QualityRequest>, JsonRejection>,
) -> Result<Json<QualitiesResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;
    let url = non_empty(&request.url)
        .ok_or_else(|| ApiError::bad_request("URL is required", "MISSING_URL"))?;

    info!(url, "Getting available qualities");
    let ctx = RequestContext::with_timeout(Duration::from_secs(EXTRACTION_DEADLINE_SECONDS));

    let response = state
        .service
        .list_qualities(&ctx, url)
        .await
        .map_err(|failure| {
            error!(url, error = %failure, "Failed to get qualities");
            ApiError::from_process(failure, "Failed to get video qualities", "QUALITIES_ERROR")
        })?;

    info!(
        url,
        platform = %response.platform,
        count = response.available_qualities.len(),
        "Qualities retrieved"
    );
    Ok(Json(response))
}

async fn proxy_download(
    State(state): State<AppState>,
    payload: Result<Json<ProxyDownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(ApiError::invalid_request)?;
    let video_url = non_empty(&request.video_url)
        .ok_or_else(|| ApiError::bad_request("Video URL is required", "MISSING_VIDEO_URL"))?;

    info!(video_url, "Proxying video download");
    let ctx = RequestContext::with_timeout(Duration::from_secs(PROXY_DEADLINE_SECONDS));

    let payload = state
        .service
        .proxy_fetch(&ctx, video_url)
        .await
        .map_err(|failure| {
            error!(video_url, error = %failure, "Failed to proxy download video");
            ApiError::from_process(failure, "Failed to download video", "PROXY_DOWNLOAD_ERROR")
        })?;

    info!(video_url, bytes = payload.len(), "Video proxy download completed");

    let filename = format!("video_{}.mp4", Utc::now().timestamp());
    let headers = [
        (CONTENT_TYPE, "application/octet-stream".to_string()),
        (CONTENT_DISPOSITION, build_content_disposition(&filename)),
    ];

    Ok((headers, payload).into_response())
}

/// Allow-list CORS; with no configured origins any origin is accepted.
pub fn build_cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, ApiError> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH]);

    if allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not configured, accepting any origin");
        return Ok(base.allow_origin(Any));
    }

    let normalized_origins = allowed_origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(origins = ?normalized_origins, "CORS allow-list loaded");

    let normalized_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| normalized_origins.contains(value));
        debug!(?origin, ?normalized, allowed, "CORS origin check");
        allowed
    });

    Ok(base.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('_').is_empty() {
        "video.mp4".to_string()
    } else {
        sanitized
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{
        cache::NoopCache,
        error::ExtractError,
        extractors::{Extractor, ExtractorRegistry},
        platform::Platform,
        quality::QualityPreference,
    };

    #[derive(Default)]
    struct StubExtractor {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn validate(&self, _url: &str) -> bool {
            true
        }

        async fn extract(
            &self,
            url: &str,
            preference: &QualityPreference,
        ) -> Result<VideoDescriptor, ExtractError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ExtractError::Upstream("instagram returned status 429".to_string()));
            }
            Ok(VideoDescriptor::new(
                "https://cdn.example.com/v.mp4",
                Platform::Instagram,
                preference.as_token(),
                url,
            ))
        }
    }

    fn app_with(extractor: Arc<StubExtractor>) -> Router {
        let registry = ExtractorRegistry::new().with(Platform::Instagram, extractor);
        let service = Service::new(Arc::new(NoopCache), registry, reqwest::Client::new());
        let cors = build_cors_layer(&[]).unwrap();
        router(
            AppState {
                service: Arc::new(service),
            },
            cors,
        )
    }

    fn app() -> Router {
        app_with(Arc::new(StubExtractor::default()))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "reelfetch");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn download_returns_descriptor() {
        let response = app()
            .oneshot(post_json(
                "/api/v1/download",
                r#"{"url": "https://www.instagram.com/p/abc123/", "quality": "720p"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["video_url"], "https://cdn.example.com/v.mp4");
        assert_eq!(body["platform"], "instagram");
        assert_eq!(body["quality"], "best[height<=720]");
        assert_eq!(body["metadata"]["source"], "https://www.instagram.com/p/abc123/");
    }

    #[tokio::test]
    async fn request_validation_errors() {
        let cases = [
            ("/api/v1/download", "{not json", "INVALID_REQUEST"),
            ("/api/v1/download", r#"{"url": "  "}"#, "MISSING_URL"),
            ("/api/v1/qualities", r#"{}"#, "MISSING_URL"),
            ("/api/v1/proxy-download", r#"{"video_url": ""}"#, "MISSING_VIDEO_URL"),
            (
                "/api/v1/download",
                r#"{"url": "https://youtu.be/dQw4w9WgXcQ"}"#,
                "UNSUPPORTED_PLATFORM",
            ),
            (
                "/api/v1/proxy-download",
                r#"{"video_url": "file:///etc/passwd"}"#,
                "INVALID_URL",
            ),
        ];

        for (uri, body, code) in cases {
            let response = app().oneshot(post_json(uri, body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri} {body}");
            assert_eq!(json_body(response).await["code"], code, "{uri} {body}");
        }
    }

    #[tokio::test]
    async fn extraction_failures_are_internal_errors_with_details() {
        let extractor = Arc::new(StubExtractor::default());
        extractor.fail.store(true, Ordering::SeqCst);

        let response = app_with(extractor)
            .oneshot(post_json(
                "/api/v1/download",
                r#"{"url": "https://www.instagram.com/reel/xyz/"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["code"], "DOWNLOAD_ERROR");
        assert_eq!(body["error"], "Failed to download video");
        assert!(body["details"].as_str().unwrap().contains("429"));
    }

    #[tokio::test]
    async fn qualities_lists_extractor_options() {
        let response = app()
            .oneshot(post_json(
                "/api/v1/qualities",
                r#"{"url": "https://www.instagram.com/p/abc123/"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["platform"], "instagram");
        assert_eq!(body["available_qualities"][0]["quality"], "auto");
    }

    #[tokio::test]
    async fn proxy_download_streams_bytes_as_attachment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-data".to_vec()))
            .mount(&server)
            .await;

        let body = json!({"video_url": format!("{}/v.mp4", server.uri())}).to_string();
        let response = app()
            .oneshot(post_json("/api/v1/proxy-download", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/octet-stream"
        );
        let disposition = response.headers()[CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"video_"), "{disposition}");
        assert!(disposition.contains(".mp4\""));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"mp4-data");
    }

    #[tokio::test]
    async fn proxy_download_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let body = json!({"video_url": format!("{}/gone.mp4", server.uri())}).to_string();
        let response = app()
            .oneshot(post_json("/api/v1/proxy-download", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["code"], "PROXY_DOWNLOAD_ERROR");
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("https://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);

        assert!(build_cors_layer(&["https://example.com".to_string()]).is_ok());
        assert!(build_cors_layer(&["example.com/path".to_string()]).is_err());
    }

    #[test]
    fn content_disposition_is_ascii_safe() {
        assert_eq!(
            build_content_disposition("video_1700000000.mp4"),
            "attachment; filename=\"video_1700000000.mp4\"; filename*=UTF-8''video_1700000000.mp4"
        );
        let disposition = build_content_disposition("clip \"é\".mp4");
        assert!(disposition.starts_with("attachment; filename=\"clip____.mp4\""));
        assert!(disposition.contains("filename*=UTF-8''clip%20%22%C3%A9%22.mp4"));
    }
}
