mod error;
mod handlers;
mod upload;

use crate::classify::ImageClassifier;
use crate::estimate::{ElevationSource, EstimatorSettings};
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    /// Avalanche / not-avalanche pre-filter; `/spamcheck` answers 503 without it
    pub spam_filter: Option<Arc<dyn ImageClassifier>>,
    /// Avalanche-type model; `/checkavalanchetype` answers 503 without it
    pub type_classifier: Option<Arc<dyn ImageClassifier>>,
    pub elevation: Arc<dyn ElevationSource>,
    pub estimator: EstimatorSettings,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/add_point", post(handlers::add_point))
        .route("/undo", post(handlers::undo))
        .route("/estimate_size", post(handlers::estimate_size))
        .route("/spamcheck", post(handlers::spam_check))
        .route("/checkavalanchetype", post(handlers::avalanche_type))
        .route("/sessions/:id", delete(handlers::delete_session))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until the listener fails
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await.context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::FixedClassifier;
    use crate::estimate::tests::RidgeTerrain;
    use crate::render::OverlayStyle;
    use crate::session::tests::{test_png, DiscSegmenter};
    use crate::session::StoreSettings;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const BOUNDARY: &str = "locator-test-boundary";

    fn state(spam_class: Option<usize>, type_class: Option<usize>) -> AppState {
        let sessions = SessionStore::new(
            Arc::new(DiscSegmenter::new(6)),
            OverlayStyle::default(),
            StoreSettings::default(),
        );
        AppState {
            sessions: Arc::new(sessions),
            spam_filter: spam_class.map(|c| Arc::new(FixedClassifier(c)) as Arc<dyn ImageClassifier>),
            type_classifier: type_class.map(|c| Arc::new(FixedClassifier(c)) as Arc<dyn ImageClassifier>),
            elevation: Arc::new(RidgeTerrain { ridge: 2_600_100.0 }),
            estimator: EstimatorSettings::default(),
        }
    }

    fn app(state: AppState) -> Router {
        router(state, 8 * 1024 * 1024)
    }

    fn multipart(bytes: &[u8]) -> Request<Body> {
        multipart_to("/upload", bytes)
    }

    fn multipart_to(uri: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn decode_png(b64: &Value) -> image::RgbImage {
        let bytes = STANDARD.decode(b64.as_str().unwrap()).unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgb8()
    }

    async fn uploaded(app: &Router) -> String {
        let (status, body) = send(app, multipart(&test_png(40, 30))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn upload_returns_session_and_base_image() {
        let app = app(state(None, None));
        let (status, body) = send(&app, multipart(&test_png(40, 30))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["session_id"].is_string());
        assert_eq!(decode_png(&body["image"]).dimensions(), (40, 30));
    }

    #[tokio::test]
    async fn raw_body_upload_is_accepted() {
        let app = app(state(None, None));
        let req = Request::post("/upload")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(test_png(10, 10)))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn undecodable_upload_is_a_decode_error() {
        let app = app(state(None, None));
        let (status, body) = send(&app, multipart(b"definitely not a png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "decode_error");

        // the session opened for the failed upload is gone again
        let (_, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(body, json!({"status": "ok", "sessions": 0}));
    }

    #[tokio::test]
    async fn failed_upload_keeps_an_existing_session() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let uri = format!("/upload?session={session}");
        let (status, _) = send(&app, multipart_to(&uri, b"still not a png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(body, json!({"status": "ok", "sessions": 1}));
    }

    #[tokio::test]
    async fn add_point_then_undo_restores_base() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let (status, body) = send(
            &app,
            post_json(
                &format!("/add_point?session={session}"),
                json!({"x": 20, "y": 15}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let mask = decode_png(&body["mask"]);
        assert_eq!(mask.get_pixel(20, 15)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(body["objects"], 1);

        let (status, body) = send(&app, post_json(&format!("/undo?session={session}"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let base = image::load_from_memory(&test_png(40, 30)).unwrap().to_rgb8();
        assert_eq!(decode_png(&body["image"]), base);
    }

    #[tokio::test]
    async fn undo_on_empty_history_is_a_no_op() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let (status, body) = send(&app, post_json(&format!("/undo?session={session}"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode_png(&body["image"]).dimensions(), (40, 30));
    }

    #[tokio::test]
    async fn out_of_bounds_point_is_rejected() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let (status, body) = send(
            &app,
            post_json(
                &format!("/add_point?session={session}"),
                json!({"x": 40, "y": 0, "label": "background"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_prompt");
    }

    #[tokio::test]
    async fn unknown_and_missing_sessions() {
        let app = app(state(None, None));

        let uri = format!("/undo?session={}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, post_json(&uri, json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "unknown_session");

        let (status, body) = send(&app, post_json("/add_point", json!({"x": 1, "y": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn session_can_be_deleted() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let delete = |id: &str| {
            Request::delete(format!("/sessions/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        let (status, _) = send(&app, delete(&session)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, delete(&session)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(body, json!({"status": "ok", "sessions": 0}));
    }

    #[tokio::test]
    async fn estimate_size_uses_current_mask_by_default() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;
        send(
            &app,
            post_json(
                &format!("/add_point?session={session}"),
                json!({"x": 20, "y": 15}),
            ),
        )
        .await;

        let (status, body) = send(
            &app,
            post_json(
                &format!("/estimate_size?session={session}"),
                json!({
                    "avalanche": {"easting": 2_600_300.0, "northing": 1_200_400.0},
                    "photographer": {"easting": 2_600_000.0, "northing": 1_200_000.0},
                    "camera_name": "Xiaomi 11 Pro",
                    "focal_length_mm": 26.0
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["relative_size"]["kind"], "mask_fraction");
        let fraction = body["relative_size"]["value"].as_f64().unwrap();
        assert!(fraction > 0.0 && fraction < 1.0);

        let distance = body["distance"].as_f64().unwrap();
        assert!((distance - 290_000.0_f64.sqrt()).abs() < 1e-6);
        assert!((body["tilt"]["east"].as_f64().unwrap() - 45.0).abs() < 1e-6);

        let width = body["width"].as_f64().unwrap();
        let height = body["height"].as_f64().unwrap();
        let area = body["finalsize"].as_f64().unwrap();
        assert!((area - fraction * width * height).abs() < 1e-6 * area.max(1.0));
    }

    #[tokio::test]
    async fn estimate_size_without_camera_is_missing_metadata() {
        let app = app(state(None, None));
        let session = uploaded(&app).await;

        let (status, body) = send(
            &app,
            post_json(
                &format!("/estimate_size?session={session}"),
                json!({
                    "avalanche": {"easting": 2_600_300.0, "northing": 1_200_400.0},
                    "photographer": {"easting": 2_600_000.0, "northing": 1_200_000.0},
                    "relative_size": 0.3
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "missing_metadata");
    }

    #[tokio::test]
    async fn spam_check_gates_the_upload() {
        let app = app(state(Some(0), None));
        let (status, body) = send(&app, multipart_to("/spamcheck", &test_png(16, 16))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"spam": true}));

        let app = self::app(state(Some(1), None));
        let (status, body) = send(&app, multipart_to("/spamcheck", &test_png(16, 16))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spam"], false);
        let session = body["session_id"].as_str().unwrap();
        assert_eq!(decode_png(&body["image"]).dimensions(), (16, 16));

        let (status, _) = send(
            &app,
            post_json(&format!("/add_point?session={session}"), json!({"x": 3, "y": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn classifiers_report_when_unconfigured() {
        let app = app(state(None, None));
        let (status, body) = send(&app, multipart_to("/checkavalanchetype", &test_png(8, 8))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["kind"], "not_configured");
    }

    #[tokio::test]
    async fn avalanche_type_is_labelled() {
        let app = app(state(None, Some(2)));
        let (status, body) = send(&app, multipart_to("/checkavalanchetype", &test_png(8, 8))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"avalanche_type": 2, "label": "loose"}));
    }
}
