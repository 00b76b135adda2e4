use super::upload::ImageUpload;
use super::AppState;
use crate::classify::{self, AvalancheKind, ImageClassifier};
use crate::error::{LocatorError, Result};
use crate::estimate::{self, AxisAngles, RelativeSize, SizeQuery};
use crate::render;
use crate::segmentation::{Mask, PointLabel, PointPrompt};
use crate::session::SessionHandle;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    pub session: Option<Uuid>,
    #[serde(default)]
    pub multi_object: bool,
}

impl SessionParams {
    fn require(&self) -> Result<Uuid> {
        self.session
            .ok_or_else(|| LocatorError::InvalidRequest("missing session parameter".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct PointRequest {
    pub x: u32,
    pub y: u32,
    #[serde(default = "default_label")]
    pub label: PointLabel,
    pub object_id: Option<u32>,
}

fn default_label() -> PointLabel {
    PointLabel::Foreground
}

impl From<PointRequest> for PointPrompt {
    fn from(req: PointRequest) -> Self {
        PointPrompt {
            x: req.x,
            y: req.y,
            label: req.label,
            object_id: req.object_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct AddPointResponse {
    pub image: String,
    pub mask: String,
    /// Masks recomputed by this click (more than one in multi-object mode)
    pub objects: usize,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct SizeResponse {
    pub distance: f64,
    pub finalsize: f64,
    pub width: f64,
    pub height: f64,
    pub tilt: AxisAngles,
    pub relative_size: RelativeSize,
}

#[derive(Debug, Serialize)]
pub struct SpamResponse {
    pub spam: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvalancheTypeResponse {
    pub avalanche_type: usize,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

/// Run a PNG encoding on the blocking pool
async fn encode_png<F>(encode: F) -> Result<String>
where
    F: FnOnce() -> anyhow::Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(encode)
        .await
        .map_err(|e| LocatorError::Collaborator {
            collaborator: "png encoder",
            message: e.to_string(),
        })?
        .map_err(|e| LocatorError::collaborator("png encoder", e))
}

async fn encode_image(image: RgbImage) -> Result<String> {
    encode_png(move || render::png_base64(&image)).await
}

async fn encode_mask(mask: Mask) -> Result<String> {
    encode_png(move || render::mask_png_base64(&mask)).await
}

/// Decode and classify on the blocking pool
async fn run_classifier(classifier: Arc<dyn ImageClassifier>, bytes: Vec<u8>) -> Result<usize> {
    tokio::task::spawn_blocking(move || {
        let image = render::decode_image(&bytes)?;
        classifier
            .predict_class(&image)
            .map_err(|e| LocatorError::collaborator("classifier", e))
    })
    .await
    .map_err(|e| LocatorError::Collaborator {
        collaborator: "classifier",
        message: e.to_string(),
    })?
}

async fn upload_into(handle: Arc<SessionHandle>, bytes: Vec<u8>) -> Result<UploadResponse> {
    let base = handle.upload(bytes).await?;
    tracing::info!("Session {}: image {}x{} uploaded", handle.id(), base.width(), base.height());

    Ok(UploadResponse {
        session_id: handle.id(),
        image: encode_image(base).await?,
    })
}

/// Upload into the given session, or into a new one that is dropped again
/// when the upload fails
async fn upload_to_session(state: &AppState, session: Option<Uuid>, bytes: Vec<u8>) -> Result<UploadResponse> {
    let handle = state.sessions.get_or_create(session)?;
    let id = handle.id();

    let result = upload_into(handle, bytes).await;
    if result.is_err() && session.is_none() {
        state.sessions.evict(&id);
    }
    result
}

pub async fn upload(
    State(state): State<AppState>,
    params: std::result::Result<Query<SessionParams>, QueryRejection>,
    ImageUpload(bytes): ImageUpload,
) -> Result<Json<UploadResponse>> {
    let Query(params) = params?;
    Ok(Json(upload_to_session(&state, params.session, bytes).await?))
}

pub async fn add_point(
    State(state): State<AppState>,
    params: std::result::Result<Query<SessionParams>, QueryRejection>,
    body: std::result::Result<Json<PointRequest>, JsonRejection>,
) -> Result<Json<AddPointResponse>> {
    let Query(params) = params?;
    let Json(point) = body?;
    let handle = state.sessions.get(&params.require()?)?;

    let outcome = handle.add_point(point.into(), params.multi_object).await?;
    let objects = outcome.objects.len();
    let (image, mask) = tokio::try_join!(encode_image(outcome.composite), encode_mask(outcome.mask))?;

    Ok(Json(AddPointResponse { image, mask, objects }))
}

pub async fn undo(
    State(state): State<AppState>,
    params: std::result::Result<Query<SessionParams>, QueryRejection>,
) -> Result<Json<ImageResponse>> {
    let Query(params) = params?;
    let handle = state.sessions.get(&params.require()?)?;

    let composite = match handle.undo().await {
        Ok(composite) => composite,
        Err(LocatorError::EmptyHistory) => {
            tracing::debug!("Session {}: nothing to undo", handle.id());
            handle.composite().await?
        }
        Err(e) => return Err(e),
    };

    Ok(Json(ImageResponse {
        image: encode_image(composite).await?,
    }))
}

pub async fn estimate_size(
    State(state): State<AppState>,
    params: std::result::Result<Query<SessionParams>, QueryRejection>,
    body: std::result::Result<Json<SizeQuery>, JsonRejection>,
) -> Result<Json<SizeResponse>> {
    let Query(params) = params?;
    let Json(query) = body?;
    let handle = state.sessions.get(&params.require()?)?;

    let (metadata, mask_fraction) = handle
        .with_session(|session| {
            let metadata = session.metadata()?.clone();
            let fraction = if session.masks().is_empty() {
                None
            } else {
                Some(session.current_mask()?.foreground_fraction())
            };
            Ok((metadata, fraction))
        })
        .await?;

    let request = query.resolve(&metadata, mask_fraction)?;
    let estimate = estimate::estimate_size(state.elevation.as_ref(), &state.estimator, request).await?;

    Ok(Json(SizeResponse {
        distance: estimate.distance,
        finalsize: estimate.area,
        width: estimate.projected.width,
        height: estimate.projected.height,
        tilt: estimate.tilt,
        relative_size: estimate.relative,
    }))
}

pub async fn spam_check(
    State(state): State<AppState>,
    params: std::result::Result<Query<SessionParams>, QueryRejection>,
    ImageUpload(bytes): ImageUpload,
) -> Result<Json<SpamResponse>> {
    let Query(params) = params?;
    let classifier = state
        .spam_filter
        .clone()
        .ok_or(LocatorError::NotConfigured("spam filter"))?;

    let class = run_classifier(classifier, bytes.clone()).await?;
    if classify::is_spam(class) {
        tracing::info!("Rejected upload as not an avalanche photo");
        return Ok(Json(SpamResponse {
            spam: true,
            session_id: None,
            image: None,
        }));
    }

    let uploaded = upload_to_session(&state, params.session, bytes).await?;
    Ok(Json(SpamResponse {
        spam: false,
        session_id: Some(uploaded.session_id),
        image: Some(uploaded.image),
    }))
}

pub async fn avalanche_type(
    State(state): State<AppState>,
    ImageUpload(bytes): ImageUpload,
) -> Result<Json<AvalancheTypeResponse>> {
    let classifier = state
        .type_classifier
        .clone()
        .ok_or(LocatorError::NotConfigured("avalanche type classifier"))?;

    let class = run_classifier(classifier, bytes).await?;
    let kind = AvalancheKind::from_class(class).ok_or_else(|| LocatorError::Collaborator {
        collaborator: "classifier",
        message: format!("unexpected avalanche class {class}"),
    })?;

    tracing::info!("Avalanche type: {}", kind.label());
    Ok(Json(AvalancheTypeResponse {
        avalanche_type: class,
        label: kind.label(),
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode> {
    let Path(id) = id?;
    if state.sessions.evict(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(LocatorError::UnknownSession(id.to_string()))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
    })
}
