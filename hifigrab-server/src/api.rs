//! JSON handlers for `/search`, `/convert` and `/preview`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hifigrab_core::{
    is_accepted_url, resolve_id, CandidateRecord, ConversionError, ConversionRequest,
    EnhanceOptions, FailureKind, SearchError, TargetFormat,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;

/// Error body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_url: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
            kind,
            received_url: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, FailureKind::InvalidInput)
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn invalid_url(url: &str) -> Self {
        Self {
            received_url: Some(url.to_string()),
            ..Self::invalid("Invalid YouTube URL")
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid("Invalid request body").with_details(rejection.body_text())
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err.kind() {
            FailureKind::InvalidInput => {
                ApiError::invalid("Invalid search request").with_details(err.to_string())
            }
            kind => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Search failed", kind)
                .with_details(err.to_string()),
        }
    }
}

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        match &err {
            ConversionError::InvalidUrl { url } => {
                ApiError::invalid_url(url).with_details(err.to_string())
            }
            ConversionError::UnsupportedFormat(_) => {
                ApiError::invalid("Unsupported format").with_details(err.to_string())
            }
            _ => ApiError::new(StatusCode::BAD_REQUEST, "Conversion failed", err.kind())
                .with_details(err.details()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

fn first_page() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub query: String,
    #[serde(default = "first_page")]
    pub page: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<CandidateRecord>,
    pub page: usize,
}

pub async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> ApiResult<SearchResponse> {
    let Json(body) = body?;
    let page = state.search.search(&body.query, body.page).await?;
    Ok(Json(SearchResponse {
        results: page.results,
        page: page.page,
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertBody {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub include_video: bool,
    #[serde(default)]
    pub enhance_options: EnhanceOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub file_path: String,
    pub message: String,
}

pub async fn convert(
    State(state): State<AppState>,
    body: Result<Json<ConvertBody>, JsonRejection>,
) -> ApiResult<ConvertResponse> {
    let Json(body) = body?;
    let url = body.url.trim();
    if !is_accepted_url(url) {
        warn!(url, "rejected conversion url");
        return Err(ApiError::invalid_url(url).with_details("Only YouTube URLs are accepted"));
    }
    let format: TargetFormat = body.format.parse()?;

    let outcome = state
        .pipeline
        .convert(ConversionRequest {
            source_url: url.to_string(),
            format,
            include_video: body.include_video,
            enhance: body.enhance_options,
        })
        .await?;
    info!(path = %outcome.output_path.display(), "conversion finished");
    Ok(Json(ConvertResponse {
        file_path: outcome.output_path.display().to_string(),
        message: outcome.message(),
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewBody {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub video_id: String,
}

pub async fn preview(body: Result<Json<PreviewBody>, JsonRejection>) -> ApiResult<PreviewResponse> {
    let Json(body) = body?;
    let url = body.url.trim();
    let media = resolve_id(url).map_err(|_| ApiError::invalid_url(url))?;
    Ok(Json(PreviewResponse {
        video_id: media.as_str().to_string(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found", FailureKind::InvalidInput)
}
