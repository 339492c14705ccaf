//! Routes and handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use clyrdia_core::fix::FixValidationRequest;
use clyrdia_core::{BatchItem, FixRequest, Industry};
use clyrdia_engine::{AdmissionFacade, Submission, Upload};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::caller::{Caller, request_id};
use crate::error::ApiError;

pub const API_PREFIX: &str = "/api/v1";
pub const HEALTH_PATH: &str = "/health";
const DEFAULT_ANALYTICS_DAYS: u32 = 30;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<AdmissionFacade>,
}

/// Routes under [`API_PREFIX`] plus the root welcome and health routes.
pub fn routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze/stream", post(analyze_stream))
        .route("/fix/validate", post(validate_fix))
        .route("/fix/{issue_id}", post(apply_fix))
        .route("/fix/{issue_id}/suggest", post(suggest_fix))
        .route("/templates/{industry}", get(templates))
        .route(HEALTH_PATH, get(health))
        .route("/jobs/analyze", post(submit_job))
        .route("/jobs/batch", post(submit_batch))
        .route("/jobs/reanalyze/{analysis_id}", post(submit_reanalysis))
        .route("/jobs/{job_id}", get(job))
        .route("/analyses", get(client_analyses))
        .route("/analyses/fingerprint/{fingerprint}", get(analysis_by_fingerprint))
        .route("/analyses/{analysis_id}", get(analysis).delete(delete_analysis))
        .route("/analytics", get(analytics));

    Router::new()
        .route("/", get(root))
        .route(HEALTH_PATH, get(health))
        .nest(API_PREFIX, api)
        .with_state(state)
}

// ── Request bodies ──

/// JSON body with rejections rendered as [`ApiError`].
pub struct Payload<T>(pub T);

impl<T: DeserializeOwned, S: Send + Sync> FromRequest<S> for Payload<T> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let id = request_id(req.headers());
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|e| ApiError::new(e.status(), e.body_text()).with_request_id(id))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeBody {
    #[serde(default)]
    contract_text: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default, alias = "analysis_type")]
    analysis_types: Vec<String>,
}

fn parse_industry(raw: Option<&str>) -> Result<Option<Industry>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request("Invalid industry specified")),
    }
}

/// An analysis submission, from either a JSON body or a multipart form
/// with `contract_text`, `industry`, `analysis_type` and `file_upload`.
pub struct SubmissionForm(pub Submission);

impl<S: Send + Sync> FromRequest<S> for SubmissionForm {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let id = request_id(req.headers());
        let multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        let submission = if multipart {
            let form = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))
                .map_err(|e| e.with_request_id(&id))?;
            read_form(form).await
        } else {
            let Payload(body) = Payload::<AnalyzeBody>::from_request(req, state).await?;
            parse_industry(body.industry.as_deref()).map(|industry| Submission {
                text: body.contract_text,
                upload: None,
                industry,
                analysis_types: body.analysis_types,
            })
        };
        submission.map(Self).map_err(|e| e.with_request_id(id))
    }
}

async fn read_form(mut form: Multipart) -> Result<Submission, ApiError> {
    let field_error = |e: axum::extract::multipart::MultipartError| ApiError::new(e.status(), e.body_text());
    let mut submission = Submission::default();
    let mut industry = None;

    while let Some(field) = form.next_field().await.map_err(field_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "contract_text" => submission.text = Some(field.text().await.map_err(field_error)?),
            "industry" => industry = Some(field.text().await.map_err(field_error)?),
            "analysis_type" | "analysis_types" => {
                let value = field.text().await.map_err(field_error)?;
                submission
                    .analysis_types
                    .extend(value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
            }
            "file_upload" | "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(field_error)?;
                if !bytes.is_empty() {
                    submission.upload = Some(Upload {
                        bytes: bytes.to_vec(),
                        filename,
                        content_type,
                    });
                }
            }
            _ => {}
        }
    }
    submission.industry = parse_industry(industry.as_deref())?;
    Ok(submission)
}

// ── Analysis ──

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to Clyrdia Contract Intelligence API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.facade.health().await)
}

async fn analyze(
    State(state): State<AppState>,
    caller: Caller,
    SubmissionForm(submission): SubmissionForm,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .facade
        .analyze(&caller.client, submission)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(record))
}

async fn analyze_stream(
    State(state): State<AppState>,
    caller: Caller,
    SubmissionForm(submission): SubmissionForm,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let frames = state
        .facade
        .analyze_stream(&caller.client, submission)
        .map_err(|e| caller.fail(e))?;
    let events = frames.map(|frame| Event::default().json_data(frame));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ── Fixes and templates ──

async fn apply_fix(
    State(state): State<AppState>,
    caller: Caller,
    Path(issue_id): Path<String>,
    Payload(request): Payload<FixRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .facade
        .apply_fix(&caller.client, &issue_id, request)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
struct SuggestBody {
    #[serde(default)]
    context: Option<String>,
}

async fn suggest_fix(
    State(state): State<AppState>,
    caller: Caller,
    Path(issue_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: SuggestBody = if body.is_empty() {
        SuggestBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::bad_request(format!("Invalid request body: {e}")).with_request_id(&caller.request_id)
        })?
    };
    let suggestion = state
        .facade
        .suggest_fix(&caller.client, &issue_id, body.context.as_deref())
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(suggestion))
}

async fn validate_fix(
    State(state): State<AppState>,
    caller: Caller,
    Payload(request): Payload<FixValidationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let verdict = state
        .facade
        .validate_fix(
            &caller.client,
            &request.original_text,
            &request.proposed_fix,
            &request.issue_description,
        )
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(verdict))
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    #[serde(default)]
    contract_type: Option<String>,
    #[serde(default = "TemplateQuery::default_include_variables")]
    include_variables: bool,
}

impl TemplateQuery {
    fn default_include_variables() -> bool {
        true
    }
}

async fn templates(
    State(state): State<AppState>,
    caller: Caller,
    Path(industry): Path<String>,
    Query(query): Query<TemplateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let library = state
        .facade
        .templates(
            &caller.client,
            &industry,
            query.contract_type.as_deref(),
            query.include_variables,
        )
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(library))
}

// ── Jobs ──

async fn submit_job(
    State(state): State<AppState>,
    caller: Caller,
    SubmissionForm(submission): SubmissionForm,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .facade
        .submit_job(&caller.client, submission)
        .map_err(|e| caller.fail(e))?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    contracts: Vec<BatchItem>,
}

async fn submit_batch(
    State(state): State<AppState>,
    caller: Caller,
    Payload(body): Payload<BatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .facade
        .submit_batch(&caller.client, body.contracts)
        .map_err(|e| caller.fail(e))?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
struct ReanalysisBody {
    #[serde(default)]
    analysis_types: Option<Vec<String>>,
}

async fn submit_reanalysis(
    State(state): State<AppState>,
    caller: Caller,
    Path(analysis_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: ReanalysisBody = if body.is_empty() {
        ReanalysisBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::bad_request(format!("Invalid request body: {e}")).with_request_id(&caller.request_id)
        })?
    };
    let job = state
        .facade
        .submit_reanalysis(&caller.client, &analysis_id, body.analysis_types)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn job(
    State(state): State<AppState>,
    caller: Caller,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .facade
        .job(&caller.client, &job_id)
        .map_err(|e| caller.fail(e))?;
    Ok(Json(job))
}

// ── Stored analyses ──

async fn client_analyses(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .facade
        .client_analyses(&caller.client)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(records))
}

async fn analysis(
    State(state): State<AppState>,
    caller: Caller,
    Path(analysis_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .facade
        .analysis(&caller.client, &analysis_id)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(record))
}

async fn analysis_by_fingerprint(
    State(state): State<AppState>,
    caller: Caller,
    Path(fingerprint): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .facade
        .analysis_by_fingerprint(&caller.client, &fingerprint)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(record))
}

async fn delete_analysis(
    State(state): State<AppState>,
    caller: Caller,
    Path(analysis_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .facade
        .delete_analysis(&caller.client, &analysis_id)
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    #[serde(default)]
    days: Option<u32>,
}

async fn analytics(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .facade
        .analytics(&caller.client, query.days.unwrap_or(DEFAULT_ANALYTICS_DAYS))
        .await
        .map_err(|e| caller.fail(e))?;
    Ok(Json(summary))
}
