//! REST API handlers for upload, schema inspection, cohort analysis and
//! job status, plus operational endpoints.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDateTime;
use cohortlens_core::config::StorageConfig;
use cohortlens_core::frame::parse_timestamp;
use cohortlens_core::types::{AnalysisMetric, AnalysisRequest};
use cohortlens_core::{CohortError, Frame, Granularity};
use cohortlens_engine::{CohortAnalyzer, CohortReport};
use cohortlens_insights::InsightsClient;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::jobs::{JobStatus, JobStore};
use crate::{csv, export};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<CohortAnalyzer>,
    pub insights: Arc<InsightsClient>,
    pub jobs: Arc<JobStore>,
    pub storage: StorageConfig,
    pub max_upload_bytes: usize,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Map an engine failure onto an HTTP status. Validation failures are the
/// caller's problem; everything else is ours.
fn engine_error(e: &CohortError) -> ApiError {
    match e {
        CohortError::Validation(_) | CohortError::Csv(_) => {
            metrics::counter!("api.validation_errors").increment(1);
            api_error(StatusCode::BAD_REQUEST, "analysis_failed", e.to_string())
        }
        _ => {
            metrics::counter!("api.errors").increment(1);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal processing error",
            )
        }
    }
}

/// Reject filenames that could escape the upload directory.
fn safe_filename(name: &str) -> Result<&str, ApiError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_filename",
            format!("invalid filename '{name}'"),
        ));
    }
    Ok(name)
}

// ─── Upload ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub message: String,
}

/// POST /api/upload — store a CSV under a random filename so uploads never
/// overwrite each other.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, "invalid_multipart", e.to_string())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let extension = field
            .file_name()
            .and_then(|n| PathBuf::from(n).extension().map(|e| e.to_string_lossy().into_owned()))
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "csv".to_string());

        let bytes = field.bytes().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, "upload_read_failed", e.to_string())
        })?;
        if bytes.len() > state.max_upload_bytes {
            return Err(api_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "upload_too_large",
                format!("upload exceeds {} bytes", state.max_upload_bytes),
            ));
        }

        let filename = format!("{}.{extension}", Uuid::new_v4().simple());
        let path = PathBuf::from(&state.storage.upload_dir).join(&filename);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            error!(error = %e, path = %path.display(), "failed to store upload");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upload_store_failed",
                "could not store the uploaded file",
            )
        })?;

        metrics::counter!("api.uploads").increment(1);
        info!(filename = %filename, bytes = bytes.len(), "file uploaded");
        return Ok(Json(UploadResponse {
            filename,
            message: "File uploaded successfully".to_string(),
        }));
    }

    Err(api_error(
        StatusCode::BAD_REQUEST,
        "missing_file_field",
        "multipart body must contain a 'file' field",
    ))
}

// ─── Schema ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SchemaQuery {
    pub filename: String,
}

#[derive(Serialize)]
pub struct SchemaResponse {
    pub columns: Vec<String>,
}

/// GET /api/schema — column names of an uploaded CSV.
pub async fn get_schema(
    State(state): State<AppState>,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let filename = safe_filename(&query.filename)?;
    let path = PathBuf::from(&state.storage.upload_dir).join(filename);
    let bytes = read_upload(&path).await?;
    let frame = csv::read_frame(&bytes).map_err(|e| engine_error(&e))?;
    Ok(Json(SchemaResponse {
        columns: frame.columns().to_vec(),
    }))
}

async fn read_upload(path: &std::path::Path) -> Result<Vec<u8>, ApiError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(api_error(
            StatusCode::NOT_FOUND,
            "file_not_found",
            "File not found",
        )),
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to read upload");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "read_failed",
                "could not read the uploaded file",
            ))
        }
    }
}

// ─── Analysis ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Serialize)]
pub struct AnalysisSummary {
    pub total_rows: usize,
    pub columns: Vec<String>,
    pub date_range: DateRange,
    pub unique_users: usize,
    pub cohort_interval: Granularity,
    pub analysis_metric: AnalysisMetric,
    pub note: String,
}

#[derive(Serialize)]
pub struct AnalysisResponse {
    pub job_id: String,
    pub summary: AnalysisSummary,
    pub result: CohortReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_observations: Option<Vec<String>>,
    /// Populated once the background export finishes; poll the status
    /// endpoint.
    pub download_url: Option<String>,
}

/// POST /api/analysis — run the full cohort analysis over an uploaded CSV.
pub async fn analyze(
    State(state): State<AppState>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let granularity =
        Granularity::parse(&payload.interval).map_err(|e| engine_error(&e))?;
    let filename = safe_filename(&payload.filename)?;

    let path = PathBuf::from(&state.storage.upload_dir).join(filename);
    let bytes = read_upload(&path).await?;
    let mut frame = csv::read_frame(&bytes).map_err(|e| engine_error(&e))?;

    apply_date_filter(&mut frame, &payload)?;
    apply_column_subset(&mut frame, &payload);
    if let Some(options) = &payload.preprocessing {
        cohortlens_preprocess::preprocess_frame(&mut frame, options);
    }

    let summary = summarize_frame(&frame, &payload, granularity);

    let revenue_col = match payload.metric {
        AnalysisMetric::Revenue => payload.revenue_col.clone(),
        AnalysisMetric::Retention => None,
    };

    let job_id = Uuid::new_v4().simple().to_string();
    state.jobs.save(&job_id);
    info!(job_id = %job_id, granularity = %granularity, rows = frame.len(), "analysis started");

    // Bucketing and pivoting are the only potentially expensive steps; keep
    // them off the async workers.
    let analyzer = state.analyzer.clone();
    let request = payload.clone();
    let report = tokio::task::spawn_blocking(move || {
        analyzer.analyze(
            &frame,
            &request.user_id_col,
            &request.cohort_col,
            &request.event_col,
            granularity,
            revenue_col.as_deref(),
        )
    })
    .await
    .map_err(|e| {
        state.jobs.update(&job_id, JobStatus::Failed, None);
        error!(error = %e, "analysis task panicked");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal processing error",
        )
    })?
    .map_err(|e| {
        state.jobs.update(&job_id, JobStatus::Failed, None);
        warn!(job_id = %job_id, error = %e, "cohort analysis failed");
        engine_error(&e)
    })?;

    let llm_observations = request_observations(&state, &payload, &report).await;

    tokio::spawn(export::export_results(
        state.jobs.clone(),
        PathBuf::from(&state.storage.export_dir),
        job_id.clone(),
        report.clone(),
    ));

    metrics::counter!("api.analyses").increment(1);
    info!(job_id = %job_id, cohorts = report.cohort_sizes.len(), "analysis completed");
    Ok(Json(AnalysisResponse {
        job_id,
        summary,
        result: report,
        llm_observations,
        download_url: None,
    }))
}

/// Keep rows whose event timestamp falls inside the requested window.
/// With a window present, rows whose event date does not parse are dropped.
fn apply_date_filter(frame: &mut Frame, payload: &AnalysisRequest) -> Result<(), ApiError> {
    let parse_bound = |raw: &Option<String>, name: &str| -> Result<Option<NaiveDateTime>, ApiError> {
        match raw {
            None => Ok(None),
            Some(value) => parse_timestamp(value).map(Some).ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_date",
                    format!("could not parse {name} '{value}'"),
                )
            }),
        }
    };
    let start = parse_bound(&payload.start_date, "start_date")?;
    let end = parse_bound(&payload.end_date, "end_date")?;
    if start.is_none() && end.is_none() {
        return Ok(());
    }

    let Some(event_idx) = frame.column_index(&payload.event_col) else {
        // The engine reports the missing column with a proper message.
        return Ok(());
    };
    frame.retain_rows(|row| match row[event_idx].as_timestamp() {
        Some(ts) => start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts <= e),
        None => false,
    });
    Ok(())
}

/// Project onto the requested columns, always retaining the role columns.
fn apply_column_subset(frame: &mut Frame, payload: &AnalysisRequest) {
    let Some(requested) = &payload.columns else {
        return;
    };
    let mut keep: Vec<String> = requested.clone();
    for role in [
        Some(&payload.user_id_col),
        Some(&payload.cohort_col),
        Some(&payload.event_col),
        payload.revenue_col.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        if !keep.contains(role) {
            keep.push(role.clone());
        }
    }
    *frame = frame.select(&keep);
}

fn summarize_frame(
    frame: &Frame,
    payload: &AnalysisRequest,
    granularity: Granularity,
) -> AnalysisSummary {
    let unique_users = frame
        .column_index(&payload.user_id_col)
        .map(|idx| {
            frame
                .column(idx)
                .filter(|c| !c.is_null())
                .map(|c| c.display())
                .collect::<HashSet<_>>()
                .len()
        })
        .unwrap_or(0);

    let timestamps: Vec<NaiveDateTime> = frame
        .column_index(&payload.event_col)
        .map(|idx| frame.column(idx).filter_map(|c| c.as_timestamp()).collect())
        .unwrap_or_default();
    let format = |ts: &NaiveDateTime| ts.format("%Y-%m-%dT%H:%M:%S").to_string();
    let date_range = DateRange {
        start: timestamps.iter().min().map(format),
        end: timestamps.iter().max().map(format),
    };

    let note = match payload.metric {
        AnalysisMetric::Retention => {
            format!("Retention analysis completed with {granularity} cohorts")
        }
        AnalysisMetric::Revenue => {
            format!("Revenue analysis completed with {granularity} cohorts")
        }
    };

    AnalysisSummary {
        total_rows: frame.len(),
        columns: frame.columns().to_vec(),
        date_range,
        unique_users,
        cohort_interval: granularity,
        analysis_metric: payload.metric,
        note,
    }
}

/// Ask the insights collaborator for key observations. Failures reduce to
/// no observations; the analysis result is already complete.
async fn request_observations(
    state: &AppState,
    payload: &AnalysisRequest,
    report: &CohortReport,
) -> Option<Vec<String>> {
    if !payload.llm_insights || !state.insights.is_enabled() {
        return None;
    }
    let value = match serde_json::to_value(report) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "could not serialize report for insights");
            return None;
        }
    };
    match state.insights.key_observations(&value).await {
        Ok(observations) => Some(observations),
        Err(e) => {
            warn!(error = %e, "insights request failed");
            None
        }
    }
}

// ─── Job status ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatusQuery {
    pub job_id: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    pub download_url: Option<String>,
}

/// GET /api/analysis-status — export progress for a job.
pub async fn analysis_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    match state.jobs.get(&query.job_id) {
        Some(record) => Ok(Json(StatusResponse {
            status: record.status,
            download_url: record.download_url,
        })),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "job_not_found",
            "Job not found",
        )),
    }
}

// ─── Operational endpoints ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if std::path::Path::new(&state.storage.upload_dir).is_dir() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohortlens_core::Cell;

    fn payload() -> AnalysisRequest {
        serde_json::from_value(serde_json::json!({
            "filename": "orders.csv",
            "user_id_col": "user",
            "cohort_col": "date",
            "event_col": "date",
            "metric": "retention",
            "interval": "monthly"
        }))
        .unwrap()
    }

    fn frame() -> Frame {
        let mut f = Frame::new(vec![
            "user".to_string(),
            "date".to_string(),
            "amount".to_string(),
        ]);
        for (u, d, a) in [
            ("a", "2024-01-05", 10.0),
            ("a", "2024-02-10", 5.0),
            ("b", "2024-03-01", 7.0),
        ] {
            f.push_row(vec![
                Cell::Str(u.to_string()),
                Cell::Str(d.to_string()),
                Cell::Float(a),
            ])
            .unwrap();
        }
        f
    }

    #[test]
    fn test_safe_filename_rejects_traversal() {
        assert!(safe_filename("ok.csv").is_ok());
        for bad in ["../etc/passwd", "a/b.csv", "a\\b.csv", ""] {
            assert!(safe_filename(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_date_filter_window() {
        let mut f = frame();
        let mut p = payload();
        p.start_date = Some("2024-02-01".to_string());
        p.end_date = Some("2024-02-28".to_string());
        apply_date_filter(&mut f, &p).unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f.cell(0, 0).as_str(), Some("a"));
    }

    #[test]
    fn test_date_filter_rejects_bad_bound() {
        let mut f = frame();
        let mut p = payload();
        p.start_date = Some("not-a-date".to_string());
        assert!(apply_date_filter(&mut f, &p).is_err());
    }

    #[test]
    fn test_column_subset_keeps_role_columns() {
        let mut f = frame();
        let mut p = payload();
        p.columns = Some(vec!["amount".to_string()]);
        apply_column_subset(&mut f, &p);
        assert!(f.has_column("amount"));
        assert!(f.has_column("user"));
        assert!(f.has_column("date"));
    }

    #[test]
    fn test_summary_counts_users_and_dates() {
        let f = frame();
        let summary = summarize_frame(&f, &payload(), Granularity::Monthly);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.date_range.start.as_deref(), Some("2024-01-05T00:00:00"));
        assert_eq!(summary.date_range.end.as_deref(), Some("2024-03-01T00:00:00"));
        assert!(summary.note.contains("monthly"));
    }
}
