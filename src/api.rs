use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{error_response, verify_bearer},
    models::{JobRecord, JobState, RebuildAcceptedResponse, RebuildRequest},
    rebuild, AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

fn job_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "JOB_NOT_FOUND", "Rebuild job not found.")
}

pub async fn create_rebuild(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RebuildRequest>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err;
    }

    if let Err(err) = rebuild::plan(&state.indexers, &payload.apps, payload.from_scratch) {
        return error_response(StatusCode::BAD_REQUEST, "INVALID_REBUILD_REQUEST", err.to_string());
    }

    let now = Utc::now();
    let job_id = Uuid::new_v4().to_string();
    let record = JobRecord::queued(job_id.clone(), payload, now);
    let message = record.message.clone();

    {
        let mut jobs = state.jobs.write().await;
        jobs.insert(job_id.clone(), record);
    }

    if state.queue_tx.send(job_id.clone()).await.is_err() {
        let mut jobs = state.jobs.write().await;
        jobs.remove(&job_id);
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_UNAVAILABLE",
            "Rebuild queue is unavailable.",
        );
    }

    let response = RebuildAcceptedResponse {
        job_id,
        status: JobState::Queued,
        progress: 0.0,
        message,
        created_at: now,
    };

    (StatusCode::ACCEPTED, Json(response)).into_response()
}

pub async fn get_rebuild(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err;
    }

    let jobs = state.jobs.read().await;
    let Some(job) = jobs.get(&job_id) else {
        return job_not_found();
    };

    (StatusCode::OK, Json(job.to_response())).into_response()
}

/// A queued job is never picked up; a running one stops before its next alias.
pub async fn cancel_rebuild(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    if let Err(err) = verify_bearer(&headers, &state.config.api_key) {
        return err;
    }

    let mut jobs = state.jobs.write().await;
    let Some(job) = jobs.get_mut(&job_id) else {
        return job_not_found();
    };

    if matches!(job.status, JobState::Queued | JobState::Running) {
        job.status = JobState::Canceled;
        job.updated_at = Utc::now();
        job.message = Some("Rebuild canceled".to_string());
        job.error = None;
    }

    (StatusCode::OK, Json(job.to_response())).into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::to_bytes,
        http::{header::AUTHORIZATION, HeaderValue},
    };
    use serde_json::Value;

    use super::*;
    use crate::test_state;

    fn bearer(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}")).unwrap());
        headers
    }

    async fn read(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn request(apps: &[&str]) -> Json<RebuildRequest> {
        Json(RebuildRequest {
            apps: apps.iter().map(|app| app.to_string()).collect(),
            from_scratch: false,
        })
    }

    #[tokio::test]
    async fn create_then_fetch_and_cancel() {
        let (state, mut rx) = test_state(3600);
        let headers = bearer(&state.config.api_key);

        let (status, body) = read(
            create_rebuild(State(state.clone()), headers.clone(), request(&["officers"]))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["jobId"].as_str().unwrap().to_string();
        assert_eq!(rx.recv().await.unwrap(), job_id);

        let (status, body) = read(
            get_rebuild(State(state.clone()), headers.clone(), Path(job_id.clone()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["apps"], json!(["officers"]));

        let (status, body) = read(
            cancel_rebuild(State(state), headers, Path(job_id))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "canceled");
    }

    #[tokio::test]
    async fn unknown_app_is_rejected() {
        let (state, _rx) = test_state(3600);
        let headers = bearer(&state.config.api_key);
        let (status, body) = read(
            create_rebuild(State(state), headers, request(&["trr"]))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_REBUILD_REQUEST");
    }

    #[tokio::test]
    async fn wrong_key_and_missing_job() {
        let (state, _rx) = test_state(3600);
        let headers = bearer(&state.config.api_key);

        let (status, _) = read(
            get_rebuild(State(state.clone()), bearer("wrong"), Path("nope".to_string()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = read(
            get_rebuild(State(state), headers, Path("nope".to_string()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "JOB_NOT_FOUND");
    }
}
