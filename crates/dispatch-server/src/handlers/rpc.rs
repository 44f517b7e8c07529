use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use dispatch_types::{Job, JobId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherHandle;
use crate::wire::ApiError;

#[derive(Clone)]
pub struct RpcState {
    pub dispatcher: DispatcherHandle,
}

#[derive(Serialize)]
pub struct SubmitAck {
    #[serde(rename = "Id")]
    pub id: JobId,
}

/// Blocking submit: the reply only comes back once the job reaches a
/// terminal state.
pub async fn submit(
    State(state): State<RpcState>,
    Json(job): Json<Job>,
) -> Result<Json<Job>, ApiError> {
    let completed = state.dispatcher.submit_blocking(job).await?;
    Ok(Json(completed))
}

pub async fn submit_async(
    State(state): State<RpcState>,
    Json(job): Json<Job>,
) -> Result<(StatusCode, Json<SubmitAck>), ApiError> {
    let id = job.id;
    state.dispatcher.submit_async(job).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitAck { id })))
}

#[derive(Deserialize)]
pub struct RetrieveRequest {
    #[serde(rename = "Id")]
    pub id: JobId,
}

pub async fn retrieve(
    State(state): State<RpcState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state.dispatcher.retrieve(req.id).await?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct FetchRequest {
    #[serde(rename = "WorkerId")]
    pub worker_id: WorkerId,
}

pub async fn fetch(
    State(state): State<RpcState>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state.dispatcher.fetch(req.worker_id).await?;
    Ok(Json(job))
}

pub async fn push(
    State(state): State<RpcState>,
    Json(job): Json<Job>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.push(job).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    #[serde(rename = "WorkerId")]
    pub worker_id: WorkerId,
    #[serde(rename = "JobId")]
    pub job_id: JobId,
}

#[derive(Serialize)]
pub struct HeartbeatResponse {
    pub kill: bool,
}

pub async fn heartbeat(
    State(state): State<RpcState>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    let kill = state.dispatcher.beat(req.worker_id, req.job_id).await;
    Json(HeartbeatResponse { kill })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use dispatch_core::{DispatchTiming, StoreLimits};
    use dispatch_store::Store;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let store = Arc::new(Store::open_temporary(StoreLimits::default()).unwrap());
        let liveness = health::HealthRegistry::new("test")
            .register("dispatcher".to_string(), std::time::Duration::from_secs(60))
            .await;
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let dispatcher = crate::dispatcher::spawn(store, DispatchTiming::default(), liveness, rx);
        let state = RpcState { dispatcher };

        Router::new()
            .route("/rpc/submit_async", post(submit_async))
            .route("/rpc/fetch", post(fetch))
            .route("/rpc/heartbeat", post(heartbeat))
            .with_state(state)
    }

    #[tokio::test]
    async fn submit_async_then_fetch_over_http() {
        let app = test_router().await;
        let job = Job::new(vec!["echo".into(), "hi".into()]);
        let body = serde_json::to_string(&job).unwrap();

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc/submit_async")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let worker_id = WorkerId::new();
        let fetch_body = serde_json::to_string(&FetchRequestJson { worker_id }).unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/rpc/fetch")
                    .header("content-type", "application/json")
                    .body(Body::from(fetch_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[derive(Serialize)]
    struct FetchRequestJson {
        #[serde(rename = "WorkerId")]
        worker_id: WorkerId,
    }
}
