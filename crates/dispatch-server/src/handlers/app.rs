use std::future::ready;

use axum::routing::{get, post};
use axum::Router;
use health::HealthRegistry;
use tower_http::cors::{Any, CorsLayer};

use super::rest::{get_job, get_job_outfiles, list_jobs, post_job, post_job_infile, post_job_outfiles};
use super::rpc::{fetch, heartbeat, push, retrieve, submit, submit_async, RpcState};

pub fn app(state: RpcState, liveness: HealthRegistry) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/api/v1/rpc/submit", post(submit))
        .route("/api/v1/rpc/submit_async", post(submit_async))
        .route("/api/v1/rpc/retrieve", post(retrieve))
        .route("/api/v1/rpc/fetch", post(fetch))
        .route("/api/v1/rpc/push", post(push))
        .route("/api/v1/rpc/heartbeat", post(heartbeat))
        .route("/api/v1/job/:jobid", get(get_job))
        .route("/api/v1/job/", post(post_job))
        .route("/api/v1/job-infile", post(post_job_infile))
        .route(
            "/api/v1/job-outfiles/:jobid",
            get(get_job_outfiles).post(post_job_outfiles),
        )
        .route("/api/v1/jobs", get(list_jobs))
        .layer(cors)
        .with_state(state)
}

pub async fn index() -> &'static str {
    "dispatch server"
}
