use std::future::ready;
use std::path::PathBuf;

use axum::routing::get;
use axum::Router;
use dispatch_client::Client;
use dispatch_worker::{Config, Worker};
use envconfig::Envconfig;
use futures::future::{select, Either};
use health::HealthRegistry;

fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(|| async { "dispatch worker" }))
        .route("/_readiness", get(|| async { "dispatch worker" }))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

async fn listen(app: Router, bind: String) {
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .expect("failed to bind worker health listener");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "worker health server exited");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register(
            "worker".to_string(),
            time::Duration::seconds((config.wait_secs.max(config.beat_interval_secs) as i64) * 4),
        )
        .await;

    let client = Client::new(config.server_url.clone());
    let worker = Worker::new(
        client,
        config.wait(),
        config.beat_interval(),
        config.max_idle(),
        config.whitelist(),
        PathBuf::from(&config.scratch_root),
        worker_liveness,
    );

    tracing::info!(worker_id = %worker.id(), "starting dispatch worker");

    let router = common_metrics::setup_metrics_routes(app(liveness));
    let worker_loop = Box::pin(worker.run());
    let http_server = Box::pin(listen(router, config.health_bind()));

    match select(worker_loop, http_server).await {
        Either::Left(((), _)) => {
            tracing::error!("worker loop exited");
        }
        Either::Right(((), _)) => {
            tracing::error!("worker health server exited");
        }
    }
}
