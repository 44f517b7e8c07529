use std::sync::Arc;

use axum::Router;
use dispatch_server::config::Config;
use dispatch_server::handlers::app;
use dispatch_server::handlers::rpc::RpcState;
use dispatch_server::{dispatcher, gc};
use dispatch_store::Store;
use envconfig::Envconfig;
use health::HealthRegistry;

async fn listen(app: Router, bind: String, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, bind = %bind, "failed to bind listener");
            std::process::exit(1);
        }
    };

    let shutdown_signal = async move {
        let _ = shutdown.changed().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!(error = %err, "http server exited with error");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store = Arc::new(
        Store::open(&config.store_path, config.store_limits())
            .expect("failed to open persistent job store"),
    );

    let liveness = HealthRegistry::new("liveness");
    let dispatcher_liveness = liveness
        .register(
            "dispatcher".to_string(),
            time::Duration::seconds(config.beat_interval_secs as i64 * 4),
        )
        .await;
    let gc_liveness = liveness
        .register(
            "gc".to_string(),
            time::Duration::seconds(config.collect_freq_secs as i64 * 2),
        )
        .await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let timing = config.dispatch_timing();
    let handle = dispatcher::spawn(
        store.clone(),
        timing,
        dispatcher_liveness,
        shutdown_rx.clone(),
    );

    let gc_task = tokio::spawn(gc::gc_loop(store.clone(), timing.collect_freq, gc_liveness));

    let state = RpcState { dispatcher: handle };
    let router = common_metrics::setup_metrics_routes(app::app(state, liveness));

    let server_task = tokio::spawn(listen(router, config.bind(), shutdown_rx));

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = server_task.await;
    gc_task.abort();
}
