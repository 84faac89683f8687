use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::app::AppState;

pub(crate) fn start_api_server(cancel: CancellationToken, state: AppState, listen: String) {
    tokio::spawn(async move {
        let app = router(state);

        let listener = match TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API server cannot bind {}: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server listening on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    });
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .nest("/models", crate::handler::model::model_router())
        .nest("/recording", crate::handler::recording::recording_router())
        .nest("/pipeline", crate::handler::pipeline::pipeline_router())
        .with_state(state)
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down API server");
}

async fn index() -> &'static str {
    "pose sandbox"
}
