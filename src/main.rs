use tokio_util::sync::CancellationToken;

mod api;
mod app;
mod config;
mod handler;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("pose_bus", log::LevelFilter::Debug)
        .filter_module("pose_sandbox", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::SandboxConfig::load().unwrap_or_else(|e| {
        log::error!("Error loading config: {:#}", e);
        std::process::exit(1);
    });
    let state = app::AppState::start(&config).await.unwrap_or_else(|e| {
        log::error!("Error starting pipeline: {:#}", e);
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();

    app::spawn_event_logger(state.bus.subscribe(), cancel.clone());

    let cancel_clone = cancel.clone();
    api::start_api_server(cancel_clone, state.clone(), config.api.listen.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    match state.bus.shutdown().await {
        Ok(Some(report)) => log::info!("final recording saved with {} frames", report.frames),
        Ok(None) => {}
        Err(e) => log::warn!("pipeline shutdown: {}", e),
    }
    std::process::exit(0);
}
