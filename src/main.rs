use std::sync::Arc;

use tracing::info;

use soapie_structurer::api::{build_router, AppState};
use soapie_structurer::backend::build_backend;
use soapie_structurer::config::AppConfig;
use soapie_structurer::pipeline::{PipelineSettings, StructuringPipeline};
use soapie_structurer::store::{JsonFilePatientStore, MemoryPatientStore, PatientStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soapie_structurer=info,axum=info".into()),
        )
        .compact()
        .init();

    let cfg = AppConfig::from_env()?;
    let backend = build_backend(&cfg)?;
    let store: Arc<dyn PatientStore> = match cfg.patient_store_path.as_deref() {
        Some(path) => Arc::new(JsonFilePatientStore::new(path)),
        None => Arc::new(MemoryPatientStore::new()),
    };
    let pipeline =
        StructuringPipeline::new(backend, PipelineSettings::from_config(&cfg)).with_store(store);
    let state = Arc::new(AppState::new(cfg.clone(), Arc::new(pipeline)));
    let shutdown = state.shutdown.clone();

    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        model = %cfg.model_name,
        max_attempts = cfg.retry.max_attempts,
        deadline_secs = cfg.pipeline_deadline().as_secs(),
        patient_store = cfg.patient_store_path.as_deref().unwrap_or("memory"),
        "starting soapie-structurer"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
