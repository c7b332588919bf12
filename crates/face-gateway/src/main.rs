use anyhow::{Context, Result};
use face_gateway::{
    analyzer::{mock::MockFaceAnalyzer, onnx::OnnxFaceAnalyzer},
    archive::UnknownFaceArchive,
    config::AnalyzerKind,
    store::{GatewayStore, MemoryStore, PgStore},
    FaceAnalyzer, GatewayConfig, GatewayService, GatewayState, KnownFaces,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("face-gateway");

    let config = GatewayConfig::from_env()?;
    let bind_addr = config.bind_addr;

    let analyzer: Arc<dyn FaceAnalyzer> = match config.analyzer {
        AnalyzerKind::Onnx => {
            let onnx = config.onnx.clone();
            let analyzer = tokio::task::spawn_blocking(move || OnnxFaceAnalyzer::load(onnx))
                .await
                .context("model loading task panicked")??;
            Arc::new(analyzer)
        }
        AnalyzerKind::Mock => {
            warn!("using mock face analyzer; recognitions are not meaningful");
            Arc::new(MockFaceAnalyzer::new())
        }
    };

    let store: Arc<dyn GatewayStore> = match &config.database_url {
        Some(url) => {
            info!(max_connections = config.db_max_connections, "connecting to database");
            Arc::new(PgStore::connect(url, config.db_max_connections).await?)
        }
        None => {
            warn!("DATABASE_URL not set, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let archive = UnknownFaceArchive::open(&config.unknown_faces_dir).await?;

    let faces = KnownFaces::build(store.as_ref(), analyzer.as_ref())
        .await
        .context("failed to load known faces")?;
    let roster = KnownFaces::from_faces(faces);

    let service = Arc::new(GatewayService::new(analyzer, roster, store, archive, config));
    let state = GatewayState::new(service);

    let app = face_gateway::api::router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!(addr = %bind_addr, "face-gateway listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
