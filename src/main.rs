//! Lesion Detection Service - Main Entry Point
//!
//! Discovers and loads the fold ensemble, then serves the prediction API
//! over HTTP. A start with zero usable models is degraded, not fatal:
//! diagnostics stay available and predictions return 503 until remediated.

use anyhow::{Context, Result};
use lesion_detection_service::{
    config::{AppConfig, LoggingConfig},
    metadata::ClassMetadata,
    models::ensemble::EnsembleContext,
    models::loader::ModelLoader,
    server::{self, ServiceContext},
};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration problems fall back to defaults so a misplaced file
    // still produces a diagnosable (degraded) service rather than no
    // service at all.
    let (config, config_err) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    init_logging(&config.logging);
    if let Some(e) = config_err {
        warn!(error = %e, "Failed to load config/config.toml; using defaults");
    }

    info!("Starting Lesion Detection Service");
    info!(
        base_path = %config.models.base_path,
        metadata_path = %config.models.metadata_path,
        tta = config.models.tta,
        "Model configuration"
    );

    let metadata = ClassMetadata::load(Path::new(&config.models.metadata_path));

    let loader = ModelLoader::new(config.models.onnx_threads, config.models.input_size)?;
    let (folds, failures) = loader.load_all(
        Path::new(&config.models.base_path),
        &config.models.fold_prefix,
    );

    let ensemble = EnsembleContext::assemble(folds, failures, metadata.class_names);

    if ensemble.is_degraded() {
        error!("Service starting degraded: no usable fold models; /predict will return 503");
    } else {
        info!(
            models = ensemble.fold_count(),
            classes = ensemble.num_classes(),
            folds = ?ensemble.fold_names(),
            "Ensemble ready"
        );
    }

    let ctx = Arc::new(ServiceContext::new(&config, ensemble));
    let routes = server::routes(ctx);

    let host: IpAddr = config
        .server
        .host
        .parse()
        .context("Invalid server.host in configuration")?;

    info!(host = %host, port = config.server.port, "Serving HTTP API");
    warp::serve(routes).run((host, config.server.port)).await;

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
