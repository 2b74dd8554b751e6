//! HTTP surface: predict, health, classes and root routes (warp-based).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BufMut;
use chrono::Utc;
use futures::TryStreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::config::AppConfig;
use crate::error::PredictError;
use crate::metrics::ServiceMetrics;
use crate::models::ensemble::EnsembleContext;
use crate::models::risk::RiskScorer;
use crate::preprocess::Preprocessor;
use crate::types::response::{
    rank_predictions, ClassesResponse, ErrorResponse, HealthResponse, PredictResponse,
    StatusResponse,
};

const SERVICE_NAME: &str = "Lesion Detection API";

/// Immutable per-process state shared by every request handler.
pub struct ServiceContext {
    pub ensemble: EnsembleContext,
    pub preprocessor: Preprocessor,
    pub risk: RiskScorer,
    pub metrics: ServiceMetrics,
    pub model_version: String,
    pub tta_enabled: bool,
    pub inference_timeout: Duration,
    pub max_upload_bytes: u64,
    pub allowed_origins: Vec<String>,
    pub model_base_path: String,
    pub metadata_path: String,
}

/// Shared service context.
pub type SharedContext = Arc<ServiceContext>;

impl ServiceContext {
    /// Assemble the request-handling state from configuration and the
    /// startup-built ensemble.
    pub fn new(config: &AppConfig, ensemble: EnsembleContext) -> Self {
        Self {
            ensemble,
            preprocessor: Preprocessor::new(config.models.input_size),
            risk: RiskScorer::new(
                config.risk.malignant_indices.clone(),
                config.risk.threshold,
            ),
            metrics: ServiceMetrics::new(),
            model_version: config.models.version.clone(),
            tta_enabled: config.models.tta,
            inference_timeout: Duration::from_millis(config.models.inference_timeout_ms),
            max_upload_bytes: config.server.max_upload_bytes,
            allowed_origins: config.server.allowed_origins.clone(),
            model_base_path: config.models.base_path.clone(),
            metadata_path: config.models.metadata_path.clone(),
        }
    }
}

/// Build all service routes.
pub fn routes(
    ctx: SharedContext,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let predict = warp::path("predict")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(ctx.max_upload_bytes))
        .and(with_context(ctx.clone()))
        .and_then(handle_predict);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_health);

    let classes = warp::path("classes")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_classes);

    let root = warp::path::end()
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handle_root);

    let cors = build_cors(&ctx.allowed_origins);

    predict
        .or(health)
        .or(classes)
        .or(root)
        .recover(handle_rejection)
        .with(cors)
}

fn build_cors(allowed_origins: &[String]) -> warp::cors::Builder {
    let cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        cors.allow_any_origin()
    } else {
        cors.allow_origins(allowed_origins.iter().map(|s| s.as_str()))
    }
}

fn with_context(
    ctx: SharedContext,
) -> impl Filter<Extract = (SharedContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_predict(
    form: FormData,
    ctx: SharedContext,
) -> Result<warp::reply::Response, Infallible> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    ctx.metrics.record_request();

    if ctx.ensemble.is_degraded() {
        ctx.metrics.record_unavailable();
        warn!(%request_id, "Prediction rejected: no models loaded");
        return Ok(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No models loaded. Service is unavailable.",
        ));
    }

    let bytes = match read_image_part(form).await {
        Ok(bytes) => bytes,
        Err(e) => {
            ctx.metrics.record_client_error();
            warn!(%request_id, error = %e, "Prediction rejected: bad upload");
            return Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    info!(%request_id, size_bytes = bytes.len(), "Processing prediction request");

    // Decode and inference are CPU-bound; run them off the async executor
    // with a defensive timeout so a hung model call cannot pin the request
    // forever.
    let worker = ctx.clone();
    let task = tokio::task::spawn_blocking(move || -> Result<_, PredictError> {
        let tensor = worker.preprocessor.preprocess(&bytes)?;
        worker.ensemble.predict(&tensor, worker.tta_enabled)
    });

    let outcome = match tokio::time::timeout(ctx.inference_timeout, task).await {
        Err(_) => {
            ctx.metrics.record_internal_error();
            let e = PredictError::Timeout(ctx.inference_timeout);
            error!(%request_id, error = %e, "Prediction aborted");
            return Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()));
        }
        Ok(Err(join_err)) => {
            ctx.metrics.record_internal_error();
            error!(%request_id, error = %join_err, "Prediction task failed");
            return Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Prediction failed unexpectedly",
            ));
        }
        Ok(Ok(Err(e))) => {
            let status = predict_status(&e);
            if status == StatusCode::BAD_REQUEST {
                ctx.metrics.record_client_error();
            } else if status == StatusCode::SERVICE_UNAVAILABLE {
                ctx.metrics.record_unavailable();
            } else {
                ctx.metrics.record_internal_error();
            }
            warn!(%request_id, error = %e, status = status.as_u16(), "Prediction failed");
            return Ok(error_response(status, &e.to_string()));
        }
        Ok(Ok(Ok(outcome))) => outcome,
    };

    let top_k = outcome.probabilities.len().min(5);
    let top_predictions =
        rank_predictions(&outcome.probabilities, ctx.ensemble.class_names(), top_k);
    let risk = ctx.risk.assess(&outcome.probabilities);

    let latency = started.elapsed();
    ctx.metrics.record_prediction(latency);

    info!(
        %request_id,
        top1 = top_predictions.first().map(|p| p.label_name.as_str()).unwrap_or("-"),
        malignant_probability = risk.probability,
        folds_used = outcome.folds_used.len(),
        latency_us = latency.as_micros() as u64,
        "Prediction successful"
    );

    let response = PredictResponse {
        success: true,
        model_version: ctx.model_version.clone(),
        folds_used: outcome.folds_used,
        tta_enabled: ctx.tta_enabled,
        top1_label: top_predictions.first().map(|p| p.label_name.clone()),
        top1_confidence: top_predictions.first().map(|p| p.confidence),
        top_predictions,
        malignant_probability: risk.probability,
        malignant_flag: risk.flagged,
    };

    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK).into_response())
}

async fn handle_health(ctx: SharedContext) -> Result<warp::reply::Response, Infallible> {
    let available = !ctx.ensemble.is_degraded();
    let response = HealthResponse {
        status: if available { "healthy" } else { "unhealthy" }.to_string(),
        models_loaded: ctx.ensemble.fold_count(),
        loaded_folds: ctx.ensemble.fold_names(),
        failed_folds: ctx.ensemble.failures().to_vec(),
        classes: ctx.ensemble.num_classes(),
        class_names_count: ctx.ensemble.class_names().len(),
        model_base_path: ctx.model_base_path.clone(),
        metadata_path: ctx.metadata_path.clone(),
        models_available: available,
        metrics: ctx.metrics.snapshot(),
        timestamp: Utc::now(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK).into_response())
}

async fn handle_classes(ctx: SharedContext) -> Result<warp::reply::Response, Infallible> {
    let names = ctx.ensemble.class_names().to_vec();
    let response = ClassesResponse {
        total: names.len(),
        num_classes: ctx.ensemble.num_classes(),
        classes: names,
    };
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK).into_response())
}

async fn handle_root(ctx: SharedContext) -> Result<warp::reply::Response, Infallible> {
    let available = !ctx.ensemble.is_degraded();
    let response = StatusResponse {
        status: if available { "online" } else { "degraded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: ctx.model_version.clone(),
        models_loaded: ctx.ensemble.fold_count(),
        num_classes: ctx.ensemble.num_classes(),
        message: if available {
            "API is ready".to_string()
        } else {
            "No models loaded".to_string()
        },
    };
    Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK).into_response())
}

// =============================================================================
// Helpers
// =============================================================================

/// Pull the uploaded image bytes out of the multipart form.
///
/// The upload must be a part carrying a filename (or named "file") whose
/// declared content type begins with `image/`.
async fn read_image_part(mut form: FormData) -> Result<Vec<u8>, PredictError> {
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| PredictError::Decode(format!("invalid multipart body: {}", e)))?
    {
        if part.filename().is_none() && part.name() != "file" {
            continue;
        }

        let is_image = part
            .content_type()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            return Err(PredictError::NotAnImage);
        }

        let bytes = part
            .stream()
            .try_fold(Vec::new(), |mut acc, data| {
                acc.put(data);
                async move { Ok(acc) }
            })
            .await
            .map_err(|e| PredictError::Decode(format!("failed to read upload: {}", e)))?;
        return Ok(bytes);
    }

    Err(PredictError::MissingImage)
}

fn predict_status(err: &PredictError) -> StatusCode {
    match err {
        PredictError::MissingImage | PredictError::NotAnImage | PredictError::Decode(_) => {
            StatusCode::BAD_REQUEST
        }
        PredictError::NoModels | PredictError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
        PredictError::Timeout(_) | PredictError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: &str) -> warp::reply::Response {
    let body = ErrorResponse {
        success: false,
        error: message.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not found"));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Upload too large",
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }

    // Remaining rejections come from request parsing (e.g. a body that is
    // not multipart/form-data).
    warn!(rejection = ?err, "Rejected request");
    Ok(error_response(StatusCode::BAD_REQUEST, "Invalid request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ensemble::test_support;
    use crate::models::loader::LoadedFold;
    use serde_json::Value;

    fn test_context(folds: Vec<LoadedFold>) -> SharedContext {
        let metadata = vec!["Melanoma".to_string(), "Nevus".to_string()];
        let ensemble = EnsembleContext::assemble(folds, Vec::new(), metadata);
        Arc::new(ServiceContext::new(&AppConfig::default(), ensemble))
    }

    fn multipart_body(boundary: &str, content_type: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\ncontent-disposition: form-data; name=\"file\"; filename=\"lesion.png\"\r\ncontent-type: {ct}\r\n\r\n",
                b = boundary,
                ct = content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{b}--\r\n", b = boundary).as_bytes());
        body
    }

    fn png_bytes() -> Vec<u8> {
        use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
        use std::io::Cursor;

        let img = RgbImage::from_pixel(8, 8, Rgb([120, 80, 40]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode test image");
        bytes.into_inner()
    }

    #[tokio::test]
    async fn test_health_is_200_when_degraded() {
        let filter = routes(test_context(Vec::new()));
        let res = warp::test::request().path("/health").reply(&filter).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["models_loaded"], 0);
        assert_eq!(body["models_available"], false);
    }

    #[tokio::test]
    async fn test_classes_returns_aligned_labels() {
        let filter = routes(test_context(Vec::new()));
        let res = warp::test::request().path("/classes").reply(&filter).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["total"], 2);
        assert_eq!(body["classes"][0], "Melanoma");
        assert_eq!(body["classes"][1], "Nevus");
    }

    #[tokio::test]
    async fn test_root_reports_degraded() {
        let filter = routes(test_context(Vec::new()));
        let res = warp::test::request().path("/").reply(&filter).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_predict_degraded_is_503() {
        let filter = routes(test_context(Vec::new()));
        let body = multipart_body("xyz", "image/png", &png_bytes());
        let res = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_predict_rejects_non_image_part() {
        let folds = vec![test_support::fixed("fold0", vec![1.0, 0.0])];
        let filter = routes(test_context(folds));
        let body = multipart_body("xyz", "text/plain", b"hello");
        let res = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_rejects_undecodable_image() {
        let folds = vec![test_support::fixed("fold0", vec![1.0, 0.0])];
        let filter = routes(test_context(folds));
        let body = multipart_body("xyz", "image/png", b"not really a png");
        let res = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_predict_success_with_fixed_fold() {
        // One fold with a strong logit at index 0 ("Melanoma").
        let folds = vec![test_support::fixed("fold0", vec![20.0, 0.0])];
        let filter = routes(test_context(folds));
        let body = multipart_body("xyz", "image/png", &png_bytes());
        let res = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).expect("json body");
        assert_eq!(body["success"], true);
        assert_eq!(body["top1_label"], "Melanoma");
        assert_eq!(body["folds_used"][0], 0);
        assert!(body["top1_confidence"].as_f64().expect("confidence") > 0.999);
        // Default risk indices cover index 0, so all mass is malignant.
        assert_eq!(body["malignant_flag"], true);
    }

    #[tokio::test]
    async fn test_predict_all_folds_failing_is_503() {
        let folds = vec![
            test_support::failing("fold0", 2),
            test_support::failing("fold1", 2),
        ];
        let filter = routes(test_context(folds));
        let body = multipart_body("xyz", "image/png", &png_bytes());
        let res = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "multipart/form-data; boundary=xyz")
            .body(body)
            .reply(&filter)
            .await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let filter = routes(test_context(Vec::new()));
        let res = warp::test::request().path("/nope").reply(&filter).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
