//! voxkey-server entry point: configuration, tracing, metrics, storage and
//! pipeline wiring, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voxkey_config::{load_settings, Settings};
use voxkey_core::traits::{Asr, AudioDecoder, EmbeddingExtractor, GalleryStore, Vad};
use voxkey_persistence::SqliteGalleryStore;
use voxkey_pipeline::decoder::WavPcmDecoder;
use voxkey_pipeline::vad::{EnergyVad, VadConfig};
use voxkey_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOXKEY_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            eprintln!(
                "loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("warning: failed to load config: {e}. using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting voxkey-server");
    tracing::info!(
        environment = ?settings.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "configuration loaded"
    );

    let metrics_handle = init_metrics();
    tracing::info!("initialized Prometheus metrics at /metrics");

    let gallery: Arc<dyn GalleryStore> = Arc::new(SqliteGalleryStore::open(&settings.gallery.db_path).map_err(
        |e| format!("failed to open gallery store at {}: {e}", settings.gallery.db_path),
    )?);
    tracing::info!(path = %settings.gallery.db_path, "opened gallery store");

    let decoder: Arc<dyn AudioDecoder> = Arc::new(WavPcmDecoder::new(
        settings.pipeline.min_audio_seconds as f64,
        settings.pipeline.max_audio_seconds as f64,
    ));

    let vad = build_vad(&settings);
    let (asr, extractor) = build_recognition(&settings)?;

    let state = AppState::new(settings.clone(), decoder, vad, asr, extractor, gallery);
    let app = create_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!(%addr, ws_path = %settings.server.ws_path, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Loads one independent ONNX Silero VAD session per worker-pool slot when a
/// model path is configured (each session owns its own handle rather than
/// sharing one behind a mutex across workers), falling back to the
/// energy-floor gate otherwise (spec §4.2 treats the VAD as infallible and
/// always-available, unlike ASR/embedding).
#[cfg(feature = "onnx")]
fn build_vad(settings: &Settings) -> Arc<dyn Vad> {
    let config = VadConfig {
        energy_floor_db: settings.pipeline.vad_energy_floor_db,
        ..VadConfig::default()
    };

    if let Some(path) = &settings.models.vad_model_path {
        let pool_size = voxkey_pipeline::effective_pool_size(settings.pipeline.worker_pool_size);
        let built: Result<Vec<Arc<dyn Vad>>, _> = (0..pool_size)
            .map(|_| {
                voxkey_pipeline::vad::OnnxVad::new(path, config.clone())
                    .map(|vad| Arc::new(vad) as Arc<dyn Vad>)
            })
            .collect();
        match built {
            Ok(handles) => {
                tracing::info!(path, pool_size, "loaded ONNX VAD model handles");
                return Arc::new(voxkey_pipeline::PooledVad::new(handles));
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to load ONNX VAD model, falling back to energy floor");
            }
        }
    } else {
        tracing::info!("no VAD model configured, using energy-floor VAD");
    }

    Arc::new(EnergyVad::new(config))
}

#[cfg(not(feature = "onnx"))]
fn build_vad(settings: &Settings) -> Arc<dyn Vad> {
    Arc::new(EnergyVad::new(VadConfig {
        energy_floor_db: settings.pipeline.vad_energy_floor_db,
        ..VadConfig::default()
    }))
}

/// There is no always-available non-ONNX production ASR or embedding
/// extractor (see DESIGN.md) — both model paths are required to start the
/// server for real traffic. Builds one independent session per worker-pool
/// slot for each capability and hands callers a handle from `PooledAsr`/
/// `PooledEmbeddingExtractor` rather than serializing every worker on a
/// single mutex-guarded session.
#[cfg(feature = "onnx")]
fn build_recognition(
    settings: &Settings,
) -> Result<(Arc<dyn Asr>, Arc<dyn EmbeddingExtractor>), Box<dyn std::error::Error>> {
    let asr_path = settings
        .models
        .asr_model_path
        .as_ref()
        .ok_or("models.asr_model_path is required (no fallback ASR is shipped)")?;
    let embed_path = settings
        .models
        .embedding_model_path
        .as_ref()
        .ok_or("models.embedding_model_path is required (no fallback embedding extractor is shipped)")?;

    let pool_size = voxkey_pipeline::effective_pool_size(settings.pipeline.worker_pool_size);

    let asr_handles: Vec<Arc<dyn Asr>> = (0..pool_size)
        .map(|_| {
            voxkey_pipeline::asr::OnnxCtcAsr::new(asr_path)
                .map(|asr| Arc::new(asr) as Arc<dyn Asr>)
                .map_err(|e| format!("failed to load ASR model at {asr_path}: {e}"))
        })
        .collect::<Result<_, _>>()?;
    let extractor_handles: Vec<Arc<dyn EmbeddingExtractor>> = (0..pool_size)
        .map(|_| {
            voxkey_pipeline::extractor::OnnxEmbeddingExtractor::new(embed_path)
                .map(|extractor| Arc::new(extractor) as Arc<dyn EmbeddingExtractor>)
                .map_err(|e| format!("failed to load embedding model at {embed_path}: {e}"))
        })
        .collect::<Result<_, _>>()?;

    tracing::info!(asr_path, embed_path, pool_size, "loaded ONNX ASR and embedding model handles");
    Ok((
        Arc::new(voxkey_pipeline::PooledAsr::new(asr_handles)),
        Arc::new(voxkey_pipeline::PooledEmbeddingExtractor::new(extractor_handles)),
    ))
}

#[cfg(not(feature = "onnx"))]
fn build_recognition(
    _settings: &Settings,
) -> Result<(Arc<dyn Asr>, Arc<dyn EmbeddingExtractor>), Box<dyn std::error::Error>> {
    Err("built without the `onnx` feature; no production ASR/embedding extractor is available".into())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Initialize tracing, with optional OpenTelemetry export when the
/// `telemetry` feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(settings: &Settings) {
    use opentelemetry_otlp::WithExportConfig;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "voxkey_server=info,voxkey_pipeline=info,tower_http=warn".into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if settings.observability.telemetry_enabled {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(
                opentelemetry_sdk::Resource::new(vec![
                    opentelemetry::KeyValue::new("service.name", "voxkey-server"),
                    opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ]),
            ))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => {
                let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                subscriber.with(fmt_layer).with(otel_layer).init();
                tracing::info!("OpenTelemetry tracing enabled");
                return;
            }
            Err(e) => eprintln!("failed to initialize OpenTelemetry: {e}. falling back to console only."),
        }
    }
    subscriber.with(fmt_layer).init();
}

/// Console-only tracing (telemetry feature disabled).
#[cfg(not(feature = "telemetry"))]
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "voxkey_server=info,voxkey_pipeline=info,tower_http=warn".into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
