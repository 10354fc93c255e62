use axum::{Extension, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use content_engine::config::Settings;
use content_engine::generation::{GenerationService, HttpGenerationBackend};
use content_engine::orchestrator::{ExecutionMode, WorkflowRuns};
use content_engine::queue::{HttpJobQueueTransport, JobQueueClient};
use content_engine::registry::WorkflowRegistry;
use content_engine::{handlers, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Workflow models are registered once here; the registry is read-only
    // for the rest of the process lifetime.
    let registry = Arc::new(WorkflowRegistry::new(settings.default_workflow_model.clone()));
    if let Err(e) = registry.install_defaults().await {
        tracing::error!("Failed to install default workflow models: {}", e);
        std::process::exit(1);
    }
    tracing::info!(
        "Registered {} workflow models (default: {})",
        registry.get_all().await.len(),
        registry.default_model_id()
    );

    let backend = Arc::new(HttpGenerationBackend::new(
        settings.generation_backend_url.clone(),
        settings.generation_proxy_url.clone(),
        settings.generation_api_key.clone(),
    ));
    let generation = Arc::new(
        GenerationService::new(backend).with_default_timeout(settings.generation_timeout_ms),
    );

    let (queue, execution_mode) = match settings.job_queue_url.clone() {
        Some(url) => {
            tracing::info!("Job queue configured at {} (queued execution)", url);
            let transport = Arc::new(HttpJobQueueTransport::new(
                url,
                settings.job_queue_api_key.clone(),
            ));
            let client = JobQueueClient::new(transport)
                .with_poll_interval(Duration::from_millis(settings.poll_interval_ms))
                .with_max_poll_attempts(settings.max_poll_attempts);
            (Some(Arc::new(client)), ExecutionMode::Queued)
        }
        None => {
            tracing::warn!("JOB_QUEUE_URL not set. Workflow phases will run in-process.");
            (None, ExecutionMode::Local)
        }
    };

    let bind_addr = settings.bind_addr.clone();

    // Create the shared state
    let shared_state = Arc::new(AppState {
        settings,
        registry,
        queue,
        generation,
        execution_mode,
        runs: WorkflowRuns::new(),
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::workflow_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind server address");
    tracing::info!(
        "listening on {}",
        listener.local_addr().expect("listener has a local address")
    );
    axum::serve(listener, app).await.expect("server error");
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    // Get log level from environment or default to INFO for production
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,content_engine=trace,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,content_engine=info,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for production (easier for log aggregation),
    // human-readable logging for development
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🚀 content_engine starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );
    tracing::info!("Log level: {}", log_level);

    Ok(())
}

// Liveness endpoint
async fn api_status() -> axum::response::Json<serde_json::Value> {
    axum::response::Json(serde_json::json!({
        "service": "content_engine",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}
