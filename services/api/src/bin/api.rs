//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HttpMirrorAdapter, OpenAiGenerationAdapter},
    config::Config,
    error::ApiError,
    web::{self, ApiDoc, AppState},
};
use asset_history_core::{
    AccountDirectory, GenerationWorkflow, HistoryStore, PartitionRepository, RemoteMirror,
    SessionManager, SyncGateway,
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_adapter = Arc::new(DbAdapter::connect(&config.database_url).await?);
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Remote Mirror & Sync Worker ---
    let cancel = CancellationToken::new();
    let (mirror, sync, sync_worker): (Option<Arc<dyn RemoteMirror>>, _, _) =
        match &config.mirror_url {
            Some(url) => {
                let mirror: Arc<dyn RemoteMirror> = Arc::new(HttpMirrorAdapter::new(
                    reqwest::Client::new(),
                    url,
                    config.mirror_token.clone(),
                )?);
                let (gateway, worker) =
                    SyncGateway::spawn(mirror.clone(), config.sync.clone(), cancel.clone());
                info!(mirror = %url, "Remote mirror sync enabled");
                (Some(mirror), Arc::new(gateway), Some(worker))
            }
            None => {
                warn!("MIRROR_URL is not set; remote sync is disabled");
                (None, Arc::new(SyncGateway::disabled()), None)
            }
        };

    // --- 4. Initialize the Generation Adapter ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let generator = Arc::new(OpenAiGenerationAdapter::new(
        Client::with_config(openai_config),
        config.text_model.clone(),
        config.image_model.clone(),
    ));

    // --- 5. Build the Core Services & Shared AppState ---
    let partitions: Arc<dyn PartitionRepository> = db_adapter.clone();
    let accounts: Arc<dyn AccountDirectory> = db_adapter;
    let store = Arc::new(HistoryStore::new(partitions, sync.clone()));
    let hydrates = mirror.is_some();
    let sessions = Arc::new(SessionManager::new(accounts.clone(), store.clone(), mirror));
    let workflow = Arc::new(GenerationWorkflow::new(generator, store.clone()));
    info!(
        sync_enabled = sync.is_enabled(),
        hydrates, "History store and session manager ready"
    );
    let app_state = Arc::new(AppState::new(
        config.clone(),
        sessions,
        store,
        workflow,
        sync,
        accounts,
    ));

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(web::middleware::ADMIN_TOKEN_HEADER),
        ]);

    // --- 6. Create the Web Router ---
    // Generated images come back as data URLs, so responses and model images can be large.
    let api_router = web::router(app_state)
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- 8. Stop the Sync Worker ---
    cancel.cancel();
    if let Some(worker) = sync_worker {
        if let Err(e) = worker.await {
            warn!("Sync worker ended abnormally: {}", e);
        }
    }
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for the shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}
