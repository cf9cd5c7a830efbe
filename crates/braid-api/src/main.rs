use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use braid_api::{config::Config, state::AppState};
use braid_engine::CompletionOrchestrator;
use braid_ids::IdIssuer;
use braid_llm::{ChatClient, OpenAIClient};
use braid_persist::Store;
use braid_pubsub::Bus;
use braid_stream::ResumableStreamContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting Braid API server");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    let llm: Arc<dyn ChatClient> = Arc::new(OpenAIClient::new(config.openai_api_key.clone())?);

    let bus = build_bus(&config).await?;
    let store = build_store(&config).await?;

    let issuer = IdIssuer::new(config.id_secret.as_bytes());
    let streams = ResumableStreamContext::new(bus)
        .with_ttl(Duration::from_secs(config.stream.ttl_secs));
    let orchestrator = CompletionOrchestrator::new(
        store.clone(),
        llm,
        streams,
        issuer.clone(),
        config.llm.default_model.clone(),
    )
    .cancel_period(Duration::from_millis(config.stream.cancel_poll_ms));

    let state = Arc::new(AppState::new(config.clone(), orchestrator, store, issuer));

    let app = braid_api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_bus(config: &Config) -> anyhow::Result<Arc<dyn Bus>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        tracing::info!("Connecting to Redis");
        let bus = braid_pubsub::RedisBus::connect(url).await?;
        return Ok(Arc::new(bus));
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but the redis feature is disabled; using in-memory bus");
    }
    tracing::info!("Using in-memory pub/sub bus");
    Ok(Arc::new(braid_pubsub::MemoryBus::new()))
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    #[cfg(feature = "mongodb")]
    if let Some(uri) = &config.mongodb_uri {
        tracing::info!("Connecting to MongoDB");
        let store = braid_persist::MongoStore::connect(uri, "braid").await?;
        tracing::info!("MongoDB connected");
        return Ok(Arc::new(store));
    }
    #[cfg(not(feature = "mongodb"))]
    if config.mongodb_uri.is_some() {
        tracing::warn!("MONGODB_URI set but the mongodb feature is disabled; using in-memory store");
    }
    tracing::info!("Using in-memory store");
    Ok(Arc::new(braid_persist::MemoryStore::new()))
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
