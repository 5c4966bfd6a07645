use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use feedback_chat::agent::provider_from_config;
use feedback_chat::config::AppConfig;
use feedback_chat::db::conversation_repository::ConversationRepository;
use feedback_chat::routes::{build_router, AppState};
use feedback_chat::service::chat_service::ChatService;
use feedback_chat::service::conversation_service::ConversationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedback_chat=debug,tower_http=debug".into()),
        )
        .init();

    // Reads .env if present
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let provider = provider_from_config(&config.llm);
    info!(
        base_url = %config.llm.base_url,
        default_model = %config.llm.default_model,
        "Upstream provider configured"
    );

    let state = AppState {
        chat: ChatService::new(Arc::from(provider), config.llm.clone()),
        conversations: ConversationService::new(ConversationRepository::new(pool)),
        client_config: Arc::new(config.client_config()),
    };
    let app = build_router(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
