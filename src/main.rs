use faas_engine::http::{configure_app, AppState};
use faas_engine::store::{PgExecutionLog, PgFunctionStore, PgQuotaStore};
use faas_engine::{Engine, EngineConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialize logging with more detail
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter("faas_engine=debug,tower_http=debug")
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = EngineConfig::default();

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    let quota_store = Arc::new(PgQuotaStore::new(pool.clone()));
    let execution_log = Arc::new(PgExecutionLog::new(pool.clone()));
    let function_store = Arc::new(PgFunctionStore::new(pool));

    let engine = Engine::new(&config, quota_store, execution_log);
    let state = AppState {
        engine,
        functions: function_store,
    };

    // Configure and start the application
    let app = configure_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    info!("✨ Server ready:");
    info!("  🌎 http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
