mod config;
mod db;
mod frame;
mod geometry;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::services::guests::StoreGuestDirectory;
use crate::store::{MemoryStore, PgStore, Store};

const DEFAULT_PORT: u16 = 3000;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env();
    let port = config::env_parse("PORT", DEFAULT_PORT);

    let store: Arc<dyn Store> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = db::init_pool(&database_url)
                .await
                .expect("database init failed");
            tracing::info!("using postgres document store");
            Arc::new(PgStore::new(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let guests = Arc::new(StoreGuestDirectory::new(store.clone()));
    let state = state::AppState::new(store, guests, config);

    // Spawn background lease/presence sweeper.
    let _sweeper = services::sweeper::spawn_sweeper(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "venueplan listening");
    axum::serve(listener, app).await.expect("server failed");
}
