//! Chat client core
//!
//! Signs a user in through an identity provider, then relays each message to
//! the Gemini `generateContent` endpoint and records the exchange in an
//! observable, in-memory message log served over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use auth::{AuthSession, FirebaseIdentityProvider};
use config::Config;
use core::SessionSlot;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthSession>,
    pub chats: Arc<SessionSlot>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatapp=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let fetcher = providers::from_config(&config.gemini)?;
    let identity = FirebaseIdentityProvider::from_config(&config.auth)?;

    let state = AppState {
        auth: Arc::new(AuthSession::new(Arc::new(identity))),
        chats: Arc::new(SessionSlot::new(fetcher)),
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Chat API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
