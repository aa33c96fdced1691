//! # Agora Binary
//!
//! Loads settings, picks the storage backend, wires the service graph and
//! serves the HTTP and WebSocket surface until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use api_adapters::{router, AppState, RoomHub, RouterOptions};
use auth_adapters::{Argon2Hasher, JwtTokenService};
use configs::{Backend, LogFormat, LogSettings, Settings};
use domains::{
    CommentRepository, ConversationRepository, EventPublisher, MediaRepository, MessageRepository,
    NotificationRepository, PostRepository, UserRepository, VoteRepository,
};
use secrecy::ExposeSecret;
use services::{Ports, Services};
use storage_adapters::{LocalMediaStorage, MemoryStore, PgStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Every repository port served by one store.
fn ports<S>(store: Arc<S>, settings: &Settings, hub: Arc<RoomHub>) -> Ports
where
    S: UserRepository
        + PostRepository
        + CommentRepository
        + VoteRepository
        + MediaRepository
        + ConversationRepository
        + MessageRepository
        + NotificationRepository
        + 'static,
{
    let events: Arc<dyn EventPublisher> = hub;
    Ports {
        users: store.clone(),
        posts: store.clone(),
        comments: store.clone(),
        votes: store.clone(),
        media: store.clone(),
        conversations: store.clone(),
        messages: store.clone(),
        notifications: store,
        storage: Arc::new(LocalMediaStorage::new(
            &settings.media.upload_dir,
            settings.media.url_prefix.as_str(),
        )),
        hasher: Arc::new(Argon2Hasher::new()),
        tokens: Arc::new(JwtTokenService::new(
            settings.auth.jwt_secret.expose_secret().as_bytes(),
            settings.auth.token_ttl_hours,
        )),
        events,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = configs::load().context("loading configuration")?;
    init_tracing(&settings.log);

    let hub = Arc::new(RoomHub::new());
    let ports = match settings.database.backend {
        Backend::Postgres => {
            let store = PgStore::connect(
                settings.database.url.expose_secret(),
                settings.database.max_connections,
            )
            .await
            .context("connecting to PostgreSQL")?;
            store.migrate().await.context("running migrations")?;
            info!(max_connections = settings.database.max_connections, "using PostgreSQL store");
            ports(Arc::new(store), &settings, hub.clone())
        }
        Backend::Memory => {
            warn!("using the in-memory store; nothing survives a restart");
            ports(Arc::new(MemoryStore::new()), &settings, hub.clone())
        }
    };

    let upload_dir = PathBuf::from(&settings.media.upload_dir);
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .with_context(|| format!("creating upload dir {}", upload_dir.display()))?;

    let options = RouterOptions {
        cors_origins: settings.server.cors_origins.clone(),
        max_upload_bytes: settings.media.max_upload_bytes,
        uploads: Some((settings.media.url_prefix.clone(), upload_dir)),
    };
    let app = router(AppState::new(Services::new(ports), hub), &options);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "agora listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("agora stopped");
    Ok(())
}
