use agora_common::{
    snowflake::{ProcessId, WorkerId},
    util::{NonPositiveDurationError, PositiveDuration},
};
use agora_db::{
    client::DbClient,
    memory::MemoryStore,
    store::{DbError, Store},
    thread::ThreadMode,
};
use serde::Deserialize;
use server::{ServerState, TokenLifetime};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("DATABASE_URL must be set when STORE is postgres")]
    MissingDatabaseUrl,
    #[error("TOKEN_LIFETIME_SECONDS is invalid: {0}")]
    TokenLifetime(#[from] NonPositiveDurationError),
    #[error("Error connecting to the database: {0}")]
    DbConnect(sqlx::Error),
    #[error("Error migrating the database: {0}")]
    DbMigrate(DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default)]
    store: StoreKind,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
    token_lifetime_seconds: Option<i64>,
    #[serde(default)]
    thread_mode: ThreadMode,
}

fn default_max_connections() -> u32 {
    10
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agora_api=debug,agora_db=debug,agora_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .env file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

/// Opens the configured store. The pool is returned separately so it can be
/// closed on shutdown.
async fn open_store(env: &Env) -> Result<(Arc<dyn Store>, Option<PgPool>), InitError> {
    match env.store {
        StoreKind::Memory => {
            info!("Using in-memory store");
            let store = MemoryStore::new(env.worker_id, env.process_id);
            Ok((Arc::new(store), None))
        }
        StoreKind::Postgres => {
            let database_url = env
                .database_url
                .as_deref()
                .ok_or(InitError::MissingDatabaseUrl)?;
            let pool = PgPoolOptions::new()
                .max_connections(env.database_max_connections)
                .connect(database_url)
                .await
                .map_err(InitError::DbConnect)?;

            let client = DbClient::new(pool.clone(), env.worker_id, env.process_id);
            client.migrate().await.map_err(InitError::DbMigrate)?;
            info!("Connected to database and applied migrations");

            Ok((Arc::new(client), Some(pool)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let token_lifetime = env
        .token_lifetime_seconds
        .map(PositiveDuration::from_seconds)
        .transpose()?;

    let (store, pool) = open_store(&env).await?;
    let state = ServerState {
        store,
        thread_mode: env.thread_mode,
        token_lifetime: TokenLifetime(token_lifetime),
    };
    debug!(thread_mode = ?state.thread_mode, "Assembled server state");

    let app = server::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    if let Some(pool) = pool {
        pool.close().await;
    }

    Ok(())
}
