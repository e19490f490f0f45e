//! John DAO server binary.
//!
//! Opens the document database, starts the create-user trigger and the
//! periodic backup and tweet jobs, and serves the health endpoint until
//! SIGTERM/SIGINT.

use johndao_canister::{Actor, HttpAgent};
use johndao_db::{DbRuntimeSettings, SqliteDocumentStore};
use johndao_identity::{Identity, Secp256k1Identity};
use johndao_server::config::{self, Config};
use johndao_server::jobs::{backup_users, schedule_tweet, CreateUserTrigger, JobError};
use johndao_server::twitter::{HttpTweetPoster, TweetPoster};
use johndao_server::{app, background, AppState, JOB_BACKUP_USERS, JOB_SCHEDULE_TWEET};
use johndao_sync::DocumentStore;
use johndao_types::Principal;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("JOHNDAO_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn server_identity(config: &Config) -> Secp256k1Identity {
    match &config.canister.identity_secret {
        Some(secret) => {
            let bytes = hex::decode(secret.trim())
                .expect("canister.identity_secret must be hex, check config");
            Secp256k1Identity::from_secret_key(&bytes)
                .expect("canister.identity_secret is not a valid secp256k1 key")
        }
        None => {
            tracing::warn!("no canister.identity_secret configured, using an ephemeral identity");
            Secp256k1Identity::generate()
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = johndao_db::open(
        &config.database.path,
        DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open database, check database.path in config");
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool.clone()));

    let canister_id: Principal = config
        .canister
        .id
        .parse()
        .expect("canister.id is not a valid principal");
    let identity = server_identity(&config);
    tracing::info!(principal = %identity.sender(), canister = %canister_id, "server identity ready");
    let actor = Actor::new(
        canister_id,
        Arc::new(identity),
        Arc::new(HttpAgent::new(config.canister.host.clone())),
    );

    let _trigger = if config.jobs.create_user_trigger {
        Some(
            CreateUserTrigger::start(actor.clone(), store.clone())
                .expect("failed to start create user trigger"),
        )
    } else {
        tracing::warn!("create user trigger disabled");
        None
    };

    {
        let (actor, store) = (actor.clone(), store.clone());
        tokio::spawn(background::start_periodic_job(
            JOB_BACKUP_USERS,
            config.jobs.backup_interval_seconds,
            Some(pool.clone()),
            move || {
                let (actor, store) = (actor.clone(), store.clone());
                async move {
                    let report = backup_users(&actor, &store).await?;
                    Ok::<_, JobError>(format!(
                        "{} changed, {} matched, backup time {}",
                        report.changed, report.matched, report.backup_time
                    ))
                }
            },
        ));
    }

    {
        let poster: Arc<dyn TweetPoster> = Arc::new(HttpTweetPoster::new(
            config.twitter.api_base.clone(),
            config.twitter.upload_base.clone(),
            config.twitter.bearer_token.clone(),
        ));
        let actor = actor.clone();
        tokio::spawn(background::start_periodic_job(
            JOB_SCHEDULE_TWEET,
            config.jobs.tweet_interval_seconds,
            Some(pool.clone()),
            move || {
                let (actor, poster) = (actor.clone(), poster.clone());
                async move {
                    Ok::<_, JobError>(match schedule_tweet(&actor, poster.as_ref()).await? {
                        Some(index) => format!("posted round {index}"),
                        None => "nothing to post".to_string(),
                    })
                }
            },
        ));
    }

    let app = app(AppState { pool });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting johndao server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("johndao server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
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
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
