//! Sideload Server
//!
//! Serves the distribution pages, signed download links and the CI API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_extra::extract::cookie::Key;
use clap::Parser;
use tracing::{info, warn};

use sideload_core::config::{DEFAULT_PAGE_SIZE, default_database_path};
use sideload_core::tracing_init::{LogFormat, init_tracing};
use sideload_core::{ServiceAccountKey, Settings};
use sideload_crypto::LinkSigner;
use sideload_server::auth::{GoogleIdentity, GoogleOAuthConfig, SessionStore};
use sideload_server::drive::{DriveClient, DriveConfig, ServiceAccountTokens};
use sideload_server::storage::ServerDatabase;
use sideload_server::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "sideload-server")]
#[command(version, about = "Sideload server - internal mobile app distribution")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:9000", env = "SIDELOAD_ADDR")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "SIDELOAD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Secret for signing download links.
    #[arg(long, env = "SIDELOAD_SECRET", hide_env_values = true)]
    secret: String,

    /// Cookie encryption key (at least 64 bytes). A random key is
    /// used when absent, which logs everyone out on restart.
    #[arg(long, env = "SIDELOAD_COOKIE_KEY", hide_env_values = true)]
    cookie_key: Option<String>,

    /// OAuth client id.
    #[arg(long, env = "SIDELOAD_OAUTH_CLIENT_ID")]
    oauth_client_id: String,

    /// OAuth client secret.
    #[arg(long, env = "SIDELOAD_OAUTH_CLIENT_SECRET", hide_env_values = true)]
    oauth_client_secret: String,

    /// OAuth callback URL, ending in `/oauth2callback`.
    #[arg(long, env = "SIDELOAD_OAUTH_CALLBACK_URL")]
    oauth_callback_url: String,

    /// Comma-separated email domains allowed to log in.
    #[arg(long, env = "SIDELOAD_PERMITTED_DOMAINS", default_value = "")]
    permitted_domains: String,

    /// Service account key file (JSON).
    #[arg(long, env = "SIDELOAD_SERVICE_ACCOUNT_KEY")]
    service_account_key: PathBuf,

    /// Shown on pages and used as the folder name prefix.
    #[arg(long, env = "SIDELOAD_ORGANIZATION_NAME", default_value = "Sideload")]
    organization_name: String,

    /// Bundles per page.
    #[arg(long, env = "SIDELOAD_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Timeout for identity and storage provider calls, in seconds.
    #[arg(long, env = "SIDELOAD_EXTERNAL_TIMEOUT", default_value_t = 30)]
    external_timeout: u64,

    /// Mark session cookies Secure.
    #[arg(long, env = "SIDELOAD_SECURE_COOKIES")]
    secure_cookies: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SIDELOAD_LOG_JSON")]
    log_json: bool,
}

fn cookie_key(raw: Option<&str>) -> anyhow::Result<Key> {
    match raw {
        Some(material) => {
            Key::try_from(material.as_bytes()).context("cookie key must be at least 64 bytes")
        }
        None => {
            warn!("No cookie key configured; sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(
        "sideload_server=info,tower_http=info",
        LogFormat::from_json_flag(args.log_json),
    )?;
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting sideload-server"
    );

    let settings = Settings::default()
        .with_permitted_domains(&args.permitted_domains)
        .with_organization_name(args.organization_name.clone())
        .with_page_size(args.page_size)
        .with_external_timeout(Duration::from_secs(args.external_timeout))
        .with_secure_cookies(args.secure_cookies);
    settings.validate()?;
    if settings.permitted_domains.is_empty() {
        warn!("No permitted domains; only explicit authority holders can log in");
    }

    let signer = LinkSigner::new(args.secret.as_bytes()).context("link signing secret")?;

    let db_path = match args.db_path {
        Some(path) => path,
        None => default_database_path(dirs::home_dir())
            .context("Cannot determine home directory for the default database path")?,
    };
    info!(path = %db_path.display(), "Opening server database");
    let db = ServerDatabase::open(&db_path).await?;

    let identity = GoogleIdentity::new(
        GoogleOAuthConfig::new(
            args.oauth_client_id,
            args.oauth_client_secret,
            args.oauth_callback_url,
        ),
        settings.external_timeout,
    )?;

    let key = ServiceAccountKey::from_file(&args.service_account_key)?;
    let tokens = ServiceAccountTokens::new(key, settings.external_timeout)?;
    info!(client_email = tokens.client_email(), "Using service account");
    let drive = Arc::new(DriveClient::new(
        &DriveConfig::new(settings.external_timeout),
        tokens,
    )?);

    let state = AppState {
        db,
        settings: Arc::new(settings),
        signer: Arc::new(signer),
        sessions: SessionStore::new(),
        identity: Arc::new(identity),
        storage: drive.clone(),
        user_drive: drive,
        cookie_key: cookie_key(args.cookie_key.as_deref())?,
    };

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
