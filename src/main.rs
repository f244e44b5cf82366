//! SYNDICATE — Multi-account wager placement & settlement engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store, wires the engine, and serves the API.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use syndicate::config::AppConfig;
use syndicate::credentials::CredentialManager;
use syndicate::engine::reconciler::RegionCutoffs;
use syndicate::engine::{AccountChecker, Orchestrator, Placer, Reconciler, RetryConfig};
use syndicate::platforms::PlatformRegistry;
use syndicate::relay::RelayChecker;
use syndicate::server::{self, routes::ServiceState};
use syndicate::storage::Store;

const BANNER: &str = r#"
 ____  _   _ _   _ ____ ___ ____    _  _____ _____
/ ___|| | | | \ | |  _ \_ _/ ___|  / \|_   _| ____|
\___ \| | | |  \| | | | | | |     / _ \ | | |  _|
 ___) | |_| | |\  | |_| | | |___ / ___ \| | | |___
|____/ \___/|_| \_|____/___\____/_/   \_\_| |_____|

  Multi-account wager placement & settlement
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        port = cfg.server.port,
        store = %cfg.storage.path,
        sgd666 = cfg.platforms.sgd666.enabled,
        one789 = cfg.platforms.one789.enabled,
        "SYNDICATE starting up"
    );

    // -- Wire components --------------------------------------------------

    let store = Arc::new(Store::open(Some(&cfg.storage.path))?);
    let registry = Arc::new(PlatformRegistry::from_config(&cfg.platforms)?);
    let credentials = Arc::new(CredentialManager::new(store.clone(), &cfg.credentials));
    let relay_checker = RelayChecker::new(
        cfg.relay.probe_url.clone(),
        Duration::from_secs(cfg.relay.timeout_secs),
    );

    let placer = Arc::new(Placer::new(
        store.clone(),
        credentials.clone(),
        relay_checker.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        registry.clone(),
        placer,
        RetryConfig::from_settings(&cfg.retry),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        registry.clone(),
        credentials.clone(),
        relay_checker.clone(),
        RegionCutoffs::from_settings(&cfg.regions)?,
    ));
    let checker = Arc::new(AccountChecker::new(
        store.clone(),
        registry,
        credentials,
        relay_checker,
        &cfg.check,
    ));

    let state = Arc::new(ServiceState {
        store,
        orchestrator,
        reconciler,
        checker,
    });

    server::serve(state, cfg.server.port).await
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("syndicate=info"));

    let json_logging = std::env::var("SYNDICATE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
