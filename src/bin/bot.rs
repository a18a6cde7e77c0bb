use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use dotenvy::dotenv;
use log::{debug, error, info, warn};

use palaver::core::config::{Config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use palaver::engine::EngineMetrics;
use palaver::features::backend::OllamaBackend;
use palaver::features::context::ContextStore;
use palaver::features::rate_limiting::RateLimiter;
use palaver::{BotEngine, ChatConnection, LineGrammar, MessageClassifier, ResponseBackend};

/// How often the observable counters are logged.
const METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// How often idle identities are swept from the rate and context maps.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

fn load_config() -> Result<Config> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => Config::load(&PathBuf::from(path)),
        Err(_) => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Config::load(&default)
            } else {
                info!("no {DEFAULT_CONFIG_PATH} found, running with built-in defaults");
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

/// Warn early when the configured model is not served by the backend.
async fn probe_backend(backend: &OllamaBackend, model: &str) {
    match backend.list_models().await {
        Ok(models) if models.iter().any(|m| m == model) => {
            info!("backend reachable, model {model} available");
        }
        Ok(models) => {
            warn!("model {model} not offered by the backend (available: {models:?})");
        }
        Err(e) => {
            warn!("backend not reachable at startup: {e} (will keep trying per message)");
        }
    }
}

async fn metrics_loop(metrics: Arc<EngineMetrics>) {
    let mut ticker = tokio::time::interval(METRICS_INTERVAL);
    ticker.tick().await; // first tick fires immediately
    loop {
        ticker.tick().await;
        info!("{}", metrics.snapshot());
    }
}

/// Sweep identities nobody has heard from in a while, so the per-identity
/// maps stay bounded on a busy server.
async fn maintenance_loop(
    limiter: Arc<RateLimiter>,
    context: Arc<ContextStore>,
    idle_ttl: Duration,
) {
    let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let rates = limiter.prune();
        let contexts = context.prune(idle_ttl);
        if rates > 0 || contexts > 0 {
            debug!("swept {rates} idle rate entries and {contexts} idle contexts");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Arc::new(load_config().context("loading configuration")?);
    info!(
        "starting {} v{} against {}:{} (trigger {:?})",
        config.bot.username,
        env!("CARGO_PKG_VERSION"),
        config.chat.host,
        config.chat.port,
        config.bot.trigger
    );

    let grammar = match &config.grammar {
        Some(overrides) => {
            LineGrammar::from_config(overrides).context("compiling grammar overrides")?
        }
        None => LineGrammar::nakenchat(),
    };
    let classifier = MessageClassifier::new(grammar, config.bot.username.clone());

    let backend = Arc::new(OllamaBackend::new(&config.ollama)?);
    probe_backend(&backend, &config.ollama.model).await;

    let limiter = Arc::new(RateLimiter::new(
        config.limits.max_requests,
        config.limits.window(),
    ));
    let context = Arc::new(ContextStore::new(config.bot.context_length));

    let (handle, events, connection) = ChatConnection::spawn(config.clone(), classifier);
    let engine = BotEngine::new(
        config.clone(),
        handle.clone(),
        limiter.clone(),
        context.clone(),
        backend as Arc<dyn ResponseBackend>,
    );

    tokio::spawn(metrics_loop(engine.metrics()));
    tokio::spawn(maintenance_loop(limiter, context, config.limits.idle_ttl()));
    let engine_task = tokio::spawn(engine.run(events));

    tokio::select! {
        result = connection => {
            match result {
                Ok(Ok(())) => info!("connection closed"),
                Ok(Err(e)) => {
                    error!("connection failed permanently: {e}");
                    return Err(e.into());
                }
                Err(e) => error!("connection task panicked: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested, signing off");
            handle.close().await;
        }
    }

    // The connection tears down its event channel on exit; the engine then
    // drains in-flight replies within the configured grace period.
    let _ = tokio::time::timeout(
        config.limits.shutdown_grace() + Duration::from_secs(1),
        engine_task,
    )
    .await;

    info!("goodbye");
    Ok(())
}
