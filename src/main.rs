//! ember - daemon entry point for the outreach engine

use std::sync::Arc;
use std::time::Duration;

use ember::config::EngineSettings;
use ember::providers::{AsyncImapClient, SmtpMailer, SystemDnsResolver};
use ember::storage::MemoryStore;
use ember::Engine;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting ember");

    let settings = load_settings();

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(SmtpMailer::new(Duration::from_secs(30)));
    let imap = Arc::new(AsyncImapClient::new(settings.sync.imap_timeout));
    let dns = Arc::new(SystemDnsResolver::new());

    let engine = Engine::new(store, transport, imap, dns, settings);
    Arc::clone(&engine).start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("signal handler error: {}", e);
    }

    engine.stop();
    tracing::info!("ember stopped");
}

/// Loads settings from the path in `EMBER_CONFIG`, falling back to
/// defaults when unset or unreadable.
fn load_settings() -> EngineSettings {
    let Some(path) = std::env::var_os("EMBER_CONFIG") else {
        return EngineSettings::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("invalid config {}: {}", path.to_string_lossy(), e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!("could not read config {}: {}", path.to_string_lossy(), e);
            std::process::exit(1);
        }
    }
}
