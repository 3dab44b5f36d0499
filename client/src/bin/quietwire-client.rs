//! SIP003 plugin process.
//!
//! Launched by a proxy client with `SS_LOCAL_HOST`, `SS_LOCAL_PORT`,
//! `SS_REMOTE_HOST`, `SS_REMOTE_PORT` and `SS_PLUGIN_OPTIONS` set. Logs go to
//! stderr and are filtered with `RUST_LOG` (default `info`).
use anyhow::Context;
use quietwire::{Client, Config, SessionState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::from_env().context("reading plugin configuration")?;
    info!(
        local = %config.local(),
        remote = %config.remote(),
        server_name = config.server_name(),
        browser = ?config.browser(),
        "starting"
    );

    let state = SessionState::new(config);
    let client = Client::bind(state)
        .await
        .context("binding local endpoint")?;

    client
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
