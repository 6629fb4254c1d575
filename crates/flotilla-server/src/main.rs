//! Flotilla control-plane daemon.
//!
//! Builds the control plane from `FLOTILLA_*` environment variables, hydrates
//! persisted configuration, and runs the event subscription loop and status
//! poller until interrupted.

use flotilla_core::{ControlPlane, ControlPlaneSettings};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("flotilla=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Flotilla control plane");

    let settings = ControlPlaneSettings::from_env();
    tracing::info!(?settings, "Configuration loaded");
    settings.validate()?;

    let control_plane = ControlPlane::from_settings(settings)?;
    let restored = control_plane.load_persisted().await?;
    tracing::info!(instances = restored, "Persisted instances restored");

    let shutdown = CancellationToken::new();
    let handles = control_plane.spawn_background(shutdown.clone()).await?;
    tracing::info!(tasks = handles.len(), "Control plane ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }

    tracing::info!(
        instances = control_plane.registry().count(),
        "Control plane shutdown complete"
    );
    Ok(())
}
