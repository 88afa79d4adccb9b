use tokio::net::TcpListener;

use anyhow::anyhow;

use haven::core::resource::PrecacheManifest;
use haven::{ServerConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();
    println!("Starting server on {address}");

    // Create application state
    let app_state = AppState::new(config)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    // Install the configured precache manifest before accepting traffic. A
    // broken manifest file is a deployment mistake and fails the boot; an
    // unreachable origin is survivable, any namespace committed by an
    // earlier run keeps serving.
    if let Some(manifest_path) = app_state.config.manifest_path.clone() {
        let manifest = PrecacheManifest::from_file(&manifest_path)
            .await
            .map_err(|e| anyhow!("Failed to load manifest {}: {e}", manifest_path.display()))?;

        match app_state
            .cache
            .install(manifest, app_state.config.install_policy)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    "Precached {} resources for version {}",
                    report.cached,
                    report.version
                );
                if app_state.config.activate_on_startup
                    && let Err(e) = app_state.lifecycle.activate().await
                {
                    tracing::error!("Activation failed: {e}");
                }
            }
            Err(e) => tracing::error!("Precache install failed: {e}"),
        }
    } else if app_state.config.activate_on_startup
        && let Err(e) = app_state.lifecycle.activate().await
    {
        tracing::error!("Activation failed: {e}");
    }

    // Combine the gateway API, control channel and interception fallback
    let app = routes::create_router().with_state(app_state);

    // Create listener
    let listener = TcpListener::bind(&address).await?;

    println!("Server listening on {address}");

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
