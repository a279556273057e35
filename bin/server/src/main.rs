use callflow_engine::{Engine, Providers, WorkflowStore};
use callflow_server::bridge::{DirectRequester, HttpBridge};
use callflow_server::config::ServerConfig;
use callflow_server::routes::{self, AppState};
use callflow_server::store::FileWorkflowStore;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,callflow_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        workflow_dir = %config.workflow_dir.display(),
        "Loaded configuration"
    );

    let timeout = config.bridge.timeout();
    let mut providers = Providers::new().with_external(Arc::new(DirectRequester::new(timeout)?));
    match &config.bridge.base_url {
        Some(base_url) => {
            let bridge = Arc::new(HttpBridge::new(base_url.as_str(), timeout)?);
            providers = providers
                .with_speech(bridge.clone())
                .with_language(bridge.clone())
                .with_messaging(bridge.clone())
                .with_call_control(bridge);
            tracing::info!(%base_url, "Provider bridge configured");
        }
        None => tracing::warn!("No provider bridge configured; only external requests are wired"),
    }

    let store = Arc::new(FileWorkflowStore::new(&config.workflow_dir));
    let engine = Engine::builder()
        .with_config(config.engine.clone())
        .with_providers(providers)
        .with_store(store.clone())
        .build();

    restore_active_workflows(&engine, store.as_ref()).await;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        let engine = engine.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            engine.shutdown();
            shutdown.cancel();
        }
    });

    let app = routes::router(AppState { engine });
    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Re-activates every stored workflow that was active when last saved.
async fn restore_active_workflows(engine: &Engine, store: &dyn WorkflowStore) {
    let ids = match store.list().await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list stored workflows");
            return;
        }
    };
    for workflow_id in ids {
        match store.load(workflow_id).await {
            Ok(workflow) if workflow.active => {
                if let Err(e) = engine.activate(workflow_id).await {
                    tracing::warn!(%workflow_id, error = %e, "Stored workflow no longer activates");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%workflow_id, error = %e, "Failed to load stored workflow"),
        }
    }
}
