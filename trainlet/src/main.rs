use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use trainlet::{
    Config, JsonDirStore, NotebookService, SessionRegistry, build_gate,
    transport::{ServerConfig, serve},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trainlet=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "Starting trainlet");

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let store = Arc::new(JsonDirStore::new(config.data_dir.clone()));
    let registry = Arc::new(SessionRegistry::with_python(config.python.clone()));
    let gate = build_gate(&config.gate);

    let service = Arc::new(
        NotebookService::new(store, registry, gate).with_exec_timeout(config.exec_timeout),
    );

    serve(
        ServerConfig {
            host: config.host.clone(),
            port: config.port,
        },
        service,
    )
    .await
}
