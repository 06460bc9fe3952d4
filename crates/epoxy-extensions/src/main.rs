mod bmc;
mod command;
mod config;
mod error;
mod gate;
mod host;
mod metrics;
mod node;
mod routes;
mod token;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use crate::bmc::{
    BmcCredentialStore, CredentialProvider, DatastoreProvider, MemoryProvider, SystemResolver,
    TokenSource,
};
use crate::command::{CommandRunner, ProcessRunner};
use crate::config::{Config, CredentialStoreKind};
use crate::metrics::ExtensionMetrics;
use crate::node::NodeLifecycleManager;
use crate::routes::Dispatcher;
use crate::token::TokenProvisioner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env().context("load configuration")?;
    info!(
        bin_dir = %config.bin_dir.display(),
        timeout_secs = config.operation_timeout.as_secs(),
        credential_store = ?config.credential_store,
        "configuration loaded"
    );

    let provider: Arc<dyn CredentialProvider> = match config.credential_store {
        CredentialStoreKind::Datastore => {
            let token_source = match &config.datastore_token {
                Some(token) => TokenSource::Static(token.clone()),
                None => TokenSource::Metadata {
                    url: config.metadata_url.clone(),
                },
            };
            info!(url = %config.datastore_url, "Datastore credential store configured");
            Arc::new(DatastoreProvider::new(&config.datastore_url, token_source)?)
        }
        CredentialStoreKind::Memory => {
            info!("in-memory credential store configured; passwords are not persisted");
            Arc::new(MemoryProvider::default())
        }
    };

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let dispatcher = Dispatcher::new(
        TokenProvisioner::new(&config.bin_dir, runner.clone(), config.operation_timeout),
        BmcCredentialStore::new(Arc::new(SystemResolver), provider, config.operation_timeout),
        NodeLifecycleManager::new(&config.bin_dir, runner, config.operation_timeout),
    );

    let metrics = ExtensionMetrics::new().context("register metrics")?;

    let addr = config.listen_address;
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("bind {addr}"))?
        .serve(routes::router(dispatcher, metrics).into_make_service());

    info!("Webserver running on http://{addr}");

    let graceful = server.with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    });

    if let Err(e) = graceful.await {
        error!("Shutdown error: {e}");
    }

    Ok(())
}
