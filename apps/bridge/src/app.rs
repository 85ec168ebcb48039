//! Application orchestrator: wires the bridge components together.

use std::sync::Arc;
use std::time::Duration;

use mcbridge_credentials::{CredentialCache, LdapStsProvider};
use mcbridge_rpc_server::{RpcServer, ServerConfig};
use mcbridge_session::BridgeService;
use mcbridge_store::{FsStoreFactory, S3StoreFactory, StoreFactory};
use tokio_util::sync::CancellationToken;

use crate::config::{Backend, BridgeConfig};
use crate::handler::BridgeHandler;

/// Time given to the final status reply to reach the caller.
const EXIT_GRACE: Duration = Duration::from_millis(250);

/// Runs the bridge until Ctrl-C, or until a caller has seen a finished
/// transfer when `exitWhenFinished` is set.
pub async fn run(config: BridgeConfig, port: u16) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let finished = CancellationToken::new();

    let provider = Arc::new(LdapStsProvider::new());
    let cache = Arc::new(CredentialCache::new(provider).with_refresh_margin(config.refresh_margin()));

    let stores: Arc<dyn StoreFactory> = match config.backend {
        Backend::S3 => Arc::new(S3StoreFactory::new(config.s3_options())),
        Backend::Fs => {
            tracing::info!(root = %config.fs_root.display(), "using filesystem store");
            Arc::new(FsStoreFactory::new(config.fs_root.clone()))
        }
    };

    let service = Arc::new(BridgeService::new(
        cache,
        stores,
        config.service_settings(),
        shutdown.clone(),
    ));
    let handler = BridgeHandler::new(Arc::clone(&service), config.exit_when_finished, finished.clone());

    let server = RpcServer::new(
        ServerConfig {
            bind: config.bind,
            port,
        },
        handler,
    );
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut server_task => {
            service.shutdown();
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        _ = finished.cancelled() => {
            tracing::info!("transfer finished, shutting down");
            tokio::time::sleep(EXIT_GRACE).await;
        }
    }

    service.shutdown();
    server.shutdown();
    server_task.await??;
    Ok(())
}
