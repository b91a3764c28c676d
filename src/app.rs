//! Application Wiring
//!
//! Builds a node from its configuration and runs it: recover the WAL,
//! populate the engine, start the replication role, then serve clients
//! until a shutdown signal arrives. Shutdown flushes the WAL tail batch
//! before the process exits.

use std::sync::Arc;

use crate::command::Handler;
use crate::config::{Config, ReplicaType};
use crate::engine::Engine;
use crate::error::Result;
use crate::replication::{Master, Replica};
use crate::server::Server;
use crate::wal::{recover, Wal};

/// Run a DenKV node until shutdown
pub async fn run(config: Config) -> Result<()> {
    let wal = if config.wal.enabled {
        let entries = recover(&config.wal.data_directory)?;
        if !entries.is_empty() {
            tracing::info!(entries = entries.len(), "Recovered state from WAL");
        }

        let wal = Wal::open(&config.wal)?;
        let engine = Arc::new(Engine::new(Some(wal.clone())));
        engine.replay(&entries).await;
        start_node(&config, engine, Some(wal.clone())).await?;
        Some(wal)
    } else {
        tracing::warn!("WAL is disabled; writes will not be durable");
        let engine = Arc::new(Engine::new(None));
        start_node(&config, engine, None).await?;
        None
    };

    if let Some(wal) = wal {
        wal.close().await?;
        tracing::info!("WAL closed");
    }
    Ok(())
}

async fn start_node(config: &Config, engine: Arc<Engine>, wal: Option<Wal>) -> Result<()> {
    match config.replication.replica_type {
        ReplicaType::Master => {
            // without a master_host there is nothing to bind for replicas
            if !config.replication.master_host.is_empty() {
                let master = Master::new(
                    config.replication.clone(),
                    config.wal.data_directory.clone(),
                    wal.as_ref().map(Wal::changes),
                );
                tokio::spawn(async move {
                    if let Err(e) = master.run().await {
                        tracing::error!("Replication service failed: {}", e);
                    }
                });
            }
        }
        ReplicaType::Replica => {
            let replica = Replica::new(
                config.replication.clone(),
                config.wal.data_directory.clone(),
            );
            tokio::spawn(async move { replica.run().await });
        }
    }

    let handler = Arc::new(Handler::new(engine, config.replication.replica_type));
    let server = Server::new(config.network.clone(), handler);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            server.stop();
        }
    }

    Ok(())
}
