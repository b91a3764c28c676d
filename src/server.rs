//! Client Server
//!
//! Line-oriented TCP server for client commands. Each request is one
//! `\n`-terminated line; each response is the body followed by a newline
//! and the end marker, so clients can detect multi-line responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::command::Handler;
use crate::config::NetworkConfig;
use crate::error::Result;

/// End-of-response marker. Contains a NUL byte, which can never appear in
/// a line of response text, so clients scan for it to find the boundary.
pub const END_MARKER: &str = "\0";

/// Client-facing TCP server
pub struct Server {
    config: NetworkConfig,
    handler: Arc<Handler>,
    connections: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: NetworkConfig, handler: Arc<Handler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            handler,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Bind the configured address and serve until stopped
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address).await?;
        tracing::info!("Server listening on {}", self.config.address);
        self.serve(listener).await
    }

    pub(crate) async fn serve(&self, listener: TcpListener) -> Result<()> {
        let max_message_bytes = self.config.max_message_bytes()? as usize;
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let active = self.connections.fetch_add(1, Ordering::SeqCst);
                            if active >= self.config.max_connections {
                                self.connections.fetch_sub(1, Ordering::SeqCst);
                                tracing::warn!("Max connections reached, rejecting {}", addr);
                                drop(socket);
                                continue;
                            }

                            tracing::debug!("New connection from {}", addr);
                            let handler = Arc::clone(&self.handler);
                            let connections = Arc::clone(&self.connections);
                            let idle_timeout = self.config.idle_timeout();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    socket,
                                    handler,
                                    idle_timeout,
                                    max_message_bytes,
                                )
                                .await
                                {
                                    tracing::warn!("Connection error from {}: {}", addr, e);
                                }
                                connections.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Stop accepting connections
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn handle_connection(
    socket: TcpStream,
    handler: Arc<Handler>,
    idle_timeout: std::time::Duration,
    max_message_bytes: usize,
) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let read = match tokio::time::timeout(idle_timeout, reader.read_line(&mut line)).await {
            Ok(read) => read?,
            Err(_) => {
                tracing::debug!("Closing idle connection");
                return Ok(());
            }
        };
        if read == 0 {
            // client disconnected
            return Ok(());
        }

        let body = if read > max_message_bytes {
            format!("ERROR: message exceeds {max_message_bytes} bytes")
        } else {
            match handler.handle(line.trim()).await {
                Ok(body) => body,
                Err(e) => format!("ERROR: {e}"),
            }
        };

        let response = format!("{body}\n{END_MARKER}");
        write_half.write_all(response.as_bytes()).await?;
    }
}
