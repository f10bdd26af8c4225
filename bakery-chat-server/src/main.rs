use std::path::PathBuf;
use std::sync::Arc;

use bakery_chat::logging::{init_file_logging, init_logging};
use bakery_chat_server::{handle_connection, ServerConfig, ServerState};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Logging comes up before the config so config loading is logged too
    let _ = dotenvy::dotenv();
    let log_dir = std::env::var("BAKERY_CHAT_LOG_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from);
    let _log_guard = match log_dir {
        Some(dir) => match init_file_logging(&dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                init_logging();
                error!("File logging disabled: {}", e);
                None
            }
        },
        None => {
            init_logging();
            None
        }
    };

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let state = match ServerState::from_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open message log: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };

    info!("Bakery chat server listening on {}", config.addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, state).await;
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
