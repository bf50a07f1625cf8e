use chat_relay::config::Config;
use chat_relay::server::{self, Server};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let server = Arc::new(Server::new(&config));

    match server::serve(server, &config, shutdown_signal()) {
        Ok(bound) => {
            let scheme = if bound.secure { "wss" } else { "ws" };
            info!("Listening on {}://{}", scheme, bound.addr);
            bound.serving.await;
        }
        Err(e) => {
            error!("Failed to bind to {}: {}", config.addr(), e);
            std::process::exit(1);
        }
    }
}
