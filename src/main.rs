mod action;
mod art_store;
mod audio;
mod batch;
mod config;
mod engine;
mod history;
mod replay;
mod tags;
mod tools;

use std::sync::Arc;

use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

use crate::art_store::ArtStore;
use crate::config::Config;
use crate::engine::Engine;
use crate::history::HistoryLog;
use crate::tags::LoftyCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::parse();
    let art = match &config.art_dir {
        Some(dir) => ArtStore::in_dir(dir)?,
        None => ArtStore::temporary()?,
    };
    tracing::info!(
        "Serving {} (history {} items, art in {})",
        config.music_dir.display(),
        config.max_history_items,
        art.dir().display()
    );

    let log = Arc::new(HistoryLog::new(art, config.max_history_items));
    let engine = Engine::new(log, Arc::new(LoftyCodec), config.show_hidden);
    let server = tools::MetaRemoteServer::new(config, engine);

    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
