use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use quest_engine::protocol::{self, HostCommand, HostReply};
use quest_engine::quest::{
    start_file_watcher, CatalogHandle, HotReloadEvent, QuestCatalog, QuestEngine,
};
use quest_engine::{EngineConfig, SqliteProgressRepository};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quest_engine=info".parse()?),
        )
        .init();

    let config = EngineConfig::from_env()?;

    let catalog = Arc::new(CatalogHandle::new(QuestCatalog::load_dir(&config.data_dir)?));
    let repo = Arc::new(SqliteProgressRepository::new(&config.database_url).await?);
    info!("Connected to {}", config.database_url);

    let engine = Arc::new(QuestEngine::new(catalog.clone(), repo, &config));

    // Single writer so replies and notifications never interleave mid-line
    let (out_tx, mut out_rx) = mpsc::channel::<HostReply>(256);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = out_rx.recv().await {
            let line = match serde_json::to_string(&reply) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode reply: {}", e);
                    continue;
                }
            };
            if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Forward lifecycle notifications to the host
    let mut notifications = engine.subscribe();
    let notify_tx = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    info!(
                        "{} {} {}",
                        notification.name(),
                        notification.username(),
                        notification.quest_id()
                    );
                    if notify_tx.send(HostReply::Notification { notification }).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Notification forwarder lagged, {} dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if config.hot_reload {
        let mut reloads = start_file_watcher(catalog, config.data_dir.clone())?;
        tokio::spawn(async move {
            while let Some(event) = reloads.recv().await {
                match event {
                    HotReloadEvent::Reloaded(path) => info!("Quest catalog reloaded ({})", path),
                    HotReloadEvent::Error(e) => warn!("Quest catalog reload failed: {}", e),
                }
            }
        });
    }

    info!("Quest engine ready, reading commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<HostCommand>(&line) {
            Ok(command) => protocol::dispatch(&engine, command).await,
            Err(e) => {
                warn!("Bad command: {}", e);
                HostReply::Error { message: format!("Invalid command: {e}") }
            }
        };

        if out_tx.send(reply).await.is_err() {
            break;
        }
    }

    info!("Input closed, shutting down");

    // Closing the engine ends the notification forwarder, which lets the
    // writer drain and stop
    drop(out_tx);
    drop(engine);
    let _ = writer.await;
    Ok(())
}
