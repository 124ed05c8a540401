// ABOUTME: Relay command: connect to Canal, subscribe, resolve destination keys, run the sync loop
// ABOUTME: Any setup failure after the source connects disconnects it before returning

use anyhow::{Context, Result};
use canal_client::Subscription;
use tokio::sync::broadcast;

use crate::config::{DestinationConfig, RelayConfig};
use crate::destination::{Destination, MysqlDestination};
use crate::primary_keys::PrimaryKeyMap;
use crate::source::{CanalSource, ChangeStreamSource};
use crate::sync::{SyncLoop, SyncOptions, SyncStats};
use crate::translate::EntryTranslator;

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// Apply changes to the destination. Without it the relay only consumes.
    pub write: bool,
    pub verbose: bool,
}

pub async fn relay(
    config: &RelayConfig,
    options: RelayOptions,
    shutdown: broadcast::Receiver<()>,
) -> Result<SyncStats> {
    let schemas = config.schemas();
    let dest_config = if options.write {
        Some(
            config
                .dest_mysql
                .as_ref()
                .context("[dest_mysql] section is required with --write")?,
        )
    } else {
        None
    };

    tracing::info!("Relaying schemas: {}", schemas.join(", "));
    let mut source = CanalSource::connect(&config.canal).await?;

    let subscription = Subscription {
        client_id: config.canal.client_id.clone(),
        destination: config.canal.destination.clone(),
        filter: config.subscription_filter(),
    };
    if options.verbose {
        println!("{}", filter_line(&subscription.filter));
    }
    if let Err(e) = source.subscribe(subscription).await {
        disconnect_quietly(&mut source).await;
        return Err(e);
    }

    let (destination, keys) = match dest_config {
        Some(dest_config) => match open_destination(dest_config, &schemas).await {
            Ok((destination, keys)) => (Some(destination), keys),
            Err(e) => {
                disconnect_quietly(&mut source).await;
                return Err(e);
            }
        },
        None => {
            tracing::info!("Dry run: changes are consumed but not written");
            (None, PrimaryKeyMap::default())
        }
    };

    let sync_options = SyncOptions {
        batch_size: config.sync.batch_size,
        poll_timeout: config.poll_timeout(),
        interval: config.interval(),
        verbose: options.verbose,
    };
    let translator = EntryTranslator::new(config.sync.unresolved_identity);
    SyncLoop::new(Box::new(source), destination, keys, translator, sync_options)
        .run(shutdown)
        .await
}

async fn open_destination(
    config: &DestinationConfig,
    schemas: &[String],
) -> Result<(Box<dyn Destination>, PrimaryKeyMap)> {
    let mut destination = MysqlDestination::connect(config).await?;
    match PrimaryKeyMap::load(&mut destination, schemas).await {
        Ok(keys) => {
            let destination: Box<dyn Destination> = Box::new(destination);
            Ok((destination, keys))
        }
        Err(e) => {
            if let Err(close_err) = destination.close().await {
                tracing::warn!("Error closing destination: {:#}", close_err);
            }
            Err(e)
        }
    }
}

async fn disconnect_quietly(source: &mut CanalSource) {
    if let Err(e) = source.disconnect().await {
        tracing::warn!("Error disconnecting change stream: {:#}", e);
    }
}

/// The subscription filter as printed in verbose mode.
fn filter_line(filter: &str) -> String {
    format!("filter: {}", filter)
}
