//! Configuration file watcher for hot reload.
//!
//! Only the service endpoint table is applied live; everything else needs a
//! restart.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;
use crate::discovery::StaticResolver;

/// Watches one config file and forwards every version that loads and
/// validates.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => reload(&path, &tx),
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Watching config for endpoint changes");
        Ok(watcher)
    }
}

/// Invalid edits are logged and dropped; the running table stays in place.
fn reload(path: &Path, tx: &mpsc::UnboundedSender<GatewayConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::debug!(path = ?path, "Config changed on disk");
            let _ = tx.send(config);
        }
        Err(e) => tracing::error!(path = ?path, error = %e, "Rejected config change, keeping current endpoints"),
    }
}

/// Apply config updates to the resolver until shutdown or the channel closes.
pub async fn apply_updates(
    resolver: Arc<StaticResolver>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    resolver.reload(&config.services);
                    tracing::info!(services = config.services.len(), "Endpoint table reloaded");
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;
    use crate::discovery::EndpointResolver;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn test_updates_reload_resolver() {
        let resolver = Arc::new(StaticResolver::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(apply_updates(resolver.clone(), rx, shutdown.subscribe()));

        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig {
            name: "user".into(),
            endpoints: vec!["127.0.0.1:8001".into()],
            rule: None,
        });
        tx.send(config).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(resolver.resolve("user").len(), 1);
    }
}
