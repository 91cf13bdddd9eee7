//! Configuration file watcher for hot reload.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::loader::ConfigError;
use crate::config::store::ConfigStore;
use crate::lifecycle::Shutdown;

/// Tuning for the background watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Quiet period after the last change event before the file is re-read.
    pub debounce: Duration,
    /// Poll interval for platforms that fall back to the polling watcher.
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Handle to a running watch task. Dropping it stops the task.
pub struct ConfigWatch {
    shutdown: Shutdown,
    task: Option<JoinHandle<()>>,
}

impl ConfigWatch {
    pub(crate) fn spawn(
        store: Arc<ConfigStore>,
        options: WatchOptions,
    ) -> Result<Self, ConfigError> {
        let path = store.path().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event.kind) {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(options.poll_interval),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();

        tracing::info!(
            path = %path.display(),
            debounce_ms = options.debounce.as_millis() as u64,
            "Config watcher started"
        );

        let task = tokio::spawn(watch_loop(store, watcher, path, event_rx, stop, options.debounce));

        Ok(Self {
            shutdown,
            task: Some(task),
        })
    }

    /// Stop the watch task and wait for it to exit.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ConfigWatch {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create() || kind.is_remove()
}

/// Register the path again. Some backends drop the registration after one
/// notification, and editors that replace the file leave only the old inode
/// watched. Re-adding an existing registration is a no-op.
fn rearm(watcher: &mut RecommendedWatcher, path: &Path) -> bool {
    match watcher.watch(path, RecursiveMode::NonRecursive) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Config watch re-arm deferred");
            false
        }
    }
}

async fn watch_loop(
    store: Arc<ConfigStore>,
    mut watcher: RecommendedWatcher,
    path: PathBuf,
    mut events: mpsc::UnboundedReceiver<()>,
    mut stop: broadcast::Receiver<()>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;
    let mut armed = true;

    loop {
        let debounce_timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = stop.recv() => {
                tracing::info!(path = %path.display(), "Config watcher stopping");
                break;
            }
            event = events.recv() => {
                if event.is_none() {
                    tracing::warn!(path = %path.display(), "Watcher ended for config file");
                    break;
                }
                deadline = Some(Instant::now() + debounce);
                armed = rearm(&mut watcher, &path);
            }
            _ = debounce_timer => {
                deadline = None;
                if !armed {
                    armed = rearm(&mut watcher, &path);
                }
                // reload() reports its own outcome; the old snapshot stands on error.
                let _ = store.reload().await;
            }
        }
    }
}
