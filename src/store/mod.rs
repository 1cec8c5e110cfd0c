//! YAML-backed plugin document with a single writer.
//!
//! One task owns the document. Snapshots, mutations and reloads are
//! messages on the same queue, so a file-watch reload can never land
//! between a mutation and its flush to disk.

pub mod document;

pub use document::{PluginConfig, TemplateKind};

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid document: {0}")]
    Parse(serde_yaml::Error),
    #[error("cannot serialize document: {0}")]
    Serialize(serde_yaml::Error),
    #[error("invalid key path: {0:?}")]
    InvalidPath(String),
    #[error("store task stopped")]
    Closed,
}

/// What a mutation did to the document. Only `Changed` is flushed.
pub enum Change<R> {
    Changed(R),
    Unchanged(R),
}

type Mutation = Box<dyn FnOnce(&mut PluginConfig) -> bool + Send>;

enum StoreCommand {
    Snapshot(oneshot::Sender<PluginConfig>),
    Mutate {
        apply: Mutation,
        done: oneshot::Sender<Result<(), StoreError>>,
    },
    Reload(oneshot::Sender<Result<(), StoreError>>),
}

/// Handle to the document owner. Cheap to clone.
#[derive(Clone)]
pub struct ConfigStore {
    tx: mpsc::Sender<StoreCommand>,
    path: PathBuf,
}

impl ConfigStore {
    /// Loads (or creates) the document and starts its owner task.
    ///
    /// With `watch_interval` set, the file's modification time is polled
    /// and external edits are reloaded whole.
    pub async fn open(path: impl Into<PathBuf>, watch_interval: Option<Duration>) -> Self {
        let path = path.into();
        let mut task = StoreTask {
            path: path.clone(),
            doc: PluginConfig::default(),
            seen_mtime: None,
        };
        task.initial_load().await;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(task.run(rx, watch_interval));
        Self { tx, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current document
    pub async fn snapshot(&self) -> Result<PluginConfig, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Snapshot(tx))
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)
    }

    /// Applies `f` to the document and flushes it if `f` reports a change.
    ///
    /// A failed flush rolls the in-memory document back.
    pub async fn update<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut PluginConfig) -> Change<R> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let apply: Mutation = Box::new(move |doc: &mut PluginConfig| {
            let (changed, result) = match f(doc) {
                Change::Changed(r) => (true, r),
                Change::Unchanged(r) => (false, r),
            };
            let _ = result_tx.send(result);
            changed
        });

        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Mutate {
                apply,
                done: done_tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        done_rx.await.map_err(|_| StoreError::Closed)??;
        result_rx.await.map_err(|_| StoreError::Closed)
    }

    /// Re-reads the file, replacing the in-memory document.
    /// On failure the previous document is kept.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Reload(tx))
            .await
            .map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

struct StoreTask {
    path: PathBuf,
    doc: PluginConfig,
    /// mtime after our last load or save; anything else is an external edit
    seen_mtime: Option<SystemTime>,
}

impl StoreTask {
    async fn initial_load(&mut self) {
        match tokio::fs::try_exists(&self.path).await {
            Ok(true) => {
                if let Err(e) = self.load().await {
                    error!(
                        "[store] Failed to load {}: {e} (continuing with defaults)",
                        self.path.display()
                    );
                    self.seen_mtime = self.mtime().await;
                }
            }
            _ => {
                info!("[store] {} not found, writing defaults", self.path.display());
                if let Err(e) = self.save().await {
                    warn!("[store] Could not write default document: {e}");
                }
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<StoreCommand>, watch_interval: Option<Duration>) {
        let mut ticker = watch_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            let command = match ticker.as_mut() {
                Some(interval) => tokio::select! {
                    cmd = rx.recv() => cmd,
                    _ = interval.tick() => {
                        self.check_for_external_edit().await;
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            let Some(command) = command else {
                debug!("[store] All handles dropped, stopping");
                return;
            };

            match command {
                StoreCommand::Snapshot(reply) => {
                    let _ = reply.send(self.doc.clone());
                }
                StoreCommand::Mutate { apply, done } => {
                    let before = self.doc.clone();
                    let result = if apply(&mut self.doc) {
                        match self.save().await {
                            Ok(()) => Ok(()),
                            Err(e) => {
                                error!("[store] Save failed, change rolled back: {e}");
                                self.doc = before;
                                Err(e)
                            }
                        }
                    } else {
                        Ok(())
                    };
                    let _ = done.send(result);
                }
                StoreCommand::Reload(reply) => {
                    let result = self.load().await;
                    if let Err(e) = &result {
                        error!("[store] Reload of {} failed: {e}", self.path.display());
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    async fn check_for_external_edit(&mut self) {
        let current = self.mtime().await;
        if current.is_none() || current == self.seen_mtime {
            return;
        }
        info!("[store] {} changed on disk, reloading", self.path.display());
        if let Err(e) = self.load().await {
            error!("[store] Reload failed, keeping previous document: {e}");
            // Don't retry the same broken edit on every tick
            self.seen_mtime = current;
        }
    }

    async fn load(&mut self) -> Result<(), StoreError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.doc = PluginConfig::from_yaml(&text)?;
        self.seen_mtime = self.mtime().await;
        debug!(
            "[store] Loaded {} ({} subscribers)",
            self.path.display(),
            self.doc.subscribed_users.len()
        );
        Ok(())
    }

    /// Writes to a sibling temp file and renames it over the target.
    async fn save(&mut self) -> Result<(), StoreError> {
        let yaml = self.doc.to_yaml()?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))?;

        self.seen_mtime = self.mtime().await;
        Ok(())
    }

    async fn mtime(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::open(dir.path().join("config.yaml"), None).await
    }

    #[tokio::test]
    async fn test_open_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        assert!(store.path().exists());
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            PluginConfig::from_yaml(&on_disk).unwrap(),
            PluginConfig::default()
        );
    }

    #[tokio::test]
    async fn test_open_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "subscribed_users: ['7', '8']\nlast_like_date: '2026-01-01'\n")
            .unwrap();
        let store = ConfigStore::open(&path, None).await;
        let doc = store.snapshot().await.unwrap();
        assert_eq!(doc.subscribed_users, vec!["7", "8"]);
        assert_eq!(doc.last_like_date, "2026-01-01");
    }

    #[tokio::test]
    async fn test_open_with_broken_file_keeps_defaults_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "subscribed_users: [unclosed\n").unwrap();
        let store = ConfigStore::open(&path, None).await;
        assert_eq!(store.snapshot().await.unwrap(), PluginConfig::default());
        // The user's file is not overwritten
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "subscribed_users: [unclosed\n"
        );
    }

    #[tokio::test]
    async fn test_update_flushes_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        let added = store
            .update(|doc| Change::Changed(doc.subscribe("42")))
            .await
            .unwrap();
        assert!(added);

        let on_disk = PluginConfig::from_yaml(&std::fs::read_to_string(store.path()).unwrap())
            .unwrap();
        assert_eq!(on_disk.subscribed_users, vec!["42"]);
    }

    #[tokio::test]
    async fn test_unchanged_update_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        std::fs::write(store.path(), "last_like_date: 'edited'\n").unwrap();

        let n = store
            .update(|doc| Change::Unchanged(doc.subscribed_users.len()))
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "last_like_date: 'edited'\n"
        );
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let store = ConfigStore::open(&path, None).await;
        for id in ["1", "2", "3"] {
            store
                .update(move |doc| Change::Changed(doc.subscribe(id)))
                .await
                .unwrap();
        }
        let saved = store.snapshot().await.unwrap();

        let reopened = ConfigStore::open(&path, None).await;
        assert_eq!(reopened.snapshot().await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        std::fs::write(store.path(), "subscribed_users: ['99']\n").unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.snapshot().await.unwrap().subscribed_users, vec!["99"]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        store
            .update(|doc| Change::Changed(doc.subscribe("5")))
            .await
            .unwrap();
        std::fs::write(store.path(), "subscribed_users: 12: [").unwrap();

        assert!(store.reload().await.is_err());
        assert_eq!(store.snapshot().await.unwrap().subscribed_users, vec!["5"]);
    }

    #[tokio::test]
    async fn test_watch_reloads_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let store = ConfigStore::open(&path, Some(Duration::from_millis(20))).await;

        std::fs::write(&path, "subscribed_users: ['314']\n").unwrap();
        // Make sure the edit is visible even on coarse-mtime filesystems
        let later = filetime::FileTime::from_system_time(
            SystemTime::now() + Duration::from_secs(5),
        );
        filetime::set_file_mtime(&path, later).unwrap();

        let mut reloaded = false;
        for _ in 0..100 {
            if store.snapshot().await.unwrap().subscribed_users == vec!["314"] {
                reloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reloaded, "watcher did not pick up the edit");
    }

    #[tokio::test]
    async fn test_own_save_does_not_trigger_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let store = ConfigStore::open(&path, Some(Duration::from_millis(10))).await;
        store
            .update(|doc| Change::Changed(doc.subscribe("1")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.snapshot().await.unwrap().subscribed_users, vec!["1"]);
    }
}
