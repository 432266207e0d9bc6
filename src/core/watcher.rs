//! Pipeline document hot reload.
//!
//! Watches the document's directory and swaps a freshly parsed
//! [`PipelineConfig`] into the shared handle whenever the file changes.
//! Runs already in flight keep the config they loaded; an invalid document
//! is logged and the previous config stays active.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

use super::pipeline::PipelineConfig;

/// Shared, atomically swappable pipeline config
pub type SharedPipeline = Arc<ArcSwap<PipelineConfig>>;

/// Reloads a pipeline document into a [`SharedPipeline`]
pub struct PipelineWatcher {
    path: PathBuf,
    current: SharedPipeline,
    debounce: Duration,
}

impl PipelineWatcher {
    pub fn new(path: impl Into<PathBuf>, current: SharedPipeline) -> Self {
        Self {
            path: path.into(),
            current,
            debounce: Duration::from_millis(500),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the document once and swap it in
    pub fn reload(&self) -> Result<()> {
        reload_into(&self.path, &self.current)
    }

    /// Start watching. The returned handle stops the watcher.
    pub fn watch(self) -> Result<WatchHandle> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("Not a file path: {}", self.path.display()))?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            let _ = event_tx.send(result);
        })
        .context("Failed to create file watcher")?;
        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        tracing::info!("Watching {} for pipeline changes", self.path.display());

        let task = tokio::spawn(async move {
            // Dropping the debouncer stops the OS watcher
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Pipeline watcher stopping...");
                        break;
                    }
                    event = event_rx.recv() => match event {
                        Some(Ok(events)) => {
                            let touched = events
                                .iter()
                                .any(|e| e.path.file_name() == Some(file_name.as_os_str()));
                            if !touched {
                                continue;
                            }
                            if let Err(e) = reload_into(&self.path, &self.current) {
                                tracing::warn!("Keeping previous pipeline: {:#}", e);
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Watcher error: {:?}", e);
                        }
                        None => {
                            tracing::error!("Watcher channel disconnected");
                            break;
                        }
                    }
                }
            }
        });

        Ok(WatchHandle { stop_tx, task })
    }
}

fn reload_into(path: &Path, current: &SharedPipeline) -> Result<()> {
    let config = PipelineConfig::from_file(path)?;
    let steps = config.enabled_step_count();
    current.store(Arc::new(config));
    tracing::info!(steps, "Pipeline reloaded from {}", path.display());
    Ok(())
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;
    use tempfile::TempDir;

    const ONE_STEP: &str = "preprocessing:\n  pipeline:\n    - server: text-utils\n      tool: trim\n";
    const TWO_STEPS: &str = "preprocessing:\n  pipeline:\n    - server: text-utils\n      tool: trim\n    - server: text-utils\n      tool: collapse_whitespace\n";

    fn shared() -> SharedPipeline {
        Arc::new(ArcSwap::from_pointee(PipelineConfig::default()))
    }

    #[test]
    fn test_reload_swaps_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.yaml");
        std::fs::write(&path, ONE_STEP).unwrap();

        let current = shared();
        PipelineWatcher::new(&path, current.clone()).reload().unwrap();
        assert_eq!(current.load().stage(Stage::Pre).steps.len(), 1);
    }

    #[test]
    fn test_invalid_document_keeps_previous() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.yaml");
        std::fs::write(&path, ONE_STEP).unwrap();

        let current = shared();
        let watcher = PipelineWatcher::new(&path, current.clone());
        watcher.reload().unwrap();

        std::fs::write(&path, "preprocessing: [not, a, stage").unwrap();
        assert!(watcher.reload().is_err());
        assert_eq!(current.load().stage(Stage::Pre).steps.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_picks_up_changes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.yaml");
        std::fs::write(&path, ONE_STEP).unwrap();

        let current = shared();
        let handle = PipelineWatcher::new(&path, current.clone())
            .with_debounce(Duration::from_millis(100))
            .watch()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, TWO_STEPS).unwrap();

        let mut steps = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            steps = current.load().stage(Stage::Pre).steps.len();
            if steps == 2 {
                break;
            }
        }
        assert_eq!(steps, 2);
        handle.stop().await.unwrap();
    }
}
