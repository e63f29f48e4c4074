//! Re-runs a dispatch whenever its kernel file changes.

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use tracing::{error, info};

/// Watches the directory holding `kernel` and reports changes to that one file.
///
/// The directory is watched rather than the file so that editors which
/// replace files on save are still picked up. Keep the returned watcher
/// alive for as long as events are wanted.
///
/// # Errors
///
/// Fails if the watcher cannot be created or the directory cannot be watched.
pub fn start(kernel: &Path) -> Result<(RecommendedWatcher, Receiver<PathBuf>)> {
    let directory = match kernel.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = kernel.file_name().context("kernel path has no file name")?.to_owned();
    let (tx, rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !event.kind.is_modify() && !event.kind.is_create() {
                return;
            }
            for path in event.paths.iter().filter(|p| p.file_name() == Some(file_name.as_os_str())) {
                if tx.send(path.clone()).is_err() {
                    return;
                }
            }
        }
        Err(e) => error!("Error watching kernel file: {e:?}"),
    })?;

    watcher
        .watch(&directory, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", directory.display()))?;
    info!("Watching {} for changes", kernel.display());
    Ok((watcher, rx))
}
