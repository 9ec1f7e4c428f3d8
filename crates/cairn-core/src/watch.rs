//! Watch mode: rerun whenever a loaded suite file changes
//!
//! The controller cycles `Watching -> Reconstructing -> Watching`. Entering
//! `Reconstructing` tears every watcher down before the next run starts, so
//! reruns never overlap and watchers never pile up.

use crate::error::{RunError, SuiteDefinitionError};
use crate::registry::registry_key;
use crate::run::{RunController, RunSummary};
use colored::*;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Quiet period after the first change before rerunning
pub const DEBOUNCE_MS: u64 = 300;

/// A change notification for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    /// `None` or the epoch when the file no longer exists
    pub modified: Option<SystemTime>,
}

impl FileChange {
    /// Read the current modification time of `path`
    pub fn probe(path: &Path) -> Self {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        Self {
            path: path.to_path_buf(),
            modified,
        }
    }

    pub fn is_removal(&self) -> bool {
        match self.modified {
            None => true,
            Some(time) => time == UNIX_EPOCH,
        }
    }
}

/// Registers and removes file watches
pub trait WatchBackend: Send {
    fn watch(&mut self, path: &Path) -> Result<(), RunError>;
    fn unwatch(&mut self, path: &Path) -> Result<(), RunError>;
}

/// [`WatchBackend`] on top of the platform watcher from `notify`
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    /// The backend and the stream of changes it reports
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<FileChange>), RunError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        for path in &event.paths {
                            let _ = tx.send(FileChange::probe(path));
                        }
                    }
                }
                Err(err) => warn!(error = %err, "file watcher error"),
            }
        })?;
        Ok((Self { watcher }, rx))
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&mut self, path: &Path) -> Result<(), RunError> {
        self.watcher.watch(path, watch_mode(path))?;
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), RunError> {
        self.watcher.unwatch(path)?;
        Ok(())
    }
}

/// Directory roots are watched recursively so suites added in subdirectories trigger a rerun
fn watch_mode(path: &Path) -> RecursiveMode {
    if path.is_dir() {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Reconstructing,
}

/// What one watch cycle did
#[derive(Debug)]
pub enum Cycle {
    Ran(RunSummary),
    /// The changed sources no longer form a valid tree; the previous files stay watched
    Invalid(SuiteDefinitionError),
    /// The change stream ended
    Closed,
}

pub struct WatchController<B: WatchBackend> {
    controller: RunController,
    backend: B,
    changes: mpsc::UnboundedReceiver<FileChange>,
    paths: Vec<PathBuf>,
    watched: Vec<PathBuf>,
    state: WatchState,
    debounce: Duration,
}

impl<B: WatchBackend> WatchController<B> {
    pub fn new(
        controller: RunController,
        backend: B,
        changes: mpsc::UnboundedReceiver<FileChange>,
        paths: Vec<PathBuf>,
    ) -> Self {
        Self {
            controller,
            backend,
            changes,
            paths,
            watched: Vec::new(),
            state: WatchState::Idle,
            debounce: Duration::from_millis(DEBOUNCE_MS),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Paths currently watched
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Root paths the next run will use
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    /// First run, then arm watchers on everything it loaded
    pub async fn start(&mut self) -> Result<RunSummary, RunError> {
        let summary = self.controller.run(&self.paths).await?;
        let files = self.current_files();
        self.arm(files);
        Ok(summary)
    }

    /// Wait for the next change, then tear down, reload and rerun
    pub async fn next_cycle(&mut self) -> Result<Cycle, RunError> {
        let Some(first) = self.changes.recv().await else {
            self.disarm();
            self.state = WatchState::Idle;
            return Ok(Cycle::Closed);
        };

        self.state = WatchState::Reconstructing;
        let previous = self.disarm();

        tokio::time::sleep(self.debounce).await;
        let mut changes = vec![first];
        while let Ok(change) = self.changes.try_recv() {
            changes.push(change);
        }
        info!(changes = changes.len(), "suite sources changed, rerunning");

        self.drop_removed_roots(&changes);
        self.controller.registry_mut().invalidate_all();

        match self.controller.run(&self.paths).await {
            Ok(summary) => {
                let files = self.current_files();
                self.arm(files);
                Ok(Cycle::Ran(summary))
            }
            Err(RunError::Definition(err)) => {
                self.controller
                    .output()
                    .write_line(&err.to_string().red().to_string())?;
                let mut files = self.current_files();
                files.extend(previous);
                files.sort();
                files.dedup();
                self.arm(files);
                Ok(Cycle::Invalid(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Run, then keep rerunning until the change stream closes
    pub async fn run(&mut self) -> Result<RunSummary, RunError> {
        let mut last = self.start().await?;
        loop {
            match self.next_cycle().await? {
                Cycle::Ran(summary) => last = summary,
                Cycle::Invalid(_) => {}
                Cycle::Closed => return Ok(last),
            }
        }
    }

    fn current_files(&self) -> Vec<PathBuf> {
        let mut files = self.controller.registry().loaded_files();
        files.extend(
            self.paths
                .iter()
                .filter(|path| path.is_dir())
                .map(|path| registry_key(path)),
        );
        files.sort();
        files.dedup();
        files
    }

    fn arm(&mut self, files: Vec<PathBuf>) {
        for file in files {
            match self.backend.watch(&file) {
                Ok(()) => self.watched.push(file),
                Err(err) => warn!(path = %file.display(), error = %err, "cannot watch suite source"),
            }
        }
        debug!(watched = self.watched.len(), "watchers armed");
        self.state = WatchState::Watching;
    }

    /// Remove every watcher; returns what was watched
    fn disarm(&mut self) -> Vec<PathBuf> {
        let watched = std::mem::take(&mut self.watched);
        for file in &watched {
            if let Err(err) = self.backend.unwatch(file) {
                debug!(path = %file.display(), error = %err, "unwatch failed");
            }
        }
        watched
    }

    fn drop_removed_roots(&mut self, changes: &[FileChange]) {
        let removed: Vec<PathBuf> = changes
            .iter()
            .filter(|change| change.is_removal())
            .map(|change| resolve(&change.path))
            .collect();
        if removed.is_empty() {
            return;
        }

        self.paths.retain(|path| {
            let gone = removed.contains(&resolve(path));
            if gone {
                warn!(path = %path.display(), "watched suite was removed, dropping it from the run");
            }
            !gone
        });
    }
}

/// Canonical path, tolerating a file that no longer exists
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            match std::fs::canonicalize(parent) {
                Ok(parent) => parent.join(name),
                Err(_) => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}
