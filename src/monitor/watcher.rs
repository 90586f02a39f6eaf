// src/monitor/watcher.rs

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Called with `(pid, changed_path)` for each debounced activity signal.
pub type ActivityCallback = Arc<dyn Fn(u32, PathBuf) + Send + Sync>;

type Registrations = Arc<Mutex<HashMap<PathBuf, HashSet<u32>>>>;

fn lock_regs(regs: &Mutex<HashMap<PathBuf, HashSet<u32>>>) -> MutexGuard<'_, HashMap<PathBuf, HashSet<u32>>> {
    regs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Filesystem watcher shared by all monitored processes.
///
/// Each path is watched once no matter how many PIDs reference it, and is
/// unwatched when the last PID unregisters. The underlying notify watcher is
/// created on first use.
pub struct FsWatcher {
    debounce: Duration,
    on_activity: ActivityCallback,
    registrations: Registrations,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("debounce", &self.debounce)
            .field("paths", &lock_regs(&self.registrations).len())
            .finish()
    }
}

impl FsWatcher {
    pub fn new(debounce: Duration, on_activity: ActivityCallback) -> Self {
        Self {
            debounce,
            on_activity,
            registrations: Arc::new(Mutex::new(HashMap::new())),
            watcher: Mutex::new(None),
        }
    }

    /// Start attributing changes under `path` to `pid`. Returns the
    /// canonical path actually registered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, pid: u32, path: &Path) -> Result<PathBuf> {
        let path = path
            .canonicalize()
            .with_context(|| format!("resolving watch path {}", path.display()))?;
        self.add_reference(pid, path, |path| self.start_watching(path))
    }

    /// Record `pid` against `path`, calling `watch` when the path is new.
    /// A failed `watch` leaves no registration behind.
    fn add_reference(
        &self,
        pid: u32,
        path: PathBuf,
        watch: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<PathBuf> {
        let newly_added = {
            let mut regs = lock_regs(&self.registrations);
            let pids = regs.entry(path.clone()).or_default();
            let first = pids.is_empty();
            pids.insert(pid);
            first
        };

        if !newly_added {
            debug!(pid, path = %path.display(), "path already watched; added reference");
            return Ok(path);
        }
        if let Err(e) = watch(&path) {
            self.remove_registration(pid, &path);
            return Err(e);
        }
        info!(pid, path = %path.display(), "watching session directory");
        Ok(path)
    }

    fn start_watching(&self, path: &Path) -> Result<()> {
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.create_watcher()?);
        }
        if let Some(watcher) = guard.as_mut() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", path.display()))?;
        }
        Ok(())
    }

    /// Drop `pid`'s reference to `path`, unwatching it when unreferenced.
    pub fn unregister(&self, pid: u32, path: &Path) {
        if !self.remove_registration(pid, path) {
            return;
        }
        let mut guard = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = guard.as_mut() {
            if let Err(e) = watcher.unwatch(path) {
                debug!(path = %path.display(), error = %e, "unwatch failed (path may be gone)");
            }
        }
        debug!(path = %path.display(), "stopped watching session directory");
    }

    /// Returns true when `path` has no references left.
    fn remove_registration(&self, pid: u32, path: &Path) -> bool {
        let mut regs = lock_regs(&self.registrations);
        let Some(pids) = regs.get_mut(path) else {
            return false;
        };
        pids.remove(&pid);
        if pids.is_empty() {
            regs.remove(path);
            true
        } else {
            false
        }
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock_regs(&self.registrations).keys().cloned().collect();
        paths.sort();
        paths
    }

    fn create_watcher(&self) -> Result<RecommendedWatcher> {
        // Channel from the blocking notify callback into the async world.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    // Receiver gone means the monitor is shutting down.
                    let _ = event_tx.send(event);
                }
                Err(err) => {
                    eprintln!("taskworker: file watch error: {err}");
                }
            },
            Config::default(),
        )
        .context("creating filesystem watcher")?;

        tokio::spawn(forward_events(
            event_rx,
            Arc::clone(&self.registrations),
            Arc::clone(&self.on_activity),
            self.debounce,
        ));

        Ok(watcher)
    }
}

/// Map notify events to PIDs and apply leading-edge debouncing per PID.
async fn forward_events(
    mut event_rx: mpsc::UnboundedReceiver<Event>,
    registrations: Registrations,
    on_activity: ActivityCallback,
    debounce: Duration,
) {
    let mut last_emit: HashMap<u32, Instant> = HashMap::new();

    while let Some(event) = event_rx.recv().await {
        if matches!(event.kind, EventKind::Access(_)) {
            continue;
        }

        let hits: Vec<(u32, PathBuf)> = {
            let regs = lock_regs(&registrations);
            let mut hits = Vec::new();
            for path in &event.paths {
                for (root, pids) in regs.iter() {
                    if path.starts_with(root) {
                        hits.extend(pids.iter().map(|pid| (*pid, path.clone())));
                    }
                }
            }
            hits
        };

        let now = Instant::now();
        for (pid, path) in hits {
            let due = last_emit
                .get(&pid)
                .is_none_or(|last| now.duration_since(*last) >= debounce);
            if due {
                last_emit.insert(pid, now);
                on_activity(pid, path);
            }
        }

        // Forget PIDs that are no longer registered anywhere.
        let live: HashSet<u32> = lock_regs(&registrations)
            .values()
            .flat_map(|pids| pids.iter().copied())
            .collect();
        last_emit.retain(|pid, _| live.contains(pid));
    }

    warn!("filesystem watcher event loop finished");
}
