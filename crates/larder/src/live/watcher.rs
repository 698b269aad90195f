//! Filesystem watcher for the served root.
//!
//! Raw events are debounced by `notify-debouncer-full`, mapped to
//! [`ChangeMessage`]s relative to the root and handed to the
//! [`Broadcaster`]. Directory events are dropped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify_debouncer_full::notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache};
use pantry::relative_key;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::Broadcaster;

/// A change under the served root, by relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeMessage {
    Changed(String),
    Created(String),
    Deleted(String),
    Renamed { from: String, to: String },
}

impl fmt::Display for ChangeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeMessage::Changed(path) => write!(f, "changed:{}", path),
            ChangeMessage::Created(path) => write!(f, "created:{}", path),
            ChangeMessage::Deleted(path) => write!(f, "deleted:{}", path),
            ChangeMessage::Renamed { from, to } => write!(f, "renamed:{}:{}", from, to),
        }
    }
}

/// Map one raw event to change messages for files under `root`.
pub fn messages_for(root: &Path, event: &Event) -> Vec<ChangeMessage> {
    let files = || {
        event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .filter_map(|p| relative_key(root, p))
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => files().map(ChangeMessage::Created).collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(|p| relative_key(root, p))
            .map(ChangeMessage::Deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => rename_messages(root, mode, &event.paths),
        EventKind::Modify(ModifyKind::Metadata(kind)) => match kind {
            MetadataKind::WriteTime | MetadataKind::Any => {
                files().map(ChangeMessage::Changed).collect()
            }
            _ => Vec::new(),
        },
        EventKind::Modify(_) => files().map(ChangeMessage::Changed).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn rename_messages(root: &Path, mode: RenameMode, paths: &[PathBuf]) -> Vec<ChangeMessage> {
    match (mode, paths) {
        (RenameMode::Both, [from, to]) => {
            if to.is_dir() {
                return Vec::new();
            }
            match (relative_key(root, from), relative_key(root, to)) {
                (Some(from), Some(to)) => vec![ChangeMessage::Renamed { from, to }],
                (None, Some(to)) => vec![ChangeMessage::Created(to)],
                (Some(from), None) => vec![ChangeMessage::Deleted(from)],
                (None, None) => Vec::new(),
            }
        }
        (RenameMode::From, _) => paths
            .iter()
            .filter_map(|p| relative_key(root, p))
            .map(ChangeMessage::Deleted)
            .collect(),
        (RenameMode::To, _) => paths
            .iter()
            .filter(|p| !p.is_dir())
            .filter_map(|p| relative_key(root, p))
            .map(ChangeMessage::Created)
            .collect(),
        // Unpaired or unknown: decide by what is on disk now.
        _ => paths
            .iter()
            .filter(|p| !p.is_dir())
            .filter_map(|p| {
                let rel = relative_key(root, p)?;
                Some(if p.exists() {
                    ChangeMessage::Created(rel)
                } else {
                    ChangeMessage::Deleted(rel)
                })
            })
            .collect(),
    }
}

/// Messages for one debounced batch, de-duplicated in order.
pub fn batch_messages<'a, I>(root: &Path, events: I) -> Vec<ChangeMessage>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut out: Vec<ChangeMessage> = Vec::new();
    for event in events {
        for message in messages_for(root, event) {
            if !out.contains(&message) {
                out.push(message);
            }
        }
    }
    out
}

/// Running watcher. Dropping it stops watching and ends the event loop.
pub struct ChangeWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    task: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Watch `root` recursively and broadcast its changes.
    ///
    /// Failing to set up the watch is logged and yields a watcher that does
    /// nothing. Must be called from within a tokio runtime.
    pub fn spawn(root: &Path, debounce: Duration, broadcaster: Broadcaster) -> Self {
        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                warn!("Live reload disabled, cannot resolve {}: {}", root.display(), e);
                return Self::inert();
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<Vec<DebouncedEvent>>();

        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let _ = tx.send(events);
            }
            Err(errors) => {
                for e in errors {
                    warn!(error = %e, "File watcher error");
                }
            }
        });

        let mut debouncer = match debouncer {
            Ok(debouncer) => debouncer,
            Err(e) => {
                warn!("Live reload disabled, cannot create watcher: {}", e);
                return Self::inert();
            }
        };

        if let Err(e) = debouncer.watch(&root, RecursiveMode::Recursive) {
            warn!("Live reload disabled, cannot watch {}: {}", root.display(), e);
            return Self::inert();
        }

        info!("👀 Watching {} for changes ({:?} debounce)", root.display(), debounce);

        let task = tokio::spawn(forward(root, rx, broadcaster));

        Self {
            debouncer: Some(debouncer),
            task: Some(task),
        }
    }

    fn inert() -> Self {
        Self {
            debouncer: None,
            task: None,
        }
    }

    /// Whether a watch is actually attached.
    pub fn is_active(&self) -> bool {
        self.debouncer.is_some()
    }

    /// Stop watching and wait for the event loop to drain.
    pub async fn shutdown(mut self) {
        self.debouncer.take();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn forward(
    root: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Vec<DebouncedEvent>>,
    broadcaster: Broadcaster,
) {
    while let Some(batch) = rx.recv().await {
        for message in batch_messages(&root, batch.iter().map(|e| &e.event)) {
            debug!("Broadcasting {}", message);
            broadcaster.send_to_all(&message.to_string());
        }
    }
    debug!("File watcher closed");
}
