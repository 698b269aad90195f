//! Live-reload tests against a real filesystem watcher.
//!
//! Subscribers are fake transports built from futures channels, so these
//! tests cover the watcher and the broadcaster without a socket.

use anyhow::Result;
use futures::channel::mpsc;
use futures::StreamExt;
use larder::live::{Broadcaster, ChangeWatcher};
use std::fs;
use std::io;
use std::time::Duration;
use tempfile::TempDir;

const DEBOUNCE: Duration = Duration::from_millis(100);

type Inbound = mpsc::UnboundedSender<Result<(), io::Error>>;

fn subscribe(broadcaster: &Broadcaster) -> (mpsc::Receiver<String>, Inbound) {
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    let (in_tx, in_rx) = mpsc::unbounded::<Result<(), io::Error>>();
    broadcaster.add_connection(out_tx, in_rx);
    (out_rx, in_tx)
}

/// Everything that arrives within `window`.
async fn collect(rx: &mut mpsc::Receiver<String>, window: Duration) -> Vec<String> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, rx.next()).await {
        messages.push(message);
    }
    messages
}

/// Give the platform watcher a moment to attach before touching files.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_write_broadcasts_one_change_to_every_subscriber() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("style.css"), "a { }")?;

    let broadcaster = Broadcaster::new();
    let watcher = ChangeWatcher::spawn(dir.path(), DEBOUNCE, broadcaster.clone());
    assert!(watcher.is_active());

    let (mut first, _first_in) = subscribe(&broadcaster);
    let (mut second, _second_in) = subscribe(&broadcaster);
    settle().await;

    fs::write(dir.path().join("style.css"), "a { color: blue; }")?;

    for rx in [&mut first, &mut second] {
        let messages = collect(rx, Duration::from_secs(2)).await;
        let changes = messages.iter().filter(|m| *m == "changed:style.css").count();
        assert_eq!(changes, 1, "got {:?}", messages);
    }

    watcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_nested_create_and_delete() -> Result<()> {
    let dir = TempDir::new()?;
    fs::create_dir(dir.path().join("js"))?;

    let broadcaster = Broadcaster::new();
    let watcher = ChangeWatcher::spawn(dir.path(), DEBOUNCE, broadcaster.clone());
    let (mut rx, _in) = subscribe(&broadcaster);
    settle().await;

    fs::write(dir.path().join("js/app.js"), "1")?;
    let messages = collect(&mut rx, Duration::from_secs(2)).await;
    assert!(messages.contains(&"created:js/app.js".to_string()), "got {:?}", messages);

    fs::remove_file(dir.path().join("js/app.js"))?;
    let messages = collect(&mut rx, Duration::from_secs(2)).await;
    assert!(messages.contains(&"deleted:js/app.js".to_string()), "got {:?}", messages);

    watcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_new_directory_is_not_announced() -> Result<()> {
    let dir = TempDir::new()?;

    let broadcaster = Broadcaster::new();
    let watcher = ChangeWatcher::spawn(dir.path(), DEBOUNCE, broadcaster.clone());
    let (mut rx, _in) = subscribe(&broadcaster);
    settle().await;

    fs::create_dir(dir.path().join("images"))?;
    let messages = collect(&mut rx, Duration::from_millis(800)).await;
    assert!(messages.is_empty(), "got {:?}", messages);

    watcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_disconnected_subscriber_is_dropped() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("index.html"), "<head></head>")?;

    let broadcaster = Broadcaster::new();
    let watcher = ChangeWatcher::spawn(dir.path(), DEBOUNCE, broadcaster.clone());
    let (_gone, gone_in) = subscribe(&broadcaster);
    let (mut rx, _in) = subscribe(&broadcaster);
    drop(gone_in);
    settle().await;
    assert_eq!(broadcaster.subscriber_count(), 1);

    fs::write(dir.path().join("index.html"), "<head><title>x</title></head>")?;
    let messages = collect(&mut rx, Duration::from_secs(2)).await;
    assert!(messages.contains(&"changed:index.html".to_string()), "got {:?}", messages);

    watcher.shutdown().await;
    Ok(())
}
