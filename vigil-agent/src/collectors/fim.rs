//! File-integrity observation.
//!
//! Watches the configured paths recursively; each create/modify/remove
//! becomes an event carrying the path and, where readable, the file's
//! SHA-256.

use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::{Event as FsEvent, EventKind, RecursiveMode, Watcher};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::types::{Event, Severity};
use vigil_fabric::EventProducer;

/// Hashing is skipped for files larger than this.
const MAX_HASH_BYTES: u64 = 64 * 1024 * 1024;

pub async fn run_watcher(
    paths: Vec<String>,
    producer: EventProducer,
    shutdown: watch::Receiver<bool>,
) {
    let (tx, rx) = std_mpsc::channel::<notify::Result<FsEvent>>();
    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "file-integrity watcher unavailable");
            return;
        }
    };
    for path in &paths {
        if let Err(err) = watcher.watch(Path::new(path), RecursiveMode::Recursive) {
            warn!(path, error = %err, "watch failed");
        }
    }
    info!(?paths, "file-integrity watcher running");

    // The notify callback feeds a std channel; poll it off the async
    // runtime. The bounded recv timeout doubles as the shutdown check
    // interval.
    loop {
        if *shutdown.borrow() {
            return;
        }
        let fs_event = tokio::task::block_in_place(|| rx.recv_timeout(Duration::from_millis(500)));
        match fs_event {
            Ok(Ok(event)) => {
                for path in &event.paths {
                    if let Some(evt) = integrity_event(&event.kind, path) {
                        if producer.try_publish(evt).is_err() {
                            debug!("integrity event dropped, publish buffer full");
                        }
                    }
                }
            }
            Ok(Err(err)) => warn!(error = %err, "watch error"),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn integrity_event(kind: &EventKind, path: &Path) -> Option<Event> {
    let change = match kind {
        EventKind::Create(_) => "created",
        EventKind::Modify(_) => "modified",
        EventKind::Remove(_) => "removed",
        _ => return None,
    };

    let mut evt = Event::new("agent", "file.integrity", Severity::Medium);
    evt.description = format!("{} {}", path.display(), change);
    evt.metadata.insert("path".into(), Value::from(path.display().to_string()));
    evt.metadata.insert("change".into(), Value::from(change));
    if change != "removed" {
        if let Some(digest) = hash_file(path) {
            evt.metadata.insert("sha256".into(), Value::from(digest));
        }
    }
    Some(evt)
}

fn hash_file(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() > MAX_HASH_BYTES {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_event_for_modify() {
        let kind = EventKind::Modify(notify::event::ModifyKind::Any);
        let evt = integrity_event(&kind, Path::new("/etc/passwd")).unwrap();
        assert_eq!(evt.event_type, "file.integrity");
        assert_eq!(evt.metadata.get("change").unwrap(), "modified");
        assert_eq!(evt.severity, Severity::Medium);
    }

    #[test]
    fn test_access_events_ignored() {
        let kind = EventKind::Access(notify::event::AccessKind::Any);
        assert!(integrity_event(&kind, Path::new("/etc/passwd")).is_none());
    }

    #[test]
    fn test_hash_file_roundtrip() {
        let dir = std::env::temp_dir().join("vigil-fim-test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("sample.txt");
        std::fs::write(&file, b"integrity").unwrap();
        let digest = hash_file(&file).unwrap();
        assert_eq!(digest.len(), 64);
        // Same content, same digest.
        assert_eq!(hash_file(&file).unwrap(), digest);
        std::fs::remove_file(&file).ok();
    }
}
