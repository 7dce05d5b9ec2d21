//! Hot reload of the config file.
//!
//! The parent directory is watched rather than the file itself: editors and
//! deploy tools usually replace the file through a rename, which drops a
//! watch placed on the old inode.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::ProxyConfig;

/// Sends a freshly validated [`ProxyConfig`] whenever the file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Updates stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = self.path.clone();
        let updates = self.updates;
        let last = Mutex::new(std::fs::read_to_string(&path).unwrap_or_default());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Config watch error");
                    return;
                }
            };
            if !touches(&event, &path) {
                return;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => content,
                // Mid-rename or truncated mid-write; a later event carries the new file.
                _ => return,
            };
            let Ok(mut previous) = last.lock() else {
                return;
            };
            if *previous == content {
                return;
            }

            match parse_config(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Config file changed, applying");
                    *previous = content;
                    let _ = updates.send(config);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Ignoring invalid config change");
                }
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// True for content changes that involve `file`.
fn touches(event: &Event, file: &Path) -> bool {
    let relevant_kind = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    let Some(name) = file.file_name() else {
        return false;
    };
    relevant_kind && event.paths.iter().any(|p| p.file_name() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn only_changes_to_the_watched_file_count() {
        let file = Path::new("/etc/embed-proxy/proxy.toml");

        assert!(touches(&event(EventKind::Modify(ModifyKind::Any), "/etc/embed-proxy/proxy.toml"), file));
        assert!(touches(&event(EventKind::Create(CreateKind::File), "/etc/embed-proxy/proxy.toml"), file));
        assert!(!touches(&event(EventKind::Modify(ModifyKind::Any), "/etc/embed-proxy/other.toml"), file));
        assert!(!touches(&event(EventKind::Remove(RemoveKind::File), "/etc/embed-proxy/proxy.toml"), file));
    }

    #[tokio::test]
    async fn rewriting_the_file_emits_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        std::fs::write(&path, "[upstream]\ntimeout_secs = 15\n").unwrap();

        let (watcher, mut rx) = ConfigWatcher::new(&path);
        let _handle = watcher.run().unwrap();

        std::fs::write(&path, "[upstream]\ntimeout_secs = 7\n").unwrap();

        let applied = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(config) = rx.recv().await {
                if config.upstream.timeout_secs == 7 {
                    return true;
                }
            }
            false
        })
        .await
        .expect("no update within 5s");
        assert!(applied);
    }
}
