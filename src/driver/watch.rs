// ABOUTME: Filesystem change detection for dev-mode reload (spec.md §5 "File
// watching"). No watch crate appears anywhere in the corpus this crate is
// grounded on, so this hand-rolls a small `std::fs` metadata-polling
// subsystem behind a `Watcher` trait — the teacher's own style of hand-rolling
// small subsystems (`sandbox.rs`, `highlighter.rs`) rather than reaching for a
// framework where a few dozen lines suffice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// The capability `ReloadEngine::notify_changed` (`reload.rs`) needs driven
/// against it: something that can report which files changed since it was
/// last asked. `PollingWatcher` is the real implementation; `FakeWatcher`
/// lets tests control exactly what "changed" without touching a filesystem.
pub trait Watcher: Send {
    /// Returns every watched file whose modification time moved forward
    /// since the previous call (the first call reports nothing — it only
    /// establishes the baseline).
    fn poll_changes(&self) -> Vec<PathBuf>;
}

/// Recursively walks a fixed set of root directories, diffing mtimes against
/// the previous poll.
pub struct PollingWatcher {
    roots: Vec<PathBuf>,
    mtimes: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl PollingWatcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        PollingWatcher {
            roots,
            mtimes: Mutex::new(HashMap::new()),
        }
    }

    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, out);
            } else {
                out.push(path);
            }
        }
    }
}

impl Watcher for PollingWatcher {
    fn poll_changes(&self) -> Vec<PathBuf> {
        let mut seen = Vec::new();
        for root in &self.roots {
            Self::walk(root, &mut seen);
        }

        let mut mtimes = self.mtimes.lock().expect("watcher mtime mutex poisoned");
        let mut changed = Vec::new();
        for path in &seen {
            let Ok(meta) = std::fs::metadata(path) else { continue };
            let Ok(modified) = meta.modified() else { continue };
            match mtimes.get(path) {
                Some(prev) if *prev == modified => {}
                _ => changed.push(path.clone()),
            }
            mtimes.insert(path.clone(), modified);
        }
        changed
    }
}

/// Test double: reports exactly the paths queued via `push_change`, once
/// each, then nothing until more are queued.
#[derive(Default)]
pub struct FakeWatcher {
    pending: Mutex<Vec<PathBuf>>,
}

impl FakeWatcher {
    pub fn new() -> Self {
        FakeWatcher::default()
    }

    pub fn push_change(&self, path: impl Into<PathBuf>) {
        self.pending.lock().expect("fake watcher mutex poisoned").push(path.into());
    }
}

impl Watcher for FakeWatcher {
    fn poll_changes(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.pending.lock().expect("fake watcher mutex poisoned"))
    }
}

/// Maps a set of changed file paths back to the namespaces they belong to,
/// by checking each known namespace's expected source path (spec.md §6's
/// path-mangling convention) against the changed set — avoiding the
/// ambiguity of un-mangling `_` back to `-` in a raw path.
pub fn changed_namespaces(changed: &[PathBuf], known_namespaces: &[String], source_paths: &[PathBuf], extension: &str) -> Vec<String> {
    let mut hits = Vec::new();
    for ns in known_namespaces {
        let rel = super::host::namespace_to_relative_path(ns, extension);
        let matches = source_paths.iter().any(|root| changed.contains(&root.join(&rel)));
        if matches {
            hits.push(ns.clone());
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_watcher_reports_queued_changes_once() {
        let watcher = FakeWatcher::new();
        watcher.push_change("src/core.cljr");
        assert_eq!(watcher.poll_changes(), vec![PathBuf::from("src/core.cljr")]);
        assert!(watcher.poll_changes().is_empty());
    }

    #[test]
    fn polling_watcher_detects_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = PollingWatcher::new(vec![dir.path().to_path_buf()]);
        assert!(watcher.poll_changes().is_empty());

        std::fs::write(dir.path().join("core.cljr"), "(def a 1)").unwrap();
        let changed = watcher.poll_changes();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].ends_with("core.cljr"));
    }

    #[test]
    fn polling_watcher_detects_a_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("core.cljr");
        std::fs::write(&file, "(def a 1)").unwrap();
        let watcher = PollingWatcher::new(vec![dir.path().to_path_buf()]);
        watcher.poll_changes();

        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&file, "(def a 2)").unwrap();
        let changed = watcher.poll_changes();
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn changed_namespaces_maps_paths_back_via_known_names() {
        let changed = vec![PathBuf::from("./src/my_app/core.cljr")];
        let known = vec!["my-app.core".to_string(), "my-app.util".to_string()];
        let hits = changed_namespaces(&changed, &known, &[PathBuf::from("./src")], "cljr");
        assert_eq!(hits, vec!["my-app.core".to_string()]);
    }
}
