use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::app::adb::paths::{
    device_path_segments, join_device_path, local_base_name, shell_quote, validate_device_path,
};
use crate::app::device::DeviceController;
use crate::app::error::DeviceError;
use crate::app::models::RemoteFileEntry;

/// Listings carry minutes; some toolbox builds add seconds.
const REMOTE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];
/// Minute-precision stamps round down by up to a minute.
const REMOTE_TIME_SLACK_MS: i64 = 60 * 1000;

/// Whether a local file modified at `local_modified_ms` should replace the
/// remote copy stamped `remote_date remote_time` (UTC, minute precision).
/// Unparseable stamps count as newer.
pub fn is_newer(local_modified_ms: i64, remote_date: &str, remote_time: &str) -> bool {
    let stamp = format!("{} {}", remote_date.trim(), remote_time.trim());
    let parsed = REMOTE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&stamp, format).ok());
    match parsed {
        Some(remote) => local_modified_ms > remote.and_utc().timestamp_millis() - REMOTE_TIME_SLACK_MS,
        None => {
            warn!(stamp = %stamp, "unrecognized remote timestamp; treating file as newer");
            true
        }
    }
}

fn local_modified_ms(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        .unwrap_or(i64::MAX)
}

#[derive(Debug)]
struct RemoteNode {
    entry: RemoteFileEntry,
    /// `None` until the directory has been listed.
    children: Option<Vec<usize>>,
}

/// Lazily filled view of the remote file tree, scoped to one sync run.
#[derive(Debug)]
pub struct RemoteTree {
    nodes: Vec<RemoteNode>,
    by_path: HashMap<String, usize>,
}

impl Default for RemoteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTree {
    pub fn new() -> Self {
        let root = RemoteNode {
            entry: RemoteFileEntry {
                name: String::new(),
                path: "/".to_string(),
                is_dir: true,
                size_bytes: None,
                date: String::new(),
                time: String::new(),
            },
            children: None,
        };
        Self {
            nodes: vec![root],
            by_path: HashMap::from([("/".to_string(), 0)]),
        }
    }

    fn canonical(path: &str) -> String {
        let segments = device_path_segments(path);
        if segments.is_empty() {
            return "/".to_string();
        }
        format!("/{}", segments.join("/"))
    }

    pub fn entry(&self, path: &str) -> Option<&RemoteFileEntry> {
        self.by_path
            .get(&Self::canonical(path))
            .map(|&index| &self.nodes[index].entry)
    }

    pub fn is_listed(&self, path: &str) -> bool {
        self.by_path
            .get(&Self::canonical(path))
            .is_some_and(|&index| self.nodes[index].children.is_some())
    }

    /// Replaces the children of `parent` with a fresh listing. Re-listed
    /// subdirectories lose their own cached children.
    pub fn set_children(&mut self, parent: &str, entries: Vec<RemoteFileEntry>) {
        let parent = Self::canonical(parent);
        let Some(&parent_index) = self.by_path.get(&parent) else {
            return;
        };
        let mut children = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let path = join_device_path(&parent, &entry.name);
            entry.path = path.clone();
            let node = RemoteNode {
                entry,
                children: None,
            };
            let index = match self.by_path.get(&path) {
                Some(&index) => {
                    self.nodes[index] = node;
                    index
                }
                None => {
                    self.nodes.push(node);
                    let index = self.nodes.len() - 1;
                    self.by_path.insert(path, index);
                    index
                }
            };
            children.push(index);
        }
        self.nodes[parent_index].children = Some(children);
    }

    /// Only answers for listed directories.
    pub fn find_child(&self, parent: &str, name: &str) -> Option<&RemoteFileEntry> {
        let &parent_index = self.by_path.get(&Self::canonical(parent))?;
        self.nodes[parent_index]
            .children
            .as_ref()?
            .iter()
            .map(|&index| &self.nodes[index].entry)
            .find(|entry| entry.name == name)
    }
}

impl DeviceController {
    /// Incrementally copies `local_dir` into `device_dir/<local_dir name>`.
    ///
    /// Missing entries and files newer than their remote copy are pushed,
    /// hidden local entries are skipped, and each directory level is sent in
    /// one batched push. Returns `false` when the local side is unusable.
    pub fn sync_files(&self, local_dir: &Path, device_dir: &str) -> Result<bool, DeviceError> {
        validate_device_path(device_dir).map_err(DeviceError::validation)?;
        let serial = self.serial();
        info!(serial = %serial, local = %local_dir.display(), remote = device_dir, "syncing directory");
        if !local_dir.is_dir() {
            error!(serial = %serial, local = %local_dir.display(), "not a directory");
            return Ok(false);
        }
        let Some(base_name) = local_base_name(local_dir) else {
            error!(serial = %serial, local = %local_dir.display(), "directory has no name");
            return Ok(false);
        };

        // push appends the local directory name to the destination
        let device_path = join_device_path(device_dir, &base_name);
        if !self.does_file_exist(&device_path)? {
            self.execute_shell_command(&format!("mkdir -p {}", shell_quote(&device_path)))?;
        }

        let mut tree = RemoteTree::new();
        if self.resolve_remote_entry(&mut tree, &device_path)?.is_none() {
            error!(serial = %serial, remote = %device_path, "could not find remote entry");
            return Ok(false);
        }
        self.sync_dir(&mut tree, local_dir, &device_path)
    }

    fn resolve_remote_entry(
        &self,
        tree: &mut RemoteTree,
        device_path: &str,
    ) -> Result<Option<RemoteFileEntry>, DeviceError> {
        let mut parent = "/".to_string();
        for segment in device_path_segments(device_path) {
            self.ensure_listed(tree, &parent)?;
            if tree.find_child(&parent, segment).is_none() {
                return Ok(None);
            }
            parent = join_device_path(&parent, segment);
        }
        Ok(tree.entry(&parent).cloned())
    }

    fn ensure_listed(&self, tree: &mut RemoteTree, device_dir: &str) -> Result<(), DeviceError> {
        if tree.is_listed(device_dir) {
            return Ok(());
        }
        let entries = self.perform_default("buildFileCache", |device| device.list_dir(device_dir))?;
        tree.set_children(device_dir, entries);
        Ok(())
    }

    fn sync_dir(&self, tree: &mut RemoteTree, local_dir: &Path, device_dir: &str) -> Result<bool, DeviceError> {
        let serial = self.serial();
        debug!(serial = %serial, local = %local_dir.display(), remote = device_dir, "syncing directory level");
        self.ensure_listed(tree, device_dir)?;

        let mut local_entries: Vec<(String, PathBuf)> = fs::read_dir(local_dir)
            .map_err(|err| DeviceError::system(format!("failed to read {}: {err}", local_dir.display())))?
            .filter_map(|entry| entry.ok())
            .map(|entry| (entry.file_name().to_string_lossy().to_string(), entry.path()))
            .filter(|(name, _)| !name.starts_with('.'))
            .collect();
        local_entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut to_push = Vec::new();
        for (name, local_path) in local_entries {
            let Some(remote) = tree.find_child(device_dir, &name).cloned() else {
                debug!(serial = %serial, local = %local_path.display(), "missing on device");
                to_push.push(local_path);
                continue;
            };
            if local_path.is_dir() {
                if !self.sync_dir(tree, &local_path, &remote.path)? {
                    return Ok(false);
                }
            } else if is_newer(local_modified_ms(&local_path), &remote.date, &remote.time) {
                debug!(serial = %serial, local = %local_path.display(), "newer than device copy");
                to_push.push(local_path);
            }
        }

        if to_push.is_empty() {
            debug!(serial = %serial, remote = device_dir, "no files to sync");
            return Ok(true);
        }
        info!(serial = %serial, remote = device_dir, count = to_push.len(), "pushing files");
        self.perform_default(&format!("sync files {device_dir}"), |device| {
            device.push_files(&to_push, device_dir).map(|()| true)
        })
    }
}
