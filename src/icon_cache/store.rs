// src/icon_cache/store.rs

//! The persisted `~/.dt/action-icon-cache` file.
//!
//! One `child<TAB>action` mapping per line, oldest first. The file is only
//! rewritten when something changed, via `<path>.tmp` and `rename`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::commands_match;
use crate::fs::FileSystem;

/// Most mappings kept; the oldest is dropped beyond this.
pub const MAX_ENTRIES: usize = 256;

pub const CACHE_FILE_NAME: &str = "action-icon-cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub command: String,
    pub action: String,
}

#[derive(Debug)]
pub struct CacheStore {
    fs: Arc<dyn FileSystem>,
    path: Option<PathBuf>,
    entries: Vec<CacheEntry>,
    dirty: bool,
}

impl CacheStore {
    /// An empty store backed by `dt_dir/action-icon-cache`. Without a home
    /// directory the store lives only in memory.
    pub fn new(fs: Arc<dyn FileSystem>, dt_dir: Option<&Path>) -> Self {
        Self {
            fs,
            path: dt_dir.map(|dir| dir.join(CACHE_FILE_NAME)),
            entries: Vec::new(),
            dirty: false,
        }
    }

    /// Read the persisted mappings. A missing file is an empty cache.
    pub fn load(fs: Arc<dyn FileSystem>, dt_dir: Option<&Path>) -> Self {
        let mut store = Self::new(fs, dt_dir);
        let Some(path) = store.path.clone() else {
            return store;
        };

        let text = match store.fs.read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no action icon cache yet");
                return store;
            }
        };

        for line in text.lines() {
            let Some((command, action)) = line.split_once('\t') else {
                continue;
            };
            if !command.is_empty() && !action.is_empty() && store.upsert(command, action) {
                debug!(child = command, action, "loaded cache entry");
            }
        }
        store.dirty = false;
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Map `command` to `action`. Returns `false` when the mapping already
    /// existed unchanged.
    pub fn insert(&mut self, command: &str, action: &str) -> bool {
        let changed = self.upsert(command, action);
        self.dirty |= changed;
        changed
    }

    fn upsert(&mut self, command: &str, action: &str) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.command == command) {
            if entry.action == action {
                return false;
            }
            entry.action = action.to_string();
            return true;
        }

        self.entries.push(CacheEntry {
            command: command.to_string(),
            action: action.to_string(),
        });
        if self.entries.len() > MAX_ENTRIES {
            let evicted = self.entries.remove(0);
            debug!(child = %evicted.command, "evicted oldest cache entry");
        }
        true
    }

    /// Action recorded for the first entry whose command matches.
    pub fn find_action(&self, command: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| commands_match(&e.command, command))
            .map(|e| e.action.as_str())
    }

    /// Persist if anything changed. Returns whether the file was written.
    pub fn save(&mut self) -> Result<bool> {
        if !self.dirty || self.entries.is_empty() {
            return Ok(false);
        }
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        if let Some(dir) = path.parent() {
            self.fs
                .create_dir_owner_only(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let body: String = self
            .entries
            .iter()
            .map(|e| format!("{}\t{}\n", e.command, e.action))
            .collect();
        debug!(entries = self.entries.len(), temp = %tmp.display(), "saving cache");

        self.fs
            .write(&tmp, body.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(err) = self.fs.rename(&tmp, &path) {
            let _ = self.fs.remove_file(&tmp);
            return Err(err.context(format!("renaming {} into place", tmp.display())));
        }
        self.fs.set_owner_only(&path)?;

        info!(entries = self.entries.len(), path = %path.display(), "saved action icon cache");
        self.dirty = false;
        Ok(true)
    }
}
