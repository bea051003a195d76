// src/icon_cache/mod.rs

//! Action icon cache.
//!
//! When an action runs a launcher that in turn starts the real program, the
//! window manager cannot tell which action a new window belongs to. The
//! supervisor reports the action's process tree (see [`crate::notice`]);
//! this module remembers `child command -> action command` mappings on disk
//! and resolves a window's command to an icon:
//!
//! - [`store`]: the persisted `~/.dt/action-icon-cache` file.
//! - [`actions`]: the command/icon catalog from the `.dt` action files.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::Environment;
use crate::fs::FileSystem;

pub mod actions;
pub mod store;

pub use actions::{search_path, ActionCatalog, ActionIcon};
pub use store::{CacheEntry, CacheStore, MAX_ENTRIES};

/// Reduce an `EXEC_STRING` (or a command line) to the program it runs:
/// `%...%` placeholders and backslash line continuations are dropped and
/// the first word is kept.
pub fn derive_action_command(exec: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(exec.len());
    let mut chars = exec.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => {
                for skipped in chars.by_ref() {
                    if skipped == '%' {
                        break;
                    }
                }
            }
            '\\' if matches!(chars.peek(), Some('\n' | '\r')) => {}
            _ => cleaned.push(c),
        }
    }

    cleaned.split_whitespace().next().map(str::to_string)
}

fn basename(command: &str) -> &str {
    command.rsplit_once('/').map_or(command, |(_, name)| name)
}

/// Loose command comparison: exact, same basename, or one basename
/// containing the other ignoring case.
pub fn commands_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (a, b) = (basename(a), basename(b));
    if a == b {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a.contains(&b) || b.contains(&a)
}

#[derive(Debug)]
pub struct ActionIconCache {
    catalog: ActionCatalog,
    store: CacheStore,
}

impl ActionIconCache {
    pub fn new(catalog: ActionCatalog, store: CacheStore) -> Self {
        Self { catalog, store }
    }

    /// Load the catalog from the standard search path and the persisted
    /// mappings from `~/.dt`.
    pub fn open(fs: Arc<dyn FileSystem>, env: &Environment) -> Self {
        let dirs = search_path(env.home.as_deref(), env.lang.as_deref());
        let catalog = ActionCatalog::load(fs.as_ref(), &dirs);
        let dt_dir = env.dt_dir();
        let store = CacheStore::load(fs, dt_dir.as_deref());
        Self::new(catalog, store)
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Icon for a window's command: through a cached action first, then by
    /// matching the command directly.
    pub fn find_icon(&self, command: &str) -> Option<&str> {
        if let Some(action) = self.store.find_action(command) {
            match self.catalog.find(action) {
                Some(icon) => return Some(icon),
                None => debug!(action, command, "cached action has no icon"),
            }
        }
        self.catalog.find(command)
    }

    /// Record that `action` ran the newline-separated `child_list`.
    ///
    /// Returns whether any mapping changed; changes are saved right away.
    pub fn update(&mut self, action: &str, child_list: &str) -> Result<bool> {
        let action_key = derive_action_command(action).unwrap_or_else(|| action.to_string());
        let children: Vec<&str> = child_list.lines().filter(|l| !l.is_empty()).collect();
        info!(
            action,
            key = %action_key,
            children = children.len(),
            first = children.first().copied().unwrap_or("(none)"),
            "update request"
        );

        let icon = self
            .find_icon(&action_key)
            .or_else(|| {
                children.iter().find_map(|child| {
                    let key = derive_action_command(child).unwrap_or_else(|| child.to_string());
                    self.find_icon(&key)
                })
            })
            .map(str::to_string);
        match &icon {
            Some(icon) => debug!(%icon, action = %action_key, "resolved icon"),
            None => debug!(action = %action_key, "no icon found; caching child mappings anyway"),
        }

        let mut updated = false;
        for child in children {
            let key = derive_action_command(child).unwrap_or_else(|| child.to_string());
            if self.store.insert(&key, &action_key) {
                updated = true;
                debug!(child = %key, action = %action_key, "cached child");
            } else {
                debug!(child = %key, action = %action_key, "mapping already cached");
            }
        }

        if updated {
            self.store.save()?;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn derive_strips_placeholders_and_continuations() {
        assert_eq!(
            derive_action_command("  %|nls-1-#Args#|%/usr/bin/xterm -e %Arg_1%").as_deref(),
            Some("/usr/bin/xterm")
        );
        assert_eq!(
            derive_action_command("dtpad\\\n -standAlone").as_deref(),
            Some("dtpad")
        );
        assert_eq!(derive_action_command("%Args%   "), None);
        assert_eq!(derive_action_command(""), None);
    }

    #[test]
    fn matching_rules() {
        assert!(commands_match("/usr/bin/xterm", "/usr/bin/xterm"));
        assert!(commands_match("/usr/bin/xterm", "xterm"));
        assert!(commands_match("dtterm", "DTTERM-wrapper"));
        assert!(commands_match("Xpdf", "pdf"));
        assert!(!commands_match("xclock", "xterm"));
        assert!(!commands_match("/usr/bin/", "xterm"));
    }

    fn cache(fs: &Arc<MockFileSystem>) -> ActionIconCache {
        let mut catalog = ActionCatalog::default();
        catalog.add("/usr/dt/bin/dtterm", "Dtterm", Path::new("test"));
        let store = CacheStore::new(fs.clone(), Some(Path::new("/home/u/.dt")));
        ActionIconCache::new(catalog, store)
    }

    #[test]
    fn update_maps_children_and_saves() {
        let fs = Arc::new(MockFileSystem::new());
        let mut cache = cache(&fs);

        assert!(cache.update("/usr/dt/bin/dtterm", "/bin/sh\nvim\n").unwrap());
        assert!(!cache.update("/usr/dt/bin/dtterm", "/bin/sh\nvim").unwrap());

        assert_eq!(cache.find_icon("vim"), Some("Dtterm"));
        let saved = fs
            .contents(PathBuf::from("/home/u/.dt/action-icon-cache"))
            .unwrap();
        assert_eq!(
            String::from_utf8(saved).unwrap(),
            "/bin/sh\t/usr/dt/bin/dtterm\nvim\t/usr/dt/bin/dtterm\n"
        );
    }

    #[test]
    fn direct_match_without_cache_entry() {
        let fs = Arc::new(MockFileSystem::new());
        let cache = cache(&fs);
        assert_eq!(cache.find_icon("dtterm"), Some("Dtterm"));
        assert_eq!(cache.find_icon("xeyes"), None);
    }
}
