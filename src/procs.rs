// src/procs.rs

//! Snapshot of a process tree's command lines.
//!
//! Used by the action-icon-cache notice: the window manager wants to know
//! which programs an action ended up running (a launcher script that execs
//! `xterm -e vi` should map to both). The walk reads
//! `/proc/<pid>/cmdline` and `/proc/<pid>/task/<pid>/children`, keeps an
//! explicit worklist and a visited set, and stops after a fixed number of
//! processes. Anything unreadable is skipped.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::fs::FileSystem;

/// Upper bound on processes visited in one snapshot.
pub const MAX_PROCESSES: usize = 1024;

/// Longest command line considered, matching `PATH_MAX`.
const CMDLINE_MAX: usize = 4095;

/// Ordered, de-duplicated list of command names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    items: Vec<String>,
}

impl CommandList {
    /// Returns `false` for empty or already-present entries.
    pub fn add(&mut self, command: &str) -> bool {
        if command.is_empty() || self.items.iter().any(|c| c == command) {
            return false;
        }
        self.items.push(command.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.items.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    /// Newline-separated, no trailing newline.
    pub fn join(&self) -> String {
        self.items.join("\n")
    }
}

/// Walks a `/proc`-shaped tree through a [`FileSystem`].
#[derive(Debug)]
pub struct ProcScanner<'a> {
    fs: &'a dyn FileSystem,
    root: PathBuf,
    limit: usize,
}

impl<'a> ProcScanner<'a> {
    pub fn new(fs: &'a dyn FileSystem, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            limit: MAX_PROCESSES,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Command names of `pid` and all of its descendants, pre-order.
    pub fn collect(&self, pid: i32) -> CommandList {
        let mut commands = CommandList::default();
        let mut visited = HashSet::new();
        let mut stack = vec![pid];

        while let Some(pid) = stack.pop() {
            if pid <= 0 || !visited.insert(pid) {
                continue;
            }
            if visited.len() > self.limit {
                debug!(limit = self.limit, "process snapshot truncated");
                break;
            }

            if let Some(command) = self.command_of(pid) {
                commands.add(&command);
            }

            let mut children = self.children_of(pid);
            children.reverse();
            stack.extend(children);
        }

        commands
    }

    /// argv[0] of `pid`, or `None` when it is gone or a kernel thread.
    fn command_of(&self, pid: i32) -> Option<String> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        let raw = match self.fs.read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                trace!(pid, error = %err, "no cmdline");
                return None;
            }
        };
        let raw = &raw[..raw.len().min(CMDLINE_MAX)];
        let argv0 = raw.split(|b| *b == 0).next().unwrap_or_default();
        if argv0.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(argv0).into_owned())
    }

    fn children_of(&self, pid: i32) -> Vec<i32> {
        let path = self
            .root
            .join(pid.to_string())
            .join("task")
            .join(pid.to_string())
            .join("children");
        match self.fs.read_to_string(&path) {
            Ok(list) => list
                .split_whitespace()
                .filter_map(|token| token.parse::<i32>().ok())
                .filter(|child| *child > 0)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Snapshot the live process tree under `pid`.
#[cfg(target_os = "linux")]
pub fn snapshot(fs: &dyn FileSystem, pid: i32) -> CommandList {
    ProcScanner::new(fs, "/proc").collect(pid)
}

/// No `/proc` here: no descendant information.
#[cfg(not(target_os = "linux"))]
pub fn snapshot(_fs: &dyn FileSystem, _pid: i32) -> CommandList {
    CommandList::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn process(fs: &MockFileSystem, pid: i32, cmdline: &[u8], children: &[i32]) {
        fs.add_file(format!("/proc/{pid}/cmdline"), cmdline.to_vec());
        let list: Vec<String> = children.iter().map(|c| c.to_string()).collect();
        fs.add_file(
            format!("/proc/{pid}/task/{pid}/children"),
            format!("{} ", list.join(" ")),
        );
    }

    #[test]
    fn walks_descendants_in_pre_order() {
        let fs = MockFileSystem::new();
        process(&fs, 10, b"/bin/sh\0-c\0launch\0", &[11, 14]);
        process(&fs, 11, b"xterm\0-e\0vi\0", &[12]);
        process(&fs, 12, b"vi\0", &[]);
        process(&fs, 14, b"xclock\0", &[]);

        let list = ProcScanner::new(&fs, "/proc").collect(10);
        assert_eq!(list.join(), "/bin/sh\nxterm\nvi\nxclock");
    }

    #[test]
    fn duplicates_and_empty_cmdlines_are_dropped() {
        let fs = MockFileSystem::new();
        process(&fs, 1, b"sh\0", &[2, 3, 4]);
        process(&fs, 2, b"sh\0", &[]);
        process(&fs, 3, b"", &[]);
        process(&fs, 4, b"cat\0", &[]);

        let list = ProcScanner::new(&fs, "/proc").collect(1);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["sh", "cat"]);
    }

    #[test]
    fn cycles_terminate() {
        let fs = MockFileSystem::new();
        process(&fs, 5, b"a\0", &[6]);
        process(&fs, 6, b"b\0", &[5, 6]);

        let list = ProcScanner::new(&fs, "/proc").collect(5);
        assert_eq!(list.join(), "a\nb");
    }

    #[test]
    fn vanished_process_yields_nothing() {
        let fs = MockFileSystem::new();
        let list = ProcScanner::new(&fs, "/proc").collect(99);
        assert!(list.is_empty());
    }

    #[test]
    fn limit_bounds_the_walk() {
        let fs = MockFileSystem::new();
        for pid in 1..50 {
            process(&fs, pid, format!("p{pid}\0").as_bytes(), &[pid + 1]);
        }
        let list = ProcScanner::new(&fs, "/proc").with_limit(5).collect(1);
        assert_eq!(list.len(), 5);
    }
}
