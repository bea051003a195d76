// src/icon_cache/actions.rs

//! Command-to-icon catalog built from the desktop's `.dt` action files.
//!
//! Only `COMMAND` actions with an `EXEC_STRING` and an icon count. The
//! catalog is rebuilt from the search path on every load; a missing
//! directory simply contributes nothing.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{commands_match, derive_action_command};
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionIcon {
    pub command: String,
    pub icon: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    entries: Vec<ActionIcon>,
}

/// Directories searched for `.dt` files, most personal first.
pub fn search_path(home: Option<&Path>, lang: Option<&str>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = home {
        dirs.push(home.join(".dt/types"));
        if let Some(lang) = lang {
            dirs.push(home.join(".dt/types").join(lang));
        }
    }
    let system = [
        "/etc/dt/appconfig/types",
        "/usr/dt/appconfig/types",
        "/usr/local/CDE/appconfig/types",
    ];
    if let Some(lang) = lang {
        dirs.extend(system.iter().map(|root| Path::new(root).join(lang)));
    }
    dirs.extend(system.iter().map(|root| Path::new(root).join("C")));
    dirs
}

impl ActionCatalog {
    pub fn load(fs: &dyn FileSystem, dirs: &[PathBuf]) -> Self {
        let mut catalog = Self::default();
        for dir in dirs {
            catalog.load_dir(fs, dir);
        }
        debug!(entries = catalog.entries.len(), "action catalog loaded");
        catalog
    }

    fn load_dir(&mut self, fs: &dyn FileSystem, dir: &Path) {
        let Ok(mut files) = fs.read_dir(dir) else {
            return;
        };
        files.sort();

        for file in files {
            let is_dt = file
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.len() >= 4 && n.ends_with(".dt"));
            if !is_dt || !fs.is_file(&file) {
                continue;
            }
            match fs.read_to_string(&file) {
                Ok(text) => {
                    for (command, icon) in parse_actions(&text) {
                        self.add(&command, &icon, &file);
                    }
                }
                Err(err) => trace!(file = %file.display(), error = %err, "unreadable action file"),
            }
        }
    }

    /// Insert or update the icon for `command`.
    pub fn add(&mut self, command: &str, icon: &str, source: &Path) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.command == command) {
            if entry.icon != icon {
                debug!(command, icon, source = %source.display(), "updated action entry");
                entry.icon = icon.to_string();
            }
            return;
        }
        trace!(command, icon, source = %source.display(), "added action entry");
        self.entries.push(ActionIcon {
            command: command.to_string(),
            icon: icon.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, command: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| commands_match(&e.command, command))
            .map(|e| e.icon.as_str())
    }
}

#[derive(Debug, Default)]
struct Block {
    kind: Option<String>,
    exec: Option<String>,
    icon: Option<String>,
    instance_icon: Option<String>,
    depth: i32,
}

impl Block {
    fn finish(self) -> Option<(String, String)> {
        let icon = self.icon.or(self.instance_icon)?;
        let exec = self.exec.filter(|e| !e.is_empty())?;
        if self.kind.as_deref().is_some_and(|k| k != "COMMAND") {
            return None;
        }
        Some((derive_action_command(&exec)?, icon))
    }
}

/// `value` after `keyword` and whitespace, if the line starts with it.
fn keyword_value<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}

fn first_word(value: &str) -> Option<String> {
    value.split_whitespace().next().map(str::to_string)
}

/// `(command, icon)` for every usable `ACTION` block in `text`.
pub fn parse_actions(text: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut block: Option<Block> = None;

    for line in text.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if block.is_none() && keyword_value(line, "ACTION").is_some() {
            block = Some(Block::default());
        }
        let Some(current) = block.as_mut() else {
            continue;
        };

        for c in line.chars() {
            match c {
                '{' => current.depth += 1,
                '}' => current.depth -= 1,
                _ => {}
            }
        }

        if let Some(value) = keyword_value(line, "TYPE") {
            current.kind = first_word(value);
        } else if let Some(value) = keyword_value(line, "EXEC_STRING") {
            current.exec = Some(value.trim_end_matches(['\r', '\n']).to_string());
        } else if let Some(value) = keyword_value(line, "ICON") {
            current.icon = first_word(value);
        } else if let Some(value) = keyword_value(line, "INSTANCE_ICON") {
            current.instance_icon = first_word(value);
        }

        if current.depth <= 0 && line.contains('}') {
            if let Some(entry) = block.take().and_then(Block::finish) {
                found.push(entry);
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    const SAMPLE: &str = r#"
# Terminal actions
ACTION Xterm
{
    LABEL           Terminal
    TYPE            COMMAND
    EXEC_STRING     /usr/bin/xterm -ls %Args%
    ICON            Dtterm
}

ACTION OpenMap
{
    TYPE            MAP
    EXEC_STRING     whatever
    ICON            Nope
}

ACTION Clock {
    EXEC_STRING     xclock
    INSTANCE_ICON   Dtclock
}

ACTION NoIcon
{
    EXEC_STRING     xeyes
}
"#;

    #[test]
    fn parses_command_actions_with_icons() {
        assert_eq!(
            parse_actions(SAMPLE),
            vec![
                ("/usr/bin/xterm".to_string(), "Dtterm".to_string()),
                ("xclock".to_string(), "Dtclock".to_string()),
            ]
        );
    }

    #[test]
    fn search_path_order() {
        let dirs = search_path(Some(Path::new("/home/u")), Some("de_DE"));
        assert_eq!(dirs[0], PathBuf::from("/home/u/.dt/types"));
        assert_eq!(dirs[1], PathBuf::from("/home/u/.dt/types/de_DE"));
        assert_eq!(dirs[2], PathBuf::from("/etc/dt/appconfig/types/de_DE"));
        assert_eq!(dirs.last().unwrap(), &PathBuf::from("/usr/local/CDE/appconfig/types/C"));
        assert_eq!(dirs.len(), 8);

        assert_eq!(search_path(None, None).len(), 3);
    }

    #[test]
    fn loads_dt_files_and_ignores_others() {
        let fs = MockFileSystem::new();
        fs.add_file("/usr/dt/appconfig/types/C/term.dt", SAMPLE);
        fs.add_file(
            "/usr/dt/appconfig/types/C/readme.txt",
            "ACTION X {\n EXEC_STRING x\n ICON y\n}\n",
        );

        let catalog = ActionCatalog::load(&fs, &search_path(None, None));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.find("xterm"), Some("Dtterm"));
        assert_eq!(catalog.find("xclock"), Some("Dtclock"));
        assert_eq!(catalog.find("emacs"), None);
    }

    #[test]
    fn missing_database_is_empty() {
        let fs = MockFileSystem::new();
        assert!(ActionCatalog::load(&fs, &search_path(None, Some("C"))).is_empty());
    }
}
