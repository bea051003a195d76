// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // List of child names
}

/// A mutating call observed by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOp {
    Write(PathBuf),
    Append(PathBuf),
    SetOwnerOnly(PathBuf),
    RemoveFile(PathBuf),
    Rename(PathBuf, PathBuf),
    CreateDir(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    ops: Arc<Mutex<Vec<FsOp>>>,
    failing: Arc<Mutex<HashSet<PathBuf>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        // Ensure root exists
        files.insert(PathBuf::from("/"), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            ..Self::default()
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut files = self.files.lock().unwrap();
        files.insert(path.clone(), MockEntry::File(content.into()));
        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(&mut files, parent);
            Self::link_child(&mut files, parent, &path);
        }
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut files = self.files.lock().unwrap();
        Self::ensure_dir_entry(&mut files, path.as_ref());
    }

    /// Every mutating operation on `path` fails from now on.
    pub fn fail_on(&self, path: impl AsRef<Path>) {
        self.failing
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf());
    }

    pub fn ops(&self) -> Vec<FsOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.files.lock().unwrap().get(path.as_ref()) {
            Some(MockEntry::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    fn record(&self, op: FsOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn check_failing(&self, path: &Path) -> Result<()> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(anyhow!("injected failure for {:?}", path));
        }
        Ok(())
    }

    fn ensure_dir_entry(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = path.parent() {
            if parent != path && !parent.as_os_str().is_empty() {
                Self::ensure_dir_entry(files, parent);
                Self::link_child(files, parent, path);
            }
        }
    }

    fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                if !children.iter().any(|c| c == name) {
                    children.push(name.to_string());
                }
            }
        }
    }

    fn unlink_child(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            children.retain(|c| c.as_str() != name);
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(MockEntry::File(content)) => Ok(content.clone()),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.record(FsOp::Write(path.to_path_buf()));
        self.check_failing(path)?;
        self.add_file(path, contents);
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.record(FsOp::Append(path.to_path_buf()));
        self.check_failing(path)?;
        let mut existing = self.contents(path).unwrap_or_default();
        existing.extend_from_slice(contents);
        self.add_file(path, existing);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        files.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(files.get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        matches!(files.get(path), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        match files.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn set_owner_only(&self, path: &Path) -> Result<()> {
        self.record(FsOp::SetOwnerOnly(path.to_path_buf()));
        self.check_failing(path)?;
        if !self.exists(path) {
            return Err(anyhow!("File not found: {:?}", path));
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.record(FsOp::RemoveFile(path.to_path_buf()));
        self.check_failing(path)?;
        let mut files = self.files.lock().unwrap();
        match files.remove(path) {
            Some(MockEntry::File(_)) => {
                Self::unlink_child(&mut files, path);
                Ok(())
            }
            Some(dir @ MockEntry::Dir(_)) => {
                files.insert(path.to_path_buf(), dir);
                Err(anyhow!("Is a directory: {:?}", path))
            }
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.record(FsOp::Rename(from.to_path_buf(), to.to_path_buf()));
        self.check_failing(from)?;
        self.check_failing(to)?;
        let content = {
            let mut files = self.files.lock().unwrap();
            let content = match files.remove(from) {
                Some(MockEntry::File(content)) => content,
                Some(other) => {
                    files.insert(from.to_path_buf(), other);
                    return Err(anyhow!("Not a file: {:?}", from));
                }
                None => return Err(anyhow!("File not found: {:?}", from)),
            };
            Self::unlink_child(&mut files, from);
            content
        };
        self.add_file(to, content);
        Ok(())
    }

    fn create_dir_owner_only(&self, path: &Path) -> Result<()> {
        self.record(FsOp::CreateDir(path.to_path_buf()));
        self.check_failing(path)?;
        self.add_dir(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_moves_content_and_updates_listing() {
        let fs = MockFileSystem::new();
        fs.add_file("/home/u/.dt/cache.tmp", "a\tb\n");

        fs.rename(
            Path::new("/home/u/.dt/cache.tmp"),
            Path::new("/home/u/.dt/cache"),
        )
        .unwrap();

        assert!(!fs.exists(Path::new("/home/u/.dt/cache.tmp")));
        assert_eq!(fs.contents("/home/u/.dt/cache").unwrap(), b"a\tb\n");
        assert_eq!(
            fs.read_dir(Path::new("/home/u/.dt")).unwrap(),
            vec![PathBuf::from("/home/u/.dt/cache")]
        );
    }

    #[test]
    fn injected_failures_are_still_recorded() {
        let fs = MockFileSystem::new();
        fs.add_file("/tmp/a", "x");
        fs.fail_on("/tmp/a");

        assert!(fs.remove_file(Path::new("/tmp/a")).is_err());
        assert_eq!(fs.ops(), vec![FsOp::RemoveFile(PathBuf::from("/tmp/a"))]);
        assert!(fs.exists(Path::new("/tmp/a")));
    }
}
