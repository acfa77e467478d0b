use std::sync::Arc;

use crate::error::{Result, SpawnfsError};
use crate::fs::entry::Entry;

/// Path-string resolution over a forest of entries. Holds no state beyond
/// the root reference: `open` and `create` are resolution algorithms.
pub struct Tree {
    root: Arc<dyn Entry>,
}

impl Tree {
    pub fn new(root: Arc<dyn Entry>) -> Tree {
        Tree { root }
    }

    pub fn root(&self) -> Arc<dyn Entry> {
        self.root.clone()
    }

    /// Resolve `path` by descending component-by-component through the
    /// current children of each directory-capable node. The empty or root
    /// path resolves to the root itself. A leaf encountered with components
    /// remaining, or any unmatched component, is `NotExist`.
    pub fn open(&self, path: &str) -> Result<Arc<dyn Entry>> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root.clone());
        }

        let mut node = self.root.clone();
        for part in trimmed.split('/') {
            let dir = node
                .as_dir()
                .ok_or_else(|| SpawnfsError::NotExist(path.to_string()))?;

            let mut matched = None;
            for child in dir.list() {
                let Ok(info) = child.stat() else {
                    continue;
                };
                if info.name == part {
                    matched = Some(child);
                    break;
                }
            }
            node = matched.ok_or_else(|| SpawnfsError::NotExist(path.to_string()))?;
        }
        Ok(node)
    }

    /// Resolve `path` and append `entry` as a new child. The target must be
    /// directory-capable.
    pub fn create(&self, path: &str, entry: Arc<dyn Entry>) -> Result<()> {
        let target = self.open(path)?;
        match target.as_dir() {
            Some(dir) => {
                dir.append(entry);
                Ok(())
            }
            None => Err(SpawnfsError::NotADirectory(path.to_string())),
        }
    }
}
