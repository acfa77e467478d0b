use fuser::FUSE_ROOT_ID;
use fxhash::hash64;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::fs::Entry;

const INODE_CACHE_CAPACITY: usize = 4096;

/// One kernel-visible node: an inode number bound to a synthetic entry.
pub(crate) struct Node {
    pub ino: u64,
    pub parent: u64,
    pub name: String,
    pub entry: Arc<dyn Entry>,
}

/// Inode bookkeeping for the export surface: an LRU node cache plus hashed
/// (parent, name) -> inode maps. Eviction only drops the cached binding;
/// a later lookup re-binds the entry under a fresh inode number.
pub(crate) struct InodeTable {
    nodes: LruCache<u64, Node>,
    children: HashMap<u64, HashMap<u64, u64>>,
}

impl InodeTable {
    pub fn new() -> Self {
        InodeTable {
            nodes: LruCache::new(NonZeroUsize::new(INODE_CACHE_CAPACITY).unwrap()),
            children: HashMap::new(),
        }
    }

    pub fn insert(&mut self, node: Node) {
        if node.ino != FUSE_ROOT_ID {
            let name_hash = hash64(node.name.as_bytes());
            self.children
                .entry(node.parent)
                .or_default()
                .insert(name_hash, node.ino);
        }
        self.nodes.put(node.ino, node);
    }

    pub fn peek(&self, ino: u64) -> Option<&Node> {
        self.nodes.peek(&ino)
    }

    pub fn lookup_child(&self, parent: u64, name: &str) -> Option<u64> {
        let name_hash = hash64(name.as_bytes());
        self.children
            .get(&parent)
            .and_then(|map| map.get(&name_hash).copied())
            .filter(|ino| self.nodes.contains(ino))
    }

    pub fn remove_child(&mut self, parent: u64, name: &str) {
        let name_hash = hash64(name.as_bytes());
        if let Some(map) = self.children.get_mut(&parent) {
            map.remove(&name_hash);
        }
    }
}
