//! Disk-resident B-tree mapping byte-string keys to row ids.
//!
//! ## File Structure
//! ```text
//! [header: t u32 | key_size u32 | root u64][node 0][node 1]...
//!
//! node (fixed size):
//!   num_keys u32
//!   (2t-1) x [key length u64][key_size bytes]
//!   (2t-1) x value u64
//!   (2t)   x child location u64
//!   is_leaf u8
//! ```
//!
//! The index is read-only once built; see [`IndexBuilder`] for creating one.
//! Nodes are paged in on demand and never cached.

use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use super::storage::{read_at, RowId};
use crate::error::{Error, Result};

mod builder;

pub use builder::{build_column_index, IndexBuilder};

const KEY_LENGTH_SIZE: usize = 8;
const VALUE_SIZE: usize = 8;
const LOCATION_SIZE: usize = 8;
/// minimum degree + key size + root location
pub const HEADER_SIZE: usize = 4 + 4 + LOCATION_SIZE;

/// Node geometry derived from the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Layout {
    pub minimum_degree: usize,
    pub key_size: usize,
}

impl Layout {
    pub fn max_keys(&self) -> usize {
        2 * self.minimum_degree - 1
    }

    pub fn max_children(&self) -> usize {
        2 * self.minimum_degree
    }

    pub fn node_size(&self) -> usize {
        4 + self.max_keys() * (KEY_LENGTH_SIZE + self.key_size)
            + self.max_keys() * VALUE_SIZE
            + self.max_children() * LOCATION_SIZE
            + 1
    }

    /// `node_size` computed without overflow, for layouts read from disk.
    fn checked_node_size(&self) -> Option<u64> {
        let max_keys = (self.minimum_degree as u64).checked_mul(2)?.checked_sub(1)?;
        let per_key = (KEY_LENGTH_SIZE + VALUE_SIZE) as u64 + self.key_size as u64;
        let children = (max_keys + 1).checked_mul(LOCATION_SIZE as u64)?;
        max_keys.checked_mul(per_key)?.checked_add(children)?.checked_add(5)
    }

    pub fn offset(&self, location: u64) -> u64 {
        HEADER_SIZE as u64 + location * self.node_size() as u64
    }

    pub fn encode_header(&self, root: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.put_u32(self.minimum_degree as u32);
        buf.put_u32(self.key_size as u32);
        buf.put_u64(root);
        buf
    }
}

/// One node, holding only its live keys, values and children.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub location: u64,
    pub keys: Vec<Vec<u8>>,
    pub values: Vec<u64>,
    /// `keys.len() + 1` entries for internal nodes, empty for leaves
    pub children: Vec<u64>,
    pub is_leaf: bool,
}

impl Node {
    pub fn empty_leaf(location: u64) -> Self {
        Self {
            location,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            is_leaf: true,
        }
    }

    pub fn decode(layout: &Layout, location: u64, mut buf: &[u8]) -> Result<Self> {
        let num_keys = buf.get_u32() as usize;
        if num_keys > layout.max_keys() {
            return Err(Error::InvalidEncoding(format!(
                "node {} holds {} keys, maximum is {}",
                location,
                num_keys,
                layout.max_keys()
            )));
        }

        let mut keys = Vec::with_capacity(num_keys);
        for i in 0..layout.max_keys() {
            let length = buf.get_u64() as usize;
            if i < num_keys {
                if length > layout.key_size {
                    return Err(Error::InvalidEncoding(format!(
                        "key of {} bytes in node {}, key size is {}",
                        length, location, layout.key_size
                    )));
                }
                keys.push(buf[..length].to_vec());
            }
            buf.advance(layout.key_size);
        }
        let mut values: Vec<u64> = (0..layout.max_keys()).map(|_| buf.get_u64()).collect();
        values.truncate(num_keys);
        let mut children: Vec<u64> = (0..layout.max_children()).map(|_| buf.get_u64()).collect();
        let is_leaf = buf.get_u8() != 0;
        if is_leaf {
            children.clear();
        } else {
            children.truncate(num_keys + 1);
        }

        Ok(Self {
            location,
            keys,
            values,
            children,
            is_leaf,
        })
    }

    pub fn encode(&self, layout: &Layout) -> Vec<u8> {
        let mut buf = Vec::with_capacity(layout.node_size());
        buf.put_u32(self.keys.len() as u32);
        for i in 0..layout.max_keys() {
            let key = self.keys.get(i).map(Vec::as_slice).unwrap_or_default();
            buf.put_u64(key.len() as u64);
            buf.put_slice(key);
            buf.put_bytes(0, layout.key_size - key.len());
        }
        for i in 0..layout.max_keys() {
            buf.put_u64(self.values.get(i).copied().unwrap_or(0));
        }
        for i in 0..layout.max_children() {
            buf.put_u64(self.children.get(i).copied().unwrap_or(0));
        }
        buf.put_u8(u8::from(self.is_leaf));
        buf
    }
}

/// Position inside a node during search and iteration.
#[derive(Debug)]
struct Frame {
    node: Node,
    index: usize,
}

/// A key and the row id stored with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub value: RowId,
}

/// Read-only handle on an index file.
#[derive(Debug)]
pub struct BTreeIndex {
    path: PathBuf,
    file: Mutex<File>,
    layout: Layout,
    root: u64,
}

impl BTreeIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE];
        read_at(&mut file, 0, &mut header)?;
        let mut buf = &header[..];
        let minimum_degree = buf.get_u32() as usize;
        let key_size = buf.get_u32() as usize;
        let root = buf.get_u64();
        if minimum_degree < 2 {
            return Err(Error::InvalidEncoding(format!(
                "minimum degree {} in {}",
                minimum_degree,
                path.display()
            )));
        }
        let layout = Layout {
            minimum_degree,
            key_size,
        };
        // the root node is always written, so the file holds at least one node
        let len = file.metadata()?.len();
        match layout.checked_node_size() {
            Some(node_size) if node_size <= len.saturating_sub(HEADER_SIZE as u64) => {}
            _ => {
                return Err(Error::InvalidEncoding(format!(
                    "node layout (degree {}, key size {}) does not fit {} ({} bytes)",
                    minimum_degree,
                    key_size,
                    path.display(),
                    len
                )))
            }
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            layout,
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn minimum_degree(&self) -> usize {
        self.layout.minimum_degree
    }

    /// Maximum key length in bytes.
    pub fn key_size(&self) -> usize {
        self.layout.key_size
    }

    pub fn node_size(&self) -> usize {
        self.layout.node_size()
    }

    fn load(&self, location: u64) -> Result<Node> {
        let mut buf = vec![0u8; self.layout.node_size()];
        read_at(&mut self.file.lock(), self.layout.offset(location), &mut buf)?;
        Node::decode(&self.layout, location, &buf)
    }

    /// Descends towards `key`, pushing the first key not less than it at each
    /// level. Returns whether the key exists; either way the top of `path`
    /// is the in-order position of the first key `>= key`.
    fn search(&self, path: &mut Vec<Frame>, key: &[u8]) -> Result<bool> {
        let mut node = self.load(self.root)?;
        loop {
            let i = node.keys.iter().take_while(|k| k.as_slice() < key).count();
            let found = i < node.keys.len() && node.keys[i] == key;
            let child = if found || node.is_leaf {
                None
            } else {
                Some(node.children[i])
            };
            if i < node.keys.len() {
                path.push(Frame { node, index: i });
            }
            match child {
                _ if found => return Ok(true),
                None => return Ok(false),
                Some(location) => node = self.load_non_empty(location)?,
            }
        }
    }

    fn load_non_empty(&self, location: u64) -> Result<Node> {
        let node = self.load(location)?;
        if node.keys.is_empty() {
            return Err(Error::InvalidEncoding(format!(
                "non-root node {} has no keys",
                location
            )));
        }
        Ok(node)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<RowId>> {
        let mut path = Vec::new();
        if self.search(&mut path, key)? {
            Ok(path.last().map(|f| f.node.values[f.index]))
        } else {
            Ok(None)
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.search(&mut Vec::new(), key)
    }

    /// Entries with keys `>= start`, in ascending key order.
    pub fn iter_from(&self, start: &[u8]) -> Result<IndexIter<'_>> {
        let mut path = Vec::new();
        self.search(&mut path, start)?;
        Ok(IndexIter { index: self, path })
    }

    /// All entries in ascending key order.
    pub fn iter(&self) -> Result<IndexIter<'_>> {
        self.iter_from(&[])
    }
}

/// Forward-only in-order traversal driven by an explicit stack of frames.
///
/// A node read failure is returned once and ends the iteration.
pub struct IndexIter<'a> {
    index: &'a BTreeIndex,
    path: Vec<Frame>,
}

impl Iterator for IndexIter<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.path.last_mut()?;
        let entry = IndexEntry {
            key: top.node.keys[top.index].clone(),
            value: top.node.values[top.index],
        };
        top.index += 1;
        let mut child = if top.node.is_leaf {
            None
        } else {
            Some(top.node.children[top.index])
        };
        if top.index >= top.node.keys.len() {
            self.path.pop();
        }

        // leftmost path of the subtree right of the consumed key
        while let Some(location) = child {
            match self.index.load_non_empty(location) {
                Ok(node) => {
                    child = if node.is_leaf {
                        None
                    } else {
                        Some(node.children[0])
                    };
                    self.path.push(Frame { node, index: 0 });
                }
                Err(e) => {
                    self.path.clear();
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(entry))
    }
}
