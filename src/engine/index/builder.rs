use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use super::{BTreeIndex, Layout, Node};
use crate::{
    engine::{
        cursor::{Cursor, FullScanCursor},
        storage::{read_at, write_at, RowId, Table},
        types::ValueType,
    },
    error::{Error, Result},
};

/// Writes a new index file by top-down insertion with proactive splits.
///
/// Keys must be unique. The header is rewritten whenever the root moves.
pub struct IndexBuilder {
    path: PathBuf,
    file: File,
    layout: Layout,
    root: u64,
    next_location: u64,
    entries: u64,
}

impl IndexBuilder {
    /// Creates (or truncates) `path` holding an empty tree.
    pub fn create(path: impl AsRef<Path>, minimum_degree: usize, key_size: usize) -> Result<Self> {
        if minimum_degree < 2 {
            return Err(Error::InvalidOperation(format!(
                "minimum degree must be at least 2, got {}",
                minimum_degree
            )));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut builder = Self {
            path,
            file,
            layout: Layout {
                minimum_degree,
                key_size,
            },
            root: 0,
            next_location: 1,
            entries: 0,
        };
        builder.write_header()?;
        builder.store(&Node::empty_leaf(0))?;
        Ok(builder)
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn insert(&mut self, key: &[u8], value: RowId) -> Result<()> {
        if key.len() > self.layout.key_size {
            return Err(Error::EncodingTooLong {
                length: key.len(),
                max: self.layout.key_size,
            });
        }

        let root = self.load(self.root)?;
        let node = if root.keys.len() == self.layout.max_keys() {
            let mut new_root = Node {
                location: self.allocate(),
                keys: Vec::new(),
                values: Vec::new(),
                children: vec![root.location],
                is_leaf: false,
            };
            self.split_child(&mut new_root, 0, root)?;
            self.root = new_root.location;
            self.write_header()?;
            new_root
        } else {
            root
        };
        self.insert_non_full(node, key, value)?;
        self.entries += 1;
        Ok(())
    }

    /// Flushes the file and reopens it read-only.
    pub fn finish(self) -> Result<BTreeIndex> {
        self.file.sync_all()?;
        info!(
            "built index {} ({} entries, {} nodes)",
            self.path.display(),
            self.entries,
            self.next_location
        );
        let path = self.path;
        drop(self.file);
        BTreeIndex::open(path)
    }

    fn insert_non_full(&mut self, mut node: Node, key: &[u8], value: RowId) -> Result<()> {
        loop {
            let i = node.keys.iter().take_while(|k| k.as_slice() < key).count();
            if node.keys.get(i).is_some_and(|k| k.as_slice() == key) {
                return Err(duplicate(key));
            }

            if node.is_leaf {
                node.keys.insert(i, key.to_vec());
                node.values.insert(i, value);
                return self.store(&node);
            }

            let mut i = i;
            let mut child = self.load(node.children[i])?;
            if child.keys.len() == self.layout.max_keys() {
                self.split_child(&mut node, i, child)?;
                match node.keys[i].as_slice().cmp(key) {
                    std::cmp::Ordering::Equal => return Err(duplicate(key)),
                    std::cmp::Ordering::Less => i += 1,
                    std::cmp::Ordering::Greater => {}
                }
                child = self.load(node.children[i])?;
            }
            node = child;
        }
    }

    /// Moves the upper half of the full `child` (at `parent.children[i]`)
    /// into a new right sibling and lifts its median into `parent`.
    fn split_child(&mut self, parent: &mut Node, i: usize, mut child: Node) -> Result<()> {
        let t = self.layout.minimum_degree;
        let mut right = Node {
            location: self.allocate(),
            keys: child.keys.split_off(t),
            values: child.values.split_off(t),
            children: Vec::new(),
            is_leaf: child.is_leaf,
        };
        if !child.is_leaf {
            right.children = child.children.split_off(t);
        }
        let (median_key, median_value) = match (child.keys.pop(), child.values.pop()) {
            (Some(k), Some(v)) => (k, v),
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "split of node {} with no median",
                    child.location
                )))
            }
        };

        parent.keys.insert(i, median_key);
        parent.values.insert(i, median_value);
        parent.children.insert(i + 1, right.location);

        self.store(&child)?;
        self.store(&right)?;
        self.store(parent)
    }

    fn allocate(&mut self) -> u64 {
        let location = self.next_location;
        self.next_location += 1;
        location
    }

    fn load(&mut self, location: u64) -> Result<Node> {
        let mut buf = vec![0u8; self.layout.node_size()];
        read_at(&mut self.file, self.layout.offset(location), &mut buf)?;
        Node::decode(&self.layout, location, &buf)
    }

    fn store(&mut self, node: &Node) -> Result<()> {
        let bytes = node.encode(&self.layout);
        write_at(&mut self.file, self.layout.offset(node.location), &bytes)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = self.layout.encode_header(self.root);
        write_at(&mut self.file, 0, &header)
    }
}

fn duplicate(key: &[u8]) -> Error {
    Error::InvalidOperation(format!("duplicate index key {:?}", String::from_utf8_lossy(key)))
}

/// Indexes every live row of `table` by `column`, mapping the column's
/// [`index_key`](crate::engine::Value::index_key) to the row id.
pub fn build_column_index(
    table: &Arc<Table>,
    column: &str,
    path: impl AsRef<Path>,
    minimum_degree: usize,
) -> Result<BTreeIndex> {
    let column = table.column(column)?.clone();
    let key_size = match column.value_type {
        ValueType::Integer { .. } => 8,
        ValueType::String { max_length } => max_length as usize,
        ValueType::Boolean => 1,
    };

    let mut builder = IndexBuilder::create(path, minimum_degree, key_size)?;
    let mut scan = FullScanCursor::new(Arc::clone(table));
    while let Some(row) = scan.next_row()? {
        builder.insert(&row.value(&column)?.index_key(&column.value_type), row.id())?;
    }
    builder.finish()
}
