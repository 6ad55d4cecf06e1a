use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

use super::{catalog::Column, row::Row, types::Value};
use crate::error::{Error, Result};

/// Slot number of a row within its table file.
pub type RowId = u64;

/// Width of the free-link field at the front of every slot.
pub const FREE_LINK_SIZE: usize = 8;

/// Free-link value of a live row.
const LIVE: i64 = 0;
/// Free-link value terminating the free list.
const END_OF_LIST: i64 = -1;
/// Slot whose free link holds the free-list head.
const HEAD_SLOT: RowId = 0;

/// Fixed-width row store backed by a single file.
///
/// ## File Structure
/// ```text
/// name.tbl:
/// [slot 0][slot 1][slot 2]...[slot N]
///    |       |
///    |       └─ [free link: i64][col 0][col 1]...   (link 0 = live)
///    └─ free-list head: link = first free slot, or -1
/// ```
///
/// Slot `i` starts at `i * row_size`. Deleted slots are threaded into a free
/// list through their link field and reused by later inserts before the file
/// grows.
#[derive(Debug)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    row_size: usize,
    path: PathBuf,
    file: Mutex<File>,
}

impl Table {
    /// Opens `dir/<name>.tbl`, creating it with an empty free list if needed.
    ///
    /// Column positions are assigned here in declaration order.
    ///
    /// ## Arguments
    /// * `dir` - Directory holding table files (created if missing)
    /// * `name` - Table name, used for the file name
    /// * `columns` - Column definitions in slot order
    ///
    /// ## Returns
    /// * `Ok(Table)` - Handle over the slot file
    /// * `Err(_)` - Duplicate column names or an unusable slot file
    pub fn open(dir: impl AsRef<Path>, name: &str, columns: Vec<Column>) -> Result<Self> {
        // Step 1: validate and position the columns
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::InvalidOperation(format!(
                    "duplicate column {} in table {}",
                    c.name, name
                )));
            }
        }
        let columns: Vec<Column> = columns
            .into_iter()
            .enumerate()
            .map(|(position, c)| Column { position, ..c })
            .collect();
        let row_size =
            FREE_LINK_SIZE + columns.iter().map(|c| c.value_type.encoded_size()).sum::<usize>();

        // Step 2: open the slot file
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(format!("{}.tbl", name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let table = Self {
            name: name.to_string(),
            columns,
            row_size,
            path,
            file: Mutex::new(file),
        };

        // Step 3: a fresh file gets its head slot with an empty free list
        if table.capacity()? == 0 {
            let mut head = vec![0u8; row_size];
            head[..FREE_LINK_SIZE].copy_from_slice(&END_OF_LIST.to_be_bytes());
            write_at(&mut table.file.lock(), 0, &head)?;
        }
        info!(table = %table.name, row_size, capacity = table.capacity()?, "table opened");
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes per slot, including the free link.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| {
            Error::NotFound(format!("no such column in table '{}': {}", self.name, name))
        })
    }

    /// Number of slots in the file, including slot 0 and deleted slots.
    pub fn capacity(&self) -> Result<u64> {
        let len = self.file.lock().metadata()?.len();
        let row_size = self.row_size as u64;
        if len % row_size != 0 {
            return Err(Error::Truncated {
                expected: self.row_size,
                actual: (len % row_size) as usize,
            });
        }
        Ok(len / row_size)
    }

    /// Reads slot `id`. Returns `None` if the slot is on the free list.
    pub fn fetch(self: &Arc<Self>, id: RowId) -> Result<Option<Row>> {
        let mut slot = vec![0u8; self.row_size];
        read_at(&mut self.file.lock(), self.offset(id)?, &mut slot)?;

        let mut buf = slot.as_slice();
        if buf.get_i64() != LIVE {
            return Ok(None);
        }
        let values = self
            .columns
            .iter()
            .map(|c| c.value_type.decode(&mut buf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Row::new(Arc::clone(self), id, values)))
    }

    /// Stores a new row and returns its id, reusing a freed slot if one exists.
    ///
    /// The whole slot is encoded before the file is touched, so a value that
    /// does not fit leaves the table unchanged.
    pub fn insert_row(&self, values: &[Value]) -> Result<RowId> {
        let mut slot = Vec::with_capacity(self.row_size);
        slot.put_i64(LIVE);
        self.encode_values(values, &mut slot)?;

        let mut file = self.file.lock();
        let head = self.read_link(&mut file, HEAD_SLOT)?;
        let id = match head {
            END_OF_LIST => len_in_slots(&file, self.row_size)?,
            free if free > 0 => {
                let next = self.read_link(&mut file, free as RowId)?;
                self.write_link(&mut file, HEAD_SLOT, next)?;
                free as RowId
            }
            corrupt => {
                return Err(Error::InvalidEncoding(format!(
                    "free list head {} in table {}",
                    corrupt, self.name
                )))
            }
        };
        write_at(&mut file, self.offset(id)?, &slot)?;
        debug!(table = %self.name, id, reused = head != END_OF_LIST, "row inserted");
        Ok(id)
    }

    /// Pushes slot `id` onto the front of the free list.
    ///
    /// Only live rows can be deleted; deleting slot 0, a slot past the end of
    /// the file, or an already-free slot is rejected.
    pub fn delete_row(&self, id: RowId) -> Result<()> {
        if id == HEAD_SLOT {
            return Err(Error::InvalidOperation("slot 0 is reserved".to_string()));
        }
        let mut file = self.file.lock();
        if id >= len_in_slots(&file, self.row_size)? {
            return Err(Error::InvalidOperation(format!(
                "row {} is past the end of table {}",
                id, self.name
            )));
        }
        if self.read_link(&mut file, id)? != LIVE {
            return Err(Error::InvalidOperation(format!(
                "row {} of table {} is already deleted",
                id, self.name
            )));
        }
        let head = self.read_link(&mut file, HEAD_SLOT)?;
        self.write_link(&mut file, id, head)?;
        self.write_link(&mut file, HEAD_SLOT, id as i64)?;
        debug!(table = %self.name, id, "row deleted");
        Ok(())
    }

    /// Counts slots holding live rows.
    pub fn live_rows(&self) -> Result<u64> {
        let capacity = self.capacity()?;
        let mut file = self.file.lock();
        let mut live = 0;
        for id in 1..capacity {
            if self.read_link(&mut file, id)? == LIVE {
                live += 1;
            }
        }
        Ok(live)
    }

    /// Appends the fixed-width encoding of `values` in column order.
    pub fn encode_values(&self, values: &[Value], buf: &mut impl BufMut) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::InvalidOperation(format!(
                "table {} has {} columns, got {} values",
                self.name,
                self.columns.len(),
                values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(values) {
            column.value_type.encode(value, buf)?;
        }
        Ok(())
    }

    fn offset(&self, id: RowId) -> Result<u64> {
        id.checked_mul(self.row_size as u64).ok_or_else(|| {
            Error::InvalidOperation(format!("row {} is out of range for table {}", id, self.name))
        })
    }

    fn read_link(&self, file: &mut File, id: RowId) -> Result<i64> {
        let mut link = [0u8; FREE_LINK_SIZE];
        read_at(file, self.offset(id)?, &mut link)?;
        Ok(i64::from_be_bytes(link))
    }

    fn write_link(&self, file: &mut File, id: RowId, link: i64) -> Result<()> {
        write_at(file, self.offset(id)?, &link.to_be_bytes())
    }
}

fn len_in_slots(file: &File, row_size: usize) -> Result<u64> {
    Ok(file.metadata()?.len() / row_size as u64)
}

/// Fills `buf` from `offset`, failing with `Truncated` on a short read.
pub(crate) fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled != buf.len() {
        return Err(Error::Truncated {
            expected: buf.len(),
            actual: filled,
        });
    }
    Ok(())
}

pub(crate) fn write_at(file: &mut File, offset: u64, buf: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ValueType;
    use tempfile::TempDir;

    fn cities(dir: &TempDir) -> Arc<Table> {
        Arc::new(
            Table::open(
                dir.path(),
                "cities",
                vec![
                    Column::new("name", ValueType::string(35)),
                    Column::new("population", ValueType::integer()),
                ],
            )
            .unwrap(),
        )
    }

    fn city(name: &str, population: i64) -> Vec<Value> {
        vec![Value::String(name.to_string()), Value::Integer(population)]
    }

    #[test]
    fn test_new_table_reserves_head_slot() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        assert_eq!(table.row_size(), 8 + 39 + 8);
        assert_eq!(table.capacity().unwrap(), 1);
        assert!(table.fetch(0).unwrap().is_none());
        assert_eq!(table.columns()[1].position, 1);
    }

    #[test]
    fn test_insert_and_fetch() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        let id = table.insert_row(&city("Kabul", 1780000)).unwrap();
        assert_eq!(id, 1);

        let row = table.fetch(id).unwrap().unwrap();
        assert_eq!(row.id(), 1);
        assert_eq!(row.values(), city("Kabul", 1780000).as_slice());
    }

    #[test]
    fn test_deleted_slot_is_reused_before_growing() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(table.insert_row(&city(name, i as i64)).unwrap(), i as u64 + 1);
        }
        assert_eq!(table.capacity().unwrap(), 4);

        table.delete_row(1).unwrap();
        assert!(table.fetch(1).unwrap().is_none());

        assert_eq!(table.insert_row(&city("d", 9)).unwrap(), 1);
        assert_eq!(table.capacity().unwrap(), 4);
        assert_eq!(table.live_rows().unwrap(), 3);
    }

    #[test]
    fn test_free_list_is_lifo_then_extends() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        for i in 0..5 {
            table.insert_row(&city("x", i)).unwrap();
        }
        table.delete_row(2).unwrap();
        table.delete_row(4).unwrap();

        assert_eq!(table.insert_row(&city("y", 0)).unwrap(), 4);
        assert_eq!(table.insert_row(&city("y", 1)).unwrap(), 2);
        assert_eq!(table.insert_row(&city("y", 2)).unwrap(), 6);
        assert_eq!(table.capacity().unwrap(), 7);
    }

    #[test]
    fn test_free_list_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let table = cities(&dir);
            table.insert_row(&city("a", 1)).unwrap();
            table.insert_row(&city("b", 2)).unwrap();
            table.delete_row(1).unwrap();
        }
        let table = cities(&dir);
        assert_eq!(table.capacity().unwrap(), 3);
        assert_eq!(table.insert_row(&city("c", 3)).unwrap(), 1);
    }

    #[test]
    fn test_oversized_value_leaves_table_unchanged() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        let long = "x".repeat(36);
        let err = table.insert_row(&city(&long, 1)).unwrap_err();
        assert!(matches!(err, Error::EncodingTooLong { length: 36, max: 35 }));
        assert_eq!(table.capacity().unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_wrong_shape() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        assert!(matches!(
            table.insert_row(&[Value::Integer(1)]),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            table.insert_row(&[Value::Integer(1), Value::Integer(2)]),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_delete_rejects_free_reserved_and_missing_slots() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        table.insert_row(&city("a", 1)).unwrap();
        table.delete_row(1).unwrap();

        assert!(matches!(table.delete_row(1), Err(Error::InvalidOperation(_))));
        assert!(matches!(table.delete_row(0), Err(Error::InvalidOperation(_))));
        assert!(matches!(table.delete_row(7), Err(Error::InvalidOperation(_))));
        // the chain is intact: the freed slot is handed out exactly once
        assert_eq!(table.insert_row(&city("b", 2)).unwrap(), 1);
        assert_eq!(table.insert_row(&city("c", 3)).unwrap(), 2);
    }

    #[test]
    fn test_fetch_past_end_is_truncated() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        assert!(matches!(table.fetch(3), Err(Error::Truncated { actual: 0, .. })));
    }

    #[test]
    fn test_fetch_id_beyond_addressable_range() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        assert!(matches!(table.fetch(u64::MAX), Err(Error::InvalidOperation(_))));
        assert!(matches!(table.fetch(u64::MAX / 2), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_partial_trailing_slot_is_reported() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        table.insert_row(&city("a", 1)).unwrap();
        let file = OpenOptions::new().append(true).open(table.path()).unwrap();
        (&file).write_all(&[0u8; 5]).unwrap();
        assert!(matches!(table.capacity(), Err(Error::Truncated { actual: 5, .. })));
    }

    #[test]
    fn test_corrupt_string_length_is_invalid_encoding() {
        let dir = TempDir::new().unwrap();
        let table = cities(&dir);
        table.insert_row(&city("a", 1)).unwrap();
        write_at(
            &mut table.file.lock(),
            table.row_size() as u64 + FREE_LINK_SIZE as u64,
            &999u32.to_be_bytes(),
        )
        .unwrap();
        assert!(matches!(table.fetch(1), Err(Error::InvalidEncoding(_))));
    }

    #[test]
    fn test_duplicate_column_names_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Table::open(
            dir.path(),
            "dup",
            vec![
                Column::new("a", ValueType::integer()),
                Column::new("a", ValueType::Boolean),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
