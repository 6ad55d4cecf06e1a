use bytes::BufMut;
use std::sync::Arc;

use super::{
    catalog::Column,
    storage::{RowId, Table},
    types::Value,
};
use crate::error::{Error, Result};

/// A materialized row: its slot id, the table it came from, and its values
/// in column order.
///
/// Rows are only produced by [`Table::fetch`]; building one never touches
/// the file.
#[derive(Clone, Debug)]
pub struct Row {
    table: Arc<Table>,
    id: RowId,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(table: Arc<Table>, id: RowId, values: Vec<Value>) -> Self {
        debug_assert_eq!(values.len(), table.columns().len());
        Self { table, id, values }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value stored for `column`, which must belong to this row's table.
    pub fn value(&self, column: &Column) -> Result<&Value> {
        self.values.get(column.position).ok_or_else(|| {
            Error::NotFound(format!(
                "column {} (position {}) in row {} of {}",
                column.name,
                column.position,
                self.id,
                self.table.name()
            ))
        })
    }

    /// Fixed-width encoding of the values, in the table's column layout.
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<()> {
        self.table.encode_values(&self.values, buf)
    }

    /// Appends `columns` as one comma-separated, newline-terminated text line.
    pub fn write_line(&self, columns: &[Column], out: &mut Vec<u8>) -> Result<()> {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            self.value(column)?.write_text(&column.value_type, out);
        }
        out.push(b'\n');
        Ok(())
    }

    /// Puts this row's slot on the table's free list.
    pub fn delete(&self) -> Result<()> {
        self.table.delete_row(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ValueType;
    use tempfile::TempDir;

    #[test]
    fn test_write_line_projects_in_requested_order() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(
            Table::open(
                dir.path(),
                "t",
                vec![
                    Column::new("name", ValueType::string(8)),
                    Column::new("n", ValueType::integer()),
                    Column::new("ok", ValueType::Boolean),
                ],
            )
            .unwrap(),
        );
        let id = table
            .insert_row(&[
                Value::String("Oslo".to_string()),
                Value::Integer(-3),
                Value::Boolean(true),
            ])
            .unwrap();
        let row = table.fetch(id).unwrap().unwrap();

        let cols = table.columns();
        let mut out = Vec::new();
        row.write_line(&[cols[2].clone(), cols[0].clone(), cols[1].clone()], &mut out)
            .unwrap();
        assert_eq!(out, b"true,Oslo,-3\n");
    }

    #[test]
    fn test_serialize_matches_slot_body_and_delete_frees_slot() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(
            Table::open(dir.path(), "t", vec![Column::new("n", ValueType::integer())]).unwrap(),
        );
        let id = table.insert_row(&[Value::Integer(258)]).unwrap();
        let row = table.fetch(id).unwrap().unwrap();

        let mut buf = Vec::new();
        row.serialize(&mut buf).unwrap();
        assert_eq!(buf, 258i64.to_be_bytes());

        row.delete().unwrap();
        assert!(table.fetch(id).unwrap().is_none());
    }
}
