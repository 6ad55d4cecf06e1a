//! Storage engine and query pipeline.
//!
//! ```text
//! types ── row ── storage (fixed-width slot files)
//!                    │
//!        expr ── cursor (scan, filter, sort) ── executor (Database)
//!                    │
//!                  index (read-only B-tree, built from a table)
//! ```

mod catalog;
mod cursor;
mod executor;
mod expr;
mod index;
mod row;
mod storage;
mod types;

pub use catalog::{Catalog, Column, TableSchema};
pub use cursor::{ready, Cursor, FullScanCursor, SortingCursor, SCAN_BUFFER_ROWS};
pub use executor::{Database, Response};
pub use expr::{ComparisonOp, Expression};
pub use index::{build_column_index, BTreeIndex, IndexBuilder, IndexEntry, IndexIter};
pub use row::Row;
pub use storage::{RowId, Table, FREE_LINK_SIZE};
pub use types::{Value, ValueType};
