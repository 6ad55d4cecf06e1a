use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use super::types::ValueType;

/// Definition of a single column within a table.
///
/// `position` is not persisted; `Table::open` assigns 0..n-1 in declaration
/// order and the column is immutable afterwards.
///
/// ## Example
/// ```rust
/// use slotdb::engine::{Column, ValueType};
///
/// let name = Column::new("name", ValueType::string(35));
/// let population = Column::new("population", ValueType::integer());
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Column {
    /// Column name (unique within a table)
    pub name: String,
    /// Storage type for values in this column
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Zero-based position in the row
    #[serde(skip)]
    pub position: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            position: 0,
        }
    }
}

/// Schema definition for one table.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TableSchema {
    /// Table name, also the file stem of `tables/<name>.tbl`
    pub name: String,
    /// Ordered column definitions
    pub columns: Vec<Column>,
}

/// The table registry.
///
/// Stored as pretty-printed JSON so it can be edited by hand before the
/// server starts:
///
/// ```json
/// {
///   "tables": [
///     {
///       "name": "test",
///       "columns": [
///         {"name": "first", "type": {"integer": {"signed": true}}},
///         {"name": "second", "type": {"string": {"max_length": 32}}}
///       ]
///     }
///   ]
/// }
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Catalog {
    /// All table schemas in registration order
    pub tables: Vec<TableSchema>,
    /// File path for persistence (not serialized)
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Catalog {
    /// Loads the catalog at `path`, or writes one holding the default tables
    /// if the file does not exist yet.
    pub fn load_or_create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            let bytes = fs::read(&path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            let mut c: Catalog = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing catalog {}", path.display()))?;
            c.path = Some(path);
            Ok(c)
        } else {
            let mut c = Catalog::with_default_tables();
            c.path = Some(path);
            c.persist()?;
            Ok(c)
        }
    }

    /// The `cities` and `test` tables a fresh data directory starts with.
    pub fn with_default_tables() -> Self {
        Self {
            tables: vec![
                TableSchema {
                    name: "cities".to_string(),
                    columns: vec![
                        Column::new("name", ValueType::string(35)),
                        Column::new("country_code", ValueType::string(3)),
                        Column::new("district", ValueType::string(30)),
                        Column::new("population", ValueType::integer()),
                    ],
                },
                TableSchema {
                    name: "test".to_string(),
                    columns: vec![
                        Column::new("first", ValueType::integer()),
                        Column::new("second", ValueType::string(32)),
                    ],
                },
            ],
            path: None,
        }
    }

    fn persist(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_vec_pretty(self)?)
                .with_context(|| format!("writing catalog {}", path.display()))?;
        }
        Ok(())
    }
}
