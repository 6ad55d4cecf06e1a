use parking_lot::RwLock;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

use super::{
    catalog::{Catalog, Column, TableSchema},
    cursor::{Cursor, FullScanCursor, SortingCursor},
    expr::Expression,
    storage::{RowId, Table},
    types::Value,
};
use crate::{
    error::{Error, Result},
    sql::{Expr, Literal, Select, Statement},
};

/// Result of executing one statement.
pub enum Response {
    /// Rows still to be pulled from `cursor`, projected onto `columns`
    Rows {
        cursor: Box<dyn Cursor>,
        columns: Vec<Column>,
    },
    Inserted(RowId),
    Deleted(u64),
    Quit,
}

/// Process-wide registry of open tables.
///
/// Tables are registered once at startup and shared by every connection.
pub struct Database {
    tables_dir: PathBuf,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// An empty registry whose table files live in `tables_dir`.
    pub fn new(tables_dir: impl Into<PathBuf>) -> Self {
        Self {
            tables_dir: tables_dir.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Opens every table named in `catalog`, with files under `data_dir/tables`.
    pub fn open(data_dir: &Path, catalog: &Catalog) -> Result<Self> {
        let db = Self::new(data_dir.join("tables"));
        for schema in &catalog.tables {
            db.register(schema)?;
        }
        info!(
            "opened {} tables in {}",
            catalog.tables.len(),
            db.tables_dir.display()
        );
        Ok(db)
    }

    pub fn register(&self, schema: &TableSchema) -> Result<Arc<Table>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(Error::InvalidOperation(format!(
                "table {} is already registered",
                schema.name
            )));
        }
        let table = Arc::new(Table::open(
            &self.tables_dir,
            &schema.name,
            schema.columns.clone(),
        )?);
        tables.insert(schema.name.clone(), Arc::clone(&table));
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no such table: {}", name)))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs `statement`. Selects return a cursor without reading any rows;
    /// inserts and deletes complete before returning.
    ///
    /// ## Arguments
    /// * `statement` - Parsed request from [`parse_statement`](crate::sql::parse_statement)
    ///
    /// ## Returns
    /// * `Ok(Response::Rows { .. })` - Unstarted cursor plus the projected columns
    /// * `Ok(Response::Inserted(id))` - Slot the new row landed in
    /// * `Ok(Response::Deleted(n))` - Number of rows removed
    /// * `Ok(Response::Quit)` - The client asked to close
    /// * `Err(_)` - Binding failed against the table, or storage failed
    pub fn execute(&self, statement: Statement) -> Result<Response> {
        debug!(?statement, "executing");
        match statement {
            Statement::Select(select) => self.select(select),
            Statement::Insert {
                table,
                columns,
                values,
            } => self.insert(&table, &columns, values),
            Statement::Delete { table, filter } => self.delete(&table, filter.as_ref()),
            Statement::Quit => Ok(Response::Quit),
        }
    }

    fn select(&self, select: Select) -> Result<Response> {
        let table = self.table(&select.table)?;
        let columns = match &select.columns {
            None => table.columns().to_vec(),
            Some(names) => names
                .iter()
                .map(|name| table.column(name).cloned())
                .collect::<Result<Vec<_>>>()?,
        };

        let mut cursor: Box<dyn Cursor> = Box::new(FullScanCursor::new(Arc::clone(&table)));
        if let Some(filter) = &select.filter {
            cursor.set_filter(bind(filter, &table)?)?;
        }
        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .iter()
                .map(|e| bind(e, &table))
                .collect::<Result<Vec<_>>>()?;
            cursor = Box::new(SortingCursor::new(cursor, keys)?);
        }
        Ok(Response::Rows { cursor, columns })
    }

    fn insert(&self, name: &str, columns: &[String], values: Vec<Literal>) -> Result<Response> {
        let table = self.table(name)?;
        if !columns.is_empty() && !table.columns().iter().map(|c| &c.name).eq(columns.iter()) {
            return Err(Error::InvalidOperation(format!(
                "column list must name every column of {} in table order",
                name
            )));
        }
        let values: Vec<Value> = values.into_iter().map(literal_value).collect();
        let id = table.insert_row(&values)?;
        Ok(Response::Inserted(id))
    }

    fn delete(&self, name: &str, filter: Option<&Expr>) -> Result<Response> {
        let table = self.table(name)?;
        let mut scan = FullScanCursor::new(Arc::clone(&table));
        if let Some(filter) = filter {
            scan.set_filter(bind(filter, &table)?)?;
        }
        let mut deleted = 0;
        while let Some(row) = scan.next_row()? {
            row.delete()?;
            deleted += 1;
        }
        debug!("deleted {} rows from {}", deleted, name);
        Ok(Response::Deleted(deleted))
    }
}

/// Resolves column names against `table`.
fn bind(expr: &Expr, table: &Table) -> Result<Expression> {
    Ok(match expr {
        Expr::Column(name) => Expression::Column(table.column(name)?.clone()),
        Expr::Literal(Literal::Integer(v)) => Expression::Integer(*v),
        Expr::Literal(Literal::String(s)) => Expression::String(s.clone()),
        Expr::Literal(Literal::Boolean(b)) => Expression::Boolean(*b),
        Expr::Comparison { left, op, right } => {
            Expression::comparison(bind(left, table)?, *op, bind(right, table)?)
        }
    })
}

fn literal_value(literal: Literal) -> Value {
    match literal {
        Literal::Integer(v) => Value::Integer(v),
        Literal::String(s) => Value::String(s),
        Literal::Boolean(b) => Value::Boolean(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::types::ValueType, sql::parse_statement};
    use tempfile::TempDir;

    fn database(dir: &TempDir) -> Database {
        Database::open(dir.path(), &Catalog::with_default_tables()).unwrap()
    }

    fn run(db: &Database, line: &str) -> Result<Response> {
        db.execute(parse_statement(line)?)
    }

    fn lines(db: &Database, line: &str) -> Vec<String> {
        match run(db, line).unwrap() {
            Response::Rows {
                mut cursor,
                columns,
            } => {
                let mut out = Vec::new();
                while let Some(row) = cursor.next_row().unwrap() {
                    row.write_line(&columns, &mut out).unwrap();
                }
                assert!(cursor.is_at_end().unwrap());
                String::from_utf8(out)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect()
            }
            _ => panic!("expected rows for {}", line),
        }
    }

    fn insert(db: &Database, line: &str) -> RowId {
        match run(db, line).unwrap() {
            Response::Inserted(id) => id,
            _ => panic!("expected insert for {}", line),
        }
    }

    fn load_cities(db: &Database) {
        for (name, code, population) in [
            ("Tokyo", "JPN", 13_960_000),
            ("Hamlet", "GBR", 300),
            ("Berlin", "DEU", 3_645_000),
            ("Village", "FRA", 800),
            ("Accra", "GHA", 2_291_000),
        ] {
            insert(
                db,
                &format!(
                    "INSERT INTO cities VALUES ('{}', '{}', 'x', {})",
                    name, code, population
                ),
            );
        }
    }

    #[test]
    fn test_filtered_sorted_projection() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        load_cities(&db);
        assert_eq!(
            lines(
                &db,
                "SELECT name, population FROM cities WHERE population > 1000 ORDER BY name"
            ),
            vec!["Accra,2291000", "Berlin,3645000", "Tokyo,13960000"]
        );
        assert_eq!(
            lines(&db, "SELECT country_code FROM cities WHERE name = 'Hamlet'"),
            vec!["GBR"]
        );
        assert_eq!(lines(&db, "SELECT * FROM cities").len(), 5);
        assert_eq!(
            lines(&db, "SELECT * FROM test"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_insert_reuses_deleted_slot() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert_eq!(insert(&db, "INSERT INTO test VALUES (1, 'a')"), 1);
        assert_eq!(insert(&db, "INSERT INTO test (first, second) VALUES (2, 'b')"), 2);
        match run(&db, "DELETE FROM test WHERE first = 1").unwrap() {
            Response::Deleted(n) => assert_eq!(n, 1),
            _ => panic!("expected delete"),
        }
        assert_eq!(insert(&db, "INSERT INTO test VALUES (3, 'c')"), 1);
        assert_eq!(lines(&db, "SELECT first FROM test ORDER BY first"), vec!["2", "3"]);
    }

    #[test]
    fn test_delete_without_filter_empties_table() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        load_cities(&db);
        assert!(matches!(run(&db, "DELETE FROM cities").unwrap(), Response::Deleted(5)));
        assert!(matches!(run(&db, "DELETE FROM cities").unwrap(), Response::Deleted(0)));
        assert_eq!(db.table("cities").unwrap().live_rows().unwrap(), 0);
    }

    #[test]
    fn test_resolution_and_type_errors() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert!(matches!(run(&db, "SELECT * FROM nope"), Err(Error::NotFound(_))));
        assert!(matches!(run(&db, "SELECT bogus FROM test"), Err(Error::NotFound(_))));
        assert!(matches!(
            run(&db, "SELECT * FROM test WHERE first = 'one'"),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            run(&db, "SELECT * FROM test WHERE first"),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            run(&db, "INSERT INTO test (second, first) VALUES ('a', 1)"),
            Err(Error::InvalidOperation(_))
        ));
        assert!(run(&db, "INSERT INTO test VALUES ('a', 1)").is_err());
        assert!(run(&db, "INSERT INTO test VALUES (1)").is_err());
        assert!(matches!(
            run(&db, &format!("INSERT INTO test VALUES (1, '{}')", "x".repeat(33))),
            Err(Error::EncodingTooLong { length: 33, max: 32 })
        ));
        assert_eq!(db.table("test").unwrap().live_rows().unwrap(), 0);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert_eq!(db.table_names(), vec!["cities", "test"]);
        let schema = TableSchema {
            name: "test".to_string(),
            columns: vec![Column::new("x", ValueType::Boolean)],
        };
        assert!(db.register(&schema).is_err());
    }

    #[test]
    fn test_quit_statement() {
        let dir = TempDir::new().unwrap();
        let db = database(&dir);
        assert!(matches!(run(&db, "QUIT").unwrap(), Response::Quit));
    }
}
