use std::{
    cmp::Ordering,
    future::poll_fn,
    sync::Arc,
    task::{Context, Poll},
    vec,
};

use super::{
    expr::Expression,
    row::Row,
    storage::{RowId, Table},
    types::{Value, ValueType},
};
use crate::error::{Error, Result};

/// Rows a full-table scan tries to keep buffered.
pub const SCAN_BUFFER_ROWS: usize = 16;
/// The scan refills once this many unread rows (or fewer) remain.
const REFILL_THRESHOLD: usize = SCAN_BUFFER_ROWS / 2;

/// Pull-based source of rows.
///
/// `next_row` may return `None` before `is_at_end` is true if no row is ready
/// yet; the consumer then waits on [`Cursor::poll_ready`] and tries again.
pub trait Cursor: Send {
    /// True once every row has been produced or skipped.
    fn is_at_end(&mut self) -> Result<bool>;

    /// Whether `next_row` can make progress without waiting.
    fn is_ready(&self) -> bool {
        true
    }

    fn next_row(&mut self) -> Result<Option<Row>>;

    fn table(&self) -> &Arc<Table>;

    /// Resolves once more rows can be produced.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>>;

    /// Installs a boolean filter. Must be called before the first `next_row`.
    fn set_filter(&mut self, filter: Expression) -> Result<()>;
}

/// Waits for `cursor`'s readiness signal.
pub async fn ready(cursor: &mut dyn Cursor) -> Result<()> {
    poll_fn(|cx| cursor.poll_ready(cx)).await
}

/// Scans every slot of a table in id order through a small row buffer,
/// applying the filter while refilling.
pub struct FullScanCursor {
    table: Arc<Table>,
    filter: Option<Expression>,
    rows: Vec<Row>,
    /// Index of the oldest unread entry in `rows`
    read_head: usize,
    /// Next slot to fetch
    next_id: RowId,
    /// Slots read out or skipped so far
    consumed: u64,
    started: bool,
}

impl FullScanCursor {
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            filter: None,
            rows: Vec::with_capacity(SCAN_BUFFER_ROWS),
            read_head: 0,
            next_id: 0,
            consumed: 0,
            started: false,
        }
    }

    fn buffered(&self) -> usize {
        self.rows.len() - self.read_head
    }

    fn compact(&mut self) {
        if self.read_head > 0 {
            self.rows.drain(..self.read_head);
            self.read_head = 0;
        }
    }

    fn refill(&mut self) -> Result<()> {
        self.compact();
        let capacity = self.table.capacity()?;
        while self.rows.len() < SCAN_BUFFER_ROWS && self.next_id < capacity {
            let id = self.next_id;
            self.next_id += 1;
            match self.table.fetch(id)? {
                Some(row) if self.accepts(&row)? => self.rows.push(row),
                // deleted or filtered out
                _ => self.consumed += 1,
            }
        }
        Ok(())
    }

    fn accepts(&self, row: &Row) -> Result<bool> {
        match &self.filter {
            Some(filter) => filter.evaluate_as_boolean(row),
            None => Ok(true),
        }
    }
}

impl Cursor for FullScanCursor {
    fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.consumed >= self.table.capacity()?)
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        self.started = true;
        if self.buffered() <= REFILL_THRESHOLD {
            self.refill()?;
        }
        if self.buffered() == 0 {
            return Ok(None);
        }
        let row = self.rows[self.read_head].clone();
        self.read_head += 1;
        self.consumed += 1;
        Ok(Some(row))
    }

    fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        // fetches are synchronous, so rows are always available
        Poll::Ready(Ok(()))
    }

    fn set_filter(&mut self, filter: Expression) -> Result<()> {
        if self.started {
            return Err(Error::InvalidOperation(
                "filter must be installed before the scan starts".to_string(),
            ));
        }
        filter.validate()?;
        if filter.value_type() != ValueType::Boolean {
            return Err(Error::InvalidOperation(format!(
                "expected boolean filter, got {}",
                filter.value_type()
            )));
        }
        self.filter = Some(filter);
        Ok(())
    }
}

/// Materializes its base cursor on first use and returns the rows ordered
/// by `keys`, earlier keys taking precedence. The sort is stable.
///
/// The base cursor must be synchronous: a base that reports no ready row
/// before its end makes materialization fail.
pub struct SortingCursor {
    base: Box<dyn Cursor>,
    keys: Vec<Expression>,
    unsigned: Vec<bool>,
    sorted: Option<vec::IntoIter<Row>>,
}

impl SortingCursor {
    pub fn new(base: Box<dyn Cursor>, keys: Vec<Expression>) -> Result<Self> {
        for key in &keys {
            key.validate()?;
        }
        let unsigned = keys.iter().map(|k| k.value_type().is_unsigned()).collect();
        Ok(Self {
            base,
            keys,
            unsigned,
            sorted: None,
        })
    }

    fn sorted(&mut self) -> Result<&mut vec::IntoIter<Row>> {
        let rows = match self.sorted.take() {
            Some(rows) => rows,
            None => self.materialize()?.into_iter(),
        };
        Ok(self.sorted.insert(rows))
    }

    fn materialize(&mut self) -> Result<Vec<Row>> {
        let mut input: Vec<(Vec<Value>, Row)> = Vec::new();
        while !self.base.is_at_end()? {
            match self.base.next_row()? {
                Some(row) => {
                    let key = self
                        .keys
                        .iter()
                        .map(|k| k.evaluate(&row))
                        .collect::<Result<Vec<_>>>()?;
                    input.push((key, row));
                }
                None => {
                    if !self.base.is_at_end()? {
                        return Err(Error::InvalidOperation(
                            "sort input stalled before its end".to_string(),
                        ));
                    }
                    break;
                }
            }
        }
        let unsigned = &self.unsigned;
        input.sort_by(|(a, _), (b, _)| compare_keys(a, b, unsigned));
        Ok(input.into_iter().map(|(_, row)| row).collect())
    }
}

fn compare_keys(a: &[Value], b: &[Value], unsigned: &[bool]) -> Ordering {
    a.iter()
        .zip(b)
        .zip(unsigned)
        .map(|((x, y), u)| x.compare_as(y, *u).unwrap_or(Ordering::Equal))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl Cursor for SortingCursor {
    fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.sorted()?.len() == 0)
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.sorted()?.next())
    }

    fn table(&self) -> &Arc<Table> {
        self.base.table()
    }

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn set_filter(&mut self, filter: Expression) -> Result<()> {
        if self.sorted.is_some() {
            return Err(Error::InvalidOperation(
                "filter must be installed before sorting".to_string(),
            ));
        }
        self.base.set_filter(filter)
    }
}
