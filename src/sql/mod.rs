//! Request-line parsing.
//!
//! The `sqlparser` AST is reduced to the few statement shapes the engine
//! executes. Names stay unresolved here; binding to table columns happens in
//! the executor.

use sqlparser::ast::{
    self, BinaryOperator, Expr as SqlExpr, SelectItem, SetExpr, TableFactor, TableWithJoins,
    UnaryOperator,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::engine::ComparisonOp;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(Select),
    /// `INSERT INTO t [(cols)] VALUES (...)`, one row
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Literal>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    Quit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub table: String,
    /// `None` for `*`
    pub columns: Option<Vec<String>>,
    pub filter: Option<Expr>,
    pub order_by: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i64),
    String(String),
    Boolean(bool),
}

/// Unbound expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Literal),
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
}

/// Parses one request line. A trailing `;` is optional.
pub fn parse_statement(line: &str) -> Result<Statement> {
    let text = line.trim().trim_end_matches(';').trim_end();
    if text.eq_ignore_ascii_case("quit") {
        return Ok(Statement::Quit);
    }

    let mut statements = Parser::parse_sql(&GenericDialect {}, text)?;
    if statements.len() != 1 {
        return Err(malformed("expected exactly one statement"));
    }
    match statements.remove(0) {
        ast::Statement::Query(query) => select(*query).map(Statement::Select),
        ast::Statement::Insert {
            table_name,
            columns,
            source,
            ..
        } => {
            let source = *source.ok_or_else(|| malformed("INSERT requires VALUES"))?;
            let mut rows = match *source.body {
                SetExpr::Values(values) => values.rows,
                _ => return Err(malformed("INSERT supports VALUES only")),
            };
            if rows.len() != 1 {
                return Err(malformed("INSERT takes exactly one row"));
            }
            let values = rows
                .remove(0)
                .into_iter()
                .map(|e| match expr(e)? {
                    Expr::Literal(l) => Ok(l),
                    _ => Err(malformed("INSERT values must be literals")),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Statement::Insert {
                table: object_name(&table_name)?,
                columns: columns.into_iter().map(|c| c.value).collect(),
                values,
            })
        }
        // sqlparser 0.43: `from` is Vec<TableWithJoins>
        ast::Statement::Delete {
            from, selection, ..
        } => Ok(Statement::Delete {
            table: single_table(&from)?,
            filter: selection.map(expr).transpose()?,
        }),
        other => Err(malformed(&format!("unsupported statement: {}", other))),
    }
}

fn select(query: ast::Query) -> Result<Select> {
    if query.limit.is_some() || query.offset.is_some() {
        return Err(malformed("LIMIT and OFFSET are not supported"));
    }
    let select = match *query.body {
        SetExpr::Select(select) => *select,
        _ => return Err(malformed("unsupported query body")),
    };

    let columns = match select.projection.as_slice() {
        [SelectItem::Wildcard(_)] => None,
        items => Some(
            items
                .iter()
                .map(|item| match item {
                    SelectItem::UnnamedExpr(SqlExpr::Identifier(id)) => Ok(id.value.clone()),
                    _ => Err(malformed("only SELECT * or SELECT col[, col...] is supported")),
                })
                .collect::<Result<Vec<_>>>()?,
        ),
    };

    let order_by = query
        .order_by
        .into_iter()
        .map(|o| {
            if o.asc == Some(false) {
                return Err(malformed("ORDER BY ... DESC is not supported"));
            }
            expr(o.expr)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Select {
        table: single_table(&select.from)?,
        columns,
        filter: select.selection.map(expr).transpose()?,
        order_by,
    })
}

fn single_table(from: &[TableWithJoins]) -> Result<String> {
    match from {
        [TableWithJoins { relation, joins }] if joins.is_empty() => match relation {
            TableFactor::Table { name, .. } => object_name(name),
            _ => Err(malformed("unsupported FROM clause")),
        },
        _ => Err(malformed("exactly one table is supported")),
    }
}

fn object_name(name: &ast::ObjectName) -> Result<String> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.clone()),
        _ => Err(malformed(&format!("unsupported table name: {}", name))),
    }
}

fn expr(e: SqlExpr) -> Result<Expr> {
    match e {
        SqlExpr::Identifier(id) => Ok(Expr::Column(id.value)),
        SqlExpr::Nested(inner) => expr(*inner),
        SqlExpr::Value(ast::Value::Number(n, _)) => integer(&n).map(Expr::Literal),
        SqlExpr::Value(ast::Value::SingleQuotedString(s)) => {
            Ok(Expr::Literal(Literal::String(s)))
        }
        SqlExpr::Value(ast::Value::Boolean(b)) => Ok(Expr::Literal(Literal::Boolean(b))),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match *inner {
            SqlExpr::Value(ast::Value::Number(n, _)) => {
                integer(&format!("-{}", n)).map(Expr::Literal)
            }
            _ => Err(malformed("unary minus applies to integer literals only")),
        },
        SqlExpr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Eq => ComparisonOp::Equal,
                BinaryOperator::NotEq => ComparisonOp::NotEqual,
                BinaryOperator::Lt => ComparisonOp::LessThan,
                BinaryOperator::Gt => ComparisonOp::GreaterThan,
                other => return Err(malformed(&format!("unsupported operator {}", other))),
            };
            Ok(Expr::Comparison {
                left: Box::new(expr(*left)?),
                op,
                right: Box::new(expr(*right)?),
            })
        }
        other => Err(malformed(&format!("unsupported expression: {}", other))),
    }
}

fn integer(text: &str) -> Result<Literal> {
    text.parse::<i64>()
        .map(Literal::Integer)
        .map_err(|_| malformed(&format!("invalid integer literal {}", text)))
}

fn malformed(msg: &str) -> Error {
    Error::Malformed(msg.to_string())
}
