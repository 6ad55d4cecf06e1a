//! Expression trees evaluated against rows.
//!
//! Trees are bound to a table when they are built (column references carry
//! their position), validated once, and then evaluated per row without
//! further checks.

use std::{cmp::Ordering, fmt};

use super::{catalog::Column, row::Row, types::Value, types::ValueType};
use crate::error::{Error, Result};

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "<>",
            ComparisonOp::LessThan => "<",
            ComparisonOp::GreaterThan => ">",
        })
    }
}

#[derive(Clone, Debug)]
pub enum Expression {
    /// Reads one column of the row
    Column(Column),
    Integer(i64),
    String(String),
    Boolean(bool),
    Comparison {
        left: Box<Expression>,
        op: ComparisonOp,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn comparison(left: Expression, op: ComparisonOp, right: Expression) -> Self {
        Expression::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Static result type.
    pub fn value_type(&self) -> ValueType {
        match self {
            Expression::Column(c) => c.value_type,
            Expression::Integer(_) => ValueType::integer(),
            Expression::String(s) => ValueType::string(s.len() as u32),
            Expression::Boolean(_) | Expression::Comparison { .. } => ValueType::Boolean,
        }
    }

    /// Checks that every comparison in the tree has comparable operands.
    pub fn validate(&self) -> Result<()> {
        match self {
            Expression::Comparison { left, op, right } => {
                left.validate()?;
                right.validate()?;
                let (l, r) = (left.value_type(), right.value_type());
                if !l.is_comparable(&r) {
                    return Err(Error::InvalidOperation(format!(
                        "can't compare {} with {} using {}",
                        l, r, op
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn evaluate(&self, row: &Row) -> Result<Value> {
        match self {
            Expression::Column(c) => row.value(c).cloned(),
            Expression::Integer(v) => Ok(Value::Integer(*v)),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),
            Expression::Comparison { .. } => self.evaluate_as_boolean(row).map(Value::Boolean),
        }
    }

    /// Only defined for integer-typed expressions.
    pub fn evaluate_as_integer(&self, row: &Row) -> Result<i64> {
        match (self, self.value_type()) {
            (Expression::Integer(v), _) => Ok(*v),
            (Expression::Column(c), ValueType::Integer { .. }) => match row.value(c)? {
                Value::Integer(v) => Ok(*v),
                other => Err(type_mismatch("integer", other)),
            },
            _ => Err(Error::InvalidOperation(format!(
                "can't evaluate {} expression as integer",
                self.value_type()
            ))),
        }
    }

    /// Only defined for boolean-typed expressions.
    pub fn evaluate_as_boolean(&self, row: &Row) -> Result<bool> {
        match (self, self.value_type()) {
            (Expression::Boolean(b), _) => Ok(*b),
            (Expression::Column(c), ValueType::Boolean) => match row.value(c)? {
                Value::Boolean(b) => Ok(*b),
                other => Err(type_mismatch("boolean", other)),
            },
            (Expression::Comparison { left, op, right }, _) => {
                let l = left.evaluate(row)?;
                let r = right.evaluate(row)?;
                let unsigned = left.value_type().is_unsigned() || right.value_type().is_unsigned();
                Ok(match op {
                    ComparisonOp::Equal => l == r,
                    ComparisonOp::NotEqual => l != r,
                    ComparisonOp::LessThan => l.compare_as(&r, unsigned)? == Ordering::Less,
                    ComparisonOp::GreaterThan => {
                        l.compare_as(&r, unsigned)? == Ordering::Greater
                    }
                })
            }
            _ => Err(Error::InvalidOperation(format!(
                "can't evaluate {} expression as boolean",
                self.value_type()
            ))),
        }
    }
}

fn type_mismatch(expected: &str, got: &Value) -> Error {
    Error::InvalidOperation(format!("expected {} value, got {}", expected, got.type_name()))
}
