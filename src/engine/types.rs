use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, io::Write};

use crate::error::{Error, Result};

/// Storage type of a column.
///
/// Every variant has a fixed on-disk width, so a table's row size is known as
/// soon as its columns are.
///
/// ## Encodings (big-endian)
/// - `Integer`: 8 bytes, two's complement; `signed` only affects formatting
/// - `String`: 4-byte length + `max_length` bytes of UTF-8
/// - `Boolean`: 1 byte, 0 or 1
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 64-bit integer
    Integer {
        #[serde(default = "signed_by_default")]
        signed: bool,
    },
    /// UTF-8 string of at most `max_length` bytes
    String { max_length: u32 },
    /// true/false
    Boolean,
}

fn signed_by_default() -> bool {
    true
}

impl ValueType {
    /// Signed 64-bit integer.
    pub const fn integer() -> Self {
        ValueType::Integer { signed: true }
    }

    /// String holding at most `max_length` bytes.
    pub const fn string(max_length: u32) -> Self {
        ValueType::String { max_length }
    }

    /// Size in bytes of one encoded value.
    pub fn encoded_size(&self) -> usize {
        match self {
            ValueType::Integer { .. } => 8,
            ValueType::String { max_length } => 4 + *max_length as usize,
            ValueType::Boolean => 1,
        }
    }

    /// Widest text rendering of a value of this type, used to reserve output space.
    pub fn max_text_width(&self) -> usize {
        match self {
            ValueType::Integer { .. } => 20,
            ValueType::String { max_length } => *max_length as usize,
            ValueType::Boolean => 5,
        }
    }

    /// Only same-variant pairs can be compared.
    /// True for integer types rendered and ordered as `u64`.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, ValueType::Integer { signed: false })
    }

    pub fn is_comparable(&self, other: &ValueType) -> bool {
        matches!(
            (self, other),
            (ValueType::Integer { .. }, ValueType::Integer { .. })
                | (ValueType::String { .. }, ValueType::String { .. })
                | (ValueType::Boolean, ValueType::Boolean)
        )
    }

    /// Whether `value` may be stored in a field of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::Integer { .. }, Value::Integer(_))
                | (ValueType::String { .. }, Value::String(_))
                | (ValueType::Boolean, Value::Boolean(_))
        )
    }

    /// Appends exactly `encoded_size()` bytes for `value`.
    ///
    /// Nothing is written if the value has the wrong type or is too long.
    pub fn encode(&self, value: &Value, buf: &mut impl BufMut) -> Result<()> {
        match (self, value) {
            (ValueType::Integer { .. }, Value::Integer(v)) => buf.put_i64(*v),
            (ValueType::String { max_length }, Value::String(s)) => {
                let max = *max_length as usize;
                let bytes = s.as_bytes();
                if bytes.len() > max {
                    return Err(Error::EncodingTooLong {
                        length: bytes.len(),
                        max,
                    });
                }
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
                buf.put_bytes(0, max - bytes.len());
            }
            (ValueType::Boolean, Value::Boolean(b)) => buf.put_u8(u8::from(*b)),
            (ty, v) => {
                return Err(Error::InvalidOperation(format!(
                    "cannot store {} value in {} field",
                    v.type_name(),
                    ty
                )))
            }
        }
        Ok(())
    }

    /// Consumes exactly `encoded_size()` bytes and returns the value.
    pub fn decode(&self, buf: &mut impl Buf) -> Result<Value> {
        let size = self.encoded_size();
        if buf.remaining() < size {
            return Err(Error::Truncated {
                expected: size,
                actual: buf.remaining(),
            });
        }
        match self {
            ValueType::Integer { .. } => Ok(Value::Integer(buf.get_i64())),
            ValueType::String { max_length } => {
                let max = *max_length as usize;
                let length = buf.get_u32() as usize;
                if length > max {
                    return Err(Error::InvalidEncoding(format!(
                        "string length {} exceeds maximum {}",
                        length, max
                    )));
                }
                let mut bytes = vec![0u8; length];
                buf.copy_to_slice(&mut bytes);
                buf.advance(max - length);
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|e| Error::InvalidEncoding(e.to_string()))
            }
            ValueType::Boolean => match buf.get_u8() {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(Error::InvalidEncoding(format!(
                    "boolean byte {}",
                    other
                ))),
            },
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Integer { signed: true } => write!(f, "integer"),
            ValueType::Integer { signed: false } => write!(f, "unsigned integer"),
            ValueType::String { max_length } => write!(f, "string({})", max_length),
            ValueType::Boolean => write!(f, "boolean"),
        }
    }
}

/// A single typed value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// 64-bit integer (raw bit pattern for unsigned columns)
    Integer(i64),
    /// UTF-8 text
    String(String),
    /// Boolean
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
        }
    }

    /// Orders two values of the same variant: integers numerically, strings
    /// bytewise, `false < true`.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        self.compare_as(other, false)
    }

    /// Like [`compare`](Self::compare), but integers are read as `u64` when
    /// `unsigned` is set.
    pub fn compare_as(&self, other: &Value, unsigned: bool) -> Result<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) if unsigned => {
                Ok((*a as u64).cmp(&(*b as u64)))
            }
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (a, b) => Err(Error::InvalidOperation(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Byte key whose unsigned lexicographic order matches ordering under `ty`.
    pub fn index_key(&self, ty: &ValueType) -> Vec<u8> {
        match self {
            Value::Integer(v) if ty.is_unsigned() => (*v as u64).to_be_bytes().to_vec(),
            Value::Integer(v) => ((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Boolean(b) => vec![u8::from(*b)],
        }
    }

    /// Writes the human-readable form used in query responses.
    pub fn write_text(&self, ty: &ValueType, out: &mut Vec<u8>) {
        // Writing into a Vec cannot fail.
        let _ = match (self, ty) {
            (Value::Integer(v), ValueType::Integer { signed: false }) => {
                write!(out, "{}", *v as u64)
            }
            (Value::Integer(v), _) => write!(out, "{}", v),
            (Value::String(s), _) => out.write_all(s.as_bytes()),
            (Value::Boolean(b), _) => write!(out, "{}", b),
        };
    }
}
