use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde_json::Value;

/// One input cell, classified once when the upload (or form) is read.
/// Both non-blank variants keep the text exactly as it arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Text(String),
    Number(f64, String),
}

fn truncate(n: f64) -> Option<i64> {
    let t = n.trunc();
    if t.is_finite() && t >= i64::MIN as f64 && t <= i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}

impl Cell {
    pub fn from_raw(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() {
            return Cell::Missing;
        }
        match t.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n, raw.to_string()),
            _ => Cell::Text(raw.to_string()),
        }
    }

    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => Cell::Missing,
            Value::Bool(b) => {
                let n = if *b { 1.0 } else { 0.0 };
                Cell::Number(n, (n as i64).to_string())
            }
            Value::Number(n) => n
                .as_f64()
                .map(|f| Cell::Number(f, n.to_string()))
                .unwrap_or(Cell::Missing),
            Value::String(s) => {
                if s.trim().is_empty() {
                    Cell::Missing
                } else {
                    // Form text stays text; only CSV cells are number-sniffed.
                    Cell::Text(s.clone())
                }
            }
            other => Cell::Text(other.to_string()),
        }
    }

    /// Integer reading used for integer columns and primary keys.
    /// Numeric text and numbers both truncate toward zero.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Cell::Missing => None,
            Cell::Number(n, _) => truncate(*n),
            Cell::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .and_then(truncate),
        }
    }
}

/// Value bound to one column position in a write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Binding for a column without integer coercion: the cell's original text.
    pub fn from_cell(cell: &Cell) -> Self {
        match cell {
            Cell::Missing => FieldValue::Null,
            Cell::Text(raw) | Cell::Number(_, raw) => FieldValue::Text(raw.clone()),
        }
    }

    pub fn from_sql(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Integer(i),
            ValueRef::Real(f) => FieldValue::Real(f),
            ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => FieldValue::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Real(f) => Value::from(*f),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(SqlValue::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            FieldValue::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}
