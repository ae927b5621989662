use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::schema::TableSchema;
use crate::value::FieldValue;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {table} row with key {key}")]
    NotFound { table: String, key: i64 },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: i64,
    /// One value per schema column, in schema order.
    pub values: Vec<FieldValue>,
}

impl Record {
    pub fn to_json(&self, schema: &TableSchema) -> Value {
        let mut obj = Map::new();
        obj.insert(schema.primary_key.clone(), Value::from(self.key));
        for (name, v) in schema.column_names().zip(self.values.iter()) {
            obj.insert(name.to_string(), v.to_json());
        }
        Value::Object(obj)
    }

    pub fn get(&self, schema: &TableSchema, column: &str) -> Option<&FieldValue> {
        schema
            .column_names()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Write/read contract the reconciler and row handlers depend on.
pub trait RowStore {
    fn insert(&self, schema: &TableSchema, values: &[FieldValue]) -> Result<i64, StoreError>;
    fn update(&self, schema: &TableSchema, key: i64, values: &[FieldValue])
        -> Result<(), StoreError>;
    fn fetch_all(&self, schema: &TableSchema) -> Result<Vec<Record>, StoreError>;
    fn fetch_one(&self, schema: &TableSchema, key: i64) -> Result<Option<Record>, StoreError>;
    fn delete(&self, schema: &TableSchema, key: i64) -> Result<(), StoreError>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn select_sql(schema: &TableSchema) -> String {
    format!(
        "SELECT {}, {} FROM {}",
        schema.primary_key,
        schema.column_names().collect::<Vec<_>>().join(", "),
        schema.name
    )
}

fn read_record(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Record> {
    let key: i64 = row.get(0)?;
    let mut values = Vec::with_capacity(width);
    for i in 0..width {
        values.push(FieldValue::from_sql(row.get_ref(i + 1)?));
    }
    Ok(Record { key, values })
}

impl RowStore for SqliteStore<'_> {
    fn insert(&self, schema: &TableSchema, values: &[FieldValue]) -> Result<i64, StoreError> {
        let cols = schema.column_names().collect::<Vec<_>>();
        let ph = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.name,
            cols.join(", "),
            ph
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(
        &self,
        schema: &TableSchema,
        key: i64,
        values: &[FieldValue],
    ) -> Result<(), StoreError> {
        let assignments = schema
            .column_names()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            schema.name, assignments, schema.primary_key
        );
        let mut bound: Vec<FieldValue> = values.to_vec();
        bound.push(FieldValue::Integer(key));
        let changed = self.conn.execute(&sql, params_from_iter(bound.iter()))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: schema.name.clone(),
                key,
            });
        }
        Ok(())
    }

    fn fetch_all(&self, schema: &TableSchema) -> Result<Vec<Record>, StoreError> {
        let sql = format!("{} ORDER BY {}", select_sql(schema), schema.primary_key);
        let width = schema.columns.len();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| read_record(r, width))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_one(&self, schema: &TableSchema, key: i64) -> Result<Option<Record>, StoreError> {
        let sql = format!("{} WHERE {} = ?", select_sql(schema), schema.primary_key);
        let width = schema.columns.len();
        let rec = self
            .conn
            .query_row(&sql, [key], |r| read_record(r, width))
            .optional()?;
        Ok(rec)
    }

    fn delete(&self, schema: &TableSchema, key: i64) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            schema.name, schema.primary_key
        );
        let changed = self.conn.execute(&sql, [key])?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                table: schema.name.clone(),
                key,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::schema::course_registry;

    fn tab_values(title: &str) -> Vec<FieldValue> {
        let mut v = vec![FieldValue::Null; 16];
        v[0] = FieldValue::Text("Week 1".into());
        v[1] = FieldValue::Text("tab1".into());
        v[2] = FieldValue::Text(title.into());
        v[13] = FieldValue::Integer(1);
        v
    }

    #[test]
    fn insert_update_fetch_delete() {
        let conn = db::open_in_memory().expect("db");
        let reg = course_registry().expect("registry");
        let tabs = reg.get("course_tabs").expect("tabs");
        let store = SqliteStore::new(&conn);

        let id = store.insert(tabs, &tab_values("Intro")).expect("insert");
        store.update(tabs, id, &tab_values("Renamed")).expect("update");
        let rec = store.fetch_one(tabs, id).expect("fetch").expect("row");
        assert_eq!(rec.get(tabs, "title"), Some(&FieldValue::Text("Renamed".into())));
        assert_eq!(rec.to_json(tabs)["tab_id"], Value::from(id));

        store.delete(tabs, id).expect("delete");
        assert!(store.fetch_all(tabs).expect("list").is_empty());
    }

    #[test]
    fn missing_keys_report_not_found() {
        let conn = db::open_in_memory().expect("db");
        let reg = course_registry().expect("registry");
        let tabs = reg.get("course_tabs").expect("tabs");
        let store = SqliteStore::new(&conn);
        assert!(matches!(
            store.update(tabs, 7, &tab_values("x")),
            Err(StoreError::NotFound { key: 7, .. })
        ));
        assert!(matches!(
            store.delete(tabs, 7),
            Err(StoreError::NotFound { .. })
        ));
    }
}
