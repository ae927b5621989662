use crate::ipc::helpers::{
    get_required_id, get_table, input_row_from_values, require_db, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::normalize_row;
use crate::schema::TableSchema;
use crate::store::{Record, RowStore, SqliteStore, StoreError};
use crate::value::FieldValue;
use serde_json::{json, Value};
use std::cmp::Ordering;
use tracing::info;

fn store_err(code: &'static str, e: StoreError) -> HandlerErr {
    match e {
        StoreError::NotFound { table, key } => HandlerErr::new(
            "not_found",
            format!("no {} row with key {}", table, key),
        )
        .with_details(json!({ "table": table, "id": key })),
        StoreError::Sqlite(e) => HandlerErr::new(code, e.to_string()),
    }
}

/// Null sorts first, then numbers, then text.
fn cmp_field(a: &FieldValue, b: &FieldValue) -> Ordering {
    fn rank(v: &FieldValue) -> u8 {
        match v {
            FieldValue::Null => 0,
            FieldValue::Integer(_) | FieldValue::Real(_) => 1,
            FieldValue::Text(_) => 2,
        }
    }
    fn num(v: &FieldValue) -> f64 {
        match v {
            FieldValue::Integer(i) => *i as f64,
            FieldValue::Real(f) => *f,
            _ => 0.0,
        }
    }
    match (a, b) {
        (FieldValue::Text(x), FieldValue::Text(y)) => x.cmp(y),
        _ if rank(a) == 1 && rank(b) == 1 => num(a).partial_cmp(&num(b)).unwrap_or(Ordering::Equal),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn outline_value(rec: &Record, schema: &TableSchema, column: &str) -> FieldValue {
    if column == schema.primary_key {
        return FieldValue::Integer(rec.key);
    }
    rec.get(schema, column).cloned().unwrap_or(FieldValue::Null)
}

/// Picker label such as `Course_tab 3 (Tab tab1)`.
fn outline_label(rec: &Record, schema: &TableSchema) -> String {
    let singular = schema.name.strip_suffix('s').unwrap_or(schema.name.as_str());
    let mut chars = singular.chars();
    let noun = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    let tab = match rec.get(schema, "tab_number") {
        Some(FieldValue::Null) | None => "-".to_string(),
        Some(FieldValue::Text(s)) => s.clone(),
        Some(v) => v.to_json().to_string(),
    };
    format!("{} {} (Tab {})", noun, rec.key, tab)
}

fn rows_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let records = SqliteStore::new(conn)
        .fetch_all(schema)
        .map_err(|e| store_err("db_query_failed", e))?;
    let rows = records.iter().map(|r| r.to_json(schema)).collect::<Vec<_>>();
    Ok(json!({
        "table": schema.name,
        "primaryKey": schema.primary_key,
        "count": rows.len(),
        "rows": rows
    }))
}

fn rows_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let id = get_required_id(params, "id")?;
    let record = SqliteStore::new(conn)
        .fetch_one(schema, id)
        .map_err(|e| store_err("db_query_failed", e))?
        .ok_or_else(|| {
            HandlerErr::new("not_found", format!("no {} row with key {}", schema.name, id))
        })?;
    let row = record.to_json(schema);
    let pretty = serde_json::to_string_pretty(&row)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "row": row, "pretty": pretty }))
}

fn rows_outline(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let mut records = SqliteStore::new(conn)
        .fetch_all(schema)
        .map_err(|e| store_err("db_query_failed", e))?;
    let group_by = schema.outline.group_by.as_str();
    let order_by = schema.outline.order_by.as_str();
    records.sort_by(|a, b| {
        cmp_field(
            &outline_value(a, schema, group_by),
            &outline_value(b, schema, group_by),
        )
        .then_with(|| {
            cmp_field(
                &outline_value(a, schema, order_by),
                &outline_value(b, schema, order_by),
            )
        })
        .then(a.key.cmp(&b.key))
    });

    let mut groups: Vec<(FieldValue, Vec<Value>)> = Vec::new();
    for rec in &records {
        let g = outline_value(rec, schema, group_by);
        let order = outline_value(rec, schema, order_by);
        let entry = json!({
            "id": rec.key,
            "order": order.to_json(),
            "label": outline_label(rec, schema),
        });
        match groups.last_mut() {
            Some((key, rows)) if *key == g => {
                rows.push(entry);
                continue;
            }
            _ => {}
        }
        groups.push((g, vec![entry]));
    }
    let groups = groups
        .into_iter()
        .map(|(key, rows)| json!({ "key": key.to_json(), "rows": rows }))
        .collect::<Vec<_>>();
    Ok(json!({
        "table": schema.name,
        "groupBy": group_by,
        "orderBy": order_by,
        "groups": groups
    }))
}

fn rows_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let input = input_row_from_values(params)?;
    let normalized = normalize_row(0, &input, schema).map_err(|r| {
        HandlerErr::new("bad_params", format!("required fields: {}", r.columns.join(", ")))
            .with_details(json!({ "missing": r.columns }))
    })?;
    let id = SqliteStore::new(conn)
        .insert(schema, &normalized.values)
        .map_err(|e| store_err("db_insert_failed", e))?;
    info!(table = %schema.name, id, "row created");
    Ok(json!({ "id": id }))
}

fn rows_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let id = get_required_id(params, "id")?;
    let input = input_row_from_values(params)?;
    let normalized = normalize_row(0, &input, schema).map_err(|r| {
        HandlerErr::new("bad_params", format!("required fields: {}", r.columns.join(", ")))
            .with_details(json!({ "missing": r.columns }))
    })?;
    SqliteStore::new(conn)
        .update(schema, id, &normalized.values)
        .map_err(|e| store_err("db_update_failed", e))?;
    info!(table = %schema.name, id, "row updated");
    Ok(json!({ "ok": true }))
}

fn rows_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let schema = get_table(state, params)?;
    let id = get_required_id(params, "id")?;
    SqliteStore::new(conn)
        .delete(schema, id)
        .map_err(|e| store_err("db_delete_failed", e))?;
    info!(table = %schema.name, id, "row deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "rows.list" => rows_list(state, &req.params),
        "rows.get" => rows_get(state, &req.params),
        "rows.outline" => rows_outline(state, &req.params),
        "rows.create" => rows_create(state, &req.params),
        "rows.update" => rows_update(state, &req.params),
        "rows.delete" => rows_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_ordering_puts_null_first_and_numbers_numerically() {
        let mut v = vec![
            FieldValue::Text("tab2".into()),
            FieldValue::Integer(10),
            FieldValue::Null,
            FieldValue::Integer(2),
            FieldValue::Text("tab10".into()),
        ];
        v.sort_by(cmp_field);
        assert_eq!(
            v,
            vec![
                FieldValue::Null,
                FieldValue::Integer(2),
                FieldValue::Integer(10),
                FieldValue::Text("tab10".into()),
                FieldValue::Text("tab2".into()),
            ]
        );
    }

    #[test]
    fn outline_labels_name_the_row_and_its_tab() {
        let reg = crate::schema::course_registry().expect("registry");
        let tabs = reg.get("course_tabs").expect("tabs");
        let mut values = vec![FieldValue::Null; tabs.columns.len()];
        values[1] = FieldValue::Text("tab1".into());
        let rec = Record { key: 3, values };
        assert_eq!(outline_label(&rec, tabs), "Course_tab 3 (Tab tab1)");

        let tasks = reg.get("course_tasks").expect("tasks");
        let rec = Record {
            key: 8,
            values: vec![FieldValue::Null; tasks.columns.len()],
        };
        assert_eq!(outline_label(&rec, tasks), "Course_task 8 (Tab -)");
    }
}
