use rusqlite::Connection;
use serde_json::Value;

use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::schema::TableSchema;
use crate::tabular::InputRow;
use crate::value::Cell;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_id(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an integer", key)))
}

pub fn get_table<'s>(state: &'s AppState, params: &Value) -> Result<&'s TableSchema, HandlerErr> {
    let name = get_required_str(params, "table")?;
    state.registry.get(&name).ok_or_else(|| {
        HandlerErr::new("unknown_table", format!("unknown table: {}", name))
            .with_details(serde_json::json!({ "table": name }))
    })
}

/// Form values keyed by column name. Keys outside the schema are ignored.
pub fn input_row_from_values(params: &Value) -> Result<InputRow, HandlerErr> {
    let obj = params
        .get("values")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "values must be an object"))?;
    Ok(obj
        .iter()
        .map(|(k, v)| (k.clone(), Cell::from_json(v)))
        .collect())
}

/// Upload bytes from either `csvText` or a file at `inPath`.
pub fn read_upload(params: &Value) -> Result<(Vec<u8>, Option<String>), HandlerErr> {
    if let Some(text) = params.get("csvText").and_then(|v| v.as_str()) {
        return Ok((text.as_bytes().to_vec(), None));
    }
    let in_path = get_required_str(params, "inPath")
        .map_err(|_| HandlerErr::new("bad_params", "missing inPath or csvText"))?;
    let bytes = std::fs::read(&in_path).map_err(|e| {
        HandlerErr::new("parse_failed", e.to_string())
            .with_details(serde_json::json!({ "path": in_path }))
    })?;
    Ok((bytes, Some(in_path)))
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}
