use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_tables_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let tables = state
        .registry
        .iter()
        .map(|t| t.descriptor())
        .collect::<Vec<_>>();
    ok(&req.id, json!({ "tables": tables }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tables.list" => Some(handle_tables_list(state, req)),
        _ => None,
    }
}
