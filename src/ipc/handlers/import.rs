use crate::ipc::handlers::setup::{load_import_settings, ImportSettings};
use crate::ipc::helpers::{
    get_optional_str, get_table, read_upload, require_db, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, ImportError, ImportMode, ImportOptions};
use crate::store::SqliteStore;
use crate::tabular::{self, Delimiter};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, info_span};
use uuid::Uuid;

fn import_err(e: ImportError) -> HandlerErr {
    match e {
        ImportError::Parse(p) => HandlerErr::new("parse_failed", p.to_string()),
        ImportError::Resolution(r) => {
            HandlerErr::new("resolution_failed", r.to_string()).with_details(r.details())
        }
        ImportError::UnknownTable(t) => HandlerErr::new("unknown_table", format!("unknown table: {}", t))
            .with_details(json!({ "table": t })),
    }
}

fn import_options(params: &Value, settings: &ImportSettings) -> Result<ImportOptions, HandlerErr> {
    let delimiter = match get_optional_str(params, "delimiter") {
        Some(s) => Delimiter::parse(&s).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                "delimiter must be one of: auto, comma, semicolon, tab, pipe",
            )
        })?,
        None => settings.delimiter,
    };
    Ok(ImportOptions {
        delimiter,
        warn_on_mismatch: settings.warn_on_mismatch,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn import_template(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let schema = get_table(state, params)?;
    let csv = tabular::template_csv(schema)
        .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    Ok(json!({
        "table": schema.name,
        "fileName": format!("{}_sample.csv", schema.name),
        "csv": csv
    }))
}

fn import_preview(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = load_import_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let options = import_options(params, &settings)?;
    let explicit = get_optional_str(params, "table");
    let (bytes, path) = read_upload(params)?;

    let preview = reconcile::preview_csv_bytes(&state.registry, &bytes, explicit.as_deref(), options)
        .map_err(import_err)?;
    let mut result =
        serde_json::to_value(&preview).map_err(|e| HandlerErr::new("parse_failed", e.to_string()))?;
    result["path"] = json!(path);
    result["sourceSha256"] = json!(sha256_hex(&bytes));
    Ok(result)
}

fn import_apply(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let settings = load_import_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let options = import_options(params, &settings)?;
    let mode = match get_optional_str(params, "mode") {
        Some(s) => ImportMode::parse(&s).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                "mode must be one of: insert_only, update_if_key_present",
            )
        })?,
        None => settings.default_mode,
    };
    let explicit = get_optional_str(params, "table");
    let (bytes, path) = read_upload(params)?;

    let batch_id = Uuid::new_v4().to_string();
    let source_sha256 = sha256_hex(&bytes);
    let span = info_span!("batch", id = %batch_id);
    let _guard = span.enter();
    info!(sha256 = %source_sha256, "import requested");
    let store = SqliteStore::new(conn);
    let outcome = reconcile::import_csv_bytes(
        &store,
        &state.registry,
        &bytes,
        mode,
        explicit.as_deref(),
        options,
    )
    .map_err(import_err)?;

    let mut result =
        serde_json::to_value(&outcome).map_err(|e| HandlerErr::new("parse_failed", e.to_string()))?;
    result["mode"] = json!(mode.as_str());
    result["rowsTotal"] = json!(outcome.total());
    result["batchId"] = json!(batch_id);
    result["importedAt"] = json!(chrono::Utc::now().to_rfc3339());
    result["sourceSha256"] = json!(source_sha256);
    result["path"] = json!(path);
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "import.template" => import_template(state, &req.params),
        "import.preview" => import_preview(state, &req.params),
        "import.apply" => import_apply(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
