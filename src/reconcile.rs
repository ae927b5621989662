//! Bulk import reconciliation.
//!
//! Picks the target table for an upload from its header, normalizes each row
//! against the table's declared columns, and writes rows one at a time through
//! a [`RowStore`]. A batch that starts always runs to completion: row-level
//! failures are counted and reported, earlier writes are never rolled back.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, info_span, warn};

use crate::schema::{SchemaRegistry, TableSchema};
use crate::store::{RowStore, StoreError};
use crate::tabular::{self, Delimiter, InputRow, ParseError};
use crate::value::{Cell, FieldValue};

/// Value written for integer columns with no usable number.
pub const INTEGER_DEFAULT: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    InsertOnly,
    UpdateIfKeyPresent,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert_only" => Some(Self::InsertOnly),
            "update_if_key_present" => Some(Self::UpdateIfKeyPresent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertOnly => "insert_only",
            Self::UpdateIfKeyPresent => "update_if_key_present",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingColumns {
    pub table: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResolution<'r> {
    Unique(&'r TableSchema),
    Ambiguous(Vec<&'r TableSchema>),
    NoMatch(Vec<MissingColumns>),
}

pub fn resolve_target<'r>(header: &HashSet<String>, registry: &'r SchemaRegistry) -> TargetResolution<'r> {
    let mut matched = Vec::new();
    let mut missing_by_schema = Vec::new();
    for schema in registry.iter() {
        let missing = schema
            .required
            .iter()
            .filter(|c| !header.contains(c.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            matched.push(schema);
        } else {
            missing_by_schema.push(MissingColumns {
                table: schema.name.clone(),
                missing,
            });
        }
    }
    match matched.len() {
        0 => TargetResolution::NoMatch(missing_by_schema),
        1 => TargetResolution::Unique(matched[0]),
        _ => TargetResolution::Ambiguous(matched),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// One value per schema column, in schema order.
    pub values: Vec<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {row}: missing required field(s) {}", .columns.join(", "))]
pub struct RowRejected {
    pub row: usize,
    pub columns: Vec<String>,
}

pub fn normalize_row(
    index: usize,
    row: &InputRow,
    schema: &TableSchema,
) -> Result<NormalizedRow, RowRejected> {
    let mut values = Vec::with_capacity(schema.columns.len());
    let mut blank_required = Vec::new();
    for name in schema.column_names() {
        let cell = row.get(name).unwrap_or(&Cell::Missing);
        let value = if schema.is_integer(name) {
            FieldValue::Integer(cell.as_integer().unwrap_or(INTEGER_DEFAULT))
        } else {
            FieldValue::from_cell(cell)
        };
        if value.is_null() && schema.is_required(name) {
            blank_required.push(name.to_string());
        }
        values.push(value);
    }
    if !blank_required.is_empty() {
        return Err(RowRejected {
            row: index,
            columns: blank_required,
        });
    }
    Ok(NormalizedRow { values })
}

/// Primary key carried by an input row, if it parses as an integer.
pub fn row_key(row: &InputRow, schema: &TableSchema) -> Option<i64> {
    row.get(&schema.primary_key).and_then(Cell::as_integer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted(i64),
    Updated(i64),
}

pub fn apply(
    store: &dyn RowStore,
    row: &NormalizedRow,
    schema: &TableSchema,
    mode: ImportMode,
    key: Option<i64>,
) -> Result<Applied, StoreError> {
    match (mode, key) {
        (ImportMode::UpdateIfKeyPresent, Some(k)) if k != 0 => {
            store.update(schema, k, &row.values)?;
            Ok(Applied::Updated(k))
        }
        _ => store.insert(schema, &row.values).map(Applied::Inserted),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    MissingRequired,
    NotFound,
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDiagnostic {
    pub row: usize,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub diagnostics: Vec<RowDiagnostic>,
    pub warnings: Vec<String>,
}

impl ImportOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

pub fn import_batch(
    store: &dyn RowStore,
    rows: &[InputRow],
    schema: &TableSchema,
    mode: ImportMode,
) -> ImportOutcome {
    let mut out = ImportOutcome {
        table: schema.name.clone(),
        ..Default::default()
    };
    for (idx, row) in rows.iter().enumerate() {
        let normalized = match normalize_row(idx, row, schema) {
            Ok(n) => n,
            Err(rejected) => {
                warn!(row = idx, columns = ?rejected.columns, "row skipped: missing required field");
                out.skipped += 1;
                out.diagnostics.push(RowDiagnostic {
                    row: idx,
                    code: DiagnosticCode::MissingRequired,
                    message: rejected.to_string(),
                    columns: rejected.columns,
                });
                continue;
            }
        };
        match apply(store, &normalized, schema, mode, row_key(row, schema)) {
            Ok(Applied::Inserted(_)) => out.inserted += 1,
            Ok(Applied::Updated(_)) => out.updated += 1,
            Err(e) => {
                warn!(row = idx, error = %e, "row skipped: store rejected write");
                let code = match e {
                    StoreError::NotFound { .. } => DiagnosticCode::NotFound,
                    StoreError::Sqlite(_) => DiagnosticCode::StoreFailed,
                };
                out.skipped += 1;
                out.diagnostics.push(RowDiagnostic {
                    row: idx,
                    code,
                    message: format!("row {idx}: {e}"),
                    columns: Vec::new(),
                });
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("header matches no table")]
    NoMatch { missing: Vec<MissingColumns> },
    #[error("header matches more than one table: {}", .candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },
    #[error("missing required columns for {table}: {}", .missing.join(", "))]
    MissingRequired { table: String, missing: Vec<String> },
}

impl ResolutionError {
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::NoMatch { missing } => serde_json::json!({ "kind": "no_match", "missing": missing }),
            Self::Ambiguous { candidates } => {
                serde_json::json!({ "kind": "ambiguous", "tables": candidates })
            }
            Self::MissingRequired { table, missing } => serde_json::json!({
                "kind": "missing_required",
                "table": table,
                "missing": missing
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("could not parse upload: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("unknown table: {0}")]
    UnknownTable(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub delimiter: Delimiter,
    pub warn_on_mismatch: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::Auto,
            warn_on_mismatch: true,
        }
    }
}

/// Target table chosen for a parsed upload, plus any resolution warnings.
fn choose_target<'r>(
    header: &HashSet<String>,
    registry: &'r SchemaRegistry,
    explicit: Option<&str>,
    warn_on_mismatch: bool,
) -> Result<(&'r TableSchema, Vec<String>), ImportError> {
    let resolution = resolve_target(header, registry);
    let Some(name) = explicit else {
        return match resolution {
            TargetResolution::Unique(s) => Ok((s, Vec::new())),
            TargetResolution::Ambiguous(list) => Err(ResolutionError::Ambiguous {
                candidates: list.iter().map(|s| s.name.clone()).collect(),
            }
            .into()),
            TargetResolution::NoMatch(missing) => Err(ResolutionError::NoMatch { missing }.into()),
        };
    };

    let schema = registry
        .get(name)
        .ok_or_else(|| ImportError::UnknownTable(name.to_string()))?;
    let missing = schema
        .required
        .iter()
        .filter(|c| !header.contains(c.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ResolutionError::MissingRequired {
            table: schema.name.clone(),
            missing,
        }
        .into());
    }

    let mut warnings = Vec::new();
    if warn_on_mismatch {
        match resolution {
            TargetResolution::Unique(s) if s.name != schema.name => warnings.push(format!(
                "header looks like {} but {} was selected",
                s.name, schema.name
            )),
            TargetResolution::Ambiguous(list) => {
                let others = list
                    .iter()
                    .filter(|s| s.name != schema.name)
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>();
                warnings.push(format!(
                    "header also matches {}; keeping {}",
                    others.join(", "),
                    schema.name
                ));
            }
            _ => {}
        }
    }
    Ok((schema, warnings))
}

pub fn import_csv_bytes(
    store: &dyn RowStore,
    registry: &SchemaRegistry,
    bytes: &[u8],
    mode: ImportMode,
    explicit: Option<&str>,
    options: ImportOptions,
) -> Result<ImportOutcome, ImportError> {
    let table = tabular::parse(bytes, options.delimiter)?;
    let (schema, warnings) = choose_target(
        &table.header_set(),
        registry,
        explicit,
        options.warn_on_mismatch,
    )?;

    let span = info_span!("import", table = %schema.name, mode = mode.as_str());
    let _guard = span.enter();
    for w in &warnings {
        warn!("{w}");
    }
    let mut outcome = import_batch(store, &table.rows, schema, mode);
    outcome.warnings = warnings;
    info!(
        inserted = outcome.inserted,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "import finished"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub table: String,
    pub headers: Vec<String>,
    pub unknown_columns: Vec<String>,
    pub rows_total: usize,
    pub rows_valid: usize,
    pub rows_with_key: usize,
    pub rejected: Vec<RowDiagnostic>,
    pub warnings: Vec<String>,
}

/// Dry run of [`import_csv_bytes`]: same parse and resolution, no writes.
pub fn preview_csv_bytes(
    registry: &SchemaRegistry,
    bytes: &[u8],
    explicit: Option<&str>,
    options: ImportOptions,
) -> Result<ImportPreview, ImportError> {
    let table = tabular::parse(bytes, options.delimiter)?;
    let (schema, warnings) = choose_target(
        &table.header_set(),
        registry,
        explicit,
        options.warn_on_mismatch,
    )?;

    let mut rejected = Vec::new();
    let mut rows_with_key = 0;
    for (idx, row) in table.rows.iter().enumerate() {
        match normalize_row(idx, row, schema) {
            Ok(_) => {
                if row_key(row, schema).is_some_and(|k| k != 0) {
                    rows_with_key += 1;
                }
            }
            Err(r) => rejected.push(RowDiagnostic {
                row: idx,
                code: DiagnosticCode::MissingRequired,
                message: r.to_string(),
                columns: r.columns,
            }),
        }
    }
    let unknown_columns = table
        .headers
        .iter()
        .filter(|h| !schema.has_column(h) && **h != schema.primary_key)
        .cloned()
        .collect();

    Ok(ImportPreview {
        table: schema.name.clone(),
        rows_total: table.rows.len(),
        rows_valid: table.rows.len() - rejected.len(),
        headers: table.headers,
        unknown_columns,
        rows_with_key,
        rejected,
        warnings,
    })
}
