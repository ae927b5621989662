use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),
    #[error("table '{table}': duplicate column '{column}'")]
    DuplicateColumn { table: String, column: String },
    #[error("table '{0}' has no columns")]
    NoColumns(String),
    #[error("'{0}' is not a valid identifier")]
    BadIdentifier(String),
    #[error("table '{table}': primary key '{column}' must not be listed as a column")]
    KeyInColumns { table: String, column: String },
    #[error("table '{table}': {set} column '{column}' is not a declared column")]
    UnknownColumn {
        table: String,
        set: &'static str,
        column: String,
    },
}

/// Input hint for the add/edit forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Widget {
    TextInput,
    TextArea { height: u32 },
    NumberInput { min: i64 },
    DateInput,
    Select { options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub widget: Widget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub group_by: String,
    pub order_by: String,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
    pub required: Vec<String>,
    pub integer_columns: Vec<String>,
    pub outline: Outline,
    pub sample: Vec<Vec<(String, String)>>,
}

impl TableSchema {
    fn new(name: &str, primary_key: &str, outline: (&str, &str)) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            columns: Vec::new(),
            required: Vec::new(),
            integer_columns: Vec::new(),
            outline: Outline {
                group_by: outline.0.to_string(),
                order_by: outline.1.to_string(),
            },
            sample: Vec::new(),
        }
    }

    fn column(mut self, name: &str, widget: Widget) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            widget,
        });
        self
    }

    fn required(mut self, names: &[&str]) -> Self {
        self.required = names.iter().map(|s| s.to_string()).collect();
        self
    }

    fn integers(mut self, names: &[&str]) -> Self {
        self.integer_columns = names.iter().map(|s| s.to_string()).collect();
        self
    }

    fn sample_row(mut self, fields: &[(&str, &str)]) -> Self {
        self.sample.push(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|c| c == name)
    }

    pub fn is_integer(&self, name: &str) -> bool {
        self.integer_columns.iter().any(|c| c == name)
    }

    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "primaryKey": self.primary_key,
            "columns": self.columns,
            "required": self.required,
            "integerColumns": self.integer_columns,
            "outline": self.outline,
        })
    }

    fn validate(&self) -> Result<(), SchemaError> {
        check_ident(&self.name)?;
        check_ident(&self.primary_key)?;
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for c in &self.columns {
            check_ident(&c.name)?;
            if !seen.insert(c.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: c.name.clone(),
                });
            }
        }
        if seen.contains(self.primary_key.as_str()) {
            return Err(SchemaError::KeyInColumns {
                table: self.name.clone(),
                column: self.primary_key.clone(),
            });
        }

        let unknown = |set: &'static str, column: &str| SchemaError::UnknownColumn {
            table: self.name.clone(),
            set,
            column: column.to_string(),
        };
        for c in &self.required {
            if !seen.contains(c.as_str()) {
                return Err(unknown("required", c));
            }
        }
        for c in &self.integer_columns {
            if !seen.contains(c.as_str()) {
                return Err(unknown("integer", c));
            }
        }
        for c in [&self.outline.group_by, &self.outline.order_by] {
            if !seen.contains(c.as_str()) && *c != self.primary_key {
                return Err(unknown("outline", c));
            }
        }
        for row in &self.sample {
            for (c, _) in row {
                if !seen.contains(c.as_str()) {
                    return Err(unknown("sample", c));
                }
            }
        }
        Ok(())
    }
}

// Table names are unique within a registry.
impl PartialEq for TableSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TableSchema {}

fn check_ident(s: &str) -> Result<(), SchemaError> {
    let ok = !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SchemaError::BadIdentifier(s.to_string()))
    }
}

/// Validated, immutable set of target tables. Iteration follows registration order.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        for t in &tables {
            t.validate()?;
            if !names.insert(t.name.clone()) {
                return Err(SchemaError::DuplicateTable(t.name.clone()));
            }
        }
        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }
}

pub fn course_registry() -> Result<SchemaRegistry, SchemaError> {
    let area = |height| Widget::TextArea { height };
    let tabs = TableSchema::new("course_tabs", "tab_id", ("module", "tab_number"))
        .column("module", Widget::TextInput)
        .column("tab_number", Widget::TextInput)
        .column("title", Widget::TextInput)
        .column("subtitle", Widget::TextInput)
        .column("video_url", Widget::TextInput)
        .column("video_upload", Widget::TextInput)
        .column("main_content", area(120))
        .column("markdown_sections", area(90))
        .column("code_example", area(90))
        .column("external_links", area(90))
        .column("table_data", area(90))
        .column("reference_links", area(90))
        .column("custom_module", Widget::TextInput)
        .column("display_order", Widget::NumberInput { min: 1 })
        .column("extra_html", area(90))
        .column("prompt", area(90))
        .required(&["module", "tab_number", "title"])
        .integers(&["display_order"])
        .sample_row(&[
            ("module", "Week 1"),
            ("tab_number", "tab1"),
            ("title", "Introduction to Python"),
            ("video_url", "https://youtu.be/abc123"),
            ("main_content", "Markdown body here"),
            ("display_order", "1"),
        ]);

    let tasks = TableSchema::new("course_tasks", "task_id", ("tab_id", "task_id"))
        .column("tab_id", Widget::TextInput)
        .column(
            "task_type",
            Widget::Select {
                options: vec!["quiz".into(), "assignment".into()],
            },
        )
        .column("question", area(90))
        .column("options_json", area(90))
        .column("correct_answer", Widget::TextInput)
        .column("assignment_details", area(90))
        .column("solution", area(90))
        .column("points", Widget::NumberInput { min: 1 })
        .column("due_date", Widget::DateInput)
        .required(&["tab_id", "task_type", "question"])
        .integers(&["points"])
        .sample_row(&[
            ("tab_id", "1"),
            ("task_type", "quiz"),
            ("question", "Which command mounts Google Drive in Colab?"),
            (
                "options_json",
                r#"["A. !pip install drive", "B. from google.colab import drive\ndrive.mount('/content/drive')", "C. import os", "D. !gdown --id <id>"]"#,
            ),
            ("correct_answer", "B"),
            ("solution", "Use drive.mount to attach Drive."),
            ("points", "2"),
        ]);

    SchemaRegistry::new(vec![tabs, tasks])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_registry_is_valid_and_ordered() {
        let reg = course_registry().expect("registry");
        let names: Vec<_> = reg.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["course_tabs", "course_tasks"]);
        let tabs = reg.get("course_tabs").expect("tabs");
        assert_eq!(tabs.columns.len(), 16);
        assert!(tabs.is_integer("display_order"));
        assert!(!tabs.has_column("tab_id"));
    }

    #[test]
    fn required_outside_columns_is_rejected() {
        let t = TableSchema::new("t", "id", ("a", "id"))
            .column("a", Widget::TextInput)
            .required(&["b"]);
        assert_eq!(
            SchemaRegistry::new(vec![t]).unwrap_err(),
            SchemaError::UnknownColumn {
                table: "t".into(),
                set: "required",
                column: "b".into()
            }
        );
    }

    #[test]
    fn primary_key_listed_as_column_is_rejected() {
        let t = TableSchema::new("t", "id", ("a", "id"))
            .column("id", Widget::TextInput)
            .column("a", Widget::TextInput);
        assert!(matches!(
            SchemaRegistry::new(vec![t]),
            Err(SchemaError::KeyInColumns { .. })
        ));
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        let t = TableSchema::new("t", "id", ("a", "id")).column("a; DROP", Widget::TextInput);
        assert!(matches!(
            SchemaRegistry::new(vec![t]),
            Err(SchemaError::BadIdentifier(_))
        ));
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let mk = || TableSchema::new("t", "id", ("a", "id")).column("a", Widget::TextInput);
        assert_eq!(
            SchemaRegistry::new(vec![mk(), mk()]).unwrap_err(),
            SchemaError::DuplicateTable("t".into())
        );
    }
}
