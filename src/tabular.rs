// CSV upload parsing and template rendering

use std::collections::{HashMap, HashSet};

use crate::schema::TableSchema;
use crate::value::Cell;

pub type InputRow = HashMap<String, Cell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Auto,
    Fixed(u8),
}

impl Delimiter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "comma" | "," => Some(Self::Fixed(b',')),
            "semicolon" | ";" => Some(Self::Fixed(b';')),
            "tab" | "\t" => Some(Self::Fixed(b'\t')),
            "pipe" | "|" => Some(Self::Fixed(b'|')),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<InputRow>,
}

impl Table {
    pub fn header_set(&self) -> HashSet<String> {
        self.headers.iter().cloned().collect()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("upload is empty")]
    Empty,
    #[error("upload is not valid UTF-8 text")]
    NotUtf8,
    #[error("duplicate column '{0}' in header")]
    DuplicateColumn(String),
    #[error("line {line}: expected {expected} fields, saw {found}")]
    TooManyFields {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("{0}")]
    Csv(String),
}

pub fn parse(bytes: &[u8], delimiter: Delimiter) -> Result<Table, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let delim = match delimiter {
        Delimiter::Auto => sniff_delimiter(text),
        Delimiter::Fixed(d) => d,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ParseError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    let mut seen = HashSet::new();
    for h in &headers {
        if !seen.insert(h.as_str()) {
            return Err(ParseError::DuplicateColumn(h.clone()));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Csv(e.to_string()))?;
        // A line with no delimiter and only whitespace is a blank line, not a record.
        if record.len() == 1 && headers.len() > 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() > headers.len() {
            return Err(ParseError::TooManyFields {
                line: record.position().map(|p| p.line()).unwrap_or(0),
                expected: headers.len(),
                found: record.len(),
            });
        }
        let mut row = InputRow::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            let cell = record.get(i).map(Cell::from_raw).unwrap_or(Cell::Missing);
            row.insert(h.clone(), cell);
        }
        rows.push(row);
    }

    Ok(Table { headers, rows })
}

/// Pick the delimiter that splits the header record into the most fields.
/// Header names are identifiers, so the header alone decides; ties keep the
/// earlier candidate and a header no candidate splits falls back to comma.
fn sniff_delimiter(content: &str) -> u8 {
    const CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];
    let header = content.lines().next().unwrap_or("");
    let field_count = |delim: u8| {
        csv::ReaderBuilder::new()
            .delimiter(delim)
            .has_headers(false)
            .from_reader(header.as_bytes())
            .records()
            .next()
            .and_then(|r| r.ok())
            .map_or(0, |r| r.len())
    };
    let mut best = (b',', 1);
    for delim in CANDIDATES {
        let n = field_count(delim);
        if n > best.1 {
            best = (delim, n);
        }
    }
    best.0
}

/// Header in column order followed by the schema's sample rows.
pub fn template_csv(schema: &TableSchema) -> Result<String, csv::Error> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(schema.column_names())?;
    for sample in &schema.sample {
        let fields = schema.column_names().map(|c| {
            sample
                .iter()
                .find(|(k, _)| k == c)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        });
        w.write_record(fields)?;
    }
    let bytes = w.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::course_registry;

    #[test]
    fn parses_header_and_cells() {
        let t = parse(b"module,tab_number,title\nWeek 1,tab1,Intro\n", Delimiter::Auto)
            .expect("parse");
        assert_eq!(t.headers, vec!["module", "tab_number", "title"]);
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.rows[0]["title"], Cell::Text("Intro".into()));
    }

    #[test]
    fn short_rows_pad_missing_and_blank_lines_skip() {
        let t = parse(b"a,b,c\n1\n\n   \n2,x,\n", Delimiter::Fixed(b',')).expect("parse");
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0]["a"], Cell::Number(1.0, "1".into()));
        assert_eq!(t.rows[0]["c"], Cell::Missing);
        assert_eq!(t.rows[1]["b"], Cell::Text("x".into()));
    }

    #[test]
    fn all_blank_records_stay_in_position() {
        let t = parse(b"a,b,c\n1,2,3\n,,\n4,5,6\n", Delimiter::Auto).expect("parse");
        assert_eq!(t.rows.len(), 3);
        assert!(t.rows[1].values().all(|c| *c == Cell::Missing));
        assert_eq!(t.rows[2]["a"], Cell::Number(4.0, "4".into()));
    }

    #[test]
    fn sniffing_reads_the_header_only() {
        let csv = "a|b|c\n\"x, y; z\"|2|3\n\"multi\nline\"|5|6\n";
        let t = parse(csv.as_bytes(), Delimiter::Auto).expect("parse");
        assert_eq!(t.headers, vec!["a", "b", "c"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1]["a"], Cell::Text("multi\nline".into()));
        assert_eq!(sniff_delimiter("title"), b',');
        assert_eq!(sniff_delimiter("module\ttab_number\ttitle"), b'\t');
    }

    #[test]
    fn sniffs_semicolons() {
        let t = parse(b"a;b\n1;2\n3;4\n", Delimiter::Auto).expect("parse");
        assert_eq!(t.headers, vec!["a", "b"]);
        assert_eq!(t.rows.len(), 2);
    }

    #[test]
    fn strips_bom_and_trims_headers() {
        let t = parse("\u{feff} a , b\n1,2\n".as_bytes(), Delimiter::Auto).expect("parse");
        assert_eq!(t.headers, vec!["a", "b"]);
    }

    #[test]
    fn malformed_uploads_are_parse_errors() {
        assert_eq!(parse(b"", Delimiter::Auto).unwrap_err(), ParseError::Empty);
        assert_eq!(
            parse(&[0xff, 0xfe, 0x00], Delimiter::Auto).unwrap_err(),
            ParseError::NotUtf8
        );
        assert_eq!(
            parse(b"a,a\n1,2\n", Delimiter::Auto).unwrap_err(),
            ParseError::DuplicateColumn("a".into())
        );
        assert!(matches!(
            parse(b"a,b\n1,2,3\n", Delimiter::Fixed(b',')),
            Err(ParseError::TooManyFields { expected: 2, found: 3, .. })
        ));
    }

    #[test]
    fn template_follows_column_order() {
        let reg = course_registry().expect("registry");
        let csv = template_csv(reg.get("course_tasks").expect("tasks")).expect("template");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("tab_id,task_type,question,options_json,correct_answer,assignment_details,solution,points,due_date")
        );
        let parsed = parse(csv.as_bytes(), Delimiter::Fixed(b',')).expect("reparse");
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0]["points"], Cell::Number(2.0, "2".into()));
        assert_eq!(parsed.rows[0]["options_json"].as_integer(), None);
    }
}
