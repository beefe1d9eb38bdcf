use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Longest string a result cell keeps before it is cut at a word boundary
pub const MAX_RESULT_STRING_LENGTH: usize = 300;

/// Longest string a sample-row cell keeps in table info
pub const MAX_SAMPLE_STRING_LENGTH: usize = 100;

/// SQL dialects the query backend can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Dialect name as shown to the model
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgresql",
        }
    }
}

/// Column definition used to describe a table to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDetail {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_primary_key: bool,
}

/// A single decoded value from a result row
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    /// Python-literal rendering, the convention result text follows
    /// (`None`, `True`, `'text'`, `Decimal('1.50')`)
    pub fn to_literal(&self) -> String {
        match self {
            CellValue::Null => "None".to_string(),
            CellValue::Bool(true) => "True".to_string(),
            CellValue::Bool(false) => "False".to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => format_float(*v),
            CellValue::Decimal(v) => format!("Decimal('{}')", v),
            CellValue::Text(s) => quote_str(&truncate_word(s, MAX_RESULT_STRING_LENGTH)),
            CellValue::Bytes(b) => quote_bytes(b),
        }
    }

    /// Plain rendering used in sample rows
    pub fn to_plain(&self) -> String {
        match self {
            CellValue::Null => "None".to_string(),
            CellValue::Bool(true) => "True".to_string(),
            CellValue::Bool(false) => "False".to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => format_float(*v),
            CellValue::Decimal(v) => v.to_string(),
            CellValue::Text(s) => truncate_word(s, MAX_SAMPLE_STRING_LENGTH),
            CellValue::Bytes(b) => quote_bytes(b),
        }
    }
}

/// Schema metadata handed to the drafter; fetched once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub dialect: String,
    pub table_names: Vec<String>,
    pub table_info: String,
}

/// Render rows as a list of tuples: `[(8,)]`, `[(1, 'a'), (2, 'b')]`.
/// No rows renders as an empty string.
pub fn format_rows(rows: &[Vec<CellValue>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(CellValue::to_literal).collect();
            if cells.len() == 1 {
                format!("({},)", cells[0])
            } else {
                format!("({})", cells.join(", "))
            }
        })
        .collect();

    format!("[{}]", tuples.join(", "))
}

/// Cut `content` to at most `length` characters, ending on a word boundary
/// and marked with `...`.
pub fn truncate_word(content: &str, length: usize) -> String {
    const SUFFIX: &str = "...";

    if content.chars().count() <= length {
        return content.to_string();
    }

    let keep: String = content.chars().take(length.saturating_sub(SUFFIX.len())).collect();
    let cut = match keep.rfind(' ') {
        Some(idx) if idx > 0 => &keep[..idx],
        _ => keep.as_str(),
    };

    format!("{}{}", cut, SUFFIX)
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        // Debug keeps the trailing `.0` on whole numbers
        format!("{:?}", v)
    }
}

fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}
