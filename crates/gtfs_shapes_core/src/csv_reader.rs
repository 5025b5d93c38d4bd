use std::fmt;

use csv::{ReaderBuilder, StringRecord, Trim};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq)]
pub struct CsvParseError {
    pub file: String,
    pub line_index: Option<u64>,
    pub message: String,
    pub parsed_content: Option<String>,
}

impl fmt::Display for CsvParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_index {
            Some(line) => write!(f, "{}:{}: {}", self.file, line, self.message),
            None => write!(f, "{}: {}", self.file, self.message),
        }
    }
}

impl std::error::Error for CsvParseError {}

#[derive(Debug, Clone)]
pub struct CsvTable<T> {
    pub headers: Vec<String>,
    pub rows: Vec<T>,
    pub row_numbers: Vec<u64>,
}

impl<T> Default for CsvTable<T> {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            row_numbers: Vec::new(),
        }
    }
}

impl<T> CsvTable<T> {
    pub fn row_number(&self, index: usize) -> u64 {
        self.row_numbers
            .get(index)
            .copied()
            .unwrap_or(index as u64 + 2)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|header| header == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Non-standard columns of a table, keyed by field name and then by the
/// record id found in the table's key column.
#[derive(Debug, Clone, Default)]
pub struct ExtraFields {
    by_field: FxHashMap<String, FxHashMap<String, String>>,
}

impl ExtraFields {
    pub fn has_field(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    pub fn get(&self, field: &str, id: &str) -> Option<&str> {
        self.by_field
            .get(field)
            .and_then(|values| values.get(id))
            .map(String::as_str)
    }

    /// All `(id, value)` pairs recorded for `field`.
    pub fn entries<'a>(&'a self, field: &str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.by_field
            .get(field)
            .into_iter()
            .flat_map(|values| values.iter())
            .map(|(id, value)| (id.as_str(), value.as_str()))
    }

    pub fn insert(
        &mut self,
        field: impl Into<String>,
        id: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.by_field
            .entry(field.into())
            .or_default()
            .insert(id.into(), value.into());
    }
}

pub fn read_csv_table<T: DeserializeOwned>(
    file_name: &str,
    data: &[u8],
) -> Result<CsvTable<T>, CsvParseError> {
    let data = strip_utf8_bom(data);
    let mut lines = LineCounter::new(data);
    let mut reader = csv_reader(data);
    let headers = normalized_headers(file_name, &mut reader, &mut lines)?;
    let header_record = StringRecord::from(headers.clone());

    let mut table = CsvTable {
        headers,
        rows: Vec::new(),
        row_numbers: Vec::new(),
    };
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => return Err(parse_error(file_name, &err, None, &mut lines)),
        }
        if record.iter().all(|value| value.is_empty()) {
            continue;
        }
        let row: T = record
            .deserialize(Some(&header_record))
            .map_err(|err| parse_error(file_name, &err, Some(&record), &mut lines))?;
        let line = record
            .position()
            .map(|pos| lines.line_at(pos.byte()))
            .unwrap_or_default();
        table.rows.push(row);
        table.row_numbers.push(line);
    }

    Ok(table)
}

/// Collects `fields` out of a table, keyed by the value in `key_field`.
/// Requested fields absent from the header are simply not recorded.
pub fn read_extra_fields(
    file_name: &str,
    data: &[u8],
    key_field: &str,
    fields: &[String],
) -> Result<ExtraFields, CsvParseError> {
    let mut extra = ExtraFields::default();
    if fields.is_empty() {
        return Ok(extra);
    }

    let data = strip_utf8_bom(data);
    let mut lines = LineCounter::new(data);
    let mut reader = csv_reader(data);
    let headers = normalized_headers(file_name, &mut reader, &mut lines)?;
    let Some(key_index) = headers.iter().position(|header| header == key_field) else {
        return Ok(extra);
    };
    let columns: Vec<(usize, &String)> = fields
        .iter()
        .filter_map(|field| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(field.trim()))
                .map(|index| (index, field))
        })
        .collect();
    for (_, field) in &columns {
        extra.by_field.entry((*field).clone()).or_default();
    }

    for result in reader.records() {
        let record = result.map_err(|err| parse_error(file_name, &err, None, &mut lines))?;
        let Some(key) = record.get(key_index).filter(|key| !key.is_empty()) else {
            continue;
        };
        for (index, field) in &columns {
            if let Some(value) = record.get(*index) {
                extra.insert((*field).clone(), key, value);
            }
        }
    }

    Ok(extra)
}

/// Maps reader byte offsets to 1-based physical line numbers.
///
/// The reader skips blank lines without counting them and reports a record
/// at the end of the previous one, so line terminators directly following
/// an offset belong to the lines before the record.
struct LineCounter<'a> {
    data: &'a [u8],
    offset: usize,
    newlines: u64,
}

impl<'a> LineCounter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            newlines: 0,
        }
    }

    fn line_at(&mut self, byte: u64) -> u64 {
        let byte = usize::try_from(byte)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        if byte < self.offset {
            self.offset = 0;
            self.newlines = 0;
        }
        self.newlines += count_newlines(&self.data[self.offset..byte]);
        self.offset = byte;
        let skipped = self.data[byte..]
            .iter()
            .take_while(|&&ch| ch == b'\r' || ch == b'\n');
        self.newlines + count_newlines(skipped) + 1
    }
}

fn count_newlines<'b>(bytes: impl IntoIterator<Item = &'b u8>) -> u64 {
    bytes.into_iter().filter(|&&ch| ch == b'\n').count() as u64
}

fn csv_reader(data: &[u8]) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data)
}

fn normalized_headers(
    file_name: &str,
    reader: &mut csv::Reader<&[u8]>,
    lines: &mut LineCounter<'_>,
) -> Result<Vec<String>, CsvParseError> {
    let headers = reader
        .headers()
        .map_err(|err| parse_error(file_name, &err, None, lines))?;
    Ok(headers
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .collect())
}

fn parse_error(
    file_name: &str,
    err: &csv::Error,
    record: Option<&StringRecord>,
    lines: &mut LineCounter<'_>,
) -> CsvParseError {
    let line_index = err
        .position()
        .or_else(|| record.and_then(|record| record.position()))
        .map(|pos| lines.line_at(pos.byte()));
    CsvParseError {
        file: file_name.to_string(),
        line_index,
        message: err.to_string(),
        parsed_content: record.map(|record| record.iter().collect::<Vec<_>>().join(",")),
    }
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data)
}
