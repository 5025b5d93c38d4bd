use serde::Serialize;

use crate::config::FieldNameMap;

/// Upper bound of any attribute width.
pub const MAX_FIELD_WIDTH: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FieldKind {
    /// Width is derived from the longest value.
    Text,
    Number { width: usize },
    Float { width: usize, decimals: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl FieldValue {
    pub fn text(value: Option<&str>) -> Self {
        FieldValue::Text(value.unwrap_or_default().to_string())
    }

    pub fn integer(value: Option<i32>) -> Self {
        value.map_or(FieldValue::Null, |value| FieldValue::Integer(value as i64))
    }

    pub fn float(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Float)
    }

    fn text_len(&self) -> usize {
        match self {
            FieldValue::Text(value) => value.len(),
            _ => 0,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Declared attribute of an output layout, before width resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
        }
    }

    pub fn number(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Number { width },
        }
    }

    pub fn float(name: impl Into<String>, width: usize, decimals: usize) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Float { width, decimals },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    pub name: String,
    pub kind: FieldKind,
    pub width: usize,
}

impl ResolvedField {
    pub fn decimals(&self) -> Option<usize> {
        match self.kind {
            FieldKind::Float { decimals, .. } => Some(decimals),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub fields: Vec<ResolvedField>,
}

impl Schema {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An output row whose values follow the order of its layout.
pub trait Record {
    fn values(&self) -> Vec<FieldValue>;
}

/// Computes the final schema of a layout over every record that will be
/// written. Text widths are the longest value in bytes, capped at
/// [`MAX_FIELD_WIDTH`]; numeric widths are taken as declared.
pub fn resolve_widths<'r, R>(
    records: impl IntoIterator<Item = &'r R>,
    layout: &[FieldSpec],
    names: &FieldNameMap,
) -> Schema
where
    R: Record + 'r,
{
    let mut widths = vec![0usize; layout.len()];
    for record in records {
        for (width, value) in widths.iter_mut().zip(record.values()) {
            *width = (*width).max(value.text_len().min(MAX_FIELD_WIDTH));
        }
    }

    let fields = layout
        .iter()
        .zip(widths)
        .map(|(spec, observed)| {
            let width = match spec.kind {
                FieldKind::Text => observed,
                FieldKind::Number { width } | FieldKind::Float { width, .. } => {
                    width.min(MAX_FIELD_WIDTH)
                }
            };
            ResolvedField {
                name: names.resolve(&spec.name).to_string(),
                kind: spec.kind,
                width,
            }
        })
        .collect();
    Schema { fields }
}

/// Longest prefix of `value` that fits `width` bytes without splitting a
/// character.
pub fn truncate_to_width(value: &str, width: usize) -> &str {
    if value.len() <= width {
        return value;
    }
    let mut end = width;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(Vec<FieldValue>);

    impl Record for Row {
        fn values(&self) -> Vec<FieldValue> {
            self.0.clone()
        }
    }

    fn text_row(value: &str, count: u64) -> Row {
        Row(vec![value.into(), count.into()])
    }

    #[test]
    fn text_width_is_capped() {
        let records = vec![
            text_row(&"a".repeat(3), 1),
            text_row(&"b".repeat(300), 2),
            text_row(&"c".repeat(10), 3),
        ];
        let layout = [FieldSpec::text("Name"), FieldSpec::number("Frequency", 32)];
        let schema = resolve_widths(&records, &layout, &FieldNameMap::default());

        assert_eq!(schema.fields[0].width, MAX_FIELD_WIDTH);
        assert_eq!(schema.fields[1].width, 32);
        assert_eq!(schema.fields[1].kind, FieldKind::Number { width: 32 });
    }

    #[test]
    fn applies_field_name_remapping() {
        let records = vec![text_row("abc", 1), text_row("", 2)];
        let layout = [FieldSpec::text("Name"), FieldSpec::float("Km_len", 32, 10)];
        let mut names = FieldNameMap::default();
        names.insert("Km_len", "length");

        let schema = resolve_widths(&records, &layout, &names);
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["Name", "length"]);
        assert_eq!(schema.fields[0].width, 3);
        assert_eq!(schema.fields[1].decimals(), Some(10));
    }

    #[test]
    fn empty_record_set_gives_zero_text_width() {
        let records: Vec<Row> = Vec::new();
        let schema = resolve_widths(&records, &[FieldSpec::text("Id")], &FieldNameMap::default());
        assert_eq!(schema.fields[0].width, 0);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_width("Zürich", 2), "Z");
        assert_eq!(truncate_to_width("Zürich", 3), "Zü");
        assert_eq!(truncate_to_width("Bern", 10), "Bern");
    }
}
