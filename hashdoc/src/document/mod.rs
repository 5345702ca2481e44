// Field values at the save boundary and decoding of stored records

use crate::error::{HashDocError, Result};
use crate::escape::{escape, unescape};
use crate::schema::{DocumentDefinition, SemanticType, ID_FIELD};
use crate::store::Fields;
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parsed form of a date or timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemporalValue {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

/// Date or timestamp value. The text it was parsed from is what gets
/// stored, so a saved value reads back exactly as given.
#[derive(Debug, Clone, PartialEq)]
pub struct Temporal {
    value: TemporalValue,
    text: String,
}

impl Temporal {
    /// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date.
    pub fn parse(s: &str) -> Option<Temporal> {
        let trimmed = s.trim();
        let value = match DateTime::parse_from_rfc3339(trimmed) {
            Ok(dt) => TemporalValue::DateTime(dt),
            Err(_) => TemporalValue::Date(NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?),
        };
        Some(Temporal {
            value,
            text: s.to_string(),
        })
    }

    /// Current UTC time.
    pub fn now() -> Temporal {
        let now: DateTime<FixedOffset> = Utc::now().into();
        Temporal {
            value: TemporalValue::DateTime(now),
            text: now.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    pub fn value(&self) -> TemporalValue {
        self.value
    }

    pub fn to_text(&self) -> String {
        self.text.clone()
    }
}

/// A field value accepted for storage.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Temporal(Temporal),
    /// Key of another document, taken from a nested document's `id`.
    Reference(String),
}

impl FieldValue {
    /// Convert one input value. `null` means the field is absent.
    pub fn from_json(field: &str, value: &Value) -> Result<Option<FieldValue>> {
        let type_error = |found: &str| HashDocError::Type {
            field: field.to_string(),
            found: found.to_string(),
        };

        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(FieldValue::Text(s.clone()))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(FieldValue::Int(i))),
                None => n
                    .as_f64()
                    .map(|f| Some(FieldValue::Float(f)))
                    .ok_or_else(|| type_error("number")),
            },
            Value::Object(map) => match map.get(ID_FIELD) {
                Some(Value::String(id)) => Ok(Some(FieldValue::Reference(id.clone()))),
                Some(_) => Err(type_error("nested document with a non-string id")),
                None => Err(type_error("nested object without id")),
            },
            Value::Bool(_) => Err(type_error("boolean")),
            Value::Array(_) => Err(type_error("list")),
        }
    }

    /// Plain text form, before escaping.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Reference(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Temporal(t) => t.to_text(),
        }
    }

    /// Stored form: text is escaped for the index, numbers are kept as is.
    pub fn to_storage(&self) -> String {
        match self {
            FieldValue::Int(_) | FieldValue::Float(_) => self.to_text(),
            _ => escape(&self.to_text()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::String(self.to_text()),
        }
    }
}

/// Ordered field values of one document being saved.
pub type Values = BTreeMap<String, FieldValue>;

/// Convert a raw input document into field values.
pub fn values_from_json(doc: &Map<String, Value>) -> Result<Values> {
    let mut values = Values::new();
    for (name, value) in doc {
        if let Some(v) = FieldValue::from_json(name, value)? {
            values.insert(name.clone(), v);
        }
    }
    Ok(values)
}

pub fn values_to_json(values: &Values) -> Map<String, Value> {
    values
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect()
}

pub fn values_to_storage(values: &Values) -> Fields {
    values
        .iter()
        .map(|(name, value)| (name.clone(), value.to_storage()))
        .collect()
}

/// Turn stored fields back into a document: values are unescaped and
/// numeric fields become JSON numbers.
pub fn decode_record(definition: &DocumentDefinition, fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(name, raw)| {
            let text = unescape(raw);
            let semantic_type = definition.field(name).map(|f| f.semantic_type);
            (name.clone(), decode_value(semantic_type, text))
        })
        .collect()
}

fn decode_value(semantic_type: Option<SemanticType>, text: String) -> Value {
    match semantic_type {
        Some(SemanticType::Int) => match text.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(text),
        },
        Some(SemanticType::Float) => match text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            Some(n) => Value::Number(n),
            None => Value::String(text),
        },
        _ => Value::String(text),
    }
}
