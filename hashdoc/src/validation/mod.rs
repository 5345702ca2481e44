use crate::document::{FieldValue, Temporal, Values};
use crate::error::{FieldErrors, HashDocError, Result};
use crate::schema::{
    DocumentDefinition, FieldDefinition, FieldFormat, SemanticType, CREATED_AT_FIELD,
    UPDATED_AT_FIELD,
};
use regex::Regex;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s.]+$";

/// Check and coerce a document's values against its definition.
///
/// Every declared field is checked before failing, so the error carries
/// the messages of all invalid fields. Undeclared fields are dropped
/// unless the definition allows additional fields; the timestamp fields
/// always pass through.
pub fn validate_document(definition: &DocumentDefinition, mut values: Values) -> Result<Values> {
    let email = Regex::new(EMAIL_PATTERN).map_err(|e| HashDocError::Schema(e.to_string()))?;
    let mut errors = FieldErrors::new();
    let mut out = Values::new();

    for field in definition.fields() {
        let value = match values.remove(&field.name) {
            Some(FieldValue::Text(s)) if s.trim().is_empty() && field.required => None,
            other => other,
        };

        let Some(value) = value else {
            if field.required {
                errors.push(&field.name, "is required");
            }
            continue;
        };

        match coerce(field, value) {
            Ok(value) => {
                check_content(field, &value, &email, &mut errors);
                out.insert(field.name.clone(), value);
            }
            Err(message) => errors.push(&field.name, message),
        }
    }

    for (name, value) in values {
        if definition.allows_additional_fields()
            || name == CREATED_AT_FIELD
            || name == UPDATED_AT_FIELD
        {
            out.insert(name, value);
        } else {
            log::debug!("{}: dropping undeclared field '{name}'", definition.type_name());
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(HashDocError::Validation(errors))
    }
}

/// Bring a value to the field's semantic type.
fn coerce(field: &FieldDefinition, value: FieldValue) -> std::result::Result<FieldValue, String> {
    match (field.semantic_type, value) {
        (
            SemanticType::String,
            value @ (FieldValue::Int(_) | FieldValue::Float(_) | FieldValue::Temporal(_)),
        ) => Ok(FieldValue::Text(value.to_text())),
        (SemanticType::String, value) => Ok(value),

        (SemanticType::Int, FieldValue::Int(i)) => Ok(FieldValue::Int(i)),
        (SemanticType::Int, FieldValue::Float(f))
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 =>
        {
            Ok(FieldValue::Int(f as i64))
        }
        (SemanticType::Int, FieldValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|_| format!("'{s}' is not an integer")),
        (SemanticType::Int, _) => Err("must be an integer".into()),

        (SemanticType::Float, FieldValue::Float(f)) => Ok(FieldValue::Float(f)),
        (SemanticType::Float, FieldValue::Int(i)) => Ok(FieldValue::Float(i as f64)),
        (SemanticType::Float, FieldValue::Text(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
            _ => Err(format!("'{s}' is not a number")),
        },
        (SemanticType::Float, _) => Err("must be a number".into()),

        (SemanticType::Date, FieldValue::Temporal(t)) => Ok(FieldValue::Temporal(t)),
        (SemanticType::Date, FieldValue::Text(s)) => Temporal::parse(&s)
            .map(FieldValue::Temporal)
            .ok_or_else(|| format!("'{s}' is not a date (YYYY-MM-DD or RFC 3339)")),
        (SemanticType::Date, _) => Err("must be a date".into()),
    }
}

fn check_content(
    field: &FieldDefinition,
    value: &FieldValue,
    email: &Regex,
    errors: &mut FieldErrors,
) {
    let text = match value {
        FieldValue::Text(s) | FieldValue::Reference(s) => s,
        _ => return,
    };
    let len = text.chars().count();

    if let Some(min) = field.min_length {
        if len < min {
            errors.push(&field.name, format!("must be at least {min} characters long"));
        }
    }
    if let Some(max) = field.max_length {
        if len > max {
            errors.push(&field.name, format!("cannot be longer than {max} characters"));
        }
    }
    if field.format == Some(FieldFormat::Email) && !text.is_empty() && !email.is_match(text) {
        errors.push(&field.name, "is not a valid email address");
    }
}
