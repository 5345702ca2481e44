use super::types::SchemaDefinition;
use crate::error::{HashDocError, Result};
use std::path::Path;

/// Load the document types, delimiter and foreign keys of a data
/// directory from its schema file.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HashDocError::Schema(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_schema_str(&content)
}

/// Same as [`parse_schema`] for YAML already in memory. An empty
/// document defines no types.
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    if content.trim().is_empty() {
        return Ok(SchemaDefinition::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{AutoIdStrategy, FieldFormat, SemanticType};

    #[test]
    fn test_parse_schema() {
        let schema = parse_schema_str(
            r#"
delimiter: "/"
documents:
  country:
    basic: true
  person:
    auto_id: ulid
    fields:
      - { name: name, type: string, indexed: true, on_table: true, required: true, max_length: 50 }
      - { name: age, type: int, indexed: true }
      - { name: email, unique: true, format: email }
foreign_keys:
  - { dependant: person, references: country }
"#,
        )
        .unwrap();

        assert_eq!(schema.delimiter, Some('/'));
        assert_eq!(schema.foreign_keys.len(), 1);

        let person = &schema.documents["person"];
        assert_eq!(person.auto_id, AutoIdStrategy::Ulid);
        assert_eq!(person.fields[0].name, "name");
        assert!(person.fields[0].flags.on_table);
        assert_eq!(person.fields[1].semantic_type, SemanticType::Int);
        assert_eq!(person.fields[2].semantic_type, SemanticType::String);
        assert_eq!(person.fields[2].format, Some(FieldFormat::Email));

        let definitions = schema.definitions();
        assert_eq!(definitions[0].type_name(), "COUNTRY");
        assert!(definitions[0].field("description").is_some());
        let names: Vec<_> = definitions[1].fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "age", "email"]);
    }

    #[test]
    fn test_parse_empty_schema() {
        let schema = parse_schema_str("{}").unwrap();
        assert!(schema.delimiter.is_none());
        assert!(schema.documents.is_empty());

        let schema = parse_schema_str("\n  \n").unwrap();
        assert!(schema.documents.is_empty());
    }

    #[test]
    fn test_missing_schema_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("schema.yaml");
        let err = parse_schema(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("schema.yaml"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = parse_schema_str(
            "documents:\n  person:\n    fields:\n      - { name: tags, type: list }\n",
        );
        assert!(result.is_err());
    }
}
