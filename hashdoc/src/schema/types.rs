use crate::error::{HashDocError, Result};
use crate::key::sanitize_segment;
use crate::store::{FieldKind, FieldSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Name of the identity field every document type carries.
pub const ID_FIELD: &str = "id";
/// Stamped once, when a document is first saved without one.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Stamped on every save.
pub const UPDATED_AT_FIELD: &str = "updated_at";

pub const ID_MIN_LENGTH: usize = 2;
pub const ID_MAX_LENGTH: usize = 50;

/// Top-level schema definition parsed from schema.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentSpec>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

impl SchemaDefinition {
    /// Build the document definitions declared in this schema.
    pub fn definitions(&self) -> Vec<DocumentDefinition> {
        self.documents
            .iter()
            .map(|(name, spec)| spec.to_definition(name))
            .collect()
    }
}

/// One document type as written in schema.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSpec {
    /// Start from the id + description preset.
    #[serde(default)]
    pub basic: bool,
    #[serde(default)]
    pub auto_id: AutoIdStrategy,
    #[serde(default)]
    pub additional_fields: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl DocumentSpec {
    fn to_definition(&self, name: &str) -> DocumentDefinition {
        let base = if self.basic {
            DocumentDefinition::basic(name)
        } else {
            DocumentDefinition::new(name)
        };
        self.fields
            .iter()
            .cloned()
            .fold(base, DocumentDefinition::with_field)
            .auto_id(self.auto_id)
            .additional_fields(self.additional_fields)
    }
}

/// A `dependant -> references` pair from schema.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub dependant: String,
    pub references: String,
}

/// How ids are generated for documents saved without one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIdStrategy {
    #[default]
    Counter,
    Ulid,
    Uuid,
}

/// Semantic type of a field value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    #[default]
    String,
    Int,
    Float,
    Date,
}

impl SemanticType {
    /// Numeric types are indexed as numbers, everything else as text.
    pub fn index_kind(self) -> FieldKind {
        match self {
            SemanticType::Int | SemanticType::Float => FieldKind::Numeric,
            SemanticType::String | SemanticType::Date => FieldKind::Text,
        }
    }
}

/// Content format checked by validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Email,
}

/// Attribute flags of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFlags {
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub on_table: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub dependant: bool,
}

/// Definition of a single field in a document type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub semantic_type: SemanticType,
    #[serde(flatten)]
    pub flags: FieldFlags,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,
}

impl FieldDefinition {
    pub fn new(name: &str, semantic_type: SemanticType) -> Self {
        FieldDefinition {
            name: name.to_string(),
            semantic_type,
            flags: FieldFlags::default(),
            required: false,
            min_length: None,
            max_length: None,
            format: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, SemanticType::String)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, SemanticType::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, SemanticType::Float)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, SemanticType::Date)
    }

    pub fn indexed(mut self) -> Self {
        self.flags.indexed = true;
        self
    }

    pub fn on_table(mut self) -> Self {
        self.flags.on_table = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.flags.unique = true;
        self
    }

    pub fn dependant(mut self) -> Self {
        self.flags.dependant = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Unique and dependant fields are looked up through the index, so they
    /// are always indexed.
    pub fn is_indexed(&self) -> bool {
        self.flags.indexed || self.flags.unique || self.flags.dependant
    }

    fn id() -> Self {
        FieldDefinition::string(ID_FIELD)
            .indexed()
            .on_table()
            .required()
            .min_length(ID_MIN_LENGTH)
            .max_length(ID_MAX_LENGTH)
    }
}

/// Static description of one document type: its name and ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentDefinition {
    type_name: String,
    fields: Vec<FieldDefinition>,
    auto_id: AutoIdStrategy,
    additional_fields: bool,
}

impl DocumentDefinition {
    /// A definition holding only the implicit `id` field.
    pub fn new(name: &str) -> Self {
        DocumentDefinition {
            type_name: sanitize_segment(name),
            fields: vec![FieldDefinition::id()],
            auto_id: AutoIdStrategy::default(),
            additional_fields: false,
        }
    }

    /// The `id` + `description` preset.
    pub fn basic(name: &str) -> Self {
        Self::new(name).with_field(
            FieldDefinition::string("description")
                .indexed()
                .on_table()
                .required()
                .max_length(50),
        )
    }

    /// Append a field, or replace the field with the same name.
    /// A redeclared `id` keeps its identity constraints.
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        let field = if field.name == ID_FIELD {
            let mut id = field;
            id.flags.indexed = true;
            id.required = true;
            id.min_length = Some(id.min_length.unwrap_or(ID_MIN_LENGTH).max(ID_MIN_LENGTH));
            id.max_length = Some(id.max_length.unwrap_or(ID_MAX_LENGTH).min(ID_MAX_LENGTH));
            id
        } else {
            field
        };

        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn auto_id(mut self, strategy: AutoIdStrategy) -> Self {
        self.auto_id = strategy;
        self
    }

    /// Keep fields the definition does not declare instead of dropping them.
    pub fn additional_fields(mut self, allow: bool) -> Self {
        self.additional_fields = allow;
        self
    }

    /// Flag `field_name` as holding a key of another document type,
    /// declaring it if absent.
    pub(crate) fn mark_dependant(&mut self, field_name: &str) {
        match self.fields.iter_mut().find(|f| f.name == field_name) {
            Some(field) => field.flags.dependant = true,
            None => self
                .fields
                .push(FieldDefinition::string(field_name).indexed().dependant()),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn auto_id_strategy(&self) -> AutoIdStrategy {
        self.auto_id
    }

    pub fn allows_additional_fields(&self) -> bool {
        self.additional_fields
    }

    /// Prefix shared by every key of this type, e.g. `PERSON/`.
    pub fn key_prefix(&self, delimiter: char) -> String {
        format!("{}{delimiter}", self.type_name)
    }

    /// Name of the field that holds references to `self` in dependant types.
    pub fn reference_field_name(&self) -> String {
        self.type_name.to_lowercase()
    }

    pub fn indexed_fields(&self) -> Vec<&str> {
        self.names_where(FieldDefinition::is_indexed)
    }

    pub fn table_fields(&self) -> Vec<&str> {
        self.names_where(|f| f.flags.on_table)
    }

    pub fn unique_fields(&self) -> Vec<&str> {
        self.names_where(|f| f.flags.unique)
    }

    pub fn dependant_fields(&self) -> Vec<&str> {
        self.names_where(|f| f.flags.dependant)
    }

    /// Index field specs for the search adapter.
    pub fn index_specs(&self) -> Vec<FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.is_indexed())
            .map(|f| FieldSpec {
                name: f.name.clone(),
                kind: f.semantic_type.index_kind(),
                sortable: true,
            })
            .collect()
    }

    fn names_where(&self, predicate: impl Fn(&FieldDefinition) -> bool) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| predicate(f))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Check the structural invariants of the definition.
    pub fn validate(&self) -> Result<()> {
        if self.type_name.is_empty() {
            return Err(HashDocError::Schema(
                "Document type name must contain letters or digits".into(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(HashDocError::Schema(format!(
                    "{}: field names cannot be empty",
                    self.type_name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(HashDocError::Schema(format!(
                    "{}: field '{}' is declared twice",
                    self.type_name, field.name
                )));
            }
        }

        match self.field(ID_FIELD) {
            Some(id) if id.flags.unique => Err(HashDocError::Schema(format!(
                "{}: the id field cannot be flagged unique",
                self.type_name
            ))),
            Some(_) => Ok(()),
            None => Err(HashDocError::Schema(format!(
                "{}: missing id field",
                self.type_name
            ))),
        }
    }
}
