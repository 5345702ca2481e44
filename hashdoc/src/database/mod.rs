mod dependencies;

pub use dependencies::{DependencyRegistry, ForeignKey};

use crate::engine::{DocumentEngine, DocumentHooks, NoHooks};
use crate::error::{HashDocError, Result};
use crate::key::{join_key, sanitize_segment, validate_delimiter, DEFAULT_DELIMITER};
use crate::schema::{parse_schema, DocumentDefinition, SchemaDefinition};
use crate::store::{KeyStore, SearchIndex, SqliteBackend};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// File name of the schema inside a data directory.
pub const SCHEMA_FILE: &str = "schema.yaml";
/// File name of the SQLite database inside a data directory.
pub const DATABASE_FILE: &str = "hashdoc.db";

/// State shared by every engine of one database.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn KeyStore>,
    pub(crate) index: Arc<dyn SearchIndex>,
    pub(crate) delimiter: char,
    pub(crate) dependencies: DependencyRegistry,
    /// Final definitions keyed by type name.
    pub(crate) definitions: BTreeMap<String, Arc<DocumentDefinition>>,
}

/// The database registry: one document engine per registered type over a
/// shared key store and search index.
pub struct Database {
    shared: Arc<Shared>,
    engines: BTreeMap<String, DocumentEngine>,
}

impl Database {
    pub fn builder(store: Arc<dyn KeyStore>, index: Arc<dyn SearchIndex>) -> DatabaseBuilder {
        DatabaseBuilder {
            store,
            index,
            delimiter: DEFAULT_DELIMITER,
            definitions: BTreeMap::new(),
            hooks: HashMap::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// A builder over a fresh in-memory SQLite backend.
    pub fn in_memory() -> Result<DatabaseBuilder> {
        let backend = Arc::new(SqliteBackend::open_in_memory()?);
        Ok(Self::builder(backend.clone(), backend))
    }

    /// Open the data directory at `path`: its schema.yaml and its SQLite
    /// database, which is created if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(HashDocError::Schema(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }

        let schema_path = root.join(SCHEMA_FILE);
        if !schema_path.exists() {
            return Err(HashDocError::Schema(format!(
                "{SCHEMA_FILE} not found in {}",
                root.display()
            )));
        }
        let schema = parse_schema(&schema_path)?;

        let backend = Arc::new(SqliteBackend::open(&root.join(DATABASE_FILE))?);
        log::debug!("Opened {}", root.display());
        Self::from_schema(&schema, backend.clone(), backend)
    }

    pub fn from_schema(
        schema: &SchemaDefinition,
        store: Arc<dyn KeyStore>,
        index: Arc<dyn SearchIndex>,
    ) -> Result<Self> {
        Self::builder(store, index).schema(schema).build()
    }

    /// The engine of a document type, by case-insensitive name.
    pub fn document(&self, name: &str) -> Result<&DocumentEngine> {
        self.engines
            .get(&sanitize_segment(name))
            .ok_or_else(|| HashDocError::UnknownDocument(name.to_string()))
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentEngine> {
        self.engines.values()
    }

    /// Join sanitized parts into a key, e.g. `["country", "es"]` into
    /// `COUNTRY/ES`.
    pub fn key(&self, parts: &[&str]) -> String {
        join_key(parts, self.shared.delimiter)
    }

    pub fn delimiter(&self) -> char {
        self.shared.delimiter
    }

    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.shared.dependencies
    }
}

/// Collects definitions, hooks and foreign keys before the engines are
/// created.
pub struct DatabaseBuilder {
    store: Arc<dyn KeyStore>,
    index: Arc<dyn SearchIndex>,
    delimiter: char,
    definitions: BTreeMap<String, DocumentDefinition>,
    hooks: HashMap<String, Arc<dyn DocumentHooks>>,
    foreign_keys: Vec<(String, String)>,
}

impl DatabaseBuilder {
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Register a document type, replacing one with the same name.
    pub fn define(mut self, definition: DocumentDefinition) -> Self {
        self.definitions
            .insert(definition.type_name().to_string(), definition);
        self
    }

    pub fn hooks(mut self, type_name: &str, hooks: impl DocumentHooks + 'static) -> Self {
        self.hooks
            .insert(sanitize_segment(type_name), Arc::new(hooks));
        self
    }

    /// Declare that documents of `dependent` hold keys of `referenced` in
    /// the field named after `referenced`, lower-cased.
    pub fn foreign_key(mut self, dependent: &str, referenced: &str) -> Self {
        self.foreign_keys
            .push((sanitize_segment(dependent), sanitize_segment(referenced)));
        self
    }

    /// Register everything a parsed schema declares.
    pub fn schema(mut self, schema: &SchemaDefinition) -> Self {
        if let Some(delimiter) = schema.delimiter {
            self = self.delimiter(delimiter);
        }
        for definition in schema.definitions() {
            self = self.define(definition);
        }
        for fk in &schema.foreign_keys {
            self = self.foreign_key(&fk.dependant, &fk.references);
        }
        self
    }

    /// Apply the foreign keys, check every definition and create one engine
    /// per type, ensuring its index exists.
    pub fn build(self) -> Result<Database> {
        let DatabaseBuilder {
            store,
            index,
            delimiter,
            mut definitions,
            mut hooks,
            foreign_keys,
        } = self;

        validate_delimiter(delimiter)?;

        let mut dependencies = DependencyRegistry::new();
        for (dependent, referenced) in &foreign_keys {
            let referenced_def = definitions
                .get(referenced)
                .cloned()
                .ok_or_else(|| HashDocError::UnknownDocument(referenced.clone()))?;
            let dependent_def = definitions
                .get_mut(dependent)
                .ok_or_else(|| HashDocError::UnknownDocument(dependent.clone()))?;
            if !dependencies.register(dependent_def, &referenced_def) {
                log::debug!("Foreign key {dependent} -> {referenced} declared twice");
            }
        }

        for definition in definitions.values() {
            definition.validate()?;
        }
        if let Some(name) = hooks.keys().find(|name| !definitions.contains_key(*name)) {
            return Err(HashDocError::UnknownDocument(name.clone()));
        }

        let shared = Arc::new(Shared {
            store,
            index,
            delimiter,
            dependencies,
            definitions: definitions
                .into_iter()
                .map(|(name, definition)| (name, Arc::new(definition)))
                .collect(),
        });

        let mut engines = BTreeMap::new();
        for (name, definition) in &shared.definitions {
            let hooks = hooks
                .remove(name)
                .unwrap_or_else(|| Arc::new(NoHooks));
            let engine = DocumentEngine::new(Arc::clone(&shared), Arc::clone(definition), hooks)?;
            engines.insert(name.clone(), engine);
        }

        log::debug!(
            "Database ready: {} document types, {} foreign keys",
            engines.len(),
            shared.dependencies.all().len()
        );
        Ok(Database { shared, engines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{parse_schema_str, FieldDefinition};
    use serde_json::json;

    fn people() -> Database {
        Database::in_memory()
            .unwrap()
            .define(DocumentDefinition::basic("country"))
            .define(
                DocumentDefinition::new("person")
                    .with_field(FieldDefinition::string("name").indexed().on_table()),
            )
            .foreign_key("person", "country")
            .build()
            .unwrap()
    }

    #[test]
    fn test_document_lookup_is_case_insensitive() {
        let db = people();
        assert_eq!(db.document("Person").unwrap().type_name(), "PERSON");
        assert_eq!(db.documents().count(), 2);

        let err = db.document("planet").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownDocument);
    }

    #[test]
    fn test_foreign_key_declares_field() {
        let db = people();
        let person = db.document("person").unwrap();
        assert_eq!(person.definition().dependant_fields(), vec!["country"]);
        assert_eq!(db.dependencies().all().len(), 1);
    }

    #[test]
    fn test_key() {
        let db = people();
        assert_eq!(db.key(&["COUNTRY", "ES"]), "COUNTRY/ES");
        assert_eq!(db.key(&["country", "e-s"]), "COUNTRY/ES");
    }

    #[test]
    fn test_unknown_foreign_key_target() {
        let result = Database::in_memory()
            .unwrap()
            .define(DocumentDefinition::new("person"))
            .foreign_key("person", "country")
            .build();
        assert_eq!(result.err().unwrap().kind(), ErrorKind::UnknownDocument);
    }

    #[test]
    fn test_bad_delimiter() {
        let result = Database::in_memory()
            .unwrap()
            .delimiter('_')
            .define(DocumentDefinition::new("person"))
            .build();
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_from_schema_with_custom_delimiter() {
        let schema = parse_schema_str(
            r#"
delimiter: "."
documents:
  country:
    basic: true
"#,
        )
        .unwrap();
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let db = Database::from_schema(&schema, backend.clone(), backend).unwrap();

        let country = db.document("country").unwrap();
        let key = country
            .save(&json!({ "id": "es", "description": "España" }))
            .unwrap();
        assert_eq!(key, "COUNTRY.ES");
        assert_eq!(db.key(&["country", "es"]), key);
    }

    #[test]
    fn test_open_missing_dir() {
        let err = Database::open("/nonexistent/hashdoc/data").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
