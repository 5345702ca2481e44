// Per document type engine: save, get, delete, search, paginate

mod hooks;

pub use hooks::{DocumentHooks, NoHooks};

use crate::database::Shared;
use crate::document::{
    decode_record, values_from_json, values_to_json, values_to_storage, FieldValue, Temporal,
    Values,
};
use crate::error::{HashDocError, HookStage, Result};
use crate::escape::escape;
use crate::key::{next_auto_id, sanitize_id, split_key};
use crate::pagination::Page;
use crate::schema::{
    DocumentDefinition, FieldDefinition, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::store::query::tokenize;
use crate::store::{FieldKind, SearchRequest};
use crate::validation::validate_document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A stored document as returned by reads.
pub type Record = Map<String, Value>;

/// Name of the search index of `type_name`.
pub fn index_name(type_name: &str, delimiter: char) -> String {
    format!("idx{delimiter}{type_name}")
}

/// Result of [`DocumentEngine::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Matching records, regardless of the requested window.
    pub total: usize,
    pub docs: Vec<Record>,
}

/// Description of a document type and its current size.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub type_name: String,
    pub key_prefix: String,
    pub index: String,
    pub fields: Vec<FieldDefinition>,
    pub indexed_fields: Vec<String>,
    pub table_fields: Vec<String>,
    pub unique_fields: Vec<String>,
    pub dependant_fields: Vec<String>,
    /// Types this one holds keys of.
    pub references: Vec<String>,
    /// Types holding keys of this one.
    pub referenced_by: Vec<String>,
    pub count: usize,
}

/// Operations on the documents of one type.
///
/// Holds only configuration fixed at construction, so one engine can be
/// shared by concurrent callers.
pub struct DocumentEngine {
    shared: Arc<Shared>,
    definition: Arc<DocumentDefinition>,
    hooks: Arc<dyn DocumentHooks>,
    index_name: String,
}

impl DocumentEngine {
    pub(crate) fn new(
        shared: Arc<Shared>,
        definition: Arc<DocumentDefinition>,
        hooks: Arc<dyn DocumentHooks>,
    ) -> Result<Self> {
        let index_name = index_name(definition.type_name(), shared.delimiter);
        let created = shared.index.ensure_index(
            &index_name,
            &definition.index_specs(),
            &definition.key_prefix(shared.delimiter),
        )?;
        if !created {
            log::debug!("Index {index_name} already exists, keeping its definition");
        }

        Ok(DocumentEngine {
            shared,
            definition,
            hooks,
            index_name,
        })
    }

    pub fn definition(&self) -> &DocumentDefinition {
        &self.definition
    }

    pub fn type_name(&self) -> &str {
        self.definition.type_name()
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Full key of this type for a bare or prefixed id.
    pub fn key(&self, id: &str) -> Result<String> {
        sanitize_id(self.type_name(), id, self.shared.delimiter)
    }

    // ── Save ─────────────────────────────────────────────────────────

    /// Validate and store a document, returning its key.
    ///
    /// A document without `id` gets the next automatic id. Saving an
    /// existing key updates that record. Every failure comes back as
    /// `SaveFailed` carrying `doc`; nothing is written unless all checks
    /// pass.
    ///
    /// Fields are merged into the stored record. A field left out, or
    /// given as `null`, keeps its stored value, so a save cannot clear a
    /// field.
    pub fn save(&self, doc: &Value) -> Result<String> {
        self.try_save(doc).map_err(|source| {
            log::warn!("{}: save rejected: {source}", self.type_name());
            HashDocError::SaveFailed {
                payload: Box::new(doc.clone()),
                source: Box::new(source),
            }
        })
    }

    /// Save any serializable value as a document.
    pub fn save_as<T: Serialize>(&self, doc: &T) -> Result<String> {
        let value = serde_json::to_value(doc)?;
        self.save(&value)
    }

    fn try_save(&self, doc: &Value) -> Result<String> {
        let raw = doc.as_object().ok_or_else(|| HashDocError::Type {
            field: "document".into(),
            found: json_kind(doc).into(),
        })?;

        let raw_id = match raw.get(ID_FIELD) {
            None | Some(Value::Null) => next_auto_id(
                self.shared.store.as_ref(),
                self.type_name(),
                self.definition.auto_id_strategy(),
            )?,
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(HashDocError::Type {
                    field: ID_FIELD.into(),
                    found: json_kind(other).into(),
                })
            }
        };
        let key = self.key(&raw_id)?;
        let local_id = split_key(&key, self.shared.delimiter)
            .map(|(_, local)| local.to_string())
            .unwrap_or_default();

        // Id length rules apply to the local part of the key
        let mut values = values_from_json(raw)?;
        values.insert(ID_FIELD.into(), FieldValue::Text(local_id));
        let mut values = validate_document(&self.definition, values)?;

        self.check_foreign_keys(&mut values)?;
        self.check_unique(&key, &values)?;
        values.insert(ID_FIELD.into(), FieldValue::Text(key.clone()));

        let doc = self
            .hooks
            .before_save(values_to_json(&values))
            .map_err(|message| HashDocError::Hook {
                stage: HookStage::BeforeSave,
                message,
            })?;
        let mut values = values_from_json(&doc)?;
        values.insert(ID_FIELD.into(), FieldValue::Text(key.clone()));

        let now = Temporal::now();
        values
            .entry(CREATED_AT_FIELD.into())
            .or_insert_with(|| FieldValue::Temporal(now.clone()));
        values.insert(UPDATED_AT_FIELD.into(), FieldValue::Temporal(now));

        self.shared
            .store
            .write_fields(&key, &values_to_storage(&values))?;
        log::debug!("{}: saved {key}", self.type_name());

        self.hooks
            .after_save(&values_to_json(&values), &key)
            .map_err(|message| HashDocError::Hook {
                stage: HookStage::AfterSave,
                message,
            })?;
        Ok(key)
    }

    /// Every foreign key of this type must hold the key of an existing
    /// document. Values are normalized to the full referenced key.
    fn check_foreign_keys(&self, values: &mut Values) -> Result<()> {
        for fk in self.shared.dependencies.references_from(self.type_name()) {
            let missing = |detail: String| HashDocError::ForeignKeyMissing {
                document: self.type_name().to_string(),
                field: fk.field.clone(),
                detail,
            };

            let raw = values
                .get(&fk.field)
                .map(FieldValue::to_text)
                .ok_or_else(|| missing("is not set".into()))?;
            let target = sanitize_id(&fk.referenced, &raw, self.shared.delimiter)
                .map_err(|_| missing(format!("'{raw}' is not a {} key", fk.referenced)))?;
            if !self.shared.store.exists(&target)? {
                return Err(missing(format!("points to {target}, which does not exist")));
            }

            values.insert(fk.field.clone(), FieldValue::Reference(target));
        }
        Ok(())
    }

    /// No other document of this type may hold the same value in a unique
    /// field. Not atomic with the write that follows.
    fn check_unique(&self, key: &str, values: &Values) -> Result<()> {
        for field in self.definition.fields().iter().filter(|f| f.flags.unique) {
            let Some(value) = values.get(&field.name) else {
                continue;
            };
            let text = value.to_text();
            if text.trim().is_empty() {
                continue;
            }

            let kind = field.semantic_type.index_kind();
            let query = match kind {
                FieldKind::Numeric => format!("@{}:[{text} {text}]", field.name),
                FieldKind::Text => format!("@{}:\"{}\"", field.name, escape(&text)),
            };
            let request = SearchRequest::new(&query).window(0, usize::MAX);
            let response = self.shared.index.search(&self.index_name, &request)?;

            let taken = response.hits.iter().any(|hit| {
                hit.key != key
                    && hit
                        .fields
                        .get(&field.name)
                        .is_some_and(|stored| same_value(kind, stored, &text))
            });
            if taken {
                return Err(HashDocError::UniqueConstraint {
                    document: self.type_name().to_string(),
                    field: field.name.clone(),
                    value: text,
                });
            }
        }
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────

    /// The document stored under `id`, with its references resolved.
    /// Returns `None` when nothing is stored there.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        let key = self.key(id)?;
        let fields = self.shared.store.read_fields(&key)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let record = decode_record(&self.definition, &fields);
        self.discover(record).map(Some)
    }

    /// Like [`get`](Self::get), deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.get(id)? {
            Some(record) => Ok(Some(serde_json::from_value(Value::Object(record))?)),
            None => Ok(None),
        }
    }

    /// Replace each reference held in a dependant field with the referenced
    /// document. Only one level is resolved.
    pub fn discover(&self, mut record: Record) -> Result<Record> {
        for field in self.definition.dependant_fields() {
            let Some(Value::String(target)) = record.get(field) else {
                continue;
            };
            let target = target.clone();

            let definition = split_key(&target, self.shared.delimiter)
                .and_then(|(prefix, _)| self.shared.definitions.get(prefix));
            let Some(definition) = definition else {
                log::warn!("{}: {field} holds {target}, not a known key", self.type_name());
                continue;
            };

            let fields = self.shared.store.read_fields(&target)?;
            if fields.is_empty() {
                log::warn!("{}: {field} points to missing {target}", self.type_name());
                continue;
            }
            record.insert(
                field.to_string(),
                Value::Object(decode_record(definition, &fields)),
            );
        }
        Ok(record)
    }

    // ── Delete ───────────────────────────────────────────────────────

    /// Remove the document stored under `id`.
    ///
    /// Refused with `DeleteBlocked` while documents of a dependant type
    /// still hold its key.
    pub fn delete(&self, id: &str) -> Result<()> {
        let key = self.key(id)?;
        self.try_delete(&key).map_err(|source| {
            log::warn!("{}: delete of {key} rejected: {source}", self.type_name());
            match source {
                HashDocError::DeleteBlocked { .. } | HashDocError::Hook { .. } => source,
                source => HashDocError::DeleteFailed {
                    key: key.clone(),
                    source: Box::new(source),
                },
            }
        })
    }

    fn try_delete(&self, key: &str) -> Result<()> {
        self.guard_references(key)?;

        self.hooks
            .before_delete(key)
            .map_err(|message| HashDocError::Hook {
                stage: HookStage::BeforeDelete,
                message,
            })?;

        let removed = self.shared.store.delete(key)?;
        log::debug!("{}: delete {key} (removed: {removed})", self.type_name());

        self.hooks
            .after_delete(key)
            .map_err(|message| HashDocError::Hook {
                stage: HookStage::AfterDelete,
                message,
            })
    }

    fn guard_references(&self, key: &str) -> Result<()> {
        for fk in self.shared.dependencies.references_to(self.type_name()) {
            let index = index_name(&fk.dependent, self.shared.delimiter);
            let query = format!("@{}:{}", fk.field, escape(key));
            let response = self
                .shared
                .index
                .search(&index, &SearchRequest::new(&query).window(0, 0))?;
            if response.total > 0 {
                return Err(HashDocError::DeleteBlocked {
                    key: key.to_string(),
                    dependant: fk.dependent.clone(),
                });
            }
        }
        Ok(())
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Run a query against this type's index. Records come back decoded,
    /// with references resolved when the type has dependant fields.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        log::debug!("{}: search {:?}", self.type_name(), request.query);
        self.try_search(request)
            .map_err(|source| HashDocError::SearchFailed {
                query: request.query.clone(),
                source: Box::new(source),
            })
    }

    fn try_search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let response = self.shared.index.search(&self.index_name, request)?;
        let resolve = !self.definition.dependant_fields().is_empty();

        let docs = response
            .hits
            .iter()
            .map(|hit| {
                let record = decode_record(&self.definition, &hit.fields);
                if resolve {
                    self.discover(record)
                } else {
                    Ok(record)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchResult {
            total: response.total,
            docs,
        })
    }

    /// One page of `request`'s results. The window of `request` is
    /// ignored; the total comes from a separate count query.
    pub fn paginate(
        &self,
        request: &SearchRequest,
        page: usize,
        per_page: usize,
    ) -> Result<Page<Record>> {
        let total = self.search(&request.clone().window(0, 0))?.total;
        let offset = Page::<Record>::offset(page, per_page);
        let result = self.search(&request.clone().window(offset, per_page.max(1)))?;
        Ok(Page::new(page, per_page, total, result.docs))
    }

    /// Number of stored documents of this type.
    pub fn count(&self) -> Result<usize> {
        Ok(self.search(&SearchRequest::new("*").window(0, 0))?.total)
    }

    pub fn info(&self) -> Result<DocumentInfo> {
        let names = |list: Vec<&str>| list.into_iter().map(String::from).collect::<Vec<_>>();
        let type_name = self.type_name();

        Ok(DocumentInfo {
            type_name: type_name.to_string(),
            key_prefix: self.definition.key_prefix(self.shared.delimiter),
            index: self.index_name.clone(),
            fields: self.definition.fields().to_vec(),
            indexed_fields: names(self.definition.indexed_fields()),
            table_fields: names(self.definition.table_fields()),
            unique_fields: names(self.definition.unique_fields()),
            dependant_fields: names(self.definition.dependant_fields()),
            references: self
                .shared
                .dependencies
                .references_from(type_name)
                .map(|fk| fk.referenced.clone())
                .collect(),
            referenced_by: self
                .shared
                .dependencies
                .references_to(type_name)
                .map(|fk| fk.dependent.clone())
                .collect(),
            count: self.count()?,
        })
    }

    /// Project a record onto the `on_table` fields, in definition order.
    /// A resolved reference is shown by its key.
    pub fn table_row(&self, record: &Record) -> Vec<Value> {
        self.definition
            .table_fields()
            .into_iter()
            .map(|name| match record.get(name) {
                Some(Value::Object(nested)) => {
                    nested.get(ID_FIELD).cloned().unwrap_or(Value::Null)
                }
                Some(value) => value.clone(),
                None => Value::Null,
            })
            .collect()
    }
}

fn same_value(kind: FieldKind, stored: &str, text: &str) -> bool {
    match kind {
        FieldKind::Numeric => match (stored.trim().parse::<f64>(), text.trim().parse::<f64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        // Compared the way the index tokenizes it
        FieldKind::Text => tokenize(stored) == tokenize(&escape(text)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
