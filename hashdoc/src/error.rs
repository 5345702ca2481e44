use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-field validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for one field, empty if none.
    pub fn field(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Lifecycle stage a user hook failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookStage::BeforeSave => "before_save",
            HookStage::AfterSave => "after_save",
            HookStage::BeforeDelete => "before_delete",
            HookStage::AfterDelete => "after_delete",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum HashDocError {
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Type error: field '{field}' cannot store a {found} value")]
    Type { field: String, found: String },

    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    #[error("Foreign key missing: {document}.{field} {detail}")]
    ForeignKeyMissing {
        document: String,
        field: String,
        detail: String,
    },

    #[error("Unique constraint violated: {document}.{field} = '{value}' already exists")]
    UniqueConstraint {
        document: String,
        field: String,
        value: String,
    },

    #[error("Cannot delete {key}: documents in {dependant} still reference it")]
    DeleteBlocked { key: String, dependant: String },

    #[error("Hook {stage} failed: {message}")]
    Hook { stage: HookStage, message: String },

    #[error("Save failed: {source}")]
    SaveFailed {
        payload: Box<serde_json::Value>,
        #[source]
        source: Box<HashDocError>,
    },

    #[error("Delete of {key} failed: {source}")]
    DeleteFailed {
        key: String,
        #[source]
        source: Box<HashDocError>,
    },

    #[error("Search '{query}' failed: {source}")]
    SearchFailed {
        query: String,
        #[source]
        source: Box<HashDocError>,
    },

    #[error("Unknown document type: {0}")]
    UnknownDocument(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Coarse classification of a [`HashDocError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidKey,
    Type,
    Validation,
    ForeignKeyMissing,
    UniqueConstraint,
    DeleteBlocked,
    Hook,
    SaveFailed,
    DeleteFailed,
    SearchFailed,
    UnknownDocument,
    Schema,
    Query,
    Adapter,
}

impl HashDocError {
    /// The most specific kind of this error.
    ///
    /// `SaveFailed`, `DeleteFailed` and `SearchFailed` report the kind of
    /// their cause when the cause is a rule violation; adapter failures
    /// keep the wrapper's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HashDocError::InvalidKey { .. } => ErrorKind::InvalidKey,
            HashDocError::Type { .. } => ErrorKind::Type,
            HashDocError::Validation(_) => ErrorKind::Validation,
            HashDocError::ForeignKeyMissing { .. } => ErrorKind::ForeignKeyMissing,
            HashDocError::UniqueConstraint { .. } => ErrorKind::UniqueConstraint,
            HashDocError::DeleteBlocked { .. } => ErrorKind::DeleteBlocked,
            HashDocError::Hook { .. } => ErrorKind::Hook,
            HashDocError::SaveFailed { source, .. } => {
                source.rule_kind().unwrap_or(ErrorKind::SaveFailed)
            }
            HashDocError::DeleteFailed { source, .. } => {
                source.rule_kind().unwrap_or(ErrorKind::DeleteFailed)
            }
            HashDocError::SearchFailed { source, .. } => {
                source.rule_kind().unwrap_or(ErrorKind::SearchFailed)
            }
            HashDocError::UnknownDocument(_) => ErrorKind::UnknownDocument,
            HashDocError::Schema(_) => ErrorKind::Schema,
            HashDocError::Query(_) => ErrorKind::Query,
            HashDocError::Store(_)
            | HashDocError::Io(_)
            | HashDocError::Yaml(_)
            | HashDocError::Json(_)
            | HashDocError::Sqlite(_) => ErrorKind::Adapter,
        }
    }

    fn rule_kind(&self) -> Option<ErrorKind> {
        match self.kind() {
            kind @ (ErrorKind::InvalidKey
            | ErrorKind::Type
            | ErrorKind::Validation
            | ErrorKind::ForeignKeyMissing
            | ErrorKind::UniqueConstraint
            | ErrorKind::DeleteBlocked
            | ErrorKind::Hook) => Some(kind),
            _ => None,
        }
    }

    /// The input that was being processed when the operation failed.
    pub fn payload(&self) -> Option<serde_json::Value> {
        match self {
            HashDocError::SaveFailed { payload, .. } => Some((**payload).clone()),
            HashDocError::DeleteFailed { key, .. } => Some(serde_json::json!({ "id": key })),
            HashDocError::SearchFailed { query, .. } => {
                Some(serde_json::json!({ "query": query }))
            }
            _ => None,
        }
    }

    /// Per-field messages when this is (or wraps) a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            HashDocError::Validation(errors) => Some(errors),
            HashDocError::SaveFailed { source, .. } => source.field_errors(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HashDocError>;
