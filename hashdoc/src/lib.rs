pub mod database;
pub mod document;
pub mod engine;
pub mod error;
pub mod escape;
pub mod key;
pub mod pagination;
pub mod schema;
pub mod store;
pub mod validation;

pub use database::{Database, DatabaseBuilder, DependencyRegistry, ForeignKey};
pub use document::{FieldValue, Temporal, TemporalValue};
pub use engine::{DocumentEngine, DocumentHooks, DocumentInfo, Record, SearchResult};
pub use error::{ErrorKind, FieldErrors, HashDocError, HookStage, Result};
pub use pagination::Page;
pub use schema::{
    AutoIdStrategy, DocumentDefinition, FieldDefinition, FieldFormat, SchemaDefinition,
    SemanticType,
};
pub use store::{KeyStore, SearchIndex, SearchRequest, SqliteBackend};
