// Storage and search adapter contracts

pub mod query;
pub mod sqlite;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use sqlite::SqliteBackend;

/// Field map of one stored hash.
pub type Fields = BTreeMap<String, String>;

/// Byte-string keyed store holding plain values and field hashes.
///
/// Implementations serialize single-key operations; there is no
/// multi-key atomicity.
pub trait KeyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically increment the integer at `key`, creating it at 1.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Remove `key`. Returns whether anything was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Set the given fields of the hash at `key`, keeping its other fields.
    fn write_fields(&self, key: &str, fields: &Fields) -> Result<()>;

    /// All fields of the hash at `key`; empty if the key is absent.
    fn read_fields(&self, key: &str) -> Result<Fields>;
}

/// How an indexed field is matched and sorted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Numeric,
}

/// One field of a search index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub sortable: bool,
}

/// A sorted, windowed query against one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub sort_by: String,
    pub ascending: bool,
    pub offset: usize,
    pub limit: usize,
    /// Maximum edit distance tolerated when matching terms.
    pub fuzziness: u8,
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        SearchRequest {
            query: query.to_string(),
            sort_by: "id".to_string(),
            ascending: true,
            offset: 0,
            limit: 10,
            fuzziness: 0,
        }
    }

    pub fn sort_by(mut self, field: &str, ascending: bool) -> Self {
        self.sort_by = field.to_string();
        self.ascending = ascending;
        self
    }

    pub fn window(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn fuzziness(mut self, fuzziness: u8) -> Self {
        self.fuzziness = fuzziness;
        self
    }
}

/// A stored record returned by the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHit {
    pub key: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    /// Number of matching records, regardless of the window.
    pub total: usize,
    pub hits: Vec<IndexHit>,
}

/// Per document type secondary index over the hashes sharing a key prefix.
pub trait SearchIndex: Send + Sync {
    /// Create the index `name` unless it exists. Returns whether it was
    /// created; an existing index is left untouched.
    fn ensure_index(&self, name: &str, fields: &[FieldSpec], key_prefix: &str) -> Result<bool>;

    fn search(&self, name: &str, request: &SearchRequest) -> Result<SearchResponse>;
}
