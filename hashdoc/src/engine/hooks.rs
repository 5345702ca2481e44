use serde_json::{Map, Value};

/// User callbacks around the save and delete of one document type.
///
/// Every method defaults to a no-op. A returned error message aborts the
/// operation with a `Hook` error; `after_*` hooks run once the store has
/// already changed, so their failure does not undo the write.
pub trait DocumentHooks: Send + Sync {
    /// Runs after the built-in checks and before timestamps are stamped.
    /// The returned document is the one written.
    fn before_save(&self, doc: Map<String, Value>) -> Result<Map<String, Value>, String> {
        Ok(doc)
    }

    fn after_save(&self, _doc: &Map<String, Value>, _key: &str) -> Result<(), String> {
        Ok(())
    }

    /// Runs after the reference guard has allowed the delete.
    fn before_delete(&self, _key: &str) -> Result<(), String> {
        Ok(())
    }

    fn after_delete(&self, _key: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl DocumentHooks for NoHooks {}
