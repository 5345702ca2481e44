use crate::schema::DocumentDefinition;
use serde::Serialize;

/// A foreign key: `dependent.field` holds keys of `referenced`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub dependent: String,
    pub referenced: String,
    pub field: String,
}

/// Foreign-key relationships between the registered document types.
#[derive(Debug, Clone, Default)]
pub struct DependencyRegistry {
    keys: Vec<ForeignKey>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` references `referenced` and flag the
    /// referencing field on `dependent`. Registering a pair again is a
    /// no-op; returns whether the pair was new.
    pub fn register(
        &mut self,
        dependent: &mut DocumentDefinition,
        referenced: &DocumentDefinition,
    ) -> bool {
        let field = referenced.reference_field_name();
        dependent.mark_dependant(&field);

        let key = ForeignKey {
            dependent: dependent.type_name().to_string(),
            referenced: referenced.type_name().to_string(),
            field,
        };
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Foreign keys checked when saving `type_name`.
    pub fn references_from<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a ForeignKey> {
        self.keys.iter().filter(move |k| k.dependent == type_name)
    }

    /// Foreign keys guarding deletes of `type_name`.
    pub fn references_to<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a ForeignKey> {
        self.keys.iter().filter(move |k| k.referenced == type_name)
    }

    pub fn all(&self) -> &[ForeignKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
