use crate::core::Result;
use crate::diff::UpdateOperators;
use crate::security::FieldMask;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Options for reads.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Fields to return; `_id` is always included.
    pub projection: Option<FieldMask>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, mask: FieldMask) -> Self {
        self.projection = Some(mask);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Document store the persistence path is written against.
///
/// Queries are plain documents (`{"path": value}` or `{"path": {"$in": [..]}}`);
/// updates are exactly what `query_from_update_set` produces. Failures
/// surface as `DocError::Store` and are never retried here.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        query: &JsonValue,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>>;

    async fn find(
        &self,
        collection: &str,
        query: &JsonValue,
        options: &FindOptions,
    ) -> Result<Vec<JsonValue>>;

    async fn count(&self, collection: &str, query: &JsonValue) -> Result<usize>;

    /// Stores a new document and returns it as stored.
    async fn insert(&self, collection: &str, document: JsonValue) -> Result<JsonValue>;

    /// Applies `update` to the first match and returns the updated document.
    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &JsonValue,
        update: &UpdateOperators,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>>;

    /// Removes the first match and returns it.
    async fn find_one_and_delete(&self, collection: &str, query: &JsonValue)
    -> Result<Option<JsonValue>>;
}
