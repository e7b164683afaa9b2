use super::engine::{FindOptions, StoreDriver};
use super::operators::{apply_update, matches, project};
use crate::core::{DocError, Result};
use crate::diff::UpdateOperators;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Documents of one collection in insertion order.
#[derive(Debug, Default)]
pub struct Collection {
    documents: Vec<JsonValue>,
}

impl Collection {
    fn position(&self, query: &JsonValue) -> Option<usize> {
        self.documents.iter().position(|doc| matches(doc, query))
    }

    fn contains_id(&self, id: &JsonValue) -> bool {
        self.documents.iter().any(|doc| doc.get("_id") == Some(id))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// In-process driver.
///
/// Collections are created on first insert and each carries its own lock,
/// so work on different collections never contends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_collection(&self, name: &str) -> Option<Arc<RwLock<Collection>>> {
        self.collections.read().await.get(name).cloned()
    }

    async fn get_or_create(&self, name: &str) -> Arc<RwLock<Collection>> {
        if let Some(existing) = self.get_collection(name).await {
            return existing;
        }
        let mut collections = self.collections.write().await;
        collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::default())))
            .clone()
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn drop_collection(&self, name: &str) -> bool {
        self.collections.write().await.remove(name).is_some()
    }

    fn shape(doc: &JsonValue, options: &FindOptions) -> JsonValue {
        match &options.projection {
            Some(mask) => project(doc, mask),
            None => doc.clone(),
        }
    }
}

#[async_trait]
impl StoreDriver for MemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        query: &JsonValue,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>> {
        let Some(handle) = self.get_collection(collection).await else {
            return Ok(None);
        };
        let coll = handle.read().await;
        Ok(coll
            .documents
            .iter()
            .filter(|doc| matches(doc, query))
            .nth(options.skip.unwrap_or(0))
            .map(|doc| Self::shape(doc, options)))
    }

    async fn find(
        &self,
        collection: &str,
        query: &JsonValue,
        options: &FindOptions,
    ) -> Result<Vec<JsonValue>> {
        let Some(handle) = self.get_collection(collection).await else {
            return Ok(Vec::new());
        };
        let coll = handle.read().await;
        Ok(coll
            .documents
            .iter()
            .filter(|doc| matches(doc, query))
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|doc| Self::shape(doc, options))
            .collect())
    }

    async fn count(&self, collection: &str, query: &JsonValue) -> Result<usize> {
        let Some(handle) = self.get_collection(collection).await else {
            return Ok(0);
        };
        let coll = handle.read().await;
        Ok(coll.documents.iter().filter(|doc| matches(doc, query)).count())
    }

    async fn insert(&self, collection: &str, document: JsonValue) -> Result<JsonValue> {
        if !document.is_object() {
            return Err(DocError::Store("only objects can be inserted".into()));
        }
        let handle = self.get_or_create(collection).await;
        let mut coll = handle.write().await;

        if let Some(id) = document.get("_id") {
            if coll.contains_id(id) {
                return Err(DocError::Store(format!(
                    "duplicate _id {} in collection '{}'",
                    id, collection
                )));
            }
        }

        coll.documents.push(document.clone());
        Ok(document)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        query: &JsonValue,
        update: &UpdateOperators,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>> {
        let Some(handle) = self.get_collection(collection).await else {
            return Ok(None);
        };
        let mut coll = handle.write().await;
        let Some(index) = coll.position(query) else {
            return Ok(None);
        };

        // Work on a copy so a failing operator leaves the stored document untouched.
        let mut updated = coll.documents[index].clone();
        apply_update(&mut updated, update)?;
        let shaped = Self::shape(&updated, options);
        coll.documents[index] = updated;
        Ok(Some(shaped))
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        query: &JsonValue,
    ) -> Result<Option<JsonValue>> {
        let Some(handle) = self.get_collection(collection).await else {
            return Ok(None);
        };
        let mut coll = handle.write().await;
        Ok(coll.position(query).map(|index| coll.documents.remove(index)))
    }
}
