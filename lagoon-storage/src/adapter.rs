//! Storage adapter abstraction.
//!
//! Defines the trait the exclusive store drives, allowing the engine to run
//! against any record store. The adapter is never called directly by
//! application code; [`crate::LocalStore`] owns serialization and change
//! publication.

use crate::error::StorageResult;
use async_trait::async_trait;
use lagoon_types::{JsonObject, ModelDefinition, OpType, PredicateGroup};

/// Page window for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Zero-based page index.
    pub page: usize,
    /// Records per page.
    pub limit: usize,
}

/// A record store the exclusive facade can drive.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Upserts a record. When a stored record exists and `condition` is
    /// present, the condition is checked against the stored record before
    /// the write. Returns the applied records with their operation kinds.
    async fn save(
        &self,
        model: &ModelDefinition,
        record: JsonObject,
        condition: Option<&PredicateGroup>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>>;

    /// Applies a page of records in one pass. Records carrying a truthy
    /// soft-delete marker are removed; everything else is upserted.
    async fn batch_save(
        &self,
        model: &ModelDefinition,
        items: Vec<JsonObject>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>>;

    /// Fetches a record by identifier.
    async fn get(
        &self,
        model: &ModelDefinition,
        identifier: &str,
    ) -> StorageResult<Option<JsonObject>>;

    /// Deletes every record matching `predicate` (all records when absent).
    /// Returns the deleted records.
    async fn delete(
        &self,
        model: &ModelDefinition,
        predicate: Option<&PredicateGroup>,
    ) -> StorageResult<Vec<JsonObject>>;

    /// Deletes one record by identifier. Returns it if it existed.
    async fn delete_by_id(
        &self,
        model: &ModelDefinition,
        identifier: &str,
    ) -> StorageResult<Option<JsonObject>>;

    /// Queries records matching `predicate`, in identifier order.
    async fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&PredicateGroup>,
        pagination: Option<Pagination>,
    ) -> StorageResult<Vec<JsonObject>>;

    /// Removes every record of every model.
    async fn clear(&self) -> StorageResult<()>;
}
