//! In-memory storage adapter.
//!
//! Keeps records in sorted maps keyed by identifier. The default adapter for
//! tests and for hosts that do not configure durable storage.

use crate::adapter::{Pagination, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use lagoon_types::{
    JsonObject, ModelDefinition, OpType, PredicateGroup, DELETED_FIELD, LAST_CHANGED_AT_FIELD,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Record store backed by process memory.
#[derive(Default)]
pub struct InMemoryAdapter {
    /// Model name -> identifier -> record.
    tables: RwLock<BTreeMap<String, BTreeMap<String, JsonObject>>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_soft_deleted(record: &JsonObject) -> bool {
    matches!(record.get(DELETED_FIELD), Some(Value::Bool(true)))
}

/// Stamps the last-changed timestamp when the caller did not provide one,
/// so locally-originated records carry a change time like synced ones do.
fn stamp_last_changed(record: &mut JsonObject) {
    record
        .entry(LAST_CHANGED_AT_FIELD)
        .or_insert_with(|| Value::from(Utc::now().timestamp_millis()));
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn save(
        &self,
        model: &ModelDefinition,
        mut record: JsonObject,
        condition: Option<&PredicateGroup>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>> {
        let identifier = model.identifier_value(&record)?;
        let mut tables = self.tables.write().await;
        let table = tables.entry(model.name.clone()).or_default();

        let op = if let Some(existing) = table.get(&identifier) {
            if let Some(condition) = condition {
                if !condition.matches(existing) {
                    return Err(StorageError::SaveConditionNotMet {
                        model: model.name.clone(),
                    });
                }
            }
            OpType::Update
        } else {
            OpType::Insert
        };

        stamp_last_changed(&mut record);
        table.insert(identifier, record.clone());
        Ok(vec![(record, op)])
    }

    async fn batch_save(
        &self,
        model: &ModelDefinition,
        items: Vec<JsonObject>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(model.name.clone()).or_default();
        let mut applied = Vec::with_capacity(items.len());

        for item in items {
            let identifier = model.identifier_value(&item)?;
            if is_soft_deleted(&item) {
                table.remove(&identifier);
                applied.push((item, OpType::Delete));
            } else {
                let op = if table.contains_key(&identifier) {
                    OpType::Update
                } else {
                    OpType::Insert
                };
                table.insert(identifier, item.clone());
                applied.push((item, op));
            }
        }

        Ok(applied)
    }

    async fn get(
        &self,
        model: &ModelDefinition,
        identifier: &str,
    ) -> StorageResult<Option<JsonObject>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&model.name)
            .and_then(|table| table.get(identifier))
            .cloned())
    }

    async fn delete(
        &self,
        model: &ModelDefinition,
        predicate: Option<&PredicateGroup>,
    ) -> StorageResult<Vec<JsonObject>> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&model.name) else {
            return Ok(Vec::new());
        };
        let matching: Vec<String> = table
            .iter()
            .filter(|&(_, record)| predicate.is_none_or(|p| p.matches(record)))
            .map(|(id, _)| id.clone())
            .collect();
        let mut deleted = Vec::with_capacity(matching.len());
        for id in matching {
            if let Some(record) = table.remove(&id) {
                deleted.push(record);
            }
        }
        Ok(deleted)
    }

    async fn delete_by_id(
        &self,
        model: &ModelDefinition,
        identifier: &str,
    ) -> StorageResult<Option<JsonObject>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(&model.name)
            .and_then(|table| table.remove(identifier)))
    }

    async fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&PredicateGroup>,
        pagination: Option<Pagination>,
    ) -> StorageResult<Vec<JsonObject>> {
        let tables = self.tables.read().await;
        let mut records: Vec<JsonObject> = tables
            .get(&model.name)
            .map(|table| {
                table
                    .values()
                    .filter(|&record| predicate.is_none_or(|p| p.matches(record)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(Pagination { page, limit }) = pagination {
            let start = page.saturating_mul(limit).min(records.len());
            let end = start.saturating_add(limit).min(records.len());
            records = records[start..end].to_vec();
        }
        Ok(records)
    }

    async fn clear(&self) -> StorageResult<()> {
        self.tables.write().await.clear();
        Ok(())
    }
}
