//! Applies remote records to the local store.
//!
//! Both the bulk-sync pages and the live subscription feed funnel through
//! this merge path. Writes carry the merger's own writer id, so the
//! mutation outbox and UI observers can exclude sync echoes, and a record
//! with a pending outgoing mutation is left untouched — the outbox owns
//! that record's fate until its mutation drains.

use crate::error::SyncResult;
use async_trait::async_trait;
use lagoon_storage::LocalStore;
use lagoon_types::{JsonObject, ModelDefinition, MutatorId, OpType, DELETED_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The engine's view of the mutation outbox: only pending-ness is consumed
/// here. Queueing and draining belong to the outbox itself.
#[async_trait]
pub trait MutationOutbox: Send + Sync {
    /// Whether a locally-originated mutation for this record is still
    /// awaiting upload.
    async fn has_pending_for(
        &self,
        model: &ModelDefinition,
        identifier: &str,
    ) -> SyncResult<bool>;
}

/// An outbox with nothing in it, for hosts without local mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyOutbox;

#[async_trait]
impl MutationOutbox for EmptyOutbox {
    async fn has_pending_for(
        &self,
        _model: &ModelDefinition,
        _identifier: &str,
    ) -> SyncResult<bool> {
        Ok(false)
    }
}

/// Merges normalized remote records into the local store.
pub struct PageMerger {
    store: Arc<LocalStore>,
    outbox: Arc<dyn MutationOutbox>,
    /// Writer id attached to every merge write.
    mutator: MutatorId,
}

impl PageMerger {
    pub fn new(store: Arc<LocalStore>, outbox: Arc<dyn MutationOutbox>) -> Self {
        Self {
            store,
            outbox,
            mutator: MutatorId::new(),
        }
    }

    /// The writer id merge writes carry; pass it to `observe(skip_mutator)`
    /// to exclude sync echoes.
    pub fn mutator(&self) -> MutatorId {
        self.mutator
    }

    /// Merges one remote record. Returns the applied operation, or `None`
    /// when the record was skipped because the outbox holds a pending
    /// mutation for it.
    pub async fn merge(&self, model: &str, record: JsonObject) -> SyncResult<Option<OpType>> {
        let definition = self.store.schema().model(model)?.clone();
        let identifier = definition.identifier_value(&record)?;

        if self.outbox.has_pending_for(&definition, &identifier).await? {
            debug!(model, identifier, "skipping merge, outbox mutation pending");
            return Ok(None);
        }

        if is_soft_deleted(&record) {
            let (_, deleted) = self
                .store
                .delete_record(model, &record, None, Some(self.mutator))
                .await?;
            return Ok((!deleted.is_empty()).then_some(OpType::Delete));
        }

        let applied = self
            .store
            .save(model, record, None, Some(self.mutator))
            .await?;
        Ok(applied.first().map(|(_, op)| *op))
    }

    /// Merges one bulk-sync page. Items are deduplicated by identifier
    /// first (the latest occurrence wins) so a page that carries several
    /// versions of a record applies only the newest.
    pub async fn merge_page(
        &self,
        model: &str,
        items: Vec<JsonObject>,
    ) -> SyncResult<Vec<(JsonObject, OpType)>> {
        let definition = self.store.schema().model(model)?.clone();

        let mut by_identifier: BTreeMap<String, JsonObject> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        for item in items {
            let identifier = definition.identifier_value(&item)?;
            if by_identifier.insert(identifier.clone(), item).is_none() {
                order.push(identifier);
            }
        }
        let page: Vec<JsonObject> = order
            .into_iter()
            .filter_map(|id| by_identifier.remove(&id))
            .collect();

        let applied = self
            .store
            .batch_save(model, page, Some(self.mutator))
            .await?;
        Ok(applied)
    }
}

fn is_soft_deleted(record: &JsonObject) -> bool {
    matches!(record.get(DELETED_FIELD), Some(Value::Bool(true)))
}
