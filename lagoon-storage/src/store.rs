//! The exclusive storage facade.
//!
//! Every mutation and query runs inside one critical section owned by the
//! store instance, so concurrent callers observe a strict total order of
//! applied writes. The store is also the single source of the change-event
//! stream: adapters never publish, and nothing else may write around the
//! facade.

use crate::adapter::{Pagination, StorageAdapter};
use crate::diff;
use crate::error::{StorageError, StorageResult};
use lagoon_types::{
    ChangeEvent, JsonObject, ModelSchema, MutatorId, OpType, PredicateGroup,
};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Capacity of the change broadcast channel. Observers that fall further
/// behind than this lose the oldest events and are warned.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Mutex-serialized local persistence facade.
///
/// All five public operations go through [`LocalStore`]; `save`, `delete`,
/// `query`, and `clear` each acquire the store's exclusive lock for their
/// full duration. `observe` only subscribes to the change stream and never
/// blocks writers.
pub struct LocalStore {
    schema: Arc<ModelSchema>,
    adapter: Arc<dyn StorageAdapter>,
    /// The single exclusive critical section for every mutation and query.
    gate: Mutex<()>,
    /// Swapped for a fresh sender on `clear`, which ends existing streams.
    changes: StdMutex<broadcast::Sender<ChangeEvent>>,
}

impl LocalStore {
    pub fn new(schema: Arc<ModelSchema>, adapter: Arc<dyn StorageAdapter>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            schema,
            adapter,
            gate: Mutex::new(()),
            changes: StdMutex::new(changes),
        }
    }

    /// The schema this store was loaded with.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Saves a record, returning the applied records with operation kinds.
    ///
    /// Updates not originated by the sync path are reduced to a minimal
    /// changed-fields input before publication; an update that changes no
    /// user-visible field is applied silently and emits no change event.
    pub async fn save(
        &self,
        model: &str,
        record: JsonObject,
        condition: Option<&PredicateGroup>,
        mutator: Option<MutatorId>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>> {
        let _guard = self.gate.lock().await;
        let definition = self.schema.model(model)?;
        let identifier = definition.identifier_value(&record)?;
        let prior = self.adapter.get(definition, &identifier).await?;
        let applied = self.adapter.save(definition, record, condition).await?;

        for (saved, op_type) in &applied {
            // The sync path passes its own mutator and saves full remote
            // records; only locally-originated updates are diffed.
            let element = if *op_type == OpType::Update && mutator.is_none() {
                let Some(prior) = prior.as_ref() else {
                    continue;
                };
                match diff::changed_fields_input(definition, saved, prior) {
                    Some(input) => input,
                    None => {
                        debug!(model, "update changed no fields, suppressing event");
                        continue;
                    }
                }
            } else {
                saved.clone()
            };

            self.publish(ChangeEvent {
                model: definition.name.clone(),
                op_type: *op_type,
                element,
                mutator,
                condition: condition.cloned(),
                saved_element: Some(saved.clone()),
            });
        }

        Ok(applied)
    }

    /// Applies one page of remote records in a single critical section.
    /// Items are deduplicated upstream; every applied record emits one
    /// change event carrying the caller's mutator.
    pub async fn batch_save(
        &self,
        model: &str,
        items: Vec<JsonObject>,
        mutator: Option<MutatorId>,
    ) -> StorageResult<Vec<(JsonObject, OpType)>> {
        let _guard = self.gate.lock().await;
        let definition = self.schema.model(model)?;
        let applied = self.adapter.batch_save(definition, items).await?;

        for (saved, op_type) in &applied {
            self.publish(ChangeEvent {
                model: definition.name.clone(),
                op_type: *op_type,
                element: saved.clone(),
                mutator,
                condition: None,
                saved_element: Some(saved.clone()),
            });
        }

        Ok(applied)
    }

    /// Deletes every record of `model` matching `predicate` (all records
    /// when absent). Returns `(affected, deleted)`.
    pub async fn delete(
        &self,
        model: &str,
        predicate: Option<&PredicateGroup>,
        mutator: Option<MutatorId>,
    ) -> StorageResult<(Vec<JsonObject>, Vec<JsonObject>)> {
        let _guard = self.gate.lock().await;
        let definition = self.schema.model(model)?;
        let deleted = self.adapter.delete(definition, predicate).await?;

        for record in &deleted {
            self.publish(ChangeEvent {
                model: definition.name.clone(),
                op_type: OpType::Delete,
                element: record.clone(),
                mutator,
                // The predicate selected records to delete; it is not a
                // per-record condition, so events carry none.
                condition: None,
                saved_element: None,
            });
        }

        Ok((deleted.clone(), deleted))
    }

    /// Deletes one record, checking `condition` against the stored value
    /// first. Returns `(affected, deleted)`.
    pub async fn delete_record(
        &self,
        model: &str,
        record: &JsonObject,
        condition: Option<&PredicateGroup>,
        mutator: Option<MutatorId>,
    ) -> StorageResult<(Vec<JsonObject>, Vec<JsonObject>)> {
        let _guard = self.gate.lock().await;
        let definition = self.schema.model(model)?;
        let identifier = definition.identifier_value(record)?;

        let Some(existing) = self.adapter.get(definition, &identifier).await? else {
            return Ok((Vec::new(), Vec::new()));
        };
        if let Some(condition) = condition {
            if !condition.matches(&existing) {
                return Err(StorageError::DeleteConditionNotMet {
                    model: definition.name.clone(),
                });
            }
        }

        let deleted = self
            .adapter
            .delete_by_id(definition, &identifier)
            .await?
            .map(|r| vec![r])
            .unwrap_or_default();

        for record in &deleted {
            self.publish(ChangeEvent {
                model: definition.name.clone(),
                op_type: OpType::Delete,
                element: record.clone(),
                mutator,
                condition: condition.cloned(),
                saved_element: None,
            });
        }

        Ok((deleted.clone(), deleted))
    }

    /// Queries records matching `predicate`, in identifier order.
    pub async fn query(
        &self,
        model: &str,
        predicate: Option<&PredicateGroup>,
        pagination: Option<Pagination>,
    ) -> StorageResult<Vec<JsonObject>> {
        let _guard = self.gate.lock().await;
        let definition = self.schema.model(model)?;
        self.adapter.query(definition, predicate, pagination).await
    }

    /// Removes every record and completes the current change stream.
    /// Observers created after `clear` attach to a fresh stream.
    pub async fn clear(&self) -> StorageResult<()> {
        let _guard = self.gate.lock().await;
        self.adapter.clear().await?;
        let (fresh, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        *self.changes.lock().unwrap_or_else(|e| e.into_inner()) = fresh;
        Ok(())
    }

    /// Opens a change stream.
    ///
    /// - `model` restricts the stream to one model's events
    /// - `predicate` drops events whose element does not match; evaluation
    ///   failure counts as a non-match
    /// - `skip_mutator` suppresses the caller's own write echoes
    pub fn observe(
        &self,
        model: Option<&str>,
        predicate: Option<PredicateGroup>,
        skip_mutator: Option<MutatorId>,
    ) -> ChangeStream {
        let receiver = self
            .changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribe();
        ChangeStream {
            receiver,
            model: model.map(String::from),
            predicate,
            skip_mutator,
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // Send fails only when no observer is attached, which is fine.
        let _ = self
            .changes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .send(event);
    }
}

/// A filtered view of the store's change stream.
pub struct ChangeStream {
    receiver: broadcast::Receiver<ChangeEvent>,
    model: Option<String>,
    predicate: Option<PredicateGroup>,
    skip_mutator: Option<MutatorId>,
}

impl ChangeStream {
    /// The next matching change event, or `None` once the stream completes
    /// (the store was cleared or dropped).
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if !self.accepts(&event) {
                        continue;
                    }
                    let mut event = event;
                    // The mutator exists for echo suppression only; it is
                    // not part of the observable contract.
                    event.mutator = None;
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "change stream observer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        if let (Some(skip), Some(mutator)) = (self.skip_mutator, event.mutator) {
            if skip == mutator {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &event.model != model {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate.matches(&event.element) {
                return false;
            }
        }
        true
    }
}
