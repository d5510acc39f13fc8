//! GraphQL operation documents for sync and subscriptions.
//!
//! The backend exposes one paginated delta-sync query per model and one
//! subscription per (model, mutation) pair, all following the generated
//! naming convention. Only the operations the engine drives are built here;
//! mutation documents belong to the outbox.

use crate::processor::subscription::MutationKind;
use lagoon_types::ModelDefinition;

/// Server-managed fields selected on every synced record.
const METADATA_SELECTION: &str = "_version _deleted _lastChangedAt";

fn pluralize(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else {
        format!("{name}s")
    }
}

fn selection_set(model: &ModelDefinition) -> String {
    let mut fields: Vec<&str> = model
        .fields
        .values()
        .filter(|f| f.association.is_none())
        .map(|f| f.name.as_str())
        .collect();
    let targets: Vec<&str> = model
        .fields
        .values()
        .filter_map(|f| f.association.as_ref())
        .flat_map(|a| a.target_names.iter().map(String::as_str))
        .collect();
    fields.extend(targets);
    fields.sort_unstable();
    fields.dedup();
    format!("{} {METADATA_SELECTION}", fields.join(" "))
}

/// Builds the delta-sync query for a model. Returns `(operation_name,
/// document)`; the operation pages with `limit`/`nextToken` and accepts an
/// optional `lastSync` watermark and server-side `filter`.
pub fn sync_operation(model: &ModelDefinition) -> (String, String) {
    let plural = pluralize(&model.name);
    let operation = format!("sync{plural}");
    let document = format!(
        "query Sync{plural}($filter: Model{name}FilterInput, $limit: Int, \
         $nextToken: String, $lastSync: Timestamp) {{\n  \
         {operation}(filter: $filter, limit: $limit, nextToken: $nextToken, \
         lastSync: $lastSync) {{\n    items {{ {selection} }}\n    nextToken\n    \
         startedAt\n  }}\n}}",
        name = model.name,
        selection = selection_set(model),
    );
    (operation, document)
}

/// Builds the subscription document for one (model, mutation) pair.
/// `owner_field` adds the owner argument owner-based auth requires;
/// `with_filter` adds the server-side filter variable.
pub fn subscription_operation(
    model: &ModelDefinition,
    kind: MutationKind,
    owner_field: Option<&str>,
    with_filter: bool,
) -> (String, String) {
    let operation = format!("on{}{}", kind.as_str(), model.name);
    let mut variable_defs = Vec::new();
    let mut arguments = Vec::new();
    if with_filter {
        variable_defs.push(format!(
            "$filter: ModelSubscription{}FilterInput",
            model.name
        ));
        arguments.push("filter: $filter".to_string());
    }
    if let Some(owner) = owner_field {
        variable_defs.push(format!("${owner}: String!"));
        arguments.push(format!("{owner}: ${owner}"));
    }
    let variables = if variable_defs.is_empty() {
        String::new()
    } else {
        format!("({})", variable_defs.join(", "))
    };
    let call = if arguments.is_empty() {
        operation.clone()
    } else {
        format!("{operation}({})", arguments.join(", "))
    };
    let document = format!(
        "subscription On{}{}{variables} {{\n  {call} {{ {selection} }}\n}}",
        kind.as_str(),
        model.name,
        selection = selection_set(model),
    );
    (operation, document)
}
