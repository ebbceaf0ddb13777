use serde_sarif::sarif::{Location, LogicalLocation, Message, Result as SarifResult};

use crate::ir::MethodId;
use crate::store::{DefUsePair, DefUseStore};

pub(crate) const UNCOVERED_RULE_ID: &str = "UNCOVERED_DEF_USE";

/// One result per feasible def-use pair no observation covered, in field order.
pub(crate) fn uncovered_pair_results(store: &DefUseStore) -> Vec<SarifResult> {
    let mut results = Vec::new();
    for (_, table) in store.fields() {
        for (pair, count) in &table.coverage {
            if *count == 0 {
                results.push(uncovered_pair_result(pair));
            }
        }
    }
    results
}

fn uncovered_pair_result(pair: &DefUsePair) -> SarifResult {
    let message = result_message(format!(
        "Uncovered def-use pair: {} defined at {} and used at {}",
        pair.field, pair.def, pair.use_site
    ));
    SarifResult::builder()
        .rule_id(UNCOVERED_RULE_ID)
        .message(message)
        .locations(vec![method_location(&pair.def.method)])
        .related_locations(vec![method_location(&pair.use_site.method)])
        .build()
}

pub(crate) fn method_location(method: &MethodId) -> Location {
    let logical = LogicalLocation::builder()
        .name(method.to_string())
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
