//! Replacement-chain discovery (§4.5): builds a `name -> CSV` map per
//! namespace and walks `replaces` backwards to find, for every CSV, the
//! successor (if any) that names it in `spec.replaces`. The CSV phase
//! function uses this to implement "Succeeded/Failed -> Replacing" and
//! "Replacing -> Deleting once successor Succeeded".

use std::collections::HashMap;

use crate::crd::csv::CsvPhase;

/// The minimal view of a CSV needed to walk a replacement chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvSummary {
    pub name: String,
    pub phase: CsvPhase,
    pub replaces: Option<String>,
}

/// For every CSV named in some other CSV's `replaces`, the successor's name
/// and phase. Built once per namespace per reconciliation (§5: "the
/// replacement-chain map is rebuilt per reconciliation and never shared").
pub fn successors(csvs: &[CsvSummary]) -> HashMap<String, (String, CsvPhase)> {
    let mut map = HashMap::new();
    for csv in csvs {
        if let Some(predecessor) = &csv.replaces {
            map.insert(predecessor.clone(), (csv.name.clone(), csv.phase));
        }
    }
    map
}

/// Names of CSVs that should be batch-marked Deleting this reconciliation:
/// every predecessor whose direct successor has reached Succeeded.
/// Walking the whole chain (not just direct successors) lets a long chain
/// A -> B -> C collapse in one pass once C succeeds, since `successors`
/// already gives each node its immediate successor and Deleting is itself
/// monotonic once reached.
pub fn names_ready_for_deletion(csvs: &[CsvSummary]) -> Vec<String> {
    let successor_map = successors(csvs);
    csvs.iter()
        .filter(|csv| csv.phase != CsvPhase::Deleting)
        .filter_map(|csv| {
            successor_map
                .get(&csv.name)
                .filter(|(_, phase)| *phase == CsvPhase::Succeeded)
                .map(|_| csv.name.clone())
        })
        .collect()
}
