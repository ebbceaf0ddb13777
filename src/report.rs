use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::store::{DefUseStore, FieldTable};
use crate::tracker::TrackerStats;

/// Def, use and pair counts with their coverage ratios.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub(crate) struct Counters {
    pub(crate) defs: usize,
    pub(crate) uses: usize,
    pub(crate) pairs: usize,
    pub(crate) covered_defs: usize,
    pub(crate) covered_uses: usize,
    pub(crate) covered_pairs: usize,
    /// `None` when there is nothing to cover.
    pub(crate) def_ratio: Option<f64>,
    pub(crate) use_ratio: Option<f64>,
    pub(crate) pair_ratio: Option<f64>,
}

impl Counters {
    fn of_field(table: &FieldTable) -> Self {
        let covered: Vec<_> = table.covered_pairs().collect();
        let covered_defs: BTreeSet<_> = covered.iter().map(|pair| &pair.def).collect();
        let covered_uses: BTreeSet<_> = covered.iter().map(|pair| &pair.use_site).collect();
        Self {
            defs: table.def_sites().len(),
            uses: table.use_sites().len(),
            pairs: table.coverage.len(),
            covered_defs: covered_defs.len(),
            covered_uses: covered_uses.len(),
            covered_pairs: covered.len(),
            ..Self::default()
        }
        .with_ratios()
    }

    fn add(&mut self, other: &Counters) {
        self.defs += other.defs;
        self.uses += other.uses;
        self.pairs += other.pairs;
        self.covered_defs += other.covered_defs;
        self.covered_uses += other.covered_uses;
        self.covered_pairs += other.covered_pairs;
    }

    fn with_ratios(self) -> Self {
        Self {
            def_ratio: ratio(self.covered_defs, self.defs),
            use_ratio: ratio(self.covered_uses, self.uses),
            pair_ratio: ratio(self.covered_pairs, self.pairs),
            ..self
        }
    }
}

fn ratio(covered: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| covered as f64 / total as f64)
}

#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct ClassReport {
    pub(crate) totals: Counters,
    /// Keyed by `name:descriptor`.
    pub(crate) fields: BTreeMap<String, Counters>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct CoverageReport {
    pub(crate) totals: Counters,
    pub(crate) classes: BTreeMap<String, ClassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) trace: Option<TrackerStats>,
}

/// Aggregate the coverage table of every field into class and overall totals.
pub(crate) fn build_report(store: &DefUseStore, trace: Option<TrackerStats>) -> CoverageReport {
    let mut classes: BTreeMap<String, ClassReport> = BTreeMap::new();
    for (field, table) in store.fields() {
        let counters = Counters::of_field(table);
        let class = classes.entry(field.owner.clone()).or_default();
        class.totals.add(&counters);
        class
            .fields
            .insert(format!("{}:{}", field.name, field.descriptor), counters);
    }

    let mut totals = Counters::default();
    for class in classes.values_mut() {
        totals.add(&class.totals);
        class.totals = class.totals.with_ratios();
    }
    CoverageReport {
        totals: totals.with_ratios(),
        classes,
        trace,
    }
}
