use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::cfg::GraphCache;
use crate::heuristics::HeuristicsConfig;
use crate::hierarchy::Program;
use crate::ir::{FieldId, MethodId};
use crate::reachability::{clear_path_between, clear_path_from_start, clear_path_to_end};

/// Program point: a method and a bytecode offset inside it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub(crate) struct Site {
    pub(crate) method: MethodId,
    pub(crate) offset: u32,
}

impl Site {
    pub(crate) fn new(method: MethodId, offset: u32) -> Self {
        Self { method, offset }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.method, self.offset)
    }
}

/// Definition and use of the same field.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub(crate) struct DefUsePair {
    pub(crate) field: FieldId,
    pub(crate) def: Site,
    #[serde(rename = "use")]
    pub(crate) use_site: Site,
}

/// Sites and coverage counters of one field.
#[derive(Clone, Debug, Default)]
pub(crate) struct FieldTable {
    pub(crate) definitions: BTreeSet<Site>,
    pub(crate) uses: BTreeSet<Site>,
    /// Call sites whose effect on the field is a guess, tagged with the callee.
    pub(crate) pending: BTreeMap<Site, MethodId>,
    /// Feasible pairs only. A counter above zero means the pair was observed at runtime.
    pub(crate) coverage: BTreeMap<DefUsePair, u64>,
}

impl FieldTable {
    /// Definition sites, counting def-or-use sites once.
    pub(crate) fn def_sites(&self) -> BTreeSet<&Site> {
        self.definitions.iter().chain(self.pending.keys()).collect()
    }

    pub(crate) fn use_sites(&self) -> BTreeSet<&Site> {
        self.uses.iter().chain(self.pending.keys()).collect()
    }

    pub(crate) fn covered_pairs(&self) -> impl Iterator<Item = &DefUsePair> {
        self.coverage
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(pair, _)| pair)
    }

    fn definition_offsets(&self, method: &MethodId) -> BTreeSet<u32> {
        self.definitions
            .iter()
            .filter(|site| &site.method == method)
            .map(|site| site.offset)
            .collect()
    }
}

/// Single-offset checks reusable across the pairs of one field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
enum Check {
    /// The definition survives to some exit of its method.
    SurvivesToExit,
    /// The use is reachable from the method entry without another definition.
    ReachedFromEntry,
}

/// Per-field def/use tables plus the coverage table built from them.
#[derive(Debug, Default)]
pub(crate) struct DefUseStore {
    fields: BTreeMap<FieldId, FieldTable>,
    feasibility_cache: HashMap<(Site, Check), bool>,
}

impl DefUseStore {
    /// Register a field so it is reported even without accesses.
    pub(crate) fn add_field(&mut self, field: FieldId) {
        self.fields.entry(field).or_default();
    }

    pub(crate) fn add_definition(&mut self, field: &FieldId, method: &MethodId, offset: u32) {
        self.table_mut(field)
            .definitions
            .insert(Site::new(method.clone(), offset));
    }

    pub(crate) fn add_use(&mut self, field: &FieldId, method: &MethodId, offset: u32) {
        self.table_mut(field)
            .uses
            .insert(Site::new(method.clone(), offset));
    }

    /// Record a site whose role depends on the unknown side effects of `callee`.
    pub(crate) fn add_def_or_use(
        &mut self,
        field: &FieldId,
        method: &MethodId,
        offset: u32,
        callee: &MethodId,
    ) {
        self.table_mut(field)
            .pending
            .entry(Site::new(method.clone(), offset))
            .or_insert_with(|| callee.clone());
    }

    fn table_mut(&mut self, field: &FieldId) -> &mut FieldTable {
        self.fields.entry(field.clone()).or_default()
    }

    pub(crate) fn table(&self, field: &FieldId) -> Option<&FieldTable> {
        self.fields.get(field)
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&FieldId, &FieldTable)> {
        self.fields.iter()
    }

    /// Materialize the feasible def-use pairs of every field.
    pub(crate) fn populate(
        &mut self,
        program: &Program,
        graphs: &mut GraphCache,
        config: &HeuristicsConfig,
    ) {
        let fields: Vec<FieldId> = self.fields.keys().cloned().collect();
        for field in fields {
            self.populate_field(&field, program, graphs, config);
        }
    }

    /// Materialize the feasible def-use pairs of one field. Existing counters are kept.
    pub(crate) fn populate_field(
        &mut self,
        field: &FieldId,
        program: &Program,
        graphs: &mut GraphCache,
        config: &HeuristicsConfig,
    ) {
        let Some(table) = self.fields.get_mut(field) else {
            return;
        };
        let cache = &mut self.feasibility_cache;
        let defs: Vec<Site> = table.def_sites().into_iter().cloned().collect();
        let uses: Vec<Site> = table.use_sites().into_iter().cloned().collect();
        let mut feasible = Vec::new();

        for def in &defs {
            for use_site in &uses {
                if def == use_site {
                    continue;
                }
                if config.is_trivial_accessor_pair(&def.method, &use_site.method) {
                    log::trace!("skipping accessor pair {} -> {}", def, use_site);
                    continue;
                }
                let ok = if def.method == use_site.method {
                    same_method_feasible(table, program, graphs, def, use_site)
                } else {
                    cached_check(cache, table, program, graphs, def, Check::SurvivesToExit)
                        && cached_check(
                            cache,
                            table,
                            program,
                            graphs,
                            use_site,
                            Check::ReachedFromEntry,
                        )
                };
                if ok {
                    feasible.push(DefUsePair {
                        field: field.clone(),
                        def: def.clone(),
                        use_site: use_site.clone(),
                    });
                } else {
                    log::trace!("infeasible pair {} -> {} for {}", def, use_site, field);
                }
            }
        }

        for pair in feasible {
            table.coverage.entry(pair).or_insert(0);
        }
        cache.clear();
    }

    /// Count a runtime observation of a def-use relation. Returns false, and leaves the
    /// table untouched, when no feasible static pair matches.
    pub(crate) fn update_coverage(
        &mut self,
        field: &FieldId,
        def_method: &MethodId,
        def_offset: u32,
        use_method: &MethodId,
        use_offset: u32,
    ) -> bool {
        let pair = DefUsePair {
            field: field.clone(),
            def: Site::new(def_method.clone(), def_offset),
            use_site: Site::new(use_method.clone(), use_offset),
        };
        let covered = self.cover(&pair);
        if !covered {
            log::info!(
                "observed def-use relation without static pair: {} {} -> {}",
                field,
                pair.def,
                pair.use_site
            );
        }
        covered
    }

    /// Increment the counter of `pair` if it exists, without logging a miss.
    pub(crate) fn cover(&mut self, pair: &DefUsePair) -> bool {
        match self
            .fields
            .get_mut(&pair.field)
            .and_then(|table| table.coverage.get_mut(pair))
        {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }
}

fn same_method_feasible(
    table: &FieldTable,
    program: &Program,
    graphs: &mut GraphCache,
    def: &Site,
    use_site: &Site,
) -> bool {
    let Some(method) = program.method(&def.method) else {
        log::debug!("{} not found; assuming {} reaches {}", def.method, def, use_site);
        return true;
    };
    let graph = graphs.get_or_build(method);
    if graph.is_empty() {
        return true;
    }
    let mut blocked = table.definition_offsets(&def.method);
    blocked.remove(&def.offset);
    clear_path_between(&graph, def.offset, use_site.offset, &blocked)
}

fn cached_check(
    cache: &mut HashMap<(Site, Check), bool>,
    table: &FieldTable,
    program: &Program,
    graphs: &mut GraphCache,
    site: &Site,
    check: Check,
) -> bool {
    let key = (site.clone(), check);
    if let Some(result) = cache.get(&key) {
        return *result;
    }
    let result = match program.method(&site.method) {
        Some(method) => {
            let graph = graphs.get_or_build(method);
            let mut blocked = table.definition_offsets(&site.method);
            blocked.remove(&site.offset);
            if graph.is_empty() {
                true
            } else {
                match check {
                    Check::SurvivesToExit => clear_path_to_end(&graph, site.offset, &blocked),
                    Check::ReachedFromEntry => {
                        clear_path_from_start(&graph, site.offset, &blocked)
                    }
                }
            }
        }
        None => {
            log::debug!("{} not found; treating {:?} as satisfied", site.method, check);
            true
        }
    };
    cache.insert(key, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::DEFAULT_GRAPH_CACHE_CAPACITY;
    use crate::ir::Method;
    use crate::testing::{BodyBuilder, class, method};

    const OWNER: &str = "com/example/Counter";
    const OBJECT: &str = "java/lang/Object";

    fn count() -> FieldId {
        FieldId::new(OWNER, "count", "I")
    }

    fn populate(store: &mut DefUseStore, methods: Vec<Method>) {
        let field = count();
        let program = Program::new(vec![class(OWNER, OBJECT, &[&field], methods)], vec![]);
        let mut graphs = GraphCache::new(DEFAULT_GRAPH_CACHE_CAPACITY);
        store.populate(&program, &mut graphs, &HeuristicsConfig::default());
    }

    /// Constructor storing `count` at offset 2.
    fn constructor() -> Method {
        method(
            OWNER,
            "<init>",
            "()V",
            BodyBuilder::new().aload(0).iconst(0).putfield(&count()).ret(),
        )
    }

    /// Reads `count` at offset 1.
    fn reader() -> Method {
        method(
            OWNER,
            "value",
            "()I",
            BodyBuilder::new().aload(0).getfield(&count()).ret(),
        )
    }

    #[test]
    fn cross_method_pair_is_feasible_and_starts_uncovered() {
        let field = count();
        let init = MethodId::new(OWNER, "<init>", "()V");
        let value = MethodId::new(OWNER, "value", "()I");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_use(&field, &value, 1);

        populate(&mut store, vec![constructor(), reader()]);

        let table = store.table(&field).expect("table");
        let pair = DefUsePair {
            field: field.clone(),
            def: Site::new(init.clone(), 2),
            use_site: Site::new(value.clone(), 1),
        };
        assert_eq!(Some(&0), table.coverage.get(&pair));
        assert!(store.update_coverage(&field, &init, 2, &value, 1));
        assert_eq!(Some(&1), store.table(&field).expect("table").coverage.get(&pair));
    }

    #[test]
    fn use_inside_loop_starting_at_entry_pairs_with_constructor() {
        let field = count();
        // 0 iload 1; 2 ifeq 12; 5 aload_0; 6 getfield; 9 goto 0; 12 return
        let drain = method(
            OWNER,
            "drain",
            "(Z)V",
            BodyBuilder::new()
                .iload(1)
                .ifeq(12)
                .aload(0)
                .getfield(&field)
                .goto(0)
                .ret(),
        );
        let init = MethodId::new(OWNER, "<init>", "()V");
        let drain_id = drain.id.clone();
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_use(&field, &drain_id, 6);

        populate(&mut store, vec![constructor(), drain]);

        let table = store.table(&field).expect("table");
        let pair = DefUsePair {
            field: field.clone(),
            def: Site::new(init, 2),
            use_site: Site::new(drain_id, 6),
        };
        assert_eq!(vec![&pair], table.coverage.keys().collect::<Vec<_>>());
    }

    #[test]
    fn definition_in_try_reaches_use_in_catch() {
        let field = count();
        let risky = MethodId::new(OWNER, "risky", "()V");
        // 0 aload_0; 1 iconst_1; 2 putfield; 5 aload_0; 6 invokevirtual risky; 9 goto 18;
        // 12 astore 1; 14 aload_0; 15 getfield; 18 return; handler 0..9 -> 12
        let reset = method(
            OWNER,
            "reset",
            "()V",
            BodyBuilder::new()
                .aload(0)
                .iconst(1)
                .putfield(&field)
                .aload(0)
                .invokevirtual(&risky)
                .goto(18)
                .astore()
                .aload(0)
                .getfield(&field)
                .ret()
                .handler(0, 9, 12),
        );
        let reset_id = reset.id.clone();
        let mut store = DefUseStore::default();
        store.add_definition(&field, &reset_id, 2);
        store.add_use(&field, &reset_id, 15);

        populate(&mut store, vec![reset]);

        let table = store.table(&field).expect("table");
        let pair = DefUsePair {
            field: field.clone(),
            def: Site::new(reset_id.clone(), 2),
            use_site: Site::new(reset_id, 15),
        };
        assert!(table.coverage.contains_key(&pair));
    }

    #[test]
    fn redefined_definition_is_excluded_from_cross_method_pairs() {
        let field = count();
        // 0 aload_0; 1 iconst_1; 2 putfield; 5 aload_0; 6 iconst_2; 7 putfield; 10 return
        let reset = method(
            OWNER,
            "reset",
            "()V",
            BodyBuilder::new()
                .aload(0)
                .iconst(1)
                .putfield(&field)
                .aload(0)
                .iconst(2)
                .putfield(&field)
                .ret(),
        );
        let reset_id = reset.id.clone();
        let value = MethodId::new(OWNER, "value", "()I");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &reset_id, 2);
        store.add_definition(&field, &reset_id, 7);
        store.add_use(&field, &value, 1);

        populate(&mut store, vec![reset, reader()]);

        let table = store.table(&field).expect("table");
        assert_eq!(1, table.coverage.len());
        let pair = table.coverage.keys().next().expect("pair");
        assert_eq!(7, pair.def.offset);
    }

    #[test]
    fn definition_overwritten_on_every_branch_is_infeasible() {
        let field = count();
        // 0 aload_0; 1 iconst_1; 2 putfield; 5 iload 1; 7 ifeq 18; 10 aload_0; 11 iconst_2;
        // 12 putfield; 15 goto 24; 18 aload_0; 19 iconst_0; 20 putfield; 23 athrow; 24 return
        let update = method(
            OWNER,
            "update",
            "(I)V",
            BodyBuilder::new()
                .aload(0)
                .iconst(1)
                .putfield(&field)
                .iload(1)
                .ifeq(18)
                .aload(0)
                .iconst(2)
                .putfield(&field)
                .goto(24)
                .aload(0)
                .iconst(0)
                .putfield(&field)
                .athrow()
                .ret(),
        );
        let update_id = update.id.clone();
        let value = MethodId::new(OWNER, "value", "()I");
        let mut store = DefUseStore::default();
        for offset in [2, 12, 20] {
            store.add_definition(&field, &update_id, offset);
        }
        store.add_use(&field, &value, 1);

        populate(&mut store, vec![update, reader()]);

        let table = store.table(&field).expect("table");
        let offsets: Vec<u32> = table.coverage.keys().map(|pair| pair.def.offset).collect();
        assert_eq!(vec![12, 20], offsets);
    }

    #[test]
    fn use_preceded_by_local_definition_only_pairs_locally() {
        let field = count();
        // 0 aload_0; 1 iconst_1; 2 putfield; 5 aload_0; 6 getfield; 9 return
        let touch = method(
            OWNER,
            "touch",
            "()V",
            BodyBuilder::new()
                .aload(0)
                .iconst(1)
                .putfield(&field)
                .aload(0)
                .getfield(&field)
                .ret(),
        );
        let touch_id = touch.id.clone();
        let init = MethodId::new(OWNER, "<init>", "()V");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_definition(&field, &touch_id, 2);
        store.add_use(&field, &touch_id, 6);

        populate(&mut store, vec![constructor(), touch]);

        let table = store.table(&field).expect("table");
        let pairs: Vec<(&MethodId, u32)> = table
            .coverage
            .keys()
            .map(|pair| (&pair.def.method, pair.def.offset))
            .collect();
        assert_eq!(vec![(&touch_id, 2)], pairs);
    }

    #[test]
    fn same_method_use_before_definition_is_infeasible() {
        let field = count();
        // 0 aload_0; 1 dup; 2 getfield; 5 iconst_1; 6 iadd; 7 putfield; 10 return
        let bump = method(
            OWNER,
            "bump",
            "()V",
            BodyBuilder::new()
                .aload(0)
                .dup()
                .getfield(&field)
                .iconst(1)
                .iadd()
                .putfield(&field)
                .ret(),
        );
        let bump_id = bump.id.clone();
        let mut store = DefUseStore::default();
        store.add_definition(&field, &bump_id, 7);
        store.add_use(&field, &bump_id, 2);

        populate(&mut store, vec![bump]);

        assert!(store.table(&field).expect("table").coverage.is_empty());
    }

    #[test]
    fn pending_sites_pair_as_both_def_and_use() {
        let field = count();
        let init = MethodId::new(OWNER, "<init>", "()V");
        let value = MethodId::new(OWNER, "value", "()I");
        let callee = MethodId::new("java/util/List", "add", "(Ljava/lang/Object;)Z");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_use(&field, &value, 1);
        store.add_def_or_use(&field, &value, 1, &callee);

        populate(&mut store, vec![constructor(), reader()]);

        let table = store.table(&field).expect("table");
        assert_eq!(Some(&callee), table.pending.get(&Site::new(value.clone(), 1)));
        assert_eq!(2, table.def_sites().len());
        assert_eq!(1, table.use_sites().len());
        // The pending site never pairs with itself.
        assert_eq!(1, table.coverage.len());
    }

    #[test]
    fn trivial_accessor_pairs_are_not_materialized() {
        let field = count();
        let setter = method(
            OWNER,
            "setCount",
            "(I)V",
            BodyBuilder::new().aload(0).iload(1).putfield(&field).ret(),
        );
        let getter = method(
            OWNER,
            "getCount",
            "()I",
            BodyBuilder::new().aload(0).getfield(&field).ret(),
        );
        let setter_id = setter.id.clone();
        let getter_id = getter.id.clone();
        let mut store = DefUseStore::default();
        store.add_definition(&field, &setter_id, 3);
        store.add_use(&field, &getter_id, 1);

        populate(&mut store, vec![setter, getter]);

        assert!(store.table(&field).expect("table").coverage.is_empty());
    }

    #[test]
    fn unmatched_observation_leaves_table_unchanged() {
        let field = count();
        let init = MethodId::new(OWNER, "<init>", "()V");
        let value = MethodId::new(OWNER, "value", "()I");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_use(&field, &value, 1);
        populate(&mut store, vec![constructor(), reader()]);
        let before = store.table(&field).expect("table").coverage.clone();

        assert!(!store.update_coverage(&field, &init, 2, &value, 20));
        assert!(!store.update_coverage(&FieldId::new(OWNER, "other", "I"), &init, 2, &value, 1));
        assert_eq!(before, store.table(&field).expect("table").coverage);
    }

    #[test]
    fn pairs_are_a_subset_of_defs_times_uses() {
        let field = count();
        let init = MethodId::new(OWNER, "<init>", "()V");
        let value = MethodId::new(OWNER, "value", "()I");
        let mut store = DefUseStore::default();
        store.add_definition(&field, &init, 2);
        store.add_use(&field, &value, 1);
        populate(&mut store, vec![constructor(), reader()]);

        let table = store.table(&field).expect("table");
        let defs = table.def_sites();
        let uses = table.use_sites();
        for pair in table.coverage.keys() {
            assert!(defs.contains(&pair.def));
            assert!(uses.contains(&pair.use_site));
        }
        assert!(store.feasibility_cache.is_empty());
    }
}
