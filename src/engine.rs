use crate::cfg::GraphCache;
use crate::collect::collect_def_uses;
use crate::effects::EffectsAnalyzer;
use crate::heuristics::HeuristicsConfig;
use crate::hierarchy::Program;
use crate::ir::Class;
use crate::store::DefUseStore;

/// State of one analysis run: the program, its caches and the def-use store.
pub(crate) struct AnalysisSession {
    program: Program,
    config: HeuristicsConfig,
    graphs: GraphCache,
    effects: EffectsAnalyzer,
    store: DefUseStore,
}

impl AnalysisSession {
    pub(crate) fn new(program: Program, config: HeuristicsConfig) -> Self {
        let graphs = GraphCache::new(config.graph_cache_capacity);
        Self {
            program,
            config,
            graphs,
            effects: EffectsAnalyzer::default(),
            store: DefUseStore::default(),
        }
    }

    /// Collect definitions and uses of every target field, then materialize the
    /// feasible pairs.
    pub(crate) fn run(&mut self) {
        collect_def_uses(
            &self.program,
            &self.config,
            &mut self.effects,
            &mut self.store,
        );
        self.store
            .populate(&self.program, &mut self.graphs, &self.config);
        log::debug!(
            "collected {} fields; scanned {} method bodies for effects",
            self.store.fields().count(),
            self.effects.scan_count()
        );
    }

    pub(crate) fn into_store(self) -> DefUseStore {
        self.store
    }
}

/// Analyze the target classes and return the populated def-use store.
pub(crate) fn analyze(
    targets: Vec<Class>,
    classpath: Vec<Class>,
    config: HeuristicsConfig,
) -> DefUseStore {
    let mut session = AnalysisSession::new(Program::new(targets, classpath), config);
    session.run();
    session.into_store()
}
