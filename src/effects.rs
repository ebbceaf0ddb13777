//! Method effects: which fields a method writes and how.
//!
//! A summary is computed by one forward scan of the method body. Calls into the method's
//! own type hierarchy are followed with an explicit stack of frames; calls into unrelated
//! types are approximated by name heuristics. Finished summaries are memoized per
//! [`MethodId`] for the lifetime of the analyzer.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use serde::Serialize;

use crate::heuristics::{AccessorKind, HeuristicsConfig};
use crate::hierarchy::Program;
use crate::ir::{FieldId, Instruction, InstructionKind, Method, MethodId};
use crate::opcodes;

/// How a store changes a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ModificationKind {
    Increment,
    Decrement,
    NullSet,
    NonNullSet,
    TrueSet,
    FalseSet,
    MethodCallInduced,
    Unknown,
}

/// Static approximation of the side effects of one method on its receiver's fields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodEffects {
    pub(crate) written_fields: BTreeSet<FieldId>,
    /// Fields stored directly from a method argument.
    pub(crate) parameter_aliased_fields: BTreeSet<FieldId>,
    pub(crate) called_methods: BTreeSet<MethodId>,
    /// Fields loaded immediately before a return, i.e. exposed by a getter.
    pub(crate) returned_fields: BTreeSet<FieldId>,
    pub(crate) modifications: BTreeMap<FieldId, ModificationKind>,
    /// 0 for methods without analyzed callees, otherwise 1 + the deepest callee.
    pub(crate) call_depth: u32,
}

impl MethodEffects {
    fn record_write(&mut self, field: FieldId, kind: ModificationKind) {
        self.written_fields.insert(field.clone());
        self.modifications
            .entry(field)
            .and_modify(|existing| {
                if *existing == ModificationKind::Unknown {
                    *existing = kind;
                }
            })
            .or_insert(kind);
    }

    fn absorb(&mut self, callee: &MethodEffects) {
        for field in &callee.written_fields {
            let kind = callee
                .modifications
                .get(field)
                .copied()
                .unwrap_or(ModificationKind::Unknown);
            self.record_write(field.clone(), kind);
        }
        self.parameter_aliased_fields
            .extend(callee.parameter_aliased_fields.iter().cloned());
        self.call_depth = self.call_depth.max(callee.call_depth + 1);
    }
}

/// Result of looking up a callee while a summary is being computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CalleeVisit {
    /// A summary (or a recorded failure) already exists.
    Memoized,
    /// The callee is on the current call chain; it contributes no further effects.
    Cycle,
    /// The callee has to be scanned.
    Fresh,
}

/// Per-method state while its callees are still being summarized.
struct Frame {
    method: MethodId,
    effects: MethodEffects,
    related_callees: Vec<MethodId>,
    pending: Vec<MethodId>,
}

/// Memoizing effects analyzer owned by one analysis session.
#[derive(Debug, Default)]
pub(crate) struct EffectsAnalyzer {
    memo: HashMap<MethodId, Option<Rc<MethodEffects>>>,
    scans: usize,
}

impl EffectsAnalyzer {
    /// Number of method bodies scanned so far.
    pub(crate) fn scan_count(&self) -> usize {
        self.scans
    }

    pub(crate) fn classify_callee(
        &self,
        callee: &MethodId,
        in_progress: &HashSet<MethodId>,
    ) -> CalleeVisit {
        if self.memo.contains_key(callee) {
            CalleeVisit::Memoized
        } else if in_progress.contains(callee) {
            CalleeVisit::Cycle
        } else {
            CalleeVisit::Fresh
        }
    }

    /// Summary of `id`, or `None` when the method has no decodable body. A `None` means
    /// nothing is known, not that the method has no effects.
    pub(crate) fn effects(
        &mut self,
        program: &Program,
        config: &HeuristicsConfig,
        id: &MethodId,
    ) -> Option<Rc<MethodEffects>> {
        if let Some(known) = self.memo.get(id) {
            return known.clone();
        }

        let mut in_progress = HashSet::new();
        let mut stack = Vec::new();
        match self.start_frame(program, config, id) {
            Some(frame) => {
                in_progress.insert(id.clone());
                stack.push(frame);
            }
            None => {
                self.memo.insert(id.clone(), None);
                return None;
            }
        }

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            if let Some(callee) = frame.pending.pop() {
                match self.classify_callee(&callee, &in_progress) {
                    CalleeVisit::Memoized => {}
                    CalleeVisit::Cycle => {
                        log::trace!("call cycle through {}; not descending", callee);
                    }
                    CalleeVisit::Fresh => match self.start_frame(program, config, &callee) {
                        Some(child) => {
                            in_progress.insert(callee);
                            stack.push(child);
                        }
                        None => {
                            self.memo.insert(callee, None);
                        }
                    },
                }
                continue;
            }

            let Some(mut frame) = stack.pop() else {
                break;
            };
            for callee in &frame.related_callees {
                if let Some(Some(summary)) = self.memo.get(callee) {
                    frame.effects.absorb(summary);
                }
            }
            in_progress.remove(&frame.method);
            self.memo.insert(frame.method, Some(Rc::new(frame.effects)));
        }

        self.memo.get(id).cloned().flatten()
    }

    fn start_frame(
        &mut self,
        program: &Program,
        config: &HeuristicsConfig,
        id: &MethodId,
    ) -> Option<Frame> {
        let Some(method) = program.method(id) else {
            log::debug!("no declaration for {}; effects unknown", id);
            return None;
        };
        let (effects, related_callees) = scan_method(program, config, method)?;
        self.scans += 1;
        let mut pending = related_callees.clone();
        pending.reverse();
        Some(Frame {
            method: id.clone(),
            effects,
            related_callees,
            pending,
        })
    }
}

/// Single forward pass over a method body. Returns the method's own effects and the
/// callees in its type hierarchy whose effects must be merged in.
fn scan_method(
    program: &Program,
    config: &HeuristicsConfig,
    method: &Method,
) -> Option<(MethodEffects, Vec<MethodId>)> {
    let Some(body) = method.body.as_ref() else {
        log::debug!("{} has no decodable body; effects unknown", method.id);
        return None;
    };
    let analyzed_type = method.id.owner.as_str();
    let mut effects = MethodEffects::default();
    let mut related = Vec::new();
    let mut previous: Option<&Instruction> = None;
    let mut last_array_field: Option<FieldId> = None;
    let mut last_object_field: Option<FieldId> = None;

    for inst in &body.instructions {
        match &inst.kind {
            InstructionKind::FieldStore(field) => {
                if let Some(field) = own_field(program, analyzed_type, field) {
                    store(&mut effects, method, field, previous);
                }
            }
            InstructionKind::FieldLoad(field) | InstructionKind::FieldLoadAddress(field) => {
                if field.is_array() {
                    last_array_field = Some(field.clone());
                }
                if field.is_reference() {
                    last_object_field = Some(field.clone());
                }
            }
            InstructionKind::ArrayElementStore => {
                if let Some(field) = last_array_field.take() {
                    if let Some(field) = own_field(program, analyzed_type, &field) {
                        store(&mut effects, method, field, previous);
                    }
                }
            }
            InstructionKind::Call(callee) | InstructionKind::VirtualCall(callee) => {
                effects.called_methods.insert(callee.clone());
                let loaded = last_object_field.take();
                if program.is_related(&callee.owner, analyzed_type) {
                    if let Some(target) = program.resolve_method(callee) {
                        if target.body.is_some() && !related.contains(&target.id) {
                            related.push(target.id.clone());
                        }
                    }
                } else if config.infer_call_effects
                    && config.classify_accessor(&callee.name) != AccessorKind::Getter
                {
                    let induced = loaded.and_then(|f| own_field(program, analyzed_type, &f));
                    if let Some(field) = induced {
                        effects.record_write(field, ModificationKind::MethodCallInduced);
                    }
                }
            }
            InstructionKind::Return => {
                if let Some(InstructionKind::FieldLoad(field)) = previous.map(|prev| &prev.kind) {
                    let field = program.resolve_field(field).unwrap_or_else(|| field.clone());
                    effects.returned_fields.insert(field);
                }
            }
            _ => {}
        }
        previous = Some(inst);
    }
    Some((effects, related))
}

/// Resolve `field` and keep it only when it is declared by the analyzed type or one of
/// its supertypes.
fn own_field(program: &Program, analyzed_type: &str, field: &FieldId) -> Option<FieldId> {
    let resolved = match program.resolve_field(field) {
        Some(resolved) => resolved,
        None => {
            if program.class(&field.owner).is_some() {
                log::warn!("cannot resolve declaring type of {}", field);
            }
            return None;
        }
    };
    program
        .is_assignable(analyzed_type, &resolved.owner)
        .then_some(resolved)
}

fn store(
    effects: &mut MethodEffects,
    method: &Method,
    field: FieldId,
    previous: Option<&Instruction>,
) {
    let kind = modification_kind(method, &field, previous);
    if kind == ModificationKind::Unknown {
        log::debug!("unknown modification of {} in {}", field, method.id);
    }
    if previous.is_some_and(|prev| method.is_argument_load(prev)) {
        effects.parameter_aliased_fields.insert(field.clone());
    }
    effects.record_write(field, kind);
}

/// Infer the modification shape from the instruction right before the store.
pub(crate) fn modification_kind(
    method: &Method,
    field: &FieldId,
    previous: Option<&Instruction>,
) -> ModificationKind {
    let Some(prev) = previous else {
        return ModificationKind::Unknown;
    };
    match prev.opcode {
        opcodes::IADD..=opcodes::DADD if field.is_integral() => ModificationKind::Increment,
        opcodes::ISUB..=opcodes::DSUB if field.is_integral() => ModificationKind::Decrement,
        opcodes::ACONST_NULL if field.is_reference() => ModificationKind::NullSet,
        opcodes::NEW | opcodes::NEWARRAY | opcodes::ANEWARRAY | opcodes::MULTIANEWARRAY => {
            ModificationKind::NonNullSet
        }
        opcodes::ICONST_0 if field.is_boolean() => ModificationKind::FalseSet,
        opcodes::ICONST_1 if field.is_boolean() => ModificationKind::TrueSet,
        _ => match &prev.kind {
            // `new T; dup; ...; invokespecial T.<init>` leaves the fresh object on the stack.
            InstructionKind::Call(callee) if callee.is_constructor() => {
                ModificationKind::NonNullSet
            }
            _ if field.is_reference() && method.is_argument_load(prev) => {
                ModificationKind::NonNullSet
            }
            _ => ModificationKind::Unknown,
        },
    }
}
