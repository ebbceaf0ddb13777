//! Static pre-pass filling the def-use store from every target method body.

use crate::effects::EffectsAnalyzer;
use crate::heuristics::{AccessorKind, HeuristicsConfig};
use crate::hierarchy::Program;
use crate::ir::{FieldId, InstructionKind, Method};
use crate::store::DefUseStore;

/// Register the instance fields of all target classes, then record their definitions
/// and uses in every target method.
pub(crate) fn collect_def_uses(
    program: &Program,
    config: &HeuristicsConfig,
    effects: &mut EffectsAnalyzer,
    store: &mut DefUseStore,
) {
    for class in program.target_classes() {
        for field in class.fields.iter().filter(|field| !field.is_static) {
            store.add_field(field.id.clone());
        }
    }
    for class in program.target_classes() {
        for method in &class.methods {
            collect_method(program, config, effects, store, method);
        }
    }
}

fn collect_method(
    program: &Program,
    config: &HeuristicsConfig,
    effects: &mut EffectsAnalyzer,
    store: &mut DefUseStore,
    method: &Method,
) {
    let Some(body) = method.body.as_ref() else {
        return;
    };
    let mut last_array_field: Option<FieldId> = None;
    let mut last_object_field: Option<FieldId> = None;

    for inst in &body.instructions {
        match &inst.kind {
            InstructionKind::FieldLoad(field) | InstructionKind::FieldLoadAddress(field) => {
                let Some(field) = tracked_field(program, store, field) else {
                    continue;
                };
                store.add_use(&field, &method.id, inst.offset);
                if field.is_array() {
                    last_array_field = Some(field.clone());
                }
                if field.is_reference() {
                    last_object_field = Some(field);
                }
            }
            InstructionKind::FieldStore(field) => {
                if let Some(field) = tracked_field(program, store, field) {
                    store.add_definition(&field, &method.id, inst.offset);
                }
            }
            InstructionKind::ArrayElementStore => {
                if let Some(field) = last_array_field.take() {
                    store.add_definition(&field, &method.id, inst.offset);
                }
            }
            InstructionKind::Call(callee) | InstructionKind::VirtualCall(callee) => {
                let loaded = last_object_field.take();
                let related = program.is_related(&callee.owner, method.id.owner.as_str());
                let target = program
                    .resolve_method(callee)
                    .filter(|target| target.body.is_some());
                if let Some(target) = target {
                    if let Some(summary) = effects.effects(program, config, &target.id) {
                        for field in &summary.written_fields {
                            if store.table(field).is_some() {
                                store.add_definition(field, &method.id, inst.offset);
                            }
                        }
                        for field in &summary.returned_fields {
                            if store.table(field).is_some() {
                                store.add_use(field, &method.id, inst.offset);
                            }
                        }
                    }
                }
                // Outside the caller's hierarchy a callee body says nothing about the
                // receiver field it was invoked on.
                let unsure = target.is_none() || !related;
                if unsure
                    && config.tag_unsure_calls
                    && config.classify_accessor(&callee.name) != AccessorKind::Getter
                {
                    if let Some(field) = loaded {
                        log::trace!(
                            "{}@{}: {} may modify {}",
                            method.id,
                            inst.offset,
                            callee,
                            field
                        );
                        store.add_def_or_use(&field, &method.id, inst.offset, callee);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Resolve a field reference to a registered target field.
fn tracked_field(program: &Program, store: &DefUseStore, field: &FieldId) -> Option<FieldId> {
    let Some(resolved) = program.resolve_field(field) else {
        if program.is_target(&field.owner) {
            log::warn!("cannot resolve declaring type of {}", field);
        } else {
            log::trace!("skipping access to external field {}", field);
        }
        return None;
    };
    store.table(&resolved).is_some().then_some(resolved)
}
