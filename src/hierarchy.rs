use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ir::{Class, FieldId, Method, MethodId};

const OBJECT: &str = "java/lang/Object";

/// All classes known to one analysis run, indexed by name.
///
/// Analysis targets are the classes whose fields are reported; classpath classes only
/// contribute type hierarchy and callee bodies.
#[derive(Debug, Default)]
pub(crate) struct Program {
    classes: Vec<Class>,
    index: HashMap<String, usize>,
    targets: BTreeSet<String>,
}

impl Program {
    pub(crate) fn new(targets: Vec<Class>, classpath: Vec<Class>) -> Self {
        let mut program = Program::default();
        for class in targets {
            program.targets.insert(class.name.clone());
            program.insert(class);
        }
        for class in classpath {
            if program.index.contains_key(&class.name) {
                log::debug!("ignoring shadowed classpath class {}", class.name);
                continue;
            }
            program.insert(class);
        }
        program
    }

    fn insert(&mut self, class: Class) {
        if self.index.contains_key(&class.name) {
            log::warn!("duplicate class {}; keeping the first definition", class.name);
            return;
        }
        self.index.insert(class.name.clone(), self.classes.len());
        self.classes.push(class);
    }

    pub(crate) fn class(&self, name: &str) -> Option<&Class> {
        self.index.get(name).map(|index| &self.classes[*index])
    }

    /// Target classes in name order.
    pub(crate) fn target_classes(&self) -> impl Iterator<Item = &Class> {
        self.targets.iter().filter_map(|name| self.class(name))
    }

    pub(crate) fn is_target(&self, name: &str) -> bool {
        self.targets.contains(name)
    }

    pub(crate) fn method(&self, id: &MethodId) -> Option<&Method> {
        self.class(&id.owner)?
            .methods
            .iter()
            .find(|method| method.id.name == id.name && method.id.descriptor == id.descriptor)
    }

    /// Find the method a call site dispatches to statically, walking up the super classes
    /// of the referenced owner.
    pub(crate) fn resolve_method(&self, id: &MethodId) -> Option<&Method> {
        let mut owner = Some(id.owner.as_str());
        let mut seen = HashSet::new();
        while let Some(name) = owner {
            if !seen.insert(name) {
                break;
            }
            let class = self.class(name)?;
            if let Some(method) = class
                .methods
                .iter()
                .find(|method| method.id.name == id.name && method.id.descriptor == id.descriptor)
            {
                return Some(method);
            }
            owner = class.super_name.as_deref();
        }
        None
    }

    /// Resolve a field reference to the field's declaring class. Returns `None` when the
    /// declaring class is not part of the program.
    pub(crate) fn resolve_field(&self, field: &FieldId) -> Option<FieldId> {
        let mut owner = Some(field.owner.as_str());
        let mut seen = HashSet::new();
        while let Some(name) = owner {
            if !seen.insert(name) {
                break;
            }
            let class = self.class(name)?;
            if class
                .fields
                .iter()
                .any(|f| f.id.name == field.name && f.id.descriptor == field.descriptor)
            {
                return Some(FieldId::new(name, &field.name, &field.descriptor));
            }
            owner = class.super_name.as_deref();
        }
        None
    }

    /// Nominal subtype check over super classes and interfaces. Types missing from the
    /// program are only assignable to themselves and `java/lang/Object`.
    pub(crate) fn is_assignable(&self, sub_type: &str, super_type: &str) -> bool {
        if sub_type == super_type || super_type == OBJECT {
            return true;
        }
        let mut to_visit = vec![sub_type];
        let mut dont_revisit = HashSet::new();
        dont_revisit.insert(sub_type);
        while let Some(name) = to_visit.pop() {
            if name == super_type {
                return true;
            }
            let Some(class) = self.class(name) else {
                continue;
            };
            for next in class.super_name.iter().chain(class.interfaces.iter()) {
                if dont_revisit.insert(next.as_str()) {
                    to_visit.push(next.as_str());
                }
            }
        }
        false
    }

    /// True when either type is assignable to the other.
    pub(crate) fn is_related(&self, left: &str, right: &str) -> bool {
        self.is_assignable(left, right) || self.is_assignable(right, left)
    }
}
