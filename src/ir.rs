use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::descriptor::parameter_slots;

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

/// Field declared by a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) id: FieldId,
    pub(crate) is_static: bool,
}

/// Nominal field identity: declaring type, name and type descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) struct FieldId {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl FieldId {
    pub(crate) fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub(crate) fn is_reference(&self) -> bool {
        self.descriptor.starts_with('L') || self.is_array()
    }

    pub(crate) fn is_array(&self) -> bool {
        self.descriptor.starts_with('[')
    }

    pub(crate) fn is_integral(&self) -> bool {
        matches!(self.descriptor.as_str(), "I" | "J" | "S" | "B" | "C")
    }

    pub(crate) fn is_boolean(&self) -> bool {
        self.descriptor == "Z"
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// Globally unique method identity, used as the key of every per-method cache.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) struct MethodId {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MethodId {
    pub(crate) fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub(crate) fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Intermediate representation for a method and its decoded body.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) id: MethodId,
    pub(crate) access: MethodAccess,
    /// `None` when the method has no code or its bytecode could not be decoded.
    pub(crate) body: Option<MethodBody>,
}

impl Method {
    /// Local variable slots holding declared arguments (the receiver excluded).
    pub(crate) fn argument_slots(&self) -> Range<u16> {
        let first = if self.access.is_static { 0 } else { 1 };
        let slots = parameter_slots(&self.id.descriptor).unwrap_or(0);
        first..first + slots
    }

    pub(crate) fn is_argument_load(&self, instruction: &Instruction) -> bool {
        instruction
            .local
            .is_some_and(|index| self.argument_slots().contains(&index))
    }
}

/// Method access flags used by the analyses.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_static: bool,
}

/// Decoded instruction stream of one method, ordered by offset.
#[derive(Clone, Debug, Default)]
pub(crate) struct MethodBody {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    pub(crate) fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            exception_handlers: Vec::new(),
        }
    }

    pub(crate) fn with_handlers(mut self, exception_handlers: Vec<ExceptionHandler>) -> Self {
        self.exception_handlers = exception_handlers;
        self
    }

    pub(crate) fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |inst| inst.offset)
            .ok()
            .map(|index| &self.instructions[index])
    }
}

/// Exception table entry: instructions in `start_pc..end_pc` may transfer to `handler_pc`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
}

impl ExceptionHandler {
    pub(crate) fn covers(&self, offset: u32) -> bool {
        (self.start_pc..self.end_pc).contains(&offset)
    }
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
    pub(crate) next_offset: u32,
    /// Local variable index for load instructions.
    pub(crate) local: Option<u16>,
}

/// Closed instruction categories used by graph construction and effects analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum InstructionKind {
    ConstantLoad,
    Conversion,
    FieldLoad(FieldId),
    /// Address-of-field load. JVM bytecode has no such instruction; kept for IR fed by
    /// front ends for runtimes that do.
    #[allow(dead_code)]
    FieldLoadAddress(FieldId),
    FieldStore(FieldId),
    ArrayElementStore,
    Call(MethodId),
    VirtualCall(MethodId),
    UnconditionalBranch { target: u32 },
    ConditionalBranch { target: u32 },
    Switch { targets: Vec<u32> },
    Return,
    Throw,
    Other,
}
