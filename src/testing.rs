//! Builders for hand-assembled IR used across unit tests.

use crate::ir::{
    Class, ExceptionHandler, Field, FieldId, Instruction, InstructionKind, Method, MethodAccess,
    MethodBody, MethodId,
};
use crate::opcodes;

/// Appends instructions with realistic JVM lengths so offsets match real class files.
#[derive(Default)]
pub(crate) struct BodyBuilder {
    instructions: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
    offset: u32,
}

impl BodyBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(mut self, opcode: u8, kind: InstructionKind, length: u32, local: Option<u16>) -> Self {
        self.instructions.push(Instruction {
            offset: self.offset,
            opcode,
            kind,
            next_offset: self.offset + length,
            local,
        });
        self.offset += length;
        self
    }

    pub(crate) fn aload(self, index: u16) -> Self {
        match index {
            0..=3 => {
                let opcode = opcodes::ALOAD_0 + index as u8;
                self.push(opcode, InstructionKind::Other, 1, Some(index))
            }
            _ => self.push(opcodes::ALOAD, InstructionKind::Other, 2, Some(index)),
        }
    }

    /// `astore` with a one-byte local index.
    pub(crate) fn astore(self) -> Self {
        self.push(opcodes::ASTORE, InstructionKind::Other, 2, None)
    }

    pub(crate) fn iload(self, index: u16) -> Self {
        self.push(opcodes::ILOAD, InstructionKind::Other, 2, Some(index))
    }

    pub(crate) fn aconst_null(self) -> Self {
        self.push(opcodes::ACONST_NULL, InstructionKind::ConstantLoad, 1, None)
    }

    pub(crate) fn iconst(self, value: u8) -> Self {
        self.push(opcodes::ICONST_0 + value, InstructionKind::ConstantLoad, 1, None)
    }

    pub(crate) fn iadd(self) -> Self {
        self.push(opcodes::IADD, InstructionKind::Other, 1, None)
    }

    pub(crate) fn isub(self) -> Self {
        self.push(opcodes::ISUB, InstructionKind::Other, 1, None)
    }

    pub(crate) fn dup(self) -> Self {
        self.push(opcodes::DUP, InstructionKind::Other, 1, None)
    }

    pub(crate) fn new_object(self) -> Self {
        self.push(opcodes::NEW, InstructionKind::Other, 3, None)
    }

    pub(crate) fn getfield(self, field: &FieldId) -> Self {
        self.push(opcodes::GETFIELD, InstructionKind::FieldLoad(field.clone()), 3, None)
    }

    pub(crate) fn field_address(self, field: &FieldId) -> Self {
        self.push(opcodes::NOP, InstructionKind::FieldLoadAddress(field.clone()), 3, None)
    }

    pub(crate) fn putfield(self, field: &FieldId) -> Self {
        self.push(opcodes::PUTFIELD, InstructionKind::FieldStore(field.clone()), 3, None)
    }

    pub(crate) fn iastore(self) -> Self {
        self.push(opcodes::IASTORE, InstructionKind::ArrayElementStore, 1, None)
    }

    pub(crate) fn invokespecial(self, callee: &MethodId) -> Self {
        self.push(opcodes::INVOKESPECIAL, InstructionKind::Call(callee.clone()), 3, None)
    }

    pub(crate) fn invokevirtual(self, callee: &MethodId) -> Self {
        self.push(opcodes::INVOKEVIRTUAL, InstructionKind::VirtualCall(callee.clone()), 3, None)
    }

    pub(crate) fn ifeq(self, target: u32) -> Self {
        self.push(opcodes::IFEQ, InstructionKind::ConditionalBranch { target }, 3, None)
    }

    pub(crate) fn goto(self, target: u32) -> Self {
        self.push(opcodes::GOTO, InstructionKind::UnconditionalBranch { target }, 3, None)
    }

    pub(crate) fn ret(self) -> Self {
        self.push(opcodes::RETURN, InstructionKind::Return, 1, None)
    }

    pub(crate) fn areturn(self) -> Self {
        self.push(opcodes::ARETURN, InstructionKind::Return, 1, None)
    }

    pub(crate) fn athrow(self) -> Self {
        self.push(opcodes::ATHROW, InstructionKind::Throw, 1, None)
    }

    /// Protect `start_pc..end_pc` with a handler at `handler_pc`.
    pub(crate) fn handler(mut self, start_pc: u32, end_pc: u32, handler_pc: u32) -> Self {
        self.handlers.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
        });
        self
    }

    pub(crate) fn build(self) -> MethodBody {
        MethodBody::new(self.instructions).with_handlers(self.handlers)
    }
}

pub(crate) fn method(owner: &str, name: &str, descriptor: &str, body: BodyBuilder) -> Method {
    Method {
        id: MethodId::new(owner, name, descriptor),
        access: MethodAccess::default(),
        body: Some(body.build()),
    }
}

pub(crate) fn bodyless_method(owner: &str, name: &str, descriptor: &str) -> Method {
    Method {
        id: MethodId::new(owner, name, descriptor),
        access: MethodAccess::default(),
        body: None,
    }
}

pub(crate) fn class(
    name: &str,
    super_name: &str,
    fields: &[&FieldId],
    methods: Vec<Method>,
) -> Class {
    Class {
        name: name.to_string(),
        super_name: Some(super_name.to_string()),
        interfaces: Vec::new(),
        fields: fields
            .iter()
            .map(|id| Field {
                id: (*id).clone(),
                is_static: false,
            })
            .collect(),
        methods,
    }
}
