use anyhow::{Context, Result};

use crate::ir::{FieldId, Instruction, InstructionKind, MethodId};
use crate::opcodes;

/// Constant pool lookups needed to resolve instruction operands.
pub(crate) trait ConstantResolver {
    fn field_ref(&self, index: u16) -> Result<FieldId>;
    fn method_ref(&self, index: u16) -> Result<MethodId>;
}

/// Decode a `Code` attribute into categorized instructions ordered by offset.
pub(crate) fn decode_instructions(
    code: &[u8],
    resolver: &impl ConstantResolver,
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        let next = offset + length;
        if next > code.len() {
            anyhow::bail!("truncated instruction at offset {}", offset);
        }
        instructions.push(decode_instruction(code, offset, next, resolver)?);
        offset = next;
    }
    Ok(instructions)
}

fn decode_instruction(
    code: &[u8],
    offset: usize,
    next: usize,
    resolver: &impl ConstantResolver,
) -> Result<Instruction> {
    let mut opcode = code[offset];
    let mut local = None;
    let kind = match opcode {
        opcodes::ACONST_NULL..=opcodes::LDC2_W => InstructionKind::ConstantLoad,
        opcodes::ILOAD..=opcodes::ALOAD => {
            local = Some(code[offset + 1] as u16);
            InstructionKind::Other
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            local = Some(((opcode - opcodes::ILOAD_0) % 4) as u16);
            InstructionKind::Other
        }
        opcodes::WIDE => {
            opcode = code[offset + 1];
            if (opcodes::ILOAD..=opcodes::ALOAD).contains(&opcode) {
                local = Some(read_u16(code, offset + 2)?);
            }
            InstructionKind::Other
        }
        opcodes::IASTORE..=opcodes::SASTORE => InstructionKind::ArrayElementStore,
        opcodes::I2L..=opcodes::I2S => InstructionKind::Conversion,
        opcodes::IFEQ..=opcodes::IF_ACMPNE | opcodes::IFNULL | opcodes::IFNONNULL => {
            InstructionKind::ConditionalBranch {
                target: branch_target(code, offset, read_i16(code, offset + 1)? as i32)?,
            }
        }
        opcodes::GOTO | opcodes::JSR => InstructionKind::UnconditionalBranch {
            target: branch_target(code, offset, read_i16(code, offset + 1)? as i32)?,
        },
        opcodes::GOTO_W | opcodes::JSR_W => InstructionKind::UnconditionalBranch {
            target: branch_target(code, offset, read_i32(code, offset + 1)?)?,
        },
        opcodes::TABLESWITCH => InstructionKind::Switch {
            targets: tableswitch_targets(code, offset)?,
        },
        opcodes::LOOKUPSWITCH => InstructionKind::Switch {
            targets: lookupswitch_targets(code, offset)?,
        },
        opcodes::IRETURN..=opcodes::RETURN | opcodes::RET => InstructionKind::Return,
        opcodes::ATHROW => InstructionKind::Throw,
        opcodes::GETFIELD => InstructionKind::FieldLoad(field_operand(code, offset, resolver)?),
        opcodes::PUTFIELD => InstructionKind::FieldStore(field_operand(code, offset, resolver)?),
        opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => {
            InstructionKind::Call(method_operand(code, offset, resolver)?)
        }
        opcodes::INVOKEVIRTUAL | opcodes::INVOKEINTERFACE => {
            InstructionKind::VirtualCall(method_operand(code, offset, resolver)?)
        }
        _ => InstructionKind::Other,
    };
    Ok(Instruction {
        offset: offset as u32,
        opcode,
        kind,
        next_offset: next as u32,
        local,
    })
}

fn field_operand(code: &[u8], offset: usize, resolver: &impl ConstantResolver) -> Result<FieldId> {
    let index = read_u16(code, offset + 1)?;
    resolver
        .field_ref(index)
        .with_context(|| format!("unresolvable field operand at offset {}", offset))
}

fn method_operand(
    code: &[u8],
    offset: usize,
    resolver: &impl ConstantResolver,
) -> Result<MethodId> {
    let index = read_u16(code, offset + 1)?;
    resolver
        .method_ref(index)
        .with_context(|| format!("unresolvable method operand at offset {}", offset))
}

fn branch_target(code: &[u8], offset: usize, branch: i32) -> Result<u32> {
    let target = offset as i64 + branch as i64;
    if target < 0 || target >= code.len() as i64 {
        anyhow::bail!("branch target {} out of range at offset {}", target, offset);
    }
    Ok(target as u32)
}

fn tableswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .context("invalid tableswitch range")?;
    let mut targets = vec![branch_target(code, offset, default)?];
    let mut idx = base + 12;
    for _ in 0..count {
        targets.push(branch_target(code, offset, read_i32(code, idx)?)?);
        idx += 4;
    }
    Ok(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?;
    let mut targets = vec![branch_target(code, offset, default)?];
    let mut idx = base + 8;
    for _ in 0..npairs.max(0) {
        targets.push(branch_target(code, offset, read_i32(code, idx + 4)?)?);
        idx += 8;
    }
    Ok(targets)
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = *code.get(offset).context("offset out of bounds")?;
    let length = match opcode {
        opcodes::BIPUSH | opcodes::LDC | opcodes::NEWARRAY | opcodes::RET => 2,
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE => 2,
        opcodes::SIPUSH | opcodes::LDC_W | opcodes::LDC2_W | opcodes::IINC => 3,
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GETSTATIC..=opcodes::INVOKESTATIC => 3,
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        opcodes::WIDE => {
            let modified = *code.get(offset + 1).context("truncated wide instruction")?;
            if modified == opcodes::IINC { 6 } else { 4 }
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .filter(|count| *count >= 0)
                .context("invalid tableswitch range")?;
            base - offset + 12 + 4 * count as usize
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count at offset {}", offset);
            }
            base - offset + 8 + 8 * npairs as usize
        }
        _ => 1,
    };
    Ok(length)
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .context("unexpected end of bytecode")?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .context("unexpected end of bytecode")?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(code, offset)? as i32)
}
