/// Focuses on implementing the data movement, integer arithmetic and stack instructions of the x86 family

use z3::ast::{Ast, BV};

use crate::concolic::concolic_var::ConcolicVar;
use crate::concolic::executor::{EngineError, Lifter, Mode};
use crate::concolic::instruction::Operand;
use crate::state::cpu_state::mask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

// Result of an ALU operation and the value of each status flag it defines
struct AluResult<'ctx> {
    value: ConcolicVar<'ctx>,
    flags: Vec<(&'static str, bool, Option<BV<'ctx>>, bool)>,
}

// Destination, source and operation width of a two-operand instruction
fn two_operands(lifter: &Lifter) -> Result<(Operand, Operand, u32), EngineError> {
    let dst = lifter.operand(0)?;
    let src = lifter.operand(1)?;
    let size = lifter
        .operand_size(&dst)
        .or_else(|| lifter.operand_size(&src))
        .ok_or_else(|| lifter.invalid("cannot infer operand size"))?;
    Ok((dst, src, size))
}

fn parity_bit<'ctx>(result: &BV<'ctx>) -> BV<'ctx> {
    let mut parity = result.extract(0, 0);
    for i in 1..8 {
        parity = parity.bvxor(&result.extract(i, i));
    }
    parity.bvnot()
}

fn compute<'ctx>(lifter: &Lifter<'_, 'ctx>, op: AluOp, a: &ConcolicVar<'ctx>, b: &ConcolicVar<'ctx>) -> AluResult<'ctx> {
    let size = a.size;
    let m = mask(size);
    let msb = 1u64 << (size - 1);
    let (x, y) = (a.concrete & m, b.concrete & m);

    let r = match op {
        AluOp::Add => x.wrapping_add(y) & m,
        AluOp::Sub => x.wrapping_sub(y) & m,
        AluOp::And => x & y,
        AluOp::Or => x | y,
        AluOp::Xor => x ^ y,
    };
    let (cf, of, af) = match op {
        AluOp::Add => (r < x, (x ^ r) & (y ^ r) & msb != 0, (x ^ y ^ r) & 0x10 != 0),
        AluOp::Sub => (x < y, (x ^ y) & (x ^ r) & msb != 0, (x ^ y ^ r) & 0x10 != 0),
        _ => (false, false, false),
    };
    let zf = r == 0;
    let sf = r & msb != 0;
    let pf = (r as u8).count_ones() % 2 == 0;

    let tainted = a.tainted || b.tainted;
    let ctx = lifter.ctx();
    let symbolic = a.is_symbolic() || b.is_symbolic();

    let mut flags = Vec::new();
    if symbolic {
        let sa = a.to_bv(ctx);
        let sb = b.to_bv(ctx);
        let sr = match op {
            AluOp::Add => sa.bvadd(&sb),
            AluOp::Sub => sa.bvsub(&sb),
            AluOp::And => sa.bvand(&sb),
            AluOp::Or => sa.bvor(&sb),
            AluOp::Xor => sa.bvxor(&sb),
        };
        let ast = lifter.engine.ast_context();
        let zero = BV::from_u64(ctx, 0, size);
        flags.push(("zf", zf, Some(ast.bit(&sr._eq(&zero))), tainted));
        flags.push(("sf", sf, Some(sr.extract(size - 1, size - 1)), tainted));
        flags.push(("pf", pf, Some(parity_bit(&sr)), tainted));
        match op {
            AluOp::Add => {
                flags.push(("cf", cf, Some(ast.bit(&sr.bvult(&sa))), tainted));
                flags.push(("of", of, Some(sa.bvxor(&sr).bvand(&sb.bvxor(&sr)).extract(size - 1, size - 1)), tainted));
                flags.push(("af", af, Some(sa.bvxor(&sb).bvxor(&sr).extract(4, 4)), tainted));
            }
            AluOp::Sub => {
                flags.push(("cf", cf, Some(ast.bit(&sa.bvult(&sb))), tainted));
                flags.push(("of", of, Some(sa.bvxor(&sb).bvand(&sa.bvxor(&sr)).extract(size - 1, size - 1)), tainted));
                flags.push(("af", af, Some(sa.bvxor(&sb).bvxor(&sr).extract(4, 4)), tainted));
            }
            _ => {
                flags.push(("cf", false, None, false));
                flags.push(("of", false, None, false));
            }
        }
        AluResult { value: ConcolicVar::new(r, Some(sr), tainted, size), flags }
    } else {
        flags.push(("zf", zf, None, tainted));
        flags.push(("sf", sf, None, tainted));
        flags.push(("pf", pf, None, tainted));
        match op {
            AluOp::Add | AluOp::Sub => {
                flags.push(("cf", cf, None, tainted));
                flags.push(("of", of, None, tainted));
                flags.push(("af", af, None, tainted));
            }
            _ => {
                flags.push(("cf", false, None, false));
                flags.push(("of", false, None, false));
            }
        }
        AluResult { value: ConcolicVar::new(r, None, tainted, size), flags }
    }
}

fn write_flags<'ctx>(lifter: &mut Lifter<'_, 'ctx>, result: AluResult<'ctx>, skip_carry: bool) -> Result<ConcolicVar<'ctx>, EngineError> {
    for (name, concrete, symbolic, tainted) in result.flags {
        if skip_carry && name == "cf" {
            continue;
        }
        lifter.write_flag(name, concrete, symbolic, tainted)?;
    }
    Ok(result.value)
}

// AF is undefined after logical operations
fn clear_undefined_af(lifter: &mut Lifter) -> Result<(), EngineError> {
    if lifter.engine.is_mode_enabled(Mode::ConcretizeUndefinedRegisters) {
        lifter.write_flag("af", false, None, false)?;
    }
    Ok(())
}

pub(crate) fn handle_mov(lifter: &mut Lifter) -> Result<(), EngineError> {
    let (dst, src, size) = two_operands(lifter)?;
    let value = lifter.read_operand(&src, size)?;
    lifter.write_operand(&dst, value)
}

pub(crate) fn handle_movzx(lifter: &mut Lifter) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let src = lifter.operand(1)?;
    let dst_size = lifter.operand_size(&dst).ok_or_else(|| lifter.invalid("movzx destination"))?;
    let src_size = lifter.operand_size(&src).ok_or_else(|| lifter.invalid("movzx source"))?;
    let value = lifter.read_operand(&src, src_size)?.zero_extend(dst_size);
    lifter.write_operand(&dst, value)
}

pub(crate) fn handle_lea(lifter: &mut Lifter) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let size = lifter.operand_size(&dst).ok_or_else(|| lifter.invalid("lea destination"))?;
    let mem = match lifter.operand(1)? {
        Operand::Memory(mem) => mem,
        _ => return Err(lifter.invalid("lea source must be a memory operand")),
    };
    let (address, pointer_tainted) = lifter.effective_address(&mem)?;
    let tainted = pointer_tainted && lifter.engine.is_mode_enabled(Mode::TaintThroughPointers);
    lifter.write_operand(&dst, ConcolicVar::new(address, None, tainted, size))
}

pub(crate) fn handle_binary(lifter: &mut Lifter, op: AluOp, store: bool) -> Result<(), EngineError> {
    let (dst, src, size) = two_operands(lifter)?;

    // xor/sub of a register with itself always yields a clean zero
    if store && matches!(op, AluOp::Xor | AluOp::Sub) && dst == src && matches!(dst, Operand::Register(_)) {
        let zero = ConcolicVar::new_concrete(0, size);
        let result = compute(lifter, op, &zero, &zero);
        let value = write_flags(lifter, result, false)?;
        if op == AluOp::Xor {
            clear_undefined_af(lifter)?;
        }
        return lifter.write_operand(&dst, value);
    }

    let a = lifter.read_operand(&dst, size)?;
    let b = lifter.read_operand(&src, size)?;
    let result = compute(lifter, op, &a, &b);
    let value = write_flags(lifter, result, false)?;
    if matches!(op, AluOp::And | AluOp::Or | AluOp::Xor) {
        clear_undefined_af(lifter)?;
    }
    if store {
        lifter.write_operand(&dst, value)?;
    }
    Ok(())
}

pub(crate) fn handle_inc_dec(lifter: &mut Lifter, increment: bool) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let size = lifter.operand_size(&dst).ok_or_else(|| lifter.invalid("inc/dec operand"))?;
    let a = lifter.read_operand(&dst, size)?;
    let one = ConcolicVar::new_concrete(1, size);
    let op = if increment { AluOp::Add } else { AluOp::Sub };
    let result = compute(lifter, op, &a, &one);
    // CF is preserved
    let value = write_flags(lifter, result, true)?;
    lifter.write_operand(&dst, value)
}

pub(crate) fn handle_not(lifter: &mut Lifter) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let size = lifter.operand_size(&dst).ok_or_else(|| lifter.invalid("not operand"))?;
    let a = lifter.read_operand(&dst, size)?;
    let symbolic = a.symbolic.as_ref().map(|bv| bv.bvnot());
    let value = ConcolicVar::new(!a.concrete, symbolic, a.tainted, size);
    lifter.write_operand(&dst, value)
}

pub(crate) fn handle_neg(lifter: &mut Lifter) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let size = lifter.operand_size(&dst).ok_or_else(|| lifter.invalid("neg operand"))?;
    let a = lifter.read_operand(&dst, size)?;
    let zero = ConcolicVar::new_concrete(0, size);
    let result = compute(lifter, AluOp::Sub, &zero, &a);
    let value = write_flags(lifter, result, false)?;
    lifter.write_operand(&dst, value)
}

// Moves the stack pointer by `delta` bytes and returns the new value
pub(crate) fn adjust_stack(lifter: &mut Lifter, delta: i64) -> Result<u64, EngineError> {
    let sp_name = lifter.engine.cpu()?.stack_pointer();
    let sp = lifter.read_register(sp_name)?;
    let new_sp = sp.concrete.wrapping_add(delta as u64) & mask(sp.size);
    let symbolic = sp.symbolic.as_ref().map(|bv| bv.bvadd(&BV::from_u64(lifter.ctx(), delta as u64, sp.size)));
    lifter.write_register(sp_name, ConcolicVar::new(new_sp, symbolic, sp.tainted, sp.size))?;
    Ok(new_sp)
}

pub(crate) fn stack_slot_size(lifter: &Lifter, operand: &Operand) -> Result<u32, EngineError> {
    match operand {
        Operand::Immediate(_) => lifter.pointer_bits(),
        _ => lifter.operand_size(operand).ok_or_else(|| lifter.invalid("stack operand size")),
    }
}

pub(crate) fn handle_push(lifter: &mut Lifter) -> Result<(), EngineError> {
    let src = lifter.operand(0)?;
    let size = stack_slot_size(lifter, &src)?;
    let value = lifter.read_operand(&src, size)?;
    let bytes = (size / 8) as usize;
    let new_sp = adjust_stack(lifter, -(bytes as i64))?;
    lifter.write_memory(new_sp, bytes, value)
}

pub(crate) fn handle_pop(lifter: &mut Lifter) -> Result<(), EngineError> {
    let dst = lifter.operand(0)?;
    let size = stack_slot_size(lifter, &dst)?;
    let bytes = (size / 8) as usize;
    let sp_name = lifter.engine.cpu()?.stack_pointer();
    let sp = lifter.read_register(sp_name)?.concrete;
    let value = lifter.read_memory(sp, bytes)?;
    adjust_stack(lifter, bytes as i64)?;
    lifter.write_operand(&dst, value)
}
