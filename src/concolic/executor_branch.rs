/// Focuses on implementing the control-flow instructions and the recording of path constraints

use log::debug;
use z3::ast::{Ast, Bool, BV};

use crate::concolic::concolic_var::ConcolicVar;
use crate::concolic::executor::{EngineError, Lifter, Mode};
use crate::concolic::executor_int::adjust_stack;
use crate::concolic::instruction::{Condition, Operand};
use crate::concolic::path_constraint::PathConstraint;
use crate::state::flags::Flags;

// Flags read by each condition code
fn condition_flags(condition: Condition) -> &'static [&'static str] {
    match condition {
        Condition::A | Condition::Be => &["cf", "zf"],
        Condition::Ae | Condition::B => &["cf"],
        Condition::E | Condition::Ne => &["zf"],
        Condition::G | Condition::Le => &["zf", "sf", "of"],
        Condition::Ge | Condition::L => &["sf", "of"],
        Condition::O | Condition::No => &["of"],
        Condition::P | Condition::Np => &["pf"],
        Condition::S | Condition::Ns => &["sf"],
    }
}

// Symbolic predicate "the jump is taken"
fn condition_predicate<'ctx>(lifter: &Lifter<'_, 'ctx>, condition: Condition, flags: &[(&str, ConcolicVar<'ctx>)]) -> Bool<'ctx> {
    let ctx = lifter.ctx();
    let one = BV::from_u64(ctx, 1, 1);
    let flag = |name: &str| -> Bool<'ctx> {
        match flags.iter().find(|(n, _)| *n == name) {
            Some((_, value)) => value.to_bv(ctx)._eq(&one),
            None => Bool::from_bool(ctx, false),
        }
    };
    let same_sign = || flag("sf")._eq(&flag("of"));
    match condition {
        Condition::A => Bool::and(ctx, &[&flag("cf").not(), &flag("zf").not()]),
        Condition::Ae => flag("cf").not(),
        Condition::B => flag("cf"),
        Condition::Be => Bool::or(ctx, &[&flag("cf"), &flag("zf")]),
        Condition::E => flag("zf"),
        Condition::Ne => flag("zf").not(),
        Condition::G => Bool::and(ctx, &[&flag("zf").not(), &same_sign()]),
        Condition::Ge => same_sign(),
        Condition::L => same_sign().not(),
        Condition::Le => Bool::or(ctx, &[&flag("zf"), &same_sign().not()]),
        Condition::O => flag("of"),
        Condition::No => flag("of").not(),
        Condition::P => flag("pf"),
        Condition::Np => flag("pf").not(),
        Condition::S => flag("sf"),
        Condition::Ns => flag("sf").not(),
    }
}

// Jump/call destination, read through registers or memory when indirect
fn read_target<'ctx>(lifter: &mut Lifter<'_, 'ctx>) -> Result<ConcolicVar<'ctx>, EngineError> {
    let bits = lifter.pointer_bits()?;
    match lifter.operand(0)? {
        Operand::Immediate(target) => Ok(ConcolicVar::new_concrete(target, bits)),
        operand => lifter.read_operand(&operand, bits),
    }
}

// An indirect jump through a symbolic value only has the observed destination
fn record_indirect_constraint<'ctx>(lifter: &mut Lifter<'_, 'ctx>, target: &ConcolicVar<'ctx>) {
    if let Some(ast) = &target.symbolic {
        let ctx = lifter.ctx();
        let predicate = ast._eq(&BV::from_u64(ctx, target.concrete, target.size));
        let mut constraint = PathConstraint::new(lifter.instruction.thread_id, true);
        constraint.add_branch(true, lifter.instruction.address, target.concrete, predicate);
        lifter.engine.path_constraints_mut().push(constraint);
        lifter.instruction.symbolized = true;
    }
    if target.tainted {
        lifter.instruction.tainted = true;
    }
}

pub(crate) fn handle_jmp(lifter: &mut Lifter) -> Result<(), EngineError> {
    let target = read_target(lifter)?;
    record_indirect_constraint(lifter, &target);
    lifter.instruction.branch = true;
    lifter.instruction.condition_taken = true;
    lifter.instruction.branch_target = Some(target.concrete);
    lifter.set_program_counter(target.concrete)
}

pub(crate) fn handle_jcc(lifter: &mut Lifter, condition: Condition) -> Result<(), EngineError> {
    let target = match lifter.operand(0)? {
        Operand::Immediate(target) => target,
        _ => return Err(lifter.invalid("conditional jump target must be immediate")),
    };
    let src = lifter.instruction.address;
    let next = lifter.instruction.next_address;

    let mut values = Vec::new();
    for name in condition_flags(condition) {
        values.push((*name, lifter.read_register(name)?));
    }
    let mut flags = Flags::default();
    for (name, value) in &values {
        let set = value.concrete & 1 == 1;
        match *name {
            "zf" => flags.set_zero_flag(set),
            "sf" => flags.set_sign_flag(set),
            "cf" => flags.set_carry_flag(set),
            "of" => flags.set_overflow_flag(set),
            _ => flags.set_parity_flag(set),
        }
    }
    let taken = flags.condition_holds(condition);
    let symbolic = values.iter().any(|(_, v)| v.is_symbolic());
    let tainted = values.iter().any(|(_, v)| v.tainted);

    if symbolic || !lifter.engine.is_mode_enabled(Mode::PcTrackingSymbolic) {
        let predicate = if symbolic {
            condition_predicate(lifter, condition, &values)
        } else {
            Bool::from_bool(lifter.ctx(), taken)
        };
        let mut constraint = PathConstraint::new(lifter.instruction.thread_id, symbolic);
        constraint.add_branch(taken, src, target, predicate.clone());
        constraint.add_branch(!taken, src, next, predicate.not());
        let index = lifter.engine.path_constraints_mut().push(constraint);
        debug!("Path constraint #{} recorded at 0x{:x} (taken: 0x{:x})", index, src, if taken { target } else { next });
    }

    lifter.instruction.branch = true;
    lifter.instruction.condition_taken = taken;
    lifter.instruction.branch_target = Some(target);
    if symbolic {
        lifter.instruction.symbolized = true;
    }
    if tainted {
        lifter.instruction.tainted = true;
    }
    lifter.set_program_counter(if taken { target } else { next })
}

pub(crate) fn handle_call(lifter: &mut Lifter) -> Result<(), EngineError> {
    let target = read_target(lifter)?;
    record_indirect_constraint(lifter, &target);
    let bits = lifter.pointer_bits()?;
    let return_address = ConcolicVar::new_concrete(lifter.instruction.next_address, bits);
    let new_sp = adjust_stack(lifter, -((bits / 8) as i64))?;
    lifter.write_memory(new_sp, (bits / 8) as usize, return_address)?;
    lifter.instruction.branch_target = Some(target.concrete);
    lifter.set_program_counter(target.concrete)
}

pub(crate) fn handle_ret(lifter: &mut Lifter) -> Result<(), EngineError> {
    let bits = lifter.pointer_bits()?;
    let bytes = (bits / 8) as usize;
    let sp_name = lifter.engine.cpu()?.stack_pointer();
    let sp = lifter.read_register(sp_name)?.concrete;
    let return_address = lifter.read_memory(sp, bytes)?;
    // ret imm16 also releases the callee's arguments
    let extra = match lifter.instruction.operands.first() {
        Some(Operand::Immediate(count)) => *count as i64,
        _ => 0,
    };
    adjust_stack(lifter, bytes as i64 + extra)?;
    record_indirect_constraint(lifter, &return_address);
    lifter.instruction.branch_target = Some(return_address.concrete);
    lifter.set_program_counter(return_address.concrete)
}

