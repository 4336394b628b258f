use z3::ast::{Ast, Bool, BV};
use z3::{Config, Context};
use ponce::concolic::instruction::{Condition, DecodedInstruction, Instruction, Operand};
use ponce::debugger::{DebugEvent, Debugger};
use ponce::state::flags::Flags;
use ponce::state::{Options, Session, SimulatedDebugger};

#[cfg(test)]
mod tests {
    use ponce::concolic::path_constraint::PathConstraint;
    use ponce::concolic::symbolic_var::SymbolicVariable;

    use super::*;

    fn setup_session() -> Session<'static> {
        let cfg = Config::new();
        let ctx = Box::leak(Box::new(Context::new(&cfg)));
        Session::new(ctx, Options::default())
    }

    // 0x401000: cmp eax, 5
    // 0x401003: je 0x401050
    fn setup_debugger(eax: u64) -> SimulatedDebugger {
        let mut debugger = SimulatedDebugger::x86_64();
        debugger.add_instruction(0x401000, &[0x83, 0xf8, 0x05], "cmp", vec![Operand::reg("eax"), Operand::Immediate(5)]);
        debugger.add_instruction(0x401003, &[0x74, 0x4b], "je", vec![Operand::Immediate(0x401050)]);
        debugger.set_register_value("rax", eax);
        debugger.set_register_value("rip", 0x401000);
        debugger
    }

    fn trace_cmp_je(session: &mut Session<'static>, debugger: &mut SimulatedDebugger) -> SymbolicVariable {
        let variable = session.symbolize_register(debugger, "eax").expect("eax should be symbolized");
        let cmp = session.status.last_instruction.clone().expect("cmp should have been lifted");
        debugger.commit(&session.engine, &cmp).expect("commit failed");
        session.handle_event(debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401003 }).expect("trace event failed");
        variable
    }

    fn jcc(condition: Condition) -> Instruction {
        let decoded = DecodedInstruction::new(0x401003, 2, condition.mnemonic(), vec![Operand::Immediate(0x401050)]);
        Instruction::new(&decoded, vec![0x70, 0x4b], 1)
    }

    #[test]
    fn test_solve_formula_bound_out_of_range() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();
        assert!(session.solve_formula(0x401003, 0).is_empty());

        trace_cmp_je(&mut session, &mut debugger);
        assert_eq!(session.engine.path_constraints().len(), 1);
        assert!(session.solve_formula(0x401003, 1).is_empty());
        assert!(session.solve_formula(0x401003, 42).is_empty());
    }

    #[test]
    fn test_solve_formula_wrong_address() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        assert!(session.solve_formula(0x401000, 0).is_empty());
    }

    #[test]
    fn test_solve_formula_needs_symbolic_alternative_edge() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        let variable = trace_cmp_je(&mut session, &mut debugger);
        let eax = session.engine.ast_context().variable_node(&variable.name).unwrap().clone();
        let ctx = session.engine.ctx;

        // Indirect jump: a single edge
        let mut single = PathConstraint::new(1, true);
        single.add_branch(false, 0x401060, 0x402000, eax._eq(&BV::from_u64(ctx, 7, 32)));
        let single_index = session.engine.path_constraints_mut().push(single);
        assert!(session.solve_formula(0x401060, single_index).is_empty());

        // Two edges but no symbolic variable involved
        let mut concrete = PathConstraint::new(1, false);
        concrete.add_branch(true, 0x401070, 0x401072, Bool::from_bool(ctx, true));
        concrete.add_branch(false, 0x401070, 0x401080, Bool::from_bool(ctx, true));
        let concrete_index = session.engine.path_constraints_mut().push(concrete);
        assert!(session.solve_formula(0x401070, concrete_index).is_empty());

        assert_eq!(session.solve_formula(0x401003, 0).len(), 1);
    }

    #[test]
    fn test_solve_formula_finds_other_edge() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        let inputs = session.solve_formula(0x401003, 0);
        assert_eq!(inputs.len(), 1);
        let input = &inputs[0];
        assert_eq!(input.path_constraint_index, 0);
        assert_eq!(input.src_address, 0x401003);
        assert_eq!(input.dst_address, 0x401050);
        assert_eq!(input.registers, vec![("eax".to_string(), 5)]);
        assert!(input.memory.is_empty());
        // Also applied to the engine
        assert_eq!(session.engine.concrete_register_value("eax").unwrap(), 5);
        // The debuggee is left alone
        assert_eq!(debugger.register("eax"), 3);
    }

    #[test]
    fn test_solve_formula_is_deterministic() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        let first = session.solve_formula(0x401003, 0);
        let second = session.solve_formula(0x401003, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_user_constraint_makes_formula_unsat() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        let variable = trace_cmp_je(&mut session, &mut debugger);

        let ctx = session.ctx;
        let node = session.engine.ast_context().variable_node(&variable.name).unwrap().clone();
        let id = session.add_user_constraint(node._eq(&BV::from_u64(ctx, 5, variable.size)).not(), "eax != 5");
        assert!(session.solve_formula(0x401003, 0).is_empty());

        assert!(session.remove_user_constraint(id));
        assert!(!session.remove_user_constraint(id));
        assert_eq!(session.solve_formula(0x401003, 0).len(), 1);
    }

    #[test]
    fn test_flag_negation_flips_every_condition() {
        for condition in Condition::ALL {
            for bits in 0u8..32 {
                let original = Flags {
                    zero_flag: bits & 1 != 0,
                    sign_flag: bits & 2 != 0,
                    carry_flag: bits & 4 != 0,
                    overflow_flag: bits & 8 != 0,
                    parity_flag: bits & 16 != 0,
                };
                let mut flags = original;
                flags.negate(condition);
                assert_ne!(
                    flags.condition_holds(condition),
                    original.condition_holds(condition),
                    "{} not negated for {:?}",
                    condition.mnemonic(),
                    original
                );
                flags.negate(condition);
                assert_eq!(flags.condition_holds(condition), original.condition_holds(condition));
            }
        }
    }

    #[test]
    fn test_negate_flag_condition_writes_debugger_flags() {
        let mut session = setup_session();
        let mut debugger = SimulatedDebugger::x86_64();
        debugger.set_register_value("zf", 0);
        debugger.set_register_value("cf", 1);

        assert!(session.negate_flag_condition(&mut debugger, &jcc(Condition::E)));
        assert_eq!(debugger.register("zf"), 1);
        assert_eq!(debugger.register("cf"), 1);

        assert!(session.negate_flag_condition(&mut debugger, &jcc(Condition::Ae)));
        assert_eq!(debugger.register("cf"), 0);
    }

    #[test]
    fn test_negate_flag_condition_rejects_non_jcc() {
        let mut session = setup_session();
        let mut debugger = SimulatedDebugger::x86_64();
        let decoded = DecodedInstruction::new(0x401000, 1, "nop", vec![]);
        let nop = Instruction::new(&decoded, vec![0x90], 1);

        assert!(!session.negate_flag_condition(&mut debugger, &nop));
        assert_eq!(debugger.register("zf"), 0);
    }

    #[test]
    fn test_negate_and_inject() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        let input = session.negate_and_inject(&mut debugger, 0x401003).expect("one solution expected");
        assert_eq!(input.dst_address, 0x401050);
        assert_eq!(debugger.register("eax"), 5);
        assert_eq!(debugger.register("zf"), 1);

        let constraints = session.engine.path_constraints();
        assert_eq!(constraints.len(), 1);
        let last = constraints.last().unwrap();
        assert_eq!(last.taken_address(), Some(0x401050));
        assert_eq!(last.branches().iter().filter(|b| b.taken).count(), 1);
        // The variable stays symbolic for later branches
        assert!(session.engine.is_register_symbolized("eax"));
    }

    #[test]
    fn test_negate_inject_and_restore() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        session.symbolize_register(&mut debugger, "eax").unwrap();
        session.take_snapshot(&mut debugger).unwrap();
        let cmp = session.status.last_instruction.clone().unwrap();
        debugger.commit(&session.engine, &cmp).unwrap();
        debugger.set_register_value("rip", 0x401003);
        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401003 }).unwrap();

        let input = session.negate_inject_and_restore(&mut debugger, 0x401003).expect("one solution expected");
        assert_eq!(input.registers, vec![("eax".to_string(), 5)]);
        // Back at the snapshot, with the solution applied
        assert_eq!(debugger.register("rip"), 0x401000);
        assert_eq!(debugger.register("eax"), 5);
        assert_eq!(session.engine.concrete_register_value("eax").unwrap(), 5);
        assert!(session.status.last_instruction.is_none());
        assert_eq!(session.engine.path_constraints().last().unwrap().taken_address(), Some(0x401050));
    }

    #[test]
    fn test_negate_without_constraints() {
        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        assert!(session.negate_and_inject(&mut debugger, 0x401003).is_none());
        assert_eq!(debugger.register("eax"), 3);
    }

    #[test]
    fn test_set_smt_solution_writes_memory_and_registers() {
        use ponce::concolic::instruction::MemoryAccess;
        use ponce::concolic::solver::Input;

        let mut session = setup_session();
        let mut debugger = setup_debugger(3);
        debugger.map(0x500000, 8);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        let input = Input {
            memory: vec![(MemoryAccess::new(0x500000, 2), 0x4241)],
            registers: vec![("ebx".to_string(), 0x1337)],
            ..Input::default()
        };
        session.set_smt_solution(&mut debugger, &input);
        assert_eq!(debugger.memory(0x500000, 3), vec![0x41, 0x42, 0x00]);
        assert_eq!(debugger.register("rbx"), 0x1337);
        assert_eq!(session.engine.concrete_register_value("ebx").unwrap(), 0x1337);
        assert_eq!(format!("{}", input), "Input #0 0x0 -> 0x0: [0x500000:2]=0x4241 ebx=0x1337");
    }
}
