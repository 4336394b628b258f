use z3::{Config, Context};
use ponce::concolic::actions::EXECUTE_NATIVE_QUESTION;
use ponce::concolic::instruction::{MemoryAccess, MemoryOperand, Operand};
use ponce::concolic::symbolic_var::VariableOrigin;
use ponce::concolic::taint::TaintEngine;
use ponce::debugger::{DebugEvent, Debugger};
use ponce::state::memory::ConcreteMemory;
use ponce::state::{Options, Session, SimulatedDebugger};

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_session(options: Options) -> Session<'static> {
        let cfg = Config::new();
        let ctx = Box::leak(Box::new(Context::new(&cfg)));
        Session::new(ctx, options)
    }

    fn tainting_options() -> Options {
        Options { use_tainting_engine: true, use_symbolic_engine: false, ..Options::default() }
    }

    // 0x401000: mov eax, dword ptr [0x500000]
    // 0x401007: cmp eax, 0x41414141
    // 0x40100c: jne 0x401050
    fn setup_debugger() -> SimulatedDebugger {
        let mut debugger = SimulatedDebugger::x86_64();
        debugger.add_instruction(
            0x401000,
            &[0x8b, 0x04, 0x25, 0x00, 0x00, 0x50, 0x00],
            "mov",
            vec![Operand::reg("eax"), Operand::Memory(MemoryOperand::absolute(0x500000, 4))],
        );
        debugger.add_instruction(
            0x401007,
            &[0x3d, 0x41, 0x41, 0x41, 0x41],
            "cmp",
            vec![Operand::reg("eax"), Operand::Immediate(0x41414141)],
        );
        debugger.add_instruction(0x40100c, &[0x75, 0x42], "jne", vec![Operand::Immediate(0x401050)]);
        debugger.write_memory(0x500000, b"ABCD");
        debugger.set_register_value("rip", 0x401000);
        debugger
    }

    fn step(session: &mut Session<'static>, debugger: &mut SimulatedDebugger) {
        let pc = debugger.register("rip");
        session.handle_event(debugger, DebugEvent::Trace { thread_id: 1, pc }).expect("trace event failed");
        let instruction = session.status.last_instruction.clone().expect("instruction should have been lifted");
        debugger.commit(&session.engine, &instruction).expect("commit failed");
    }

    #[test]
    fn test_taint_memory_propagates_to_branch() {
        let mut session = setup_session(tainting_options());
        let mut debugger = setup_debugger();
        session.taint_memory(&mut debugger, 0x500000, 4).unwrap();
        assert!(session.engine.is_memory_tainted(MemoryAccess::new(0x500000, 4)));

        // The load at pc was lifted again with the new taint
        let mov = session.status.last_instruction.clone().unwrap();
        assert_eq!(mov.address, 0x401000);
        assert!(mov.tainted);
        assert!(session.engine.is_register_tainted("eax"));
        debugger.commit(&session.engine, &mov).unwrap();

        step(&mut session, &mut debugger);
        step(&mut session, &mut debugger);
        let jne = session.status.last_instruction.as_ref().unwrap();
        assert!(jne.branch);
        assert!(jne.tainted);
        assert!(!jne.symbolized);
        assert_eq!(debugger.comment(0x40100c).as_deref(), Some("Tainted branch!"));
    }

    #[test]
    fn test_taint_register() {
        let mut session = setup_session(tainting_options());
        let mut debugger = setup_debugger();
        debugger.set_register_value("rip", 0x401007);
        session.taint_register(&mut debugger, "eax").unwrap();

        assert!(session.engine.is_register_tainted("rax"));
        let cmp = session.status.last_instruction.as_ref().unwrap();
        assert_eq!(cmp.address, 0x401007);
        assert!(cmp.tainted);
    }

    #[test]
    fn test_symbolize_memory_one_variable_per_byte() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        let variables = session.symbolize_memory(&mut debugger, 0x500000, 4).unwrap();

        assert_eq!(variables.len(), 4);
        for (i, variable) in variables.iter().enumerate() {
            assert_eq!(variable.origin, VariableOrigin::Memory(0x500000 + i as u64));
            assert_eq!(variable.size, 8);
            assert_eq!(variable.comment, format!("Mem 0x{:x}", 0x500000 + i as u64));
        }
        assert!(session.engine.is_memory_symbolized(MemoryAccess::new(0x500000, 4)));
        assert!(session.engine.is_register_symbolized("eax"));
    }

    #[test]
    fn test_solve_symbolic_memory_input() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        session.symbolize_memory(&mut debugger, 0x500000, 4).unwrap();
        let mov = session.status.last_instruction.clone().unwrap();
        debugger.commit(&session.engine, &mov).unwrap();
        step(&mut session, &mut debugger);
        step(&mut session, &mut debugger);

        // "ABCD" != "AAAA", the jump was taken
        let constraint = session.engine.path_constraints().last().unwrap();
        assert_eq!(constraint.taken_address(), Some(0x401050));

        let inputs = session.solve_formula(0x40100c, 0);
        assert_eq!(inputs.len(), 1);
        let bytes: Vec<(u64, u64)> = inputs[0].memory.iter().map(|(access, value)| (access.address, *value)).collect();
        assert_eq!(bytes, vec![(0x500000, 0x41), (0x500001, 0x41), (0x500002, 0x41), (0x500003, 0x41)]);
    }

    #[test]
    fn test_symbolize_unreadable_memory() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();

        assert!(session.symbolize_memory(&mut debugger, 0x600000, 4).is_err());
    }

    #[test]
    fn test_symbolize_register_comment() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        debugger.set_register_value("rcx", 0x42);
        let variable = session.symbolize_register(&mut debugger, "ecx").unwrap();

        assert_eq!(variable.comment, "Reg ecx at address: 0x401000");
        assert_eq!(variable.size, 32);
        assert_eq!(session.engine.concrete_register_value("ecx").unwrap(), 0x42);
    }

    #[test]
    fn test_execute_native_declined_keeps_snapshot() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        session.enable_tracing(&mut debugger).unwrap();
        session.take_snapshot(&mut debugger).unwrap();
        debugger.answers.push_back(false);

        assert!(!session.execute_native(&mut debugger));
        assert_eq!(debugger.questions, vec![EXECUTE_NATIVE_QUESTION.to_string()]);
        assert!(session.snapshot.exists());
        assert_eq!(debugger.continue_count, 0);
    }

    #[test]
    fn test_execute_native_drops_snapshot() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        session.enable_tracing(&mut debugger).unwrap();
        session.take_snapshot(&mut debugger).unwrap();

        assert!(session.execute_native(&mut debugger));
        assert!(!session.snapshot.exists());
        assert!(!debugger.step_trace);
        assert_eq!(debugger.continue_count, 1);
    }

    #[test]
    fn test_execute_native_without_snapshot_does_not_ask() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();

        assert!(session.execute_native(&mut debugger));
        assert!(debugger.questions.is_empty());
    }

    #[test]
    fn test_enable_and_disable_tracing() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        session.enable_tracing(&mut debugger).unwrap();
        assert!(session.status.trigger.is_enabled());
        assert!(debugger.step_trace);
        assert_eq!(session.status.last_instruction_address(), Some(0x401000));

        assert!(session.disable_tracing(&mut debugger));
        assert!(!session.status.trigger.is_enabled());
        assert!(!debugger.step_trace);
    }

    #[test]
    fn test_run_until_symbolic_branch() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        session.symbolize_memory(&mut debugger, 0x500000, 4).unwrap();
        let mov = session.status.last_instruction.clone().unwrap();
        debugger.commit(&session.engine, &mov).unwrap();

        session.run_until_symbolic_branch(&mut debugger).unwrap();
        assert_eq!(debugger.continue_count, 1);
        assert!(session.status.run_and_break_on_symbolic_branch);

        step(&mut session, &mut debugger);
        assert!(!debugger.suspended);
        step(&mut session, &mut debugger);
        assert!(debugger.suspended);
        assert!(!session.status.run_and_break_on_symbolic_branch);
    }

    #[test]
    fn test_memory_at_top_of_address_space() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger();
        debugger.write_memory(0xffff_ffff_ffff_fffc, &[1, 2, 3, 4]);
        let variables = session.symbolize_memory(&mut debugger, 0xffff_ffff_ffff_fffc, 4).unwrap();
        assert_eq!(variables.len(), 4);
        assert_eq!(variables[3].origin, VariableOrigin::Memory(u64::MAX));
        assert!(session.engine.is_memory_symbolized(MemoryAccess::new(0xffff_ffff_ffff_fffc, 4)));

        let mut memory = ConcreteMemory::new();
        memory.write_bytes(u64::MAX - 1, &[0xaa, 0xbb]).unwrap();
        assert_eq!(memory.read_bytes(u64::MAX - 1, 2).unwrap(), vec![0xaa, 0xbb]);
        assert!(memory.read_bytes(u64::MAX, 2).is_err());

        // Ranges crossing the end wrap around to address 0
        let mut taint = TaintEngine::new();
        taint.taint_memory(u64::MAX - 1, 4);
        assert!(taint.is_memory_tainted(0, 2));
        taint.untaint_memory(u64::MAX - 1, 4);
        assert!(!taint.is_memory_tainted(u64::MAX, 1));
        assert!(!taint.is_memory_tainted(1, 1));
    }
}
