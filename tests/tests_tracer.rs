use z3::{Config, Context};
use ponce::concolic::instruction::{Mnemonic, Operand};
use ponce::concolic::tracer::TraceOutcome;
use ponce::debugger::{DebugEvent, Debugger};
use ponce::state::{Options, Session, SimulatedDebugger};

#[cfg(test)]
mod tests {
    use ponce::state::annotations::SNAPSHOT_COMMENT;

    use super::*;

    fn setup_session(options: Options) -> Session<'static> {
        let cfg = Config::new();
        let ctx = Box::leak(Box::new(Context::new(&cfg)));
        Session::new(ctx, options)
    }

    // 0x401000: cmp eax, 5
    // 0x401003: je 0x401050
    // 0x401005: nop
    fn setup_debugger(eax: u64) -> SimulatedDebugger {
        let mut debugger = SimulatedDebugger::x86_64();
        debugger.add_instruction(0x401000, &[0x83, 0xf8, 0x05], "cmp", vec![Operand::reg("eax"), Operand::Immediate(5)]);
        debugger.add_instruction(0x401003, &[0x74, 0x4b], "je", vec![Operand::Immediate(0x401050)]);
        debugger.add_instruction(0x401005, &[0x90], "nop", vec![]);
        debugger.add_function(0x401000, 0x401100, "check_password");
        debugger.set_register_value("rax", eax);
        debugger.set_register_value("rip", 0x401000);
        debugger
    }

    // Symbolizes eax (which lifts the cmp) and traces the conditional jump
    fn trace_cmp_je(session: &mut Session<'static>, debugger: &mut SimulatedDebugger) {
        session.symbolize_register(debugger, "eax").expect("eax should be symbolized");
        let cmp = session.status.last_instruction.clone().expect("cmp should have been lifted");
        debugger.commit(&session.engine, &cmp).expect("commit failed");
        session.handle_event(debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401003 }).expect("trace event failed");
    }

    #[test]
    fn test_symbolic_branch_records_one_constraint() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        let constraints = session.engine.path_constraints();
        assert_eq!(constraints.len(), 1);
        let constraint = constraints.get(0).unwrap();
        assert!(constraint.is_symbolic());
        assert_eq!(constraint.branches().len(), 2);
        assert_eq!(constraint.branches().iter().filter(|b| b.taken).count(), 1);
        // eax = 3, the jump falls through
        assert_eq!(constraint.taken_address(), Some(0x401005));
        assert_eq!(constraint.source_address(), Some(0x401003));

        let je = session.status.last_instruction.as_ref().unwrap();
        assert!(je.branch);
        assert!(je.symbolized);
        assert!(!je.condition_taken);
        assert_eq!(je.branch_target, Some(0x401050));
    }

    #[test]
    fn test_symbolic_branch_taken_follows_concrete_value() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(5);
        trace_cmp_je(&mut session, &mut debugger);

        let constraint = session.engine.path_constraints().last().unwrap();
        assert_eq!(constraint.taken_address(), Some(0x401050));
        assert!(session.status.last_instruction.as_ref().unwrap().condition_taken);
    }

    #[test]
    fn test_symbolic_branch_annotations() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        assert_eq!(debugger.comment(0x401003).as_deref(), Some("Symbolic branch, make your choice!"));
        assert_eq!(debugger.item_color(0x401003), session.options.color_tainted_condition);
        assert_eq!(debugger.item_color(0x401000), session.options.color_tainted);
        assert_eq!(session.status.total_number_symbolic_conditions, 1);
        assert_eq!(session.status.total_number_symbolic_ins, 2);
    }

    #[test]
    fn test_tainted_function_is_renamed() {
        let options = Options { rename_tainted_function_names: true, ..Options::default() };
        let mut session = setup_session(options);
        let mut debugger = setup_debugger(3);
        trace_cmp_je(&mut session, &mut debugger);

        assert_eq!(debugger.function_name(0x401003).as_deref(), Some("T_000_check_password"));
        assert_eq!(session.status.tainted_functions_index, 1);
    }

    #[test]
    fn test_concrete_branch_records_nothing() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        assert_eq!(session.tritonize(&mut debugger, 0x401000, 1), TraceOutcome::Processed);
        let cmp = session.status.last_instruction.clone().unwrap();
        debugger.commit(&session.engine, &cmp).unwrap();
        assert_eq!(session.tritonize(&mut debugger, 0x401003, 1), TraceOutcome::Processed);

        assert!(session.engine.path_constraints().is_empty());
        assert!(!session.status.last_instruction.as_ref().unwrap().symbolized);
    }

    #[test]
    fn test_tritonize_with_trigger_disabled() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);

        assert_eq!(session.tritonize(&mut debugger, 0x401000, 1), TraceOutcome::TriggerDisabled);
        assert!(session.status.last_instruction.is_none());
    }

    #[test]
    fn test_tritonize_pc_zero() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        assert_eq!(session.tritonize(&mut debugger, 0, 1), TraceOutcome::Failed);
        assert!(session.status.last_instruction.is_none());
    }

    #[test]
    fn test_unsupported_instruction_keeps_last_instruction() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        debugger.add_instruction(0x401006, &[0x0f, 0xa2], "cpuid", vec![]);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        assert_eq!(session.tritonize(&mut debugger, 0x401005, 1), TraceOutcome::Processed);
        assert_eq!(session.tritonize(&mut debugger, 0x401006, 1), TraceOutcome::Failed);
        let last = session.status.last_instruction.as_ref().unwrap();
        assert_eq!(last.address, 0x401005);
        assert_eq!(last.mnemonic, Mnemonic::Nop);
    }

    #[test]
    fn test_trace_event_on_other_thread_is_ignored() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 7, pc: 0x401000 }).unwrap();
        assert_eq!(session.status.total_number_traced_ins, 0);
        assert!(session.status.last_instruction.is_none());

        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401000 }).unwrap();
        assert_eq!(session.status.total_number_traced_ins, 1);
    }

    #[test]
    fn test_instruction_limit_declined_suspends() {
        let options = Options { limit_instructions_tracing_mode: 1, ..Options::default() };
        let mut session = setup_session(options);
        let mut debugger = setup_debugger(3);
        debugger.answers.push_back(false);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401005 }).unwrap();
        assert_eq!(debugger.questions, vec!["[?] 1 instructions has been traced. Do you want to execute 1 more?".to_string()]);
        assert!(debugger.suspended);
        assert!(!debugger.step_trace);
    }

    #[test]
    fn test_instruction_limit_accepted_resets_counter() {
        let options = Options { limit_instructions_tracing_mode: 1, ..Options::default() };
        let mut session = setup_session(options);
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();

        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401005 }).unwrap();
        assert_eq!(debugger.questions.len(), 1);
        assert_eq!(session.status.current_trace_counter, 0);
        assert_eq!(session.status.total_number_traced_ins, 1);
        assert!(!debugger.suspended);
    }

    #[test]
    fn test_process_exit_stops_tracing() {
        let mut session = setup_session(Options::default());
        let mut debugger = setup_debugger(3);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();
        session.take_snapshot(&mut debugger).unwrap();
        assert_eq!(debugger.comment(0x401000).as_deref(), Some(SNAPSHOT_COMMENT));

        session.handle_event(&mut debugger, DebugEvent::ProcessExit).unwrap();
        assert!(!session.status.trigger.is_enabled());
        assert!(!debugger.step_trace);
        assert!(!session.snapshot.exists());
        assert_eq!(debugger.comment(0x401000), None);
    }

    #[test]
    fn test_restart_engines_picks_one_engine() {
        use ponce::concolic::executor::Mode;

        let mut session = setup_session(Options::default());
        let mut debugger = SimulatedDebugger::x86_64();
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();
        assert!(session.engine.is_symbolic_engine_enabled());
        assert!(!session.engine.is_taint_engine_enabled());
        assert!(session.engine.is_mode_enabled(Mode::OnlyOnSymbolized));
        assert!(session.engine.is_mode_enabled(Mode::PcTrackingSymbolic));
        assert!(session.status.trigger.is_enabled());
        assert!(debugger.step_trace);

        let options = Options { use_tainting_engine: true, use_symbolic_engine: false, ..Options::default() };
        let mut session = setup_session(options);
        session.start_tainting_or_symbolic_analysis(&mut debugger).unwrap();
        assert!(session.engine.is_taint_engine_enabled());
        assert!(!session.engine.is_symbolic_engine_enabled());
        assert!(session.engine.is_mode_enabled(Mode::OnlyOnTainted));
    }

    #[test]
    fn test_unsupported_processor_has_no_debugger() {
        use ponce::target_info::{ProcessorId, TargetInfo};

        assert!(TargetInfo::new(ProcessorId::Other(0x42), false).arch().is_none());
        assert!(SimulatedDebugger::new(TargetInfo::new(ProcessorId::Other(0x42), false)).is_err());
    }
}
