use z3::{Config, Context};
use ponce::concolic::blacklist::{clean_function_name, BLACKLIST_BREAKPOINT_COMMENT, BUILTIN_BLACKLIST};
use ponce::concolic::instruction::Operand;
use ponce::debugger::{DebugEvent, Debugger};
use ponce::state::{Options, Session, SimulatedDebugger};

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn setup_session() -> Session<'static> {
        let cfg = Config::new();
        let ctx = Box::leak(Box::new(Context::new(&cfg)));
        Session::new(ctx, Options::default())
    }

    // 0x401000: nop
    // 0x401001: call <callee>
    // 0x401006: nop
    fn setup_debugger(callee: &str) -> SimulatedDebugger {
        let mut debugger = SimulatedDebugger::x86_64();
        debugger.add_instruction(0x401000, &[0x90], "nop", vec![]);
        debugger.add_call(0x401001, &[0xe8, 0xfa, 0x3f, 0x00, 0x00], callee, 0x405000);
        debugger.add_instruction(0x401006, &[0x90], "nop", vec![]);
        debugger.add_instruction(0x405000, &[0xc3], "ret", vec![]);
        debugger.map(0x7fff0000, 0x100);
        debugger.set_register_value("rsp", 0x7fff0080);
        debugger.set_register_value("rip", 0x401000);
        debugger
    }

    // Symbolizes rax while standing on the first nop, then steps onto the call
    fn reach_call(session: &mut Session<'static>, debugger: &mut SimulatedDebugger) {
        session.symbolize_register(debugger, "rax").expect("rax should be symbolized");
        let nop = session.status.last_instruction.clone().expect("nop should have been lifted");
        debugger.commit(&session.engine, &nop).expect("commit failed");
        session.handle_event(debugger, DebugEvent::Trace { thread_id: 1, pc: 0x401001 }).expect("trace event failed");
    }

    #[test]
    fn test_blacklisted_call_sets_one_breakpoint() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("printf");
        reach_call(&mut session, &mut debugger);

        assert_eq!(debugger.breakpoints.iter().copied().collect::<Vec<u64>>(), vec![0x401006]);
        assert_eq!(session.pending_breakpoints.len(), 1);
        assert!(session.pending_breakpoints.contains(0x401006));
        assert!(!session.status.trigger.is_enabled());
        assert!(!debugger.step_trace);
        assert_eq!(debugger.comment(0x401006).as_deref(), Some(BLACKLIST_BREAKPOINT_COMMENT));
        // The call itself was lifted
        assert_eq!(session.status.last_instruction_address(), Some(0x401001));
    }

    #[test]
    fn test_blacklisted_callee_is_not_traced() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("printf");
        reach_call(&mut session, &mut debugger);
        let traced = session.status.total_number_traced_ins;

        session.handle_event(&mut debugger, DebugEvent::Trace { thread_id: 1, pc: 0x405000 }).unwrap();
        assert_eq!(session.status.total_number_traced_ins, traced);
        assert_eq!(session.status.last_instruction_address(), Some(0x401001));
    }

    #[test]
    fn test_breakpoint_after_call_resumes_analysis() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("printf");
        reach_call(&mut session, &mut debugger);
        assert!(session.engine.is_register_symbolized("rax"));

        debugger.set_register_value("rip", 0x401006);
        session.handle_event(&mut debugger, DebugEvent::Breakpoint { thread_id: 1, pc: 0x401006 }).unwrap();

        assert!(session.status.trigger.is_enabled());
        assert!(session.pending_breakpoints.is_empty());
        assert!(debugger.breakpoints.is_empty());
        assert!(debugger.step_trace);
        assert_eq!(debugger.continue_count, 1);
        assert_eq!(debugger.comment(0x401006), None);
        assert_eq!(session.status.last_instruction_address(), Some(0x401006));
        // Return value register clobbered by the callee
        assert!(!session.engine.is_register_symbolized("rax"));
    }

    #[test]
    fn test_user_breakpoint_survives_blacklisting() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("printf");
        debugger.add_breakpoint(0x401006);
        reach_call(&mut session, &mut debugger);
        assert_eq!(debugger.breakpoints.len(), 1);

        session.handle_event(&mut debugger, DebugEvent::Breakpoint { thread_id: 1, pc: 0x401006 }).unwrap();
        assert!(session.status.trigger.is_enabled());
        assert!(debugger.has_breakpoint(0x401006));
        assert_eq!(debugger.continue_count, 0);
        assert!(session.pending_breakpoints.is_empty());
        let traced = session.status.total_number_traced_ins;

        // Second hit: the action does not run again
        session.handle_event(&mut debugger, DebugEvent::Breakpoint { thread_id: 1, pc: 0x401006 }).unwrap();
        assert_eq!(session.status.total_number_traced_ins, traced);
        assert!(debugger.has_breakpoint(0x401006));
        assert_eq!(debugger.continue_count, 0);
        assert!(session.status.tracing_start_time.is_none());
    }

    #[test]
    fn test_regular_call_is_traced() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("check_serial");
        reach_call(&mut session, &mut debugger);

        assert!(debugger.breakpoints.is_empty());
        assert!(session.pending_breakpoints.is_empty());
        assert!(session.status.trigger.is_enabled());
        assert!(debugger.step_trace);
        assert_eq!(session.status.last_instruction_address(), Some(0x401001));
    }

    #[test]
    fn test_decorated_import_is_blacklisted() {
        let mut session = setup_session();
        let mut debugger = setup_debugger("ds:__imp__malloc@4");
        reach_call(&mut session, &mut debugger);

        assert_eq!(session.pending_breakpoints.len(), 1);
        assert!(!session.status.trigger.is_enabled());
    }

    #[test]
    fn test_user_list_replaces_builtin_list() {
        let mut session = setup_session();
        session.blacklist.set_user_list(vec!["check_serial".to_string()]);
        assert!(session.blacklist.has_user_list());
        assert!(session.blacklist.contains("check_serial"));
        assert!(!session.blacklist.contains("printf"));

        let mut debugger = setup_debugger("printf");
        reach_call(&mut session, &mut debugger);
        assert!(session.pending_breakpoints.is_empty());

        session.blacklist.clear_user_list();
        assert!(session.blacklist.contains("printf"));
    }

    #[test]
    fn test_load_blacklist_file() {
        let path = std::env::temp_dir().join("ponce_test_blacklist.txt");
        fs::write(&path, "strcmp\n\n  memcmp  \nstrcmp\n").unwrap();

        let mut session = setup_session();
        assert_eq!(session.blacklist.load_file(&path).unwrap(), 2);
        assert!(session.blacklist.contains("memcmp"));
        assert!(!session.blacklist.contains("printf"));

        assert!(session.blacklist.load_file(Path::new("/nonexistent/ponce/blacklist.txt")).is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_clean_function_name() {
        assert_eq!(clean_function_name("printf"), "printf");
        assert_eq!(clean_function_name("__imp__printf"), "printf");
        assert_eq!(clean_function_name("j_printf"), "printf");
        assert_eq!(clean_function_name("_printf@4"), "printf");
        assert_eq!(clean_function_name("printf_0"), "printf");
        assert_eq!(clean_function_name("?foo@@YAXXZ"), "foo");
        assert_eq!(clean_function_name("cs:__imp_Sleep"), "Sleep");
        assert_eq!(clean_function_name("ds:puts"), "puts");
    }

    #[test]
    fn test_builtin_blacklist() {
        for name in ["printf", "malloc", "free", "fopen", "vsnprintf", "Sleep", "HeapAlloc", "CloseHandle"] {
            assert!(BUILTIN_BLACKLIST.contains(name), "{} should be blacklisted", name);
        }
        assert!(!BUILTIN_BLACKLIST.contains("strcmp"));
    }
}
