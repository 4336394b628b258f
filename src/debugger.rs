/// Interface to the live debugger/disassembler hosting the analysis.
/// The debugger is a black box: an event source plus a memory, register and annotation service.

use crate::concolic::instruction::DecodedInstruction;
use crate::target_info::TargetInfo;

pub type Color = u32;

/// Color value meaning "no color set".
pub const DEFCOLOR: Color = 0xFFFF_FFFF;

/// Events delivered by the debugger to `Session::handle_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    ProcessStart,
    ProcessAttach,
    StepInto,
    StepOver,
    Trace { thread_id: u64, pc: u64 },
    Breakpoint { thread_id: u64, pc: u64 },
    ProcessExit,
}

pub trait Debugger {
    // Reads `size` bytes. When `invalidate` is set, cached pages are dropped first.
    fn read_memory(&mut self, address: u64, size: usize, invalidate: bool) -> Option<Vec<u8>>;
    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> bool;

    // Register names are lowercase (`rax`, `eax`, `zf`, `x0`...).
    fn register_value(&mut self, name: &str) -> Option<u64>;
    fn set_register_value(&mut self, name: &str, value: u64) -> bool;

    fn decode_instruction(&mut self, address: u64) -> Option<DecodedInstruction>;
    fn next_instruction_address(&mut self, address: u64) -> Option<u64>;

    // Name of the function called by the call instruction at `address`
    fn callee_name(&mut self, address: u64) -> Option<String>;
    fn function_name(&mut self, address: u64) -> Option<String>;
    fn function_start(&mut self, address: u64) -> Option<u64>;
    fn rename_function(&mut self, start: u64, name: &str) -> bool;

    fn add_breakpoint(&mut self, address: u64) -> bool;
    fn del_breakpoint(&mut self, address: u64) -> bool;
    fn has_breakpoint(&self, address: u64) -> bool;

    fn enable_step_trace(&mut self, enable: bool);
    fn suspend_process(&mut self);
    fn continue_process(&mut self);

    fn item_color(&self, address: u64) -> Color;
    fn set_item_color(&mut self, address: u64, color: Color);
    fn del_item_color(&mut self, address: u64);
    fn comment(&self, address: u64) -> Option<String>;
    fn set_comment(&mut self, address: u64, comment: &str);

    fn current_thread(&self) -> u64;
    fn target_info(&self) -> TargetInfo;

    // Blocking question to the user
    fn ask_yes_no(&mut self, question: &str) -> bool;
}
