/// Counters and flags describing the ongoing tracing session

use std::time::Instant;

use crate::concolic::instruction::Instruction;

/// Gate deciding whether traced instructions are fed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trigger {
    enabled: bool,
}

impl Trigger {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeStatus {
    pub total_number_traced_ins: u64,
    pub current_trace_counter: u64,
    pub total_number_symbolic_ins: u64,
    pub total_number_symbolic_conditions: u64,
    pub tainted_functions_index: u32,
    pub trigger: Trigger,
    pub last_instruction: Option<Instruction>,
    pub tracing_start_time: Option<Instant>,
    pub analyzed_thread: Option<u64>,
    pub run_and_break_on_symbolic_branch: bool,
}

impl RuntimeStatus {
    pub fn new() -> Self {
        RuntimeStatus::default()
    }

    pub fn reset_counters(&mut self) {
        self.total_number_traced_ins = 0;
        self.current_trace_counter = 0;
        self.total_number_symbolic_ins = 0;
        self.total_number_symbolic_conditions = 0;
        self.tainted_functions_index = 0;
    }

    pub fn last_instruction_address(&self) -> Option<u64> {
        self.last_instruction.as_ref().map(|inst| inst.address)
    }
}
