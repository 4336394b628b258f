/// Per-instruction driver: feeds every traced instruction to the engine and reacts to debugger events

use std::time::Instant;

use anyhow::{anyhow, Result};
use log::{debug, error, info, trace, warn};

use crate::concolic::executor::Mode;
use crate::concolic::instruction::{Instruction, MAX_OPCODE_SIZE};
use crate::concolic::oracle;
use crate::debugger::{DebugEvent, Debugger, DEFCOLOR};
use crate::state::annotations::rename_tainted_function;
use crate::state::state_manager::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Processed,
    TriggerDisabled,
    Failed,
}

impl<'ctx> Session<'ctx> {
    /// Lifts the instruction at `pc` and raises the annotations it deserves.
    pub fn tritonize(&mut self, debugger: &mut dyn Debugger, pc: u64, thread_id: u64) -> TraceOutcome {
        if !self.status.trigger.is_enabled() {
            return TraceOutcome::TriggerDisabled;
        }
        if pc == 0 {
            error!("[!] Some error at tritonize since pc is 0");
            return TraceOutcome::Failed;
        }

        let decoded = match debugger.decode_instruction(pc) {
            Some(decoded) => decoded,
            None => {
                error!("[!] Cannot decode the instruction at 0x{:x}", pc);
                return TraceOutcome::Failed;
            }
        };
        assert!(
            decoded.size <= MAX_OPCODE_SIZE,
            "instruction at 0x{:x} is {} bytes long, opcodes are at most {} bytes",
            pc,
            decoded.size,
            MAX_OPCODE_SIZE
        );
        let opcode = match debugger.read_memory(pc, decoded.size, false) {
            Some(bytes) => bytes,
            None => {
                error!("[!] Cannot read the opcode at 0x{:x}", pc);
                return TraceOutcome::Failed;
            }
        };

        let mut instruction = Instruction::new(&decoded, opcode, thread_id);
        if let Err(e) = self.engine.processing(&mut instruction, debugger) {
            error!("[!] Instruction at 0x{:x} not supported by the engine: {}", pc, e);
            return TraceOutcome::Failed;
        }
        trace!("{}", instruction);

        // The debuggee has not executed the instruction yet, memory still holds the old bytes
        if self.snapshot.exists() {
            for store in &instruction.stores {
                for i in 0..store.size as u64 {
                    let address = store.address.wrapping_add(i);
                    if let Some(bytes) = debugger.read_memory(address, 1, true) {
                        if let Some(byte) = bytes.first() {
                            self.snapshot.add_modification(address, *byte);
                        }
                    }
                }
            }
        }

        self.annotate(debugger, &instruction);

        if instruction.branch && instruction.symbolized {
            debug!(
                "[+] Branch symbolized detected at 0x{:x}: 0x{:x} or 0x{:x}, Taken:{}",
                pc,
                instruction.next_address,
                instruction.branch_target.unwrap_or(0),
                instruction.condition_taken
            );
            if self.status.run_and_break_on_symbolic_branch {
                self.status.run_and_break_on_symbolic_branch = false;
                debugger.suspend_process();
            }
        }

        self.status.last_instruction = Some(instruction);
        TraceOutcome::Processed
    }

    fn annotate(&mut self, debugger: &mut dyn Debugger, instruction: &Instruction) {
        let pc = instruction.address;
        if self.options.add_comments_controlled_operands && !instruction.branch {
            self.comment_controlled_operands(debugger, instruction);
        }
        if self.options.add_comments_symbolic_expressions && !instruction.symbolic_expressions.is_empty() {
            let text = instruction.symbolic_expressions.join("\n");
            self.annotations.set_comment(debugger, pc, &text);
        }
        if self.options.paint_executed_instructions && debugger.item_color(pc) == DEFCOLOR {
            self.annotations.set_color(debugger, pc, self.options.color_executed_instruction);
        }

        if !(instruction.tainted || instruction.symbolized) {
            return;
        }
        self.status.total_number_symbolic_ins += 1;
        if self.options.rename_tainted_function_names {
            rename_tainted_function(debugger, pc, &mut self.status.tainted_functions_index);
        }
        if instruction.branch {
            let text = if self.options.use_tainting_engine { "Tainted branch!" } else { "Symbolic branch, make your choice!" };
            self.annotations.set_comment(debugger, pc, text);
            self.status.total_number_symbolic_conditions += 1;
            self.annotations.set_color(debugger, pc, self.options.color_tainted_condition);
        } else {
            self.annotations.set_color(debugger, pc, self.options.color_tainted);
        }
    }

    // Lists the registers and memory cells read by the instruction that the user controls
    fn comment_controlled_operands(&mut self, debugger: &mut dyn Debugger, instruction: &Instruction) {
        let controlled_register = |name: &str| {
            if self.options.use_tainting_engine {
                self.engine.is_register_tainted(name)
            } else {
                self.engine.is_register_symbolized(name)
            }
        };
        let registers: Vec<&str> =
            instruction.read_registers.iter().map(String::as_str).filter(|name| controlled_register(*name)).collect();
        let memory: Vec<String> = instruction
            .loads
            .iter()
            .filter(|access| {
                if self.options.use_tainting_engine {
                    self.engine.is_memory_tainted(**access)
                } else {
                    self.engine.is_memory_symbolized(**access)
                }
            })
            .map(|access| format!("0x{:x}", access.address))
            .collect();
        if registers.is_empty() && memory.is_empty() {
            return;
        }

        let mut comment = if self.options.use_tainting_engine { "Tainted instruction" } else { "Symbolic instruction" }.to_string();
        if !registers.is_empty() {
            comment.push_str(&format!("\nRegister: {}", registers.join(" ")));
        }
        if !memory.is_empty() {
            comment.push_str(&format!("\nMemory: {}", memory.join(" ")));
        }
        self.annotations.set_comment(debugger, instruction.address, &comment);
    }

    /// Resets the engine for the architecture of the debuggee and arms it according to the options.
    pub fn restart_engines(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        let target = debugger.target_info();
        let arch = match target.arch() {
            Some(arch) => arch,
            None => {
                error!("[!] Architecture not supported by Ponce ({:?})", target.processor);
                return Err(anyhow!("Architecture not supported: {:?}", target.processor));
            }
        };

        self.engine.set_architecture(arch);
        self.engine.reset();
        oracle::install(&mut self.engine);
        self.status.last_instruction = None;

        let tainting = self.options.use_tainting_engine;
        self.engine.enable_taint_engine(tainting);
        self.engine.enable_symbolic_engine(!tainting);

        self.engine.set_mode(Mode::AlignedMemory, true);
        self.engine.set_mode(Mode::PcTrackingSymbolic, true);
        self.engine.set_mode(if tainting { Mode::OnlyOnTainted } else { Mode::OnlyOnSymbolized }, true);
        self.engine.set_mode(Mode::AstOptimizations, self.options.ast_optimizations);
        self.engine.set_mode(Mode::ConcretizeUndefinedRegisters, self.options.concretize_undefined_registers);
        self.engine.set_mode(Mode::ConstantFolding, self.options.constant_folding);
        self.engine.set_mode(Mode::SymbolizeIndexRotation, self.options.symbolize_index_rotation);
        self.engine.set_mode(Mode::TaintThroughPointers, self.options.taint_through_pointers);

        self.status.trigger.disable();
        self.status.reset_counters();
        self.pending_breakpoints.clear();
        info!("[+] Engines restarted for {} ({} engine)", arch, if tainting { "tainting" } else { "symbolic" });
        Ok(())
    }

    /// Arms the tracer on the current thread. Does nothing when it is already running.
    pub fn start_tainting_or_symbolic_analysis(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        if self.status.trigger.is_enabled() {
            return Ok(());
        }
        self.restart_engines(debugger)?;
        self.annotations.delete_all(debugger, self.snapshot.exists());
        self.status.trigger.enable();
        self.status.analyzed_thread = Some(debugger.current_thread());
        debugger.enable_step_trace(true);
        self.status.tracing_start_time = None;
        Ok(())
    }

    pub fn handle_event(&mut self, debugger: &mut dyn Debugger, event: DebugEvent) -> Result<()> {
        match event {
            DebugEvent::ProcessStart | DebugEvent::ProcessAttach => {
                debug!("[+] Starting the debugged process. Resetting all the engines.");
                self.restart_engines(debugger)?;
            }
            DebugEvent::StepInto | DebugEvent::StepOver => self.status.tracing_start_time = None,
            DebugEvent::Trace { thread_id, pc } => self.on_trace(debugger, thread_id, pc),
            DebugEvent::Breakpoint { thread_id, pc } => self.on_breakpoint(debugger, thread_id, pc),
            DebugEvent::ProcessExit => {
                debug!("[!] Process exiting...");
                self.status.trigger.disable();
                debugger.enable_step_trace(false);
                self.snapshot.reset_engine(debugger);
            }
        }
        Ok(())
    }

    fn is_analyzed_thread(&self, thread_id: u64) -> bool {
        self.status.analyzed_thread.map_or(true, |analyzed| analyzed == thread_id)
    }

    fn on_trace(&mut self, debugger: &mut dyn Debugger, thread_id: u64, pc: u64) {
        if !self.is_analyzed_thread(thread_id) || !self.status.trigger.is_enabled() {
            return;
        }
        if self.should_blacklist(debugger, pc, thread_id) {
            return;
        }
        // A breakpoint on the instruction already delivered it
        if self.status.last_instruction_address() != Some(pc) {
            self.tritonize(debugger, pc, thread_id);
        }

        self.status.current_trace_counter += 1;
        self.status.total_number_traced_ins += 1;
        if self.status.total_number_traced_ins % 1000 == 0 {
            debug!(
                "Instructions traced: {} Symbolic instructions: {} Symbolic conditions: {} Time: {} secs",
                self.status.total_number_traced_ins,
                self.status.total_number_symbolic_ins,
                self.status.total_number_symbolic_conditions,
                self.status.tracing_start_time.map_or(0, |start| start.elapsed().as_secs())
            );
        }

        let limit = self.options.limit_instructions_tracing_mode;
        if limit > 0 && self.status.current_trace_counter >= limit {
            let question = format!(
                "[?] {} instructions has been traced. Do you want to execute {} more?",
                self.status.total_number_traced_ins, limit
            );
            if debugger.ask_yes_no(&question) {
                self.status.current_trace_counter = 0;
            } else {
                self.stop_tracing(debugger);
            }
        }

        if self.options.limit_time > 0 {
            match self.status.tracing_start_time {
                None => self.status.tracing_start_time = Some(Instant::now()),
                Some(start) if start.elapsed().as_secs() >= self.options.limit_time => {
                    let question = format!(
                        "[?] the tracing was working for {} seconds({} inst traced!). Do you want to execute it {} more?",
                        start.elapsed().as_secs(),
                        self.status.total_number_traced_ins,
                        self.options.limit_time
                    );
                    if debugger.ask_yes_no(&question) {
                        self.status.tracing_start_time = Some(Instant::now());
                    } else {
                        self.stop_tracing(debugger);
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn stop_tracing(&mut self, debugger: &mut dyn Debugger) {
        debugger.enable_step_trace(false);
        debugger.suspend_process();
        warn!("[!] Process suspended (Traced {} instructions)", self.status.total_number_traced_ins);
    }

    fn on_breakpoint(&mut self, debugger: &mut dyn Debugger, thread_id: u64, pc: u64) {
        if !self.is_analyzed_thread(thread_id) {
            return;
        }
        // Consumed on the first hit. Later hits of a user breakpoint are plain user breakpoints.
        let mut action = match self.pending_breakpoints.take(pc) {
            Some(action) => action,
            None => {
                // User breakpoint: the time budget restarts
                self.status.tracing_start_time = None;
                return;
            }
        };

        (action.callback)(self, debugger, pc);
        self.tritonize(debugger, pc, thread_id);
        self.status.current_trace_counter += 1;
        self.status.total_number_traced_ins += 1;

        if !action.ignore_breakpoint {
            debugger.del_breakpoint(pc);
            debugger.enable_step_trace(true);
            debugger.continue_process();
            self.annotations.clear_comment(debugger, pc);
        } else {
            self.status.tracing_start_time = None;
        }
    }
}
