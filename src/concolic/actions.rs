/// User-triggered operations: choosing the inputs to follow, snapshots and tracing control

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::concolic::instruction::{Instruction, MemoryAccess};
use crate::concolic::oracle;
use crate::concolic::symbolic_var::SymbolicVariable;
use crate::debugger::Debugger;
use crate::state::state_manager::Session;

pub const EXECUTE_NATIVE_QUESTION: &str = "[?] If you execute native code (without tracing) Ponce cannot trace all the memory modifications so the execution snapshot will be deleted. Do you still want to do it? (Y/n):";

impl<'ctx> Session<'ctx> {
    fn current_pc(&self, debugger: &mut dyn Debugger) -> Result<u64> {
        let name = self.engine.cpu().map_err(|e| anyhow!("{}", e))?.program_counter();
        debugger.register_value(name).ok_or_else(|| anyhow!("Could not get the {} value", name))
    }

    // The instruction at pc was lifted before the new source existed
    fn retritonize_if(&mut self, debugger: &mut dyn Debugger, reads_source: impl Fn(&Instruction) -> bool) -> Result<()> {
        let pc = self.current_pc(debugger)?;
        let thread_id = debugger.current_thread();
        let stale = match &self.status.last_instruction {
            None => true,
            Some(instruction) => reads_source(instruction),
        };
        if stale {
            self.tritonize(debugger, pc, thread_id);
        }
        Ok(())
    }

    fn reads_memory(instruction: &Instruction, address: u64, size: usize) -> bool {
        let end = address.saturating_add(size as u64);
        instruction.loads.iter().any(|load| load.address < end && address < load.address.saturating_add(load.size as u64))
    }

    pub fn taint_register(&mut self, debugger: &mut dyn Debugger, name: &str) -> Result<()> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        self.engine.taint_register(name).map_err(|e| anyhow!("{}", e))?;
        info!("[!] Tainting register {}", name);
        self.retritonize_if(debugger, |instruction| instruction.reads_register(name))
    }

    pub fn taint_memory(&mut self, debugger: &mut dyn Debugger, address: u64, size: usize) -> Result<()> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        self.engine.taint_memory(MemoryAccess::new(address, size));
        info!("[+] Tainting memory from 0x{:x} to 0x{:x}. Total: {} bytes", address, address.wrapping_add(size as u64), size);
        self.retritonize_if(debugger, |instruction| Self::reads_memory(instruction, address, size))
    }

    pub fn symbolize_register(&mut self, debugger: &mut dyn Debugger, name: &str) -> Result<SymbolicVariable> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        let pc = self.current_pc(debugger)?;
        info!("[!] Symbolizing register {}", name);

        // The variable starts from the live value
        let value = oracle::need_concrete_register_value(debugger, name)
            .ok_or_else(|| anyhow!("Register {} cannot be read from the debugger", name))?;
        self.engine.set_concrete_register_value(name, value).map_err(|e| anyhow!("{}", e))?;
        let comment = format!("Reg {} at address: 0x{:x}", name, pc);
        let variable = self.engine.symbolize_register(name, &comment).map_err(|e| anyhow!("{}", e))?;

        self.retritonize_if(debugger, |instruction| instruction.reads_register(name))?;
        Ok(variable)
    }

    /// One symbolic variable per byte.
    pub fn symbolize_memory(&mut self, debugger: &mut dyn Debugger, address: u64, size: usize) -> Result<Vec<SymbolicVariable>> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        info!("[+] Symbolizing memory from 0x{:x} to 0x{:x}. Total: {} bytes", address, address.wrapping_add(size as u64), size);

        let mut variables = Vec::with_capacity(size);
        for i in 0..size as u64 {
            let byte_address = address.wrapping_add(i);
            let byte = oracle::need_concrete_memory_value(debugger, byte_address, 1)
                .ok_or_else(|| anyhow!("Memory at 0x{:x} cannot be read from the debugger", byte_address))?;
            self.engine.set_concrete_memory_bytes(byte_address, &byte).map_err(|e| anyhow!("{}", e))?;
            let comment = format!("Mem 0x{:x}", byte_address);
            let variable =
                self.engine.symbolize_memory(MemoryAccess::new(byte_address, 1), &comment).map_err(|e| anyhow!("{}", e))?;
            variables.push(variable);
        }

        self.retritonize_if(debugger, |instruction| Self::reads_memory(instruction, address, size))?;
        Ok(variables)
    }

    pub fn take_snapshot(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        let pc = self.current_pc(debugger)?;
        self.snapshot.take_snapshot(&self.engine, debugger, &self.status)?;
        self.snapshot.set_address(pc);
        self.annotations.set_snapshot_comment(debugger, pc);
        info!("Snapshot Taken");
        Ok(())
    }

    pub fn restore_snapshot(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        self.snapshot.restore_snapshot(&mut self.engine, debugger, &mut self.status)
    }

    pub fn delete_snapshot(&mut self, debugger: &mut dyn Debugger) {
        self.snapshot.reset_engine(debugger);
        info!("[+] Snapshot removed");
    }

    // Native execution cannot be recorded in the snapshot
    fn ask_for_execute_native(&self, debugger: &mut dyn Debugger) -> bool {
        !self.snapshot.exists() || debugger.ask_yes_no(EXECUTE_NATIVE_QUESTION)
    }

    /// Runs without tracing until the next breakpoint. Returns false when the user declined.
    pub fn execute_native(&mut self, debugger: &mut dyn Debugger) -> bool {
        if !self.ask_for_execute_native(debugger) {
            return false;
        }
        self.snapshot.reset_engine(debugger);
        debugger.enable_step_trace(false);
        debugger.continue_process();
        true
    }

    pub fn enable_tracing(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        let pc = self.current_pc(debugger)?;
        let thread_id = debugger.current_thread();
        self.tritonize(debugger, pc, thread_id);
        debug!("[+] Enabling step tracing");
        Ok(())
    }

    /// Returns false when the user declined to drop the snapshot.
    pub fn disable_tracing(&mut self, debugger: &mut dyn Debugger) -> bool {
        if !self.ask_for_execute_native(debugger) {
            return false;
        }
        self.snapshot.reset_engine(debugger);
        debugger.enable_step_trace(false);
        self.status.trigger.disable();
        debug!("Disabling step tracing");
        true
    }

    /// Lets the debuggee run traced until the next symbolic branch.
    pub fn run_until_symbolic_branch(&mut self, debugger: &mut dyn Debugger) -> Result<()> {
        self.start_tainting_or_symbolic_analysis(debugger)?;
        self.status.run_and_break_on_symbolic_branch = true;
        debugger.enable_step_trace(true);
        debugger.continue_process();
        Ok(())
    }
}
