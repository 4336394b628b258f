/// Checkpoint of the engine and the debuggee, restorable any number of times

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use log::{error, info, warn};

use crate::concolic::executor::Engine;
use crate::concolic::symbolic_var::{AstContext, SymbolicEngine};
use crate::concolic::taint::TaintEngine;
use crate::debugger::Debugger;
use crate::state::cpu_state::CpuState;
use crate::state::runtime_status::RuntimeStatus;

struct SavedState<'ctx> {
    taint: TaintEngine,
    symbolic: SymbolicEngine<'ctx>,
    ast: AstContext<'ctx>,
    cpu: CpuState,
    registers: Vec<(&'static str, u64)>,
    status: RuntimeStatus,
}

pub struct Snapshot<'ctx> {
    // Original value of every debuggee byte written since the snapshot was taken
    memory: BTreeMap<u64, u8>,
    locked: bool,
    taken: bool,
    must_be_restored: bool,
    address: u64,
    saved: Option<SavedState<'ctx>>,
}

impl<'ctx> Default for Snapshot<'ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'ctx> Snapshot<'ctx> {
    pub fn new() -> Self {
        Snapshot {
            memory: BTreeMap::new(),
            locked: true,
            taken: false,
            must_be_restored: false,
            address: 0,
            saved: None,
        }
    }

    /// Saves the engine state, the debuggee registers and the runtime status.
    /// An existing snapshot is discarded first.
    pub fn take_snapshot(&mut self, engine: &Engine<'ctx>, debugger: &mut dyn Debugger, status: &RuntimeStatus) -> Result<()> {
        if self.taken {
            self.reset_engine(debugger);
        }
        let cpu = engine.cpu().map_err(|e| anyhow!("Cannot take a snapshot: {}", e))?.clone();

        self.locked = false;

        let mut registers = Vec::new();
        for spec in cpu.parent_registers() {
            match debugger.register_value(spec.name) {
                Some(value) => registers.push((spec.name, value)),
                None => warn!("Register {} cannot be read, not saved in the snapshot", spec.name),
            }
        }

        self.saved = Some(SavedState {
            taint: engine.taint_engine().clone(),
            symbolic: engine.symbolic_engine().clone(),
            ast: engine.ast_context().clone(),
            cpu,
            registers,
            status: status.clone(),
        });
        self.taken = true;
        info!("Snapshot taken");
        Ok(())
    }

    /// Records the value a byte had before its first write since the snapshot.
    pub fn add_modification(&mut self, address: u64, byte: u8) {
        if !self.locked && !self.memory.contains_key(&address) {
            self.memory.insert(address, byte);
        }
    }

    /// Puts the debuggee and the engine back in the state they had when the snapshot was taken.
    /// The snapshot stays available for further restores.
    pub fn restore_snapshot(&mut self, engine: &mut Engine<'ctx>, debugger: &mut dyn Debugger, status: &mut RuntimeStatus) -> Result<()> {
        let saved = self.saved.as_ref().ok_or_else(|| anyhow!("No snapshot to restore"))?;
        let arch = engine.architecture().ok_or_else(|| anyhow!("Cannot restore the CPU: architecture not supported"))?;
        if saved.cpu.arch() != arch {
            return Err(anyhow!(
                "Cannot restore the CPU: snapshot was taken on {} but the engine is {}",
                saved.cpu.arch(),
                arch
            ));
        }

        for (address, byte) in &self.memory {
            if !debugger.write_memory(*address, &[*byte]) {
                error!("[!] ERROR restoring memory at 0x{:x}", address);
            }
        }
        self.memory.clear();

        engine.set_taint_engine(saved.taint.clone());
        engine.set_symbolic_engine(saved.symbolic.clone());
        engine.set_ast_context(saved.ast.clone());
        engine.set_cpu(saved.cpu.clone()).map_err(|e| anyhow!("Cannot restore the CPU: {}", e))?;
        self.must_be_restored = false;

        for (name, value) in &saved.registers {
            if !debugger.set_register_value(name, *value) {
                error!("[!] ERROR restoring register {}", name);
            }
        }

        *status = saved.status.clone();
        status.last_instruction = None;
        info!("Snapshot restored");
        Ok(())
    }

    /// Discards the snapshot. Does nothing when there is none.
    pub fn reset_engine(&mut self, debugger: &mut dyn Debugger) {
        if !self.taken {
            return;
        }
        self.memory.clear();
        self.saved = None;
        self.taken = false;
        self.locked = true;
        debugger.set_comment(self.address, "");
        debugger.del_item_color(self.address);
        self.address = 0;
    }

    pub fn exists(&self) -> bool {
        self.taken
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    // Stops recording modifications
    pub fn disable(&mut self) {
        self.locked = true;
    }

    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn set_restore(&mut self, value: bool) {
        self.must_be_restored = value;
    }

    pub fn must_be_restored(&self) -> bool {
        self.must_be_restored
    }

    pub fn modification_count(&self) -> usize {
        self.memory.len()
    }

    pub fn saved_registers(&self) -> Vec<(&'static str, u64)> {
        self.saved.as_ref().map(|s| s.registers.clone()).unwrap_or_default()
    }
}
