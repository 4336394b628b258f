/// In-process stand-in for the debugger: a register file, a sparse memory, a disassembly
/// listing and the annotation store. Used to drive a `Session` without a live debuggee.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{anyhow, Result};
use log::trace;

use crate::concolic::executor::Engine;
use crate::concolic::instruction::{DecodedInstruction, Instruction, MemoryAccess, Operand};
use crate::debugger::{Color, Debugger, DEFCOLOR};
use crate::state::cpu_state::CpuState;
use crate::target_info::{ProcessorId, TargetInfo};

#[derive(Debug, Clone)]
struct Function {
    end: u64,
    name: String,
}

#[derive(Debug, Clone)]
pub struct SimulatedDebugger {
    target: TargetInfo,
    cpu: CpuState,
    mapped: BTreeSet<u64>,
    listing: BTreeMap<u64, DecodedInstruction>,
    callees: BTreeMap<u64, String>,
    functions: BTreeMap<u64, Function>,
    pub thread: u64,
    pub breakpoints: BTreeSet<u64>,
    pub comments: BTreeMap<u64, String>,
    pub colors: BTreeMap<u64, Color>,
    pub step_trace: bool,
    pub suspended: bool,
    pub continue_count: usize,
    // Answers to the yes/no prompts, "yes" once exhausted
    pub answers: VecDeque<bool>,
    pub questions: Vec<String>,
    pub invalidating_reads: usize,
}

impl SimulatedDebugger {
    pub fn new(target: TargetInfo) -> Result<Self> {
        let arch = target.arch().ok_or_else(|| anyhow!("No register file for processor {:?}", target.processor))?;
        Ok(SimulatedDebugger {
            target,
            cpu: CpuState::new(arch),
            mapped: BTreeSet::new(),
            listing: BTreeMap::new(),
            callees: BTreeMap::new(),
            functions: BTreeMap::new(),
            thread: 1,
            breakpoints: BTreeSet::new(),
            comments: BTreeMap::new(),
            colors: BTreeMap::new(),
            step_trace: false,
            suspended: false,
            continue_count: 0,
            answers: VecDeque::new(),
            questions: Vec::new(),
            invalidating_reads: 0,
        })
    }

    pub fn x86_64() -> Self {
        // x86-64 always has a register file
        match SimulatedDebugger::new(TargetInfo::new(ProcessorId::X86, true)) {
            Ok(debugger) => debugger,
            Err(_) => unreachable!(),
        }
    }

    /// Maps `size` zeroed bytes.
    pub fn map(&mut self, address: u64, size: usize) {
        for i in 0..size as u64 {
            if self.mapped.insert(address.wrapping_add(i)) {
                self.cpu.memory_mut().write_byte(address.wrapping_add(i), 0);
            }
        }
    }

    /// Places an instruction in the listing; its bytes are mapped at `address`.
    pub fn add_instruction(&mut self, address: u64, bytes: &[u8], mnemonic: &str, operands: Vec<Operand>) {
        self.write_memory(address, bytes);
        self.listing.insert(address, DecodedInstruction::new(address, bytes.len(), mnemonic, operands));
    }

    pub fn add_call(&mut self, address: u64, bytes: &[u8], callee: &str, target: u64) {
        self.add_instruction(address, bytes, "call", vec![Operand::Immediate(target)]);
        self.callees.insert(address, callee.to_string());
    }

    pub fn add_function(&mut self, start: u64, end: u64, name: &str) {
        self.functions.insert(start, Function { end, name: name.to_string() });
    }

    pub fn register(&self, name: &str) -> u64 {
        self.cpu.concrete_value(name).unwrap_or(0)
    }

    pub fn memory(&self, address: u64, size: usize) -> Vec<u8> {
        (0..size as u64).map(|i| self.cpu.memory().read_byte(address.wrapping_add(i))).collect()
    }

    /// Applies what the engine computed for `instruction` to the debuggee, as if it ran.
    pub fn commit(&mut self, engine: &Engine, instruction: &Instruction) -> Result<()> {
        for name in &instruction.written_registers {
            let value = engine.concrete_register_value(name).map_err(|e| anyhow!("{}", e))?;
            self.cpu.set_concrete_value(name, value).map_err(|e| anyhow!("{}", e))?;
        }
        for store in &instruction.stores {
            let bytes = engine.concrete_memory_bytes(MemoryAccess::new(store.address, store.size)).map_err(|e| anyhow!("{}", e))?;
            self.write_memory(store.address, &bytes);
        }
        let pc = self.cpu.program_counter();
        let next = engine.concrete_register_value(pc).map_err(|e| anyhow!("{}", e))?;
        self.cpu.set_concrete_value(pc, next).map_err(|e| anyhow!("{}", e))?;
        trace!("Committed 0x{:x}, {} = 0x{:x}", instruction.address, pc, next);
        Ok(())
    }

    fn function_containing(&self, address: u64) -> Option<(u64, &Function)> {
        self.functions
            .range(..=address)
            .next_back()
            .filter(|(_, function)| address < function.end)
            .map(|(start, function)| (*start, function))
    }
}

impl Debugger for SimulatedDebugger {
    fn read_memory(&mut self, address: u64, size: usize, invalidate: bool) -> Option<Vec<u8>> {
        if invalidate {
            self.invalidating_reads += 1;
        }
        if (0..size as u64).all(|i| self.mapped.contains(&address.wrapping_add(i))) {
            Some(self.memory(address, size))
        } else {
            None
        }
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> bool {
        for (i, byte) in bytes.iter().enumerate() {
            self.mapped.insert(address.wrapping_add(i as u64));
            self.cpu.memory_mut().write_byte(address.wrapping_add(i as u64), *byte);
        }
        true
    }

    fn register_value(&mut self, name: &str) -> Option<u64> {
        self.cpu.concrete_value(name).ok()
    }

    fn set_register_value(&mut self, name: &str, value: u64) -> bool {
        self.cpu.set_concrete_value(name, value).is_ok()
    }

    fn decode_instruction(&mut self, address: u64) -> Option<DecodedInstruction> {
        self.listing.get(&address).cloned()
    }

    fn next_instruction_address(&mut self, address: u64) -> Option<u64> {
        self.listing.get(&address).map(|decoded| address.wrapping_add(decoded.size as u64))
    }

    fn callee_name(&mut self, address: u64) -> Option<String> {
        self.callees.get(&address).cloned()
    }

    fn function_name(&mut self, address: u64) -> Option<String> {
        self.function_containing(address).map(|(_, function)| function.name.clone())
    }

    fn function_start(&mut self, address: u64) -> Option<u64> {
        self.function_containing(address).map(|(start, _)| start)
    }

    fn rename_function(&mut self, start: u64, name: &str) -> bool {
        match self.functions.get_mut(&start) {
            Some(function) => {
                function.name = name.to_string();
                true
            }
            None => false,
        }
    }

    fn add_breakpoint(&mut self, address: u64) -> bool {
        self.breakpoints.insert(address)
    }

    fn del_breakpoint(&mut self, address: u64) -> bool {
        self.breakpoints.remove(&address)
    }

    fn has_breakpoint(&self, address: u64) -> bool {
        self.breakpoints.contains(&address)
    }

    fn enable_step_trace(&mut self, enable: bool) {
        self.step_trace = enable;
    }

    fn suspend_process(&mut self) {
        self.suspended = true;
    }

    fn continue_process(&mut self) {
        self.suspended = false;
        self.continue_count += 1;
    }

    fn item_color(&self, address: u64) -> Color {
        self.colors.get(&address).copied().unwrap_or(DEFCOLOR)
    }

    fn set_item_color(&mut self, address: u64, color: Color) {
        self.colors.insert(address, color);
    }

    fn del_item_color(&mut self, address: u64) {
        self.colors.remove(&address);
    }

    fn comment(&self, address: u64) -> Option<String> {
        self.comments.get(&address).cloned()
    }

    fn set_comment(&mut self, address: u64, comment: &str) {
        if comment.is_empty() {
            self.comments.remove(&address);
        } else {
            self.comments.insert(address, comment.to_string());
        }
    }

    fn current_thread(&self) -> u64 {
        self.thread
    }

    fn target_info(&self) -> TargetInfo {
        self.target
    }

    fn ask_yes_no(&mut self, question: &str) -> bool {
        self.questions.push(question.to_string());
        self.answers.pop_front().unwrap_or(true)
    }
}
