/// Engine processing the traced instructions: concrete CPU state, taint state, symbolic state and path constraints

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;

use log::{debug, trace};
use z3::ast::{Ast, BV};
use z3::Context;

use crate::concolic::concolic_var::ConcolicVar;
use crate::concolic::instruction::{Instruction, MemoryAccess, MemoryOperand, Mnemonic, Operand};
use crate::concolic::path_constraint::PathConstraints;
use crate::concolic::symbolic_var::{AstContext, SymbolicEngine, SymbolicVariable, VariableOrigin};
use crate::concolic::taint::TaintEngine;
use crate::concolic::{executor_branch, executor_int};
use crate::debugger::Debugger;
use crate::state::cpu_state::{CpuState, RegisterSpec};
use crate::state::memory::MemoryError;
use crate::target_info::Arch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    ArchitectureNotSupported,
    ArchitectureMismatch { expected: Arch, found: Arch },
    UnsupportedInstruction { address: u64, mnemonic: String },
    InvalidOperands { address: u64, reason: String },
    UnknownRegister(String),
    Memory(MemoryError),
}

impl Error for EngineError {}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ArchitectureNotSupported => write!(f, "Architecture not supported"),
            EngineError::ArchitectureMismatch { expected, found } => {
                write!(f, "Architecture mismatch: engine is {} but the saved CPU is {}", expected, found)
            }
            EngineError::UnsupportedInstruction { address, mnemonic } => {
                write!(f, "Unsupported instruction '{}' at 0x{:x}", mnemonic, address)
            }
            EngineError::InvalidOperands { address, reason } => write!(f, "Invalid operands at 0x{:x}: {}", address, reason),
            EngineError::UnknownRegister(name) => write!(f, "Unknown register '{}'", name),
            EngineError::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl From<MemoryError> for EngineError {
    fn from(e: MemoryError) -> Self {
        EngineError::Memory(e)
    }
}

/// Engine options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    AlignedMemory,
    OnlyOnSymbolized,
    OnlyOnTainted,
    PcTrackingSymbolic,
    AstOptimizations,
    ConcretizeUndefinedRegisters,
    ConstantFolding,
    SymbolizeIndexRotation,
    TaintThroughPointers,
}

/// Called before the engine reads concrete memory; returns the fresh bytes.
pub type MemoryCallback = Box<dyn Fn(&mut dyn Debugger, u64, usize) -> Option<Vec<u8>>>;
/// Called before the engine reads a concrete (parent) register; returns its fresh value.
pub type RegisterCallback = Box<dyn Fn(&mut dyn Debugger, &str) -> Option<u64>>;

pub struct Engine<'ctx> {
    pub ctx: &'ctx Context,
    cpu: Option<CpuState>,
    taint: TaintEngine,
    symbolic: SymbolicEngine<'ctx>,
    ast: AstContext<'ctx>,
    path_constraints: PathConstraints<'ctx>,
    modes: BTreeSet<Mode>,
    taint_enabled: bool,
    symbolic_enabled: bool,
    memory_callback: Option<MemoryCallback>,
    register_callback: Option<RegisterCallback>,
}

impl<'ctx> Engine<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Engine {
            ctx,
            cpu: None,
            taint: TaintEngine::new(),
            symbolic: SymbolicEngine::new(),
            ast: AstContext::new(ctx),
            path_constraints: PathConstraints::new(),
            modes: BTreeSet::new(),
            taint_enabled: false,
            symbolic_enabled: false,
            memory_callback: None,
            register_callback: None,
        }
    }

    pub fn set_architecture(&mut self, arch: Arch) {
        self.cpu = Some(CpuState::new(arch));
    }

    pub fn architecture(&self) -> Option<Arch> {
        self.cpu.as_ref().map(|cpu| cpu.arch())
    }

    /// Drops every piece of state but the architecture.
    pub fn reset(&mut self) {
        if let Some(arch) = self.architecture() {
            self.cpu = Some(CpuState::new(arch));
        }
        self.taint.clear();
        self.symbolic = SymbolicEngine::new();
        self.ast = AstContext::new(self.ctx);
        self.path_constraints.clear();
        self.modes.clear();
        self.taint_enabled = false;
        self.symbolic_enabled = false;
        self.clear_callbacks();
    }

    pub fn add_memory_callback(&mut self, callback: MemoryCallback) {
        self.memory_callback = Some(callback);
    }

    pub fn add_register_callback(&mut self, callback: RegisterCallback) {
        self.register_callback = Some(callback);
    }

    pub fn clear_callbacks(&mut self) {
        self.memory_callback = None;
        self.register_callback = None;
    }

    pub fn has_callbacks(&self) -> bool {
        self.memory_callback.is_some() && self.register_callback.is_some()
    }

    pub fn enable_taint_engine(&mut self, enable: bool) {
        self.taint_enabled = enable;
    }

    pub fn enable_symbolic_engine(&mut self, enable: bool) {
        self.symbolic_enabled = enable;
    }

    pub fn is_taint_engine_enabled(&self) -> bool {
        self.taint_enabled
    }

    pub fn is_symbolic_engine_enabled(&self) -> bool {
        self.symbolic_enabled
    }

    pub fn set_mode(&mut self, mode: Mode, enabled: bool) {
        if enabled {
            self.modes.insert(mode);
        } else {
            self.modes.remove(&mode);
        }
    }

    pub fn is_mode_enabled(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    // Pieces copied in and out by snapshots

    pub fn cpu(&self) -> Result<&CpuState, EngineError> {
        self.cpu.as_ref().ok_or(EngineError::ArchitectureNotSupported)
    }

    fn cpu_mut(&mut self) -> Result<&mut CpuState, EngineError> {
        self.cpu.as_mut().ok_or(EngineError::ArchitectureNotSupported)
    }

    pub fn set_cpu(&mut self, cpu: CpuState) -> Result<(), EngineError> {
        let expected = self.architecture().ok_or(EngineError::ArchitectureNotSupported)?;
        if cpu.arch() != expected {
            return Err(EngineError::ArchitectureMismatch { expected, found: cpu.arch() });
        }
        self.cpu = Some(cpu);
        Ok(())
    }

    pub fn taint_engine(&self) -> &TaintEngine {
        &self.taint
    }

    pub fn set_taint_engine(&mut self, taint: TaintEngine) {
        self.taint = taint;
    }

    pub fn symbolic_engine(&self) -> &SymbolicEngine<'ctx> {
        &self.symbolic
    }

    /// Replaces the symbolic state. Variable ids keep growing so that new variables never
    /// share a name with one used by the recorded path constraints.
    pub fn set_symbolic_engine(&mut self, symbolic: SymbolicEngine<'ctx>) {
        let next = self.symbolic.next_variable_id();
        self.symbolic = symbolic;
        self.symbolic.reserve_variable_ids(next);
    }

    pub fn ast_context(&self) -> &AstContext<'ctx> {
        &self.ast
    }

    pub fn ast_context_mut(&mut self) -> &mut AstContext<'ctx> {
        &mut self.ast
    }

    pub fn set_ast_context(&mut self, ast: AstContext<'ctx>) {
        self.ast = ast;
    }

    pub fn path_constraints(&self) -> &PathConstraints<'ctx> {
        &self.path_constraints
    }

    pub fn path_constraints_mut(&mut self) -> &mut PathConstraints<'ctx> {
        &mut self.path_constraints
    }

    pub fn symbolic_variables(&self) -> &[SymbolicVariable] {
        self.symbolic.variables()
    }

    pub fn register_spec(&self, name: &str) -> Result<RegisterSpec, EngineError> {
        Ok(*self.cpu()?.register_spec(name)?)
    }

    // Concrete state, no callbacks involved

    pub fn concrete_register_value(&self, name: &str) -> Result<u64, EngineError> {
        self.cpu()?.concrete_value(name)
    }

    pub fn set_concrete_register_value(&mut self, name: &str, value: u64) -> Result<(), EngineError> {
        self.cpu_mut()?.set_concrete_value(name, value)
    }

    pub fn concrete_memory_value(&self, access: MemoryAccess) -> Result<u64, EngineError> {
        Ok(self.cpu()?.memory().read_value(access.address, access.size)?)
    }

    pub fn concrete_memory_bytes(&self, access: MemoryAccess) -> Result<Vec<u8>, EngineError> {
        Ok(self.cpu()?.memory().read_bytes(access.address, access.size)?)
    }

    pub fn set_concrete_memory_value(&mut self, access: MemoryAccess, value: u64) -> Result<(), EngineError> {
        Ok(self.cpu_mut()?.memory_mut().write_value(access.address, access.size, value)?)
    }

    pub fn set_concrete_memory_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), EngineError> {
        Ok(self.cpu_mut()?.memory_mut().write_bytes(address, bytes)?)
    }

    // Taint

    pub fn taint_register(&mut self, name: &str) -> Result<(), EngineError> {
        let spec = self.register_spec(name)?;
        self.taint.taint_register(spec.parent);
        Ok(())
    }

    pub fn untaint_register(&mut self, name: &str) -> Result<(), EngineError> {
        let spec = self.register_spec(name)?;
        self.taint.untaint_register(spec.parent);
        Ok(())
    }

    pub fn is_register_tainted(&self, name: &str) -> bool {
        match self.register_spec(name) {
            Ok(spec) => self.taint.is_register_tainted(spec.parent),
            Err(_) => false,
        }
    }

    pub fn taint_memory(&mut self, access: MemoryAccess) {
        self.taint.taint_memory(access.address, access.size);
    }

    pub fn untaint_memory(&mut self, access: MemoryAccess) {
        self.taint.untaint_memory(access.address, access.size);
    }

    pub fn is_memory_tainted(&self, access: MemoryAccess) -> bool {
        self.taint.is_memory_tainted(access.address, access.size)
    }

    // Symbolic state

    /// Turns a (sub-)register into a fresh symbolic variable.
    pub fn symbolize_register(&mut self, name: &str, comment: &str) -> Result<SymbolicVariable, EngineError> {
        let spec = self.register_spec(name)?;
        let parent = self.register_spec(spec.parent)?;
        let concrete = self.concrete_register_value(name)?;
        let variable = self.symbolic.new_variable(VariableOrigin::Register(spec.name.to_string()), spec.size, comment);
        let node = self.ast.variable(&variable);
        let merged = self.merged_register_ast(&spec, &parent, concrete, Some(node))?;
        if let Some(ast) = merged {
            self.symbolic.registers.insert(parent.name.to_string(), ast);
        }
        debug!("Symbolized register {} as {}", spec.name, variable.name);
        Ok(variable)
    }

    /// Turns a memory range into one fresh symbolic variable spanning all its bytes.
    pub fn symbolize_memory(&mut self, access: MemoryAccess, comment: &str) -> Result<SymbolicVariable, EngineError> {
        if access.size == 0 || access.size > 8 {
            return Err(EngineError::Memory(MemoryError::IncorrectSliceLength));
        }
        let variable = self.symbolic.new_variable(VariableOrigin::Memory(access.address), (access.size * 8) as u32, comment);
        let node = self.ast.variable(&variable);
        for i in 0..access.size {
            let byte = node.extract((8 * i + 7) as u32, (8 * i) as u32);
            self.symbolic.memory.insert(access.address.wrapping_add(i as u64), byte);
        }
        debug!("Symbolized memory 0x{:x} ({} bytes) as {}", access.address, access.size, variable.name);
        Ok(variable)
    }

    pub fn concretize_register(&mut self, name: &str) -> Result<(), EngineError> {
        let spec = self.register_spec(name)?;
        self.symbolic.concretize_register(spec.parent);
        Ok(())
    }

    pub fn concretize_memory(&mut self, access: MemoryAccess) {
        self.symbolic.concretize_memory(access.address, access.size);
    }

    pub fn is_register_symbolized(&self, name: &str) -> bool {
        match self.register_spec(name) {
            Ok(spec) => self.symbolic.is_register_symbolized(spec.parent),
            Err(_) => false,
        }
    }

    pub fn is_memory_symbolized(&self, access: MemoryAccess) -> bool {
        self.symbolic.is_memory_symbolized(access.address, access.size)
    }

    // Current expression of a register, a constant node when it is concrete
    pub fn register_ast(&self, name: &str) -> Result<BV<'ctx>, EngineError> {
        let spec = self.register_spec(name)?;
        match self.symbolic.registers.get(spec.parent) {
            Some(ast) if spec.is_parent() => Ok(ast.clone()),
            Some(ast) => Ok(ast.extract(spec.shift + spec.size - 1, spec.shift)),
            None => Ok(BV::from_u64(self.ctx, self.concrete_register_value(name)?, spec.size)),
        }
    }

    pub fn memory_ast(&self, access: MemoryAccess) -> Result<BV<'ctx>, EngineError> {
        let bytes = self.concrete_memory_bytes(access)?;
        let mut result: Option<BV<'ctx>> = None;
        for (i, byte) in bytes.iter().enumerate() {
            let node = match self.symbolic.memory.get(&access.address.wrapping_add(i as u64)) {
                Some(ast) => ast.clone(),
                None => BV::from_u64(self.ctx, *byte as u64, 8),
            };
            result = Some(match result {
                Some(low) => node.concat(&low),
                None => node,
            });
        }
        result.ok_or(EngineError::Memory(MemoryError::IncorrectSliceLength))
    }

    // Expression of the parent register after writing `value` into the sub-register `spec`
    fn merged_register_ast(
        &self,
        spec: &RegisterSpec,
        parent: &RegisterSpec,
        concrete: u64,
        value: Option<BV<'ctx>>,
    ) -> Result<Option<BV<'ctx>>, EngineError> {
        let full = spec.is_parent() || (spec.size == 32 && parent.size == 64);
        if full {
            return Ok(value.map(|ast| if parent.size > spec.size { ast.zero_ext(parent.size - spec.size) } else { ast }));
        }
        let old = self.symbolic.registers.get(parent.name).cloned();
        if value.is_none() && old.is_none() {
            return Ok(None);
        }
        let old = match old {
            Some(ast) => ast,
            None => BV::from_u64(self.ctx, self.concrete_register_value(parent.name)?, parent.size),
        };
        let mut result = value.unwrap_or_else(|| BV::from_u64(self.ctx, concrete, spec.size));
        if spec.shift > 0 {
            result = result.concat(&old.extract(spec.shift - 1, 0));
        }
        let top = spec.shift + spec.size;
        if top < parent.size {
            result = old.extract(parent.size - 1, top).concat(&result);
        }
        Ok(Some(result))
    }

    // Applies the AST modes; None when the expression folds to a constant
    pub(crate) fn finalize_ast(&self, ast: BV<'ctx>) -> Option<BV<'ctx>> {
        let ast = if self.is_mode_enabled(Mode::AstOptimizations) { ast.simplify() } else { ast };
        if self.is_mode_enabled(Mode::ConstantFolding) && ast.simplify().as_u64().is_some() {
            return None;
        }
        Some(ast)
    }

    /// Lifts one instruction: updates concrete, taint and symbolic state, records path constraints
    /// and fills the analysis fields of `instruction`.
    pub fn processing(&mut self, instruction: &mut Instruction, debugger: &mut dyn Debugger) -> Result<(), EngineError> {
        let arch = self.architecture().ok_or(EngineError::ArchitectureNotSupported)?;
        let mnemonic = instruction.mnemonic.clone();
        if !arch.is_x86_family() || matches!(mnemonic, Mnemonic::Other(_)) {
            return Err(EngineError::UnsupportedInstruction { address: instruction.address, mnemonic: mnemonic.to_string() });
        }

        trace!("Processing {}", instruction);
        let mut lifter = Lifter { engine: self, instruction, debugger };
        match mnemonic {
            Mnemonic::Mov => executor_int::handle_mov(&mut lifter)?,
            Mnemonic::Movzx => executor_int::handle_movzx(&mut lifter)?,
            Mnemonic::Lea => executor_int::handle_lea(&mut lifter)?,
            Mnemonic::Add => executor_int::handle_binary(&mut lifter, executor_int::AluOp::Add, true)?,
            Mnemonic::Sub => executor_int::handle_binary(&mut lifter, executor_int::AluOp::Sub, true)?,
            Mnemonic::Xor => executor_int::handle_binary(&mut lifter, executor_int::AluOp::Xor, true)?,
            Mnemonic::And => executor_int::handle_binary(&mut lifter, executor_int::AluOp::And, true)?,
            Mnemonic::Or => executor_int::handle_binary(&mut lifter, executor_int::AluOp::Or, true)?,
            Mnemonic::Cmp => executor_int::handle_binary(&mut lifter, executor_int::AluOp::Sub, false)?,
            Mnemonic::Test => executor_int::handle_binary(&mut lifter, executor_int::AluOp::And, false)?,
            Mnemonic::Inc => executor_int::handle_inc_dec(&mut lifter, true)?,
            Mnemonic::Dec => executor_int::handle_inc_dec(&mut lifter, false)?,
            Mnemonic::Not => executor_int::handle_not(&mut lifter)?,
            Mnemonic::Neg => executor_int::handle_neg(&mut lifter)?,
            Mnemonic::Push => executor_int::handle_push(&mut lifter)?,
            Mnemonic::Pop => executor_int::handle_pop(&mut lifter)?,
            Mnemonic::Nop => {}
            Mnemonic::Jmp => executor_branch::handle_jmp(&mut lifter)?,
            Mnemonic::Jcc(condition) => executor_branch::handle_jcc(&mut lifter, condition)?,
            Mnemonic::Call => executor_branch::handle_call(&mut lifter)?,
            Mnemonic::Ret => executor_branch::handle_ret(&mut lifter)?,
            Mnemonic::Other(_) => {}
        }

        let control_flow = matches!(mnemonic, Mnemonic::Jmp | Mnemonic::Jcc(_) | Mnemonic::Call | Mnemonic::Ret);
        if !control_flow {
            let next = lifter.instruction.next_address;
            lifter.set_program_counter(next)?;
        }
        Ok(())
    }
}

/// State shared by the instruction handlers while one instruction is processed.
pub(crate) struct Lifter<'a, 'ctx> {
    pub engine: &'a mut Engine<'ctx>,
    pub instruction: &'a mut Instruction,
    pub debugger: &'a mut dyn Debugger,
}

impl<'a, 'ctx> Lifter<'a, 'ctx> {
    pub fn ctx(&self) -> &'ctx Context {
        self.engine.ctx
    }

    pub fn invalid(&self, reason: &str) -> EngineError {
        EngineError::InvalidOperands { address: self.instruction.address, reason: reason.to_string() }
    }

    pub fn pointer_bits(&self) -> Result<u32, EngineError> {
        let arch = self.engine.architecture().ok_or(EngineError::ArchitectureNotSupported)?;
        Ok((arch.pointer_size() * 8) as u32)
    }

    pub fn operand(&self, index: usize) -> Result<Operand, EngineError> {
        self.instruction.operands.get(index).cloned().ok_or_else(|| self.invalid("missing operand"))
    }

    // Width in bits; immediates take the width of the other operand
    pub fn operand_size(&self, operand: &Operand) -> Option<u32> {
        match operand {
            Operand::Register(name) => self.engine.register_spec(name).ok().map(|spec| spec.size),
            Operand::Memory(mem) => Some((mem.size * 8) as u32),
            Operand::Immediate(_) => None,
        }
    }

    pub fn read_operand(&mut self, operand: &Operand, size: u32) -> Result<ConcolicVar<'ctx>, EngineError> {
        match operand {
            Operand::Immediate(value) => Ok(ConcolicVar::new_concrete(*value, size)),
            Operand::Register(name) => Ok(self.read_register(name)?.zero_extend(size)),
            Operand::Memory(mem) => {
                let (address, pointer_tainted) = self.effective_address(mem)?;
                let mut value = self.read_memory(address, mem.size)?;
                if pointer_tainted && self.engine.is_mode_enabled(Mode::TaintThroughPointers) {
                    value.tainted = true;
                }
                Ok(value.zero_extend(size))
            }
        }
    }

    pub fn write_operand(&mut self, operand: &Operand, value: ConcolicVar<'ctx>) -> Result<(), EngineError> {
        match operand {
            Operand::Register(name) => self.write_register(name, value),
            Operand::Memory(mem) => {
                let (address, _) = self.effective_address(mem)?;
                self.write_memory(address, mem.size, value)
            }
            Operand::Immediate(_) => Err(self.invalid("immediate destination")),
        }
    }

    // Refreshes a parent register from the debuggee through the register callback
    fn sync_register(&mut self, parent: &str) -> Result<(), EngineError> {
        let fetched = match &self.engine.register_callback {
            Some(callback) => callback(&mut *self.debugger, parent),
            None => None,
        };
        if let Some(value) = fetched {
            self.engine.cpu_mut()?.set_concrete_value(parent, value)?;
        }
        Ok(())
    }

    fn sync_memory(&mut self, address: u64, size: usize) -> Result<(), EngineError> {
        let fetched = match &self.engine.memory_callback {
            Some(callback) => callback(&mut *self.debugger, address, size),
            None => None,
        };
        if let Some(bytes) = fetched {
            if bytes.len() == size {
                self.engine.cpu_mut()?.memory_mut().write_bytes(address, &bytes)?;
            }
        }
        Ok(())
    }

    pub fn read_register(&mut self, name: &str) -> Result<ConcolicVar<'ctx>, EngineError> {
        let spec = self.engine.register_spec(name)?;
        self.sync_register(spec.parent)?;
        let concrete = self.engine.concrete_register_value(spec.name)?;
        let symbolic = if self.engine.symbolic_enabled {
            self.engine.symbolic.registers.get(spec.parent).map(|ast| {
                if spec.is_parent() {
                    ast.clone()
                } else {
                    ast.extract(spec.shift + spec.size - 1, spec.shift)
                }
            })
        } else {
            None
        };
        let tainted = self.engine.taint_enabled && self.engine.taint.is_register_tainted(spec.parent);
        self.instruction.note_read_register(spec.name);
        Ok(ConcolicVar::new(concrete, symbolic, tainted, spec.size))
    }

    pub fn write_register(&mut self, name: &str, value: ConcolicVar<'ctx>) -> Result<(), EngineError> {
        let spec = self.engine.register_spec(name)?;
        let parent = self.engine.register_spec(spec.parent)?;
        let value = if value.size >= spec.size { value.truncate(spec.size) } else { value.zero_extend(spec.size) };
        let full = spec.is_parent() || (spec.size == 32 && parent.size == 64);

        let merged = if self.engine.symbolic_enabled {
            self.engine.merged_register_ast(&spec, &parent, value.concrete, value.symbolic.clone())?
        } else {
            None
        };
        self.engine.cpu_mut()?.set_concrete_value(spec.name, value.concrete)?;

        match merged.and_then(|ast| self.engine.finalize_ast(ast)) {
            Some(ast) => {
                let text = self.engine.symbolic.new_expression(&ast, spec.name);
                self.instruction.symbolic_expressions.push(text);
                self.engine.symbolic.registers.insert(parent.name.to_string(), ast);
                self.instruction.symbolized = true;
            }
            None => self.engine.symbolic.concretize_register(parent.name),
        }

        if self.engine.taint_enabled {
            let tainted = value.tainted || (!full && self.engine.taint.is_register_tainted(parent.name));
            self.engine.taint.set_register_taint(parent.name, tainted);
            if tainted {
                self.instruction.tainted = true;
            }
        }
        self.instruction.note_written_register(spec.name);
        Ok(())
    }

    pub fn set_program_counter(&mut self, target: u64) -> Result<(), EngineError> {
        let cpu = self.engine.cpu()?;
        let pc = cpu.program_counter();
        let size = cpu.register_spec(pc)?.size;
        self.engine.cpu_mut()?.set_concrete_value(pc, target)?;
        self.engine.symbolic.concretize_register(pc);
        self.engine.taint.untaint_register(pc);
        trace!("{} = 0x{:x} ({} bits)", pc, target, size);
        Ok(())
    }

    // Concrete address of a memory operand and whether any register used to form it is tainted
    pub fn effective_address(&mut self, mem: &MemoryOperand) -> Result<(u64, bool), EngineError> {
        let pc = self.engine.cpu()?.program_counter();
        let mut address = mem.displacement as u64;
        let mut tainted = false;
        if let Some(base) = &mem.base {
            if base.eq_ignore_ascii_case(pc) {
                address = address.wrapping_add(self.instruction.next_address);
            } else {
                let value = self.read_register(base)?;
                address = address.wrapping_add(value.concrete);
                tainted |= value.tainted;
            }
        }
        if let Some(index) = &mem.index {
            let value = self.read_register(index)?;
            address = address.wrapping_add(value.concrete.wrapping_mul(mem.scale));
            tainted |= value.tainted;
        }
        if self.pointer_bits()? == 32 {
            address &= 0xFFFF_FFFF;
        }
        Ok((address, tainted))
    }

    pub fn read_memory(&mut self, address: u64, size: usize) -> Result<ConcolicVar<'ctx>, EngineError> {
        if size == 0 || size > 8 {
            return Err(self.invalid("memory access size"));
        }
        self.sync_memory(address, size)?;
        let concrete = self.engine.concrete_memory_value(MemoryAccess::new(address, size))?;
        let symbolic = if self.engine.symbolic_enabled && self.engine.symbolic.is_memory_symbolized(address, size) {
            Some(self.engine.memory_ast(MemoryAccess::new(address, size))?)
        } else {
            None
        };
        let tainted = self.engine.taint_enabled && self.engine.taint.is_memory_tainted(address, size);
        self.instruction.loads.push(MemoryAccess::new(address, size));
        Ok(ConcolicVar::new(concrete, symbolic, tainted, (size * 8) as u32))
    }

    pub fn write_memory(&mut self, address: u64, size: usize, value: ConcolicVar<'ctx>) -> Result<(), EngineError> {
        if size == 0 || size > 8 {
            return Err(self.invalid("memory access size"));
        }
        let bits = (size * 8) as u32;
        let value = if value.size >= bits { value.truncate(bits) } else { value.zero_extend(bits) };
        self.engine.set_concrete_memory_value(MemoryAccess::new(address, size), value.concrete)?;

        let symbolic = if self.engine.symbolic_enabled {
            value.symbolic.clone().and_then(|ast| self.engine.finalize_ast(ast))
        } else {
            None
        };
        match symbolic {
            Some(ast) => {
                let text = self.engine.symbolic.new_expression(&ast, &format!("[0x{:x}]", address));
                self.instruction.symbolic_expressions.push(text);
                for i in 0..size {
                    let byte = ast.extract((8 * i + 7) as u32, (8 * i) as u32);
                    self.engine.symbolic.memory.insert(address.wrapping_add(i as u64), byte);
                }
                self.instruction.symbolized = true;
            }
            None => self.engine.symbolic.concretize_memory(address, size),
        }

        if self.engine.taint_enabled {
            self.engine.taint.set_memory_taint(address, size, value.tainted);
            if value.tainted {
                self.instruction.tainted = true;
            }
        }
        self.instruction.stores.push(MemoryAccess::new(address, size));
        Ok(())
    }

    pub fn write_flag(&mut self, name: &str, concrete: bool, symbolic: Option<BV<'ctx>>, tainted: bool) -> Result<(), EngineError> {
        self.write_register(name, ConcolicVar::new(concrete as u64, symbolic, tainted, 1))
    }
}
