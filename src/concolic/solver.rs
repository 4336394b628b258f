/// Solving recorded path constraints and injecting the solutions into the debuggee

use std::fmt;

use log::{debug, error, info, trace, warn};
use z3::ast::Ast;

use crate::concolic::instruction::{Instruction, MemoryAccess, Mnemonic};
use crate::concolic::symbolic_var::VariableOrigin;
use crate::concolic::z3_integration::{SolverStatus, Z3Integration};
use crate::debugger::Debugger;
use crate::state::flags::Flags;
use crate::state::state_manager::Session;

/// Values that drive execution through one branch edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    pub memory: Vec<(MemoryAccess, u64)>,
    pub registers: Vec<(String, u64)>,
    pub path_constraint_index: usize,
    pub src_address: u64,
    pub dst_address: u64,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Input #{} 0x{:x} -> 0x{:x}:", self.path_constraint_index, self.src_address, self.dst_address)?;
        for (access, value) in &self.memory {
            write!(f, " [0x{:x}:{}]=0x{:x}", access.address, access.size, value)?;
        }
        for (name, value) in &self.registers {
            write!(f, " {}=0x{:x}", name, value)?;
        }
        Ok(())
    }
}

// Printable form of a solved byte
fn ascii(value: u64) -> String {
    match u8::try_from(value) {
        Ok(byte) if byte.is_ascii_graphic() => format!(" ({})", byte as char),
        _ => String::new(),
    }
}

impl<'ctx> Session<'ctx> {
    /// Solves every non-taken edge of the path constraint at index `bound`, keeping the taken
    /// edges of all the previous ones. The constraint must have been recorded at `pc`.
    /// Solved values are also written into the engine's concrete state.
    pub fn solve_formula(&mut self, pc: u64, bound: usize) -> Vec<Input> {
        let mut solutions = Vec::new();
        let constraints = self.engine.path_constraints();
        if bound >= constraints.len() {
            error!(
                "Error. Requested path constraint index {} is larger than PathConstraints vector size ({})",
                bound,
                constraints.len()
            );
            return solutions;
        }
        let target = match constraints.get(bound) {
            Some(constraint) => constraint.clone(),
            None => return solutions,
        };
        if target.source_address() != Some(pc) {
            error!(
                "Error. The path constraint #{} was recorded at 0x{:x}, not at 0x{:x}",
                bound,
                target.source_address().unwrap_or(0),
                pc
            );
            return solutions;
        }
        if !target.is_multiple_branches() || !target.is_symbolic() {
            error!("Error. The path constraint #{} at 0x{:x} has no symbolic alternative edge", bound, pc);
            return solutions;
        }

        let ast = self.engine.ast_context();
        let mut previous = ast.equal(&ast.bvtrue(), &ast.bvtrue());
        for constraint in self.user_constraints() {
            previous = ast.land(&previous, &constraint.predicate);
        }
        for (index, constraint) in constraints.iter().take(bound).enumerate() {
            if !constraint.is_multiple_branches() || !constraint.is_symbolic() {
                continue;
            }
            if let Some(predicate) = constraint.taken_predicate() {
                trace!("[+] Keeping condition {}", index);
                previous = ast.land(&previous, predicate);
            }
        }

        let solver = Z3Integration::new(self.ctx, self.options.solver_timeout);
        let mut models = Vec::new();
        for branch in target.branches().iter().filter(|b| !b.taken) {
            let formula = ast.land(&previous, &branch.predicate);
            trace!("[+] Formula:\n{}", solver.to_smt2(&formula));
            match solver.get_model(&formula) {
                (SolverStatus::Sat, Some(model)) => models.push((branch.src, branch.dst, model)),
                (SolverStatus::Sat, None) => warn!("[!] SAT without a model for 0x{:x} -> 0x{:x}", branch.src, branch.dst),
                (SolverStatus::Timeout, _) => {
                    warn!("[!] Solver timed out after {} seconds", self.options.solver_timeout)
                }
                (SolverStatus::Unsat, _) => info!("[!] That formula cannot be solved (UNSAT)"),
                (SolverStatus::Unknown, _) => warn!("[!] The solver gave up on that formula (UNKNOWN)"),
            }
        }

        let variables = self.engine.symbolic_variables().to_vec();
        for (src, dst, model) in models {
            let mut input = Input { path_constraint_index: bound, src_address: src, dst_address: dst, ..Input::default() };
            info!("[+] Solution found! Values:");
            for variable in &variables {
                let node = match self.engine.ast_context().variable_node(&variable.name) {
                    Some(node) => node.clone(),
                    None => continue,
                };
                let value = match model.eval(&node, false).and_then(|v| v.simplify().as_u64()) {
                    Some(value) => value,
                    None => continue,
                };
                let applied = match &variable.origin {
                    VariableOrigin::Memory(address) => {
                        let access = MemoryAccess::new(*address, (variable.size / 8) as usize);
                        input.memory.push((access, value));
                        self.engine.set_concrete_memory_value(access, value)
                    }
                    VariableOrigin::Register(name) => {
                        input.registers.push((name.clone(), value));
                        self.engine.set_concrete_register_value(name, value)
                    }
                };
                if let Err(e) = applied {
                    error!("[!] Cannot apply {} = 0x{:x}: {}", variable.name, value, e);
                }
                let comment = if variable.comment.is_empty() { String::new() } else { format!(" ({})", variable.comment) };
                info!(" - {}{}: 0x{:x}{}", variable.name, comment, value, ascii(value));
            }
            solutions.push(input);
        }
        solutions
    }

    /// Rewrites the live flags so that the conditional jump `instruction` goes the other way.
    /// Returns false for anything that is not a supported conditional jump.
    pub fn negate_flag_condition(&mut self, debugger: &mut dyn Debugger, instruction: &Instruction) -> bool {
        let condition = match instruction.mnemonic {
            Mnemonic::Jcc(condition) => condition,
            ref other => {
                warn!("[!] Conditional instruction {} not supported, flags left untouched", other);
                return false;
            }
        };
        let previous = Flags::read_from(debugger);
        let mut flags = previous;
        flags.negate(condition);
        debug!("[+] Flags negated for {} at 0x{:x}: {:?} -> {:?}", condition.mnemonic(), instruction.address, previous, flags);
        flags.write_changes(&previous, debugger)
    }

    /// Writes the solved values into the debuggee and the engine's concrete state.
    pub fn set_smt_solution(&mut self, debugger: &mut dyn Debugger, input: &Input) {
        for (access, value) in &input.memory {
            let bytes = value.to_le_bytes();
            if !debugger.write_memory(access.address, &bytes[..access.size.min(bytes.len())]) {
                error!("[!] Cannot write the solution at 0x{:x}", access.address);
            }
            if let Err(e) = self.engine.set_concrete_memory_value(*access, *value) {
                error!("[!] {}", e);
            }
            trace!("[+] Memory 0x{:x} set with value 0x{:x}{}", access.address, value, ascii(*value));
        }
        for (name, value) in &input.registers {
            if !debugger.set_register_value(name, *value) {
                error!("[!] Cannot write the solution into {}", name);
            }
            if let Err(e) = self.engine.set_concrete_register_value(name, *value) {
                error!("[!] {}", e);
            }
            trace!("[+] Registers {} set with value 0x{:x}{}", name, value, ascii(*value));
        }
        debug!("[+] Memory/Registers set with the SMT results");
    }

    /// Forces the branch at `pc` the other way: solves its last constraint, marks the solved
    /// edge as taken, optionally restores the snapshot, flips the live flags and injects the
    /// solution. Returns the injected input.
    pub fn negate_inject_maybe_restore(&mut self, debugger: &mut dyn Debugger, pc: u64, restore: bool) -> Option<Input> {
        if self.engine.path_constraints().is_empty() {
            error!("[!] No path constraint recorded, nothing to negate at 0x{:x}", pc);
            return None;
        }
        let bound = self.engine.path_constraints().len() - 1;
        info!("[+] Negating condition at 0x{:x}", pc);
        let mut solutions = self.solve_formula(pc, bound);
        let input = match solutions.len() {
            0 => return None,
            1 => solutions.remove(0),
            n => {
                warn!("[!] {} solutions for the branch at 0x{:x}, choose one and inject it with set_smt_solution", n, pc);
                return None;
            }
        };

        if !self.engine.path_constraints_mut().flip_last(input.dst_address) {
            error!("[!] The last path constraint has no edge towards 0x{:x}", input.dst_address);
            return None;
        }
        let branch = self.status.last_instruction.clone();
        if restore {
            if let Err(e) = self.snapshot.restore_snapshot(&mut self.engine, debugger, &mut self.status) {
                error!("[!] {}", e);
            }
        }
        match branch {
            Some(instruction) => {
                self.negate_flag_condition(debugger, &instruction);
            }
            None => warn!("[!] No traced branch instruction, flags left untouched"),
        }
        self.set_smt_solution(debugger, &input);
        Some(input)
    }

    pub fn negate_and_inject(&mut self, debugger: &mut dyn Debugger, pc: u64) -> Option<Input> {
        self.negate_inject_maybe_restore(debugger, pc, false)
    }

    pub fn negate_inject_and_restore(&mut self, debugger: &mut dyn Debugger, pc: u64) -> Option<Input> {
        self.negate_inject_maybe_restore(debugger, pc, true)
    }
}
