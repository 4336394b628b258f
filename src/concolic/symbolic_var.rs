/// Symbolic variables, symbolic state of registers and memory, and the AST context

use std::collections::BTreeMap;
use std::fmt;

use z3::ast::{Ast, Bool, BV};
use z3::Context;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableOrigin {
    Memory(u64),
    Register(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicVariable {
    pub id: usize,
    pub name: String,
    pub origin: VariableOrigin,
    pub size: u32, // in bits
    pub comment: String,
}

impl fmt::Display for SymbolicVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            VariableOrigin::Memory(address) => write!(f, "{} (mem 0x{:x}, {} bits)", self.name, address, self.size),
            VariableOrigin::Register(name) => write!(f, "{} (reg {}, {} bits)", self.name, name, self.size),
        }
    }
}

/// Symbolic state: expressions bound to parent registers and to single memory bytes.
#[derive(Debug, Clone)]
pub struct SymbolicEngine<'ctx> {
    pub registers: BTreeMap<String, BV<'ctx>>,
    pub memory: BTreeMap<u64, BV<'ctx>>,
    variables: Vec<SymbolicVariable>,
    next_variable_id: usize,
    expression_count: usize,
}

impl<'ctx> SymbolicEngine<'ctx> {
    pub fn new() -> Self {
        SymbolicEngine {
            registers: BTreeMap::new(),
            memory: BTreeMap::new(),
            variables: Vec::new(),
            next_variable_id: 0,
            expression_count: 0,
        }
    }

    pub fn new_variable(&mut self, origin: VariableOrigin, size: u32, comment: &str) -> SymbolicVariable {
        let id = self.next_variable_id;
        self.next_variable_id += 1;
        let variable = SymbolicVariable {
            id,
            name: format!("SymVar_{}", id),
            origin,
            size,
            comment: comment.to_string(),
        };
        self.variables.push(variable.clone());
        variable
    }

    pub fn next_variable_id(&self) -> usize {
        self.next_variable_id
    }

    // Ids below `next` belong to variables still named by recorded path constraints
    pub fn reserve_variable_ids(&mut self, next: usize) {
        self.next_variable_id = self.next_variable_id.max(next);
    }

    pub fn variables(&self) -> &[SymbolicVariable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&SymbolicVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    // Allocates an expression id and returns its printable form
    pub fn new_expression(&mut self, ast: &BV<'ctx>, comment: &str) -> String {
        let id = self.expression_count;
        self.expression_count += 1;
        if comment.is_empty() {
            format!("ref!{} = {}", id, ast)
        } else {
            format!("ref!{} = {} ; {}", id, ast, comment)
        }
    }

    pub fn expression_count(&self) -> usize {
        self.expression_count
    }

    pub fn is_register_symbolized(&self, parent: &str) -> bool {
        self.registers.contains_key(parent)
    }

    pub fn is_memory_symbolized(&self, address: u64, size: usize) -> bool {
        (0..size as u64).any(|i| self.memory.contains_key(&address.wrapping_add(i)))
    }

    pub fn concretize_register(&mut self, parent: &str) {
        self.registers.remove(parent);
    }

    pub fn concretize_memory(&mut self, address: u64, size: usize) {
        for i in 0..size as u64 {
            self.memory.remove(&address.wrapping_add(i));
        }
    }

    pub fn concretize_all(&mut self) {
        self.registers.clear();
        self.memory.clear();
    }
}

impl<'ctx> Default for SymbolicEngine<'ctx> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds formula nodes and caches the node created for each symbolic variable.
#[derive(Debug, Clone)]
pub struct AstContext<'ctx> {
    ctx: &'ctx Context,
    variable_nodes: BTreeMap<String, BV<'ctx>>,
}

impl<'ctx> AstContext<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        AstContext { ctx, variable_nodes: BTreeMap::new() }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn variable(&mut self, variable: &SymbolicVariable) -> BV<'ctx> {
        let ctx = self.ctx;
        self.variable_nodes
            .entry(variable.name.clone())
            .or_insert_with(|| BV::new_const(ctx, variable.name.clone(), variable.size))
            .clone()
    }

    pub fn variable_node(&self, name: &str) -> Option<&BV<'ctx>> {
        self.variable_nodes.get(name)
    }

    pub fn bv(&self, value: u64, size: u32) -> BV<'ctx> {
        BV::from_u64(self.ctx, value, size)
    }

    pub fn bvtrue(&self) -> BV<'ctx> {
        BV::from_u64(self.ctx, 1, 1)
    }

    pub fn equal(&self, left: &BV<'ctx>, right: &BV<'ctx>) -> Bool<'ctx> {
        left._eq(right)
    }

    pub fn land(&self, left: &Bool<'ctx>, right: &Bool<'ctx>) -> Bool<'ctx> {
        Bool::and(self.ctx, &[left, right])
    }

    pub fn lnot(&self, node: &Bool<'ctx>) -> Bool<'ctx> {
        node.not()
    }

    // 1-bit vector from a boolean node
    pub fn bit(&self, node: &Bool<'ctx>) -> BV<'ctx> {
        node.ite(&BV::from_u64(self.ctx, 1, 1), &BV::from_u64(self.ctx, 0, 1))
    }

    pub fn clear(&mut self) {
        self.variable_nodes.clear();
    }
}
