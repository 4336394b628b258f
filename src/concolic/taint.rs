/// Taint state of registers and memory bytes

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaintEngine {
    registers: BTreeSet<String>,
    memory: BTreeSet<u64>,
}

impl TaintEngine {
    pub fn new() -> Self {
        TaintEngine::default()
    }

    pub fn taint_register(&mut self, parent: &str) {
        self.registers.insert(parent.to_string());
    }

    pub fn untaint_register(&mut self, parent: &str) {
        self.registers.remove(parent);
    }

    pub fn set_register_taint(&mut self, parent: &str, tainted: bool) {
        if tainted {
            self.taint_register(parent);
        } else {
            self.untaint_register(parent);
        }
    }

    pub fn is_register_tainted(&self, parent: &str) -> bool {
        self.registers.contains(parent)
    }

    pub fn taint_memory(&mut self, address: u64, size: usize) {
        for i in 0..size as u64 {
            self.memory.insert(address.wrapping_add(i));
        }
    }

    pub fn untaint_memory(&mut self, address: u64, size: usize) {
        for i in 0..size as u64 {
            self.memory.remove(&address.wrapping_add(i));
        }
    }

    pub fn set_memory_taint(&mut self, address: u64, size: usize, tainted: bool) {
        if tainted {
            self.taint_memory(address, size);
        } else {
            self.untaint_memory(address, size);
        }
    }

    // True if any byte of the range is tainted
    pub fn is_memory_tainted(&self, address: u64, size: usize) -> bool {
        (0..size as u64).any(|i| self.memory.contains(&address.wrapping_add(i)))
    }

    pub fn tainted_registers(&self) -> impl Iterator<Item = &String> {
        self.registers.iter()
    }

    pub fn tainted_memory(&self) -> impl Iterator<Item = &u64> {
        self.memory.iter()
    }

    pub fn clear(&mut self) {
        self.registers.clear();
        self.memory.clear();
    }
}
