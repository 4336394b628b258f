/// Maintains the concrete state of the CPU registers for each supported architecture

use std::collections::BTreeMap;
use std::fmt;

use crate::concolic::executor::EngineError;
use crate::state::memory::ConcreteMemory;
use crate::target_info::Arch;

/// One architectural register: `parent` is the full-width register it aliases,
/// `size` and `shift` (in bits) locate it inside the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub parent: &'static str,
    pub size: u32,
    pub shift: u32,
}

impl RegisterSpec {
    pub fn is_parent(&self) -> bool {
        self.name == self.parent
    }

    pub fn mask(&self) -> u64 {
        mask(self.size)
    }
}

pub fn mask(size: u32) -> u64 {
    if size >= 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

const fn reg(name: &'static str, parent: &'static str, size: u32, shift: u32) -> RegisterSpec {
    RegisterSpec { name, parent, size, shift }
}

const X86_64_REGISTERS: &[RegisterSpec] = &[
    // General purpose registers
    reg("rax", "rax", 64, 0), reg("eax", "rax", 32, 0), reg("ax", "rax", 16, 0), reg("al", "rax", 8, 0), reg("ah", "rax", 8, 8),
    reg("rbx", "rbx", 64, 0), reg("ebx", "rbx", 32, 0), reg("bx", "rbx", 16, 0), reg("bl", "rbx", 8, 0), reg("bh", "rbx", 8, 8),
    reg("rcx", "rcx", 64, 0), reg("ecx", "rcx", 32, 0), reg("cx", "rcx", 16, 0), reg("cl", "rcx", 8, 0), reg("ch", "rcx", 8, 8),
    reg("rdx", "rdx", 64, 0), reg("edx", "rdx", 32, 0), reg("dx", "rdx", 16, 0), reg("dl", "rdx", 8, 0), reg("dh", "rdx", 8, 8),
    reg("rsi", "rsi", 64, 0), reg("esi", "rsi", 32, 0), reg("si", "rsi", 16, 0), reg("sil", "rsi", 8, 0),
    reg("rdi", "rdi", 64, 0), reg("edi", "rdi", 32, 0), reg("di", "rdi", 16, 0), reg("dil", "rdi", 8, 0),
    reg("rbp", "rbp", 64, 0), reg("ebp", "rbp", 32, 0), reg("bp", "rbp", 16, 0), reg("bpl", "rbp", 8, 0),
    reg("rsp", "rsp", 64, 0), reg("esp", "rsp", 32, 0), reg("sp", "rsp", 16, 0), reg("spl", "rsp", 8, 0),
    reg("r8", "r8", 64, 0), reg("r8d", "r8", 32, 0), reg("r8w", "r8", 16, 0), reg("r8b", "r8", 8, 0),
    reg("r9", "r9", 64, 0), reg("r9d", "r9", 32, 0), reg("r9w", "r9", 16, 0), reg("r9b", "r9", 8, 0),
    reg("r10", "r10", 64, 0), reg("r10d", "r10", 32, 0), reg("r10w", "r10", 16, 0), reg("r10b", "r10", 8, 0),
    reg("r11", "r11", 64, 0), reg("r11d", "r11", 32, 0), reg("r11w", "r11", 16, 0), reg("r11b", "r11", 8, 0),
    reg("r12", "r12", 64, 0), reg("r12d", "r12", 32, 0), reg("r12w", "r12", 16, 0), reg("r12b", "r12", 8, 0),
    reg("r13", "r13", 64, 0), reg("r13d", "r13", 32, 0), reg("r13w", "r13", 16, 0), reg("r13b", "r13", 8, 0),
    reg("r14", "r14", 64, 0), reg("r14d", "r14", 32, 0), reg("r14w", "r14", 16, 0), reg("r14b", "r14", 8, 0),
    reg("r15", "r15", 64, 0), reg("r15d", "r15", 32, 0), reg("r15w", "r15", 16, 0), reg("r15b", "r15", 8, 0),
    reg("rip", "rip", 64, 0),
    // Individual flags
    reg("cf", "cf", 1, 0), reg("pf", "pf", 1, 0), reg("af", "af", 1, 0), reg("zf", "zf", 1, 0),
    reg("sf", "sf", 1, 0), reg("df", "df", 1, 0), reg("of", "of", 1, 0),
];

const X86_REGISTERS: &[RegisterSpec] = &[
    reg("eax", "eax", 32, 0), reg("ax", "eax", 16, 0), reg("al", "eax", 8, 0), reg("ah", "eax", 8, 8),
    reg("ebx", "ebx", 32, 0), reg("bx", "ebx", 16, 0), reg("bl", "ebx", 8, 0), reg("bh", "ebx", 8, 8),
    reg("ecx", "ecx", 32, 0), reg("cx", "ecx", 16, 0), reg("cl", "ecx", 8, 0), reg("ch", "ecx", 8, 8),
    reg("edx", "edx", 32, 0), reg("dx", "edx", 16, 0), reg("dl", "edx", 8, 0), reg("dh", "edx", 8, 8),
    reg("esi", "esi", 32, 0), reg("si", "esi", 16, 0),
    reg("edi", "edi", 32, 0), reg("di", "edi", 16, 0),
    reg("ebp", "ebp", 32, 0), reg("bp", "ebp", 16, 0),
    reg("esp", "esp", 32, 0), reg("sp", "esp", 16, 0),
    reg("eip", "eip", 32, 0),
    reg("cf", "cf", 1, 0), reg("pf", "pf", 1, 0), reg("af", "af", 1, 0), reg("zf", "zf", 1, 0),
    reg("sf", "sf", 1, 0), reg("df", "df", 1, 0), reg("of", "of", 1, 0),
];

const ARM32_REGISTERS: &[RegisterSpec] = &[
    reg("r0", "r0", 32, 0), reg("r1", "r1", 32, 0), reg("r2", "r2", 32, 0), reg("r3", "r3", 32, 0),
    reg("r4", "r4", 32, 0), reg("r5", "r5", 32, 0), reg("r6", "r6", 32, 0), reg("r7", "r7", 32, 0),
    reg("r8", "r8", 32, 0), reg("r9", "r9", 32, 0), reg("r10", "r10", 32, 0), reg("r11", "r11", 32, 0),
    reg("r12", "r12", 32, 0), reg("sp", "sp", 32, 0), reg("lr", "lr", 32, 0), reg("pc", "pc", 32, 0),
    reg("n", "n", 1, 0), reg("z", "z", 1, 0), reg("c", "c", 1, 0), reg("v", "v", 1, 0),
];

const AARCH64_REGISTERS: &[RegisterSpec] = &[
    reg("x0", "x0", 64, 0), reg("w0", "x0", 32, 0), reg("x1", "x1", 64, 0), reg("w1", "x1", 32, 0),
    reg("x2", "x2", 64, 0), reg("w2", "x2", 32, 0), reg("x3", "x3", 64, 0), reg("w3", "x3", 32, 0),
    reg("x4", "x4", 64, 0), reg("w4", "x4", 32, 0), reg("x5", "x5", 64, 0), reg("w5", "x5", 32, 0),
    reg("x6", "x6", 64, 0), reg("w6", "x6", 32, 0), reg("x7", "x7", 64, 0), reg("w7", "x7", 32, 0),
    reg("x8", "x8", 64, 0), reg("w8", "x8", 32, 0), reg("x9", "x9", 64, 0), reg("w9", "x9", 32, 0),
    reg("x10", "x10", 64, 0), reg("w10", "x10", 32, 0), reg("x11", "x11", 64, 0), reg("w11", "x11", 32, 0),
    reg("x12", "x12", 64, 0), reg("w12", "x12", 32, 0), reg("x13", "x13", 64, 0), reg("w13", "x13", 32, 0),
    reg("x14", "x14", 64, 0), reg("w14", "x14", 32, 0), reg("x15", "x15", 64, 0), reg("w15", "x15", 32, 0),
    reg("x16", "x16", 64, 0), reg("w16", "x16", 32, 0), reg("x17", "x17", 64, 0), reg("w17", "x17", 32, 0),
    reg("x18", "x18", 64, 0), reg("w18", "x18", 32, 0), reg("x19", "x19", 64, 0), reg("w19", "x19", 32, 0),
    reg("x20", "x20", 64, 0), reg("w20", "x20", 32, 0), reg("x21", "x21", 64, 0), reg("w21", "x21", 32, 0),
    reg("x22", "x22", 64, 0), reg("w22", "x22", 32, 0), reg("x23", "x23", 64, 0), reg("w23", "x23", 32, 0),
    reg("x24", "x24", 64, 0), reg("w24", "x24", 32, 0), reg("x25", "x25", 64, 0), reg("w25", "x25", 32, 0),
    reg("x26", "x26", 64, 0), reg("w26", "x26", 32, 0), reg("x27", "x27", 64, 0), reg("w27", "x27", 32, 0),
    reg("x28", "x28", 64, 0), reg("w28", "x28", 32, 0), reg("x29", "x29", 64, 0), reg("w29", "x29", 32, 0),
    reg("x30", "x30", 64, 0), reg("w30", "x30", 32, 0),
    reg("sp", "sp", 64, 0), reg("pc", "pc", 64, 0),
    reg("n", "n", 1, 0), reg("z", "z", 1, 0), reg("c", "c", 1, 0), reg("v", "v", 1, 0),
];

// Caller-saved registers clobbered by a call into library code
const X86_VOLATILE: &[&str] = &["eax", "ecx", "edx"];
const X86_64_VOLATILE: &[&str] = &["rax", "rcx", "rdx", "r8", "r9", "r10", "r11"];
const ARM32_VOLATILE: &[&str] = &["r0", "r1", "r2", "r3", "r12"];
const AARCH64_VOLATILE: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9",
    "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17", "x18",
];

/// Concrete values of the parent registers of one architecture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterFile {
    values: BTreeMap<&'static str, u64>,
}

impl RegisterFile {
    fn new(table: &'static [RegisterSpec]) -> Self {
        let values = table.iter().filter(|spec| spec.is_parent()).map(|spec| (spec.name, 0u64)).collect();
        RegisterFile { values }
    }

    fn get(&self, parent: &str) -> u64 {
        self.values.get(parent).copied().unwrap_or(0)
    }

    fn set(&mut self, parent: &'static str, value: u64) {
        self.values.insert(parent, value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X86Cpu {
    pub registers: RegisterFile,
    pub memory: ConcreteMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X8664Cpu {
    pub registers: RegisterFile,
    pub memory: ConcreteMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arm32Cpu {
    pub registers: RegisterFile,
    pub memory: ConcreteMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AArch64Cpu {
    pub registers: RegisterFile,
    pub memory: ConcreteMemory,
}

/// CPU of the engine (registers and concrete memory), one variant per architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuState {
    X86(X86Cpu),
    X8664(X8664Cpu),
    Arm32(Arm32Cpu),
    AArch64(AArch64Cpu),
}

impl CpuState {
    pub fn new(arch: Arch) -> Self {
        match arch {
            Arch::X86 => CpuState::X86(X86Cpu { registers: RegisterFile::new(X86_REGISTERS), memory: ConcreteMemory::new() }),
            Arch::X86_64 => CpuState::X8664(X8664Cpu { registers: RegisterFile::new(X86_64_REGISTERS), memory: ConcreteMemory::new() }),
            Arch::Arm32 => CpuState::Arm32(Arm32Cpu { registers: RegisterFile::new(ARM32_REGISTERS), memory: ConcreteMemory::new() }),
            Arch::AArch64 => CpuState::AArch64(AArch64Cpu { registers: RegisterFile::new(AARCH64_REGISTERS), memory: ConcreteMemory::new() }),
        }
    }

    pub fn arch(&self) -> Arch {
        match self {
            CpuState::X86(_) => Arch::X86,
            CpuState::X8664(_) => Arch::X86_64,
            CpuState::Arm32(_) => Arch::Arm32,
            CpuState::AArch64(_) => Arch::AArch64,
        }
    }

    pub fn table(&self) -> &'static [RegisterSpec] {
        register_table(self.arch())
    }

    fn file(&self) -> &RegisterFile {
        match self {
            CpuState::X86(cpu) => &cpu.registers,
            CpuState::X8664(cpu) => &cpu.registers,
            CpuState::Arm32(cpu) => &cpu.registers,
            CpuState::AArch64(cpu) => &cpu.registers,
        }
    }

    fn file_mut(&mut self) -> &mut RegisterFile {
        match self {
            CpuState::X86(cpu) => &mut cpu.registers,
            CpuState::X8664(cpu) => &mut cpu.registers,
            CpuState::Arm32(cpu) => &mut cpu.registers,
            CpuState::AArch64(cpu) => &mut cpu.registers,
        }
    }

    pub fn memory(&self) -> &ConcreteMemory {
        match self {
            CpuState::X86(cpu) => &cpu.memory,
            CpuState::X8664(cpu) => &cpu.memory,
            CpuState::Arm32(cpu) => &cpu.memory,
            CpuState::AArch64(cpu) => &cpu.memory,
        }
    }

    pub fn memory_mut(&mut self) -> &mut ConcreteMemory {
        match self {
            CpuState::X86(cpu) => &mut cpu.memory,
            CpuState::X8664(cpu) => &mut cpu.memory,
            CpuState::Arm32(cpu) => &mut cpu.memory,
            CpuState::AArch64(cpu) => &mut cpu.memory,
        }
    }

    pub fn register_spec(&self, name: &str) -> Result<&'static RegisterSpec, EngineError> {
        lookup_register(self.arch(), name).ok_or_else(|| EngineError::UnknownRegister(name.to_string()))
    }

    pub fn parent_registers(&self) -> impl Iterator<Item = &'static RegisterSpec> {
        self.table().iter().filter(|spec| spec.is_parent())
    }

    pub fn concrete_value(&self, name: &str) -> Result<u64, EngineError> {
        let spec = self.register_spec(name)?;
        Ok((self.file().get(spec.parent) >> spec.shift) & spec.mask())
    }

    // Writes a (sub-)register. 32-bit writes into a 64-bit parent clear the upper half.
    pub fn set_concrete_value(&mut self, name: &str, value: u64) -> Result<(), EngineError> {
        let spec = self.register_spec(name)?;
        let parent = self.register_spec(spec.parent)?;
        let new_value = if spec.is_parent() || (spec.size == 32 && parent.size == 64) {
            value & spec.mask()
        } else {
            let old = self.file().get(spec.parent);
            let field = spec.mask() << spec.shift;
            (old & !field) | ((value & spec.mask()) << spec.shift)
        };
        self.file_mut().set(parent.name, new_value & parent.mask());
        Ok(())
    }

    pub fn program_counter(&self) -> &'static str {
        match self.arch() {
            Arch::X86 => "eip",
            Arch::X86_64 => "rip",
            Arch::Arm32 | Arch::AArch64 => "pc",
        }
    }

    pub fn stack_pointer(&self) -> &'static str {
        match self.arch() {
            Arch::X86 => "esp",
            Arch::X86_64 => "rsp",
            Arch::Arm32 | Arch::AArch64 => "sp",
        }
    }

    pub fn volatile_registers(&self) -> &'static [&'static str] {
        volatile_registers(self.arch())
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU State ({}):", self.arch())?;
        for spec in self.parent_registers() {
            writeln!(f, "  {}: 0x{:x}", spec.name, self.file().get(spec.name))?;
        }
        Ok(())
    }
}

pub fn register_table(arch: Arch) -> &'static [RegisterSpec] {
    match arch {
        Arch::X86 => X86_REGISTERS,
        Arch::X86_64 => X86_64_REGISTERS,
        Arch::Arm32 => ARM32_REGISTERS,
        Arch::AArch64 => AARCH64_REGISTERS,
    }
}

pub fn lookup_register(arch: Arch, name: &str) -> Option<&'static RegisterSpec> {
    register_table(arch).iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

pub fn volatile_registers(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::X86 => X86_VOLATILE,
        Arch::X86_64 => X86_64_VOLATILE,
        Arch::Arm32 => ARM32_VOLATILE,
        Arch::AArch64 => AARCH64_VOLATILE,
    }
}
