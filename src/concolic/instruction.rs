/// Decoded and lifted instructions

use std::fmt;

/// Longest encodable x86 instruction.
pub const MAX_OPCODE_SIZE: usize = 15;

/// Condition codes of the conditional jumps the solver knows how to invert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    A,
    Ae,
    B,
    Be,
    E,
    Ne,
    G,
    Ge,
    L,
    Le,
    O,
    No,
    P,
    Np,
    S,
    Ns,
}

impl Condition {
    pub const ALL: [Condition; 16] = [
        Condition::A, Condition::Ae, Condition::B, Condition::Be,
        Condition::E, Condition::Ne, Condition::G, Condition::Ge,
        Condition::L, Condition::Le, Condition::O, Condition::No,
        Condition::P, Condition::Np, Condition::S, Condition::Ns,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Condition::A => "ja",
            Condition::Ae => "jae",
            Condition::B => "jb",
            Condition::Be => "jbe",
            Condition::E => "je",
            Condition::Ne => "jne",
            Condition::G => "jg",
            Condition::Ge => "jge",
            Condition::L => "jl",
            Condition::Le => "jle",
            Condition::O => "jo",
            Condition::No => "jno",
            Condition::P => "jp",
            Condition::Np => "jnp",
            Condition::S => "js",
            Condition::Ns => "jns",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Mov,
    Movzx,
    Lea,
    Add,
    Sub,
    Xor,
    And,
    Or,
    Cmp,
    Test,
    Inc,
    Dec,
    Not,
    Neg,
    Push,
    Pop,
    Nop,
    Jmp,
    Jcc(Condition),
    Call,
    Ret,
    Other(String),
}

impl Mnemonic {
    // Parses the textual mnemonic printed by the disassembler, aliases included
    pub fn parse(text: &str) -> Mnemonic {
        let lower = text.trim().to_ascii_lowercase();
        match lower.as_str() {
            "mov" => Mnemonic::Mov,
            "movzx" => Mnemonic::Movzx,
            "lea" => Mnemonic::Lea,
            "add" => Mnemonic::Add,
            "sub" => Mnemonic::Sub,
            "xor" => Mnemonic::Xor,
            "and" => Mnemonic::And,
            "or" => Mnemonic::Or,
            "cmp" => Mnemonic::Cmp,
            "test" => Mnemonic::Test,
            "inc" => Mnemonic::Inc,
            "dec" => Mnemonic::Dec,
            "not" => Mnemonic::Not,
            "neg" => Mnemonic::Neg,
            "push" => Mnemonic::Push,
            "pop" => Mnemonic::Pop,
            "nop" => Mnemonic::Nop,
            "jmp" => Mnemonic::Jmp,
            "call" => Mnemonic::Call,
            "ret" | "retn" => Mnemonic::Ret,
            "ja" | "jnbe" => Mnemonic::Jcc(Condition::A),
            "jae" | "jnb" | "jnc" => Mnemonic::Jcc(Condition::Ae),
            "jb" | "jnae" | "jc" => Mnemonic::Jcc(Condition::B),
            "jbe" | "jna" => Mnemonic::Jcc(Condition::Be),
            "je" | "jz" => Mnemonic::Jcc(Condition::E),
            "jne" | "jnz" => Mnemonic::Jcc(Condition::Ne),
            "jg" | "jnle" => Mnemonic::Jcc(Condition::G),
            "jge" | "jnl" => Mnemonic::Jcc(Condition::Ge),
            "jl" | "jnge" => Mnemonic::Jcc(Condition::L),
            "jle" | "jng" => Mnemonic::Jcc(Condition::Le),
            "jo" => Mnemonic::Jcc(Condition::O),
            "jno" => Mnemonic::Jcc(Condition::No),
            "jp" | "jpe" => Mnemonic::Jcc(Condition::P),
            "jnp" | "jpo" => Mnemonic::Jcc(Condition::Np),
            "js" => Mnemonic::Jcc(Condition::S),
            "jns" => Mnemonic::Jcc(Condition::Ns),
            _ => Mnemonic::Other(lower),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Mnemonic::Call)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Mnemonic::Mov => "mov",
            Mnemonic::Movzx => "movzx",
            Mnemonic::Lea => "lea",
            Mnemonic::Add => "add",
            Mnemonic::Sub => "sub",
            Mnemonic::Xor => "xor",
            Mnemonic::And => "and",
            Mnemonic::Or => "or",
            Mnemonic::Cmp => "cmp",
            Mnemonic::Test => "test",
            Mnemonic::Inc => "inc",
            Mnemonic::Dec => "dec",
            Mnemonic::Not => "not",
            Mnemonic::Neg => "neg",
            Mnemonic::Push => "push",
            Mnemonic::Pop => "pop",
            Mnemonic::Nop => "nop",
            Mnemonic::Jmp => "jmp",
            Mnemonic::Call => "call",
            Mnemonic::Ret => "ret",
            Mnemonic::Jcc(condition) => condition.mnemonic(),
            Mnemonic::Other(name) => name.as_str(),
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Option<String>,
    pub index: Option<String>,
    pub scale: u64,
    pub displacement: i64,
    pub size: usize, // in bytes
}

impl MemoryOperand {
    pub fn absolute(address: u64, size: usize) -> Self {
        MemoryOperand { base: None, index: None, scale: 1, displacement: address as i64, size }
    }

    pub fn based(base: &str, displacement: i64, size: usize) -> Self {
        MemoryOperand { base: Some(base.to_string()), index: None, scale: 1, displacement, size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(String),
    Immediate(u64),
    Memory(MemoryOperand),
}

impl Operand {
    pub fn reg(name: &str) -> Self {
        Operand::Register(name.to_ascii_lowercase())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(name) => write!(f, "{}", name),
            Operand::Immediate(value) => write!(f, "0x{:x}", value),
            Operand::Memory(mem) => {
                write!(f, "[")?;
                let mut first = true;
                if let Some(base) = &mem.base {
                    write!(f, "{}", base)?;
                    first = false;
                }
                if let Some(index) = &mem.index {
                    if !first {
                        write!(f, "+")?;
                    }
                    write!(f, "{}*{}", index, mem.scale)?;
                    first = false;
                }
                if first {
                    write!(f, "0x{:x}", mem.displacement as u64)?;
                } else if mem.displacement < 0 {
                    write!(f, "-0x{:x}", mem.displacement.unsigned_abs())?;
                } else if mem.displacement > 0 {
                    write!(f, "+0x{:x}", mem.displacement)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// What the host disassembler knows about one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub size: usize,
    pub mnemonic: Mnemonic,
    pub operands: Vec<Operand>,
}

impl DecodedInstruction {
    pub fn new(address: u64, size: usize, mnemonic: &str, operands: Vec<Operand>) -> Self {
        DecodedInstruction { address, size, mnemonic: Mnemonic::parse(mnemonic), operands }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", operand)?;
            } else {
                write!(f, ", {}", operand)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryAccess {
    pub address: u64,
    pub size: usize,
}

impl MemoryAccess {
    pub fn new(address: u64, size: usize) -> Self {
        MemoryAccess { address, size }
    }
}

/// An instruction fed to the engine, together with what the engine learned while processing it.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub address: u64,
    pub opcode: Vec<u8>,
    pub thread_id: u64,
    pub mnemonic: Mnemonic,
    pub operands: Vec<Operand>,
    pub next_address: u64,
    pub tainted: bool,
    pub symbolized: bool,
    pub branch: bool,
    pub condition_taken: bool,
    pub branch_target: Option<u64>,
    pub read_registers: Vec<String>,
    pub written_registers: Vec<String>,
    pub loads: Vec<MemoryAccess>,
    pub stores: Vec<MemoryAccess>,
    pub symbolic_expressions: Vec<String>,
}

impl Instruction {
    pub fn new(decoded: &DecodedInstruction, opcode: Vec<u8>, thread_id: u64) -> Self {
        let next_address = decoded.address.wrapping_add(opcode.len() as u64);
        Instruction {
            address: decoded.address,
            opcode,
            thread_id,
            mnemonic: decoded.mnemonic.clone(),
            operands: decoded.operands.clone(),
            next_address,
            tainted: false,
            symbolized: false,
            branch: false,
            condition_taken: false,
            branch_target: None,
            read_registers: Vec::new(),
            written_registers: Vec::new(),
            loads: Vec::new(),
            stores: Vec::new(),
            symbolic_expressions: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.opcode.len()
    }

    pub fn is_branch(&self) -> bool {
        self.branch
    }

    pub fn reads_register(&self, name: &str) -> bool {
        self.read_registers.iter().any(|r| r.eq_ignore_ascii_case(name))
    }

    pub(crate) fn note_read_register(&mut self, name: &str) {
        if !self.reads_register(name) {
            self.read_registers.push(name.to_string());
        }
    }

    pub(crate) fn note_written_register(&mut self, name: &str) {
        if !self.written_registers.iter().any(|r| r == name) {
            self.written_registers.push(name.to_string());
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}: {}", self.address, self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", operand)?;
            } else {
                write!(f, ", {}", operand)?;
            }
        }
        Ok(())
    }
}
