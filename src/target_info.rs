/// File containing the information regarding the debugged target needed to pick an engine architecture

use std::fmt;

/// Processor family reported by the debugger for the loaded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorId {
    X86,
    Arm,
    Other(u32),
}

/// Architectures the engine can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm32,
    AArch64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub processor: ProcessorId,
    pub is_64bit: bool,
}

impl TargetInfo {
    pub fn new(processor: ProcessorId, is_64bit: bool) -> Self {
        TargetInfo { processor, is_64bit }
    }

    // Maps the processor family and bitness onto an engine architecture
    pub fn arch(&self) -> Option<Arch> {
        match (self.processor, self.is_64bit) {
            (ProcessorId::X86, true) => Some(Arch::X86_64),
            (ProcessorId::X86, false) => Some(Arch::X86),
            (ProcessorId::Arm, true) => Some(Arch::AArch64),
            (ProcessorId::Arm, false) => Some(Arch::Arm32),
            (ProcessorId::Other(_), _) => None,
        }
    }
}

impl Arch {
    pub fn pointer_size(&self) -> usize {
        match self {
            Arch::X86 | Arch::Arm32 => 4,
            Arch::X86_64 | Arch::AArch64 => 8,
        }
    }

    pub fn is_x86_family(&self) -> bool {
        matches!(self, Arch::X86 | Arch::X86_64)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => write!(f, "x86"),
            Arch::X86_64 => write!(f, "x86-64"),
            Arch::Arm32 => write!(f, "ARM32"),
            Arch::AArch64 => write!(f, "AArch64"),
        }
    }
}
