/// Concrete byte-level memory of the engine

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    OutOfBounds(u64, usize),
    IncorrectSliceLength,
    UnreadableMemory(u64),
}

impl Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OutOfBounds(address, size) => write!(f, "Memory access out of bounds at 0x{:x} (size {})", address, size),
            MemoryError::IncorrectSliceLength => write!(f, "Incorrect slice length"),
            MemoryError::UnreadableMemory(address) => write!(f, "Cannot read memory at 0x{:x}", address),
        }
    }
}

/// Sparse byte map; bytes never written read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcreteMemory {
    bytes: BTreeMap<u64, u8>,
}

impl ConcreteMemory {
    pub fn new() -> Self {
        ConcreteMemory { bytes: BTreeMap::new() }
    }

    pub fn is_mapped(&self, address: u64) -> bool {
        self.bytes.contains_key(&address)
    }

    pub fn read_byte(&self, address: u64) -> u8 {
        self.bytes.get(&address).copied().unwrap_or(0)
    }

    pub fn write_byte(&mut self, address: u64, value: u8) {
        self.bytes.insert(address, value);
    }

    pub fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        if size > 0 && address.checked_add(size as u64 - 1).is_none() {
            return Err(MemoryError::OutOfBounds(address, size));
        }
        Ok((0..size as u64).map(|i| self.read_byte(address.wrapping_add(i))).collect())
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        if !data.is_empty() && address.checked_add(data.len() as u64 - 1).is_none() {
            return Err(MemoryError::OutOfBounds(address, data.len()));
        }
        for (i, byte) in data.iter().enumerate() {
            self.write_byte(address.wrapping_add(i as u64), *byte);
        }
        Ok(())
    }

    // Little-endian value of up to 8 bytes
    pub fn read_value(&self, address: u64, size: usize) -> Result<u64, MemoryError> {
        if size == 0 || size > 8 {
            return Err(MemoryError::IncorrectSliceLength);
        }
        let bytes = self.read_bytes(address, size)?;
        Ok(bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn write_value(&mut self, address: u64, size: usize, value: u64) -> Result<(), MemoryError> {
        if size == 0 || size > 8 {
            return Err(MemoryError::IncorrectSliceLength);
        }
        let bytes: Vec<u8> = (0..size).map(|i| (value >> (8 * i)) as u8).collect();
        self.write_bytes(address, &bytes)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}
