use std::fmt;
use z3::ast::{Ast, BV};
use z3::Context;

use crate::state::cpu_state::mask;

/// A value flowing through the lifter: always a concrete part, a symbolic part only
/// when the value depends on a symbolic variable.
#[derive(Clone, Debug)]
pub struct ConcolicVar<'ctx> {
    pub concrete: u64,
    pub symbolic: Option<BV<'ctx>>,
    pub tainted: bool,
    pub size: u32, // in bits
}

impl<'ctx> ConcolicVar<'ctx> {
    pub fn new_concrete(concrete: u64, size: u32) -> Self {
        ConcolicVar { concrete: concrete & mask(size), symbolic: None, tainted: false, size }
    }

    pub fn new(concrete: u64, symbolic: Option<BV<'ctx>>, tainted: bool, size: u32) -> Self {
        ConcolicVar { concrete: concrete & mask(size), symbolic, tainted, size }
    }

    pub fn is_symbolic(&self) -> bool {
        self.symbolic.is_some()
    }

    // Symbolic part, or the concrete value as a constant of the same width
    pub fn to_bv(&self, ctx: &'ctx Context) -> BV<'ctx> {
        match &self.symbolic {
            Some(bv) => bv.clone(),
            None => BV::from_u64(ctx, self.concrete, self.size),
        }
    }

    pub fn zero_extend(&self, new_size: u32) -> Self {
        if new_size <= self.size {
            return self.truncate(new_size);
        }
        let symbolic = self.symbolic.as_ref().map(|bv| bv.zero_ext(new_size - self.size));
        ConcolicVar { concrete: self.concrete, symbolic, tainted: self.tainted, size: new_size }
    }

    pub fn truncate(&self, new_size: u32) -> Self {
        if new_size >= self.size {
            return self.clone();
        }
        let symbolic = self.symbolic.as_ref().map(|bv| bv.extract(new_size - 1, 0));
        ConcolicVar::new(self.concrete, symbolic, self.tainted, new_size)
    }

    // Bits [low, low + size) of the value
    pub fn slice(&self, low: u32, size: u32) -> Self {
        let symbolic = self.symbolic.as_ref().map(|bv| bv.extract(low + size - 1, low));
        ConcolicVar::new(self.concrete >> low, symbolic, self.tainted, size)
    }
}

impl fmt::Display for ConcolicVar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}/{}", self.concrete, self.size)?;
        if let Some(symbolic) = &self.symbolic {
            write!(f, " sym: {}", symbolic.simplify())?;
        }
        if self.tainted {
            write!(f, " (tainted)")?;
        }
        Ok(())
    }
}
