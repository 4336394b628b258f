use crate::concolic::instruction::Condition;
use crate::debugger::Debugger;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub zero_flag: bool,       // Set if the result is zero
    pub sign_flag: bool,       // Set if the result is negative
    pub carry_flag: bool,      // Set if there's an overflow out of the most significant bit (for unsigned operations)
    pub overflow_flag: bool,   // Set if there's an overflow out of the most significant bit (for signed operations)
    pub parity_flag: bool,     // Set if the number of set bits is even
}

impl Flags {
    pub fn set_zero_flag(&mut self, value: bool) {
        self.zero_flag = value;
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.sign_flag = value;
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.carry_flag = value;
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.overflow_flag = value;
    }

    pub fn set_parity_flag(&mut self, value: bool) {
        self.parity_flag = value;
    }

    // Flags the debugger cannot report read as clear
    pub fn read_from(debugger: &mut dyn Debugger) -> Self {
        let mut read = |name: &str| debugger.register_value(name).map(|v| v & 1 == 1).unwrap_or(false);
        Flags {
            zero_flag: read("zf"),
            sign_flag: read("sf"),
            carry_flag: read("cf"),
            overflow_flag: read("of"),
            parity_flag: read("pf"),
        }
    }

    // Writes back only the flags that differ from `previous`
    pub fn write_changes(&self, previous: &Flags, debugger: &mut dyn Debugger) -> bool {
        let changes = [
            ("zf", self.zero_flag, previous.zero_flag),
            ("sf", self.sign_flag, previous.sign_flag),
            ("cf", self.carry_flag, previous.carry_flag),
            ("of", self.overflow_flag, previous.overflow_flag),
            ("pf", self.parity_flag, previous.parity_flag),
        ];
        let mut ok = true;
        for (name, new, old) in changes {
            if new != old {
                ok &= debugger.set_register_value(name, new as u64);
            }
        }
        ok
    }

    /// Whether a conditional jump with `condition` is taken under these flags.
    pub fn condition_holds(&self, condition: Condition) -> bool {
        match condition {
            Condition::A => !self.carry_flag && !self.zero_flag,
            Condition::Ae => !self.carry_flag,
            Condition::B => self.carry_flag,
            Condition::Be => self.carry_flag || self.zero_flag,
            Condition::E => self.zero_flag,
            Condition::Ne => !self.zero_flag,
            Condition::G => !self.zero_flag && self.sign_flag == self.overflow_flag,
            Condition::Ge => self.sign_flag == self.overflow_flag,
            Condition::L => self.sign_flag != self.overflow_flag,
            Condition::Le => self.zero_flag || self.sign_flag != self.overflow_flag,
            Condition::O => self.overflow_flag,
            Condition::No => !self.overflow_flag,
            Condition::P => self.parity_flag,
            Condition::Np => !self.parity_flag,
            Condition::S => self.sign_flag,
            Condition::Ns => !self.sign_flag,
        }
    }

    /// Changes the minimal set of flags so that `condition` evaluates the other way.
    pub fn negate(&mut self, condition: Condition) {
        let taken = self.condition_holds(condition);
        match condition {
            Condition::A => {
                self.set_carry_flag(taken);
                self.set_zero_flag(taken);
            }
            Condition::Be => {
                self.set_carry_flag(!taken);
                self.set_zero_flag(!taken);
            }
            Condition::Ae | Condition::B => self.set_carry_flag(!self.carry_flag),
            Condition::E | Condition::Ne => self.set_zero_flag(!self.zero_flag),
            Condition::G => {
                // taken: ZF=0 and SF=OF
                self.set_zero_flag(taken);
                self.set_sign_flag(if taken { !self.overflow_flag } else { self.overflow_flag });
            }
            Condition::Le => {
                self.set_zero_flag(!taken);
                self.set_sign_flag(if taken { self.overflow_flag } else { !self.overflow_flag });
            }
            Condition::Ge | Condition::L | Condition::S | Condition::Ns => self.set_sign_flag(!self.sign_flag),
            Condition::O | Condition::No => self.set_overflow_flag(!self.overflow_flag),
            Condition::P | Condition::Np => self.set_parity_flag(!self.parity_flag),
        }
    }
}
