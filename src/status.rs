use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit 5 of the status register. Always reads as set.
pub const UNUSED_BIT: u8 = 0x20;

/// Packed status after construction: interrupt-disable, break and the unused
/// bit set.
pub const STATUS_RESET: u8 = 0b0011_0100;

/// One named flag of the processor status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    Carry,
    Zero,
    InterruptDisable,
    Decimal,
    Break,
    Overflow,
    Negative,
}

impl Flag {
    pub const ALL: [Flag; 7] = [
        Flag::Carry,
        Flag::Zero,
        Flag::InterruptDisable,
        Flag::Decimal,
        Flag::Break,
        Flag::Overflow,
        Flag::Negative,
    ];

    pub fn bit(self) -> u8 {
        match self {
            Flag::Carry => 0x01,
            Flag::Zero => 0x02,
            Flag::InterruptDisable => 0x04,
            Flag::Decimal => 0x08,
            Flag::Break => 0x10,
            Flag::Overflow => 0x40,
            Flag::Negative => 0x80,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::Carry => "carry",
            Flag::Zero => "zero",
            Flag::InterruptDisable => "interrupt_disable",
            Flag::Decimal => "decimal",
            Flag::Break => "break",
            Flag::Overflow => "overflow",
            Flag::Negative => "negative",
        }
    }
}

/// The processor status register.
///
/// The packed byte is the only storage; every named accessor reads or writes
/// its bit directly, so the byte and the flags cannot disagree. Interrupt
/// disable follows the hardware convention: the flag reads `true` when bit 2
/// is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStatus {
    bits: u8,
}

impl ProcessorStatus {
    pub fn new() -> Self {
        ProcessorStatus { bits: STATUS_RESET }
    }

    /// Packed representation. Bit 5 is always set.
    pub fn bits(&self) -> u8 {
        self.bits | UNUSED_BIT
    }

    pub fn is_enabled(&self, flag: Flag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        if value {
            self.bits |= flag.bit();
        } else {
            self.bits &= !flag.bit();
        }
    }

    /// Restore the flags from a byte pulled off the stack (PLP, RTI). The
    /// break bit and bit 5 do not exist as latches and keep their value.
    pub fn apply_pulled(&mut self, value: u8) {
        for flag in Flag::ALL {
            if flag != Flag::Break {
                self.set(flag, value & flag.bit() != 0);
            }
        }
    }

    pub fn carry(&self) -> bool { self.is_enabled(Flag::Carry) }
    pub fn zero(&self) -> bool { self.is_enabled(Flag::Zero) }
    pub fn interrupt_disable(&self) -> bool { self.is_enabled(Flag::InterruptDisable) }
    pub fn decimal(&self) -> bool { self.is_enabled(Flag::Decimal) }
    pub fn break_flag(&self) -> bool { self.is_enabled(Flag::Break) }
    pub fn overflow(&self) -> bool { self.is_enabled(Flag::Overflow) }
    pub fn negative(&self) -> bool { self.is_enabled(Flag::Negative) }

    pub fn set_carry(&mut self, value: bool) { self.set(Flag::Carry, value) }
    pub fn set_zero(&mut self, value: bool) { self.set(Flag::Zero, value) }
    pub fn set_interrupt_disable(&mut self, value: bool) { self.set(Flag::InterruptDisable, value) }
    pub fn set_decimal(&mut self, value: bool) { self.set(Flag::Decimal, value) }
    pub fn set_break_flag(&mut self, value: bool) { self.set(Flag::Break, value) }
    pub fn set_overflow(&mut self, value: bool) { self.set(Flag::Overflow, value) }
    pub fn set_negative(&mut self, value: bool) { self.set(Flag::Negative, value) }

    pub fn update_zero_and_negative(&mut self, value: u8) {
        self.set_zero(value == 0);
        self.set_negative(value & 0x80 != 0);
    }
}

impl Default for ProcessorStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Seven flags, most significant first: `NVBDIZC`.
impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in Flag::ALL.iter().rev() {
            f.write_str(if self.is_enabled(*flag) { "1" } else { "0" })?;
        }
        Ok(())
    }
}
