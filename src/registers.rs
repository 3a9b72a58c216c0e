use serde::{Deserialize, Serialize};

/// Stack page; the stack pointer indexes into `0x0100..=0x01FF`.
pub const STACK_PAGE: u16 = 0x0100;

/// Stack pointer value after construction.
pub const STACK_RESET: u8 = 0xFD;

/// Selector for one architectural register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    X,
    Y,
    Sp,
    Pc,
}

impl Register {
    /// Width of the register in bits.
    pub fn width(self) -> u32 {
        match self {
            Register::Pc => 16,
            _ => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::X => "X",
            Register::Y => "Y",
            Register::Sp => "SP",
            Register::Pc => "PC",
        }
    }
}

/// The five architectural registers. Assignment wraps modulo the register
/// width; there is no overflow trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    a: u8,
    x: u8,
    y: u8,
    sp: u8,
    pc: u16,
}

impl Registers {
    pub fn new(pc: u16) -> Self {
        Self::with_stack(pc, STACK_RESET)
    }

    pub fn with_stack(pc: u16, sp: u8) -> Self {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            sp,
            pc,
        }
    }

    pub fn a(&self) -> u8 { self.a }
    pub fn x(&self) -> u8 { self.x }
    pub fn y(&self) -> u8 { self.y }
    pub fn sp(&self) -> u8 { self.sp }
    pub fn pc(&self) -> u16 { self.pc }

    pub fn set_a(&mut self, value: u8) { self.a = value; }
    pub fn set_x(&mut self, value: u8) { self.x = value; }
    pub fn set_y(&mut self, value: u8) { self.y = value; }
    pub fn set_sp(&mut self, value: u8) { self.sp = value; }
    pub fn set_pc(&mut self, value: u16) { self.pc = value; }

    /// Read any register, zero-extended.
    pub fn get(&self, register: Register) -> u16 {
        match register {
            Register::A => self.a as u16,
            Register::X => self.x as u16,
            Register::Y => self.y as u16,
            Register::Sp => self.sp as u16,
            Register::Pc => self.pc,
        }
    }

    /// Assign any register, wrapping `value` modulo 2^width. Negative values
    /// wrap as two's complement, so `-1` stores all ones.
    pub fn set(&mut self, register: Register, value: i64) {
        let masked = value.rem_euclid(1 << register.width());
        match register {
            Register::A => self.a = masked as u8,
            Register::X => self.x = masked as u8,
            Register::Y => self.y = masked as u8,
            Register::Sp => self.sp = masked as u8,
            Register::Pc => self.pc = masked as u16,
        }
    }

    /// Decrement SP after a byte has been pushed.
    pub fn push_update(&mut self) {
        self.sp = self.sp.wrapping_sub(1);
    }

    /// Increment SP before a byte is pulled.
    pub fn pull_update(&mut self) {
        self.sp = self.sp.wrapping_add(1);
    }

    /// Address the stack pointer currently points at.
    pub fn stack_address(&self) -> u16 {
        STACK_PAGE | self.sp as u16
    }

    pub fn advance_pc(&mut self, bytes: u16) {
        self.pc = self.pc.wrapping_add(bytes);
    }
}
