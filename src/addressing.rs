//! Operand resolution.
//!
//! Turns an addressing mode and the raw operand bytes of an instruction into
//! the operand the handler works on. Memory-based modes resolve to both the
//! effective address (used by stores and read-modify-write instructions) and
//! the value currently stored there (used by read instructions).

use crate::error::Fault;
use crate::memory::Memory;
use crate::opcodes::AddressingMode;
use crate::registers::Registers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Implied: no operand.
    None,
    /// The instruction acts on A.
    Accumulator,
    Immediate(u8),
    /// Effective address and the byte read from it at resolution time.
    Memory { address: u16, value: u8 },
    /// Signed branch displacement.
    Relative(i8),
}

impl Operand {
    pub fn address(&self) -> Option<u16> {
        match self {
            Operand::Memory { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Resolve `mode` against `bytes` (little-endian operand bytes following the
/// opcode). Reads that fall outside the backing store yield `0` and are
/// appended to `faults`; an operand length that does not match the mode is a
/// decode fault.
pub fn resolve(
    mode: AddressingMode,
    bytes: &[u8],
    registers: &Registers,
    memory: &Memory,
    faults: &mut Vec<Fault>,
) -> Result<Operand, Fault> {
    let needed = mode.operand_len();
    if bytes.len() != needed {
        return Err(Fault::DecodeFault {
            pc: registers.pc(),
            needed: needed + 1,
            available: bytes.len() + 1,
        });
    }

    let mut read = |address: u16| match memory.try_read(address) {
        Ok(value) => value,
        Err(fault) => {
            faults.push(fault);
            0
        }
    };

    let address = match mode {
        AddressingMode::Implied => return Ok(Operand::None),
        AddressingMode::Accumulator => return Ok(Operand::Accumulator),
        AddressingMode::Immediate => return Ok(Operand::Immediate(bytes[0])),
        AddressingMode::Relative => return Ok(Operand::Relative(bytes[0] as i8)),
        AddressingMode::ZeroPage => bytes[0] as u16,
        AddressingMode::ZeroPageX => bytes[0].wrapping_add(registers.x()) as u16,
        AddressingMode::ZeroPageY => bytes[0].wrapping_add(registers.y()) as u16,
        AddressingMode::Absolute => word(bytes[0], bytes[1]),
        AddressingMode::AbsoluteX => word(bytes[0], bytes[1]).wrapping_add(registers.x() as u16),
        AddressingMode::AbsoluteY => word(bytes[0], bytes[1]).wrapping_add(registers.y() as u16),
        AddressingMode::Indirect => {
            // The pointer's high byte is fetched without carrying into the
            // next page: JMP ($10FF) reads $10FF and $1000.
            let pointer = word(bytes[0], bytes[1]);
            let high_pointer = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
            word(read(pointer), read(high_pointer))
        }
        AddressingMode::IndexedIndirect => {
            let pointer = bytes[0].wrapping_add(registers.x());
            word(read(pointer as u16), read(pointer.wrapping_add(1) as u16))
        }
        AddressingMode::IndirectIndexed => {
            let pointer = bytes[0];
            let base = word(read(pointer as u16), read(pointer.wrapping_add(1) as u16));
            base.wrapping_add(registers.y() as u16)
        }
    };

    let value = read(address);
    Ok(Operand::Memory { address, value })
}

fn word(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Registers, Memory) {
        (Registers::new(0x0600), Memory::new())
    }

    fn resolve_ok(mode: AddressingMode, bytes: &[u8], registers: &Registers, memory: &Memory) -> Operand {
        let mut faults = Vec::new();
        let operand = resolve(mode, bytes, registers, memory, &mut faults).unwrap();
        assert!(faults.is_empty());
        operand
    }

    #[test]
    fn test_immediate_and_implied() {
        let (registers, memory) = setup();
        assert_eq!(resolve_ok(AddressingMode::Immediate, &[0x44], &registers, &memory), Operand::Immediate(0x44));
        assert_eq!(resolve_ok(AddressingMode::Implied, &[], &registers, &memory), Operand::None);
        assert_eq!(resolve_ok(AddressingMode::Accumulator, &[], &registers, &memory), Operand::Accumulator);
        assert_eq!(resolve_ok(AddressingMode::Relative, &[0xFE], &registers, &memory), Operand::Relative(-2));
    }

    #[test]
    fn test_zero_page_x_wraps() {
        let (mut registers, mut memory) = setup();
        registers.set_x(0x10);
        memory.write(0x000F, 0x99);
        let operand = resolve_ok(AddressingMode::ZeroPageX, &[0xFF], &registers, &memory);
        assert_eq!(operand, Operand::Memory { address: 0x000F, value: 0x99 });
    }

    #[test]
    fn test_zero_page_y() {
        let (mut registers, mut memory) = setup();
        registers.set_y(0x05);
        memory.write(0x0055, 0x42);
        let operand = resolve_ok(AddressingMode::ZeroPageY, &[0x50], &registers, &memory);
        assert_eq!(operand, Operand::Memory { address: 0x0055, value: 0x42 });
    }

    #[test]
    fn test_absolute_indexed_wraps_16_bit() {
        let (mut registers, mut memory) = setup();
        registers.set_x(0x02);
        registers.set_y(0x10);
        memory.write(0x0001, 0x11);
        memory.write(0x3010, 0x22);
        assert_eq!(
            resolve_ok(AddressingMode::AbsoluteX, &[0xFF, 0xFF], &registers, &memory),
            Operand::Memory { address: 0x0001, value: 0x11 }
        );
        assert_eq!(
            resolve_ok(AddressingMode::AbsoluteY, &[0x00, 0x30], &registers, &memory),
            Operand::Memory { address: 0x3010, value: 0x22 }
        );
    }

    #[test]
    fn test_indexed_indirect() {
        let (mut registers, mut memory) = setup();
        registers.set_x(0x05);
        memory.write(0x25, 0x00);
        memory.write(0x26, 0x30);
        memory.write(0x3000, 0x42);
        let operand = resolve_ok(AddressingMode::IndexedIndirect, &[0x20], &registers, &memory);
        assert_eq!(operand, Operand::Memory { address: 0x3000, value: 0x42 });
    }

    #[test]
    fn test_indexed_indirect_pointer_wraps_in_zero_page() {
        let (mut registers, mut memory) = setup();
        registers.set_x(0x01);
        memory.write(0xFF, 0x34);
        memory.write(0x00, 0x12);
        let operand = resolve_ok(AddressingMode::IndexedIndirect, &[0xFE], &registers, &memory);
        assert_eq!(operand.address(), Some(0x1234));
    }

    #[test]
    fn test_indirect_indexed() {
        let (mut registers, mut memory) = setup();
        registers.set_y(0x05);
        memory.write(0x20, 0x00);
        memory.write(0x21, 0x30);
        memory.write(0x3005, 0x42);
        let operand = resolve_ok(AddressingMode::IndirectIndexed, &[0x20], &registers, &memory);
        assert_eq!(operand, Operand::Memory { address: 0x3005, value: 0x42 });
    }

    #[test]
    fn test_indirect_page_wrap() {
        let (registers, mut memory) = setup();
        memory.write(0x30FF, 0x00);
        memory.write(0x3100, 0x50);
        memory.write(0x3000, 0x40);
        let operand = resolve_ok(AddressingMode::Indirect, &[0xFF, 0x30], &registers, &memory);
        assert_eq!(operand.address(), Some(0x4000));
    }

    #[test]
    fn test_arity_mismatch_is_decode_fault() {
        let (registers, memory) = setup();
        let mut faults = Vec::new();
        let err = resolve(AddressingMode::Absolute, &[0x00], &registers, &memory, &mut faults).unwrap_err();
        assert_eq!(err, Fault::DecodeFault { pc: 0x0600, needed: 3, available: 2 });
        let err = resolve(AddressingMode::Immediate, &[], &registers, &memory, &mut faults).unwrap_err();
        assert!(matches!(err, Fault::DecodeFault { .. }));
    }

    #[test]
    fn test_out_of_range_read_recorded() {
        let registers = Registers::new(0);
        let memory = Memory::with_capacity(0x0800);
        let mut faults = Vec::new();
        let operand = resolve(AddressingMode::Absolute, &[0x00, 0x90], &registers, &memory, &mut faults).unwrap();
        assert_eq!(operand, Operand::Memory { address: 0x9000, value: 0 });
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind(), "address_out_of_range");
    }
}
