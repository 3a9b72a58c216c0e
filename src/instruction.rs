use crate::addressing::{self, Operand};
use crate::error::Fault;
use crate::memory::Memory;
use crate::opcodes::{AddressingMode, Mnemonic, OpcodeInfo, OPCODE_TABLE};
use crate::registers::Registers;

/// One decoded instruction. Built fresh on every fetch and dropped after
/// dispatch; it holds no reference to the processor that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Address the opcode was fetched from.
    pub address: u16,
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    raw: [u8; 2],
    pub operand: Operand,
}

impl Instruction {
    pub fn new(address: u16, opcode: u8, info: OpcodeInfo, bytes: &[u8], operand: Operand) -> Self {
        let mut raw = [0; 2];
        raw[..bytes.len()].copy_from_slice(bytes);
        Instruction {
            address,
            opcode,
            mnemonic: info.mnemonic,
            mode: info.mode,
            raw,
            operand,
        }
    }

    /// Length in bytes including the opcode.
    pub fn size(&self) -> u8 {
        self.mode.size()
    }

    pub fn operand_bytes(&self) -> &[u8] {
        &self.raw[..self.mode.operand_len()]
    }

    /// Address of the instruction that follows this one.
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.size() as u16)
    }
}

/// Fetch the instruction at PC, then resolve its operand. Nothing is mutated
/// except `faults`, which collects out-of-range reads made while resolving.
pub fn decode(registers: &Registers, memory: &Memory, faults: &mut Vec<Fault>) -> Result<Instruction, Fault> {
    let pc = registers.pc();
    let opcode = memory.try_read(pc).map_err(|_| Fault::DecodeFault {
        pc,
        needed: 1,
        available: 0,
    })?;
    let info = OPCODE_TABLE
        .get(opcode as usize)
        .copied()
        .ok_or(Fault::UnknownOpcode { opcode })?;

    let size = info.size() as usize;
    let available = memory.size().saturating_sub(pc as usize).min(size);
    if available < size {
        return Err(Fault::DecodeFault {
            pc,
            needed: size,
            available,
        });
    }

    let mut bytes = [0u8; 2];
    for (i, byte) in bytes.iter_mut().take(size - 1).enumerate() {
        *byte = memory.read(pc.wrapping_add(1 + i as u16));
    }
    let bytes = &bytes[..size - 1];

    let operand = addressing::resolve(info.mode, bytes, registers, memory, faults)?;
    Ok(Instruction::new(pc, opcode, info, bytes, operand))
}
