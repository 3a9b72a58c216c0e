//! Opcode table.
//!
//! Every one of the 256 opcodes maps to exactly one mnemonic and one
//! addressing mode. Undocumented opcodes carry their common community names
//! (LAX, SAX, DCP, ...) and the jam opcodes map to `KIL`, so decoding never
//! fails for lack of an entry.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    /// `(zp,X)`
    IndexedIndirect,
    /// `(zp),Y`
    IndirectIndexed,
}

impl AddressingMode {
    /// Operand bytes following the opcode.
    pub fn operand_len(self) -> usize {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::Relative
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }

    /// Instruction length including the opcode byte.
    pub fn size(self) -> u8 {
        1 + self.operand_len() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    // documented
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    // undocumented
    Ahx, Alr, Anc, Arr, Axs, Dcp, Isc, Kil, Las, Lax, Rla, Rra, Sax, Shx,
    Shy, Slo, Sre, Tas, Xaa,
}

impl Mnemonic {
    pub fn as_str(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Brk => "BRK", Bvc => "BVC", Bvs => "BVS", Clc => "CLC", Cld => "CLD",
            Cli => "CLI", Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR", Inc => "INC",
            Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA",
            Pha => "PHA", Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC", Sec => "SEC",
            Sed => "SED", Sei => "SEI", Sta => "STA", Stx => "STX", Sty => "STY",
            Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Tya => "TYA", Ahx => "AHX", Alr => "ALR", Anc => "ANC", Arr => "ARR",
            Axs => "AXS", Dcp => "DCP", Isc => "ISC", Kil => "KIL", Las => "LAS",
            Lax => "LAX", Rla => "RLA", Rra => "RRA", Sax => "SAX", Shx => "SHX",
            Shy => "SHY", Slo => "SLO", Sre => "SRE", Tas => "TAS", Xaa => "XAA",
        }
    }

    pub fn is_documented(self) -> bool {
        use Mnemonic::*;
        !matches!(
            self,
            Ahx | Alr | Anc | Arr | Axs | Dcp | Isc | Kil | Las | Lax | Rla | Rra | Sax | Shx
                | Shy | Slo | Sre | Tas | Xaa
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static decode entry for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
}

impl OpcodeInfo {
    pub fn size(&self) -> u8 {
        self.mode.size()
    }
}

pub fn name_for(opcode: u8) -> Mnemonic {
    OPCODE_TABLE[opcode as usize].mnemonic
}

pub fn addressing_for(opcode: u8) -> AddressingMode {
    OPCODE_TABLE[opcode as usize].mode
}

pub fn size_for(opcode: u8) -> u8 {
    OPCODE_TABLE[opcode as usize].size()
}

pub fn lookup(opcode: u8) -> OpcodeInfo {
    OPCODE_TABLE[opcode as usize]
}

pub static OPCODE_TABLE: [OpcodeInfo; 256] = table::build();

mod table {
    use super::AddressingMode::*;
    use super::Mnemonic::*;
    use super::{AddressingMode, Mnemonic, OpcodeInfo};

    const ENTRIES: [(Mnemonic, AddressingMode); 256] = [
        // $00
        (Brk, Implied), (Ora, IndexedIndirect), (Kil, Implied), (Slo, IndexedIndirect),
        (Nop, ZeroPage), (Ora, ZeroPage), (Asl, ZeroPage), (Slo, ZeroPage),
        (Php, Implied), (Ora, Immediate), (Asl, Accumulator), (Anc, Immediate),
        (Nop, Absolute), (Ora, Absolute), (Asl, Absolute), (Slo, Absolute),
        // $10
        (Bpl, Relative), (Ora, IndirectIndexed), (Kil, Implied), (Slo, IndirectIndexed),
        (Nop, ZeroPageX), (Ora, ZeroPageX), (Asl, ZeroPageX), (Slo, ZeroPageX),
        (Clc, Implied), (Ora, AbsoluteY), (Nop, Implied), (Slo, AbsoluteY),
        (Nop, AbsoluteX), (Ora, AbsoluteX), (Asl, AbsoluteX), (Slo, AbsoluteX),
        // $20
        (Jsr, Absolute), (And, IndexedIndirect), (Kil, Implied), (Rla, IndexedIndirect),
        (Bit, ZeroPage), (And, ZeroPage), (Rol, ZeroPage), (Rla, ZeroPage),
        (Plp, Implied), (And, Immediate), (Rol, Accumulator), (Anc, Immediate),
        (Bit, Absolute), (And, Absolute), (Rol, Absolute), (Rla, Absolute),
        // $30
        (Bmi, Relative), (And, IndirectIndexed), (Kil, Implied), (Rla, IndirectIndexed),
        (Nop, ZeroPageX), (And, ZeroPageX), (Rol, ZeroPageX), (Rla, ZeroPageX),
        (Sec, Implied), (And, AbsoluteY), (Nop, Implied), (Rla, AbsoluteY),
        (Nop, AbsoluteX), (And, AbsoluteX), (Rol, AbsoluteX), (Rla, AbsoluteX),
        // $40
        (Rti, Implied), (Eor, IndexedIndirect), (Kil, Implied), (Sre, IndexedIndirect),
        (Nop, ZeroPage), (Eor, ZeroPage), (Lsr, ZeroPage), (Sre, ZeroPage),
        (Pha, Implied), (Eor, Immediate), (Lsr, Accumulator), (Alr, Immediate),
        (Jmp, Absolute), (Eor, Absolute), (Lsr, Absolute), (Sre, Absolute),
        // $50
        (Bvc, Relative), (Eor, IndirectIndexed), (Kil, Implied), (Sre, IndirectIndexed),
        (Nop, ZeroPageX), (Eor, ZeroPageX), (Lsr, ZeroPageX), (Sre, ZeroPageX),
        (Cli, Implied), (Eor, AbsoluteY), (Nop, Implied), (Sre, AbsoluteY),
        (Nop, AbsoluteX), (Eor, AbsoluteX), (Lsr, AbsoluteX), (Sre, AbsoluteX),
        // $60
        (Rts, Implied), (Adc, IndexedIndirect), (Kil, Implied), (Rra, IndexedIndirect),
        (Nop, ZeroPage), (Adc, ZeroPage), (Ror, ZeroPage), (Rra, ZeroPage),
        (Pla, Implied), (Adc, Immediate), (Ror, Accumulator), (Arr, Immediate),
        (Jmp, Indirect), (Adc, Absolute), (Ror, Absolute), (Rra, Absolute),
        // $70
        (Bvs, Relative), (Adc, IndirectIndexed), (Kil, Implied), (Rra, IndirectIndexed),
        (Nop, ZeroPageX), (Adc, ZeroPageX), (Ror, ZeroPageX), (Rra, ZeroPageX),
        (Sei, Implied), (Adc, AbsoluteY), (Nop, Implied), (Rra, AbsoluteY),
        (Nop, AbsoluteX), (Adc, AbsoluteX), (Ror, AbsoluteX), (Rra, AbsoluteX),
        // $80
        (Nop, Immediate), (Sta, IndexedIndirect), (Nop, Immediate), (Sax, IndexedIndirect),
        (Sty, ZeroPage), (Sta, ZeroPage), (Stx, ZeroPage), (Sax, ZeroPage),
        (Dey, Implied), (Nop, Immediate), (Txa, Implied), (Xaa, Immediate),
        (Sty, Absolute), (Sta, Absolute), (Stx, Absolute), (Sax, Absolute),
        // $90
        (Bcc, Relative), (Sta, IndirectIndexed), (Kil, Implied), (Ahx, IndirectIndexed),
        (Sty, ZeroPageX), (Sta, ZeroPageX), (Stx, ZeroPageY), (Sax, ZeroPageY),
        (Tya, Implied), (Sta, AbsoluteY), (Txs, Implied), (Tas, AbsoluteY),
        (Shy, AbsoluteX), (Sta, AbsoluteX), (Shx, AbsoluteY), (Ahx, AbsoluteY),
        // $A0
        (Ldy, Immediate), (Lda, IndexedIndirect), (Ldx, Immediate), (Lax, IndexedIndirect),
        (Ldy, ZeroPage), (Lda, ZeroPage), (Ldx, ZeroPage), (Lax, ZeroPage),
        (Tay, Implied), (Lda, Immediate), (Tax, Implied), (Lax, Immediate),
        (Ldy, Absolute), (Lda, Absolute), (Ldx, Absolute), (Lax, Absolute),
        // $B0
        (Bcs, Relative), (Lda, IndirectIndexed), (Kil, Implied), (Lax, IndirectIndexed),
        (Ldy, ZeroPageX), (Lda, ZeroPageX), (Ldx, ZeroPageY), (Lax, ZeroPageY),
        (Clv, Implied), (Lda, AbsoluteY), (Tsx, Implied), (Las, AbsoluteY),
        (Ldy, AbsoluteX), (Lda, AbsoluteX), (Ldx, AbsoluteY), (Lax, AbsoluteY),
        // $C0
        (Cpy, Immediate), (Cmp, IndexedIndirect), (Nop, Immediate), (Dcp, IndexedIndirect),
        (Cpy, ZeroPage), (Cmp, ZeroPage), (Dec, ZeroPage), (Dcp, ZeroPage),
        (Iny, Implied), (Cmp, Immediate), (Dex, Implied), (Axs, Immediate),
        (Cpy, Absolute), (Cmp, Absolute), (Dec, Absolute), (Dcp, Absolute),
        // $D0
        (Bne, Relative), (Cmp, IndirectIndexed), (Kil, Implied), (Dcp, IndirectIndexed),
        (Nop, ZeroPageX), (Cmp, ZeroPageX), (Dec, ZeroPageX), (Dcp, ZeroPageX),
        (Cld, Implied), (Cmp, AbsoluteY), (Nop, Implied), (Dcp, AbsoluteY),
        (Nop, AbsoluteX), (Cmp, AbsoluteX), (Dec, AbsoluteX), (Dcp, AbsoluteX),
        // $E0
        (Cpx, Immediate), (Sbc, IndexedIndirect), (Nop, Immediate), (Isc, IndexedIndirect),
        (Cpx, ZeroPage), (Sbc, ZeroPage), (Inc, ZeroPage), (Isc, ZeroPage),
        (Inx, Implied), (Sbc, Immediate), (Nop, Implied), (Sbc, Immediate),
        (Cpx, Absolute), (Sbc, Absolute), (Inc, Absolute), (Isc, Absolute),
        // $F0
        (Beq, Relative), (Sbc, IndirectIndexed), (Kil, Implied), (Isc, IndirectIndexed),
        (Nop, ZeroPageX), (Sbc, ZeroPageX), (Inc, ZeroPageX), (Isc, ZeroPageX),
        (Sed, Implied), (Sbc, AbsoluteY), (Nop, Implied), (Isc, AbsoluteY),
        (Nop, AbsoluteX), (Sbc, AbsoluteX), (Inc, AbsoluteX), (Isc, AbsoluteX),
    ];

    pub(super) const fn build() -> [OpcodeInfo; 256] {
        let mut out = [OpcodeInfo { mnemonic: Brk, mode: Implied }; 256];
        let mut i = 0;
        while i < 256 {
            out[i] = OpcodeInfo {
                mnemonic: ENTRIES[i].0,
                mode: ENTRIES[i].1,
            };
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_matching() {
        assert_eq!(name_for(0x69), Mnemonic::Adc);
        assert_eq!(addressing_for(0x69), AddressingMode::Immediate);
        assert_eq!(name_for(0xA2), Mnemonic::Ldx);
        assert_eq!(name_for(0x00), Mnemonic::Brk);
        assert_eq!(name_for(0xEA), Mnemonic::Nop);
    }

    #[test]
    fn test_sizes_follow_addressing() {
        assert_eq!(size_for(0xEA), 1); // NOP
        assert_eq!(size_for(0x0A), 1); // ASL A
        assert_eq!(size_for(0xA9), 2); // LDA #
        assert_eq!(size_for(0x90), 2); // BCC
        assert_eq!(size_for(0xB1), 2); // LDA (zp),Y
        assert_eq!(size_for(0x8D), 3); // STA abs
        assert_eq!(size_for(0x6C), 3); // JMP (ind)
        for opcode in 0..=255u8 {
            assert_eq!(size_for(opcode), addressing_for(opcode).size());
        }
    }

    #[test]
    fn test_indexed_modes() {
        assert_eq!(addressing_for(0xB6), AddressingMode::ZeroPageY); // LDX zp,Y
        assert_eq!(addressing_for(0x96), AddressingMode::ZeroPageY); // STX zp,Y
        assert_eq!(addressing_for(0xBE), AddressingMode::AbsoluteY); // LDX abs,Y
        assert_eq!(addressing_for(0xA1), AddressingMode::IndexedIndirect);
        assert_eq!(addressing_for(0x91), AddressingMode::IndirectIndexed);
        assert_eq!(addressing_for(0x6C), AddressingMode::Indirect);
    }

    #[test]
    fn test_documented_opcode_count() {
        let documented = OPCODE_TABLE
            .iter()
            .filter(|info| info.mnemonic.is_documented())
            .count();
        // 151 documented opcodes, plus the undocumented NOPs and the $EB SBC alias
        let extra_nops = OPCODE_TABLE
            .iter()
            .enumerate()
            .filter(|(op, info)| info.mnemonic == Mnemonic::Nop && *op != 0xEA)
            .count();
        assert_eq!(documented, 151 + extra_nops + 1);
    }

    #[test]
    fn test_jam_opcodes() {
        for opcode in [0x02, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xB2, 0xD2, 0xF2] {
            assert_eq!(name_for(opcode), Mnemonic::Kil);
        }
    }

    #[test]
    fn test_mnemonic_display() {
        assert_eq!(Mnemonic::Lda.to_string(), "LDA");
        assert_eq!(Mnemonic::Kil.to_string(), "KIL");
    }
}
