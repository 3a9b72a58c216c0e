use log::trace;

use crate::addressing::Operand;
use crate::error::Fault;
use crate::instruction::{self, Instruction};
use crate::memory::Memory;
use crate::metrics::{record_instruction, Timer};
use crate::opcodes::{AddressingMode, Mnemonic};
use crate::registers::{Registers, STACK_RESET};
use crate::status::{Flag, ProcessorStatus, UNUSED_BIT};

/// What a handler did with the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// PC untouched; advance by the instruction size.
    Next,
    /// The handler set PC itself (taken branch, jump, return).
    Jump,
    /// Break-type instruction. PC advances and the run loop stops.
    Halt,
}

/// Result of one fetch-decode-execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub instruction: Instruction,
    pub flow: Flow,
}

/// Signature shared by every instruction handler.
pub type Handler = fn(&mut CPU, &Instruction, &mut Memory) -> Result<Flow, Fault>;

#[derive(Debug, Clone)]
pub struct CPU {
    registers: Registers,
    status: ProcessorStatus,

    // Internal state
    executed: u64,
    faults: Vec<Fault>,
}

impl CPU {
    pub fn new(pc: u16) -> Self {
        Self::with_stack(pc, STACK_RESET)
    }

    pub fn with_stack(pc: u16, sp: u8) -> Self {
        CPU {
            registers: Registers::with_stack(pc, sp),
            status: ProcessorStatus::new(),
            executed: 0,
            faults: Vec::new(),
        }
    }

    /// Power-on state with PC at `pc`. Memory is left alone.
    pub fn reset(&mut self, pc: u16) {
        *self = Self::new(pc);
    }

    /// Fetch, decode and execute the instruction at PC.
    ///
    /// A decode fault leaves PC where it was. A mnemonic mismatch still moves
    /// PC past the instruction so the same bytes are not refetched forever.
    /// Out-of-range accesses made along the way do not fail the step; they
    /// are queued for [`CPU::take_faults`].
    pub fn step(&mut self, memory: &mut Memory) -> Result<Step, Fault> {
        let timer = Timer::new();
        let instruction = instruction::decode(&self.registers, memory, &mut self.faults)?;

        trace!(
            "${:04X}  {:02X} {:<6} {} {:?}",
            instruction.address,
            instruction.opcode,
            hex_bytes(instruction.operand_bytes()),
            instruction.mnemonic,
            instruction.mode
        );

        let result = self.execute(&instruction, memory);
        let flow = self.complete(&instruction, result)?;
        self.executed += 1;

        record_instruction(instruction.opcode, instruction.mnemonic.as_str(), timer.elapsed());
        Ok(Step { instruction, flow })
    }

    /// Dispatch a decoded instruction to its handler. PC is not advanced
    /// here; see [`CPU::complete`].
    pub fn execute(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        use Mnemonic::*;

        let handler: Handler = match instruction.mnemonic {
            Lda | Ldx | Ldy | Lax | Las => CPU::load,
            Sta | Stx | Sty | Sax => CPU::store,
            Adc | Sbc => CPU::arithmetic,
            And | Ora | Eor => CPU::logical,
            Cmp | Cpx | Cpy => CPU::compare,
            Bit => CPU::bit,
            Asl | Lsr | Rol | Ror => CPU::shift,
            Inc | Dec => CPU::step_memory,
            Inx | Iny | Dex | Dey => CPU::step_register,
            Tax | Tay | Txa | Tya | Tsx | Txs => CPU::transfer,
            Clc | Sec | Cli | Sei | Cld | Sed | Clv => CPU::flags,
            Bcc | Bcs | Beq | Bne | Bmi | Bpl | Bvc | Bvs => CPU::branch,
            Jmp | Jsr | Rts | Rti => CPU::jump,
            Pha | Php | Pla | Plp => CPU::stack,
            Brk | Kil => CPU::halt,
            Nop => CPU::nop,
            Slo | Rla | Sre | Rra | Dcp | Isc => CPU::combined,
            Anc | Alr | Arr | Axs | Xaa => CPU::immediate_combined,
            Ahx | Shx | Shy | Tas => CPU::unstable_store,
        };
        handler(self, instruction, memory)
    }

    /// Apply the default PC advance for `instruction` given its handler's
    /// result. Everything but a taken jump or a decode fault moves PC by the
    /// instruction size, including a rejected dispatch.
    pub fn complete(&mut self, instruction: &Instruction, result: Result<Flow, Fault>) -> Result<Flow, Fault> {
        match result {
            Ok(Flow::Jump) => Ok(Flow::Jump),
            Ok(flow) => {
                self.registers.advance_pc(instruction.size() as u16);
                Ok(flow)
            }
            Err(fault @ Fault::DecodeFault { .. }) => Err(fault),
            Err(fault) => {
                self.registers.advance_pc(instruction.size() as u16);
                Err(fault)
            }
        }
    }

    /// Drain the non-fatal faults collected since the last call.
    pub fn take_faults(&mut self) -> Vec<Fault> {
        std::mem::take(&mut self.faults)
    }

    pub fn registers(&self) -> &Registers { &self.registers }
    pub fn registers_mut(&mut self) -> &mut Registers { &mut self.registers }
    pub fn status(&self) -> &ProcessorStatus { &self.status }
    pub fn status_mut(&mut self) -> &mut ProcessorStatus { &mut self.status }

    // Getters
    pub fn get_register_a(&self) -> u8 { self.registers.a() }
    pub fn get_register_x(&self) -> u8 { self.registers.x() }
    pub fn get_register_y(&self) -> u8 { self.registers.y() }
    pub fn get_pc(&self) -> u16 { self.registers.pc() }
    pub fn get_sp(&self) -> u8 { self.registers.sp() }
    pub fn get_status(&self) -> u8 { self.status.bits() }
    pub fn instructions_executed(&self) -> u64 { self.executed }

    // Flag operations
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.status.set(flag, value);
    }

    pub fn get_flag(&self, flag: Flag) -> bool {
        self.status.is_enabled(flag)
    }

    // Stack operations
    pub fn push(&mut self, memory: &mut Memory, value: u8) {
        let address = self.registers.stack_address();
        self.write_byte(memory, address, value);
        self.registers.push_update();
    }

    pub fn pop(&mut self, memory: &Memory) -> u8 {
        self.registers.pull_update();
        let address = self.registers.stack_address();
        self.read_byte(memory, address)
    }

    fn push_u16(&mut self, memory: &mut Memory, value: u16) {
        self.push(memory, (value >> 8) as u8);
        self.push(memory, (value & 0xFF) as u8);
    }

    fn pop_u16(&mut self, memory: &Memory) -> u16 {
        let low = self.pop(memory) as u16;
        let high = self.pop(memory) as u16;
        (high << 8) | low
    }

    fn read_byte(&mut self, memory: &Memory, address: u16) -> u8 {
        match memory.try_read(address) {
            Ok(value) => value,
            Err(fault) => {
                self.faults.push(fault);
                0
            }
        }
    }

    fn write_byte(&mut self, memory: &mut Memory, address: u16, value: u8) {
        if let Err(fault) = memory.try_write(address, value) {
            self.faults.push(fault);
        }
    }

    // Operand helpers

    /// Value an instruction reads: the immediate byte, the byte at the
    /// effective address, or A for accumulator mode.
    fn operand_value(&self, instruction: &Instruction) -> u8 {
        match instruction.operand {
            Operand::Immediate(value) => value,
            Operand::Memory { value, .. } => value,
            Operand::Accumulator => self.registers.a(),
            Operand::None | Operand::Relative(_) => 0,
        }
    }

    /// Effective address for instructions that write memory or jump.
    fn target(&self, instruction: &Instruction) -> Result<u16, Fault> {
        instruction.operand.address().ok_or(Fault::DecodeFault {
            pc: instruction.address,
            needed: 2,
            available: instruction.size() as usize,
        })
    }

    fn mismatch(expected: &'static str, instruction: &Instruction) -> Fault {
        Fault::MnemonicMismatch {
            expected,
            found: instruction.mnemonic,
            pc: instruction.address,
        }
    }

    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.status.update_zero_and_negative(value);
    }

    /// Binary add with carry into A. Decimal mode is not modelled.
    fn add_to_accumulator(&mut self, value: u8) {
        let a = self.registers.a();
        let sum = a as u16 + value as u16 + self.status.carry() as u16;
        let result = sum as u8;

        self.status.set_carry(sum > 0xFF);
        self.status.set_overflow((a ^ result) & (value ^ result) & 0x80 != 0);
        self.registers.set_a(result);
        self.update_zero_and_negative_flags(result);
    }

    fn compare_with(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.status.set_carry(register >= value);
        self.status.set_zero(register == value);
        self.status.set_negative(result & 0x80 != 0);
    }

    fn shift_value(&mut self, mnemonic: Mnemonic, value: u8) -> u8 {
        let carry_in = self.status.carry() as u8;
        let (result, carry_out) = match mnemonic {
            Mnemonic::Asl | Mnemonic::Slo => (value << 1, value & 0x80 != 0),
            Mnemonic::Lsr | Mnemonic::Sre => (value >> 1, value & 0x01 != 0),
            Mnemonic::Rol | Mnemonic::Rla => ((value << 1) | carry_in, value & 0x80 != 0),
            _ => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
        };
        self.status.set_carry(carry_out);
        self.update_zero_and_negative_flags(result);
        result
    }

    // Instruction handlers. Each one checks that it was handed one of its
    // own mnemonics before touching any state.

    pub fn load(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        match instruction.mnemonic {
            Mnemonic::Lda => self.registers.set_a(value),
            Mnemonic::Ldx => self.registers.set_x(value),
            Mnemonic::Ldy => self.registers.set_y(value),
            Mnemonic::Lax => {
                self.registers.set_a(value);
                self.registers.set_x(value);
            }
            Mnemonic::Las => {
                let result = value & self.registers.sp();
                self.registers.set_a(result);
                self.registers.set_x(result);
                self.registers.set_sp(result);
            }
            _ => return Err(Self::mismatch("load", instruction)),
        }
        self.update_zero_and_negative_flags(match instruction.mnemonic {
            Mnemonic::Ldx => self.registers.x(),
            Mnemonic::Ldy => self.registers.y(),
            _ => self.registers.a(),
        });
        Ok(Flow::Next)
    }

    pub fn store(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        let value = match instruction.mnemonic {
            Mnemonic::Sta => self.registers.a(),
            Mnemonic::Stx => self.registers.x(),
            Mnemonic::Sty => self.registers.y(),
            Mnemonic::Sax => self.registers.a() & self.registers.x(),
            _ => return Err(Self::mismatch("store", instruction)),
        };
        let address = self.target(instruction)?;
        self.write_byte(memory, address, value);
        Ok(Flow::Next)
    }

    pub fn arithmetic(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        match instruction.mnemonic {
            Mnemonic::Adc => self.add_to_accumulator(value),
            // A - M - (1 - C) == A + !M + C
            Mnemonic::Sbc => self.add_to_accumulator(!value),
            _ => return Err(Self::mismatch("arithmetic", instruction)),
        }
        Ok(Flow::Next)
    }

    pub fn logical(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        let a = self.registers.a();
        let result = match instruction.mnemonic {
            Mnemonic::And => a & value,
            Mnemonic::Ora => a | value,
            Mnemonic::Eor => a ^ value,
            _ => return Err(Self::mismatch("logical", instruction)),
        };
        self.registers.set_a(result);
        self.update_zero_and_negative_flags(result);
        Ok(Flow::Next)
    }

    pub fn compare(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let register = match instruction.mnemonic {
            Mnemonic::Cmp => self.registers.a(),
            Mnemonic::Cpx => self.registers.x(),
            Mnemonic::Cpy => self.registers.y(),
            _ => return Err(Self::mismatch("compare", instruction)),
        };
        let value = self.operand_value(instruction);
        self.compare_with(register, value);
        Ok(Flow::Next)
    }

    pub fn bit(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        if instruction.mnemonic != Mnemonic::Bit {
            return Err(Self::mismatch("BIT", instruction));
        }
        let value = self.operand_value(instruction);
        self.status.set_zero(self.registers.a() & value == 0);
        self.status.set_overflow(value & 0x40 != 0);
        self.status.set_negative(value & 0x80 != 0);
        Ok(Flow::Next)
    }

    pub fn shift(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        if !matches!(
            instruction.mnemonic,
            Mnemonic::Asl | Mnemonic::Lsr | Mnemonic::Rol | Mnemonic::Ror
        ) {
            return Err(Self::mismatch("shift", instruction));
        }
        let value = self.operand_value(instruction);
        let result = self.shift_value(instruction.mnemonic, value);
        if instruction.mode == AddressingMode::Accumulator {
            self.registers.set_a(result);
        } else {
            let address = self.target(instruction)?;
            self.write_byte(memory, address, result);
        }
        Ok(Flow::Next)
    }

    pub fn step_memory(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        let result = match instruction.mnemonic {
            Mnemonic::Inc => value.wrapping_add(1),
            Mnemonic::Dec => value.wrapping_sub(1),
            _ => return Err(Self::mismatch("INC/DEC", instruction)),
        };
        let address = self.target(instruction)?;
        self.write_byte(memory, address, result);
        self.update_zero_and_negative_flags(result);
        Ok(Flow::Next)
    }

    pub fn step_register(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let result = match instruction.mnemonic {
            Mnemonic::Inx => {
                self.registers.set_x(self.registers.x().wrapping_add(1));
                self.registers.x()
            }
            Mnemonic::Iny => {
                self.registers.set_y(self.registers.y().wrapping_add(1));
                self.registers.y()
            }
            Mnemonic::Dex => {
                self.registers.set_x(self.registers.x().wrapping_sub(1));
                self.registers.x()
            }
            Mnemonic::Dey => {
                self.registers.set_y(self.registers.y().wrapping_sub(1));
                self.registers.y()
            }
            _ => return Err(Self::mismatch("INX/INY/DEX/DEY", instruction)),
        };
        self.update_zero_and_negative_flags(result);
        Ok(Flow::Next)
    }

    /// Register transfers. Only TAX, TAY and TXA touch Z/N; TYA, TSX and
    /// TXS copy silently.
    pub fn transfer(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        match instruction.mnemonic {
            Mnemonic::Tax => {
                self.registers.set_x(self.registers.a());
                self.update_zero_and_negative_flags(self.registers.x());
            }
            Mnemonic::Tay => {
                self.registers.set_y(self.registers.a());
                self.update_zero_and_negative_flags(self.registers.y());
            }
            Mnemonic::Txa => {
                self.registers.set_a(self.registers.x());
                self.update_zero_and_negative_flags(self.registers.a());
            }
            Mnemonic::Tya => self.registers.set_a(self.registers.y()),
            Mnemonic::Tsx => self.registers.set_x(self.registers.sp()),
            Mnemonic::Txs => self.registers.set_sp(self.registers.x()),
            _ => return Err(Self::mismatch("transfer", instruction)),
        }
        Ok(Flow::Next)
    }

    pub fn flags(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let (flag, value) = match instruction.mnemonic {
            Mnemonic::Clc => (Flag::Carry, false),
            Mnemonic::Sec => (Flag::Carry, true),
            Mnemonic::Cli => (Flag::InterruptDisable, false),
            Mnemonic::Sei => (Flag::InterruptDisable, true),
            Mnemonic::Cld => (Flag::Decimal, false),
            Mnemonic::Sed => (Flag::Decimal, true),
            Mnemonic::Clv => (Flag::Overflow, false),
            _ => return Err(Self::mismatch("flag", instruction)),
        };
        self.set_flag(flag, value);
        Ok(Flow::Next)
    }

    /// Conditional branches. The displacement is relative to the address of
    /// the following instruction.
    pub fn branch(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let taken = match instruction.mnemonic {
            Mnemonic::Bcc => !self.status.carry(),
            Mnemonic::Bcs => self.status.carry(),
            Mnemonic::Beq => self.status.zero(),
            Mnemonic::Bne => !self.status.zero(),
            Mnemonic::Bmi => self.status.negative(),
            Mnemonic::Bpl => !self.status.negative(),
            Mnemonic::Bvc => !self.status.overflow(),
            Mnemonic::Bvs => self.status.overflow(),
            _ => return Err(Self::mismatch("branch", instruction)),
        };
        let offset = match instruction.operand {
            Operand::Relative(offset) => offset,
            _ => {
                return Err(Fault::DecodeFault {
                    pc: instruction.address,
                    needed: 2,
                    available: instruction.size() as usize,
                })
            }
        };
        if !taken {
            return Ok(Flow::Next);
        }
        let target = instruction.next_address().wrapping_add(offset as i16 as u16);
        self.registers.set_pc(target);
        Ok(Flow::Jump)
    }

    pub fn jump(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        match instruction.mnemonic {
            Mnemonic::Jmp => {
                let target = self.target(instruction)?;
                self.registers.set_pc(target);
            }
            Mnemonic::Jsr => {
                let target = self.target(instruction)?;
                // Return address is the last byte of the JSR itself.
                let return_addr = instruction.address.wrapping_add(2);
                self.push_u16(memory, return_addr);
                self.registers.set_pc(target);
            }
            Mnemonic::Rts => {
                let pc = self.pop_u16(memory).wrapping_add(1);
                self.registers.set_pc(pc);
            }
            Mnemonic::Rti => {
                let status = self.pop(memory);
                self.status.apply_pulled(status);
                let pc = self.pop_u16(memory);
                self.registers.set_pc(pc);
            }
            _ => return Err(Self::mismatch("jump", instruction)),
        }
        Ok(Flow::Jump)
    }

    pub fn stack(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        match instruction.mnemonic {
            Mnemonic::Pha => {
                let a = self.registers.a();
                self.push(memory, a);
            }
            Mnemonic::Php => {
                let status = self.status.bits() | Flag::Break.bit() | UNUSED_BIT;
                self.push(memory, status);
            }
            Mnemonic::Pla => {
                let value = self.pop(memory);
                self.registers.set_a(value);
                self.update_zero_and_negative_flags(value);
            }
            Mnemonic::Plp => {
                let value = self.pop(memory);
                self.status.apply_pulled(value);
            }
            _ => return Err(Self::mismatch("stack", instruction)),
        }
        Ok(Flow::Next)
    }

    pub fn halt(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        match instruction.mnemonic {
            Mnemonic::Brk => self.set_flag(Flag::Break, true),
            Mnemonic::Kil => {}
            _ => return Err(Self::mismatch("BRK/KIL", instruction)),
        }
        Ok(Flow::Halt)
    }

    pub fn nop(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        if instruction.mnemonic != Mnemonic::Nop {
            return Err(Self::mismatch("NOP", instruction));
        }
        Ok(Flow::Next)
    }

    /// Undocumented read-modify-write opcodes: a memory shift or step
    /// followed by an accumulator operation on the result.
    pub fn combined(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        let result = match instruction.mnemonic {
            Mnemonic::Slo | Mnemonic::Rla | Mnemonic::Sre | Mnemonic::Rra => {
                self.shift_value(instruction.mnemonic, value)
            }
            Mnemonic::Dcp => value.wrapping_sub(1),
            Mnemonic::Isc => value.wrapping_add(1),
            _ => return Err(Self::mismatch("combined read-modify-write", instruction)),
        };
        let address = self.target(instruction)?;
        self.write_byte(memory, address, result);

        let a = self.registers.a();
        match instruction.mnemonic {
            Mnemonic::Slo => self.set_accumulator(a | result),
            Mnemonic::Rla => self.set_accumulator(a & result),
            Mnemonic::Sre => self.set_accumulator(a ^ result),
            Mnemonic::Rra => self.add_to_accumulator(result),
            Mnemonic::Dcp => self.compare_with(a, result),
            _ => self.add_to_accumulator(!result),
        }
        Ok(Flow::Next)
    }

    /// Undocumented immediate-mode combinations.
    pub fn immediate_combined(&mut self, instruction: &Instruction, _memory: &mut Memory) -> Result<Flow, Fault> {
        let value = self.operand_value(instruction);
        let a = self.registers.a();
        match instruction.mnemonic {
            Mnemonic::Anc => {
                self.set_accumulator(a & value);
                self.status.set_carry(self.status.negative());
            }
            Mnemonic::Alr => {
                let result = self.shift_value(Mnemonic::Lsr, a & value);
                self.registers.set_a(result);
            }
            Mnemonic::Arr => {
                let result = self.shift_value(Mnemonic::Ror, a & value);
                self.registers.set_a(result);
                let bit6 = result & 0x40 != 0;
                let bit5 = result & 0x20 != 0;
                self.status.set_carry(bit6);
                self.status.set_overflow(bit6 ^ bit5);
            }
            Mnemonic::Axs => {
                let base = a & self.registers.x();
                let result = base.wrapping_sub(value);
                self.status.set_carry(base >= value);
                self.registers.set_x(result);
                self.update_zero_and_negative_flags(result);
            }
            Mnemonic::Xaa => self.set_accumulator(self.registers.x() & value),
            _ => return Err(Self::mismatch("immediate combination", instruction)),
        }
        Ok(Flow::Next)
    }

    /// Stores that AND the stored register with the high byte of the base
    /// address plus one.
    pub fn unstable_store(&mut self, instruction: &Instruction, memory: &mut Memory) -> Result<Flow, Fault> {
        if !matches!(
            instruction.mnemonic,
            Mnemonic::Ahx | Mnemonic::Shx | Mnemonic::Shy | Mnemonic::Tas
        ) {
            return Err(Self::mismatch("unstable store", instruction));
        }
        let address = self.target(instruction)?;
        let index = match instruction.mode {
            AddressingMode::AbsoluteX => self.registers.x(),
            _ => self.registers.y(),
        };
        let high = (address.wrapping_sub(index as u16) >> 8) as u8;
        let mask = high.wrapping_add(1);

        let value = match instruction.mnemonic {
            Mnemonic::Ahx => self.registers.a() & self.registers.x() & mask,
            Mnemonic::Shx => self.registers.x() & mask,
            Mnemonic::Shy => self.registers.y() & mask,
            _ => {
                let sp = self.registers.a() & self.registers.x();
                self.registers.set_sp(sp);
                sp & mask
            }
        };
        self.write_byte(memory, address, value);
        Ok(Flow::Next)
    }

    fn set_accumulator(&mut self, value: u8) {
        self.registers.set_a(value);
        self.update_zero_and_negative_flags(value);
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
