use proptest::prelude::*;

use enesys6502::registers::{Register, Registers};
use enesys6502::status::ProcessorStatus;
use enesys6502::{Flag, Memory, CPU};

fn any_flag() -> impl Strategy<Value = Flag> {
    proptest::sample::select(Flag::ALL.to_vec())
}

proptest! {
    #[test]
    fn memory_write_then_read(capacity in 1usize..=0x10000, address: u16, value: u8) {
        let mut memory = Memory::with_capacity(capacity);
        memory.write(address, value);
        if (address as usize) < capacity {
            prop_assert_eq!(memory.read(address), value);
        } else {
            prop_assert_eq!(memory.read(address), 0);
            prop_assert!(memory.try_read(address).is_err());
        }
    }

    #[test]
    fn flag_set_and_clear_track_the_status_byte(flag in any_flag(), initial: u8) {
        let mut status = ProcessorStatus::new();
        status.apply_pulled(initial);

        status.set(flag, true);
        prop_assert!(status.is_enabled(flag));
        prop_assert_eq!(status.bits() & flag.bit(), flag.bit());

        status.set(flag, false);
        prop_assert!(!status.is_enabled(flag));
        prop_assert_eq!(status.bits() & flag.bit(), 0);
    }

    #[test]
    fn eight_bit_registers_wrap(value in -1024i64..1024) {
        let mut registers = Registers::new(0);
        for register in [Register::A, Register::X, Register::Y, Register::Sp] {
            registers.set(register, value);
            prop_assert_eq!(registers.get(register) as i64, value.rem_euclid(256));
        }
    }

    #[test]
    fn nop_only_moves_pc(count in 1usize..64, a: u8, x: u8, y: u8) {
        let mut memory = Memory::with_capacity(0x0800);
        memory.load(&vec![0xEA; count], 0x0100).unwrap();
        let mut cpu = CPU::new(0x0100);
        cpu.registers_mut().set_a(a);
        cpu.registers_mut().set_x(x);
        cpu.registers_mut().set_y(y);
        let status = cpu.get_status();
        let sp = cpu.get_sp();

        for _ in 0..count {
            cpu.step(&mut memory).unwrap();
        }

        prop_assert_eq!(cpu.get_pc(), 0x0100 + count as u16);
        prop_assert_eq!(cpu.get_register_a(), a);
        prop_assert_eq!(cpu.get_register_x(), x);
        prop_assert_eq!(cpu.get_register_y(), y);
        prop_assert_eq!(cpu.get_sp(), sp);
        prop_assert_eq!(cpu.get_status(), status);
    }
}

#[test]
fn register_wrap_examples() {
    let mut registers = Registers::new(0);
    registers.set(Register::A, 256);
    assert_eq!(registers.a(), 0);
    registers.set(Register::X, -1);
    assert_eq!(registers.x(), 255);
    registers.set(Register::Pc, 0x1_0001);
    assert_eq!(registers.pc(), 1);
}
