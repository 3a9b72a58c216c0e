use std::sync::{Arc, Mutex};
use std::time::Duration;

use enesys6502::cpu::Step;
use enesys6502::error::Access;
use enesys6502::{
    Console, ConsoleConfig, Engine, EngineError, EngineState, ExecutionObserver, Fault, Flag, Memory,
    StopReason, CPU,
};

fn console_with(program: &[u8]) -> Console {
    let mut console = Console::new(ConsoleConfig::default()).unwrap();
    console.load(program, 0x0600).unwrap();
    console
}

fn cpu(console: &Console) -> &CPU {
    console.engine().unwrap().cpu()
}

#[test]
fn test_load_immediate_x() {
    let mut console = console_with(&[0xA2, 0x44]); // LDX #$44

    console.step().unwrap();

    let cpu = cpu(&console);
    assert_eq!(cpu.get_register_x(), 0x44);
    assert_eq!(cpu.get_pc(), 0x0602);
    assert!(!cpu.get_flag(Flag::Zero));
    assert!(!cpu.get_flag(Flag::Negative));
}

#[test]
fn test_set_then_clear_carry() {
    let mut console = console_with(&[0x38, 0x18]); // SEC; CLC

    console.step().unwrap();
    assert!(cpu(&console).get_flag(Flag::Carry));
    console.step().unwrap();

    let cpu = cpu(&console);
    assert!(!cpu.get_flag(Flag::Carry));
    assert_eq!(cpu.get_pc(), 0x0602);
}

#[test]
fn test_store_then_load_round_trip() {
    let mut console = console_with(&[
        0xA9, 0x2A,       // LDA #$2A
        0x8D, 0x00, 0x02, // STA $0200
    ]);

    console.step().unwrap();
    console.step().unwrap();

    assert_eq!(console.engine().unwrap().memory().read(0x0200), 0x2A);
    assert_eq!(cpu(&console).get_register_a(), 0x2A);
}

#[test]
fn test_simple_calculation() {
    // Calculate 10 + 20 + 30 and store result
    let mut console = console_with(&[
        0xA9, 0x0A, // LDA #$0A    ; A = 10
        0x69, 0x14, // ADC #$14    ; A = A + 20 = 30
        0x69, 0x1E, // ADC #$1E    ; A = A + 30 = 60
        0x85, 0x50, // STA $50     ; Store result at $50
        0x00,       // BRK
    ]);

    assert_eq!(console.run_blocking().unwrap(), StopReason::Break);

    let cpu = cpu(&console);
    assert_eq!(cpu.get_register_a(), 60);
    assert_eq!(cpu.get_pc(), 0x0609);
    assert_eq!(cpu.instructions_executed(), 5);
    assert!(cpu.get_flag(Flag::Break));
    assert_eq!(console.read_memory(0x50, 1).unwrap(), vec![60]);
    assert_eq!(console.state(), EngineState::Stopped);
}

#[test]
fn test_indexed_memory_access() {
    let mut console = console_with(&[
        0xA2, 0x02, // LDX #$02    ; X = 2
        0xB5, 0x50, // LDA $50,X   ; Load from $50 + X = $52
        0x95, 0x60, // STA $60,X   ; Store to $60 + X = $62
        0x00,       // BRK
    ]);
    {
        let memory = console.engine_mut().unwrap().memory_mut();
        memory.write(0x50, 0x10);
        memory.write(0x51, 0x20);
        memory.write(0x52, 0x30);
    }

    assert_eq!(console.run_blocking().unwrap(), StopReason::Break);

    assert_eq!(cpu(&console).get_register_x(), 2);
    assert_eq!(cpu(&console).get_register_a(), 0x30);
    assert_eq!(console.read_memory(0x62, 1).unwrap(), vec![0x30]);
}

#[test]
fn test_countdown_loop_with_subroutine() {
    let mut console = console_with(&[
        0xA2, 0x05,       // LDX #$05
        0x20, 0x0A, 0x06, // loop: JSR $060A
        0xCA,             // DEX
        0xD0, 0xFA,       // BNE loop
        0x00,             // BRK
        0xEA,             // (padding)
        0xC8,             // $060A: INY
        0x60,             // RTS
    ]);

    assert_eq!(console.run_blocking().unwrap(), StopReason::Break);

    let cpu = cpu(&console);
    assert_eq!(cpu.get_register_x(), 0);
    assert_eq!(cpu.get_register_y(), 5);
    assert_eq!(cpu.get_sp(), 0xFD);
    assert!(cpu.get_flag(Flag::Zero));
}

#[test]
fn test_instruction_limit_stops_infinite_loop() {
    let config = ConsoleConfig {
        instruction_limit: Some(100),
        ..ConsoleConfig::default()
    };
    let mut console = Console::new(config).unwrap();
    console.load(&[0x4C, 0x00, 0x06], 0x0600).unwrap(); // JMP $0600

    assert_eq!(console.run_blocking().unwrap(), StopReason::InstructionLimit);
    assert_eq!(cpu(&console).instructions_executed(), 100);
    assert_eq!(cpu(&console).get_pc(), 0x0600);
}

#[test]
fn test_out_of_range_access_continues() {
    let mut console = console_with(&[
        0xAD, 0x00, 0x90, // LDA $9000 (beyond 2 KiB)
        0xA2, 0x07,       // LDX #$07
        0x00,             // BRK
    ]);
    console.engine_mut().unwrap().cpu_mut().registers_mut().set_a(0x55);
    let mut faults = console.subscribe_faults().unwrap();

    assert_eq!(console.run_blocking().unwrap(), StopReason::Break);

    assert_eq!(cpu(&console).get_register_a(), 0);
    assert_eq!(cpu(&console).get_register_x(), 0x07);
    assert_eq!(
        faults.try_recv().unwrap(),
        Fault::AddressOutOfRange {
            address: 0x9000,
            capacity: 0x0800,
            access: Access::Read,
        }
    );
    assert!(faults.try_recv().is_err());
}

#[test]
fn test_truncated_instruction_halts_with_decode_fault() {
    let mut console = Console::new(ConsoleConfig::default()).unwrap();
    // LDA absolute in the last byte of memory
    console.load(&[0xAD], 0x07FF).unwrap();

    let err = console.run_blocking().unwrap_err();

    assert!(matches!(
        err,
        EngineError::Fault(Fault::DecodeFault { pc: 0x07FF, needed: 3, available: 1 })
    ));
    assert_eq!(cpu(&console).get_pc(), 0x07FF);
    assert_eq!(console.state(), EngineState::Stopped);
    assert_eq!(console.last_stop(), None);
}

#[test]
fn test_engine_over_full_address_space() {
    let mut memory = Memory::new();
    memory.load(&[0xE8, 0xE8, 0x00], 0xC000).unwrap(); // INX; INX; BRK
    let mut engine = Engine::new(CPU::new(0xC000), memory);

    assert_eq!(engine.run_blocking().unwrap(), StopReason::Break);
    assert_eq!(engine.cpu().get_register_x(), 2);

    assert!(matches!(engine.run_blocking(), Err(EngineError::NotIdle(EngineState::Stopped))));
    engine.rearm();
    assert_eq!(engine.state(), EngineState::Idle);
}

#[derive(Clone, Default)]
struct Trace {
    addresses: Arc<Mutex<Vec<u16>>>,
    stopped: Arc<Mutex<Option<StopReason>>>,
}

impl ExecutionObserver for Trace {
    fn on_step(&mut self, step: &Step, _cpu: &CPU) {
        self.addresses.lock().unwrap().push(step.instruction.address);
    }

    fn on_stop(&mut self, _state: EngineState, reason: Option<StopReason>) {
        *self.stopped.lock().unwrap() = reason;
    }
}

#[test]
fn test_observer_sees_each_instruction() {
    let mut console = console_with(&[0xEA, 0xEA, 0x00]); // NOP; NOP; BRK
    let trace = Trace::default();
    console.add_observer(Box::new(trace.clone())).unwrap();

    console.run_blocking().unwrap();

    assert_eq!(*trace.addresses.lock().unwrap(), vec![0x0600, 0x0601, 0x0602]);
    assert_eq!(*trace.stopped.lock().unwrap(), Some(StopReason::Break));
}

#[tokio::test]
async fn test_worker_interrupt_and_restart() {
    let mut console = console_with(&[
        0xE8,             // INX
        0x4C, 0x00, 0x06, // JMP $0600
    ]);

    console.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    console.interrupt();
    assert_eq!(console.wait().await.unwrap(), StopReason::Interrupted);

    let executed = cpu(&console).instructions_executed();
    assert!(executed > 0);

    // The engine can be re-armed and run again from where it stopped.
    console.rearm().unwrap();
    console.start().unwrap();
    assert_eq!(console.stop().await.unwrap(), StopReason::Interrupted);
    assert!(cpu(&console).instructions_executed() >= executed);
}

#[tokio::test]
async fn test_interrupt_before_start_is_honored() {
    let mut console = console_with(&[0x4C, 0x00, 0x06]); // JMP $0600

    console.interrupt();
    console.start().unwrap();

    assert_eq!(console.wait().await.unwrap(), StopReason::Interrupted);
    assert_eq!(cpu(&console).instructions_executed(), 0);
}
