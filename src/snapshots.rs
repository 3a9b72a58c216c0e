use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cpu::CPU;
use crate::engine::{EngineState, StopReason};
use crate::memory::Memory;
use crate::status::Flag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSnapshot {
    pub carry: bool,
    pub zero: bool,
    pub interrupt_disable: bool,
    pub decimal: bool,
    #[serde(rename = "break")]
    pub break_flag: bool,
    pub overflow: bool,
    pub negative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub pc: u16,
    pub sp: u8,
    pub status: u8,
    /// `NVBDIZC`, most significant flag first.
    pub flag_bits: String,
    pub flags: FlagSnapshot,
    pub state: EngineState,
    pub instructions_executed: u64,
}

impl CpuSnapshot {
    pub fn capture(cpu: &CPU, state: EngineState) -> Self {
        CpuSnapshot {
            a: cpu.get_register_a(),
            x: cpu.get_register_x(),
            y: cpu.get_register_y(),
            pc: cpu.get_pc(),
            sp: cpu.get_sp(),
            status: cpu.get_status(),
            flag_bits: cpu.status().to_string(),
            flags: FlagSnapshot {
                carry: cpu.get_flag(Flag::Carry),
                zero: cpu.get_flag(Flag::Zero),
                interrupt_disable: cpu.get_flag(Flag::InterruptDisable),
                decimal: cpu.get_flag(Flag::Decimal),
                break_flag: cpu.get_flag(Flag::Break),
                overflow: cpu.get_flag(Flag::Overflow),
                negative: cpu.get_flag(Flag::Negative),
            },
            state,
            instructions_executed: cpu.instructions_executed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDump {
    pub address: u16,
    pub data: Vec<u8>,
}

impl MemoryDump {
    pub fn capture(memory: &Memory, address: u16, length: usize) -> Self {
        MemoryDump {
            address,
            data: memory.dump(address, length),
        }
    }

    /// The whole backing store from address zero.
    pub fn full(memory: &Memory) -> Self {
        MemoryDump {
            address: 0,
            data: memory.as_slice().to_vec(),
        }
    }
}

/// Point-in-time view of one console, for display and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleSnapshot {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub memory_size: usize,
    pub last_stop: Option<StopReason>,
    pub cpu: CpuSnapshot,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<MemoryDump>,
}

impl ConsoleSnapshot {
    pub fn new(id: &str, memory_size: usize, last_stop: Option<StopReason>, cpu: CpuSnapshot) -> Self {
        ConsoleSnapshot {
            id: id.to_string(),
            captured_at: Utc::now(),
            memory_size,
            last_stop,
            cpu,
            memory: None,
        }
    }

    pub fn with_memory(mut self, dump: MemoryDump) -> Self {
        self.memory = Some(dump);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
