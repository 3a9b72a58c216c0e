use thiserror::Error;

use crate::engine::EngineState;
use crate::opcodes::Mnemonic;

/// Direction of a memory access, carried by [`Fault::AddressOutOfRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// Faults raised while decoding or executing a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("decode fault at ${pc:04X}: instruction needs {needed} byte(s), {available} available")]
    DecodeFault {
        pc: u16,
        needed: usize,
        available: usize,
    },
    #[error("mnemonic mismatch at ${pc:04X}: handler for {expected} received {found}")]
    MnemonicMismatch {
        expected: &'static str,
        found: Mnemonic,
        pc: u16,
    },
    #[error("{access} of ${address:04X} outside memory capacity {capacity:#06X}")]
    AddressOutOfRange {
        address: u16,
        capacity: usize,
        access: Access,
    },
    #[error("opcode ${opcode:02X} has no instruction table entry")]
    UnknownOpcode { opcode: u8 },
}

impl Fault {
    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::DecodeFault { .. } => "decode_fault",
            Fault::MnemonicMismatch { .. } => "mnemonic_mismatch",
            Fault::AddressOutOfRange { .. } => "address_out_of_range",
            Fault::UnknownOpcode { .. } => "unknown_opcode",
        }
    }

    /// Whether the run loop must stop after this fault. Out-of-range accesses
    /// are logged and execution continues.
    pub fn halts(&self) -> bool {
        !matches!(self, Fault::AddressOutOfRange { .. })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is {0}, expected idle")]
    NotIdle(EngineState),
    #[error("engine is not running")]
    NotRunning,
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("engine worker terminated abnormally: {0}")]
    WorkerPanicked(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image of {len} bytes at ${base:04X} does not fit in {capacity:#06X} bytes of memory")]
    ImageTooLarge { base: u16, len: usize, capacity: usize },
    #[error("image is empty")]
    EmptyImage,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("memory size {0:#X} must be between 1 and 0x10000")]
    MemorySize(usize),
}
