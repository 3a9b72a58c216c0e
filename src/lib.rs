//! # enesys6502
//!
//! A 6502-class CPU core. Raw machine code is loaded into a flat byte
//! addressed RAM and run by a fetch-decode-execute loop until it hits BRK,
//! is interrupted, or faults.
//!
//! ## Features
//!
//! - All 56 documented instructions plus the common undocumented ones
//! - 256-entry opcode table with sizes and addressing modes
//! - Bounded memory: out-of-range accesses are reported, not fatal
//! - An [`Engine`] that runs on the calling thread or on a tokio worker, and
//!   can be interrupted from anywhere
//! - Snapshots, Prometheus metrics and a small HTTP API
//!
//! ## Example
//!
//! ```rust
//! use enesys6502::{Console, ConsoleConfig, StopReason};
//!
//! let mut console = Console::new(ConsoleConfig::default()).unwrap();
//!
//! // LDA #$42; STA $0200; BRK
//! console.load(&[0xA9, 0x42, 0x8D, 0x00, 0x02, 0x00], 0x0600).unwrap();
//!
//! assert_eq!(console.run_blocking().unwrap(), StopReason::Break);
//! assert_eq!(console.read_memory(0x0200, 1).unwrap(), vec![0x42]);
//! ```

#![recursion_limit = "2048"]

pub mod addressing;
pub mod config;
pub mod console;
pub mod cpu;
pub mod engine;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod metrics;
pub mod opcodes;
pub mod registers;
pub mod server;
pub mod snapshots;
pub mod status;

pub use config::ConsoleConfig;
pub use console::Console;
pub use cpu::CPU;
pub use engine::{Engine, EngineState, ExecutionObserver, StopReason};
pub use error::{EngineError, Fault};
pub use memory::Memory;
pub use status::Flag;
