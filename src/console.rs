//! The console: one engine plus the lifecycle around it.
//!
//! A console is what outer layers (the CLI and the HTTP server) hold. It
//! loads images, starts and interrupts the loop, and produces snapshots. While
//! the loop runs the engine lives on a worker, so register and memory access
//! is only available while the console is idle or stopped.

use log::{debug, info};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::config::ConsoleConfig;
use crate::cpu::{Step, CPU};
use crate::engine::{Engine, EngineState, ExecutionObserver, RunHandle, StopReason};
use crate::error::{ConfigError, EngineError, Fault};
use crate::memory::Memory;
use crate::snapshots::{ConsoleSnapshot, CpuSnapshot, MemoryDump};

enum Slot {
    Ready(Engine),
    Running(RunHandle),
    /// The worker died and took the engine with it.
    Lost(String),
}

pub struct Console {
    id: String,
    config: ConsoleConfig,
    slot: Slot,
    /// CPU state when the current run started; reported while running.
    parked: CpuSnapshot,
    last_stop: Option<StopReason>,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let memory = Memory::with_capacity(config.memory_size);
        let cpu = CPU::with_stack(config.load_address, config.stack_reset);
        let mut engine = Engine::new(cpu, memory);
        engine.set_instruction_limit(config.instruction_limit);

        let id = Uuid::new_v4().to_string();
        debug!("console {} created with {:#06X} bytes of memory", id, config.memory_size);
        Ok(Console {
            id,
            parked: CpuSnapshot::capture(engine.cpu(), EngineState::Idle),
            config,
            slot: Slot::Ready(engine),
            last_stop: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        match &self.slot {
            Slot::Ready(engine) => engine.state(),
            Slot::Running(_) => EngineState::Running,
            Slot::Lost(_) => EngineState::Stopped,
        }
    }

    pub fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    /// The engine, unless it is running on a worker.
    pub fn engine(&self) -> Result<&Engine, EngineError> {
        match &self.slot {
            Slot::Ready(engine) => Ok(engine),
            Slot::Running(_) => Err(EngineError::NotIdle(EngineState::Running)),
            Slot::Lost(reason) => Err(EngineError::WorkerPanicked(reason.clone())),
        }
    }

    pub fn engine_mut(&mut self) -> Result<&mut Engine, EngineError> {
        match &mut self.slot {
            Slot::Ready(engine) => Ok(engine),
            Slot::Running(_) => Err(EngineError::NotIdle(EngineState::Running)),
            Slot::Lost(reason) => Err(EngineError::WorkerPanicked(reason.clone())),
        }
    }

    /// Copy `image` into memory at `base` and point PC at it. Does not start
    /// execution.
    pub fn load(&mut self, image: &[u8], base: u16) -> Result<(), EngineError> {
        let engine = self.engine_mut()?;
        engine.memory_mut().load(image, base)?;
        engine.cpu_mut().registers_mut().set_pc(base);
        info!("loaded {} byte image at ${:04X}", image.len(), base);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn ExecutionObserver>) -> Result<(), EngineError> {
        self.engine_mut()?.add_observer(observer);
        Ok(())
    }

    pub fn subscribe_faults(&mut self) -> Result<UnboundedReceiver<Fault>, EngineError> {
        Ok(self.engine_mut()?.subscribe_faults())
    }

    pub fn step(&mut self) -> Result<Step, EngineError> {
        let result = self.engine_mut()?.step();
        if let Ok(engine) = self.engine() {
            if engine.state() == EngineState::Stopped {
                self.last_stop = engine.last_stop();
            }
        }
        result
    }

    /// Run on the calling thread. Blocks until the loop exits.
    pub fn run_blocking(&mut self) -> Result<StopReason, EngineError> {
        let result = self.engine_mut()?.run_blocking();
        self.last_stop = result.as_ref().ok().copied();
        result
    }

    /// Hand the engine to a worker. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let state = self.state();
        if state != EngineState::Idle {
            return Err(EngineError::NotIdle(state));
        }
        let engine = match std::mem::replace(&mut self.slot, Slot::Lost(String::new())) {
            Slot::Ready(engine) => engine,
            other => {
                self.slot = other;
                return Err(EngineError::NotIdle(state));
            }
        };
        self.parked = CpuSnapshot::capture(engine.cpu(), EngineState::Running);
        self.slot = Slot::Running(engine.start());
        debug!("console {} started", self.id);
        Ok(())
    }

    /// Ask the loop to stop after the current instruction. Returns
    /// immediately; use [`Console::wait`] to collect the result.
    pub fn interrupt(&self) {
        match &self.slot {
            Slot::Ready(engine) => engine.interrupt(),
            Slot::Running(handle) => handle.interrupt(),
            Slot::Lost(_) => {}
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running(_))
    }

    /// Wait for a running loop to exit and take the engine back.
    pub async fn wait(&mut self) -> Result<StopReason, EngineError> {
        let handle = match std::mem::replace(&mut self.slot, Slot::Lost(String::new())) {
            Slot::Running(handle) => handle,
            other => {
                self.slot = other;
                return Err(EngineError::NotRunning);
            }
        };
        match handle.join().await {
            Ok(outcome) => {
                self.slot = Slot::Ready(outcome.engine);
                self.last_stop = outcome.result.as_ref().ok().copied();
                outcome.result
            }
            Err(e) => {
                self.slot = Slot::Lost(e.to_string());
                Err(e)
            }
        }
    }

    /// Interrupt a running loop and wait for it. Leaves an idle or stopped
    /// console untouched.
    pub async fn stop(&mut self) -> Result<StopReason, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        self.interrupt();
        self.wait().await
    }

    /// Collect a worker that already exited on its own (BRK, limit, fault).
    /// Returns `None` while it is still running or if nothing was running.
    pub async fn reap(&mut self) -> Option<Result<StopReason, EngineError>> {
        match &self.slot {
            Slot::Running(handle) if handle.is_finished() => Some(self.wait().await),
            _ => None,
        }
    }

    pub fn rearm(&mut self) -> Result<(), EngineError> {
        self.engine_mut()?.rearm();
        Ok(())
    }

    pub fn read_memory(&self, address: u16, length: usize) -> Result<Vec<u8>, EngineError> {
        Ok(self.engine()?.memory().dump(address, length))
    }

    /// Snapshot of the console. While running, CPU fields show the state the
    /// run started from.
    pub fn snapshot(&self, dump: Option<(u16, usize)>) -> ConsoleSnapshot {
        let (cpu, memory) = match &self.slot {
            Slot::Ready(engine) => (
                CpuSnapshot::capture(engine.cpu(), engine.state()),
                dump.map(|(address, length)| MemoryDump::capture(engine.memory(), address, length)),
            ),
            Slot::Running(_) => (self.parked.clone(), None),
            Slot::Lost(_) => {
                let mut cpu = self.parked.clone();
                cpu.state = EngineState::Stopped;
                (cpu, None)
            }
        };
        let snapshot = ConsoleSnapshot::new(&self.id, self.config.memory_size, self.last_stop, cpu);
        match memory {
            Some(dump) => snapshot.with_memory(dump),
            None => snapshot,
        }
    }
}
