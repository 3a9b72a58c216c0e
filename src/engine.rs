//! Execution engine.
//!
//! Owns one CPU and its memory and runs the fetch-decode-execute loop. The
//! loop can run on the caller's thread ([`Engine::run_blocking`]) or be handed
//! to a tokio blocking worker ([`Engine::start`]). Either way it checks a
//! shared stop flag before every fetch, so an interrupt always lets the
//! current instruction finish.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::cpu::{Flow, Step, CPU};
use crate::error::{EngineError, Fault};
use crate::memory::Memory;
use crate::metrics::{record_fault, record_run_started, record_run_stopped};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Constructed or re-armed, not running.
    Idle,
    Running,
    /// The loop exited. Needs [`Engine::rearm`] before it can run again.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a run ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A BRK (or KIL) instruction executed.
    Break,
    Interrupted,
    InstructionLimit,
}

impl StopReason {
    pub fn label(self) -> &'static str {
        match self {
            StopReason::Break => "break",
            StopReason::Interrupted => "interrupted",
            StopReason::InstructionLimit => "instruction_limit",
        }
    }
}

/// Push-style hook called from the run loop. Every method has an empty
/// default so observers implement only what they need.
pub trait ExecutionObserver: Send {
    fn on_step(&mut self, _step: &Step, _cpu: &CPU) {}
    fn on_fault(&mut self, _fault: &Fault) {}
    fn on_stop(&mut self, _state: EngineState, _reason: Option<StopReason>) {}
}

/// Cloneable handle that requests a running loop to stop.
#[derive(Debug, Clone)]
pub struct Interrupter {
    stop: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct Engine {
    cpu: CPU,
    memory: Memory,
    state: EngineState,
    stop: Arc<AtomicBool>,
    observers: Vec<Box<dyn ExecutionObserver>>,
    faults: Option<UnboundedSender<Fault>>,
    instruction_limit: Option<u64>,
    last_stop: Option<StopReason>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cpu", &self.cpu)
            .field("memory_size", &self.memory.size())
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .field("instruction_limit", &self.instruction_limit)
            .finish()
    }
}

impl Engine {
    pub fn new(cpu: CPU, memory: Memory) -> Self {
        Engine {
            cpu,
            memory,
            state: EngineState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            observers: Vec::new(),
            faults: None,
            instruction_limit: None,
            last_stop: None,
        }
    }

    /// Stop each run after `limit` instructions. `None` runs until BRK or an
    /// interrupt.
    pub fn set_instruction_limit(&mut self, limit: Option<u64>) {
        self.instruction_limit = limit;
    }

    pub fn add_observer(&mut self, observer: Box<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    /// Open a channel that receives every fault the loop raises, fatal or
    /// not. Replaces any previous subscription.
    pub fn subscribe_faults(&mut self) -> UnboundedReceiver<Fault> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.faults = Some(tx);
        rx
    }

    pub fn state(&self) -> EngineState { self.state }
    pub fn last_stop(&self) -> Option<StopReason> { self.last_stop }
    pub fn cpu(&self) -> &CPU { &self.cpu }
    pub fn cpu_mut(&mut self) -> &mut CPU { &mut self.cpu }
    pub fn memory(&self) -> &Memory { &self.memory }
    pub fn memory_mut(&mut self) -> &mut Memory { &mut self.memory }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Request the loop to stop at the next instruction boundary. A request
    /// made while idle is honoured as soon as the loop starts.
    pub fn interrupt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Return a stopped engine to idle and clear any pending interrupt.
    /// Registers and memory are left as the last run left them.
    pub fn rearm(&mut self) {
        if self.state == EngineState::Stopped {
            debug!("engine re-armed at ${:04X}", self.cpu.get_pc());
        }
        self.state = EngineState::Idle;
        self.stop.store(false, Ordering::SeqCst);
    }

    /// Execute exactly one instruction outside the run loop. Only valid while
    /// idle; a break instruction moves the engine to stopped.
    pub fn step(&mut self) -> Result<Step, EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::NotIdle(self.state));
        }
        match self.cycle() {
            Ok(step) => {
                if step.flow == Flow::Halt {
                    self.finish(Ok(StopReason::Break));
                }
                Ok(step)
            }
            Err(fault) => {
                self.finish(Err(&fault));
                Err(fault.into())
            }
        }
    }

    /// Run the loop on the calling thread until BRK, an interrupt, the
    /// instruction limit or a halting fault.
    ///
    /// This blocks for as long as the program runs; prefer [`Engine::start`]
    /// outside tests and the headless CLI.
    pub fn run_blocking(&mut self) -> Result<StopReason, EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::NotIdle(self.state));
        }
        self.state = EngineState::Running;
        record_run_started();
        info!(
            "engine running from ${:04X} (limit: {:?})",
            self.cpu.get_pc(),
            self.instruction_limit
        );

        match self.run_loop() {
            Ok(reason) => {
                self.finish(Ok(reason));
                Ok(reason)
            }
            Err(fault) => {
                self.finish(Err(&fault));
                Err(fault.into())
            }
        }
    }

    /// Hand the loop to a tokio blocking worker. Must be called from within a
    /// tokio runtime. The engine comes back through [`RunHandle::join`].
    pub fn start(mut self) -> RunHandle {
        let stop = Arc::clone(&self.stop);
        let task = tokio::task::spawn_blocking(move || {
            let result = self.run_blocking();
            RunOutcome {
                engine: self,
                result,
            }
        });
        RunHandle { stop, task }
    }

    fn run_loop(&mut self) -> Result<StopReason, Fault> {
        let mut executed: u64 = 0;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }
            if let Some(limit) = self.instruction_limit {
                if executed >= limit {
                    return Ok(StopReason::InstructionLimit);
                }
            }
            let step = self.cycle()?;
            executed += 1;
            if step.flow == Flow::Halt {
                return Ok(StopReason::Break);
            }
        }
    }

    /// One instruction plus fault reporting and observer notification.
    fn cycle(&mut self) -> Result<Step, Fault> {
        let result = self.cpu.step(&mut self.memory);
        for fault in self.cpu.take_faults() {
            self.report(&fault);
        }
        match result {
            Ok(step) => {
                for observer in self.observers.iter_mut() {
                    observer.on_step(&step, &self.cpu);
                }
                Ok(step)
            }
            Err(fault) => {
                self.report(&fault);
                Err(fault)
            }
        }
    }

    fn report(&mut self, fault: &Fault) {
        record_fault(fault);
        if fault.halts() {
            error!("{}", fault);
        } else {
            warn!("{}", fault);
        }
        for observer in self.observers.iter_mut() {
            observer.on_fault(fault);
        }
        let dropped = match &self.faults {
            Some(tx) => tx.send(fault.clone()).is_err(),
            None => false,
        };
        if dropped {
            debug!("fault receiver dropped, unsubscribing");
            self.faults = None;
        }
    }

    fn finish(&mut self, outcome: Result<StopReason, &Fault>) {
        self.state = EngineState::Stopped;
        let reason = outcome.ok();
        self.last_stop = reason;
        match reason {
            Some(reason) => {
                record_run_stopped(reason.label());
                info!(
                    "engine stopped ({}) at ${:04X} after {} instructions",
                    reason.label(),
                    self.cpu.get_pc(),
                    self.cpu.instructions_executed()
                );
            }
            None => {
                record_run_stopped("fault");
                info!("engine halted by fault at ${:04X}", self.cpu.get_pc());
            }
        }
        for observer in self.observers.iter_mut() {
            observer.on_stop(EngineState::Stopped, reason);
        }
    }
}

/// What a worker hands back when its loop exits.
#[derive(Debug)]
pub struct RunOutcome {
    pub engine: Engine,
    pub result: Result<StopReason, EngineError>,
}

/// Handle to a loop running on a blocking worker.
#[derive(Debug)]
pub struct RunHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn interrupt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            stop: Arc::clone(&self.stop),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit and take the engine back.
    pub async fn join(self) -> Result<RunOutcome, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::WorkerPanicked(e.to_string()))
    }
}
