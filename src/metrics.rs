use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::Once;
use std::time::{Duration, Instant};

use crate::cpu::CPU;
use crate::error::Fault;
use crate::registers::Register;
use crate::status::Flag;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Counter for total CPU instructions executed by opcode
    pub static ref CPU_INSTRUCTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cpu_instructions_total", "Total number of CPU instructions executed by opcode"),
        &["opcode", "instruction"]
    ).expect("Failed to create CPU instructions counter");

    /// Histogram for instruction execution time
    pub static ref INSTRUCTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("instruction_duration_seconds", "Time spent executing instructions")
            .buckets(vec![0.000001, 0.000005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001]),
        &["instruction"]
    ).expect("Failed to create instruction duration histogram");

    /// Counter for decode/dispatch/memory faults by kind
    pub static ref CPU_FAULTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cpu_faults_total", "Total number of faults raised while executing"),
        &["kind"]
    ).expect("Failed to create CPU faults counter");

    /// Counter for execution loops started
    pub static ref ENGINE_RUNS_TOTAL: Counter = Counter::new(
        "engine_runs_total", "Total number of execution loops started"
    ).expect("Failed to create engine runs counter");

    /// Counter for execution loops stopped, by reason
    pub static ref ENGINE_STOPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("engine_stops_total", "Total number of execution loops stopped"),
        &["reason"]
    ).expect("Failed to create engine stops counter");

    /// Counter for API requests by endpoint and method
    pub static ref API_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("api_requests_total", "Total number of API requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create API requests counter");

    /// Histogram for API request duration
    pub static ref API_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("api_request_duration_seconds", "API request duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "endpoint"]
    ).expect("Failed to create API request duration histogram");

    /// Gauge for consoles held by the server
    pub static ref ACTIVE_CONSOLES: Gauge = Gauge::new(
        "active_consoles_total", "Number of active console instances"
    ).expect("Failed to create active consoles gauge");

    /// Gauge for CPU register values by console ID
    pub static ref CPU_REGISTER_VALUES: GaugeVec = GaugeVec::new(
        Opts::new("cpu_register_value", "Current CPU register values"),
        &["console_id", "register"]
    ).expect("Failed to create CPU register values gauge");

    /// Gauge for CPU flags by console ID
    pub static ref CPU_FLAGS: GaugeVec = GaugeVec::new(
        Opts::new("cpu_flags", "Current CPU flag states (0 or 1)"),
        &["console_id", "flag"]
    ).expect("Failed to create CPU flags gauge");

    /// Counter for program loads
    pub static ref PROGRAM_LOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("program_loads_total", "Total number of programs loaded"),
        &["console_id"]
    ).expect("Failed to create program loads counter");
}

static INIT: Once = Once::new();

/// Register every metric with the global registry. Safe to call more than
/// once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(CPU_INSTRUCTIONS_TOTAL.clone()))
            .expect("Failed to register CPU instructions counter");

        REGISTRY
            .register(Box::new(INSTRUCTION_DURATION.clone()))
            .expect("Failed to register instruction duration histogram");

        REGISTRY
            .register(Box::new(CPU_FAULTS_TOTAL.clone()))
            .expect("Failed to register CPU faults counter");

        REGISTRY
            .register(Box::new(ENGINE_RUNS_TOTAL.clone()))
            .expect("Failed to register engine runs counter");

        REGISTRY
            .register(Box::new(ENGINE_STOPS_TOTAL.clone()))
            .expect("Failed to register engine stops counter");

        REGISTRY
            .register(Box::new(API_REQUESTS_TOTAL.clone()))
            .expect("Failed to register API requests counter");

        REGISTRY
            .register(Box::new(API_REQUEST_DURATION.clone()))
            .expect("Failed to register API request duration histogram");

        REGISTRY
            .register(Box::new(ACTIVE_CONSOLES.clone()))
            .expect("Failed to register active consoles gauge");

        REGISTRY
            .register(Box::new(CPU_REGISTER_VALUES.clone()))
            .expect("Failed to register CPU register values gauge");

        REGISTRY
            .register(Box::new(CPU_FLAGS.clone()))
            .expect("Failed to register CPU flags gauge");

        REGISTRY
            .register(Box::new(PROGRAM_LOADS_TOTAL.clone()))
            .expect("Failed to register program loads counter");
    });
}

/// Record a CPU instruction execution
pub fn record_instruction(opcode: u8, instruction_name: &str, duration: Duration) {
    CPU_INSTRUCTIONS_TOTAL
        .with_label_values(&[&format!("0x{:02X}", opcode), instruction_name])
        .inc();

    INSTRUCTION_DURATION
        .with_label_values(&[instruction_name])
        .observe(duration.as_secs_f64());
}

pub fn record_fault(fault: &Fault) {
    CPU_FAULTS_TOTAL.with_label_values(&[fault.kind()]).inc();
}

pub fn record_run_started() {
    ENGINE_RUNS_TOTAL.inc();
}

pub fn record_run_stopped(reason: &str) {
    ENGINE_STOPS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record an API request
pub fn record_api_request(method: &str, endpoint: &str, status: u16, duration: Duration) {
    API_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    API_REQUEST_DURATION
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

pub fn set_active_consoles(count: usize) {
    ACTIVE_CONSOLES.set(count as f64);
}

/// Publish the register file and every status flag of one console.
pub fn update_cpu_registers(console_id: &str, cpu: &CPU) {
    for register in [Register::A, Register::X, Register::Y, Register::Sp, Register::Pc] {
        CPU_REGISTER_VALUES
            .with_label_values(&[console_id, register.name()])
            .set(cpu.registers().get(register) as f64);
    }

    CPU_REGISTER_VALUES
        .with_label_values(&[console_id, "STATUS"])
        .set(cpu.get_status() as f64);

    for flag in Flag::ALL {
        CPU_FLAGS
            .with_label_values(&[console_id, flag.name()])
            .set(if cpu.get_flag(flag) { 1.0 } else { 0.0 });
    }
}

/// Drop every labelled series belonging to a removed console.
pub fn remove_console(console_id: &str) {
    for register in ["A", "X", "Y", "SP", "PC", "STATUS"] {
        let _ = CPU_REGISTER_VALUES.remove_label_values(&[console_id, register]);
    }
    for flag in Flag::ALL {
        let _ = CPU_FLAGS.remove_label_values(&[console_id, flag.name()]);
    }
    let _ = PROGRAM_LOADS_TOTAL.remove_label_values(&[console_id]);
}

/// Record a program load
pub fn record_program_load(console_id: &str) {
    PROGRAM_LOADS_TOTAL
        .with_label_values(&[console_id])
        .inc();
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        record_run_started();
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("engine_runs_total"));
    }

    #[test]
    fn test_update_cpu_registers() {
        let mut cpu = CPU::new(0x0600);
        cpu.registers_mut().set_a(0x42);
        update_cpu_registers("test-console", &cpu);
        assert_eq!(
            CPU_REGISTER_VALUES.with_label_values(&["test-console", "A"]).get(),
            0x42 as f64
        );
        assert_eq!(
            CPU_FLAGS.with_label_values(&["test-console", "interrupt_disable"]).get(),
            1.0
        );
        remove_console("test-console");
    }
}
