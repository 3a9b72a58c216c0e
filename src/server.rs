use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use prometheus::Encoder;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::config::ConsoleConfig;
use crate::console::Console;
use crate::engine::StopReason;
use crate::error::{ConfigError, EngineError};
use crate::metrics::{
    init_metrics, record_api_request, record_program_load, remove_console, set_active_consoles,
    update_cpu_registers, Timer, REGISTRY,
};
use crate::snapshots::{ConsoleSnapshot, MemoryDump};

/// Largest memory read the API will serve in one request.
const MAX_READ_LENGTH: usize = 0x1_0000;

#[derive(Debug, Deserialize)]
pub struct MemoryRead {
    pub address: u16,
    pub length: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ProgramLoad {
    /// Defaults to the console's configured load address.
    pub address: Option<u16>,
    pub data: Vec<u8>,
    /// Start the loop right after loading.
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Serialize)]
pub struct StepResult {
    pub address: u16,
    pub opcode: u8,
    pub mnemonic: String,
    pub console: ConsoleSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StopResult {
    pub reason: StopReason,
    pub console: ConsoleSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

pub type SharedConsole = Arc<Mutex<Console>>;

/// Consoles by id. Each console has its own lock; the map lock is only held
/// long enough to insert, remove or clone a handle.
pub type ConsoleMap = Arc<Mutex<HashMap<String, SharedConsole>>>;

type ApiReply = warp::reply::WithStatus<warp::reply::Json>;

fn respond<T: Serialize>(status: StatusCode, body: &ApiResponse<T>) -> ApiReply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn ok<T: Serialize>(data: T) -> ApiReply {
    respond(StatusCode::OK, &ApiResponse::success(data))
}

fn fail(status: StatusCode, message: String) -> ApiReply {
    respond::<()>(status, &ApiResponse::error(message))
}

fn not_found(id: &str) -> ApiReply {
    fail(StatusCode::NOT_FOUND, format!("console {} not found", id))
}

fn engine_failure(e: EngineError) -> ApiReply {
    let status = match &e {
        EngineError::NotIdle(_) | EngineError::NotRunning => StatusCode::CONFLICT,
        EngineError::Load(_) => StatusCode::BAD_REQUEST,
        EngineError::Fault(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::WorkerPanicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e.to_string())
}

fn finish(method: &str, endpoint: &str, timer: Timer, reply: ApiReply) -> Result<warp::reply::Response, Rejection> {
    let response = reply.into_response();
    record_api_request(method, endpoint, response.status().as_u16(), timer.elapsed());
    Ok(response)
}

/// Publish register metrics for an idle or stopped console.
fn publish(console: &Console) {
    if let Ok(engine) = console.engine() {
        update_cpu_registers(console.id(), engine.cpu());
    }
}

pub fn new_console_map() -> ConsoleMap {
    Arc::new(Mutex::new(HashMap::new()))
}

pub fn routes(consoles: ConsoleMap) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST", "DELETE"]);

    // An empty body means the default config.
    let create_console = warp::path("console")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::body::bytes())
        .and(with_consoles(consoles.clone()))
        .and_then(create_console_handler);

    let list_consoles = warp::path("consoles")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_consoles(consoles.clone()))
        .and_then(list_consoles_handler);

    let get_console = warp::path!("console" / String)
        .and(warp::get())
        .and(with_consoles(consoles.clone()))
        .and_then(get_console_handler);

    let delete_console = warp::path!("console" / String)
        .and(warp::delete())
        .and(with_consoles(consoles.clone()))
        .and_then(delete_console_handler);

    let load_program = warp::path!("console" / String / "program")
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json())
        .and(with_consoles(consoles.clone()))
        .and_then(load_program_handler);

    let step_console = warp::path!("console" / String / "step")
        .and(warp::post())
        .and(with_consoles(consoles.clone()))
        .and_then(step_handler);

    let start_console = warp::path!("console" / String / "start")
        .and(warp::post())
        .and(with_consoles(consoles.clone()))
        .and_then(start_handler);

    let interrupt_console = warp::path!("console" / String / "interrupt")
        .and(warp::post())
        .and(with_consoles(consoles.clone()))
        .and_then(interrupt_handler);

    let rearm_console = warp::path!("console" / String / "rearm")
        .and(warp::post())
        .and(with_consoles(consoles.clone()))
        .and_then(rearm_handler);

    let read_memory = warp::path!("console" / String / "memory")
        .and(warp::get())
        .and(warp::query::<MemoryRead>())
        .and(with_consoles(consoles))
        .and_then(read_memory_handler);

    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(metrics_handler);

    create_console
        .or(list_consoles)
        .or(get_console)
        .or(delete_console)
        .or(load_program)
        .or(step_console)
        .or(start_console)
        .or(interrupt_console)
        .or(rearm_console)
        .or(read_memory)
        .or(metrics)
        .with(cors)
}

pub async fn run_server(addr: SocketAddr) {
    init_metrics();

    let consoles = new_console_map();

    info!("console server listening on http://{}", addr);
    debug!("POST   /console               create a console");
    debug!("GET    /consoles              list consoles");
    debug!("GET    /console/:id           console snapshot");
    debug!("DELETE /console/:id           stop and remove a console");
    debug!("POST   /console/:id/program   load an image");
    debug!("POST   /console/:id/step      execute one instruction");
    debug!("POST   /console/:id/start     start the loop");
    debug!("POST   /console/:id/interrupt stop the loop");
    debug!("POST   /console/:id/rearm     return to idle");
    debug!("GET    /console/:id/memory    read memory");
    debug!("GET    /metrics               prometheus metrics");

    warp::serve(routes(consoles)).run(addr).await;
}

fn with_consoles(consoles: ConsoleMap) -> impl Filter<Extract = (ConsoleMap,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || consoles.clone())
}

/// Pick up a worker that stopped on its own so its state is visible.
async fn settle(console: &mut Console) {
    if let Some(Err(e)) = console.reap().await {
        warn!("console {} stopped with error: {}", console.id(), e);
    }
}

/// Clone one console's handle out of the map. The map lock is released on
/// return, so a slow join on one console never blocks the others.
async fn find(consoles: &ConsoleMap, id: &str) -> Option<SharedConsole> {
    consoles.lock().await.get(id).cloned()
}

async fn create_console_handler(body: Bytes, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let config = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(ConsoleConfig::default())
    } else {
        std::str::from_utf8(&body)
            .map_err(|e| ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
            .and_then(ConsoleConfig::from_json)
    };

    let response = match config.and_then(Console::new) {
        Ok(console) => {
            let snapshot = console.snapshot(None);
            publish(&console);
            let mut consoles = consoles.lock().await;
            consoles.insert(console.id().to_string(), Arc::new(Mutex::new(console)));
            set_active_consoles(consoles.len());
            info!("created console {}", snapshot.id);
            respond(StatusCode::CREATED, &ApiResponse::success(snapshot))
        }
        Err(e) => fail(StatusCode::BAD_REQUEST, e.to_string()),
    };

    finish("POST", "/console", timer, response)
}

async fn list_consoles_handler(consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();
    let handles: Vec<SharedConsole> = consoles.lock().await.values().cloned().collect();

    let mut list = Vec::with_capacity(handles.len());
    for handle in handles {
        let mut console = handle.lock().await;
        settle(&mut console).await;
        list.push(console.snapshot(None));
    }
    list.sort_by(|a, b| a.id.cmp(&b.id));

    finish("GET", "/consoles", timer, ok(list))
}

async fn get_console_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            publish(&console);
            ok(console.snapshot(None))
        }
        None => not_found(&id),
    };

    finish("GET", "/console/:id", timer, response)
}

async fn delete_console_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let removed = {
        let mut consoles = consoles.lock().await;
        let removed = consoles.remove(&id);
        set_active_consoles(consoles.len());
        removed
    };

    let response = match removed {
        Some(handle) => {
            let mut console = handle.lock().await;
            if console.is_running() {
                if let Err(e) = console.stop().await {
                    warn!("console {} did not stop cleanly: {}", id, e);
                }
            }
            remove_console(&id);
            info!("deleted console {}", id);
            ok(format!("console {} deleted", id))
        }
        None => not_found(&id),
    };

    finish("DELETE", "/console/:id", timer, response)
}

async fn load_program_handler(id: String, request: ProgramLoad, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            let address = request.address.unwrap_or(console.config().load_address);
            let loaded = console.load(&request.data, address).and_then(|()| {
                record_program_load(&id);
                if request.start {
                    console.start()?;
                }
                Ok(())
            });
            match loaded {
                Ok(()) => {
                    publish(&console);
                    ok(console.snapshot(None))
                }
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("POST", "/console/:id/program", timer, response)
}

async fn step_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            match console.step() {
                Ok(step) => {
                    publish(&console);
                    ok(StepResult {
                        address: step.instruction.address,
                        opcode: step.instruction.opcode,
                        mnemonic: step.instruction.mnemonic.to_string(),
                        console: console.snapshot(None),
                    })
                }
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("POST", "/console/:id/step", timer, response)
}

async fn start_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            match console.start() {
                Ok(()) => ok(console.snapshot(None)),
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("POST", "/console/:id/start", timer, response)
}

async fn interrupt_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            match console.stop().await {
                Ok(reason) => {
                    publish(&console);
                    ok(StopResult {
                        reason,
                        console: console.snapshot(None),
                    })
                }
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("POST", "/console/:id/interrupt", timer, response)
}

async fn rearm_handler(id: String, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            match console.rearm() {
                Ok(()) => ok(console.snapshot(None)),
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("POST", "/console/:id/rearm", timer, response)
}

async fn read_memory_handler(id: String, query: MemoryRead, consoles: ConsoleMap) -> Result<warp::reply::Response, Rejection> {
    let timer = Timer::new();

    let length = query.length.unwrap_or(1).min(MAX_READ_LENGTH);
    let response = match find(&consoles, &id).await {
        Some(handle) => {
            let mut console = handle.lock().await;
            settle(&mut console).await;
            match console.read_memory(query.address, length) {
                Ok(data) => ok(MemoryDump {
                    address: query.address,
                    data,
                }),
                Err(e) => engine_failure(e),
            }
        }
        None => not_found(&id),
    };

    finish("GET", "/console/:id/memory", timer, response)
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => {
            record_api_request("GET", "/metrics", 200, timer.elapsed());
            Ok(warp::reply::with_status(
                warp::reply::with_header(metrics_text, "content-type", "text/plain; version=0.0.4"),
                StatusCode::OK,
            ))
        }
        Err(e) => {
            record_api_request("GET", "/metrics", 500, timer.elapsed());
            Ok(warp::reply::with_status(
                warp::reply::with_header(
                    format!("error encoding metrics: {}", e),
                    "content-type",
                    "text/plain",
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn create(consoles: &ConsoleMap, body: &str) -> Value {
        let response = warp::test::request()
            .method("POST")
            .path("/console")
            .body(body.to_string())
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_console() {
        init_metrics();
        let consoles = new_console_map();

        let created = create(&consoles, "").await;
        let id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["memory_size"], 0x0800);
        assert_eq!(created["data"]["cpu"]["pc"], 0x0600);

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/console/{}", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["cpu"]["state"], "idle");

        let response = warp::test::request()
            .method("GET")
            .path("/console/nope")
            .reply(&routes(consoles))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_with_config_body() {
        init_metrics();
        let consoles = new_console_map();
        let created = create(&consoles, r#"{ "memory_size": 4096, "load_address": 512 }"#).await;
        assert_eq!(created["data"]["memory_size"], 4096);
        assert_eq!(created["data"]["cpu"]["pc"], 512);

        let response = warp::test::request()
            .method("POST")
            .path("/console")
            .body(r#"{ "memory_size": 0 }"#)
            .reply(&routes(consoles))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_load_step_and_read_memory() {
        init_metrics();
        let consoles = new_console_map();
        let created = create(&consoles, "").await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        // LDA #$2A; STA $0200; BRK
        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/program", id))
            .json(&serde_json::json!({ "data": [0xA9, 0x2A, 0x8D, 0x00, 0x02, 0x00] }))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        for expected in ["LDA", "STA"] {
            let response = warp::test::request()
                .method("POST")
                .path(&format!("/console/{}/step", id))
                .reply(&routes(consoles.clone()))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body["data"]["mnemonic"], expected);
        }

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/console/{}/memory?address=512&length=2", id))
            .reply(&routes(consoles.clone()))
            .await;
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["data"], serde_json::json!([0x2A, 0x00]));

        let response = warp::test::request()
            .method("DELETE")
            .path(&format!("/console/{}", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(consoles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_interrupt() {
        init_metrics();
        let consoles = new_console_map();
        let created = create(&consoles, "").await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        // JMP $0600
        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/program", id))
            .json(&serde_json::json!({ "data": [0x4C, 0x00, 0x06], "start": true }))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["cpu"]["state"], "running");

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/step", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/interrupt", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["reason"], "interrupted");
        assert_eq!(body["data"]["console"]["cpu"]["state"], "stopped");

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/rearm", id))
            .reply(&routes(consoles))
            .await;
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["cpu"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_interrupt_on_idle_is_rejected_without_side_effects() {
        init_metrics();
        let consoles = new_console_map();
        let created = create(&consoles, "").await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        // INX; BRK
        warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/program", id))
            .json(&serde_json::json!({ "data": [0xE8, 0x00] }))
            .reply(&routes(consoles.clone()))
            .await;

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/interrupt", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/console/{}/start", id))
            .reply(&routes(consoles.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let handle = find(&consoles, &id).await.unwrap();
        let reason = handle.lock().await.wait().await.unwrap();
        assert_eq!(reason, StopReason::Break);

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/console/{}", id))
            .reply(&routes(consoles))
            .await;
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["data"]["last_stop"], "break");
        assert_eq!(body["data"]["cpu"]["x"], 1);
    }

    #[tokio::test]
    async fn test_busy_console_does_not_block_others() {
        init_metrics();
        let consoles = new_console_map();
        let first = create(&consoles, "").await;
        let second = create(&consoles, "").await;
        let first_id = first["data"]["id"].as_str().unwrap().to_string();
        let second_id = second["data"]["id"].as_str().unwrap().to_string();

        let busy = find(&consoles, &first_id).await.unwrap();
        let _held = busy.lock().await;

        let filter = routes(consoles.clone());
        let request = warp::test::request()
            .method("GET")
            .path(&format!("/console/{}", second_id))
            .reply(&filter);
        let response = tokio::time::timeout(std::time::Duration::from_secs(1), request)
            .await
            .expect("second console blocked by the first");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        init_metrics();
        let response = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&routes(new_console_map()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
