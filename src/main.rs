use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use log::{error, info};

use enesys6502::config::{Cli, Command, ConsoleArgs};
use enesys6502::error::LoadError;
use enesys6502::metrics::init_metrics;
use enesys6502::server::run_server;
use enesys6502::snapshots::MemoryDump;
use enesys6502::Console;

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { host, port } => run_server(SocketAddr::new(host, port)).await,
        Command::Run { image, console, json, dump, full_memory } => {
            let dump = if full_memory { Dump::Full } else { dump.map_or(Dump::None, Dump::Range) };
            if let Err(e) = run_image(&image, &console, json, dump) {
                error!("{}", e);
                exit(1);
            }
        }
    }
}

/// How much memory goes into the JSON output.
enum Dump {
    None,
    /// This many bytes from the load address.
    Range(u16),
    Full,
}

fn run_image(path: &Path, args: &ConsoleArgs, json: bool, dump: Dump) -> Result<(), Box<dyn std::error::Error>> {
    init_metrics();
    let config = args.resolve()?;
    let image = fs::read(path).map_err(LoadError::Io)?;

    let mut console = Console::new(config)?;
    let base = console.config().load_address;
    console.load(&image, base)?;
    info!("running {} from ${:04X}", path.display(), base);

    let outcome = console.run_blocking();

    if json {
        let memory = console.engine()?.memory();
        let snapshot = console.snapshot(None);
        let snapshot = match dump {
            Dump::None => snapshot,
            Dump::Range(length) => snapshot.with_memory(MemoryDump::capture(memory, base, length as usize)),
            Dump::Full => snapshot.with_memory(MemoryDump::full(memory)),
        };
        println!("{}", snapshot.to_json()?);
    } else {
        let cpu = console.engine()?.cpu();
        println!("A: ${:02X}", cpu.get_register_a());
        println!("X: ${:02X}", cpu.get_register_x());
        println!("Y: ${:02X}", cpu.get_register_y());
        println!("PC: ${:04X}", cpu.get_pc());
        println!("SP: ${:02X}", cpu.get_sp());
        println!("Status: {} (${:02X})", cpu.status(), cpu.get_status());
        println!("Instructions: {}", cpu.instructions_executed());
    }

    let reason = outcome?;
    info!("stopped: {}", reason.label());
    Ok(())
}
