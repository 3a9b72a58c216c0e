use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::ADDRESS_SPACE;
use crate::registers::STACK_RESET;

/// Default RAM size: two kilobytes, `0x0000..=0x07FF`.
pub const DEFAULT_MEMORY_SIZE: usize = 0x0800;

/// Where images are loaded, and where PC starts, unless told otherwise.
pub const DEFAULT_LOAD_ADDRESS: u16 = 0x0600;

/// Settings for constructing one console. Every field has a default, so a
/// JSON file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub memory_size: usize,
    pub load_address: u16,
    pub stack_reset: u8,
    /// Stop each run after this many instructions.
    pub instruction_limit: Option<u64>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            memory_size: DEFAULT_MEMORY_SIZE,
            load_address: DEFAULT_LOAD_ADDRESS,
            stack_reset: STACK_RESET,
            instruction_limit: None,
        }
    }
}

impl ConsoleConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        debug!("loaded console config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ConsoleConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 || self.memory_size > ADDRESS_SPACE {
            return Err(ConfigError::MemorySize(self.memory_size));
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API for creating and driving consoles
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: std::net::IpAddr,

        /// Port to listen on
        #[arg(long, default_value_t = 3030)]
        port: u16,
    },

    /// Load a raw binary image and run it until BRK or the instruction limit
    Run {
        /// Raw machine code, no header
        image: PathBuf,

        #[command(flatten)]
        console: ConsoleArgs,

        /// Print the final state as JSON instead of a register summary
        #[arg(long)]
        json: bool,

        /// Include this many bytes of memory from the load address in the JSON dump
        #[arg(long, value_parser=maybe_hex::<u16>)]
        dump: Option<u16>,

        /// Include the whole of memory in the JSON dump
        #[arg(long, conflicts_with = "dump")]
        full_memory: bool,
    },
}

/// Console settings accepted on the command line. Flags override values read
/// from `--config`, which override the defaults.
#[derive(Args, Debug, Default, Clone)]
pub struct ConsoleArgs {
    /// JSON console config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// RAM size in bytes (hex ok with '0x')
    #[arg(long, value_parser=maybe_hex::<usize>)]
    pub memory_size: Option<usize>,

    /// Address at which to load the image and start PC (hex ok with '0x')
    #[arg(long, value_parser=maybe_hex::<u16>)]
    pub load_address: Option<u16>,

    /// Initial stack pointer (hex ok with '0x')
    #[arg(long, value_parser=maybe_hex::<u8>)]
    pub stack_reset: Option<u8>,

    /// Stop after this many instructions
    #[arg(long)]
    pub instruction_limit: Option<u64>,
}

impl ConsoleArgs {
    pub fn resolve(&self) -> Result<ConsoleConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConsoleConfig::from_file(path)?,
            None => ConsoleConfig::default(),
        };
        if let Some(size) = self.memory_size {
            config.memory_size = size;
        }
        if let Some(address) = self.load_address {
            config.load_address = address;
        }
        if let Some(sp) = self.stack_reset {
            config.stack_reset = sp;
        }
        if self.instruction_limit.is_some() {
            config.instruction_limit = self.instruction_limit;
        }
        config.validate()?;
        Ok(config)
    }
}
