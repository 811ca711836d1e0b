//! Watch configuration.
//!
//! Loaded from a JSON file and/or the environment:
//!
//! | variable                  | meaning                          |
//! |---------------------------|----------------------------------|
//! | `CHAINWATCH_RPC_ENDPOINT` | HTTP RPC endpoint                |
//! | `RPC_ENDPOINT`            | fallback for the above           |
//! | `CHAINWATCH_WS_ENDPOINT`  | WebSocket endpoint (else derived) |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chainwatch_core::Commitment;
use chainwatch_decode::{
    instruction_discriminator, EventLogSettings, InstructionLayout, LAUNCHLAB_PROGRAM_ID,
    PUMPFUN_PROGRAM_ID,
};
use chainwatch_rpc::{derive_websocket_endpoint, DEFAULT_RPC_ENDPOINT};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// HTTP JSON-RPC endpoint.
    #[serde(default = "default_rpc_endpoint")]
    pub rpc_endpoint: String,
    /// WebSocket endpoint; derived from `rpc_endpoint` when absent.
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub commitment: Commitment,
    /// Capacity of each monitor's and multiplexer's broadcast channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub pumpfun: EventSourceConfig,
    #[serde(default)]
    pub launchlab: InstructionSourceConfig,
}

fn default_rpc_endpoint() -> String { DEFAULT_RPC_ENDPOINT.to_string() }
fn default_channel_capacity() -> usize { 1_024 }
fn default_request_timeout_ms() -> u64 { 30_000 }

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: default_rpc_endpoint(),
            ws_endpoint: None,
            commitment: Commitment::default(),
            channel_capacity: default_channel_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
            pumpfun: EventSourceConfig::default(),
            launchlab: InstructionSourceConfig::default(),
        }
    }
}

/// Settings for a direct event-log source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSourceConfig {
    #[serde(default = "default_pump_program")]
    pub program_id: String,
    #[serde(default = "default_creation_event")]
    pub creation_event: String,
    #[serde(default = "default_pump_description")]
    pub description: String,
    /// Replace the embedded IDL.
    #[serde(default)]
    pub idl_path: Option<PathBuf>,
}

fn default_pump_program() -> String { PUMPFUN_PROGRAM_ID.to_string() }
fn default_creation_event() -> String { EventLogSettings::default().creation_event }
fn default_pump_description() -> String { EventLogSettings::default().description }

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            program_id: default_pump_program(),
            creation_event: default_creation_event(),
            description: default_pump_description(),
            idl_path: None,
        }
    }
}

impl EventSourceConfig {
    pub fn settings(&self) -> EventLogSettings {
        EventLogSettings {
            creation_event: self.creation_event.clone(),
            description: self.description.clone(),
        }
    }
}

/// Settings for an instruction-derived source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionSourceConfig {
    #[serde(default = "default_launchlab_program")]
    pub program_id: String,
    /// Instruction name as it appears in `Program log: Instruction: <name>`.
    #[serde(default = "default_log_name")]
    pub instruction_name: String,
    /// IDL instruction name; also seeds the default discriminator.
    #[serde(default = "default_schema_instruction")]
    pub schema_instruction: String,
    #[serde(default = "default_metadata_arg")]
    pub metadata_arg: String,
    /// Explicit 8-byte discriminator; defaults to the Anchor sighash.
    #[serde(default)]
    pub discriminator: Option<Vec<u8>>,
    #[serde(default = "default_mint_index")]
    pub mint_index: usize,
    #[serde(default = "default_pool_index")]
    pub pool_index: usize,
    #[serde(default = "default_creator_index")]
    pub creator_index: usize,
    #[serde(default = "default_min_accounts")]
    pub min_accounts: usize,
    #[serde(default = "default_launchlab_description")]
    pub description: String,
    #[serde(default)]
    pub idl_path: Option<PathBuf>,
}

fn default_launchlab_program() -> String { LAUNCHLAB_PROGRAM_ID.to_string() }
fn default_log_name() -> String { InstructionLayout::default().log_name }
fn default_schema_instruction() -> String { InstructionLayout::default().schema_instruction }
fn default_metadata_arg() -> String { InstructionLayout::default().metadata_arg }
fn default_mint_index() -> usize { 1 }
fn default_pool_index() -> usize { 4 }
fn default_creator_index() -> usize { 6 }
fn default_min_accounts() -> usize { 8 }
fn default_launchlab_description() -> String { InstructionLayout::default().description }

impl Default for InstructionSourceConfig {
    fn default() -> Self {
        Self {
            program_id: default_launchlab_program(),
            instruction_name: default_log_name(),
            schema_instruction: default_schema_instruction(),
            metadata_arg: default_metadata_arg(),
            discriminator: None,
            mint_index: default_mint_index(),
            pool_index: default_pool_index(),
            creator_index: default_creator_index(),
            min_accounts: default_min_accounts(),
            description: default_launchlab_description(),
            idl_path: None,
        }
    }
}

impl InstructionSourceConfig {
    /// Build the extractor layout, validating the discriminator and indices.
    pub fn layout(&self) -> Result<InstructionLayout, ConfigError> {
        let discriminator = match &self.discriminator {
            Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice()).map_err(|_| {
                ConfigError::Invalid(format!(
                    "discriminator must be 8 bytes, got {}",
                    bytes.len()
                ))
            })?,
            None => instruction_discriminator(&self.schema_instruction),
        };
        let highest = self.mint_index.max(self.pool_index).max(self.creator_index);
        if highest >= self.min_accounts {
            return Err(ConfigError::Invalid(format!(
                "account index {highest} not covered by min_accounts {}",
                self.min_accounts
            )));
        }
        Ok(InstructionLayout {
            program_id: self.program_id.clone(),
            log_name: self.instruction_name.clone(),
            schema_instruction: self.schema_instruction.clone(),
            metadata_arg: self.metadata_arg.clone(),
            discriminator,
            mint_index: self.mint_index,
            pool_index: self.pool_index,
            creator_index: self.creator_index,
            min_accounts: self.min_accounts,
            description: self.description.clone(),
            ..InstructionLayout::default()
        })
    }
}

impl WatchConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Parse a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// File (if any), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(rpc) = get("CHAINWATCH_RPC_ENDPOINT").or_else(|| get("RPC_ENDPOINT")) {
            self.rpc_endpoint = rpc;
        }
        if let Some(ws) = get("CHAINWATCH_WS_ENDPOINT") {
            self.ws_endpoint = Some(ws);
        }
    }

    /// WebSocket endpoint: configured, or derived from the RPC endpoint.
    pub fn websocket_endpoint(&self) -> Result<String, ConfigError> {
        match &self.ws_endpoint {
            Some(ws) => Ok(ws.clone()),
            None => derive_websocket_endpoint(&self.rpc_endpoint)
                .map_err(|e| ConfigError::Invalid(e.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        self.websocket_endpoint()?;
        self.launchlab.layout()?;
        Ok(())
    }
}
