//! chainwatch CLI: stream launchpad token creations from the terminal.
//!
//! # Commands
//! ```text
//! chainwatch watch       [--source all|pumpfun|launchlab] [--json] [--rpc <url>] [--ws <url>] [--config <path>]
//! chainwatch decode-log  <line> [--idl <path>]
//! chainwatch info
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};

use chainwatch_core::{CreationEvent, SourceTag};
use chainwatch_decode::{
    event_log::program_data_payload, BorshCoder, DecodeOutcome, EventLogDecoder,
    EventLogSettings, LAUNCHLAB_IDL, PUMP_IDL,
};
use chainwatch_monitor::{MonitorRegistry, StatusSnapshot, WatchConfig};
use chainwatch_observability::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "chainwatch",
    about = "Live token-creation monitor for Solana launchpads",
    long_about = "
chainwatch: subscribe to Pump.fun and Raydium Launchlab program logs and
print every new token as it is created.

ENVIRONMENT VARIABLES:
  CHAINWATCH_RPC_ENDPOINT   HTTP RPC endpoint (falls back to RPC_ENDPOINT)
  CHAINWATCH_WS_ENDPOINT    WebSocket endpoint (derived from the RPC endpoint if unset)
  CHAINWATCH_LOG            Log filter, e.g. info,chainwatch-rpc=debug
  CHAINWATCH_LOG_JSON       Emit JSON logs when set to 1/true
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream creation events until Ctrl-C
    Watch {
        /// Source to watch: all, pumpfun or launchlab
        #[arg(long, default_value = "all")]
        source: String,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
        /// HTTP RPC endpoint (overrides config and environment)
        #[arg(long)]
        rpc: Option<String>,
        /// WebSocket endpoint (overrides config and environment)
        #[arg(long)]
        ws: Option<String>,
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Decode one `Program data:` log line (or bare base64 payload)
    #[command(name = "decode-log")]
    DecodeLog {
        /// The log line or payload
        line: String,
        /// IDL to decode against (default: embedded Pump.fun IDL)
        #[arg(long)]
        idl: Option<PathBuf>,
    },

    /// Show sources, programs and endpoints
    Info {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log = LogConfig::from_env();
    if cli.verbose {
        log.level = "debug".into();
    }
    init_tracing(&log)?;

    match cli.command {
        Commands::Watch { source, json, rpc, ws, config } => {
            cmd_watch(&source, json, rpc, ws, config.as_deref()).await
        }
        Commands::DecodeLog { line, idl } => cmd_decode_log(&line, idl.as_deref()),
        Commands::Info { config } => cmd_info(config.as_deref()),
    }
}

// ─── watch ────────────────────────────────────────────────────────────────────

fn parse_sources(source: &str) -> Result<(String, Vec<SourceTag>)> {
    if source.eq_ignore_ascii_case("all") {
        return Ok(("Trenches".to_string(), SourceTag::ALL.to_vec()));
    }
    let tag = SourceTag::parse(source)
        .ok_or_else(|| anyhow!("unknown source '{source}' (expected all, pumpfun or launchlab)"))?;
    Ok((tag.label().to_string(), vec![tag]))
}

async fn cmd_watch(
    source: &str,
    json: bool,
    rpc: Option<String>,
    ws: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let (label, sources) = parse_sources(source)?;

    let mut config = WatchConfig::load(config_path).context("loading configuration")?;
    if let Some(rpc) = rpc {
        config.rpc_endpoint = rpc;
    }
    if let Some(ws) = ws {
        config.ws_endpoint = Some(ws);
    }

    let registry = MonitorRegistry::new(config)?;
    let multiplexer = registry.multiplexer(label, &sources).await?;
    let mut subscription = multiplexer.subscribe().await?;

    let status = multiplexer.status_snapshot();
    eprintln!("{}", status.message());
    for monitor in &status.monitors {
        if !monitor.decoding_enabled {
            eprintln!("  warning: {} schema unavailable, decoding limited", monitor.source_tag.label());
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => match event {
                Some(event) => print_event(&event, json)?,
                None => break,
            },
        }
    }

    subscription.close().await;
    print_status(&multiplexer.status_snapshot(), json)?;
    Ok(())
}

fn print_event(event: &CreationEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let marker = if event.synthetic_metadata { " (synthetic)" } else { "" };
    println!(
        "[{}] {:<10} {}{}  mint={} creator={}",
        event.source_tag.label(),
        event.symbol,
        event.name,
        marker,
        event.mint,
        event.creator,
    );
    if let Some(sig) = &event.tx_signature {
        println!("    tx={sig}");
    }
    Ok(())
}

fn print_status(status: &StatusSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }
    println!("{}", status.message());
    for monitor in &status.monitors {
        println!(
            "  {:<18} batches={:<6} emitted={:<5} suppressed={:<4} failures={}",
            monitor.source_tag.label(),
            monitor.stats.batches_seen,
            monitor.stats.events_emitted,
            monitor.stats.events_suppressed,
            monitor.stats.decode_failures,
        );
    }
    Ok(())
}

// ─── decode-log ───────────────────────────────────────────────────────────────

fn cmd_decode_log(line: &str, idl: Option<&Path>) -> Result<()> {
    let coder = match idl {
        Some(path) => BorshCoder::from_file(path)
            .with_context(|| format!("loading IDL {}", path.display()))?,
        None => BorshCoder::from_json(PUMP_IDL)?,
    };

    let payload = program_data_payload(line).unwrap_or_else(|| line.trim());
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("payload is not valid base64")?;

    let Some(record) = coder.decode_event(&data)? else {
        bail!("payload matches no event in the {} IDL", coder.program_name());
    };
    println!("{}", serde_json::to_string_pretty(&record.to_json())?);

    if idl.is_none() {
        let decoder = EventLogDecoder::new(
            SourceTag::PumpFun,
            Some(std::sync::Arc::new(coder)),
            EventLogSettings::default(),
        );
        let line = format!("{}{payload}", chainwatch_decode::PROGRAM_DATA_MARKER);
        if let DecodeOutcome::Matched(event) = decoder.decode_line(&line, None) {
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
    }
    Ok(())
}

// ─── info ─────────────────────────────────────────────────────────────────────

fn cmd_info(config_path: Option<&Path>) -> Result<()> {
    let config = WatchConfig::load(config_path)?;
    let pump = BorshCoder::from_json(PUMP_IDL)?;
    let launchlab = BorshCoder::from_json(LAUNCHLAB_IDL)?;

    println!("chainwatch v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Endpoints:");
    println!("  rpc:        {}", config.rpc_endpoint);
    println!("  websocket:  {}", config.websocket_endpoint()?);
    println!("  commitment: {}", config.commitment.as_str());
    println!();
    println!("Sources:");
    println!(
        "  {:<18} {}  direct event logs ({})",
        SourceTag::PumpFun.label(),
        config.pumpfun.program_id,
        pump.event_names().join(", ")
    );
    println!(
        "  {:<18} {}  instruction derived ({} via {})",
        SourceTag::RaydiumLaunchlab.label(),
        config.launchlab.program_id,
        config.launchlab.instruction_name,
        launchlab.program_name()
    );
    Ok(())
}
