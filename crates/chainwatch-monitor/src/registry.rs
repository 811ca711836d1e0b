//! `MonitorRegistry`: builds each monitor once and hands out shared handles.
//!
//! The chain client is created lazily on first use and shared by every
//! monitor. A schema that fails to load never fails monitor construction:
//! the monitor is built with schema decoding disabled instead.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use chainwatch_core::{ChainClient, ChainError, SourceTag};
use chainwatch_decode::{
    BorshCoder, EventLogDecoder, EventSchema, InstructionExtractor, InstructionSchema,
    LAUNCHLAB_IDL, PUMP_IDL,
};
use chainwatch_rpc::{HttpClientConfig, SolanaClientConfig, SolanaRpcClient, WsClientConfig};

use crate::config::WatchConfig;
use crate::error::{ConfigError, MonitorError};
use crate::monitor::{ChainLogMonitor, MonitorSettings};
use crate::multiplexer::SubscriptionMultiplexer;

/// Builds the shared chain client from configuration.
pub type ClientFactory =
    Box<dyn Fn(&WatchConfig) -> Result<Arc<dyn ChainClient>, ChainError> + Send + Sync>;

/// Process-wide cache of monitors and their chain connection.
pub struct MonitorRegistry {
    config: WatchConfig,
    factory: ClientFactory,
    client: OnceCell<Arc<dyn ChainClient>>,
    monitors: Mutex<HashMap<SourceTag, Arc<ChainLogMonitor>>>,
}

impl MonitorRegistry {
    /// Registry backed by a [`SolanaRpcClient`] built from `config`.
    pub fn new(config: WatchConfig) -> Result<Self, ConfigError> {
        Self::with_factory(config, Box::new(solana_client))
    }

    /// Registry with a custom client factory.
    pub fn with_factory(config: WatchConfig, factory: ClientFactory) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            client: OnceCell::new(),
            monitors: Mutex::new(HashMap::new()),
        })
    }

    /// Registry over an already-built client.
    pub fn with_client(
        config: WatchConfig,
        client: Arc<dyn ChainClient>,
    ) -> Result<Self, ConfigError> {
        let factory = move |_: &WatchConfig| -> Result<Arc<dyn ChainClient>, ChainError> {
            Ok(Arc::clone(&client))
        };
        Self::with_factory(config, Box::new(factory))
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// The shared chain client, created on first call.
    pub async fn client(&self) -> Result<Arc<dyn ChainClient>, MonitorError> {
        self.client
            .get_or_try_init(|| async {
                let client = (self.factory)(&self.config).map_err(MonitorError::Client)?;
                info!(endpoint = client.endpoint(), "chain client created");
                Ok::<_, MonitorError>(client)
            })
            .await
            .cloned()
    }

    /// The cached monitor for `source`, built on first request.
    pub async fn monitor(&self, source: SourceTag) -> Result<Arc<ChainLogMonitor>, MonitorError> {
        let mut monitors = self.monitors.lock().await;
        if let Some(monitor) = monitors.get(&source) {
            return Ok(Arc::clone(monitor));
        }

        let client = self.client().await?;
        let monitor = Arc::new(self.build(source, client)?);
        info!(
            source = %source,
            program = monitor.program_id(),
            decoding = monitor.strategy().decoding_enabled(),
            "monitor created"
        );
        monitors.insert(source, Arc::clone(&monitor));
        Ok(monitor)
    }

    /// A multiplexer over the cached monitors for `sources`.
    pub async fn multiplexer(
        &self,
        label: impl Into<String>,
        sources: &[SourceTag],
    ) -> Result<Arc<SubscriptionMultiplexer>, MonitorError> {
        let mut monitors = Vec::with_capacity(sources.len());
        for source in sources {
            monitors.push(self.monitor(*source).await?);
        }
        Ok(Arc::new(SubscriptionMultiplexer::new(
            label,
            monitors,
            self.config.channel_capacity,
        )))
    }

    fn build(
        &self,
        source: SourceTag,
        client: Arc<dyn ChainClient>,
    ) -> Result<ChainLogMonitor, MonitorError> {
        let settings = MonitorSettings {
            commitment: self.config.commitment,
            channel_capacity: self.config.channel_capacity,
        };
        let monitor = match source {
            SourceTag::PumpFun => {
                let pump = &self.config.pumpfun;
                let schema = load_schema(source, pump.idl_path.as_deref(), PUMP_IDL)
                    .map(|coder| coder as Arc<dyn EventSchema>);
                let decoder = EventLogDecoder::new(source, schema, pump.settings());
                ChainLogMonitor::direct_event(source, &pump.program_id, client, decoder, settings)
            }
            SourceTag::RaydiumLaunchlab => {
                let launchlab = &self.config.launchlab;
                let layout = launchlab.layout()?;
                let schema = load_schema(source, launchlab.idl_path.as_deref(), LAUNCHLAB_IDL)
                    .map(|coder| coder as Arc<dyn InstructionSchema>);
                let extractor = InstructionExtractor::new(source, layout, schema);
                ChainLogMonitor::instruction(source, client, extractor, settings)
            }
        };
        Ok(monitor)
    }
}

/// Load the configured or embedded IDL; `None` disables schema decoding.
fn load_schema(source: SourceTag, path: Option<&Path>, embedded: &str) -> Option<Arc<BorshCoder>> {
    let result = match path {
        Some(path) => BorshCoder::from_file(path),
        None => BorshCoder::from_json(embedded),
    };
    match result {
        Ok(coder) => Some(Arc::new(coder)),
        Err(e) => {
            warn!(
                source = %source,
                error = %e,
                "schema failed to load, decoding disabled"
            );
            None
        }
    }
}

fn solana_client(config: &WatchConfig) -> Result<Arc<dyn ChainClient>, ChainError> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let client_config = SolanaClientConfig {
        http: HttpClientConfig {
            request_timeout: timeout,
            ..Default::default()
        },
        ws: WsClientConfig {
            request_timeout: timeout,
            ..Default::default()
        },
    };
    let client = SolanaRpcClient::connect(
        &config.rpc_endpoint,
        config.ws_endpoint.as_deref(),
        client_config,
    )?;
    Ok(Arc::new(client))
}
