//! The normalized creation event and its source tag.

use serde::{Deserialize, Serialize};

/// Fallback name when the decoded metadata carries none.
pub const UNKNOWN_NAME: &str = "Unknown Token";
/// Fallback symbol when the decoded metadata carries none.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";
/// Fallback creator when the decoded record carries none.
pub const UNKNOWN_CREATOR: &str = "Unknown";

/// Identifies which monitor produced a [`CreationEvent`] in the union stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceTag {
    /// Pump.fun bonding-curve launches (direct event logs).
    PumpFun,
    /// Raydium Launchlab launches (instruction derived).
    RaydiumLaunchlab,
}

impl SourceTag {
    /// Every known source, in a stable order.
    pub const ALL: [SourceTag; 2] = [SourceTag::PumpFun, SourceTag::RaydiumLaunchlab];

    /// Wire tag, e.g. `"PUMPFUN"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PumpFun => "PUMPFUN",
            Self::RaydiumLaunchlab => "RAYDIUM_LAUNCHLAB",
        }
    }

    /// Human label used in log lines and status messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PumpFun => "PumpFun",
            Self::RaydiumLaunchlab => "Raydium Launchlab",
        }
    }

    /// Parse a wire tag or a short alias (`pumpfun`, `launchlab`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "pumpfun" | "pump" => Some(Self::PumpFun),
            "raydiumlaunchlab" | "launchlab" => Some(Self::RaydiumLaunchlab),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partially-decoded creation data, before defaults are applied.
///
/// Decoders fill in what they found; [`CreationEvent::from_fields`] turns
/// missing or empty values into the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationFields {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub image_uri: Option<String>,
    pub creator: Option<String>,
    pub pool_or_curve_key: Option<String>,
    pub synthetic_metadata: bool,
}

/// A "new token created" occurrence, normalized across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationEvent {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_uri: Option<String>,
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pool_or_curve_key: Option<String>,
    pub created_at_unix_seconds: i64,
    pub source_tag: SourceTag,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tx_signature: Option<String>,
    /// Name and symbol were synthesized from the mint address.
    #[serde(skip)]
    pub synthetic_metadata: bool,
}

impl CreationEvent {
    /// Build an event stamped with the current wall-clock time.
    pub fn from_fields(
        source: SourceTag,
        fields: CreationFields,
        tx_signature: Option<String>,
    ) -> Self {
        Self::from_fields_at(source, fields, tx_signature, chrono::Utc::now().timestamp())
    }

    /// Build an event with an explicit creation timestamp.
    pub fn from_fields_at(
        source: SourceTag,
        fields: CreationFields,
        tx_signature: Option<String>,
        created_at_unix_seconds: i64,
    ) -> Self {
        Self {
            mint: fields.mint,
            name: non_empty(fields.name).unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            symbol: non_empty(fields.symbol).unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
            description: non_empty(fields.description),
            image_uri: non_empty(fields.image_uri),
            creator: non_empty(fields.creator).unwrap_or_else(|| UNKNOWN_CREATOR.to_string()),
            pool_or_curve_key: non_empty(fields.pool_or_curve_key),
            created_at_unix_seconds,
            source_tag: source,
            tx_signature: non_empty(tx_signature),
            synthetic_metadata: fields.synthetic_metadata,
        }
    }

    /// Returns a copy tagged with `source`.
    pub fn tagged(mut self, source: SourceTag) -> Self {
        self.source_tag = source;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
