//! Direct event-log strategy.
//!
//! Programs built with Anchor's `emit!` write events as
//! `Program data: <base64>` log lines. Each such line is decoded against
//! the event schema; only the configured creation event produces output.

use std::sync::Arc;

use base64::Engine as _;

use chainwatch_core::{CreationEvent, CreationFields, LogBatch, SourceTag};

use crate::coder::DecodedRecord;
use crate::error::DecodeError;
use crate::schema::{DecodeOutcome, EventSchema};

/// Marker preceding base64 event payloads in program logs.
pub const PROGRAM_DATA_MARKER: &str = "Program data: ";

/// Pump.fun bonding-curve program.
pub const PUMPFUN_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Which event counts as a creation and how to describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogSettings {
    pub creation_event: String,
    pub description: String,
}

impl Default for EventLogSettings {
    fn default() -> Self {
        Self {
            creation_event: "CreateEvent".into(),
            description: "New token created on PumpFun".into(),
        }
    }
}

/// Decodes creation events straight out of log lines.
pub struct EventLogDecoder {
    source: SourceTag,
    schema: Option<Arc<dyn EventSchema>>,
    settings: EventLogSettings,
}

impl EventLogDecoder {
    /// `schema = None` disables decoding: every line is skipped.
    pub fn new(
        source: SourceTag,
        schema: Option<Arc<dyn EventSchema>>,
        settings: EventLogSettings,
    ) -> Self {
        Self {
            source,
            schema,
            settings,
        }
    }

    pub fn decoding_enabled(&self) -> bool {
        self.schema.is_some()
    }

    /// Decode every line of `batch`, in order, keeping the matches.
    pub fn decode_batch(&self, batch: &LogBatch) -> Vec<CreationEvent> {
        let mut events = Vec::new();
        for line in &batch.logs {
            match self.decode_line(line, Some(&batch.signature)) {
                DecodeOutcome::Matched(event) => events.push(event),
                DecodeOutcome::NoMatch => {}
                DecodeOutcome::Failed(e) => {
                    tracing::debug!(
                        source = %self.source,
                        signature = %batch.signature,
                        error = %e,
                        "skipping undecodable program data"
                    );
                }
            }
        }
        events
    }

    /// Decode one log line.
    pub fn decode_line(&self, line: &str, signature: Option<&str>) -> DecodeOutcome {
        let Some(payload) = program_data_payload(line) else {
            return DecodeOutcome::NoMatch;
        };
        let Some(schema) = &self.schema else {
            return DecodeOutcome::NoMatch;
        };

        let data = match base64::engine::general_purpose::STANDARD.decode(payload) {
            Ok(data) => data,
            Err(e) => return DecodeOutcome::Failed(DecodeError::Base64(e.to_string())),
        };
        let record = match schema.decode_event(&data) {
            Ok(Some(record)) if record.name == self.settings.creation_event => record,
            Ok(_) => return DecodeOutcome::NoMatch,
            Err(e) => return DecodeOutcome::Failed(e),
        };

        match self.build_event(&record, signature) {
            Ok(event) => DecodeOutcome::Matched(event),
            Err(e) => DecodeOutcome::Failed(e),
        }
    }

    fn build_event(
        &self,
        record: &DecodedRecord,
        signature: Option<&str>,
    ) -> Result<CreationEvent, DecodeError> {
        let mint = first_text(record, &["mint"])
            .ok_or_else(|| DecodeError::MissingField("mint".into()))?;

        let fields = CreationFields {
            mint,
            name: first_text(record, &["name"]),
            symbol: first_text(record, &["symbol"]),
            description: Some(self.settings.description.clone()),
            image_uri: first_text(record, &["uri"]),
            creator: first_text(record, &["user", "creator"]),
            pool_or_curve_key: first_text(record, &["bondingCurve", "bonding_curve"]),
            synthetic_metadata: false,
        };
        Ok(CreationEvent::from_fields(
            self.source,
            fields,
            signature.map(str::to_string),
        ))
    }
}

fn first_text(record: &DecodedRecord, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| record.str_field(n))
        .map(str::to_string)
}

/// The base64 token following [`PROGRAM_DATA_MARKER`], if the line has one.
pub fn program_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(PROGRAM_DATA_MARKER)?
        .split_whitespace()
        .next()
}
