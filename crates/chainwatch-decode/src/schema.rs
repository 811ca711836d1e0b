//! Schema seams used by the extraction strategies.
//!
//! Both traits are implemented by [`BorshCoder`]; tests substitute counting
//! or failing doubles.

use chainwatch_core::CreationEvent;

use crate::coder::{BorshCoder, DecodedRecord};
use crate::error::DecodeError;

/// Decodes event payloads (discriminator + body).
pub trait EventSchema: Send + Sync {
    /// `Ok(None)` when the payload is not an event of this schema.
    fn decode_event(&self, data: &[u8]) -> Result<Option<DecodedRecord>, DecodeError>;
}

/// Decodes instruction arguments.
pub trait InstructionSchema: Send + Sync {
    fn decode_instruction_args(
        &self,
        instruction: &str,
        args: &[u8],
    ) -> Result<DecodedRecord, DecodeError>;
}

impl EventSchema for BorshCoder {
    fn decode_event(&self, data: &[u8]) -> Result<Option<DecodedRecord>, DecodeError> {
        BorshCoder::decode_event(self, data)
    }
}

impl InstructionSchema for BorshCoder {
    fn decode_instruction_args(
        &self,
        instruction: &str,
        args: &[u8],
    ) -> Result<DecodedRecord, DecodeError> {
        BorshCoder::decode_instruction_args(self, instruction, args)
    }
}

/// Result of applying a decode strategy to one input.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A creation event was recognized and built.
    Matched(CreationEvent),
    /// The input is not a creation; skip silently.
    NoMatch,
    /// The input looked relevant but could not be decoded.
    Failed(DecodeError),
}

impl DecodeOutcome {
    pub fn into_event(self) -> Option<CreationEvent> {
        match self {
            Self::Matched(event) => Some(event),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}
