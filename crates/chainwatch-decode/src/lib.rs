//! chainwatch-decode: turning raw Solana program output into creation events.
//!
//! # Strategies
//!
//! - [`EventLogDecoder`]: decodes `Program data: <base64>` lines against an
//!   Anchor event schema (Pump.fun).
//! - [`InstructionExtractor`]: pattern-matches the log batch, then fetches the
//!   transaction and decodes the creating instruction (Raydium Launchlab).
//!
//! Both produce a [`DecodeOutcome`]. The Borsh/IDL machinery lives in
//! [`coder`] and [`idl`].

pub mod coder;
pub mod error;
pub mod event_log;
pub mod idl;
pub mod instruction;
pub mod schema;

pub use coder::{
    event_discriminator, instruction_discriminator, BorshCoder, DecodedRecord, Discriminator,
    IdlValue,
};
pub use error::{DecodeError, SchemaError};
pub use event_log::{EventLogDecoder, EventLogSettings, PROGRAM_DATA_MARKER, PUMPFUN_PROGRAM_ID};
pub use idl::{Idl, LAUNCHLAB_IDL, PUMP_IDL};
pub use instruction::{
    InstructionExtractor, InstructionLayout, MetadataTier, PositionalTier, SchemaTier,
    TierOutcome, TokenMetadata, LAUNCHLAB_PROGRAM_ID,
};
pub use schema::{DecodeOutcome, EventSchema, InstructionSchema};
