//! Error types for schema loading and decoding.

use thiserror::Error;

use chainwatch_core::ChainError;

/// Errors raised while loading or validating an IDL.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("IDL parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error reading IDL: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown type '{ty}' referenced by {owner}")]
    UnknownType { owner: String, ty: String },

    #[error("type '{ty}' contains itself without an option or vec in between")]
    RecursiveType { ty: String },

    #[error("discriminator collision between {first} and {second}")]
    DuplicateDiscriminator { first: String, second: String },
}

/// Errors raised while decoding one payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("unknown instruction '{0}'")]
    UnknownInstruction(String),

    #[error("borsh decode failed at field '{field}': {reason}")]
    Borsh { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("transaction fetch failed: {0}")]
    Chain(#[from] ChainError),
}
