//! Anchor IDL model (legacy JSON layout).
//!
//! Only the parts needed to decode events and instruction arguments are
//! modelled; everything else in the document is ignored.

use serde::Deserialize;

/// Embedded Pump.fun IDL (events: `CreateEvent`, `TradeEvent`, ...).
pub const PUMP_IDL: &str = include_str!("../idl/pump.json");

/// Embedded Raydium Launchlab IDL (`initialize(MintParams)`).
pub const LAUNCHLAB_IDL: &str = include_str!("../idl/launchlab.json");

#[derive(Debug, Clone, Deserialize)]
pub struct Idl {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructions: Vec<IdlInstruction>,
    #[serde(default)]
    pub events: Vec<IdlEvent>,
    #[serde(default)]
    pub types: Vec<IdlTypeDef>,
}

impl Idl {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlInstruction {
    pub name: String,
    #[serde(default)]
    pub args: Vec<IdlField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlEvent {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<IdlField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdlTypeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: IdlTypeDefBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IdlTypeDefBody {
    Struct { fields: Vec<IdlField> },
    Enum { variants: Vec<IdlEnumVariant> },
}

/// Only fieldless variants are supported.
#[derive(Debug, Clone, Deserialize)]
pub struct IdlEnumVariant {
    pub name: String,
}

/// A field type reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdlType {
    Primitive(String),
    Defined { defined: String },
    Option { option: Box<IdlType> },
    Vec { vec: Box<IdlType> },
    Array { array: (Box<IdlType>, usize) },
}

/// Primitive type names understood by the coder.
pub const PRIMITIVES: &[&str] = &[
    "bool", "u8", "i8", "u16", "i16", "u32", "i32", "u64", "i64", "u128", "i128", "string",
    "publicKey", "pubkey", "bytes",
];
