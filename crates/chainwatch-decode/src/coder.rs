//! Borsh coder driven by an Anchor IDL.
//!
//! Anchor prefixes every event payload with `SHA-256("event:<Name>")[..8]`
//! and every instruction with `SHA-256("global:<snake_name>")[..8]`; the
//! rest is the Borsh encoding of the declared fields, in order. Trailing
//! bytes are ignored so that programs can append fields without breaking
//! older readers.

use std::collections::{BTreeMap, HashMap, HashSet};

use borsh::BorshDeserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, SchemaError};
use crate::idl::{Idl, IdlField, IdlType, IdlTypeDef, IdlTypeDefBody, PRIMITIVES};

/// An 8-byte Anchor discriminator.
pub type Discriminator = [u8; 8];

/// Deepest nesting of defined types, options, vecs and arrays a payload
/// may use.
pub const MAX_DEPTH: usize = 32;

/// `SHA-256("event:<name>")[..8]`
pub fn event_discriminator(name: &str) -> Discriminator {
    sighash("event", name)
}

/// `SHA-256("global:<snake_case(name)>")[..8]`
pub fn instruction_discriminator(name: &str) -> Discriminator {
    sighash("global", &to_snake_case(name))
}

fn sighash(namespace: &str, name: &str) -> Discriminator {
    let hash = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ─── Decoded values ──────────────────────────────────────────────────────────

/// A decoded IDL value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdlValue {
    Bool(bool),
    Unsigned(u128),
    Signed(i128),
    String(String),
    /// Base58-rendered public key.
    PublicKey(String),
    Bytes(Vec<u8>),
    Option(Option<Box<IdlValue>>),
    List(Vec<IdlValue>),
    Struct(BTreeMap<String, IdlValue>),
    Variant(String),
}

impl IdlValue {
    /// String or public key contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::PublicKey(s) | Self::Variant(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => u64::try_from(*v).ok(),
            Self::Signed(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, IdlValue>> {
        match self {
            Self::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// JSON rendering; integers beyond 64 bits become strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Unsigned(v) => match u64::try_from(*v) {
                Ok(v) => Value::from(v),
                Err(_) => Value::String(v.to_string()),
            },
            Self::Signed(v) => match i64::try_from(*v) {
                Ok(v) => Value::from(v),
                Err(_) => Value::String(v.to_string()),
            },
            Self::String(s) | Self::PublicKey(s) | Self::Variant(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
            Self::Option(v) => v.as_ref().map_or(Value::Null, |v| v.to_json()),
            Self::List(items) => Value::Array(items.iter().map(IdlValue::to_json).collect()),
            Self::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// A decoded event or instruction: its IDL name plus named fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub name: String,
    pub fields: BTreeMap<String, IdlValue>,
}

impl DecodedRecord {
    pub fn get(&self, field: &str) -> Option<&IdlValue> {
        self.fields.get(field)
    }

    /// String-like field contents.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(IdlValue::as_str)
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "fields": IdlValue::Struct(self.fields.clone()).to_json(),
        })
    }
}

// ─── Coder ───────────────────────────────────────────────────────────────────

/// Decodes Anchor events and instruction arguments for one IDL.
#[derive(Debug, Clone)]
pub struct BorshCoder {
    name: String,
    events: HashMap<Discriminator, (String, Vec<IdlField>)>,
    instructions: HashMap<String, Vec<IdlField>>,
    instruction_names: HashMap<Discriminator, String>,
    types: HashMap<String, IdlTypeDef>,
}

impl BorshCoder {
    /// Build a coder, rejecting IDLs that reference unknown types or
    /// define a struct that always contains itself.
    pub fn new(idl: Idl) -> Result<Self, SchemaError> {
        let types: HashMap<String, IdlTypeDef> = idl
            .types
            .iter()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();

        let check = |owner: &str, fields: &[IdlField]| -> Result<(), SchemaError> {
            fields
                .iter()
                .try_for_each(|f| validate_type(&format!("{owner}.{}", f.name), &f.ty, &types))
        };
        for def in &idl.types {
            if let IdlTypeDefBody::Struct { fields } = &def.ty {
                check(&def.name, fields)?;
            }
        }
        check_acyclic(&types)?;

        let mut events = HashMap::new();
        for ev in idl.events {
            check(&ev.name, &ev.fields)?;
            let disc = event_discriminator(&ev.name);
            if let Some((first, _)) = events.insert(disc, (ev.name.clone(), ev.fields)) {
                return Err(SchemaError::DuplicateDiscriminator { first, second: ev.name });
            }
        }

        let mut instructions = HashMap::new();
        let mut instruction_names = HashMap::new();
        for ix in idl.instructions {
            check(&ix.name, &ix.args)?;
            let disc = instruction_discriminator(&ix.name);
            if let Some(first) = instruction_names.insert(disc, ix.name.clone()) {
                return Err(SchemaError::DuplicateDiscriminator { first, second: ix.name });
            }
            instructions.insert(ix.name, ix.args);
        }

        Ok(Self {
            name: idl.name,
            events,
            instructions,
            instruction_names,
            types,
        })
    }

    /// Parse and validate an IDL document.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Self::new(Idl::from_json(json)?)
    }

    /// Load an IDL document from disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, SchemaError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Program name declared by the IDL.
    pub fn program_name(&self) -> &str {
        &self.name
    }

    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.values().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Decode an event payload (discriminator + Borsh body).
    ///
    /// `Ok(None)` when the discriminator belongs to no event in this IDL.
    pub fn decode_event(&self, data: &[u8]) -> Result<Option<DecodedRecord>, DecodeError> {
        let (disc, mut body) = split_discriminator(data)?;
        let Some((name, fields)) = self.events.get(&disc) else {
            return Ok(None);
        };
        let fields = self.read_fields(fields, &mut body, 0)?;
        Ok(Some(DecodedRecord { name: name.clone(), fields }))
    }

    /// Decode full instruction data (discriminator + arguments).
    ///
    /// `Ok(None)` when the discriminator belongs to no instruction in this IDL.
    pub fn decode_instruction(&self, data: &[u8]) -> Result<Option<DecodedRecord>, DecodeError> {
        let (disc, body) = split_discriminator(data)?;
        match self.instruction_names.get(&disc) {
            Some(name) => self.decode_instruction_args(name, body).map(Some),
            None => Ok(None),
        }
    }

    /// Decode the argument bytes (after the discriminator) of `instruction`.
    pub fn decode_instruction_args(
        &self,
        instruction: &str,
        mut args: &[u8],
    ) -> Result<DecodedRecord, DecodeError> {
        let fields = self
            .instructions
            .get(instruction)
            .ok_or_else(|| DecodeError::UnknownInstruction(instruction.to_string()))?;
        let fields = self.read_fields(fields, &mut args, 0)?;
        Ok(DecodedRecord { name: instruction.to_string(), fields })
    }

    fn read_fields(
        &self,
        fields: &[IdlField],
        buf: &mut &[u8],
        depth: usize,
    ) -> Result<BTreeMap<String, IdlValue>, DecodeError> {
        fields
            .iter()
            .map(|f| -> Result<(String, IdlValue), DecodeError> {
                Ok((f.name.clone(), self.read_value(&f.name, &f.ty, buf, depth)?))
            })
            .collect()
    }

    fn read_value(
        &self,
        field: &str,
        ty: &IdlType,
        buf: &mut &[u8],
        depth: usize,
    ) -> Result<IdlValue, DecodeError> {
        if depth >= MAX_DEPTH {
            return Err(borsh_err(field, format!("nesting deeper than {MAX_DEPTH}")));
        }
        let depth = depth + 1;
        match ty {
            IdlType::Primitive(p) => read_primitive(field, p, buf),
            IdlType::Option { option } => {
                let tag: u8 = read(field, buf)?;
                match tag {
                    0 => Ok(IdlValue::Option(None)),
                    1 => Ok(IdlValue::Option(Some(Box::new(self.read_value(field, option, buf, depth)?)))),
                    other => Err(borsh_err(field, format!("invalid option tag {other}"))),
                }
            }
            IdlType::Vec { vec } => {
                let len: u32 = read(field, buf)?;
                // every element is at least one byte
                if len as usize > buf.len() {
                    return Err(borsh_err(field, format!("vec length {len} exceeds payload")));
                }
                (0..len)
                    .map(|_| self.read_value(field, vec, buf, depth))
                    .collect::<Result<_, _>>()
                    .map(IdlValue::List)
            }
            IdlType::Array { array: (inner, len) } => (0..*len)
                .map(|_| self.read_value(field, inner, buf, depth))
                .collect::<Result<_, _>>()
                .map(IdlValue::List),
            IdlType::Defined { defined } => {
                let def = self
                    .types
                    .get(defined)
                    .ok_or_else(|| borsh_err(field, format!("undefined type {defined}")))?;
                match &def.ty {
                    IdlTypeDefBody::Struct { fields } => {
                        self.read_fields(fields, buf, depth).map(IdlValue::Struct)
                    }
                    IdlTypeDefBody::Enum { variants } => {
                        let idx: u8 = read(field, buf)?;
                        variants
                            .get(idx as usize)
                            .map(|v| IdlValue::Variant(v.name.clone()))
                            .ok_or_else(|| borsh_err(field, format!("variant {idx} out of range")))
                    }
                }
            }
        }
    }
}

fn validate_type(
    owner: &str,
    ty: &IdlType,
    types: &HashMap<String, IdlTypeDef>,
) -> Result<(), SchemaError> {
    match ty {
        IdlType::Primitive(p) if PRIMITIVES.contains(&p.as_str()) => Ok(()),
        IdlType::Defined { defined } if types.contains_key(defined) => Ok(()),
        IdlType::Primitive(name) | IdlType::Defined { defined: name } => {
            Err(SchemaError::UnknownType {
                owner: owner.to_string(),
                ty: name.clone(),
            })
        }
        IdlType::Option { option: inner } | IdlType::Vec { vec: inner } => {
            validate_type(owner, inner, types)
        }
        IdlType::Array { array: (inner, _) } => validate_type(owner, inner, types),
    }
}

/// Defined types a value of `ty` always contains, i.e. not behind an
/// `option` or a `vec`.
fn required_types<'a>(ty: &'a IdlType, out: &mut Vec<&'a str>) {
    match ty {
        IdlType::Defined { defined } => out.push(defined),
        IdlType::Array { array: (inner, len) } if *len > 0 => required_types(inner, out),
        _ => {}
    }
}

fn check_acyclic(types: &HashMap<String, IdlTypeDef>) -> Result<(), SchemaError> {
    fn visit<'a>(
        name: &'a str,
        types: &'a HashMap<String, IdlTypeDef>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), SchemaError> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(SchemaError::RecursiveType { ty: name.to_string() });
        }
        if let Some(IdlTypeDefBody::Struct { fields }) = types.get(name).map(|def| &def.ty) {
            let mut required = Vec::new();
            for field in fields {
                required_types(&field.ty, &mut required);
            }
            for dep in required {
                visit(dep, types, visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name);
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    for name in types.keys() {
        visit(name, types, &mut visiting, &mut done)?;
    }
    Ok(())
}

fn split_discriminator(data: &[u8]) -> Result<(Discriminator, &[u8]), DecodeError> {
    if data.len() < 8 {
        return Err(DecodeError::TooShort { needed: 8, got: data.len() });
    }
    let (head, body) = data.split_at(8);
    let mut disc = [0u8; 8];
    disc.copy_from_slice(head);
    Ok((disc, body))
}

fn read<T: BorshDeserialize>(field: &str, buf: &mut &[u8]) -> Result<T, DecodeError> {
    T::deserialize(buf).map_err(|e| borsh_err(field, e.to_string()))
}

fn borsh_err(field: &str, reason: String) -> DecodeError {
    DecodeError::Borsh {
        field: field.to_string(),
        reason,
    }
}

fn read_primitive(field: &str, name: &str, buf: &mut &[u8]) -> Result<IdlValue, DecodeError> {
    Ok(match name {
        "bool" => IdlValue::Bool(read(field, buf)?),
        "u8" => IdlValue::Unsigned(read::<u8>(field, buf)?.into()),
        "u16" => IdlValue::Unsigned(read::<u16>(field, buf)?.into()),
        "u32" => IdlValue::Unsigned(read::<u32>(field, buf)?.into()),
        "u64" => IdlValue::Unsigned(read::<u64>(field, buf)?.into()),
        "u128" => IdlValue::Unsigned(read(field, buf)?),
        "i8" => IdlValue::Signed(read::<i8>(field, buf)?.into()),
        "i16" => IdlValue::Signed(read::<i16>(field, buf)?.into()),
        "i32" => IdlValue::Signed(read::<i32>(field, buf)?.into()),
        "i64" => IdlValue::Signed(read::<i64>(field, buf)?.into()),
        "i128" => IdlValue::Signed(read(field, buf)?),
        "string" => IdlValue::String(read(field, buf)?),
        "bytes" => IdlValue::Bytes(read(field, buf)?),
        "publicKey" | "pubkey" => {
            let key: [u8; 32] = read(field, buf)?;
            IdlValue::PublicKey(bs58::encode(key).into_string())
        }
        other => return Err(borsh_err(field, format!("unsupported primitive {other}"))),
    })
}
