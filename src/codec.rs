//! Dynamic Record Codec
//!
//! Encodes and decodes records of any registry message type using the
//! standard protobuf wire format. Records are held as [`DynamicMessage`]s
//! borrowing their [`MessageType`] from the registry.
//!
//! Repeated scalars are accepted packed or unpacked and written packed only
//! when the field asks for it. Fields the type does not know are kept as raw
//! bytes and written back after the known ones.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, skip_field, DecodeContext, WireType};

use crate::error::{Result, SchemaError};
use crate::registry::TypeRegistry;
use crate::schema::FieldType;
use crate::types::{DefaultValue, FieldDescriptor, MessageType};

/// Deepest message nesting accepted when decoding, as in prost
const RECURSION_LIMIT: u32 = 100;

/// A field value of a dynamic record
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'r> {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum value number
    Enum(i32),
    Message(DynamicMessage<'r>),
    /// Elements of a repeated field
    List(Vec<Value<'r>>),
}

impl<'r> Value<'r> {
    /// Whether this (non-list) value can be stored in a field of `ty`
    pub fn matches(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Value::Bool(_), FieldType::Bool)
                | (Value::I32(_), FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32)
                | (Value::I64(_), FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64)
                | (Value::U32(_), FieldType::Uint32 | FieldType::Fixed32)
                | (Value::U64(_), FieldType::Uint64 | FieldType::Fixed64)
                | (Value::F32(_), FieldType::Float)
                | (Value::F64(_), FieldType::Double)
                | (Value::String(_), FieldType::String)
                | (Value::Bytes(_), FieldType::Bytes)
                | (Value::Enum(_), FieldType::Enum)
                | (Value::Message(_), FieldType::Message)
        )
    }

    /// Whether this (non-list) value can be stored in `field`; records must
    /// be of the field's message type
    pub fn fits(&self, field: &FieldDescriptor) -> bool {
        match self {
            Value::Message(m) => {
                field.field_type == FieldType::Message
                    && field.message_type_name.as_deref() == Some(m.message_type().full_name.as_str())
            }
            other => other.matches(field.field_type),
        }
    }

    /// Value form of a materialized default, `None` for message fields
    pub fn from_default(ty: FieldType, default: &DefaultValue) -> Option<Self> {
        let value = match *default {
            DefaultValue::Absent => return None,
            DefaultValue::EmptyList => Value::List(Vec::new()),
            DefaultValue::Int(v) => match ty {
                FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => Value::I32(v as i32),
                FieldType::Float => Value::F32(v as f32),
                FieldType::Double => Value::F64(v as f64),
                _ => Value::I64(v),
            },
            DefaultValue::UInt(v) => match ty {
                FieldType::Uint32 | FieldType::Fixed32 => Value::U32(v as u32),
                _ => Value::U64(v),
            },
            DefaultValue::Float(v) if ty == FieldType::Float => Value::F32(v as f32),
            DefaultValue::Float(v) => Value::F64(v),
            DefaultValue::Bool(v) => Value::Bool(v),
            DefaultValue::Enum(v) => Value::Enum(v),
            DefaultValue::String(ref v) => Value::String(v.clone()),
            DefaultValue::Bytes(ref v) => Value::Bytes(v.clone()),
        };
        Some(value)
    }
}

/// A record of a runtime message type
#[derive(Debug, Clone)]
pub struct DynamicMessage<'r> {
    message_type: &'r MessageType,
    /// Set fields and extensions, by field number
    fields: BTreeMap<u32, Value<'r>>,
    unknown: Vec<u8>,
}

impl PartialEq for DynamicMessage<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.message_type.full_name == other.message_type.full_name
            && self.fields == other.fields
            && self.unknown == other.unknown
    }
}

impl<'r> DynamicMessage<'r> {
    /// Empty record of `message_type`
    pub fn new(message_type: &'r MessageType) -> Self {
        Self {
            message_type,
            fields: BTreeMap::new(),
            unknown: Vec::new(),
        }
    }

    pub fn message_type(&self) -> &'r MessageType {
        self.message_type
    }

    /// Field by name, or extension by fully-qualified name
    fn descriptor(&self, name: &str) -> Option<&'r FieldDescriptor> {
        let message_type = self.message_type;
        message_type
            .field_by_name(name)
            .or_else(|| message_type.extension_by_name(name))
    }

    fn descriptor_by_number(&self, number: u32) -> Option<&'r FieldDescriptor> {
        let message_type = self.message_type;
        message_type
            .field_by_number(number)
            .or_else(|| message_type.extension_by_number(number))
    }

    pub fn get(&self, name: &str) -> Option<&Value<'r>> {
        let field = self.descriptor(name)?;
        self.fields.get(&field.number)
    }

    /// Set value, falling back to the field's default
    pub fn get_or_default(&self, name: &str) -> Option<Value<'r>> {
        let field = self.descriptor(name)?;
        match self.fields.get(&field.number) {
            Some(value) => Some(value.clone()),
            None => Value::from_default(field.field_type, &field.default_value),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a field or extension; repeated fields take a [`Value::List`]
    pub fn set(&mut self, name: &str, value: Value<'r>) -> Result<()> {
        let field = self.descriptor(name).ok_or_else(|| {
            SchemaError::malformed(&self.message_type.full_name, format!("no field named '{}'", name))
        })?;

        let compatible = match &value {
            Value::List(items) => {
                field.is_repeated() && items.iter().all(|v| v.fits(field))
            }
            single => !field.is_repeated() && single.fits(field),
        };
        if !compatible {
            return Err(SchemaError::malformed(
                &self.message_type.full_name,
                format!("value does not fit field '{}' of type {}", name, field.field_type),
            ));
        }

        self.fields.insert(field.number, value);
        Ok(())
    }

    pub fn clear(&mut self, name: &str) -> Option<Value<'r>> {
        let field = self.descriptor(name)?;
        self.fields.remove(&field.number)
    }

    /// Set fields and extensions, by field number
    pub fn fields(&self) -> impl Iterator<Item = (&'r FieldDescriptor, &Value<'r>)> {
        let message_type = self.message_type;
        self.fields.iter().filter_map(move |(&number, value)| {
            message_type
                .field_by_number(number)
                .or_else(|| message_type.extension_by_number(number))
                .map(|field| (field, value))
        })
    }

    /// Raw wire bytes of fields the type does not declare
    pub fn unknown_fields(&self) -> &[u8] {
        &self.unknown
    }

    /// Names of required fields that are not set
    pub fn missing_required(&self) -> Vec<&'r str> {
        let message_type = self.message_type;
        message_type
            .fields
            .iter()
            .filter(|f| f.is_required() && !self.fields.contains_key(&f.number))
            .map(|f| f.name.as_str())
            .collect()
    }

    // ========== Encoding ==========

    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Encode known fields in number order, then unknown fields verbatim
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        for (field, value) in self.fields() {
            encode_field(field, value, buf)?;
        }
        buf.put_slice(&self.unknown);
        Ok(())
    }

    // ========== Decoding ==========

    pub fn decode(
        registry: &'r TypeRegistry,
        message_type: &'r MessageType,
        bytes: &[u8],
    ) -> Result<Self> {
        Self::decode_nested(registry, message_type, bytes, RECURSION_LIMIT)
    }

    fn decode_nested(
        registry: &'r TypeRegistry,
        message_type: &'r MessageType,
        bytes: &[u8],
        depth: u32,
    ) -> Result<Self> {
        let mut message = Self::new(message_type);
        message.merge_nested(registry, bytes, depth)?;
        Ok(message)
    }

    /// Merge an encoded record into this one
    ///
    /// Singular fields take the last value seen, except message fields which
    /// are merged recursively. Repeated fields are appended to. Message
    /// fields nested deeper than 100 levels are rejected.
    pub fn merge(&mut self, registry: &'r TypeRegistry, bytes: &[u8]) -> Result<()> {
        self.merge_nested(registry, bytes, RECURSION_LIMIT)
    }

    /// Merge with `depth` levels of message nesting left
    fn merge_nested(&mut self, registry: &'r TypeRegistry, bytes: &[u8], depth: u32) -> Result<()> {
        let mut buf = bytes;
        while buf.has_remaining() {
            let start = buf;
            let (number, wire_type) = decode_key(&mut buf)?;

            let Some(field) = self.descriptor_by_number(number) else {
                skip_field(wire_type, number, &mut buf, DecodeContext::default())?;
                let consumed = start.len() - buf.len();
                self.unknown.extend_from_slice(&start[..consumed]);
                continue;
            };
            self.merge_field(registry, field, wire_type, &mut buf, depth)?;
        }
        Ok(())
    }

    fn merge_field(
        &mut self,
        registry: &'r TypeRegistry,
        field: &'r FieldDescriptor,
        wire_type: WireType,
        buf: &mut &[u8],
        depth: u32,
    ) -> Result<()> {
        let expected = wire_type_of(field)?;

        if field.is_repeated() {
            let mut values = Vec::new();
            if wire_type == WireType::LengthDelimited && field.field_type.is_packable() {
                let mut packed = take_len(buf, field)?;
                while packed.has_remaining() {
                    values.push(decode_value(registry, field, &mut packed, depth)?);
                }
            } else {
                check_wire_type(field, expected, wire_type)?;
                values.push(decode_value(registry, field, buf, depth)?);
            }

            match self.fields.get_mut(&field.number) {
                Some(Value::List(items)) => items.extend(values),
                _ => {
                    self.fields.insert(field.number, Value::List(values));
                }
            }
            return Ok(());
        }

        check_wire_type(field, expected, wire_type)?;
        if let Some(Value::Message(existing)) = self.fields.get_mut(&field.number) {
            let body = take_len(buf, field)?;
            return existing.merge_nested(registry, body, enter_nested(field, depth)?);
        }
        let value = decode_value(registry, field, buf, depth)?;
        self.fields.insert(field.number, value);
        Ok(())
    }
}

fn wire_type_of(field: &FieldDescriptor) -> Result<WireType> {
    let wire_type = match field.field_type {
        FieldType::Int32
        | FieldType::Int64
        | FieldType::Uint32
        | FieldType::Uint64
        | FieldType::Sint32
        | FieldType::Sint64
        | FieldType::Bool
        | FieldType::Enum => WireType::Varint,
        FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => WireType::ThirtyTwoBit,
        FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => WireType::SixtyFourBit,
        FieldType::String | FieldType::Bytes | FieldType::Message => WireType::LengthDelimited,
        FieldType::Group => {
            return Err(SchemaError::UnsupportedFieldType {
                field: field.full_name.clone(),
                field_type: field.field_type.to_string(),
            })
        }
    };
    Ok(wire_type)
}

fn check_wire_type(field: &FieldDescriptor, expected: WireType, actual: WireType) -> Result<()> {
    if expected != actual {
        return Err(SchemaError::malformed(
            &field.full_name,
            format!("wire type {:?} where {:?} was expected", actual, expected),
        ));
    }
    Ok(())
}

fn encode_field(field: &FieldDescriptor, value: &Value<'_>, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::List(items) if field.packed && field.field_type.is_packable() => {
            if items.is_empty() {
                return Ok(());
            }
            let mut payload = Vec::new();
            for item in items {
                encode_payload(field, item, &mut payload)?;
            }
            encode_key(field.number, WireType::LengthDelimited, buf);
            encode_varint(payload.len() as u64, buf);
            buf.put_slice(&payload);
        }
        Value::List(items) => {
            for item in items {
                encode_key(field.number, wire_type_of(field)?, buf);
                encode_payload(field, item, buf)?;
            }
        }
        single => {
            encode_key(field.number, wire_type_of(field)?, buf);
            encode_payload(field, single, buf)?;
        }
    }
    Ok(())
}

fn encode_payload(field: &FieldDescriptor, value: &Value<'_>, buf: &mut Vec<u8>) -> Result<()> {
    match (field.field_type, value) {
        // Negative int32 and enum values are sign-extended to ten bytes
        (FieldType::Int32, Value::I32(v)) => encode_varint(*v as i64 as u64, buf),
        (FieldType::Enum, Value::Enum(v)) => encode_varint(*v as i64 as u64, buf),
        (FieldType::Int64, Value::I64(v)) => encode_varint(*v as u64, buf),
        (FieldType::Uint32, Value::U32(v)) => encode_varint(u64::from(*v), buf),
        (FieldType::Uint64, Value::U64(v)) => encode_varint(*v, buf),
        (FieldType::Sint32, Value::I32(v)) => {
            encode_varint(u64::from(((v << 1) ^ (v >> 31)) as u32), buf)
        }
        (FieldType::Sint64, Value::I64(v)) => encode_varint(((v << 1) ^ (v >> 63)) as u64, buf),
        (FieldType::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), buf),
        (FieldType::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
        (FieldType::Sfixed32, Value::I32(v)) => buf.put_i32_le(*v),
        (FieldType::Float, Value::F32(v)) => buf.put_f32_le(*v),
        (FieldType::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
        (FieldType::Sfixed64, Value::I64(v)) => buf.put_i64_le(*v),
        (FieldType::Double, Value::F64(v)) => buf.put_f64_le(*v),
        (FieldType::String, Value::String(v)) => {
            encode_varint(v.len() as u64, buf);
            buf.put_slice(v.as_bytes());
        }
        (FieldType::Bytes, Value::Bytes(v)) => {
            encode_varint(v.len() as u64, buf);
            buf.put_slice(v);
        }
        (FieldType::Message, Value::Message(m)) => {
            let body = m.encode_to_vec()?;
            encode_varint(body.len() as u64, buf);
            buf.put_slice(&body);
        }
        (ty, _) => {
            return Err(SchemaError::malformed(
                &field.full_name,
                format!("value does not fit field type {}", ty),
            ))
        }
    }
    Ok(())
}

fn decode_value<'r>(
    registry: &'r TypeRegistry,
    field: &FieldDescriptor,
    buf: &mut &[u8],
    depth: u32,
) -> Result<Value<'r>> {
    let value = match field.field_type {
        FieldType::Int32 => Value::I32(decode_varint(buf)? as i32),
        FieldType::Int64 => Value::I64(decode_varint(buf)? as i64),
        FieldType::Uint32 => Value::U32(decode_varint(buf)? as u32),
        FieldType::Uint64 => Value::U64(decode_varint(buf)?),
        FieldType::Sint32 => {
            let v = decode_varint(buf)? as u32;
            Value::I32(((v >> 1) as i32) ^ -((v & 1) as i32))
        }
        FieldType::Sint64 => {
            let v = decode_varint(buf)?;
            Value::I64(((v >> 1) as i64) ^ -((v & 1) as i64))
        }
        FieldType::Bool => Value::Bool(decode_varint(buf)? != 0),
        FieldType::Enum => Value::Enum(decode_varint(buf)? as i32),
        FieldType::Fixed32 => Value::U32(fixed(buf, 4, field)?.get_u32_le()),
        FieldType::Sfixed32 => Value::I32(fixed(buf, 4, field)?.get_i32_le()),
        FieldType::Float => Value::F32(fixed(buf, 4, field)?.get_f32_le()),
        FieldType::Fixed64 => Value::U64(fixed(buf, 8, field)?.get_u64_le()),
        FieldType::Sfixed64 => Value::I64(fixed(buf, 8, field)?.get_i64_le()),
        FieldType::Double => Value::F64(fixed(buf, 8, field)?.get_f64_le()),
        FieldType::String => {
            let body = take_len(buf, field)?;
            let text = std::str::from_utf8(body)
                .map_err(|e| SchemaError::malformed(&field.full_name, e.to_string()))?;
            Value::String(text.to_string())
        }
        FieldType::Bytes => Value::Bytes(take_len(buf, field)?.to_vec()),
        FieldType::Message => {
            let id = field.message_type.ok_or_else(|| {
                SchemaError::malformed(&field.full_name, "message type is not resolved")
            })?;
            let depth = enter_nested(field, depth)?;
            let body = take_len(buf, field)?;
            Value::Message(DynamicMessage::decode_nested(
                registry,
                registry.message(id),
                body,
                depth,
            )?)
        }
        FieldType::Group => {
            return Err(SchemaError::UnsupportedFieldType {
                field: field.full_name.clone(),
                field_type: field.field_type.to_string(),
            })
        }
    };
    Ok(value)
}

/// Nesting budget left inside a message field
fn enter_nested(field: &FieldDescriptor, depth: u32) -> Result<u32> {
    depth.checked_sub(1).ok_or_else(|| {
        SchemaError::malformed(&field.full_name, "message nesting exceeds the recursion limit")
    })
}

/// Split off a fixed-width value
fn fixed<'a>(buf: &mut &'a [u8], width: usize, field: &FieldDescriptor) -> Result<&'a [u8]> {
    let slice: &'a [u8] = *buf;
    if slice.len() < width {
        return Err(SchemaError::malformed(&field.full_name, "truncated fixed-width value"));
    }
    let (value, rest) = slice.split_at(width);
    *buf = rest;
    Ok(value)
}

/// Split off a length-delimited payload
fn take_len<'a>(buf: &mut &'a [u8], field: &FieldDescriptor) -> Result<&'a [u8]> {
    let len = decode_varint(buf)? as usize;
    let slice: &'a [u8] = *buf;
    if slice.len() < len {
        return Err(SchemaError::malformed(&field.full_name, "truncated length-delimited value"));
    }
    let (body, rest) = slice.split_at(len);
    *buf = rest;
    Ok(body)
}
