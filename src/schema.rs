//! Structural schema model
//!
//! A [`SchemaFile`] is the parsed form of one `FileDescriptorProto`: nested
//! message, enum and extension declarations with their type references still
//! unresolved. Files are decoded from raw descriptor bytes with `prost-types`
//! or assembled programmatically with the `with_*` builders.
//!
//! Message and enum declarations decoded from a blob keep their original
//! bytes, which the type builder searches for inside the file's blob when it
//! records byte ranges. Declarations assembled in code fall back to the
//! encoding of their descriptor message (`to_proto`).

use std::fmt;

use bytes::{Buf, Bytes};
use prost::encoding::{decode_key, decode_varint, skip_field, DecodeContext, WireType};
use prost::Message;
use prost_types::descriptor_proto::{ExtensionRange, ReservedRange};
use prost_types::enum_descriptor_proto::EnumReservedRange;
use prost_types::field_descriptor_proto::{Label as ProtoLabel, Type as ProtoType};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumOptions, EnumValueDescriptorProto, EnumValueOptions,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, MessageOptions, OneofDescriptorProto,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

// Descriptor field numbers of the repeated declarations
const SET_FILE: u32 = 1;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_ENUM_TYPE: u32 = 5;
const MESSAGE_NESTED_TYPE: u32 = 3;
const MESSAGE_ENUM_TYPE: u32 = 4;

/// Declared type of a field (the descriptor's `type` tag)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldType {
    pub fn from_proto(ty: ProtoType) -> Self {
        match ty {
            ProtoType::Double => FieldType::Double,
            ProtoType::Float => FieldType::Float,
            ProtoType::Int64 => FieldType::Int64,
            ProtoType::Uint64 => FieldType::Uint64,
            ProtoType::Int32 => FieldType::Int32,
            ProtoType::Fixed64 => FieldType::Fixed64,
            ProtoType::Fixed32 => FieldType::Fixed32,
            ProtoType::Bool => FieldType::Bool,
            ProtoType::String => FieldType::String,
            ProtoType::Group => FieldType::Group,
            ProtoType::Message => FieldType::Message,
            ProtoType::Bytes => FieldType::Bytes,
            ProtoType::Uint32 => FieldType::Uint32,
            ProtoType::Enum => FieldType::Enum,
            ProtoType::Sfixed32 => FieldType::Sfixed32,
            ProtoType::Sfixed64 => FieldType::Sfixed64,
            ProtoType::Sint32 => FieldType::Sint32,
            ProtoType::Sint64 => FieldType::Sint64,
        }
    }

    pub fn to_proto(self) -> ProtoType {
        match self {
            FieldType::Double => ProtoType::Double,
            FieldType::Float => ProtoType::Float,
            FieldType::Int64 => ProtoType::Int64,
            FieldType::Uint64 => ProtoType::Uint64,
            FieldType::Int32 => ProtoType::Int32,
            FieldType::Fixed64 => ProtoType::Fixed64,
            FieldType::Fixed32 => ProtoType::Fixed32,
            FieldType::Bool => ProtoType::Bool,
            FieldType::String => ProtoType::String,
            FieldType::Group => ProtoType::Group,
            FieldType::Message => ProtoType::Message,
            FieldType::Bytes => ProtoType::Bytes,
            FieldType::Uint32 => ProtoType::Uint32,
            FieldType::Enum => ProtoType::Enum,
            FieldType::Sfixed32 => ProtoType::Sfixed32,
            FieldType::Sfixed64 => ProtoType::Sfixed64,
            FieldType::Sint32 => ProtoType::Sint32,
            FieldType::Sint64 => ProtoType::Sint64,
        }
    }

    /// Signed integer kinds, including zigzag and fixed-width variants
    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            FieldType::Int32
                | FieldType::Int64
                | FieldType::Sint32
                | FieldType::Sint64
                | FieldType::Sfixed32
                | FieldType::Sfixed64
        )
    }

    /// Unsigned integer kinds, including fixed-width variants
    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            FieldType::Uint32 | FieldType::Uint64 | FieldType::Fixed32 | FieldType::Fixed64
        )
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    /// Whether repeated values of this type may use packed encoding
    pub fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int64 => "int64",
            FieldType::Uint64 => "uint64",
            FieldType::Int32 => "int32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Group => "group",
            FieldType::Message => "message",
            FieldType::Bytes => "bytes",
            FieldType::Uint32 => "uint32",
            FieldType::Enum => "enum",
            FieldType::Sfixed32 => "sfixed32",
            FieldType::Sfixed64 => "sfixed64",
            FieldType::Sint32 => "sint32",
            FieldType::Sint64 => "sint64",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    #[default]
    Optional,
    Required,
    Repeated,
}

impl Label {
    pub fn from_proto(label: ProtoLabel) -> Self {
        match label {
            ProtoLabel::Optional => Label::Optional,
            ProtoLabel::Required => Label::Required,
            ProtoLabel::Repeated => Label::Repeated,
        }
    }

    pub fn to_proto(self) -> ProtoLabel {
        match self {
            Label::Optional => ProtoLabel::Optional,
            Label::Required => ProtoLabel::Required,
            Label::Repeated => ProtoLabel::Repeated,
        }
    }
}

/// One field declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub number: u32,
    pub field_type: FieldType,
    pub label: Label,
    /// Message or enum type reference, relative or absolute (leading `.`)
    pub type_name: Option<String>,
    /// Raw default value as written by the schema compiler
    pub default_value: Option<String>,
    pub oneof_index: Option<i32>,
    pub json_name: Option<String>,
    pub options: Option<FieldOptions>,
    pub proto3_optional: Option<bool>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            number,
            field_type,
            label: Label::Optional,
            type_name: None,
            default_value: None,
            oneof_index: None,
            json_name: None,
            options: None,
            proto3_optional: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.label = Label::Required;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.label = Label::Repeated;
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn packed(mut self) -> Self {
        let options = self.options.get_or_insert_with(FieldOptions::default);
        options.packed = Some(true);
        self
    }

    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_packed(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.packed)
            .unwrap_or(false)
    }

    pub fn from_proto(proto: &FieldDescriptorProto) -> Result<Self> {
        let name = proto.name().to_string();
        let raw_type = proto.r#type.ok_or_else(|| {
            SchemaError::InvalidDescriptor(format!("field '{}' has no type", name))
        })?;
        let proto_type = ProtoType::try_from(raw_type).map_err(|_| {
            SchemaError::InvalidDescriptor(format!("field '{}' has unknown type {}", name, raw_type))
        })?;
        let number = proto
            .number
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                SchemaError::InvalidDescriptor(format!("field '{}' has no valid number", name))
            })?;
        let label = match proto.label {
            Some(raw) => ProtoLabel::try_from(raw)
                .map(Label::from_proto)
                .map_err(|_| {
                    SchemaError::InvalidDescriptor(format!(
                        "field '{}' has unknown label {}",
                        name, raw
                    ))
                })?,
            None => Label::Optional,
        };

        Ok(Self {
            name,
            number: number as u32,
            field_type: FieldType::from_proto(proto_type),
            label,
            type_name: proto.type_name.clone(),
            default_value: proto.default_value.clone(),
            oneof_index: proto.oneof_index,
            json_name: proto.json_name.clone(),
            options: proto.options.clone(),
            proto3_optional: proto.proto3_optional,
        })
    }

    pub fn to_proto(&self) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(self.name.clone()),
            number: Some(self.number as i32),
            label: Some(self.label.to_proto() as i32),
            r#type: Some(self.field_type.to_proto() as i32),
            type_name: self.type_name.clone(),
            default_value: self.default_value.clone(),
            oneof_index: self.oneof_index,
            json_name: self.json_name.clone(),
            options: self.options.clone(),
            proto3_optional: self.proto3_optional,
            ..Default::default()
        }
    }
}

/// A field declared outside of the message it extends
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSchema {
    pub field: FieldSchema,
    /// Name of the extended message; empty when the descriptor omitted it
    pub extendee: String,
}

impl ExtensionSchema {
    pub fn new(extendee: impl Into<String>, field: FieldSchema) -> Self {
        Self {
            field,
            extendee: extendee.into(),
        }
    }

    pub fn from_proto(proto: &FieldDescriptorProto) -> Result<Self> {
        Ok(Self {
            field: FieldSchema::from_proto(proto)?,
            extendee: proto.extendee().to_string(),
        })
    }

    pub fn to_proto(&self) -> FieldDescriptorProto {
        let mut proto = self.field.to_proto();
        if !self.extendee.is_empty() {
            proto.extendee = Some(self.extendee.clone());
        }
        proto
    }
}

/// Half-open field number range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRange {
    pub start: i32,
    pub end: i32,
}

impl NumberRange {
    pub fn contains(&self, number: u32) -> bool {
        (number as i64) >= self.start as i64 && (number as i64) < self.end as i64
    }
}

/// One message declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub nested_messages: Vec<MessageSchema>,
    pub nested_enums: Vec<EnumSchema>,
    pub extensions: Vec<ExtensionSchema>,
    /// Declared extension number ranges; non-empty marks the message extendable
    pub extension_ranges: Vec<NumberRange>,
    pub oneofs: Vec<String>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub options: Option<MessageOptions>,
    /// Original declaration bytes, when decoded from a blob
    raw: Option<Bytes>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            nested_messages: Vec::new(),
            nested_enums: Vec::new(),
            extensions: Vec::new(),
            extension_ranges: Vec::new(),
            oneofs: Vec::new(),
            reserved_ranges: Vec::new(),
            reserved_names: Vec::new(),
            options: None,
            raw: None,
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_message(mut self, message: MessageSchema) -> Self {
        self.nested_messages.push(message);
        self
    }

    pub fn with_enum(mut self, enum_schema: EnumSchema) -> Self {
        self.nested_enums.push(enum_schema);
        self
    }

    pub fn with_extension(mut self, extension: ExtensionSchema) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_extension_range(mut self, start: i32, end: i32) -> Self {
        self.extension_ranges.push(NumberRange { start, end });
        self
    }

    pub fn is_extendable(&self) -> bool {
        !self.extension_ranges.is_empty()
    }

    pub fn from_proto(proto: &DescriptorProto) -> Result<Self> {
        Ok(Self {
            name: proto.name().to_string(),
            fields: proto
                .field
                .iter()
                .map(FieldSchema::from_proto)
                .collect::<Result<_>>()?,
            nested_messages: proto
                .nested_type
                .iter()
                .map(MessageSchema::from_proto)
                .collect::<Result<_>>()?,
            nested_enums: proto
                .enum_type
                .iter()
                .map(EnumSchema::from_proto)
                .collect(),
            extensions: proto
                .extension
                .iter()
                .map(ExtensionSchema::from_proto)
                .collect::<Result<_>>()?,
            extension_ranges: proto
                .extension_range
                .iter()
                .map(|r| NumberRange {
                    start: r.start(),
                    end: r.end(),
                })
                .collect(),
            oneofs: proto
                .oneof_decl
                .iter()
                .map(|o| o.name().to_string())
                .collect(),
            reserved_ranges: proto
                .reserved_range
                .iter()
                .map(|r| NumberRange {
                    start: r.start(),
                    end: r.end(),
                })
                .collect(),
            reserved_names: proto.reserved_name.clone(),
            options: proto.options.clone(),
            raw: None,
        })
    }

    pub fn to_proto(&self) -> DescriptorProto {
        DescriptorProto {
            name: Some(self.name.clone()),
            field: self.fields.iter().map(FieldSchema::to_proto).collect(),
            extension: self.extensions.iter().map(ExtensionSchema::to_proto).collect(),
            nested_type: self
                .nested_messages
                .iter()
                .map(MessageSchema::to_proto)
                .collect(),
            enum_type: self.nested_enums.iter().map(EnumSchema::to_proto).collect(),
            extension_range: self
                .extension_ranges
                .iter()
                .map(|r| ExtensionRange {
                    start: Some(r.start),
                    end: Some(r.end),
                    ..Default::default()
                })
                .collect(),
            oneof_decl: self
                .oneofs
                .iter()
                .map(|name| OneofDescriptorProto {
                    name: Some(name.clone()),
                    ..Default::default()
                })
                .collect(),
            options: self.options.clone(),
            reserved_range: self
                .reserved_ranges
                .iter()
                .map(|r| ReservedRange {
                    start: Some(r.start),
                    end: Some(r.end),
                })
                .collect(),
            reserved_name: self.reserved_names.clone(),
        }
    }

    /// Canonical encoding of this declaration
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Declaration bytes as they occur in the file blob
    pub fn serialized(&self) -> Bytes {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => Bytes::from(self.encode_to_vec()),
        }
    }
}

/// One enumeration value
#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueSchema {
    pub name: String,
    pub number: i32,
    pub options: Option<EnumValueOptions>,
}

/// One enum declaration; the first value is the implicit default
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub values: Vec<EnumValueSchema>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub options: Option<EnumOptions>,
    /// Original declaration bytes, when decoded from a blob
    raw: Option<Bytes>,
}

impl EnumSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            reserved_ranges: Vec::new(),
            reserved_names: Vec::new(),
            options: None,
            raw: None,
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push(EnumValueSchema {
            name: name.into(),
            number,
            options: None,
        });
        self
    }

    pub fn from_proto(proto: &EnumDescriptorProto) -> Self {
        Self {
            name: proto.name().to_string(),
            values: proto
                .value
                .iter()
                .map(|v| EnumValueSchema {
                    name: v.name().to_string(),
                    number: v.number(),
                    options: v.options.clone(),
                })
                .collect(),
            reserved_ranges: proto
                .reserved_range
                .iter()
                .map(|r| NumberRange {
                    start: r.start(),
                    end: r.end(),
                })
                .collect(),
            reserved_names: proto.reserved_name.clone(),
            options: proto.options.clone(),
            raw: None,
        }
    }

    pub fn to_proto(&self) -> EnumDescriptorProto {
        EnumDescriptorProto {
            name: Some(self.name.clone()),
            value: self
                .values
                .iter()
                .map(|v| EnumValueDescriptorProto {
                    name: Some(v.name.clone()),
                    number: Some(v.number),
                    options: v.options.clone(),
                })
                .collect(),
            options: self.options.clone(),
            reserved_range: self
                .reserved_ranges
                .iter()
                .map(|r| EnumReservedRange {
                    start: Some(r.start),
                    end: Some(r.end),
                })
                .collect(),
            reserved_name: self.reserved_names.clone(),
        }
    }

    /// Canonical encoding of this declaration
    pub fn encode_to_vec(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Declaration bytes as they occur in the file blob
    pub fn serialized(&self) -> Bytes {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => Bytes::from(self.encode_to_vec()),
        }
    }
}

/// One schema unit (a `.proto` file after compilation)
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFile {
    pub name: String,
    /// Package name; empty for files without a package declaration
    pub package: String,
    pub dependencies: Vec<String>,
    pub messages: Vec<MessageSchema>,
    pub enums: Vec<EnumSchema>,
    pub extensions: Vec<ExtensionSchema>,
    pub syntax: Option<String>,
    /// Original descriptor bytes, when the file was decoded from a blob
    raw: Option<Bytes>,
}

impl SchemaFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: String::new(),
            dependencies: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            extensions: Vec::new(),
            syntax: None,
            raw: None,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_message(mut self, message: MessageSchema) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_enum(mut self, enum_schema: EnumSchema) -> Self {
        self.enums.push(enum_schema);
        self
    }

    pub fn with_extension(mut self, extension: ExtensionSchema) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Decode one serialized `FileDescriptorProto`, keeping the original bytes
    ///
    /// Every message and enum declaration keeps the exact slice of `bytes` it
    /// was decoded from, unknown fields and custom options included.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let proto = FileDescriptorProto::decode(bytes.clone())?;
        let mut file = Self::convert(&proto)?;
        attach_declarations(
            &mut file.messages,
            &mut file.enums,
            &bytes,
            FILE_MESSAGE_TYPE,
            FILE_ENUM_TYPE,
        )?;
        file.raw = Some(bytes);
        Ok(file)
    }

    /// Convert an already decoded descriptor; its encoding becomes the blob
    pub fn from_proto(proto: &FileDescriptorProto) -> Result<Self> {
        Self::decode(proto.encode_to_vec())
    }

    /// Decode a serialized `FileDescriptorSet` into its files, in set order
    ///
    /// Each file is decoded from its own bytes within the set, never from a
    /// re-encoding.
    pub fn decode_set(bytes: &[u8]) -> Result<Vec<Self>> {
        let bytes = Bytes::copy_from_slice(bytes);
        split_field(&bytes, SET_FILE)?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    fn convert(proto: &FileDescriptorProto) -> Result<Self> {
        let name = proto.name().to_string();
        if name.is_empty() {
            return Err(SchemaError::InvalidDescriptor(
                "schema file without a name".to_string(),
            ));
        }
        Ok(Self {
            name,
            package: proto.package().to_string(),
            dependencies: proto.dependency.clone(),
            messages: proto
                .message_type
                .iter()
                .map(MessageSchema::from_proto)
                .collect::<Result<_>>()?,
            enums: proto.enum_type.iter().map(EnumSchema::from_proto).collect(),
            extensions: proto
                .extension
                .iter()
                .map(ExtensionSchema::from_proto)
                .collect::<Result<_>>()?,
            syntax: proto.syntax.clone(),
            raw: None,
        })
    }

    pub fn to_proto(&self) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(self.name.clone()),
            package: (!self.package.is_empty()).then(|| self.package.clone()),
            dependency: self.dependencies.clone(),
            message_type: self.messages.iter().map(MessageSchema::to_proto).collect(),
            enum_type: self.enums.iter().map(EnumSchema::to_proto).collect(),
            extension: self.extensions.iter().map(ExtensionSchema::to_proto).collect(),
            syntax: self.syntax.clone(),
            ..Default::default()
        }
    }

    /// The serialized schema blob byte ranges are measured against
    pub fn serialized(&self) -> Bytes {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => Bytes::from(self.to_proto().encode_to_vec()),
        }
    }
}

/// Hand each declaration the slice of `bytes` it was decoded from
fn attach_declarations(
    messages: &mut [MessageSchema],
    enums: &mut [EnumSchema],
    bytes: &Bytes,
    message_tag: u32,
    enum_tag: u32,
) -> Result<()> {
    let message_slices = split_field(bytes, message_tag)?;
    let enum_slices = split_field(bytes, enum_tag)?;
    if message_slices.len() != messages.len() || enum_slices.len() != enums.len() {
        return Err(SchemaError::InvalidDescriptor(
            "declaration count differs from the decoded descriptor".to_string(),
        ));
    }

    for (message, raw) in messages.iter_mut().zip(message_slices) {
        attach_declarations(
            &mut message.nested_messages,
            &mut message.nested_enums,
            &raw,
            MESSAGE_NESTED_TYPE,
            MESSAGE_ENUM_TYPE,
        )?;
        message.raw = Some(raw);
    }
    for (enum_schema, raw) in enums.iter_mut().zip(enum_slices) {
        enum_schema.raw = Some(raw);
    }
    Ok(())
}

/// Payloads of every length-delimited occurrence of field `tag`, in wire order
fn split_field(bytes: &Bytes, tag: u32) -> Result<Vec<Bytes>> {
    let mut buf: &[u8] = bytes;
    let mut slices = Vec::new();
    while buf.has_remaining() {
        let (number, wire_type) = decode_key(&mut buf)?;
        if number != tag || wire_type != WireType::LengthDelimited {
            skip_field(wire_type, number, &mut buf, DecodeContext::default())?;
            continue;
        }

        let len = decode_varint(&mut buf)? as usize;
        if len > buf.len() {
            return Err(SchemaError::InvalidDescriptor(format!(
                "field {} runs past the end of its message",
                tag
            )));
        }
        let start = bytes.len() - buf.len();
        slices.push(bytes.slice(start..start + len));
        buf.advance(len);
    }
    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> SchemaFile {
        SchemaFile::new("geo.proto")
            .with_package("geo")
            .with_message(
                MessageSchema::new("Point")
                    .with_field(FieldSchema::new("x", 1, FieldType::Int32).required())
                    .with_field(
                        FieldSchema::new("y", 2, FieldType::Int32)
                            .required()
                            .with_default("5"),
                    ),
            )
            .with_enum(EnumSchema::new("Axis").with_value("X", 1).with_value("Y", 2))
    }

    #[test]
    fn test_decode_keeps_structure() {
        let file = sample_file();
        let bytes = file.to_proto().encode_to_vec();
        let decoded = SchemaFile::decode(bytes.clone()).unwrap();

        assert_eq!(decoded.name, "geo.proto");
        assert_eq!(decoded.package, "geo");
        assert_eq!(decoded.to_proto(), file.to_proto());
        assert_eq!(decoded.serialized().as_ref(), bytes.as_slice());
    }

    #[test]
    fn test_decode_set_keeps_original_bytes() {
        use prost::encoding::{encode_key, encode_varint};

        fn length_delimited(tag: u32, body: &[u8], out: &mut Vec<u8>) {
            encode_key(tag, WireType::LengthDelimited, out);
            encode_varint(body.len() as u64, out);
            out.extend_from_slice(body);
        }

        // EnumOptions carrying extension 50001 = 7, which prost-types drops
        let mut options = Vec::new();
        encode_key(50001, WireType::Varint, &mut options);
        encode_varint(7, &mut options);
        let mut value = Vec::new();
        length_delimited(1, b"RED", &mut value);
        let mut color = Vec::new();
        length_delimited(1, b"Color", &mut color);
        length_delimited(2, &value, &mut color);
        length_delimited(3, &options, &mut color);
        let mut inner = Vec::new();
        length_delimited(1, b"Inner", &mut inner);
        let mut outer = Vec::new();
        length_delimited(1, b"Outer", &mut outer);
        length_delimited(3, &inner, &mut outer);

        let mut file = Vec::new();
        length_delimited(1, b"opt.proto", &mut file);
        length_delimited(4, &outer, &mut file);
        length_delimited(5, &color, &mut file);
        let mut set = Vec::new();
        length_delimited(1, &file, &mut set);
        length_delimited(1, &sample_file().to_proto().encode_to_vec(), &mut set);

        let files = SchemaFile::decode_set(&set).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].serialized().as_ref(), file.as_slice());
        assert_eq!(files[0].enums[0].serialized().as_ref(), color.as_slice());
        assert_eq!(files[0].messages[0].serialized().as_ref(), outer.as_slice());
        assert_eq!(
            files[0].messages[0].nested_messages[0].serialized().as_ref(),
            inner.as_slice()
        );
        assert_eq!(files[1].name, "geo.proto");
    }

    #[test]
    fn test_truncated_set_is_rejected() {
        // File entry declares five bytes, one follows
        let set = [0x0a, 0x05, 0x0a];
        assert!(SchemaFile::decode_set(&set).is_err());
    }

    #[test]
    fn test_field_without_type_is_rejected() {
        let proto = FieldDescriptorProto {
            name: Some("broken".to_string()),
            number: Some(1),
            ..Default::default()
        };
        let err = FieldSchema::from_proto(&proto).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_file_without_name_is_rejected() {
        let proto = FileDescriptorProto::default();
        assert!(SchemaFile::from_proto(&proto).is_err());
    }

    #[test]
    fn test_empty_package_is_omitted() {
        let file = SchemaFile::new("plain.proto");
        assert!(file.to_proto().package.is_none());
    }

    #[test]
    fn test_message_encoding_occurs_in_file_encoding() {
        let file = sample_file();
        let blob = file.serialized();
        let needle = file.messages[0].encode_to_vec();
        assert!(blob.windows(needle.len()).any(|w| w == needle.as_slice()));
    }

    #[test]
    fn test_number_range_is_half_open() {
        let range = NumberRange { start: 100, end: 200 };
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
    }
}
