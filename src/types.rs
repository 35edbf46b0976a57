//! Runtime type objects
//!
//! Message and enum types live in the [`TypeRegistry`](crate::TypeRegistry)
//! arena and refer to each other through [`MessageId`] / [`EnumId`] indices,
//! so mutually recursive and forward references need no pointer juggling.
//! Everything here is read-only once the registry has been built.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::schema::{FieldType, Label, NumberRange};

/// Stable index of a message type in its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub(crate) usize);

impl MessageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Stable index of an enum type in its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnumId(pub(crate) usize);

impl EnumId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a fully-qualified name resolves to in a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Message(MessageId),
    Enum(EnumId),
}

/// Offsets of an entity's serialized form inside its file's schema blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a>(&self, blob: &'a [u8]) -> Option<&'a [u8]> {
        blob.get(self.start..self.end)
    }
}

/// Materialized default value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Message-typed fields carry no default
    Absent,
    /// Repeated fields default to an empty sequence
    EmptyList,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// Enum number
    Enum(i32),
    String(String),
    Bytes(Vec<u8>),
}

/// A resolved field or extension
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Fully-qualified name, without the leading `.`
    pub full_name: String,
    pub number: u32,
    pub field_type: FieldType,
    pub label: Label,
    pub default_value: DefaultValue,
    /// Whether the schema spelled out a default
    pub has_default_value: bool,
    pub is_extension: bool,
    pub packed: bool,
    pub message_type: Option<MessageId>,
    /// Fully-qualified name of `message_type`, without the leading `.`
    pub message_type_name: Option<String>,
    pub enum_type: Option<EnumId>,
    /// Declaring message for fields, extended message for extensions
    pub containing_type: Option<MessageId>,
    /// Message an extension was declared in, if any
    pub extension_scope: Option<MessageId>,
}

impl FieldDescriptor {
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label == Label::Required
    }
}

/// A runtime message type
#[derive(Debug, Clone, PartialEq)]
pub struct MessageType {
    pub name: String,
    /// Fully-qualified name, without the leading `.`
    pub full_name: String,
    /// Schema file that declared it
    pub file: String,
    pub fields: Vec<FieldDescriptor>,
    /// Extensions declared inside this message (not the ones extending it)
    pub extensions: Vec<FieldDescriptor>,
    pub nested_types: Vec<MessageId>,
    pub nested_enums: Vec<EnumId>,
    pub containing_type: Option<MessageId>,
    pub extension_ranges: Vec<NumberRange>,
    /// Extensions targeting this message, keyed by fully-qualified name
    pub extensions_by_name: BTreeMap<String, FieldDescriptor>,
    pub byte_range: Option<ByteRange>,
    pub(crate) fields_by_name: HashMap<String, usize>,
    pub(crate) fields_by_number: HashMap<u32, usize>,
}

impl MessageType {
    pub(crate) fn new(
        name: String,
        full_name: String,
        file: String,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        let fields_by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let fields_by_number = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.number, i))
            .collect();
        Self {
            name,
            full_name,
            file,
            fields,
            extensions: Vec::new(),
            nested_types: Vec::new(),
            nested_enums: Vec::new(),
            containing_type: None,
            extension_ranges: Vec::new(),
            extensions_by_name: BTreeMap::new(),
            byte_range: None,
            fields_by_name,
            fields_by_number,
        }
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields_by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields_by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Extension targeting this message, by its fully-qualified name
    pub fn extension_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.extensions_by_name.get(name.trim_start_matches('.'))
    }

    pub fn extension_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.extensions_by_name.values().find(|e| e.number == number)
    }

    pub fn is_extendable(&self) -> bool {
        !self.extension_ranges.is_empty()
    }
}

/// One value of an enum type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
    pub index: usize,
}

/// A runtime enum type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    /// Fully-qualified name, without the leading `.`
    pub full_name: String,
    pub file: String,
    pub values: Vec<EnumValue>,
    pub containing_type: Option<MessageId>,
    pub byte_range: Option<ByteRange>,
    values_by_name: HashMap<String, usize>,
    values_by_number: HashMap<i32, usize>,
}

impl EnumType {
    pub(crate) fn new(name: String, full_name: String, file: String, values: Vec<EnumValue>) -> Self {
        let values_by_name = values
            .iter()
            .map(|v| (v.name.clone(), v.index))
            .collect();
        // Aliased numbers resolve to the first declared name
        let mut values_by_number = HashMap::new();
        for value in &values {
            values_by_number.entry(value.number).or_insert(value.index);
        }
        Self {
            name,
            full_name,
            file,
            values,
            containing_type: None,
            byte_range: None,
            values_by_name,
            values_by_number,
        }
    }

    pub fn value_by_name(&self, name: &str) -> Option<&EnumValue> {
        self.values_by_name.get(name).map(|&i| &self.values[i])
    }

    pub fn value_by_number(&self, number: i32) -> Option<&EnumValue> {
        self.values_by_number.get(&number).map(|&i| &self.values[i])
    }

    /// The implicit default: the first declared value
    pub fn first_value(&self) -> Option<&EnumValue> {
        self.values.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str, number: i32, index: usize) -> EnumValue {
        EnumValue {
            name: name.to_string(),
            number,
            index,
        }
    }

    #[test]
    fn test_enum_alias_keeps_first_name() {
        let e = EnumType::new(
            "Mode".to_string(),
            "pkg.Mode".to_string(),
            "mode.proto".to_string(),
            vec![value("STARTED", 1, 0), value("RUNNING", 1, 1), value("STOPPED", 2, 2)],
        );
        assert_eq!(e.value_by_number(1).map(|v| v.name.as_str()), Some("STARTED"));
        assert_eq!(e.value_by_name("RUNNING").map(|v| v.number), Some(1));
        assert_eq!(e.first_value().map(|v| v.number), Some(1));
    }

    #[test]
    fn test_byte_range_slice() {
        let blob = b"0123456789";
        let range = ByteRange { start: 2, end: 5 };
        assert_eq!(range.slice(blob), Some(&b"234"[..]));
        assert_eq!(ByteRange { start: 8, end: 12 }.slice(blob), None);
    }
}
