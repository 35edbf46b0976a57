//! Type Registry
//!
//! Arena of every message and enum type built for one schema set, indexed by
//! fully-qualified name and by declaring file. A registry is only handed out
//! once its build completed; after that nothing mutates it, so it can be
//! shared across threads freely.

use std::collections::HashMap;

use bytes::Bytes;
use prost::Message;
use prost_types::{DescriptorProto, EnumDescriptorProto, EnumOptions, MessageOptions};
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};
use crate::types::{EnumId, EnumType, FieldDescriptor, MessageId, MessageType, TypeRef};

/// Types and extensions contributed by one schema file
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub package: String,
    pub checksum: Checksum,
    /// Serialized schema blob that byte ranges point into
    pub serialized: Bytes,
    /// Every message and enum declared in the file, nested ones included
    pub types: Vec<TypeRef>,
    /// Extensions declared at file scope
    pub extensions: Vec<FieldDescriptor>,
}

/// Result from a fuzzy type search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub full_name: String,
    pub kind: TypeKind,
    pub file: String,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Message,
    Enum,
}

/// Serializable summary of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryManifest {
    pub files: Vec<FileManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub name: String,
    pub package: String,
    pub checksum: Checksum,
    pub messages: Vec<String>,
    pub enums: Vec<String>,
    pub extensions: Vec<String>,
}

/// Registry of runtime types for one schema set
#[derive(Debug, Default)]
pub struct TypeRegistry {
    messages: Vec<MessageType>,
    enums: Vec<EnumType>,
    by_name: HashMap<String, TypeRef>,
    files: Vec<FileEntry>,
    file_index: HashMap<String, usize>,
}

impl TypeRegistry {
    /// Empty registry, to be filled by [`crate::TypeBuilder`]
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Lookup ==========

    /// Look up a type by fully-qualified name, with or without the leading `.`
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(name.trim_start_matches('.')).copied()
    }

    pub fn message(&self, id: MessageId) -> &MessageType {
        &self.messages[id.0]
    }

    pub fn enum_type(&self, id: EnumId) -> &EnumType {
        &self.enums[id.0]
    }

    pub fn message_by_name(&self, name: &str) -> Option<&MessageType> {
        match self.lookup(name)? {
            TypeRef::Message(id) => Some(self.message(id)),
            TypeRef::Enum(_) => None,
        }
    }

    pub fn enum_by_name(&self, name: &str) -> Option<&EnumType> {
        match self.lookup(name)? {
            TypeRef::Enum(id) => Some(self.enum_type(id)),
            TypeRef::Message(_) => None,
        }
    }

    pub fn message_id(&self, name: &str) -> Option<MessageId> {
        match self.lookup(name)? {
            TypeRef::Message(id) => Some(id),
            TypeRef::Enum(_) => None,
        }
    }

    pub fn enum_id(&self, name: &str) -> Option<EnumId> {
        match self.lookup(name)? {
            TypeRef::Enum(id) => Some(id),
            TypeRef::Message(_) => None,
        }
    }

    /// Resolved message type of a field, if it is message-typed
    pub fn field_message_type(&self, field: &FieldDescriptor) -> Option<&MessageType> {
        field.message_type.map(|id| self.message(id))
    }

    /// Resolved enum type of a field, if it is enum-typed
    pub fn field_enum_type(&self, field: &FieldDescriptor) -> Option<&EnumType> {
        field.enum_type.map(|id| self.enum_type(id))
    }

    pub fn messages(&self) -> impl Iterator<Item = (MessageId, &MessageType)> {
        self.messages.iter().enumerate().map(|(i, m)| (MessageId(i), m))
    }

    pub fn enums(&self) -> impl Iterator<Item = (EnumId, &EnumType)> {
        self.enums.iter().enumerate().map(|(i, e)| (EnumId(i), e))
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn enum_count(&self) -> usize {
        self.enums.len()
    }

    /// Files in build order
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.file_index.get(name).map(|&i| &self.files[i])
    }

    /// Every type declared in `file`, in declaration walk order
    pub fn types_in_file(&self, file: &str) -> &[TypeRef] {
        self.file(file).map(|f| f.types.as_slice()).unwrap_or_default()
    }

    /// Extensions declared at the top level of `file`
    pub fn file_extensions(&self, file: &str) -> &[FieldDescriptor] {
        self.file(file)
            .map(|f| f.extensions.as_slice())
            .unwrap_or_default()
    }

    // ========== Lazy option inspection ==========

    /// Serialized declaration of a message or enum, sliced out of its file blob
    pub fn serialized_slice(&self, ty: TypeRef) -> Option<&[u8]> {
        let (file, range) = match ty {
            TypeRef::Message(id) => {
                let m = self.message(id);
                (&m.file, m.byte_range?)
            }
            TypeRef::Enum(id) => {
                let e = self.enum_type(id);
                (&e.file, e.byte_range?)
            }
        };
        range.slice(&self.file(file)?.serialized)
    }

    /// Options of a message, decoded on demand from its serialized declaration
    pub fn message_options(&self, id: MessageId) -> Result<Option<MessageOptions>> {
        let Some(slice) = self.serialized_slice(TypeRef::Message(id)) else {
            return Ok(None);
        };
        Ok(DescriptorProto::decode(slice)?.options)
    }

    /// Options of an enum, decoded on demand from its serialized declaration
    pub fn enum_options(&self, id: EnumId) -> Result<Option<EnumOptions>> {
        let Some(slice) = self.serialized_slice(TypeRef::Enum(id)) else {
            return Ok(None);
        };
        Ok(EnumDescriptorProto::decode(slice)?.options)
    }

    // ========== Search & export ==========

    /// Search type names (fuzzy)
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let mut results: Vec<SearchResult> = Vec::new();

        for m in &self.messages {
            if let Some(score) = matcher.fuzzy_match(&m.full_name, query) {
                results.push(SearchResult {
                    full_name: m.full_name.clone(),
                    kind: TypeKind::Message,
                    file: m.file.clone(),
                    score,
                });
            }
        }
        for e in &self.enums {
            if let Some(score) = matcher.fuzzy_match(&e.full_name, query) {
                results.push(SearchResult {
                    full_name: e.full_name.clone(),
                    kind: TypeKind::Enum,
                    file: e.file.clone(),
                    score,
                });
            }
        }

        // Sort by score descending, then by name for stable output
        results.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.full_name.cmp(&b.full_name)));
        results.truncate(limit);
        results
    }

    pub fn manifest(&self) -> RegistryManifest {
        let files = self
            .files
            .iter()
            .map(|f| {
                let mut messages = Vec::new();
                let mut enums = Vec::new();
                for ty in &f.types {
                    match *ty {
                        TypeRef::Message(id) => messages.push(self.message(id).full_name.clone()),
                        TypeRef::Enum(id) => enums.push(self.enum_type(id).full_name.clone()),
                    }
                }
                FileManifest {
                    name: f.name.clone(),
                    package: f.package.clone(),
                    checksum: f.checksum.clone(),
                    messages,
                    enums,
                    extensions: f.extensions.iter().map(|e| e.full_name.clone()).collect(),
                }
            })
            .collect();
        RegistryManifest { files }
    }

    /// Manifest as pretty-printed JSON
    pub fn manifest_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.manifest())?)
    }

    // ========== Construction (builder only) ==========

    pub(crate) fn add_message(&mut self, message: MessageType) -> Result<MessageId> {
        let id = MessageId(self.messages.len());
        self.insert_name(&message.full_name, TypeRef::Message(id))?;
        self.messages.push(message);
        Ok(id)
    }

    pub(crate) fn add_enum(&mut self, enum_type: EnumType) -> Result<EnumId> {
        let id = EnumId(self.enums.len());
        self.insert_name(&enum_type.full_name, TypeRef::Enum(id))?;
        self.enums.push(enum_type);
        Ok(id)
    }

    fn insert_name(&mut self, full_name: &str, ty: TypeRef) -> Result<()> {
        if self.by_name.contains_key(full_name) {
            return Err(SchemaError::DuplicateName {
                name: format!(".{}", full_name),
            });
        }
        self.by_name.insert(full_name.to_string(), ty);
        Ok(())
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> &mut MessageType {
        &mut self.messages[id.0]
    }

    pub(crate) fn enum_mut(&mut self, id: EnumId) -> &mut EnumType {
        &mut self.enums[id.0]
    }

    pub(crate) fn add_file(&mut self, entry: FileEntry) -> Result<()> {
        if self.file_index.contains_key(&entry.name) {
            return Err(SchemaError::DuplicateFile(entry.name));
        }
        self.file_index.insert(entry.name.clone(), self.files.len());
        self.files.push(entry);
        Ok(())
    }
}
