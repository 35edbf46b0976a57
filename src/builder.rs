//! Type Builder
//!
//! Materializes a linked [`SchemaFile`] into registry types in two phases:
//!
//! 1. **Stub phase** builds every enum, then every message with nested types
//!    before their parents, leaving foreign type links unset.
//! 2. **Patch phase** attaches resolved message/enum ids to field descriptors,
//!    sets containing-type back references and registers each extension on
//!    the message it extends.
//!
//! Targets of a patch are always found by name in the registry, which holds
//! types from this file and from every file built before it.

use tracing::{debug, trace, warn};

use crate::checksum::Checksum;
use crate::config::BuilderConfig;
use crate::defaults;
use crate::error::{Result, SchemaError};
use crate::linker::{child_name, package_scope, scope_name, Linker, NodeKey};
use crate::registry::{FileEntry, TypeRegistry};
use crate::schema::{EnumSchema, FieldSchema, FieldType, MessageSchema, SchemaFile};
use crate::types::{
    ByteRange, EnumId, EnumType, EnumValue, FieldDescriptor, MessageId, MessageType, TypeRef,
};

/// Builds registry types for files already added to a [`Linker`]
pub struct TypeBuilder<'a> {
    linker: &'a Linker,
    registry: &'a mut TypeRegistry,
    config: BuilderConfig,
}

/// Per-file state shared by both phases
struct FileContext<'f> {
    file: &'f SchemaFile,
    blob: bytes::Bytes,
    types: Vec<TypeRef>,
}

impl<'a> TypeBuilder<'a> {
    pub fn new(linker: &'a Linker, registry: &'a mut TypeRegistry) -> Self {
        Self::with_config(linker, registry, BuilderConfig::default())
    }

    pub fn with_config(
        linker: &'a Linker,
        registry: &'a mut TypeRegistry,
        config: BuilderConfig,
    ) -> Self {
        Self {
            linker,
            registry,
            config,
        }
    }

    /// Build every type of `file` into the registry
    pub fn build(&mut self, file: &SchemaFile) -> Result<()> {
        let mut ctx = FileContext {
            file,
            blob: file.serialized(),
            types: Vec::new(),
        };
        let scope = scope_name(&package_scope(&file.package));

        // Stub phase
        for enum_schema in &file.enums {
            self.stub_enum(&mut ctx, &scope, enum_schema)?;
        }
        for message in &file.messages {
            self.stub_nested_enums(&mut ctx, &scope, message)?;
        }
        for message in &file.messages {
            self.stub_message(&mut ctx, &scope, message)?;
        }
        let mut file_extensions = file
            .extensions
            .iter()
            .map(|ext| {
                let fq = child_name(&scope, &ext.field.name);
                self.field_descriptor(&NodeKey::Extension(fq), &ext.field)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            file = %file.name,
            types = ctx.types.len(),
            "built type stubs"
        );

        // Patch phase
        for message in &file.messages {
            self.patch_message(&scope, message)?;
        }
        for descriptor in &mut file_extensions {
            self.patch_links(descriptor)?;
            self.bind_extension(descriptor, None)?;
        }

        self.registry.add_file(FileEntry {
            name: file.name.clone(),
            package: file.package.clone(),
            checksum: Checksum::from_bytes(&ctx.blob),
            serialized: ctx.blob,
            types: ctx.types,
            extensions: file_extensions,
        })?;
        debug!(file = %file.name, "built schema file");
        Ok(())
    }

    // ========== Stub phase ==========

    fn stub_nested_enums(
        &mut self,
        ctx: &mut FileContext<'_>,
        scope: &str,
        message: &MessageSchema,
    ) -> Result<()> {
        let fq = child_name(scope, &message.name);
        for nested in &message.nested_messages {
            self.stub_nested_enums(ctx, &fq, nested)?;
        }
        for enum_schema in &message.nested_enums {
            self.stub_enum(ctx, &fq, enum_schema)?;
        }
        Ok(())
    }

    fn stub_enum(
        &mut self,
        ctx: &mut FileContext<'_>,
        scope: &str,
        enum_schema: &EnumSchema,
    ) -> Result<EnumId> {
        let fq = child_name(scope, &enum_schema.name);
        let values = enum_schema
            .values
            .iter()
            .enumerate()
            .map(|(index, v)| EnumValue {
                name: v.name.clone(),
                number: v.number,
                index,
            })
            .collect();

        let mut enum_type = EnumType::new(
            enum_schema.name.clone(),
            fq.trim_start_matches('.').to_string(),
            ctx.file.name.clone(),
            values,
        );
        enum_type.byte_range = self.locate(ctx, &fq, &enum_schema.serialized())?;

        let id = self.registry.add_enum(enum_type)?;
        ctx.types.push(TypeRef::Enum(id));
        trace!(name = %fq, "enum stub");
        Ok(id)
    }

    fn stub_message(
        &mut self,
        ctx: &mut FileContext<'_>,
        scope: &str,
        message: &MessageSchema,
    ) -> Result<MessageId> {
        let fq = child_name(scope, &message.name);

        let nested_types = message
            .nested_messages
            .iter()
            .map(|nested| self.stub_message(ctx, &fq, nested))
            .collect::<Result<Vec<_>>>()?;
        let nested_enums = message
            .nested_enums
            .iter()
            .map(|e| {
                let enum_fq = child_name(&fq, &e.name);
                self.registry
                    .enum_id(&enum_fq)
                    .ok_or(SchemaError::UnresolvedReference {
                        reference: enum_fq,
                        from: fq.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let fields = message
            .fields
            .iter()
            .map(|f| self.field_descriptor(&NodeKey::Field(child_name(&fq, &f.name)), f))
            .collect::<Result<Vec<_>>>()?;
        let extensions = message
            .extensions
            .iter()
            .map(|ext| {
                self.field_descriptor(&NodeKey::Extension(child_name(&fq, &ext.field.name)), &ext.field)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut message_type = MessageType::new(
            message.name.clone(),
            fq.trim_start_matches('.').to_string(),
            ctx.file.name.clone(),
            fields,
        );
        message_type.extensions = extensions;
        message_type.nested_types = nested_types;
        message_type.nested_enums = nested_enums;
        message_type.extension_ranges = message.extension_ranges.clone();
        message_type.byte_range = self.locate(ctx, &fq, &message.serialized())?;

        let id = self.registry.add_message(message_type)?;
        ctx.types.push(TypeRef::Message(id));
        trace!(name = %fq, "message stub");
        Ok(id)
    }

    fn field_descriptor(&self, key: &NodeKey, field: &FieldSchema) -> Result<FieldDescriptor> {
        let full_name = key.name().trim_start_matches('.').to_string();
        check_field_type(&full_name, field)?;

        let enum_type = self
            .linker
            .enum_type_of(key)
            .and_then(|name| self.registry.enum_by_name(name));
        if field.field_type == FieldType::Enum && enum_type.is_none() {
            return Err(SchemaError::UnresolvedReference {
                reference: field.type_name.clone().unwrap_or_default(),
                from: key.name().to_string(),
            });
        }

        let default_value = defaults::materialize(field, enum_type, &full_name)?;

        Ok(FieldDescriptor {
            name: field.name.clone(),
            full_name,
            number: field.number,
            field_type: field.field_type,
            label: field.label,
            default_value,
            has_default_value: field.default_value.is_some(),
            is_extension: matches!(key, NodeKey::Extension(_)),
            packed: field.is_packed(),
            message_type: None,
            message_type_name: self
                .linker
                .message_type_of(key)
                .map(|name| name.trim_start_matches('.').to_string()),
            enum_type: None,
            containing_type: None,
            extension_scope: None,
        })
    }

    fn locate(&self, ctx: &FileContext<'_>, fq: &str, node: &[u8]) -> Result<Option<ByteRange>> {
        let found = ctx
            .blob
            .windows(node.len().max(1))
            .position(|window| window == node);
        match found {
            Some(start) => Ok(Some(ByteRange {
                start,
                end: start + node.len(),
            })),
            None if self.config.require_byte_ranges => Err(SchemaError::SerializedRangeNotFound {
                name: fq.to_string(),
                file: ctx.file.name.clone(),
            }),
            None => {
                warn!(name = %fq, file = %ctx.file.name, "serialized form not found in schema blob");
                Ok(None)
            }
        }
    }

    // ========== Patch phase ==========

    fn patch_message(&mut self, scope: &str, message: &MessageSchema) -> Result<()> {
        let fq = child_name(scope, &message.name);
        for nested in &message.nested_messages {
            self.patch_message(&fq, nested)?;
        }

        let id = self.message_id(&fq)?;

        let mut fields = std::mem::take(&mut self.registry.message_mut(id).fields);
        let mut patched = Ok(());
        for field in &mut fields {
            field.containing_type = Some(id);
            patched = self.patch_links(field);
            if patched.is_err() {
                break;
            }
        }
        self.registry.message_mut(id).fields = fields;
        patched?;

        if let Some(parent) = self.linker.parent_of(&NodeKey::Type(fq.clone())) {
            let parent_id = self.message_id(parent)?;
            self.registry.message_mut(id).containing_type = Some(parent_id);
        }
        for enum_schema in &message.nested_enums {
            let enum_fq = child_name(&fq, &enum_schema.name);
            if let Some(enum_id) = self.registry.enum_id(&enum_fq) {
                self.registry.enum_mut(enum_id).containing_type = Some(id);
            }
        }

        let mut extensions = std::mem::take(&mut self.registry.message_mut(id).extensions);
        let mut bound = Ok(());
        for extension in &mut extensions {
            bound = self.patch_links(extension);
            if bound.is_ok() {
                bound = self.bind_extension(extension, Some(id));
            }
            if bound.is_err() {
                break;
            }
        }
        self.registry.message_mut(id).extensions = extensions;
        bound
    }

    /// Attach the resolved message or enum type to a descriptor
    fn patch_links(&self, descriptor: &mut FieldDescriptor) -> Result<()> {
        let fq = format!(".{}", descriptor.full_name);
        let key = if descriptor.is_extension {
            NodeKey::Extension(fq)
        } else {
            NodeKey::Field(fq)
        };

        if let Some(target) = self.linker.message_type_of(&key) {
            descriptor.message_type = Some(self.message_id(target)?);
        }
        if let Some(target) = self.linker.enum_type_of(&key) {
            descriptor.enum_type = Some(self.registry.enum_id(target).ok_or_else(|| {
                SchemaError::UnresolvedReference {
                    reference: target.to_string(),
                    from: key.name().to_string(),
                }
            })?);
        }
        Ok(())
    }

    /// Register an extension on the message it extends
    fn bind_extension(&mut self, extension: &mut FieldDescriptor, scope: Option<MessageId>) -> Result<()> {
        let linker = self.linker;
        let fq = format!(".{}", extension.full_name);
        let target = linker
            .extension_target_of(&fq)
            .ok_or_else(|| SchemaError::InvalidExtension {
                extension: fq.clone(),
                reason: "extension was not linked".to_string(),
            })?;
        let target_id = self.message_id(target)?;

        extension.containing_type = Some(target_id);
        extension.extension_scope = scope;

        let extendee = self.registry.message_mut(target_id);
        if !extendee.extension_ranges.iter().any(|r| r.contains(extension.number)) {
            warn!(
                extension = %fq,
                number = extension.number,
                extendee = %extendee.full_name,
                "extension number outside declared extension ranges"
            );
        }
        extendee
            .extensions_by_name
            .insert(extension.full_name.clone(), extension.clone());
        trace!(extension = %fq, extendee = %target, "registered extension");
        Ok(())
    }

    fn message_id(&self, name: &str) -> Result<MessageId> {
        self.registry
            .message_id(name)
            .ok_or_else(|| SchemaError::UnresolvedReference {
                reference: name.to_string(),
                from: "type builder".to_string(),
            })
    }
}

/// Reject field kinds the builder cannot materialize
fn check_field_type(full_name: &str, field: &FieldSchema) -> Result<()> {
    let has_reference = field.type_name.as_deref().is_some_and(|r| !r.is_empty());
    let unsupported = match field.field_type {
        FieldType::Group => true,
        FieldType::Message | FieldType::Enum => false,
        _ => has_reference,
    };
    if unsupported {
        return Err(SchemaError::UnsupportedFieldType {
            field: full_name.to_string(),
            field_type: field.field_type.to_string(),
        });
    }
    Ok(())
}
