//! Schema Linker
//!
//! Two-pass name resolution over one or more [`SchemaFile`]s sharing a single
//! type space. Pass 1 registers every message and enum under its
//! fully-qualified name and records lexical parents. Pass 2 resolves field
//! type references and extension targets using protobuf scoping rules
//! (innermost enclosing scope wins).
//!
//! A linker only grows: files added later may reference anything registered
//! by earlier files, which is what cross-file extensions rely on.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::{Result, SchemaError};
use crate::schema::{
    EnumSchema, ExtensionSchema, FieldSchema, FieldType, MessageSchema, SchemaFile,
};

/// What a fully-qualified name denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Message { extendable: bool },
    Enum,
}

/// An entry in the name table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclarationKind,
    /// Schema file that declared it
    pub file: String,
}

/// Composite key identifying a schema node by fully-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// A message or enum
    Type(String),
    /// A regular message field
    Field(String),
    /// An extension field, keyed by its declaration scope
    Extension(String),
}

impl NodeKey {
    pub fn name(&self) -> &str {
        match self {
            NodeKey::Type(name) | NodeKey::Field(name) | NodeKey::Extension(name) => name,
        }
    }
}

/// Fully-qualified name of a scope given as name components
pub fn scope_name(scope: &[String]) -> String {
    if scope.is_empty() {
        String::new()
    } else {
        format!(".{}", scope.join("."))
    }
}

/// Fully-qualified name of `name` declared inside the scope named `parent`
pub fn child_name(parent: &str, name: &str) -> String {
    format!("{}.{}", parent, name)
}

/// Name components of a package (`"a.b"` -> `["a", "b"]`)
pub fn package_scope(package: &str) -> Vec<String> {
    package
        .split('.')
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

/// Name table and cross-reference graph for one schema set
#[derive(Debug, Default)]
pub struct Linker {
    names: HashMap<String, Declaration>,
    parents: HashMap<NodeKey, Option<String>>,
    message_of_field: HashMap<NodeKey, String>,
    enum_of_field: HashMap<NodeKey, String>,
    extension_targets: HashMap<String, String>,
    files: Vec<String>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and resolve every declaration of `file`
    pub fn link(&mut self, file: &SchemaFile) -> Result<()> {
        let mut scope = package_scope(&file.package);
        let before = self.names.len();

        self.register(&file.name, &mut scope, None, &file.messages, &file.enums, &file.extensions)?;
        debug!(
            file = %file.name,
            declarations = self.names.len() - before,
            "registered schema declarations"
        );

        self.resolve_scope(&mut scope, &file.messages, &file.extensions)?;
        self.files.push(file.name.clone());
        debug!(file = %file.name, "linked schema file");
        Ok(())
    }

    fn register(
        &mut self,
        file: &str,
        scope: &mut Vec<String>,
        parent: Option<&str>,
        messages: &[MessageSchema],
        enums: &[EnumSchema],
        extensions: &[ExtensionSchema],
    ) -> Result<()> {
        let scope_fq = scope_name(scope);

        for enum_schema in enums {
            let fq = child_name(&scope_fq, &enum_schema.name);
            self.declare(fq.clone(), DeclarationKind::Enum, file)?;
            self.parents
                .insert(NodeKey::Type(fq), parent.map(String::from));
        }

        for message in messages {
            let fq = child_name(&scope_fq, &message.name);
            let kind = DeclarationKind::Message {
                extendable: message.is_extendable(),
            };
            self.declare(fq.clone(), kind, file)?;
            self.parents
                .insert(NodeKey::Type(fq.clone()), parent.map(String::from));

            for field in &message.fields {
                self.parents
                    .insert(NodeKey::Field(child_name(&fq, &field.name)), Some(fq.clone()));
            }

            scope.push(message.name.clone());
            let nested = self.register(
                file,
                scope,
                Some(&fq),
                &message.nested_messages,
                &message.nested_enums,
                &message.extensions,
            );
            scope.pop();
            nested?;
        }

        for extension in extensions {
            let key = NodeKey::Extension(child_name(&scope_fq, &extension.field.name));
            self.parents.insert(key, parent.map(String::from));
        }

        Ok(())
    }

    fn declare(&mut self, fq: String, kind: DeclarationKind, file: &str) -> Result<()> {
        if self.names.contains_key(&fq) {
            return Err(SchemaError::DuplicateName { name: fq });
        }
        trace!(name = %fq, ?kind, "declared");
        self.names.insert(
            fq,
            Declaration {
                kind,
                file: file.to_string(),
            },
        );
        Ok(())
    }

    fn resolve_scope(
        &mut self,
        scope: &mut Vec<String>,
        messages: &[MessageSchema],
        extensions: &[ExtensionSchema],
    ) -> Result<()> {
        for message in messages {
            scope.push(message.name.clone());
            let message_fq = scope_name(scope);

            let mut result = Ok(());
            for field in &message.fields {
                let key = NodeKey::Field(child_name(&message_fq, &field.name));
                result = self.link_field(scope, key, field);
                if result.is_err() {
                    break;
                }
            }
            if result.is_ok() {
                result = self.resolve_scope(scope, &message.nested_messages, &message.extensions);
            }
            scope.pop();
            result?;
        }

        for extension in extensions {
            let fq = child_name(&scope_name(scope), &extension.field.name);
            if extension.extendee.is_empty() {
                return Err(SchemaError::InvalidExtension {
                    extension: fq,
                    reason: "extension has an empty extendee".to_string(),
                });
            }

            let target = self.resolve(scope, &extension.extendee, &fq)?;
            match self.names.get(&target).map(|d| d.kind) {
                Some(DeclarationKind::Message { extendable: true }) => {}
                Some(DeclarationKind::Message { extendable: false }) => {
                    return Err(SchemaError::InvalidExtension {
                        extension: fq,
                        reason: format!("{} declares no extension ranges", target),
                    });
                }
                _ => {
                    return Err(SchemaError::InvalidExtension {
                        extension: fq,
                        reason: format!("{} is not a message", target),
                    });
                }
            }
            trace!(extension = %fq, extendee = %target, "bound extension");
            self.extension_targets.insert(fq.clone(), target);

            self.link_field(scope, NodeKey::Extension(fq), &extension.field)?;
        }

        Ok(())
    }

    fn link_field(&mut self, scope: &[String], key: NodeKey, field: &FieldSchema) -> Result<()> {
        if field.field_type == FieldType::Group {
            return Err(SchemaError::UnsupportedFieldType {
                field: key.name().to_string(),
                field_type: field.field_type.to_string(),
            });
        }

        let reference = field.type_name.as_deref().filter(|r| !r.is_empty());
        let reference = match (reference, field.field_type) {
            (Some(reference), FieldType::Message | FieldType::Enum) => reference,
            (Some(reference), other) => {
                return Err(SchemaError::TypeMismatch {
                    field: key.name().to_string(),
                    reason: format!("references '{}' but is declared as {}", reference, other),
                });
            }
            (None, ty @ (FieldType::Message | FieldType::Enum)) => {
                return Err(SchemaError::TypeMismatch {
                    field: key.name().to_string(),
                    reason: format!("declared as {} without a type reference", ty),
                });
            }
            (None, _) => return Ok(()),
        };

        let target = self.resolve(scope, reference, key.name())?;
        let kind = self.names.get(&target).map(|d| d.kind);
        match (field.field_type, kind) {
            (FieldType::Message, Some(DeclarationKind::Message { .. })) => {
                trace!(field = %key.name(), message = %target, "resolved message field");
                self.message_of_field.insert(key, target);
            }
            (FieldType::Enum, Some(DeclarationKind::Enum)) => {
                trace!(field = %key.name(), enum_type = %target, "resolved enum field");
                self.enum_of_field.insert(key, target);
            }
            (declared, _) => {
                return Err(SchemaError::TypeMismatch {
                    field: key.name().to_string(),
                    reason: format!("declared as {} but '{}' resolves to {}", declared, reference, target),
                });
            }
        }
        Ok(())
    }

    /// Resolve `reference` as seen from `scope` (name components).
    ///
    /// Absolute references are taken verbatim. Relative ones are tried against
    /// `scope`, then each enclosing scope, ending with the root.
    pub fn resolve(&self, scope: &[String], reference: &str, from: &str) -> Result<String> {
        if reference.starts_with('.') {
            if self.names.contains_key(reference) {
                return Ok(reference.to_string());
            }
            return Err(SchemaError::UnresolvedReference {
                reference: reference.to_string(),
                from: from.to_string(),
            });
        }

        let mut depth = scope.len();
        loop {
            let candidate = child_name(&scope_name(&scope[..depth]), reference);
            if self.names.contains_key(&candidate) {
                return Ok(candidate);
            }
            if depth == 0 {
                return Err(SchemaError::UnresolvedReference {
                    reference: reference.to_string(),
                    from: from.to_string(),
                });
            }
            depth -= 1;
        }
    }

    /// Lexical parent of a node; `None` for top-level declarations
    pub fn parent_of(&self, key: &NodeKey) -> Option<&str> {
        self.parents.get(key).and_then(|p| p.as_deref())
    }

    pub fn message_type_of(&self, field: &NodeKey) -> Option<&str> {
        self.message_of_field.get(field).map(String::as_str)
    }

    pub fn enum_type_of(&self, field: &NodeKey) -> Option<&str> {
        self.enum_of_field.get(field).map(String::as_str)
    }

    /// Fully-qualified name of the message an extension extends
    pub fn extension_target_of(&self, extension: &str) -> Option<&str> {
        self.extension_targets.get(extension).map(String::as_str)
    }

    pub fn is_extension(&self, name: &str) -> bool {
        self.parents.contains_key(&NodeKey::Extension(name.to_string()))
    }

    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.names.get(name)
    }

    /// Number of registered messages and enums
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Files linked so far, in link order
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_key(name: &str) -> NodeKey {
        NodeKey::Field(name.to_string())
    }

    #[test]
    fn test_duplicate_top_level_message() {
        let file = SchemaFile::new("dup.proto")
            .with_message(MessageSchema::new("Point"))
            .with_message(MessageSchema::new("Point"));

        let err = Linker::new().link(&file).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateName { name } if name == ".Point"));
    }

    #[test]
    fn test_duplicate_across_files() {
        let a = SchemaFile::new("a.proto")
            .with_package("shared")
            .with_enum(EnumSchema::new("Color").with_value("RED", 0));
        let b = SchemaFile::new("b.proto")
            .with_package("shared")
            .with_message(MessageSchema::new("Color"));

        let mut linker = Linker::new();
        linker.link(&a).unwrap();
        assert!(matches!(
            linker.link(&b),
            Err(SchemaError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_inner_scope_wins() {
        let file = SchemaFile::new("scope.proto")
            .with_package("pkg")
            .with_message(MessageSchema::new("Inner"))
            .with_message(
                MessageSchema::new("Outer")
                    .with_message(MessageSchema::new("Inner"))
                    .with_field(
                        FieldSchema::new("inner", 1, FieldType::Message).with_type_name("Inner"),
                    ),
            );

        let mut linker = Linker::new();
        linker.link(&file).unwrap();
        assert_eq!(
            linker.message_type_of(&field_key(".pkg.Outer.inner")),
            Some(".pkg.Outer.Inner")
        );
        assert_eq!(
            linker.parent_of(&NodeKey::Type(".pkg.Outer.Inner".to_string())),
            Some(".pkg.Outer")
        );
        assert_eq!(linker.parent_of(&NodeKey::Type(".pkg.Inner".to_string())), None);
    }

    #[test]
    fn test_search_climbs_into_parent_package() {
        let base = SchemaFile::new("base.proto")
            .with_package("corp")
            .with_enum(EnumSchema::new("Status").with_value("OK", 0));
        let svc = SchemaFile::new("svc.proto")
            .with_package("corp.billing")
            .with_dependency("base.proto")
            .with_message(
                MessageSchema::new("Invoice").with_field(
                    FieldSchema::new("status", 1, FieldType::Enum).with_type_name("Status"),
                ),
            );

        let mut linker = Linker::new();
        linker.link(&base).unwrap();
        linker.link(&svc).unwrap();
        assert_eq!(
            linker.enum_type_of(&field_key(".corp.billing.Invoice.status")),
            Some(".corp.Status")
        );
        assert_eq!(linker.files(), ["base.proto", "svc.proto"]);
    }

    #[test]
    fn test_absolute_reference_is_verbatim() {
        let file = SchemaFile::new("abs.proto")
            .with_package("pkg")
            .with_message(MessageSchema::new("Target"))
            .with_message(
                MessageSchema::new("Holder")
                    .with_message(MessageSchema::new("Target"))
                    .with_field(
                        FieldSchema::new("t", 1, FieldType::Message).with_type_name(".pkg.Target"),
                    ),
            );

        let mut linker = Linker::new();
        linker.link(&file).unwrap();
        assert_eq!(
            linker.message_type_of(&field_key(".pkg.Holder.t")),
            Some(".pkg.Target")
        );
    }

    #[test]
    fn test_unresolved_reference() {
        let file = SchemaFile::new("missing.proto").with_message(
            MessageSchema::new("Holder").with_field(
                FieldSchema::new("ghost", 1, FieldType::Message).with_type_name("Ghost"),
            ),
        );

        let err = Linker::new().link(&file).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnresolvedReference { reference, .. } if reference == "Ghost"
        ));
    }

    #[test]
    fn test_enum_reference_on_message_field() {
        let file = SchemaFile::new("mismatch.proto")
            .with_enum(EnumSchema::new("Kind").with_value("A", 0))
            .with_message(MessageSchema::new("Holder").with_field(
                FieldSchema::new("kind", 1, FieldType::Message).with_type_name("Kind"),
            ));

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_reference_on_scalar_field() {
        let file = SchemaFile::new("scalar.proto")
            .with_message(MessageSchema::new("Other"))
            .with_message(MessageSchema::new("Holder").with_field(
                FieldSchema::new("count", 1, FieldType::Int32).with_type_name("Other"),
            ));

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_message_field_without_reference() {
        let file = SchemaFile::new("bare.proto").with_message(
            MessageSchema::new("Holder").with_field(FieldSchema::new("m", 1, FieldType::Message)),
        );

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_group_is_unsupported() {
        let file = SchemaFile::new("group.proto").with_message(
            MessageSchema::new("Holder")
                .with_message(MessageSchema::new("Result"))
                .with_field(
                    FieldSchema::new("result", 1, FieldType::Group).with_type_name("Result"),
                ),
        );

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::UnsupportedFieldType { .. })
        ));
    }

    #[test]
    fn test_extension_binding() {
        let file = SchemaFile::new("ext.proto")
            .with_package("pkg")
            .with_message(MessageSchema::new("Target").with_extension_range(100, 200))
            .with_message(MessageSchema::new("Ext").with_extension(ExtensionSchema::new(
                "Target",
                FieldSchema::new("note", 100, FieldType::String),
            )));

        let mut linker = Linker::new();
        linker.link(&file).unwrap();
        assert!(linker.is_extension(".pkg.Ext.note"));
        assert_eq!(linker.extension_target_of(".pkg.Ext.note"), Some(".pkg.Target"));
        assert_eq!(
            linker.parent_of(&NodeKey::Extension(".pkg.Ext.note".to_string())),
            Some(".pkg.Ext")
        );
    }

    #[test]
    fn test_extension_of_non_extendable_message() {
        let file = SchemaFile::new("ext.proto")
            .with_message(MessageSchema::new("Target"))
            .with_extension(ExtensionSchema::new(
                "Target",
                FieldSchema::new("note", 100, FieldType::String),
            ));

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::InvalidExtension { .. })
        ));
    }

    #[test]
    fn test_extension_of_enum() {
        let file = SchemaFile::new("ext.proto")
            .with_enum(EnumSchema::new("Target").with_value("A", 0))
            .with_extension(ExtensionSchema::new(
                "Target",
                FieldSchema::new("note", 100, FieldType::String),
            ));

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::InvalidExtension { .. })
        ));
    }

    #[test]
    fn test_extension_without_extendee() {
        let file = SchemaFile::new("ext.proto").with_extension(ExtensionSchema::new(
            "",
            FieldSchema::new("note", 100, FieldType::String),
        ));

        assert!(matches!(
            Linker::new().link(&file),
            Err(SchemaError::InvalidExtension { .. })
        ));
    }
}
