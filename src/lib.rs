//! Runtime Schema
//!
//! Builds a fully cross-referenced, introspectable type registry from
//! serialized protobuf schema descriptors at runtime, with no code generation
//! step. The registry drives dynamic encoding, decoding, JSON conversion and
//! request/response framing of records whose layout is only known at load
//! time.
//!
//! ## Features
//!
//! - **Scoped Linking**: Two-pass name registration and resolution following
//!   protobuf scoping rules, across files sharing one name space
//! - **Two-Phase Building**: Stub then patch construction, so recursive and
//!   forward references need no special casing
//! - **Dependency Ordering**: Schema sets are built in dependency order with
//!   cycle and missing-file detection
//! - **Lazy Options**: Every type records where its declaration sits in the
//!   file blob; options are decoded on demand
//! - **Dynamic Records**: Encode/decode and JSON conversion against any
//!   registry message type
//!
//! ## Architecture
//!
//! ```text
//! descriptor bytes
//!   └── SchemaFile ──► Linker ──► TypeBuilder ──► TypeRegistry
//!                        ▲            ▲               │
//!                        └── SchemaSetLoader ─────────┤
//!                                                     ├── codec / json
//!                                                     └── framing
//! ```

pub mod builder;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod framing;
pub mod json;
pub mod linker;
pub mod loader;
pub mod registry;
pub mod schema;
pub mod types;

pub use builder::TypeBuilder;
pub use checksum::Checksum;
pub use codec::{DynamicMessage, Value};
pub use config::SchemaConfig;
pub use error::{Result, SchemaError};
pub use framing::{Direction, Frame, FrameDecoder, MessageIdTable, StreamDecoder};
pub use linker::{Linker, NodeKey};
pub use loader::{SchemaSet, SchemaSetLoader};
pub use registry::TypeRegistry;
pub use schema::{EnumSchema, ExtensionSchema, FieldSchema, FieldType, Label, MessageSchema, SchemaFile};
pub use types::{DefaultValue, EnumId, EnumType, FieldDescriptor, MessageId, MessageType, TypeRef};
