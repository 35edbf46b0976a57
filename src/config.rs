//! Configuration management
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (runtime-schema.toml)
//! - Environment variables (RUNTIME_SCHEMA__*)
//!
//! ## Example config file (runtime-schema.toml):
//! ```toml
//! [builder]
//! require_byte_ranges = true
//!
//! [loader]
//! descriptor_extensions = ["pb", "desc"]
//! skip_prefixes = ["target/"]
//!
//! [framing]
//! request_enum = "request_msgid"
//! response_enum = "response_msgid"
//! max_frame_len = 67108864
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Type builder settings
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Schema set loading settings
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Request/response framing settings
    #[serde(default)]
    pub framing: FramingConfig,
}

/// Type builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Fail when an entity's serialized form cannot be located in its file
    /// blob. When false the entity is built without a byte range.
    #[serde(default = "default_true")]
    pub require_byte_ranges: bool,
}

/// Schema set loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// File extensions treated as serialized descriptor sets
    #[serde(default = "default_descriptor_extensions")]
    pub descriptor_extensions: Vec<String>,

    /// Skip files whose relative path starts with one of these prefixes
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

/// Framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Enum whose values number the request messages
    #[serde(default = "default_request_enum")]
    pub request_enum: String,

    /// Enum whose values number the response messages
    #[serde(default = "default_response_enum")]
    pub response_enum: String,

    /// Largest accepted frame, length prefix excluded
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_descriptor_extensions() -> Vec<String> {
    vec!["pb".to_string(), "desc".to_string(), "protoset".to_string()]
}

fn default_skip_prefixes() -> Vec<String> {
    vec!["target/".to_string(), ".git/".to_string()]
}

fn default_request_enum() -> String {
    "request_msgid".to_string()
}

fn default_response_enum() -> String {
    "response_msgid".to_string()
}

fn default_max_frame_len() -> usize {
    64 * 1024 * 1024
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            require_byte_ranges: true,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            descriptor_extensions: default_descriptor_extensions(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            request_enum: default_request_enum(),
            response_enum: default_response_enum(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl SchemaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally adding a required config file
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = [
            "runtime-schema.toml",
            ".runtime-schema.toml",
            "config/runtime-schema.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "runtime-schema", "runtime-schema") {
            let xdg_config = config_dir.config_dir().join("runtime-schema.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (RUNTIME_SCHEMA__*)
        builder = builder.add_source(
            Environment::with_prefix("RUNTIME_SCHEMA")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
