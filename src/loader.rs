//! Schema Set Loader
//!
//! Links and builds a bundle of interdependent [`SchemaFile`]s into one
//! [`TypeRegistry`]. Dependencies are always built before their dependents;
//! all files share a single [`Linker`] so cross-file references resolve.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::builder::TypeBuilder;
use crate::config::{BuilderConfig, LoaderConfig, SchemaConfig};
use crate::error::{Result, SchemaError};
use crate::linker::Linker;
use crate::registry::TypeRegistry;
use crate::schema::SchemaFile;

/// A linked and built schema set
#[derive(Debug)]
pub struct SchemaSet {
    registry: TypeRegistry,
    linker: Linker,
    build_order: Vec<String>,
    /// File -> dependency edges
    graph: DiGraph<String, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl SchemaSet {
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    /// File names in the order they were built
    pub fn build_order(&self) -> &[String] {
        &self.build_order
    }

    pub fn into_registry(self) -> TypeRegistry {
        self.registry
    }

    /// Files `file` declares as dependencies
    pub fn dependencies(&self, file: &str) -> Vec<&str> {
        self.neighbors(file, Direction::Outgoing)
    }

    /// Files declaring `file` as a dependency
    pub fn dependents(&self, file: &str) -> Vec<&str> {
        self.neighbors(file, Direction::Incoming)
    }

    fn neighbors(&self, file: &str, direction: Direction) -> Vec<&str> {
        let Some(&node_idx) = self.node_indices.get(file) else {
            return Vec::new();
        };

        let mut names: Vec<&str> = self
            .graph
            .edges_directed(node_idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph.node_weight(other).map(String::as_str)
            })
            .collect();
        names.sort_unstable();
        names
    }
}

/// Builds schema sets from bundles, descriptor sets or directories
#[derive(Debug, Clone, Default)]
pub struct SchemaSetLoader {
    builder: BuilderConfig,
    loader: LoaderConfig,
}

impl SchemaSetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &SchemaConfig) -> Self {
        Self {
            builder: config.builder.clone(),
            loader: config.loader.clone(),
        }
    }

    /// Link and build every file of `files`
    ///
    /// Files are visited in bundle order, each after its dependencies.
    pub fn load(&self, files: &[SchemaFile]) -> Result<SchemaSet> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(files.len());
        let mut graph = DiGraph::with_capacity(files.len(), files.len() * 2);
        let mut node_indices = HashMap::with_capacity(files.len());

        for (i, file) in files.iter().enumerate() {
            if index.insert(file.name.as_str(), i).is_some() {
                return Err(SchemaError::DuplicateFile(file.name.clone()));
            }
            node_indices.insert(file.name.clone(), graph.add_node(file.name.clone()));
        }
        for file in files {
            let from_idx = node_indices[&file.name];
            for dependency in &file.dependencies {
                if let Some(&to_idx) = node_indices.get(dependency) {
                    graph.add_edge(from_idx, to_idx, ());
                }
            }
        }

        let mut traversal = Traversal {
            files,
            index: &index,
            builder: &self.builder,
            linker: Linker::new(),
            registry: TypeRegistry::new(),
            done: HashSet::with_capacity(files.len()),
            path: Vec::new(),
            order: Vec::with_capacity(files.len()),
        };
        for i in 0..files.len() {
            traversal.visit(i)?;
        }

        info!(
            files = traversal.order.len(),
            messages = traversal.registry.message_count(),
            enums = traversal.registry.enum_count(),
            "loaded schema set"
        );

        Ok(SchemaSet {
            registry: traversal.registry,
            linker: traversal.linker,
            build_order: traversal.order,
            graph,
            node_indices,
        })
    }

    /// Load a serialized `FileDescriptorSet`
    pub fn load_descriptor_set(&self, bytes: &[u8]) -> Result<SchemaSet> {
        let files = SchemaFile::decode_set(bytes)?;
        self.load(&files)
    }

    /// Load every descriptor set file below `dir`
    ///
    /// A file repeated across descriptor sets with identical content is kept
    /// once; differing content under the same name is a `DuplicateFile`.
    pub fn load_directory(&self, dir: &Path) -> Result<SchemaSet> {
        let mut files: Vec<SchemaFile> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !self.is_descriptor_set(path) {
                continue;
            }

            let relative_str = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            if self
                .loader
                .skip_prefixes
                .iter()
                .any(|p| relative_str.starts_with(p))
            {
                continue;
            }

            let content = fs::read(path)?;
            let decoded = SchemaFile::decode_set(&content).map_err(|e| {
                SchemaError::InvalidDescriptor(format!("{}: {}", path.display(), e))
            })?;
            debug!(path = %relative_str, files = decoded.len(), "read descriptor set");

            for file in decoded {
                match seen.get(&file.name) {
                    Some(&i) if files[i].serialized() == file.serialized() => continue,
                    Some(_) => return Err(SchemaError::DuplicateFile(file.name)),
                    None => {
                        seen.insert(file.name.clone(), files.len());
                        files.push(file);
                    }
                }
            }
        }

        self.load(&files)
    }

    fn is_descriptor_set(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.loader.descriptor_extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }
}

/// Depth-first build state for one `load` call
struct Traversal<'s> {
    files: &'s [SchemaFile],
    index: &'s HashMap<&'s str, usize>,
    builder: &'s BuilderConfig,
    linker: Linker,
    registry: TypeRegistry,
    done: HashSet<&'s str>,
    /// Files currently being visited, outermost first
    path: Vec<&'s str>,
    order: Vec<String>,
}

impl<'s> Traversal<'s> {
    fn visit(&mut self, i: usize) -> Result<()> {
        let files = self.files;
        let file = &files[i];
        let name = file.name.as_str();
        if self.done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = self.path.iter().position(|&p| p == name) {
            let mut cycle: Vec<String> = self.path[pos..].iter().map(|p| p.to_string()).collect();
            cycle.push(name.to_string());
            return Err(SchemaError::CyclicDependency { cycle });
        }

        self.path.push(name);
        for dependency in &file.dependencies {
            let Some(&j) = self.index.get(dependency.as_str()) else {
                return Err(SchemaError::MissingDependency {
                    file: name.to_string(),
                    dependency: dependency.clone(),
                });
            };
            self.visit(j)?;
        }
        self.path.pop();

        self.linker.link(file)?;
        TypeBuilder::with_config(&self.linker, &mut self.registry, self.builder.clone())
            .build(file)?;

        self.done.insert(name);
        self.order.push(name.to_string());
        debug!(file = %name, position = self.order.len(), "built schema file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExtensionSchema, FieldSchema, FieldType, MessageSchema};
    use crate::types::TypeRef;
    use prost::Message;
    use prost_types::FileDescriptorSet;

    fn abc() -> Vec<SchemaFile> {
        let a = SchemaFile::new("a.proto")
            .with_package("demo")
            .with_message(MessageSchema::new("A").with_extension_range(100, 536_870_912));
        let b = SchemaFile::new("b.proto")
            .with_package("demo")
            .with_dependency("a.proto")
            .with_message(
                MessageSchema::new("B")
                    .with_field(FieldSchema::new("a", 1, FieldType::Message).with_type_name("A")),
            );
        let c = SchemaFile::new("c.proto")
            .with_package("demo")
            .with_dependency("b.proto")
            .with_dependency("a.proto")
            .with_message(
                MessageSchema::new("C")
                    .with_field(FieldSchema::new("b", 1, FieldType::Message).with_type_name("B")),
            )
            .with_extension(ExtensionSchema::new("A", FieldSchema::new("c_ext", 100, FieldType::Bool)));
        // Bundle order deliberately puts dependents first
        vec![c, b, a]
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependency_ordering() {
        let set = SchemaSetLoader::new().load(&abc()).unwrap();
        let order = set.build_order();
        assert_eq!(order.len(), 3);
        assert!(position(order, "a.proto") < position(order, "b.proto"));
        assert!(position(order, "b.proto") < position(order, "c.proto"));

        let registry = set.registry();
        let a_id = registry.message_id("demo.A").unwrap();
        let b = registry.message_by_name("demo.B").unwrap();
        assert_eq!(b.field_by_name("a").unwrap().message_type, Some(a_id));
        assert!(registry.message(a_id).extension_by_name(".demo.c_ext").is_some());
    }

    #[test]
    fn test_cycle_detected() {
        let mut files = abc();
        files[2] = files[2].clone().with_dependency("c.proto");

        let err = SchemaSetLoader::new().load(&files).unwrap_err();
        match err {
            SchemaError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a.proto".to_string()));
                assert!(cycle.contains(&"c.proto".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let files = vec![SchemaFile::new("lonely.proto").with_dependency("gone.proto")];
        let err = SchemaSetLoader::new().load(&files).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::MissingDependency { ref file, ref dependency }
                if file == "lonely.proto" && dependency == "gone.proto"
        ));
    }

    #[test]
    fn test_duplicate_file() {
        let files = vec![SchemaFile::new("x.proto"), SchemaFile::new("x.proto")];
        let err = SchemaSetLoader::new().load(&files).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateFile(name) if name == "x.proto"));
    }

    #[test]
    fn test_file_graph_queries() {
        let set = SchemaSetLoader::new().load(&abc()).unwrap();
        assert_eq!(set.dependencies("c.proto"), vec!["a.proto", "b.proto"]);
        assert_eq!(set.dependents("a.proto"), vec!["b.proto", "c.proto"]);
        assert!(set.dependencies("missing.proto").is_empty());
    }

    #[test]
    fn test_load_descriptor_set() {
        let set = FileDescriptorSet {
            file: abc().iter().map(SchemaFile::to_proto).collect(),
        };
        let loaded = SchemaSetLoader::new()
            .load_descriptor_set(&set.encode_to_vec())
            .unwrap();
        assert!(matches!(loaded.registry().lookup("demo.C"), Some(TypeRef::Message(_))));
        assert_eq!(loaded.registry().files().len(), 3);
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let files = abc();
        let first = FileDescriptorSet {
            file: vec![files[2].to_proto(), files[1].to_proto()],
        };
        // Second set repeats a.proto the way `--include_imports` output does
        let second = FileDescriptorSet {
            file: vec![files[2].to_proto(), files[0].to_proto()],
        };
        fs::write(dir.path().join("first.pb"), first.encode_to_vec()).unwrap();
        fs::write(dir.path().join("second.desc"), second.encode_to_vec()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a descriptor").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/stale.pb"), b"\xff\xff").unwrap();

        let set = SchemaSetLoader::new().load_directory(dir.path()).unwrap();
        assert_eq!(set.build_order().len(), 3);
        assert!(set.registry().message_by_name("demo.C").is_some());
    }
}
