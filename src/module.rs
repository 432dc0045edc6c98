use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// How a discovered directory participates in pipeline generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// An independent Terraform root (declares a provider or backend);
    /// becomes a node in the execution graph.
    Executable,
    /// A reusable module bundle referenced via local `module` sources;
    /// participates only in change-impact propagation.
    Library,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Executable => "executable",
            ModuleKind::Library => "library",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One directory treated as a Terraform module.
///
/// The ID is the workspace-relative path with forward slashes; it doubles as
/// the graph node key and the base for CI job names.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub kind: ModuleKind,
    /// `key` attribute of the `terraform { backend … }` block, after partial
    /// evaluation. Executable modules only; None when unresolved or absent.
    pub backend_key: Option<String>,
    /// Placeholder bindings from the path-template match (executables only).
    pub bindings: BTreeMap<String, String>,
}

impl Module {
    pub fn is_executable(&self) -> bool {
        self.kind == ModuleKind::Executable
    }
}

/// A non-fatal finding collected during discovery or extraction.
///
/// Diagnostics are reported once at the end of a run; they never abort it.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub module: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

/// Index over discovered modules, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: BTreeMap<String, Module>,
}

impl ModuleSet {
    /// Build the index. A repeated ID is fatal: IDs are the graph node keys
    /// and every later lookup assumes they are unique.
    pub fn new(modules: Vec<Module>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for module in modules {
            if map.contains_key(&module.id) {
                return Err(Error::graph(format!(
                    "duplicate module ID '{}'",
                    module.id
                )));
            }
            map.insert(module.id.clone(), module);
        }
        Ok(Self { modules: map })
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn executables(&self) -> impl Iterator<Item = &Module> {
        self.iter().filter(|m| m.is_executable())
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Module> {
        self.iter().filter(|m| m.kind == ModuleKind::Library)
    }

    /// Find the module owning the given directory, probing by absolute and
    /// by workspace-relative path.
    pub fn owner_of_dir(&self, dir: &Path) -> Option<&Module> {
        let normalized = normalize_slashes(dir);
        self.modules.values().find(|m| {
            m.abs_path == dir || m.rel_path == normalized || m.id == normalized
        })
    }

    /// Map of backend key → module ID over modules that declare one.
    ///
    /// Backend keys are the cross-module dependency pointers; collisions are
    /// reported by discovery before this index is built.
    pub fn backend_key_index(&self) -> BTreeMap<String, String> {
        let mut index = BTreeMap::new();
        for module in self.modules.values() {
            if let Some(key) = &module.backend_key {
                index.insert(key.clone(), module.id.clone());
            }
        }
        index
    }
}

/// Render a path with forward slashes regardless of platform.
pub fn normalize_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(id: &str, kind: ModuleKind, backend_key: Option<&str>) -> Module {
        Module {
            id: id.to_string(),
            abs_path: PathBuf::from("/work").join(id),
            rel_path: id.to_string(),
            kind,
            backend_key: backend_key.map(String::from),
            bindings: BTreeMap::new(),
        }
    }

    #[test]
    fn test_set_is_sorted_by_id() {
        let set = ModuleSet::new(vec![
            module("b/vpc", ModuleKind::Executable, None),
            module("a/vpc", ModuleKind::Executable, None),
        ])
        .unwrap();

        let ids: Vec<&str> = set.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a/vpc", "b/vpc"]);
    }

    #[test]
    fn test_backend_key_index() {
        let set = ModuleSet::new(vec![
            module(
                "platform/stage/eu-central-1/vpc",
                ModuleKind::Executable,
                Some("platform/stage/eu-central-1/vpc/terraform.tfstate"),
            ),
            module("_modules/kafka", ModuleKind::Library, None),
        ])
        .unwrap();

        let index = set.backend_key_index();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index["platform/stage/eu-central-1/vpc/terraform.tfstate"],
            "platform/stage/eu-central-1/vpc"
        );
    }

    #[test]
    fn test_owner_of_dir_matches_relative_and_absolute() {
        let set = ModuleSet::new(vec![module("a/vpc", ModuleKind::Executable, None)]).unwrap();

        assert!(set.owner_of_dir(Path::new("/work/a/vpc")).is_some());
        assert!(set.owner_of_dir(Path::new("a/vpc")).is_some());
        assert!(set.owner_of_dir(Path::new("a/eks")).is_none());
    }

    #[test]
    fn test_kind_partition() {
        let set = ModuleSet::new(vec![
            module("a/vpc", ModuleKind::Executable, None),
            module("_modules/kafka", ModuleKind::Library, None),
        ])
        .unwrap();

        assert_eq!(set.executables().count(), 1);
        assert_eq!(set.libraries().count(), 1);
    }

    #[test]
    fn test_duplicate_module_id_is_graph_error() {
        let err = ModuleSet::new(vec![
            module("a/vpc", ModuleKind::Executable, None),
            module("a/vpc", ModuleKind::Executable, Some("a/vpc/terraform.tfstate")),
        ])
        .unwrap_err();

        assert!(matches!(err, Error::Graph { .. }));
        assert!(err.to_string().contains("duplicate module ID 'a/vpc'"));
    }
}
