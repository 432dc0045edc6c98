use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::Result;
use crate::graph::{Dependency, EdgeKind, Graph};
use crate::module::{Module, ModuleKind, ModuleSet};

/// File extensions whose changes can affect a module's plan.
const CHANGE_SUFFIXES: &[&str] = &[".tf", ".tfvars", ".tf.json", ".terraform.lock.hcl"];

/// Provider of changed-file lists, normalized to workspace-relative
/// forward-slash paths. The git implementation lives in `git.rs`; tests
/// substitute their own.
pub trait ChangeSource {
    fn changed_since(&self, base_ref: Option<&str>) -> Result<Vec<String>>;
    fn uncommitted_changes(&self) -> Result<Vec<String>>;
}

/// Union of committed and uncommitted changes, deduplicated and sorted.
pub fn collect_changed_files(
    source: &dyn ChangeSource,
    base_ref: Option<&str>,
) -> Result<Vec<String>> {
    let mut files: BTreeSet<String> = source.changed_since(base_ref)?.into_iter().collect();
    files.extend(source.uncommitted_changes()?);
    Ok(files.into_iter().collect())
}

/// Map changed files to the set of affected executable modules.
///
/// Ownership is longest-prefix: each file is assigned to the nearest
/// ancestor directory that is a module. Library seeds are replaced by the
/// executables referencing them through library edges, and the result is
/// closed over reverse execution edges.
pub fn affected_modules(
    changed_files: &[String],
    root: &Path,
    modules: &ModuleSet,
    graph: &Graph,
    edges: &[Dependency],
) -> BTreeSet<String> {
    let mut seeds: BTreeSet<&str> = BTreeSet::new();

    for file in changed_files {
        if !is_relevant(file) {
            continue;
        }
        if let Some(module) = owning_module(modules, root, file) {
            seeds.insert(&module.id);
        }
    }

    let library_users = library_reverse_index(edges);
    let mut executable_seeds: BTreeSet<String> = BTreeSet::new();

    for seed in seeds {
        match modules.get(seed).map(|m| m.kind) {
            Some(ModuleKind::Library) => {
                executable_seeds.extend(library_dependents(seed, &library_users));
            }
            Some(ModuleKind::Executable) => {
                executable_seeds.insert(seed.to_string());
            }
            None => {}
        }
    }

    graph.impact_closure(executable_seeds.iter().map(String::as_str))
}

fn is_relevant(file: &str) -> bool {
    CHANGE_SUFFIXES.iter().any(|suffix| file.ends_with(suffix))
}

/// Climb from the file's directory toward the root until a module owns it.
fn owning_module<'a>(modules: &'a ModuleSet, root: &Path, file: &str) -> Option<&'a Module> {
    let mut dir = Path::new(file).parent();
    while let Some(current) = dir {
        if current.as_os_str().is_empty() {
            break;
        }
        let hit = modules
            .owner_of_dir(&root.join(current))
            .or_else(|| modules.owner_of_dir(current));
        if let Some(module) = hit {
            return Some(module);
        }
        dir = current.parent();
    }
    None
}

/// library module → executables referencing it, over library edges only.
fn library_reverse_index(edges: &[Dependency]) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut index: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in edges {
        if edge.kind == EdgeKind::Library {
            index
                .entry(edge.to.as_str())
                .or_default()
                .insert(edge.from.as_str());
        }
    }
    index
}

/// Transitive reverse walk over library edges starting from one library.
fn library_dependents(
    library: &str,
    index: &BTreeMap<&str, BTreeSet<&str>>,
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut queue = vec![library];
    let mut seen = BTreeSet::new();

    while let Some(current) = queue.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(users) = index.get(current) {
            for user in users {
                out.insert(user.to_string());
                queue.push(user);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use std::path::PathBuf;

    fn module(id: &str, kind: ModuleKind) -> Module {
        Module {
            id: id.to_string(),
            abs_path: PathBuf::from("/work").join(id),
            rel_path: id.to_string(),
            kind,
            backend_key: None,
            bindings: Map::new(),
        }
    }

    fn fixture() -> (ModuleSet, Graph, Vec<Dependency>) {
        let modules = ModuleSet::new(vec![
            module("platform/stage/eu-central-1/vpc", ModuleKind::Executable),
            module("platform/stage/eu-central-1/eks", ModuleKind::Executable),
            module("platform/stage/eu-central-1/msk-a", ModuleKind::Executable),
            module("platform/stage/eu-central-1/msk-b", ModuleKind::Executable),
            module("_modules/kafka", ModuleKind::Library),
        ])
        .unwrap();

        let edges = vec![
            Dependency {
                from: "platform/stage/eu-central-1/eks".into(),
                to: "platform/stage/eu-central-1/vpc".into(),
                kind: EdgeKind::Execution,
            },
            Dependency {
                from: "platform/stage/eu-central-1/msk-a".into(),
                to: "_modules/kafka".into(),
                kind: EdgeKind::Library,
            },
            Dependency {
                from: "platform/stage/eu-central-1/msk-b".into(),
                to: "_modules/kafka".into(),
                kind: EdgeKind::Library,
            },
        ];

        let graph = Graph::build(&modules, &edges).unwrap();
        (modules, graph, edges)
    }

    fn affected(files: &[&str]) -> BTreeSet<String> {
        let (modules, graph, edges) = fixture();
        let files: Vec<String> = files.iter().map(|s| s.to_string()).collect();
        affected_modules(&files, Path::new("/work"), &modules, &graph, &edges)
    }

    #[test]
    fn test_direct_change_expands_to_dependents() {
        let result = affected(&["platform/stage/eu-central-1/vpc/main.tf"]);

        let expected: BTreeSet<String> = [
            "platform/stage/eu-central-1/eks",
            "platform/stage/eu-central-1/vpc",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_leaf_change_stays_contained() {
        let result = affected(&["platform/stage/eu-central-1/eks/main.tf"]);
        assert_eq!(result.len(), 1);
        assert!(result.contains("platform/stage/eu-central-1/eks"));
    }

    #[test]
    fn test_irrelevant_extensions_are_filtered() {
        let result = affected(&[
            "platform/stage/eu-central-1/vpc/README.md",
            "platform/stage/eu-central-1/vpc/diagram.png",
        ]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_lock_file_counts_as_change() {
        let result = affected(&["platform/stage/eu-central-1/eks/.terraform.lock.hcl"]);
        assert!(result.contains("platform/stage/eu-central-1/eks"));
    }

    #[test]
    fn test_nested_file_owned_by_nearest_ancestor() {
        let result = affected(&["platform/stage/eu-central-1/eks/templates/userdata.tf"]);
        assert!(result.contains("platform/stage/eu-central-1/eks"));
    }

    #[test]
    fn test_unowned_files_are_dropped() {
        let result = affected(&["docs/architecture/overview.tf"]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_library_change_propagates_to_referencing_executables() {
        let result = affected(&["_modules/kafka/main.tf"]);

        let expected: BTreeSet<String> = [
            "platform/stage/eu-central-1/msk-a",
            "platform/stage/eu-central-1/msk-b",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_collect_changed_files_unions_and_dedups() {
        struct Stub;
        impl ChangeSource for Stub {
            fn changed_since(&self, _base: Option<&str>) -> Result<Vec<String>> {
                Ok(vec!["a/main.tf".into(), "b/main.tf".into()])
            }
            fn uncommitted_changes(&self) -> Result<Vec<String>> {
                Ok(vec!["b/main.tf".into(), "c/main.tf".into()])
            }
        }

        let files = collect_changed_files(&Stub, None).unwrap();
        assert_eq!(files, vec!["a/main.tf", "b/main.tf", "c/main.tf"]);
    }
}
