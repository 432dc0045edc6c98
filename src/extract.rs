use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use hcl::expr::{Expression, ObjectKey};
use hcl::Body;

use crate::discover::{parse_tf_file, tf_files_in};
use crate::eval::{self, Resolved, Scope};
use crate::graph::{Dependency, EdgeKind};
use crate::module::{normalize_slashes, Diagnostic, Module, ModuleKind, ModuleSet};

/// Outcome of scanning all executable modules for dependencies.
#[derive(Debug, Default)]
pub struct Extraction {
    pub edges: Vec<Dependency>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Harvest dependency edges from every executable module's HCL.
///
/// Two constructs are recognized: `terraform_remote_state` data sources
/// (matched to other modules through the backend-key index) and local
/// `module` sources pointing into a library path. A malformed file or an
/// unresolvable key costs the module an edge and a diagnostic, never the
/// whole run.
pub fn extract_dependencies(
    root: &Path,
    modules: &ModuleSet,
    library_paths: &[String],
) -> Extraction {
    let key_index = modules.backend_key_index();
    let mut edges: BTreeSet<Dependency> = BTreeSet::new();
    let mut diagnostics = Vec::new();

    for module in modules.executables() {
        let tf_files = match tf_files_in(&module.abs_path) {
            Ok(files) => files,
            Err(message) => {
                diagnostics.push(Diagnostic::new(module.id.clone(), message));
                continue;
            }
        };

        for file in tf_files {
            let body = match parse_tf_file(&file) {
                Ok(body) => body,
                Err(message) => {
                    diagnostics.push(Diagnostic::new(module.id.clone(), message));
                    continue;
                }
            };

            harvest_remote_states(
                module,
                &body,
                &key_index,
                &mut edges,
                &mut diagnostics,
            );
            harvest_library_sources(
                root,
                module,
                &body,
                modules,
                library_paths,
                &mut edges,
            );
        }
    }

    Extraction {
        edges: edges.into_iter().collect(),
        diagnostics,
    }
}

/// `data "terraform_remote_state" "<label>" { config = { key = … } }`
fn harvest_remote_states(
    module: &Module,
    body: &Body,
    key_index: &BTreeMap<String, String>,
    edges: &mut BTreeSet<Dependency>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for block in body.blocks() {
        if block.identifier.as_str() != "data" {
            continue;
        }
        let labels: Vec<&str> = block.labels.iter().map(|l| l.as_str()).collect();
        if labels.first() != Some(&"terraform_remote_state") {
            continue;
        }
        let label = labels.get(1).copied().unwrap_or("<unnamed>");

        let Some(key_expr) = remote_state_key_expr(&block.body) else {
            diagnostics.push(Diagnostic::new(
                module.id.clone(),
                format!("remote state '{}' has no config.key attribute", label),
            ));
            continue;
        };

        let mut scope = Scope::with_locals(module.bindings.clone());
        scope.set_path_module(module.rel_path.clone());

        let key = match eval::evaluate(&key_expr, &scope) {
            Resolved::Value(key) => key,
            Resolved::Unknown => {
                diagnostics.push(Diagnostic::new(
                    module.id.clone(),
                    format!(
                        "remote state '{}' key could not be evaluated; dependency dropped",
                        label
                    ),
                ));
                continue;
            }
        };

        match key_index.get(&key) {
            Some(target) if target == &module.id => {
                // References to the module's own state carry no ordering
            }
            Some(target) => {
                edges.insert(Dependency {
                    from: module.id.clone(),
                    to: target.clone(),
                    kind: EdgeKind::Execution,
                });
            }
            None => diagnostics.push(Diagnostic::new(
                module.id.clone(),
                format!(
                    "remote state '{}' key '{}' does not match any discovered module",
                    label, key
                ),
            )),
        }
    }
}

/// `module "<label>" { source = "../_modules/…" }`
fn harvest_library_sources(
    root: &Path,
    module: &Module,
    body: &Body,
    modules: &ModuleSet,
    library_paths: &[String],
    edges: &mut BTreeSet<Dependency>,
) {
    for block in body.blocks() {
        if block.identifier.as_str() != "module" {
            continue;
        }

        let source = block.body.attributes().find_map(|attr| {
            if attr.key.as_str() != "source" {
                return None;
            }
            eval::evaluate(&attr.expr, &Scope::with_locals(module.bindings.clone()))
                .as_value()
                .map(String::from)
        });
        let Some(source) = source else { continue };

        // Registry and git sources never resolve to a workspace path
        if !source.starts_with("./") && !source.starts_with("../") {
            continue;
        }

        let resolved = normalize_lexically(&module.abs_path.join(&source));
        let Ok(rel) = resolved.strip_prefix(root) else {
            continue;
        };
        let rel = normalize_slashes(rel);

        if !library_paths.iter().any(|p| is_under_prefix(&rel, p)) {
            continue;
        }

        if let Some(target) = library_owner(modules, &rel) {
            edges.insert(Dependency {
                from: module.id.clone(),
                to: target.to_string(),
                kind: EdgeKind::Library,
            });
        }
    }
}

/// The `key` entry of the data source's `config` object attribute.
fn remote_state_key_expr(body: &Body) -> Option<Expression> {
    let config = body
        .attributes()
        .find(|attr| attr.key.as_str() == "config")?;

    let Expression::Object(map) = &config.expr else {
        return None;
    };

    for (object_key, value) in map {
        let name = match object_key {
            ObjectKey::Identifier(ident) => ident.as_str().to_string(),
            ObjectKey::Expression(Expression::String(s)) => s.clone(),
            _ => continue,
        };
        if name == "key" {
            return Some(value.clone());
        }
    }
    None
}

/// Find the library module owning `rel`, walking ancestor directories so a
/// source pointing at a subdirectory still lands on its library module.
fn library_owner<'a>(modules: &'a ModuleSet, rel: &str) -> Option<&'a str> {
    let mut current = rel;
    loop {
        if let Some(module) = modules.get(current) {
            if module.kind == ModuleKind::Library {
                return Some(&module.id);
            }
        }
        match current.rsplit_once('/') {
            Some((parent, _)) => current = parent,
            None => return None,
        }
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn is_under_prefix(rel: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return false;
    }
    rel == prefix || rel.starts_with(&format!("{}/", prefix))
}
