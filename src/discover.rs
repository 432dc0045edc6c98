use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use hcl::Body;
use ignore::WalkBuilder;

use crate::error::{Error, Result};
use crate::eval::{self, Resolved, Scope};
use crate::graph::compile_globs;
use crate::module::{normalize_slashes, Diagnostic, Module, ModuleKind, ModuleSet};
use crate::template::PathTemplate;

/// Extra walk depth beyond the template to tolerate nested submodule trees.
const DEPTH_SLACK: usize = 2;

/// Outcome of a discovery pass over the workspace.
#[derive(Debug)]
pub struct Discovery {
    pub modules: ModuleSet,
    pub diagnostics: Vec<Diagnostic>,
}

/// Walk the workspace and classify directories into modules.
///
/// Directories under a library prefix that contain `.tf` files become
/// library modules. Directories matching the path template become executable
/// modules when any of their files declares a `provider` block or a
/// `terraform { backend … }` block; everything else is ignored.
pub fn discover_modules(
    root: &Path,
    template: &PathTemplate,
    library_paths: &[String],
    exclude: &[String],
    max_depth: Option<usize>,
    no_ignore: bool,
) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(Error::Discovery {
            path: root.to_path_buf(),
            message: "workspace root is not a directory".to_string(),
        });
    }

    let depth = max_depth.unwrap_or(template.depth() + DEPTH_SLACK);
    let (exclude_set, invalid) = compile_globs(exclude);

    let mut modules = Vec::new();
    let mut diagnostics: Vec<Diagnostic> = invalid
        .into_iter()
        .map(|p| Diagnostic::new("config", format!("invalid exclude pattern '{}'", p)))
        .collect();

    for entry in WalkBuilder::new(root)
        .max_depth(Some(depth))
        .git_ignore(!no_ignore)
        .git_exclude(!no_ignore)
        .git_global(!no_ignore)
        .build()
        .filter_map(|e| e.ok())
    {
        if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
            continue;
        }

        let dir = entry.path();
        let rel = match dir.strip_prefix(root) {
            Ok(rel) => normalize_slashes(rel),
            Err(_) => continue,
        };

        let under_library = library_paths.iter().any(|p| is_under_prefix(&rel, p));
        let bindings = template.matches(&rel);

        if !under_library && bindings.is_none() {
            continue;
        }

        let tf_files = match tf_files_in(dir) {
            Ok(files) => files,
            Err(message) => {
                diagnostics.push(Diagnostic::new(rel.clone(), message));
                continue;
            }
        };
        if tf_files.is_empty() {
            continue;
        }

        if under_library {
            modules.push(Module {
                id: rel.clone(),
                abs_path: dir.to_path_buf(),
                rel_path: rel,
                kind: ModuleKind::Library,
                backend_key: None,
                bindings: BTreeMap::new(),
            });
            continue;
        }

        let bindings = bindings.unwrap_or_default();
        let mut is_executable = false;
        let mut backend_key = None;

        for file in &tf_files {
            let body = match parse_tf_file(file) {
                Ok(body) => body,
                Err(message) => {
                    diagnostics.push(Diagnostic::new(rel.clone(), message));
                    continue;
                }
            };

            if declares_provider(&body) {
                is_executable = true;
            }
            if let Some(expr) = backend_key_expr(&body) {
                is_executable = true;
                let mut scope = Scope::with_locals(bindings.clone());
                scope.set_path_module(rel.clone());
                match eval::evaluate(&expr, &scope) {
                    Resolved::Value(key) => backend_key = Some(key),
                    Resolved::Unknown => diagnostics.push(Diagnostic::new(
                        rel.clone(),
                        "backend key could not be resolved; remote-state references to this module will not be linked",
                    )),
                }
            }
        }

        if is_executable {
            modules.push(Module {
                id: rel.clone(),
                abs_path: dir.to_path_buf(),
                rel_path: rel,
                kind: ModuleKind::Executable,
                backend_key,
                bindings,
            });
        }
    }

    // Backend keys must be unique to act as dependency pointers
    let mut seen_keys: BTreeMap<&str, &str> = BTreeMap::new();
    for module in &modules {
        if let Some(key) = &module.backend_key {
            if let Some(previous) = seen_keys.insert(key.as_str(), module.id.as_str()) {
                diagnostics.push(Diagnostic::new(
                    module.id.clone(),
                    format!("backend key '{}' already declared by {}", key, previous),
                ));
            }
        }
    }

    modules.retain(|m| !exclude_set.is_match(&m.id));

    Ok(Discovery {
        modules: ModuleSet::new(modules)?,
        diagnostics,
    })
}

/// `.tf` files directly inside a directory, sorted by name.
pub(crate) fn tf_files_in(dir: &Path) -> std::result::Result<Vec<std::path::PathBuf>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("unreadable directory: {}", e))?;

    let mut files = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tf") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn parse_tf_file(path: &Path) -> std::result::Result<Body, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    hcl::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

fn declares_provider(body: &Body) -> bool {
    body.blocks().any(|b| b.identifier.as_str() == "provider")
}

/// The `key` expression of a `terraform { backend "<kind>" { key = … } }` block.
fn backend_key_expr(body: &Body) -> Option<hcl::Expression> {
    for block in body.blocks() {
        if block.identifier.as_str() != "terraform" {
            continue;
        }
        for nested in block.body.blocks() {
            if nested.identifier.as_str() != "backend" {
                continue;
            }
            for attr in nested.body.attributes() {
                if attr.key.as_str() == "key" {
                    return Some(attr.expr.clone());
                }
            }
        }
    }
    None
}

/// True when `rel` equals `prefix` or sits below it on a segment boundary.
fn is_under_prefix(rel: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return false;
    }
    rel == prefix || rel.starts_with(&format!("{}/", prefix))
}
