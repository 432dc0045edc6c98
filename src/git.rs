use std::path::{Path, PathBuf};
use std::process::Command;

use crate::changes::ChangeSource;
use crate::error::{Error, Result};
use crate::module::normalize_slashes;

/// Change source backed by the `git` binary.
///
/// Paths git reports are repo-root-relative; they are re-anchored to the
/// workspace root (which may be a subdirectory of the repository) and
/// normalized to forward slashes. Files outside the workspace are dropped.
pub struct GitChangeSource {
    workspace: PathBuf,
}

impl GitChangeSource {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.workspace)
            .args(args)
            .output()
            .map_err(|e| Error::ChangeSource {
                message: format!("failed to invoke git: {}", e),
            })?;

        if !output.status.success() {
            return Err(Error::ChangeSource {
                message: format!(
                    "git {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Base commit for the diff: the given ref's merge-base with HEAD, the
    /// tracking branch's merge-base when no ref is given, or the previous
    /// commit when there is no tracking branch.
    fn resolve_base(&self, base_ref: Option<&str>) -> Result<String> {
        let reference = match base_ref {
            Some(reference) => reference.to_string(),
            None => {
                let upstream =
                    self.git(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"]);
                match upstream {
                    Ok(upstream) => upstream.trim().to_string(),
                    // No tracking branch: previous commit, or HEAD itself on
                    // a root commit (committed diff is then empty)
                    Err(_) => {
                        return match self.git(&["rev-parse", "--verify", "HEAD~1"]) {
                            Ok(parent) => Ok(parent.trim().to_string()),
                            Err(_) => Ok("HEAD".to_string()),
                        }
                    }
                }
            }
        };

        let merge_base = self.git(&["merge-base", "HEAD", &reference])?;
        Ok(merge_base.trim().to_string())
    }

    fn repo_root(&self) -> Result<PathBuf> {
        let output = self.git(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(output.trim()))
    }

    /// Re-anchor a repo-relative path onto the workspace root.
    fn to_workspace_relative(&self, repo_root: &Path, path: &str) -> Option<String> {
        let absolute = repo_root.join(path);
        let workspace = self.workspace.canonicalize().ok()?;
        absolute
            .strip_prefix(&workspace)
            .ok()
            .map(normalize_slashes)
    }

    fn relativize(&self, raw: Vec<String>) -> Result<Vec<String>> {
        let repo_root = self.repo_root()?;
        Ok(raw
            .into_iter()
            .filter_map(|p| self.to_workspace_relative(&repo_root, &p))
            .filter(|p| !p.is_empty())
            .collect())
    }
}

impl ChangeSource for GitChangeSource {
    fn changed_since(&self, base_ref: Option<&str>) -> Result<Vec<String>> {
        let base = self.resolve_base(base_ref)?;
        let output = self.git(&["diff", "--name-only", &base, "HEAD"])?;
        self.relativize(lines(&output))
    }

    fn uncommitted_changes(&self) -> Result<Vec<String>> {
        let output = self.git(&["status", "--porcelain"])?;
        let paths = output
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| {
                let path = &line[3..];
                // Renames are listed as "old -> new"; the new path is live
                match path.split_once(" -> ") {
                    Some((_, new)) => new.to_string(),
                    None => path.to_string(),
                }
            })
            .collect();
        self.relativize(paths)
    }
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_strips_blanks() {
        let parsed = lines("a/main.tf\n\nb/main.tf\n");
        assert_eq!(parsed, vec!["a/main.tf", "b/main.tf"]);
    }

    #[test]
    fn test_outside_git_repo_is_change_source_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = GitChangeSource::new(tmp.path());

        let err = source.uncommitted_changes().unwrap_err();
        assert!(matches!(err, Error::ChangeSource { .. }));
    }
}
