use std::fs;
use std::path::{Path, PathBuf};

use yaml_rust2::yaml::{Hash, Yaml};
use yaml_rust2::YamlLoader;

use crate::error::{Error, Result};
use crate::pipeline::EmitOptions;

pub const CONFIG_FILE_NAME: &str = ".terraci.yaml";

/// Parsed `.terraci.yaml`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub structure: StructureConfig,
    pub library_paths: Vec<String>,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub gitlab: GitlabConfig,
}

#[derive(Debug, Clone, Default)]
pub struct StructureConfig {
    pub pattern: String,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GitlabConfig {
    pub image: String,
    pub plan_enabled: bool,
    pub extra_job_fields: Option<Hash>,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            image: "hashicorp/terraform:latest".to_string(),
            plan_enabled: true,
            extra_job_fields: None,
        }
    }
}

impl Config {
    /// Load and validate a config file. Unknown keys at any recognized
    /// level are rejected so typos surface as errors instead of silently
    /// changing behavior.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;

        let docs = YamlLoader::load_from_str(&content)
            .map_err(|e| Error::config(format!("malformed YAML in {}: {}", path.display(), e)))?;

        let root = match docs.first() {
            Some(Yaml::Hash(root)) => root,
            Some(Yaml::Null) | None => {
                return Err(Error::config(format!(
                    "{} is empty; structure.pattern is required",
                    path.display()
                )))
            }
            Some(_) => {
                return Err(Error::config(format!(
                    "{} must contain a mapping at the top level",
                    path.display()
                )))
            }
        };

        check_keys(
            root,
            &["structure", "library_modules", "exclude", "include", "gitlab"],
            "top level",
        )?;

        let structure = parse_structure(root)?;
        let library_paths = parse_library_modules(root)?;
        let exclude = string_list(root, "exclude")?;
        let include = string_list(root, "include")?;
        let gitlab = parse_gitlab(root)?;

        Ok(Config {
            structure,
            library_paths,
            exclude,
            include,
            gitlab,
        })
    }

    /// Emitter knobs taken from the `gitlab` section.
    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            image: self.gitlab.image.clone(),
            plan_enabled: self.gitlab.plan_enabled,
            extra_job_fields: self.gitlab.extra_job_fields.clone(),
        }
    }

    /// Initialize a config file with example content
    ///
    /// # Arguments
    /// * `path` - Optional custom path for the config file. If None, uses ./.terraci.yaml
    /// * `force` - If true, overwrites existing config file
    pub fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<PathBuf> {
        let config_path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

        if config_path.exists() && !force {
            anyhow::bail!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let example_content = r#"# terraci configuration file
# Defines how modules are discovered and how the GitLab pipeline is emitted

structure:
  # Path template describing where Terraform root modules live.
  # Each {placeholder} matches exactly one path segment and is exposed to
  # backend-key expressions as local.<placeholder>.
  pattern: "{service}/{environment}/{region}/{module}"

  # Override the directory-walk depth (default: template depth + 2)
  # max_depth: 6

# Directories holding reusable modules referenced via local `module` sources.
# They never run in the pipeline but changes to them fan out to every
# module that uses them.
library_modules:
  paths:
    - _modules

# Glob patterns applied to module IDs. Exclusion wins over inclusion.
# exclude:
#   - "*/sandbox/*"
# include:
#   - "platform/**"

gitlab:
  # Container image used by every generated job
  image: hashicorp/terraform:1.9

  # Set to false to emit apply stages only
  plan_enabled: true

  # Free-form fields merged into every emitted job
  # extra_job_fields:
  #   tags:
  #     - terraform
  #   retry: 1
"#;

        fs::write(&config_path, example_content)?;

        Ok(config_path)
    }
}

fn parse_structure(root: &Hash) -> Result<StructureConfig> {
    let section = match get(root, "structure") {
        Some(Yaml::Hash(section)) => section,
        Some(_) => return Err(Error::config("structure must be a mapping")),
        None => return Err(Error::config("structure.pattern is required")),
    };

    check_keys(section, &["pattern", "max_depth"], "structure")?;

    let pattern = match get(section, "pattern") {
        Some(Yaml::String(pattern)) if !pattern.trim().is_empty() => pattern.clone(),
        Some(_) => return Err(Error::config("structure.pattern must be a string")),
        None => return Err(Error::config("structure.pattern is required")),
    };

    let max_depth = match get(section, "max_depth") {
        Some(Yaml::Integer(depth)) if *depth > 0 => Some(*depth as usize),
        Some(_) => {
            return Err(Error::config(
                "structure.max_depth must be a positive integer",
            ))
        }
        None => None,
    };

    Ok(StructureConfig { pattern, max_depth })
}

fn parse_library_modules(root: &Hash) -> Result<Vec<String>> {
    let section = match get(root, "library_modules") {
        Some(Yaml::Hash(section)) => section,
        Some(_) => return Err(Error::config("library_modules must be a mapping")),
        None => return Ok(Vec::new()),
    };

    check_keys(section, &["paths"], "library_modules")?;
    string_list(section, "paths")
}

fn parse_gitlab(root: &Hash) -> Result<GitlabConfig> {
    let section = match get(root, "gitlab") {
        Some(Yaml::Hash(section)) => section,
        Some(_) => return Err(Error::config("gitlab must be a mapping")),
        None => return Ok(GitlabConfig::default()),
    };

    check_keys(
        section,
        &["image", "plan_enabled", "extra_job_fields"],
        "gitlab",
    )?;

    let mut config = GitlabConfig::default();

    match get(section, "image") {
        Some(Yaml::String(image)) => config.image = image.clone(),
        Some(_) => return Err(Error::config("gitlab.image must be a string")),
        None => {}
    }

    match get(section, "plan_enabled") {
        Some(Yaml::Boolean(enabled)) => config.plan_enabled = *enabled,
        Some(_) => return Err(Error::config("gitlab.plan_enabled must be a boolean")),
        None => {}
    }

    match get(section, "extra_job_fields") {
        Some(Yaml::Hash(fields)) => config.extra_job_fields = Some(fields.clone()),
        Some(_) => return Err(Error::config("gitlab.extra_job_fields must be a mapping")),
        None => {}
    }

    Ok(config)
}

fn get<'a>(hash: &'a Hash, key: &str) -> Option<&'a Yaml> {
    hash.get(&Yaml::String(key.to_string()))
}

fn string_list(hash: &Hash, key: &str) -> Result<Vec<String>> {
    match get(hash, key) {
        Some(Yaml::Array(items)) => items
            .iter()
            .map(|item| match item {
                Yaml::String(s) => Ok(s.clone()),
                _ => Err(Error::config(format!("{} entries must be strings", key))),
            })
            .collect(),
        Some(Yaml::Null) | None => Ok(Vec::new()),
        Some(_) => Err(Error::config(format!("{} must be a list", key))),
    }
}

fn check_keys(hash: &Hash, allowed: &[&str], context: &str) -> Result<()> {
    for key in hash.keys() {
        let name = key.as_str().unwrap_or("<non-string>");
        if !allowed.contains(&name) {
            return Err(Error::config(format!(
                "unknown key '{}' at {}",
                name, context
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::fs;
    use tempfile::TempDir;

    fn load_str(content: &str) -> Result<Config> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, content).unwrap();
        Config::load(&path)
    }

    #[test]
    fn test_load_minimal_config() {
        let config = load_str(indoc! {r#"
            structure:
              pattern: "{service}/{environment}/{region}/{module}"
        "#})
        .unwrap();

        assert_eq!(
            config.structure.pattern,
            "{service}/{environment}/{region}/{module}"
        );
        assert!(config.structure.max_depth.is_none());
        assert!(config.library_paths.is_empty());
        assert!(config.gitlab.plan_enabled);
        assert_eq!(config.gitlab.image, "hashicorp/terraform:latest");
    }

    #[test]
    fn test_load_full_config() {
        let config = load_str(indoc! {r#"
            structure:
              pattern: "{service}/{environment}/{region}/{module}"
              max_depth: 6
            library_modules:
              paths:
                - _modules
                - shared/modules
            exclude:
              - "*/sandbox/*"
            include:
              - "platform/**"
            gitlab:
              image: hashicorp/terraform:1.9
              plan_enabled: false
              extra_job_fields:
                tags:
                  - terraform
        "#})
        .unwrap();

        assert_eq!(config.structure.max_depth, Some(6));
        assert_eq!(config.library_paths, vec!["_modules", "shared/modules"]);
        assert_eq!(config.exclude, vec!["*/sandbox/*"]);
        assert_eq!(config.include, vec!["platform/**"]);
        assert_eq!(config.gitlab.image, "hashicorp/terraform:1.9");
        assert!(!config.gitlab.plan_enabled);
        assert!(config.gitlab.extra_job_fields.is_some());
    }

    #[test]
    fn test_missing_pattern_is_config_error() {
        let err = load_str("structure: {}\n").unwrap_err();
        assert!(err.to_string().contains("structure.pattern is required"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = load_str(indoc! {r#"
            structure:
              pattern: "{module}"
            structre_typo: {}
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("unknown key 'structre_typo'"));
    }

    #[test]
    fn test_unknown_nested_key_rejected() {
        let err = load_str(indoc! {r#"
            structure:
              pattern: "{module}"
              depth: 3
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("unknown key 'depth'"));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = load_str("structure: [unclosed\n").unwrap_err();
        assert!(err.to_string().contains("malformed YAML"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/.terraci.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_negative_max_depth_rejected() {
        let err = load_str(indoc! {r#"
            structure:
              pattern: "{module}"
              max_depth: -2
        "#})
        .unwrap_err();
        assert!(err.to_string().contains("max_depth"));
    }

    #[test]
    fn test_init_config_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".terraci.yaml");

        let written = Config::init_config(Some(path.clone()), false).unwrap();
        assert_eq!(written, path);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.structure.pattern,
            "{service}/{environment}/{region}/{module}"
        );
        assert_eq!(config.library_paths, vec!["_modules"]);
    }

    #[test]
    fn test_init_config_fails_without_force() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".terraci.yaml");

        Config::init_config(Some(path.clone()), false).unwrap();
        let result = Config::init_config(Some(path), false);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[test]
    fn test_init_config_overwrites_with_force() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".terraci.yaml");

        fs::write(&path, "old content").unwrap();
        Config::init_config(Some(path.clone()), true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("structure:"));
        assert!(!content.contains("old content"));
    }
}
