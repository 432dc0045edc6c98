use regex::Regex;
use serde::Serialize;
use yaml_rust2::yaml::{Hash, Yaml};
use yaml_rust2::YamlEmitter;

use crate::error::{Error, Result};
use crate::graph::Graph;

/// One CI job in the provider-agnostic pipeline model.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub stage: String,
    pub image: String,
    pub script: Vec<String>,
    pub needs: Vec<String>,
}

/// Ordered stages plus jobs in emission order.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stages: Vec<String>,
    pub jobs: Vec<Job>,
}

/// Knobs the emitter takes from the `gitlab` config section.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub image: String,
    pub plan_enabled: bool,
    pub extra_job_fields: Option<Hash>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            image: "hashicorp/terraform:latest".to_string(),
            plan_enabled: true,
            extra_job_fields: None,
        }
    }
}

/// Translate execution levels into stages and jobs.
///
/// Level `i` becomes `plan-<i>` + `apply-<i>` (or just `apply-<i>` with
/// plans disabled). A module's plan waits for its prerequisites' applies;
/// its apply additionally waits for its own plan. Level iteration follows
/// the levels' own order, which is already lexicographic within a level.
pub fn build_pipeline(levels: &[Vec<String>], graph: &Graph, options: &EmitOptions) -> Pipeline {
    let mut pipeline = Pipeline::default();

    for (i, level) in levels.iter().enumerate() {
        if options.plan_enabled {
            pipeline.stages.push(format!("plan-{}", i));
        }
        pipeline.stages.push(format!("apply-{}", i));

        if options.plan_enabled {
            for module in level {
                let predecessor_applies = apply_needs(graph, module);
                pipeline.jobs.push(Job {
                    name: format!("plan-{}", sanitize_job_name(module)),
                    stage: format!("plan-{}", i),
                    image: options.image.clone(),
                    script: job_script(module, "plan"),
                    needs: predecessor_applies,
                });
            }
        }

        for module in level {
            let mut needs = Vec::new();
            if options.plan_enabled {
                needs.push(format!("plan-{}", sanitize_job_name(module)));
            }
            needs.extend(apply_needs(graph, module));
            pipeline.jobs.push(Job {
                name: format!("apply-{}", sanitize_job_name(module)),
                stage: format!("apply-{}", i),
                image: options.image.clone(),
                script: job_script(module, "apply"),
                needs,
            });
        }
    }

    pipeline
}

fn apply_needs(graph: &Graph, module: &str) -> Vec<String> {
    graph
        .deps_of(module)
        .into_iter()
        .map(|dep| format!("apply-{}", sanitize_job_name(dep)))
        .collect()
}

fn job_script(module: &str, operation: &str) -> Vec<String> {
    let command = match operation {
        "plan" => "terraform plan -lock-timeout=60s -input=false",
        _ => "terraform apply -lock-timeout=60s -input=false -auto-approve",
    };
    vec![
        format!("cd {}", module),
        "terraform init -input=false".to_string(),
        command.to_string(),
    ]
}

/// CI job names: path separators become `-`, everything outside
/// `[A-Za-z0-9_-]` is stripped.
pub fn sanitize_job_name(id: &str) -> String {
    let flattened = id.replace('/', "-");
    let disallowed = Regex::new(r"[^A-Za-z0-9_-]").unwrap();
    disallowed.replace_all(&flattened, "").into_owned()
}

/// Serializer seam for CI providers.
pub trait PipelineRenderer {
    fn render(&self, pipeline: &Pipeline) -> Result<String>;
}

/// Renders the pipeline as a GitLab CI document.
///
/// `Hash` preserves insertion order, so the emitted key order is exactly
/// the order jobs were built in: `stages` first, then jobs level by level.
pub struct GitlabRenderer {
    extra_job_fields: Option<Hash>,
}

impl GitlabRenderer {
    pub fn new(extra_job_fields: Option<Hash>) -> Self {
        Self { extra_job_fields }
    }
}

impl PipelineRenderer for GitlabRenderer {
    fn render(&self, pipeline: &Pipeline) -> Result<String> {
        let mut doc = Hash::new();

        let stages: Vec<Yaml> = pipeline
            .stages
            .iter()
            .map(|s| Yaml::String(s.clone()))
            .collect();
        doc.insert(Yaml::String("stages".to_string()), Yaml::Array(stages));

        for job in &pipeline.jobs {
            let mut body = Hash::new();
            body.insert(
                Yaml::String("stage".to_string()),
                Yaml::String(job.stage.clone()),
            );
            body.insert(
                Yaml::String("image".to_string()),
                Yaml::String(job.image.clone()),
            );
            body.insert(
                Yaml::String("script".to_string()),
                Yaml::Array(job.script.iter().map(|s| Yaml::String(s.clone())).collect()),
            );
            if !job.needs.is_empty() {
                body.insert(
                    Yaml::String("needs".to_string()),
                    Yaml::Array(job.needs.iter().map(|n| Yaml::String(n.clone())).collect()),
                );
            }

            if let Some(extra) = &self.extra_job_fields {
                for (key, value) in extra.iter() {
                    if !body.contains_key(key) {
                        body.insert(key.clone(), value.clone());
                    }
                }
            }

            doc.insert(Yaml::String(job.name.clone()), Yaml::Hash(body));
        }

        let mut out = String::new();
        let mut emitter = YamlEmitter::new(&mut out);
        emitter
            .dump(&Yaml::Hash(doc))
            .map_err(|e| Error::graph(format!("failed to serialize pipeline: {}", e)))?;
        out.push('\n');
        Ok(out)
    }
}

/// What `--dry-run` reports instead of the artifact.
#[derive(Debug, Serialize)]
pub struct DryRunSummary {
    pub total_modules: usize,
    pub stages: usize,
    pub jobs: usize,
    pub levels: Vec<Vec<String>>,
}

impl DryRunSummary {
    pub fn new(levels: &[Vec<String>], pipeline: &Pipeline) -> Self {
        Self {
            total_modules: levels.iter().map(Vec::len).sum(),
            stages: pipeline.stages.len(),
            jobs: pipeline.jobs.len(),
            levels: levels.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dependency, EdgeKind};
    use crate::module::{Module, ModuleKind, ModuleSet};
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use yaml_rust2::YamlLoader;

    fn module(id: &str) -> Module {
        Module {
            id: id.to_string(),
            abs_path: PathBuf::from("/work").join(id),
            rel_path: id.to_string(),
            kind: ModuleKind::Executable,
            backend_key: None,
            bindings: BTreeMap::new(),
        }
    }

    /// s3 and vpc independent, eks depends on vpc.
    fn basic_chain() -> (Graph, Vec<Vec<String>>) {
        let modules = ModuleSet::new(vec![module("s3"), module("vpc"), module("eks")]).unwrap();
        let edges = vec![Dependency {
            from: "eks".into(),
            to: "vpc".into(),
            kind: EdgeKind::Execution,
        }];
        let graph = Graph::build(&modules, &edges).unwrap();
        let levels = graph.levels().unwrap();
        (graph, levels)
    }

    #[test]
    fn test_stage_sequence() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());

        assert_eq!(
            pipeline.stages,
            vec!["plan-0", "apply-0", "plan-1", "apply-1"]
        );
    }

    #[test]
    fn test_job_needs_follow_predecessors() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());

        let job = |name: &str| pipeline.jobs.iter().find(|j| j.name == name).unwrap();

        assert!(job("plan-s3").needs.is_empty());
        assert!(job("plan-vpc").needs.is_empty());
        assert_eq!(job("plan-eks").needs, vec!["apply-vpc"]);
        assert_eq!(job("apply-vpc").needs, vec!["plan-vpc"]);
        assert_eq!(job("apply-eks").needs, vec!["plan-eks", "apply-vpc"]);
    }

    #[test]
    fn test_plan_disabled_suppresses_plan_stages() {
        let (graph, levels) = basic_chain();
        let options = EmitOptions {
            plan_enabled: false,
            ..EmitOptions::default()
        };
        let pipeline = build_pipeline(&levels, &graph, &options);

        assert_eq!(pipeline.stages, vec!["apply-0", "apply-1"]);
        assert!(pipeline.jobs.iter().all(|j| j.name.starts_with("apply-")));

        let eks = pipeline.jobs.iter().find(|j| j.name == "apply-eks").unwrap();
        assert_eq!(eks.needs, vec!["apply-vpc"]);
    }

    #[test]
    fn test_job_count_matches_summary() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());
        let summary = DryRunSummary::new(&levels, &pipeline);

        assert_eq!(summary.total_modules, 3);
        assert_eq!(summary.stages, 4);
        assert_eq!(summary.jobs, 6);
    }

    #[rstest]
    #[case("platform/stage/eu-central-1/vpc", "platform-stage-eu-central-1-vpc")]
    #[case("a/b.c/d", "a-bc-d")]
    #[case("msk_2", "msk_2")]
    #[case("weird name!", "weirdname")]
    fn test_sanitize_job_name(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(sanitize_job_name(id), expected);
    }

    #[test]
    fn test_render_round_trip_preserves_needs() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());
        let rendered = GitlabRenderer::new(None).render(&pipeline).unwrap();

        let docs = YamlLoader::load_from_str(&rendered).unwrap();
        let doc = &docs[0];

        let stages: Vec<&str> = doc["stages"]
            .as_vec()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect();
        assert_eq!(stages, vec!["plan-0", "apply-0", "plan-1", "apply-1"]);

        let needs: Vec<&str> = doc["apply-eks"]["needs"]
            .as_vec()
            .unwrap()
            .iter()
            .map(|n| n.as_str().unwrap())
            .collect();
        assert_eq!(needs, vec!["plan-eks", "apply-vpc"]);

        assert!(doc["plan-s3"]["needs"].is_badvalue());
        assert_eq!(doc["plan-s3"]["stage"].as_str(), Some("plan-0"));
    }

    #[test]
    fn test_render_is_byte_stable() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());
        let renderer = GitlabRenderer::new(None);

        assert_eq!(
            renderer.render(&pipeline).unwrap(),
            renderer.render(&pipeline).unwrap()
        );
    }

    #[test]
    fn test_extra_job_fields_merged_but_never_override() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());

        let mut extra = Hash::new();
        extra.insert(
            Yaml::String("tags".to_string()),
            Yaml::Array(vec![Yaml::String("terraform".to_string())]),
        );
        extra.insert(
            Yaml::String("stage".to_string()),
            Yaml::String("bogus".to_string()),
        );

        let rendered = GitlabRenderer::new(Some(extra)).render(&pipeline).unwrap();
        let docs = YamlLoader::load_from_str(&rendered).unwrap();
        let doc = &docs[0];

        assert_eq!(doc["plan-vpc"]["tags"][0].as_str(), Some("terraform"));
        assert_eq!(doc["plan-vpc"]["stage"].as_str(), Some("plan-0"));
    }

    #[test]
    fn test_script_changes_directory_first() {
        let (graph, levels) = basic_chain();
        let pipeline = build_pipeline(&levels, &graph, &EmitOptions::default());

        let plan = pipeline.jobs.iter().find(|j| j.name == "plan-vpc").unwrap();
        assert_eq!(plan.script[0], "cd vpc");
        assert!(plan.script[1].starts_with("terraform init"));
        assert!(plan.script[2].starts_with("terraform plan"));

        let apply = pipeline.jobs.iter().find(|j| j.name == "apply-vpc").unwrap();
        assert!(apply.script[2].starts_with("terraform apply"));
    }
}
