use anyhow::{Context, Result};
use colored::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::changes::{affected_modules, collect_changed_files};
use crate::config::{Config, CONFIG_FILE_NAME};
use crate::discover::{discover_modules, Discovery};
use crate::extract::{extract_dependencies, Extraction};
use crate::git::GitChangeSource;
use crate::graph::{filter_ids, Graph};
use crate::module::Diagnostic;
use crate::pipeline::{build_pipeline, DryRunSummary, GitlabRenderer, PipelineRenderer};
use crate::template::PathTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    Text,
    Json,
}

/// Everything the `generate` subcommand needs, resolved from the CLI.
#[derive(Debug)]
pub struct GenerateOptions {
    pub workspace: PathBuf,
    pub config_path: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub changed: bool,
    pub base_ref: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub dry_run: bool,
    pub format: SummaryFormat,
    pub verbose: bool,
    pub no_ignore: bool,
}

/// Main entry point for pipeline generation
pub fn run_generate(options: &GenerateOptions) -> Result<()> {
    let (workspace, config, discovery, extraction, graph) = analyze_workspace(
        &options.workspace,
        options.config_path.as_deref(),
        options.verbose,
        options.no_ignore,
    )?;

    // Change-only mode narrows the target set before filtering
    let mut target: BTreeSet<String> = graph.node_ids().map(String::from).collect();
    if options.changed {
        let source = GitChangeSource::new(&workspace);
        match collect_changed_files(&source, options.base_ref.as_deref()) {
            Ok(files) => {
                target = affected_modules(
                    &files,
                    &workspace,
                    &discovery.modules,
                    &graph,
                    &extraction.edges,
                );
                if options.verbose {
                    eprintln!(
                        "{} {} changed file(s) map to {} module(s)",
                        "INFO:".cyan(),
                        files.len(),
                        target.len()
                    );
                }
            }
            Err(e) => {
                eprintln!(
                    "{} {}; falling back to full generation",
                    "WARN:".yellow(),
                    e
                );
            }
        }
    }

    let include = merged(&config.include, &options.include);
    let exclude = merged(&config.exclude, &options.exclude);
    let (kept, invalid) = filter_ids(target.iter().map(String::as_str), &include, &exclude);
    for pattern in invalid {
        eprintln!("{} ignoring invalid glob pattern '{}'", "WARN:".yellow(), pattern);
    }

    let keep: BTreeSet<String> = kept.into_iter().collect();
    let subgraph = graph.subgraph(&keep);
    let levels = subgraph.levels()?;

    report_diagnostics(&discovery, &extraction);

    let pipeline = build_pipeline(&levels, &subgraph, &config.emit_options());

    if options.dry_run {
        let summary = DryRunSummary::new(&levels, &pipeline);
        match options.format {
            SummaryFormat::Text => print_summary(&summary),
            SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        }
        return Ok(());
    }

    let rendered =
        GitlabRenderer::new(config.gitlab.extra_job_fields.clone()).render(&pipeline)?;

    match &options.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("cannot write {}", path.display()))?;
            eprintln!(
                "{} Pipeline written to {} ({} stage(s), {} job(s))",
                "INFO:".cyan(),
                path.display(),
                pipeline.stages.len(),
                pipeline.jobs.len()
            );
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

/// List discovered modules with their kind and execution level.
pub fn run_modules(
    workspace: &Path,
    config_path: Option<&Path>,
    verbose: bool,
    no_ignore: bool,
) -> Result<()> {
    let (_, _, discovery, extraction, graph) =
        analyze_workspace(workspace, config_path, verbose, no_ignore)?;
    let levels = graph.levels()?;

    let level_of = |id: &str| {
        levels
            .iter()
            .position(|level| level.iter().any(|m| m == id))
    };

    for module in discovery.modules.iter() {
        let level = match level_of(&module.id) {
            Some(level) => level.to_string(),
            None => "-".to_string(),
        };
        println!("{:<60} {:<12} {}", module.id, module.kind, level);
    }

    report_diagnostics(&discovery, &extraction);
    Ok(())
}

/// Shared front half of every run: config, discovery, extraction, graph.
fn analyze_workspace(
    workspace: &Path,
    config_path: Option<&Path>,
    verbose: bool,
    no_ignore: bool,
) -> Result<(PathBuf, Config, Discovery, Extraction, Graph)> {
    let workspace = fs::canonicalize(workspace).map_err(|e| crate::error::Error::Discovery {
        path: workspace.to_path_buf(),
        message: format!("cannot resolve workspace: {}", e),
    })?;

    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => workspace.join(CONFIG_FILE_NAME),
    };
    let config = Config::load(&config_path)?;
    let template = PathTemplate::parse(&config.structure.pattern)?;

    if verbose {
        eprintln!(
            "{} Discovering modules under {} (pattern: {})",
            "INFO:".cyan(),
            workspace.display(),
            config.structure.pattern
        );
    }

    let discovery = discover_modules(
        &workspace,
        &template,
        &config.library_paths,
        &config.exclude,
        config.structure.max_depth,
        no_ignore,
    )?;

    if verbose {
        eprintln!(
            "{} Found {} module(s) ({} executable)",
            "INFO:".cyan(),
            discovery.modules.len(),
            discovery.modules.executables().count()
        );
    }

    let extraction = extract_dependencies(&workspace, &discovery.modules, &config.library_paths);
    let graph = Graph::build(&discovery.modules, &extraction.edges)?;

    Ok((workspace, config, discovery, extraction, graph))
}

fn report_diagnostics(discovery: &Discovery, extraction: &Extraction) {
    for diagnostic in discovery
        .diagnostics
        .iter()
        .chain(extraction.diagnostics.iter())
    {
        report_diagnostic(diagnostic);
    }
}

fn report_diagnostic(diagnostic: &Diagnostic) {
    eprintln!("{} {}", "WARN:".yellow(), diagnostic);
}

fn print_summary(summary: &DryRunSummary) {
    println!("Total modules: {}", summary.total_modules);
    println!("Stages:        {}", summary.stages);
    println!("Jobs:          {}", summary.jobs);
    if !summary.levels.is_empty() {
        println!();
        for (i, level) in summary.levels.iter().enumerate() {
            println!("Level {}: {}", i, level.join(", "));
        }
    }
}

fn merged(from_config: &[String], from_cli: &[String]) -> Vec<String> {
    let mut patterns = from_config.to_vec();
    patterns.extend(from_cli.iter().cloned());
    patterns
}
