mod changes;
mod cli;
mod config;
mod discover;
mod error;
mod eval;
mod extract;
mod generate;
mod git;
mod graph;
mod module;
mod pipeline;
mod template;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::{generate as emit_completions, Shell as CompletionShell};
use colored::*;
use std::path::{Path, PathBuf};

use cli::{Cli, Commands, Format, Shell};
use generate::{GenerateOptions, SummaryFormat};

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "ERROR:".red(), e);
        // Print the full error chain
        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("  Caused by: {}", err);
            source = err.source();
        }
        let code = e
            .downcast_ref::<error::Error>()
            .map(error::Error::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            workspace,
            config,
            output,
            changed,
            base_ref,
            include,
            exclude,
            dry_run,
            format,
        } => generate::run_generate(&GenerateOptions {
            workspace: PathBuf::from(workspace),
            config_path: config.map(PathBuf::from),
            output: output.map(PathBuf::from),
            changed,
            base_ref,
            include,
            exclude,
            dry_run,
            format: match format {
                Format::Text => SummaryFormat::Text,
                Format::Json => SummaryFormat::Json,
            },
            verbose: cli.verbose,
            no_ignore: cli.no_ignore,
        }),
        Commands::Modules { workspace, config } => generate::run_modules(
            Path::new(&workspace),
            config.as_deref().map(Path::new),
            cli.verbose,
            cli.no_ignore,
        ),
        Commands::Init { path, force } => init_config(path, force),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn init_config(path: Option<String>, force: bool) -> Result<()> {
    let path_buf = path.map(PathBuf::from);

    match config::Config::init_config(path_buf, force) {
        Ok(config_path) => {
            eprintln!(
                "{} Configuration file created at: {}",
                "SUCCESS:".green(),
                config_path.display()
            );
            eprintln!(
                "{} Edit the file to match your repository layout",
                "INFO:".cyan()
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell_type = match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
    };

    eprintln!("Generating completion file for {}...", shell);
    emit_completions(shell_type, &mut cmd, "terraci", &mut std::io::stdout());
}
