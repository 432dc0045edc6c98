use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "terraci")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable gitignore filtering during directory walk
    #[arg(long, global = true)]
    pub no_ignore: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the GitLab CI pipeline for a workspace
    Generate {
        /// Workspace root containing the Terraform monorepo
        #[arg(default_value = ".")]
        workspace: String,
        /// Config file (default: <workspace>/.terraci.yaml)
        #[arg(short, long)]
        config: Option<String>,
        /// Write the pipeline here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
        /// Only include modules affected by version-control changes
        #[arg(long)]
        changed: bool,
        /// Base reference for --changed (default: tracking branch merge-base)
        #[arg(long)]
        base_ref: Option<String>,
        /// Additional include glob (repeatable, merged with config)
        #[arg(long = "include")]
        include: Vec<String>,
        /// Additional exclude glob (repeatable, merged with config)
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        /// Print a summary instead of the pipeline
        #[arg(long)]
        dry_run: bool,
        /// Summary format for --dry-run
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// List discovered modules with kind and execution level
    Modules {
        /// Workspace root containing the Terraform monorepo
        #[arg(default_value = ".")]
        workspace: String,
        /// Config file (default: <workspace>/.terraci.yaml)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Initialize configuration file
    Init {
        /// Custom path for config file (default: ./.terraci.yaml)
        #[arg(short, long)]
        path: Option<String>,
        /// Overwrite existing config file
        #[arg(short, long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Json => write!(f, "json"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shell::Bash => write!(f, "bash"),
            Shell::Zsh => write!(f, "zsh"),
        }
    }
}
