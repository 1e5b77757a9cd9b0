use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "canaryctl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy and operate fleets of synthetic monitoring canaries", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Credentials profile
    #[arg(long, env = "AWS_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Region to operate in
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    pub region: String,

    /// Descriptor file name searched for in each path
    #[arg(
        long,
        env = "CANARY_CONFIG_FILE",
        default_value = "canary.yml",
        global = true
    )]
    pub config_file: String,

    /// Descriptor format
    #[arg(long, env = "CANARY_CONFIG_PARSER", value_enum, global = true)]
    pub config_parser: Option<ConfigParser>,

    /// Sandbox platform state file
    #[arg(long, env = "CANARY_STATE_FILE", global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigParser {
    Yml,
    Json,
    Toml,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update monitors and their buckets and roles
    Deploy(DeployArgs),

    /// Start monitors and report their first run
    Start(SelectArgs),

    /// Stop running monitors
    Stop(SelectArgs),

    /// Remove monitors and their generated roles
    Remove(RemoveArgs),

    /// Install code dependencies of monitors
    Build(BuildArgs),

    /// Show the runs of a monitor
    Results(RunArgs),

    /// Print the log of a monitor run
    Logs(RunArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which descriptors to operate on
#[derive(Args, Clone, Debug, Default)]
pub struct SelectArgs {
    /// Files or directories holding descriptors
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Select every monitor found
    #[arg(short, long)]
    pub all: bool,

    /// Select monitors whose name matches a glob pattern
    #[arg(short, long = "name", value_name = "PATTERN")]
    pub names: Vec<String>,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Bucket run artifacts are written to
    #[arg(long, env = "CANARY_ARTIFACT_BUCKET")]
    pub artifact_bucket: Option<String>,

    /// Bucket code archives are uploaded to
    #[arg(long, env = "CANARY_SOURCE_BUCKET")]
    pub source_bucket: Option<String>,

    /// Upload code to the source bucket instead of sending it inline
    #[arg(long)]
    pub upload: bool,

    /// Install code dependencies before packaging
    #[arg(long)]
    pub build: bool,

    /// Start each monitor once deployed
    #[arg(long)]
    pub start: bool,

    /// Create missing buckets without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Empty and delete the artifact bucket afterwards
    #[arg(long)]
    pub delete_artifact_bucket: bool,

    /// Empty and delete the source bucket afterwards
    #[arg(long)]
    pub delete_source_bucket: bool,

    /// Artifact bucket to delete
    #[arg(long, env = "CANARY_ARTIFACT_BUCKET")]
    pub artifact_bucket: Option<String>,

    /// Source bucket to delete
    #[arg(long, env = "CANARY_SOURCE_BUCKET")]
    pub source_bucket: Option<String>,
}

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Print the installer output
    #[arg(long)]
    pub output: bool,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Use the most recent run
    #[arg(short, long)]
    pub last: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::parse_from([
            "canaryctl",
            "deploy",
            "monitors",
            "--name",
            "api-*",
            "--upload",
            "--start",
            "--config-parser",
            "json",
        ]);
        assert_eq!(cli.config_parser, Some(ConfigParser::Json));
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.select.paths, vec![PathBuf::from("monitors")]);
                assert_eq!(args.select.names, vec!["api-*"]);
                assert!(args.upload && args.start && !args.build);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_paths_default_to_current_dir() {
        let cli = Cli::parse_from(["canaryctl", "stop", "--all"]);
        match cli.command {
            Command::Stop(select) => {
                assert!(select.all);
                assert_eq!(select.paths, vec![PathBuf::from(".")]);
            }
            _ => panic!("expected stop"),
        }
    }
}
