use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::parse_param;

#[derive(Parser)]
#[command(name = "apphost")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare a multi-service application once, run it locally or publish it", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Declaration file (default: ./apphost.toml, then ~/.config/apphost/apphost.toml)
    #[arg(short, long, global = true, env = "APPHOST_FILE")]
    pub file: Option<String>,

    /// Supply a parameter value (repeatable); wins over Parameters__<NAME>
    #[arg(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_param, global = true)]
    pub params: Vec<(String, String)>,

    /// Resolve for publishing instead of a local run
    #[arg(long, global = true, env = "APPHOST_PUBLISH")]
    pub publish: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve the topology and show startup order, endpoints and environments
    Plan(PlanArgs),

    /// Write the publish manifest (always resolves in publish mode)
    Publish {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show startup waves, dependencies and parameter lineage
    Graph,

    /// Validate the declaration in both modes without handing anything off
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Only show these resources (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Print the projection as JSON instead
    #[arg(long)]
    pub json: bool,
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
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "apphost",
            "plan",
            "--publish",
            "-p",
            "FoundryAgentId=asst_1",
            "--only",
            "api,chat",
        ])
        .unwrap();
        assert!(cli.publish);
        assert_eq!(cli.params, vec![("FoundryAgentId".into(), "asst_1".into())]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.only, vec!["api", "chat"]);
    }

    #[test]
    fn test_bad_param_is_rejected() {
        assert!(Cli::try_parse_from(["apphost", "-p", "oops", "validate"]).is_err());
    }
}
