use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Asset manager for pipeline projects hosted in git repositories.
#[derive(Debug, Parser)]
#[command(version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: Command,
    /// Location of the asset cache [default: $HOME/.pipefetch/assets]
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    /// TOML file declaring hosting providers [default: $HOME/.pipefetch/scm.toml]
    #[arg(long)]
    pub providers_file: Option<PathBuf>,
    /// Hosting provider to use for projects not given as a URL
    #[arg(long, env = "PIPEFETCH_HUB")]
    pub hub: Option<String>,
    /// User name for the hosting provider
    #[arg(long, env = "PIPEFETCH_USER")]
    pub user: Option<String>,
    /// Password or token for the hosting provider
    #[arg(long, env = "PIPEFETCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists the projects available in the cache
    List,
    /// Lists the cached revisions of a project
    Revisions { project: String },
    /// Downloads a project revision into the cache
    Pull {
        project: String,
        #[arg(short, long)]
        revision: Option<String>,
        #[arg(long)]
        depth: Option<u32>,
    },
    /// Clones a project into a directory outside the cache
    Clone {
        project: String,
        /// Defaults to the repository name
        destination: Option<PathBuf>,
        #[arg(short, long)]
        revision: Option<String>,
        #[arg(long)]
        depth: Option<u32>,
    },
    /// Shows project details and whether cached revisions are outdated
    Info { project: String },
    /// Fetches the latest branches and tags into the project mirror
    Update { project: String },
    /// Compares cached branches and tags with the remote
    Diff {
        project: String,
        /// Repeat to print abbreviated (-v) or full (-vv) commit ids
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,
    },
    /// Prints the main script of a project
    View {
        project: String,
        #[arg(short, long)]
        revision: Option<String>,
    },
    /// Downloads a project revision and prints the path of its main script
    Path {
        project: String,
        #[arg(short, long)]
        revision: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_pull() {
        let args = CliArgs::try_parse_from([
            "pipefetch",
            "--hub",
            "gitlab",
            "pull",
            "nextflow-io/hello",
            "-r",
            "v1.0",
        ])
        .unwrap();
        assert_eq!(args.hub.as_deref(), Some("gitlab"));
        match args.cmd {
            Command::Pull {
                project,
                revision,
                depth,
            } => {
                assert_eq!(project, "nextflow-io/hello");
                assert_eq!(revision.as_deref(), Some("v1.0"));
                assert_eq!(depth, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_diff_verbosity() {
        let args = CliArgs::try_parse_from(["pipefetch", "diff", "hello", "-vv"]).unwrap();
        assert!(matches!(args.cmd, Command::Diff { verbose: 2, .. }));
    }
}
