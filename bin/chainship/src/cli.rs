use std::{ffi::OsString, path::PathBuf};

use anyhow::Context;
use chainship_deploy::{PROJECT_FILENAME, fork::DEFAULT_ANVIL_BIN};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Output format of deployment results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "chainship")]
#[command(
    author,
    version,
    about = "Deploy contract plans to EVM networks configured from the environment"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CHAINSHIP_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file.
    #[arg(short, long, env = "CHAINSHIP_CONFIG", default_value = PROJECT_FILENAME, global = true)]
    pub config: PathBuf,

    /// Path to a .env file with secrets. Defaults to `.env` in the current directory or a parent.
    #[arg(long, env = "CHAINSHIP_ENV_FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse `args` with the `.env` file loaded, so flags backed by environment variables see
    /// its values. Variables already set in the process take precedence over the file.
    ///
    /// Returns the path of the loaded file, if any.
    pub fn parse_with_env_file<I, T>(args: I) -> anyhow::Result<(Self, Option<PathBuf>)>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let cli = Self::parse_from(args.clone());

        let loaded = match &cli.env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("Failed to load env file {}", path.display()))?;
                Some(path.clone())
            }
            // A missing .env file is fine.
            None => dotenvy::dotenv().ok(),
        };

        match loaded {
            Some(path) => Ok((Self::parse_from(args), Some(path))),
            None => Ok((cli, None)),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the project plan to a network.
    Deploy {
        /// The target network. Defaults to the project's `deploy.network`.
        #[arg(short, long, env = "CHAINSHIP_NETWORK")]
        network: Option<String>,

        /// Confirmations to wait for on every step.
        #[arg(long)]
        confirmations: Option<u64>,

        /// Seconds to wait for each step's confirmations.
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip explorer verification.
        #[arg(long, default_value_t = false)]
        no_verify: bool,

        /// Start a local fork node first when the network is a local fork.
        #[arg(long, default_value_t = false)]
        start_node: bool,

        /// How to print the results.
        #[arg(long, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// List the configured networks.
    Networks,

    /// Show the compiler profile selected for a contract.
    Compiler {
        /// Contract identifier, `Name` or `path/to/Source.sol:Name`.
        contract: String,
    },

    /// Run a local fork node until interrupted.
    Node {
        /// The local network to fork.
        #[arg(short, long, env = "CHAINSHIP_NETWORK")]
        network: Option<String>,

        /// The anvil binary.
        #[arg(long, env = "CHAINSHIP_ANVIL_BIN", default_value = DEFAULT_ANVIL_BIN)]
        anvil: String,

        /// Mine a block every N seconds instead of on every transaction.
        #[arg(long)]
        block_time: Option<u64>,

        /// Extra arguments passed to anvil as-is, after `--`.
        #[arg(last = true)]
        anvil_args: Vec<String>,
    },

    /// Write the effective project configuration to a file.
    Config {
        /// Output path. Defaults to the configuration path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
