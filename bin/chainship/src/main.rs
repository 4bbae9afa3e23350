//! chainship is a CLI tool to deploy contract plans to EVM networks configured from the environment.

mod cli;

use std::time::Duration;

use anyhow::Result;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio::sync::watch;

use chainship_deploy::{
    AnvilCmdBuilder, ContractId, DeployerBuilder, DeploymentResult, LocalForkNode,
    NetworkRegistry, ProjectConfig, RunFailure,
    fork::{DEFAULT_ANVIL_BIN, DEFAULT_READY_TIMEOUT_SECS},
    signer::account_addresses,
};
use cli::{Cli, Command, OutputFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets and flag defaults may come from a .env file.
    let (cli, env_file) = Cli::parse_with_env_file(std::env::args_os())?;

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let project = ProjectConfig::load(&cli.config)?;

    match cli.command {
        Command::Deploy {
            network,
            confirmations,
            timeout,
            no_verify,
            start_node,
            output,
        } => {
            let mut builder = DeployerBuilder::new(project);

            if let Some(network) = network {
                builder = builder.network(network);
            }
            if let Some(confirmations) = confirmations {
                builder = builder.confirmations(confirmations);
            }
            if let Some(timeout) = timeout {
                builder = builder.confirmation_timeout(Duration::from_secs(timeout));
            }
            if no_verify {
                builder = builder.verify(false);
            }

            // Pre-flight: nothing is sent if this fails.
            let deployer = builder.build()?;

            let _node = if start_node && deployer.network.is_local_fork() {
                Some(
                    LocalForkNode::start(
                        &deployer.network,
                        DEFAULT_ANVIL_BIN,
                        DEFAULT_READY_TIMEOUT_SECS,
                    )
                    .await?,
                )
            } else {
                None
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, stopping after the current step...");
                    let _ = cancel_tx.send(true);
                }
            });

            match deployer.deploy(Some(cancel_rx)).await {
                Ok(results) => {
                    print_results(&results, output)?;
                }
                Err(RunFailure { completed, error }) => {
                    if !completed.is_empty() {
                        tracing::warn!(
                            deployed = completed.len(),
                            "Deployment stopped, the following steps were completed"
                        );
                        print_results(&completed, output)?;
                    }
                    return Err(error.into());
                }
            }
        }

        Command::Networks => {
            println!("{}", networks_table(&project.networks));
        }

        Command::Compiler { contract } => {
            let contract: ContractId = contract.parse().map_err(anyhow::Error::msg)?;
            let profile = project.compiler.select_for(&contract);
            println!("{contract}");
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "version": profile.version,
                "settings": profile.solc_settings(),
            }))?);
        }

        Command::Node {
            network,
            anvil,
            block_time,
            anvil_args,
        } => {
            let mut builder = DeployerBuilder::new(project).verify(false);
            if let Some(network) = network {
                builder = builder.network(network);
            }
            let deployer = builder.build()?;

            if !deployer.network.is_local_fork() {
                anyhow::bail!("Network {} is not a local fork", deployer.network.id);
            }

            let cmd = AnvilCmdBuilder::for_network(&deployer.network)?
                .block_time(block_time)
                .extra_args(anvil_args);
            let mut node =
                LocalForkNode::spawn(&deployer.network, cmd, &anvil, DEFAULT_READY_TIMEOUT_SECS)
                    .await?;

            println!("Local fork node listening on {}", node.url());
            for (index, address) in account_addresses(&deployer.network.credential)?
                .into_iter()
                .enumerate()
            {
                println!("({index}) {address}");
            }

            let interrupted = tokio::select! {
                result = node.wait() => {
                    result?;
                    false
                }
                _ = tokio::signal::ctrl_c() => true,
            };

            if interrupted {
                tracing::info!("Received Ctrl+C, stopping local fork node...");
                node.stop().await?;
            }
        }

        Command::Config { output } => {
            let path = output.unwrap_or(cli.config);
            project.save_to_file(&path)?;
        }
    }

    Ok(())
}

fn print_results(results: &[DeploymentResult], output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    for result in results {
        println!("{} deployed at Address: {}", result.contract.name, result.address);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Step",
        "Contract",
        "Address",
        "Block",
        "Verification",
    ]);

    for result in results {
        table.add_row(vec![
            result.step_id.clone(),
            result.contract.name.clone(),
            result.address.to_string(),
            result.confirmation.block_number.to_string(),
            result
                .verification
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{table}");

    for result in results {
        for warning in &result.warnings {
            tracing::warn!(step = %result.step_id, "{warning}");
        }
    }

    Ok(())
}

/// One row per network with the environment keys it requires.
fn networks_table(networks: &NetworkRegistry) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network",
        "Chain ID",
        "Required keys",
        "Explorer",
        "Fork",
    ]);

    for (id, spec) in networks.iter() {
        let keys = spec
            .required_keys()
            .into_iter()
            .map(|key| key.name)
            .collect::<Vec<_>>();
        let explorer = spec
            .explorer
            .as_ref()
            .map(|e| e.api_url.clone())
            .unwrap_or_else(|| "-".to_string());
        let fork = spec
            .fork
            .as_ref()
            .map(|f| {
                f.block_number
                    .map(|b| format!("block {b}"))
                    .unwrap_or_else(|| "latest".to_string())
            })
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            id.to_string(),
            spec.chain_id.to_string(),
            keys.join(", "),
            explorer,
            fork,
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_networks_table_lists_required_keys() {
        let rendered = networks_table(&NetworkRegistry::default()).to_string();
        assert!(rendered.contains("Required keys"));
        assert!(!rendered.contains("Credential"));
        // Credential, endpoint and explorer keys of bsc.
        assert!(rendered.contains("PRIVATE_KEY"));
        assert!(rendered.contains("BNB_PRIVATE_RPC"));
        assert!(rendered.contains("BSCSCAN_API_KEY"));
    }
}
