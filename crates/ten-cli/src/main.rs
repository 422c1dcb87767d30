//! Command-line interface for the TEN extension runtime.

mod builtin;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ten_runtime::config::RuntimeConfig;
use ten_runtime::{App, GraphDefinition, StartGraphCmd};

/// TEN runtime - run extension graphs.
#[derive(Parser, Debug)]
#[command(name = "ten")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Runtime config file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start a graph with the builtin addons and run it until Ctrl-C.
    Run {
        /// Graph definition (JSON).
        graph: PathBuf,
        /// URI of this app; overrides config and environment.
        #[arg(long)]
        app_uri: Option<String>,
        /// Graph name reported in logs.
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Parse a graph and print the topology it would start.
    Validate {
        /// Graph definition (JSON).
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RuntimeConfig::load(args.config.as_deref())
        .with_context(|| "Failed to load runtime config")?;
    if args.verbose {
        config.log.level = "debug".to_string();
    }
    ten_runtime::logging::init(&config.log)?;

    match args.command {
        Command::Run {
            graph,
            app_uri,
            name,
        } => {
            if let Some(uri) = app_uri {
                config.app.uri = uri;
            }
            run_graph(config, graph, name).await
        }
        Command::Validate { graph } => validate_graph(&config, graph),
    }
}

async fn run_graph(config: RuntimeConfig, path: PathBuf, name: String) -> Result<()> {
    let graph = GraphDefinition::from_file(&path)
        .with_context(|| format!("Failed to load graph {}", path.display()))?;

    let app = App::new(&config, builtin::registry()?);
    let graph_id = app.start_named_graph(&name, &graph).await?;
    tracing::info!(graph_id = %graph_id, "Running, press Ctrl-C to stop");

    let handle = app
        .graph(&graph_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("graph {} vanished", graph_id))?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Ctrl-C received, closing");
        }
        _ = handle.wait_closed() => {
            tracing::info!(graph_id = %graph_id, "Graph closed itself");
        }
    }

    app.close().await?;
    Ok(())
}

fn validate_graph(config: &RuntimeConfig, path: PathBuf) -> Result<()> {
    let graph = GraphDefinition::from_file(&path)
        .with_context(|| format!("Invalid graph {}", path.display()))?;
    let cmd = StartGraphCmd::from_definition(&graph, &config.app.uri, "validate")?;

    let groups: Vec<_> = cmd
        .extension_groups_info()
        .iter()
        .map(|g| {
            serde_json::json!({
                "name": g.name(),
                "addon": g.extension_group_addon_name,
                "app": g.loc.app_uri,
                "extensions": cmd
                    .extension_addon_and_instance_name_pairs_of_group(&g.loc.app_uri, cmd.graph_id(), g.name())
                    .iter()
                    .map(|p| serde_json::json!({"name": p.instance_name, "addon": p.addon_name}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    let summary = serde_json::json!({
        "app_uri": config.app.uri,
        "extension_groups": groups,
        "local_extension_groups": cmd.extension_groups_cnt_of_app(&config.app.uri),
        "routes": cmd.topology().routes().len(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_graph_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nodes": [
                {{"type": "extension", "name": "beat", "addon": "heartbeat"}},
                {{"type": "extension", "name": "sink", "addon": "log"}}
            ],
            "connections": [{{"extension": "beat",
                "data": [{{"name": "heartbeat", "dest": [{{"extension": "sink"}}]}}]}}]}}"#
        )
        .unwrap();

        validate_graph(&RuntimeConfig::default(), file.path().to_path_buf()).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_graph() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"nodes": [{{"type": "extension", "name": "a"}}]}}"#).unwrap();

        assert!(validate_graph(&RuntimeConfig::default(), file.path().to_path_buf()).is_err());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin::registry().unwrap();
        assert!(registry.has_extension_addon(builtin::LOG_ADDON));
        assert!(registry.has_extension_addon(builtin::HEARTBEAT_ADDON));
    }
}
