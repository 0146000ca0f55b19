use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use vdm_plugins::{Config, PluginManager, PluginRecord};

/// VDM Plugin Manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugin root directory (overrides the configuration)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a new VDM plugin
    Install {
        /// The path to the plugin file in .zip format
        #[arg(value_name = "plugin_file")]
        url: PathBuf,
    },
    /// Uninstall VDM plugins
    Uninstall {
        /// The plugin name(s) to uninstall
        #[arg(value_name = "plugin_names", required = true)]
        names: Vec<String>,
    },
    /// List information of installed VDM plugins
    List {
        /// The specified plugin name(s) to list
        #[arg(value_name = "plugin_names")]
        names: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Run the function of an existing plugin
    Run {
        /// Plugin name
        plugin_name: String,
        /// Plugin function name
        plugin_function: String,
        /// Text argument passed to the function
        argument: Option<String>,
    },
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let mut config = if let Some(config_path) = &args.config {
        Config::load_from_file(config_path)?
    } else {
        Config::load_default()?
    };

    if let Some(root) = args.root {
        config.plugin_root = root;
    }

    let pm = PluginManager::new(config).context("Failed to prepare plugin root")?;
    execute(&pm, args.command)
}

fn execute(pm: &PluginManager, command: Command) -> Result<()> {
    match command {
        Command::Install { url } => {
            let record = pm
                .install(&url)
                .with_context(|| format!("Failed to install {}", url.display()))?;
            println!(
                "Installed {} {} at {}",
                record.manifest.name,
                record.manifest.version,
                record.path.display()
            );
        }
        Command::Uninstall { names } => {
            let report = pm.uninstall(&names).context("Failed to uninstall")?;
            for name in &report.removed {
                println!("Uninstalled {name}");
            }
            for (name, e) in &report.failed {
                eprintln!("Failed to uninstall {name}: {e}");
            }
            if !report.is_complete() {
                anyhow::bail!(
                    "{} of {} plugin(s) not uninstalled",
                    report.failed.len(),
                    names.len()
                );
            }
        }
        Command::List { names, json } => {
            let records = pm.list(&names).context("Failed to list plugins")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
        }
        Command::Run {
            plugin_name,
            plugin_function,
            argument,
        } => {
            let output = pm
                .run(&plugin_name, &plugin_function, argument.as_deref())
                .with_context(|| format!("Failed to run {plugin_name}.{plugin_function}"))?;
            if let Some(output) = output {
                println!("{output}");
            }
        }
    }
    Ok(())
}

fn print_table(records: &[PluginRecord]) {
    if records.is_empty() {
        println!("No plugins installed.");
        return;
    }
    for record in records {
        let m = &record.manifest;
        println!("{:<20} {:<10} {:<16} {}", m.name, m.version, m.author, m.license);
        if let Some(description) = &m.description {
            println!("    {description}");
        }
    }
}
