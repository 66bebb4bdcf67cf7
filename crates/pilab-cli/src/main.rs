mod cleanup_cmd;
mod config;
mod list_cmd;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{Overrides, PilabConfig};

#[derive(Parser)]
#[command(name = "pilab", about = "Experiment supervisor for the Raspberry Pi lab board")]
struct Cli {
    /// Directory holding the experiment scripts (overrides PILAB_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a pilab config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run experiments, switching with the console or the button
    Run {
        /// Experiment to start with
        #[arg(long, short, default_value_t = 1)]
        experiment: u8,
        /// Launch experiments without sudo
        #[arg(long)]
        no_sudo: bool,
        /// Do not touch GPIO, LEDs or the display
        #[arg(long)]
        no_hardware: bool,
    },
    /// Turn off LEDs, clear the display and release GPIO pins
    Cleanup {
        /// Skip hardware access entirely
        #[arg(long)]
        no_hardware: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show experiments, pins and device settings
    List,
}

/// Execute the `pilab init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  launch.elevate = {}", cfg.launch.elevate);
    println!("  button.pin = {}", cfg.button.pin);
    println!("  hardware.led_count = {}", cfg.hardware.led_count);
    println!();
    println!("Next: set launch.root, then run `pilab run`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Run {
            experiment,
            no_sudo,
            no_hardware,
        } => {
            let resolved = PilabConfig::resolve(&Overrides {
                root: cli.root,
                no_sudo,
                no_hardware,
            })?;
            let reason = run_cmd::run(resolved, experiment).await?;
            // The stdin reader may still be blocked on a read; exiting here
            // does not wait for it.
            std::process::exit(run_cmd::exit_code(reason));
        }
        Commands::Cleanup { no_hardware, json } => {
            let resolved = PilabConfig::resolve(&Overrides {
                root: cli.root,
                no_hardware,
                ..Overrides::default()
            })?;
            cleanup_cmd::run_cleanup(&resolved, json).await?;
        }
        Commands::List => {
            let resolved = PilabConfig::resolve(&Overrides {
                root: cli.root,
                ..Overrides::default()
            })?;
            list_cmd::run_list(&resolved);
        }
    }

    Ok(())
}
