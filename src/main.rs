//! Sandnet - network interfaces for Linux namespace sandboxes
//!
//! Reads a TOML manifest and places the interfaces it describes into a
//! network namespace.

mod cli;

use cli::{Cli, Commands};
use sandnet::error::Result;
use sandnet::manifest::{self, SandnetConfig};
use sandnet::network::{Interface, Sandbox};
use serde::Serialize;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }
        Commands::Check => {
            let config = manifest::load(&cli.config)?;
            println!(
                "Configuration OK: {} interface(s), namespace {}",
                config.interfaces.len(),
                config
                    .sandbox
                    .netns
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(default)".to_string())
            );
            Ok(())
        }
        Commands::Up { json } => {
            let config = manifest::load(&cli.config)?;
            warn_if_unprivileged();
            let sandbox = open_sandbox(&config)?;
            let added = bring_up(&sandbox, &config)?;
            print_added(&added, json)
        }
        Commands::Stats { device, json } => {
            let config = manifest::load(&cli.config)?;
            let sandbox = open_sandbox(&config)?;
            let stats = sandbox.link_statistics(&device)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", device);
                println!("{}", stats);
            }
            Ok(())
        }
    }
}

fn open_sandbox(config: &SandnetConfig) -> Result<Arc<Sandbox>> {
    let sandbox = match &config.sandbox.netns {
        Some(path) => Sandbox::open(path)?,
        None => Sandbox::host(),
    };
    Ok(Arc::new(sandbox.with_retry(config.retry.link_up())))
}

/// Add every interface in manifest order
///
/// On failure the interfaces added so far are removed again, newest first.
fn bring_up(sandbox: &Arc<Sandbox>, config: &SandnetConfig) -> Result<Vec<Arc<Interface>>> {
    let mut added: Vec<Arc<Interface>> = Vec::new();

    for def in &config.interfaces {
        match sandbox.add_interface(&def.name, &def.prefix, def.options()) {
            Ok(iface) => added.push(iface),
            Err(e) => {
                for iface in added.iter().rev() {
                    if let Err(undo) = iface.remove() {
                        tracing::error!(
                            interface = %iface.src_name(),
                            "failed to remove interface after error: {}",
                            undo
                        );
                    }
                }
                return Err(e);
            }
        }
    }

    Ok(added)
}

#[derive(Serialize)]
struct AddedInterface<'a> {
    src: &'a str,
    dst: &'a str,
    bridge: bool,
}

fn print_added(added: &[Arc<Interface>], json: bool) -> Result<()> {
    if json {
        let rows: Vec<AddedInterface<'_>> = added
            .iter()
            .map(|i| AddedInterface {
                src: i.src_name(),
                dst: i.dst_name(),
                bridge: i.is_bridge(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for iface in added {
        let kind = if iface.is_bridge() { " (bridge)" } else { "" };
        println!("{} -> {}{}", iface.src_name(), iface.dst_name(), kind);
    }
    Ok(())
}

fn warn_if_unprivileged() {
    // SAFETY: geteuid has no preconditions and cannot fail
    if unsafe { libc::geteuid() } != 0 {
        tracing::warn!("not running as root, moving and configuring links will likely fail");
    }
}
