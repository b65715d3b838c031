//! Config command - show the resolved configuration.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved [session] configuration
    Show,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    // Fail on values the engine would reject, before printing them.
    loaded.config.to_manager_config()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        return Ok(());
    }

    println!("{}\n", style("# drowse Configuration").bold());
    match &loaded.source {
        Some(path) => println!("Config file: {}\n", path.display()),
        None => println!("No config file loaded (using defaults)\n"),
    }
    print!("{}", loaded.config.to_toml()?);
    Ok(())
}
