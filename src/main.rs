use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use request_inspector::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    init_tracing();

    match args.get_command() {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::List(list_args) => {
            commands::list::execute(&args.config, list_args)?;
        }
        cli::Commands::Show(show_args) => {
            commands::show::execute(&args.config, show_args)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
    }

    Ok(())
}
