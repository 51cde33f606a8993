mod cli;
mod commands;
mod error;
mod output;
mod zone;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netrules_config::OutputSection;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::Ui;
use crate::zone::Session;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(netrules_config::config_path);

    match cli.command {
        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "netrules", &mut std::io::stdout());
            Ok(())
        }

        // Config commands must work even when the file does not load
        Command::Config(args) => {
            let ui = Ui::resolve(&cli.global, &OutputSection::default())?;
            commands::config_cmd::handle(args, &config_path, &ui)
        }

        // All other commands operate on a zone
        cmd => {
            let config = netrules_config::load_config_from(&config_path)?;
            let ui = Ui::resolve(&cli.global, &config.output)?;
            let session = Session::open(&cli.global, &config)?;

            commands::dispatch(cmd, &session, &ui).await?;
            session.finish(&cli.global, &ui)
        }
    }
}
