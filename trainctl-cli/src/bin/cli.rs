use clap::{Parser, Subcommand};
use std::process::ExitCode;
use trainctl_cli::cli::{self, commands::*};

#[derive(Parser)]
#[command(
    name = "trainctl",
    version,
    about = "Steer a running training loop and inspect past runs",
    long_about = "trainctl serves the control panel for a training program built on the trainctl \
                  library, and lists the runs and checkpoints recorded under a log root."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (can be repeated for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Settings file path
    #[arg(short, long, global = true, env = "TRAINCTL_CONFIG")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control panel for a running worker
    Serve(ServeCommand),

    /// Inspect recorded runs
    Runs(RunsCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = cli::logging::init_logging(cli.verbose, cli.quiet, cli.json) {
        eprintln!("Failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Serve(cmd) => cli::commands::serve::execute(cmd).await,
        Commands::Runs(cmd) => cli::load_settings(cli.config.as_deref())
            .and_then(|settings| cli::commands::runs::execute(cmd, &settings, cli.json)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.print_error();
            ExitCode::FAILURE
        }
    }
}
