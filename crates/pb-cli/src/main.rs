use anyhow::Result;
use pb_cli::{default_log_filter, Cli, Commands, Parser};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let client = cli.connection.client()?;
    match cli.command {
        Commands::Records { subcommand } => subcommand.run(&client).await,
        Commands::Batch(args) => args.run(&client).await,
        Commands::Realtime(args) => args.run(client).await,
        Commands::Health => pb_cli::health(&client).await,
    }
}
