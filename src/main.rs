use clap::Parser;
use qapflow::app::{handle_fatal_error, init_logging, AppConfig};
use qapflow::cli::{execute_command, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&AppConfig::new(cli.verbose));

    match execute_command(cli.command, cli.verbose).await {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, cli.verbose),
    }
}
