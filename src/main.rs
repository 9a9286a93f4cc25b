use clap::Parser;

use neurostim::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .format_timestamp(None)
        .init();

    let exit_code = cli::execute(cli).await;
    std::process::exit(exit_code);
}
