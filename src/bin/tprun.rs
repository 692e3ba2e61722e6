use std::process;

use clap::Parser;
use toolpipe::commands::run::{self, RunArgs};

#[derive(Debug, Parser)]
#[command(
    name = "tprun",
    about = "Run the tool pipeline once and print the page",
    disable_version_flag = true
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run::run(cli.run).await {
        eprintln!("{err}");
        process::exit(1);
    }
}
