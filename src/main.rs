use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use phylo_runner::cli;

fn init_logging(verbose: bool, silent: bool) {
    let filter = if verbose {
        EnvFilter::new("phylo_runner=debug")
    } else if silent {
        EnvFilter::new("phylo_runner=error")
    } else {
        EnvFilter::new("phylo_runner=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    init_logging(args.verbose, is_silent);

    match cli::run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if is_silent {
                println!("{:#}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
