use clap::Parser;
use vigil::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbosity);

    if let Err(e) = cli::run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
