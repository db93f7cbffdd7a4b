use clap::Parser;
use parrot_cli::Cli;

#[tokio::main]
async fn main() {
    if let Err(e) = Cli::parse().run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
