use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = brokerlink::cli::Cli::parse();
    if let Err(e) = brokerlink::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
