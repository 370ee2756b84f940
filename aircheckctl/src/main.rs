use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = aircheckctl::Cli::parse();
    aircheckctl::init_tracing();
    if let Err(err) = aircheckctl::run(cli).await {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
