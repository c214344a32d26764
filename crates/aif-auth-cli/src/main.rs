#[tokio::main]
async fn main() {
    if let Err(e) = aif_auth_cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
