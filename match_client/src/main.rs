#[tokio::main]
async fn main() {
    if let Err(e) = match_client::run_with_config().await {
        tracing::error!(error = %e, "match client exited with error");
        std::process::exit(1);
    }
}
