#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keywarden::cli::run_cli().await
}
