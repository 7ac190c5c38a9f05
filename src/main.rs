#[tokio::main]
async fn main() -> anyhow::Result<()> {
    diskpilot::run().await
}
