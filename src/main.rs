use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    plotly_pane::run().await
}
