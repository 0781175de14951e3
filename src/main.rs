use ayjx_bridge::Bridge;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ayjx_bridge::log::init();

    let bridge = match Bridge::builder()
        .config_path("config.toml")
        .data_dir("data")
        .build()
        .await
    {
        Ok(bridge) => bridge,
        Err(e) if e.is_fatal() => {
            error!(target: "System", "{}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    bridge.run().await?;
    Ok(())
}
