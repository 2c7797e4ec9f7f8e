use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vton_lib::{DEFAULT_LOG_FILTER, config::Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::load()?;
    vton_lib::run(args).await
}
