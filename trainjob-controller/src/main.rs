use clap::Parser;

mod backoff;
mod config;
mod events;
mod expectations;
mod gang;
mod indexer;
mod job;
mod mutator;
mod replica;
mod status;
mod store;
mod topology;
mod util;

use config::Options;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trainjob_common::init();

    let options = Options::parse();
    let client = kube::Client::try_default().await?;

    #[cfg(feature = "metrics")]
    let registry = {
        let addr: std::net::SocketAddr = std::env::var("METRICS_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()?;
        let registry = prometheus::Registry::new();
        tokio::spawn(util::http::serve_metrics(addr, registry.clone()));
        registry
    };

    #[cfg(feature = "metrics")]
    job::run(client, options, registry).await?;
    #[cfg(not(feature = "metrics"))]
    job::run(client, options).await?;
    Ok(())
}
