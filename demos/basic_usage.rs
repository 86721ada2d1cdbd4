//! Basic usage example for the etcd client
//!
//! Needs a running etcd with the v2 API enabled.
//! Run with: ETCD_ENDPOINT=http://127.0.0.1:2379 cargo run --example basic_usage

use std::time::Duration;

use etcd_rest_client::{Client, ClientConfig, WatchOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging, RUST_LOG=debug shows every request
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_env()?;
    info!("Connecting to {}", config.endpoint);
    let client = Client::with_config(config)?;

    info!("Server version: {}", client.version().await?);

    // Store and read back a value
    let set = client.set("/demo/message", "Hello etcd").await?;
    info!("Stored at index {:?}", set.etcd_index());

    if let Some(result) = client.get("/demo/message").await? {
        info!("Retrieved: {:?}", result.value());
    }

    // Conditional update
    let cas = client.cas("/demo/message", "wrong guess", "ignored").await?;
    if let Some(err) = cas.error() {
        info!("CAS rejected as expected: {}", err);
    }
    client.cas("/demo/message", "Hello etcd", "Hello again").await?;

    // Keys with a TTL
    let ttl = client.set_with_ttl("/demo/session", "alive", 30).await?;
    if let Some(node) = ttl.node {
        info!("Session expires at {:?} ({:?}s)", node.expiration, node.ttl);
    }

    // Directory listing
    client.set("/demo/jobs/1", "queued").await?;
    client.set("/demo/jobs/2", "running").await?;
    if let Some(jobs) = client.list_directory("/demo/jobs").await? {
        for job in jobs {
            info!("  {} = {:?}", job.name(), job.value);
        }
    }

    // Watch for the next change below /demo/jobs
    let next = client
        .get("/demo/jobs/2")
        .await?
        .and_then(|r| r.node)
        .map(|n| n.modified_index + 1)
        .unwrap_or_default();
    let watch = client.watch_with("/demo/jobs", WatchOptions::new().wait_index(next).recursive(true))?;
    client.set("/demo/jobs/2", "done").await?;
    let change = tokio::time::timeout(Duration::from_secs(5), watch).await??;
    info!("Watch saw {} on {:?}", change.action, change.node.map(|n| n.key));

    // Cleanup
    for key in ["/demo/jobs/1", "/demo/jobs/2", "/demo/message", "/demo/session"] {
        client.delete(key).await?;
    }
    if let Err(e) = client.delete_directory("/demo/jobs").await {
        info!("Directory left in place: {}", e);
    }

    info!("Done");
    Ok(())
}
